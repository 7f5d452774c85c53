//! Platform-agnostic core of the dispenser/printer firmware
//!
//! Everything that does not touch a peripheral lives here: the deferred
//! operation queue, the remote store client, the reminder scheduler, the
//! local API and its authorization gate. Hardware and network access come in
//! through the traits in `hal-abstractions`, so the whole crate runs and is
//! tested on the host.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]
#![cfg_attr(not(test), deny(warnings))]

extern crate alloc;

// Must come first so the log macros are visible to the other modules
#[macro_use]
mod fmt;

pub mod api;
pub mod auth;
pub mod cadence;
pub mod calendar;
pub mod commands;
pub mod dispatch;
pub mod driver;
pub mod groceries;
pub mod health;
pub mod http;
pub mod pump;
pub mod queue;
pub mod receipt;
pub mod reminders;
pub mod state;
pub mod status;
pub mod store;
pub mod weather;

#[cfg(test)]
mod testing;

pub use api::{handle, ApiRequest, ApiResponse, Now};
pub use auth::{AuthorizationGate, Denial, GateConfig};
pub use cadence::Cadence;
pub use driver::{DeviceMonitor, Driver};
pub use queue::{Operation, OperationKind, OperationQueue};
pub use reminders::ReminderScheduler;
pub use state::DeviceState;
pub use store::{RemoteStoreClient, StoreConfig, StoreError};
