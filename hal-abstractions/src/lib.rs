//! Hardware abstraction traits for the dispenser firmware
//!
//! This crate defines the seams between the platform-agnostic pipeline in
//! `dispenser-core` and a concrete board. BSPs implement these traits.
//!
//! - [`clock`]: monotonic milliseconds and wall-clock seconds
//! - [`network`]: one-shot HTTP(S) request/response transport
//! - [`appliance`]: dispenser pump, receipt printer and weather display

#![no_std]
#![deny(unsafe_code)]
#![deny(warnings)]

extern crate alloc;

pub mod appliance;
pub mod clock;
pub mod network;

pub use appliance::Appliance;
pub use clock::{Clock, WallClock};
pub use network::{HttpTransport, Method, Request, Response};
