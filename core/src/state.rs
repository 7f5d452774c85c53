//! Device state shared by the driver loop and the local API

use crate::auth::{AuthorizationGate, GateConfig};
use crate::commands::CommandPoller;
use crate::groceries::GroceryList;
use crate::health::{HealthConfig, HealthMonitor};
use crate::queue::OperationQueue;
use crate::reminders::ReminderScheduler;

#[derive(Debug, Default)]
pub struct DeviceState {
    pub queue: OperationQueue,
    pub reminders: ReminderScheduler,
    pub groceries: GroceryList,
    pub gate: AuthorizationGate,
    pub health: HealthMonitor,
    pub commands: CommandPoller,
}

impl DeviceState {
    pub fn new(gate: GateConfig, health: HealthConfig) -> Self {
        Self {
            gate: AuthorizationGate::new(gate),
            health: HealthMonitor::new(health),
            ..Self::default()
        }
    }
}
