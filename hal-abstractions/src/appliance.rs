//! Device-control collaborators
//!
//! The physical side of the appliance: pump, thermal printer and the weather
//! line shown on the display. The dispatcher only cares whether an action
//! succeeded; failures are logged by the implementation.

use core::future::Future;

pub trait Appliance {
    type Error;

    /// Start the dispense cycle. Implementations enforce their own safety
    /// limits (maximum run time, cooldown).
    fn start_dispense(&mut self) -> Result<(), Self::Error>;

    fn stop_dispense(&mut self) -> Result<(), Self::Error>;

    /// Print `text` on the receipt printer
    fn print_receipt(&mut self, text: &str) -> impl Future<Output = Result<(), Self::Error>>;

    /// Fetch current conditions and update whatever shows them
    fn refresh_weather(&mut self) -> impl Future<Output = Result<(), Self::Error>>;
}
