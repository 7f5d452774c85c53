//! Board time sources
//!
//! Monotonic milliseconds come from the embassy time driver (TIM2), wall time
//! from the internal RTC once SNTP has set it.

#![deny(unsafe_code)]

mod rtc;

pub use rtc::{initialize_rtc, is_time_synced, read_rtc, write_rtc, RtcError, Timestamp};

use embassy_time::Instant;
use hal_abstractions::{Clock, WallClock};

/// Time source handed to the core crate
#[derive(Debug, Clone, Copy, Default)]
pub struct BoardClock;

impl Clock for BoardClock {
    fn now_ms(&self) -> u64 {
        Instant::now().as_millis()
    }
}

impl WallClock for BoardClock {
    fn unix_secs(&self) -> Option<u64> {
        read_rtc().ok().map(|ts| ts.unix_secs)
    }
}
