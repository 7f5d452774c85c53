//! Time sources

/// Monotonic millisecond counter, starting at an arbitrary point (usually boot).
///
/// Used for queue pacing, request pacing and rate-limit windows. Must never
/// go backwards.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Calendar time in Unix seconds.
///
/// Returns `None` until the board has synchronized its clock (SNTP on the
/// Feather). Reminder scheduling needs wall time; everything else runs on
/// [`Clock`].
pub trait WallClock {
    fn unix_secs(&self) -> Option<u64>;
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

impl<T: WallClock + ?Sized> WallClock for &T {
    fn unix_secs(&self) -> Option<u64> {
        (**self).unix_secs()
    }
}
