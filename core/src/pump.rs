//! Dispense pump interlock
//!
//! The pump may run for at most [`MAX_DISPENSE_MS`] per activation and has to
//! rest [`DISPENSE_COOLDOWN_MS`] between activations. The board drives the
//! GPIO; this type only decides whether it may.

pub const DISPENSE_COOLDOWN_MS: u64 = 3_000;
pub const MAX_DISPENSE_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PumpError {
    AlreadyRunning,
    NotRunning,
    CoolingDown { remaining_ms: u64 },
}

impl core::fmt::Display for PumpError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "Pump already running"),
            Self::NotRunning => write!(f, "Pump not running"),
            Self::CoolingDown { remaining_ms } => {
                write!(f, "Cooldown active: {}ms remaining", remaining_ms)
            }
        }
    }
}

impl core::error::Error for PumpError {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PumpGuard {
    started_at_ms: Option<u64>,
    last_stop_ms: Option<u64>,
    total_dispenses: u32,
    /// Percent, reset by refilling
    sanitizer_level: f32,
}

impl Default for PumpGuard {
    fn default() -> Self {
        Self {
            started_at_ms: None,
            last_stop_ms: None,
            total_dispenses: 0,
            sanitizer_level: 100.0,
        }
    }
}

impl PumpGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dispensing(&self) -> bool {
        self.started_at_ms.is_some()
    }

    pub fn total_dispenses(&self) -> u32 {
        self.total_dispenses
    }

    pub fn sanitizer_level(&self) -> f32 {
        self.sanitizer_level
    }

    pub fn reset_sanitizer(&mut self) {
        self.sanitizer_level = 100.0;
        self.total_dispenses = 0;
        info!("Sanitizer reset to 100%");
    }

    /// Claim the pump. On `Ok` the caller switches it on.
    pub fn start(&mut self, now_ms: u64) -> Result<(), PumpError> {
        if self.is_dispensing() {
            warn!("Pump already running");
            return Err(PumpError::AlreadyRunning);
        }
        if let Some(stopped) = self.last_stop_ms {
            let rested = now_ms.saturating_sub(stopped);
            if rested < DISPENSE_COOLDOWN_MS {
                let remaining_ms = DISPENSE_COOLDOWN_MS - rested;
                warn!("Cooldown active: {}ms remaining", remaining_ms);
                return Err(PumpError::CoolingDown { remaining_ms });
            }
        }
        self.started_at_ms = Some(now_ms);
        info!("Pump started");
        Ok(())
    }

    /// Release the pump. Returns how long it ran.
    pub fn stop(&mut self, now_ms: u64) -> Result<u64, PumpError> {
        let started = self.started_at_ms.take().ok_or(PumpError::NotRunning)?;
        self.last_stop_ms = Some(now_ms);
        self.total_dispenses = self.total_dispenses.saturating_add(1);
        let duration = now_ms.saturating_sub(started);
        info!(
            "Pump stopped after {}ms ({} dispenses)",
            duration, self.total_dispenses
        );
        Ok(duration)
    }

    /// Whether a running pump has hit [`MAX_DISPENSE_MS`] and must be stopped
    pub fn timed_out(&self, now_ms: u64) -> bool {
        self.started_at_ms
            .is_some_and(|started| now_ms.saturating_sub(started) >= MAX_DISPENSE_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_stop() {
        let mut pump = PumpGuard::new();
        pump.start(1_000).unwrap();
        assert!(pump.is_dispensing());
        assert_eq!(pump.start(1_100), Err(PumpError::AlreadyRunning));
        assert_eq!(pump.stop(1_500), Ok(500));
        assert_eq!(pump.total_dispenses(), 1);
        assert_eq!(pump.stop(1_600), Err(PumpError::NotRunning));
    }

    #[test]
    fn test_cooldown() {
        let mut pump = PumpGuard::new();
        pump.start(0).unwrap();
        pump.stop(1_000).unwrap();

        assert_eq!(
            pump.start(2_000),
            Err(PumpError::CoolingDown { remaining_ms: 2_000 })
        );
        assert!(pump.start(4_000).is_ok());
    }

    #[test]
    fn test_timeout() {
        let mut pump = PumpGuard::new();
        assert!(!pump.timed_out(10_000));
        pump.start(0).unwrap();
        assert!(!pump.timed_out(1_999));
        assert!(pump.timed_out(2_000));
    }

    #[test]
    fn test_reset_sanitizer() {
        let mut pump = PumpGuard::new();
        pump.start(0).unwrap();
        pump.stop(10).unwrap();
        pump.reset_sanitizer();
        assert_eq!(pump.total_dispenses(), 0);
        assert_eq!(pump.sanitizer_level(), 100.0);
    }
}
