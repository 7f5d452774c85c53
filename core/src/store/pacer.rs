//! Client-side request pacing

/// Spaces requests at least `min_interval_ms` apart, except for the first
/// `bootstrap` requests after construction.
#[derive(Debug, Clone)]
pub(crate) struct RequestPacer {
    min_interval_ms: u64,
    bootstrap_remaining: u32,
    last_request_at_ms: Option<u64>,
}

impl RequestPacer {
    pub(crate) fn new(min_interval_ms: u64, bootstrap: u32) -> Self {
        Self {
            min_interval_ms,
            bootstrap_remaining: bootstrap,
            last_request_at_ms: None,
        }
    }

    /// Milliseconds the next request has to wait. Spends one bootstrap slot
    /// if any are left.
    pub(crate) fn admit(&mut self, now_ms: u64) -> u64 {
        if self.bootstrap_remaining > 0 {
            self.bootstrap_remaining -= 1;
            debug!("Initial request allowed ({} remaining)", self.bootstrap_remaining);
            return 0;
        }
        match self.last_request_at_ms {
            None => 0,
            Some(last) => self
                .min_interval_ms
                .saturating_sub(now_ms.saturating_sub(last)),
        }
    }

    /// Stamp a successful exchange
    pub(crate) fn record_success(&mut self, now_ms: u64) {
        self.last_request_at_ms = Some(now_ms);
    }

    #[cfg(test)]
    pub(crate) fn bootstrap_remaining(&self) -> u32 {
        self.bootstrap_remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_bypasses_pacing() {
        let mut pacer = RequestPacer::new(2_000, 2);
        pacer.record_success(0);
        assert_eq!(pacer.admit(10), 0);
        assert_eq!(pacer.admit(20), 0);
        assert_eq!(pacer.bootstrap_remaining(), 0);
        assert_eq!(pacer.admit(500), 1_500);
    }

    #[test]
    fn test_wait_shrinks_with_elapsed_time() {
        let mut pacer = RequestPacer::new(2_000, 0);
        assert_eq!(pacer.admit(0), 0);
        pacer.record_success(1_000);
        assert_eq!(pacer.admit(1_500), 1_500);
        assert_eq!(pacer.admit(3_000), 0);
        assert_eq!(pacer.admit(9_000), 0);
    }
}
