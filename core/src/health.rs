//! Periodic self-check served on `/api/health`

use alloc::string::String;
use serde::Serialize;

use crate::cadence::{periods, Cadence};
use crate::status::FIRMWARE_VERSION;

/// Below this much free heap the device reports itself unhealthy
pub const DEFAULT_MIN_FREE_HEAP: usize = 4 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthConfig {
    pub check_interval_ms: u64,
    pub min_free_heap: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: periods::HEALTH_MS,
            min_free_heap: DEFAULT_MIN_FREE_HEAP,
        }
    }
}

/// One sample of the device's vitals, taken by the board
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthProbe {
    pub link_up: bool,
    pub ip: Option<String>,
    pub store_healthy: bool,
    pub printer_ready: bool,
    pub free_heap: usize,
    pub min_free_heap: usize,
    pub heap_size: usize,
    pub cpu_mhz: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkHealth {
    pub connected: bool,
    pub ip: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreHealth {
    pub healthy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrinterHealth {
    pub ready: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryHealth {
    pub free_heap: usize,
    pub min_free_heap: usize,
    pub usage_percent: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CpuHealth {
    #[serde(rename = "frequencyMHz")]
    pub frequency_mhz: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub firmware: &'static str,
    pub uptime: u64,
    pub uptime_hours: f32,
    pub wifi: LinkHealth,
    pub firebase: StoreHealth,
    pub printer: PrinterHealth,
    pub memory: MemoryHealth,
    pub cpu: CpuHealth,
    pub healthy: bool,
    /// Unix seconds of the last sample, 0 before the first one
    pub last_check: u64,
}

#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthConfig,
    cadence: Cadence,
    probe: HealthProbe,
    uptime_ms: u64,
    last_check: u64,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            cadence: Cadence::new(config.check_interval_ms),
            probe: HealthProbe::default(),
            uptime_ms: 0,
            last_check: 0,
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    pub fn set_check_interval(&mut self, ms: u64) {
        self.config.check_interval_ms = ms;
        self.cadence = Cadence::new(ms);
    }

    /// Whether a new sample is due; the board then calls [`Self::record`]
    pub fn check_due(&mut self, now_ms: u64) -> bool {
        self.cadence.due(now_ms)
    }

    pub fn record(&mut self, probe: HealthProbe, now_ms: u64, unix_secs: Option<u64>) {
        self.probe = probe;
        self.uptime_ms = now_ms;
        self.last_check = unix_secs.unwrap_or(0);

        if self.is_healthy() {
            debug!("Health check passed");
        } else {
            warn!(
                "Health check failed: link={} printer={} heap={}",
                self.probe.link_up, self.probe.printer_ready, self.probe.free_heap
            );
        }
    }

    pub fn probe(&self) -> &HealthProbe {
        &self.probe
    }

    pub fn is_healthy(&self) -> bool {
        self.probe.link_up
            && self.probe.printer_ready
            && self.probe.free_heap > self.config.min_free_heap
    }

    pub fn memory_usage_percent(&self) -> u8 {
        let total = self.probe.heap_size;
        if total == 0 {
            return 0;
        }
        let used = total.saturating_sub(self.probe.free_heap);
        (used.saturating_mul(100) / total).min(100) as u8
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            firmware: FIRMWARE_VERSION,
            uptime: self.uptime_ms,
            uptime_hours: self.uptime_ms as f32 / 3_600_000.0,
            wifi: LinkHealth {
                connected: self.probe.link_up,
                ip: self
                    .probe
                    .ip
                    .clone()
                    .unwrap_or_else(|| String::from("N/A")),
            },
            firebase: StoreHealth {
                healthy: self.probe.store_healthy,
            },
            printer: PrinterHealth {
                ready: self.probe.printer_ready,
            },
            memory: MemoryHealth {
                free_heap: self.probe.free_heap,
                min_free_heap: self.probe.min_free_heap,
                usage_percent: self.memory_usage_percent(),
            },
            cpu: CpuHealth {
                frequency_mhz: self.probe.cpu_mhz,
            },
            healthy: self.is_healthy(),
            last_check: self.last_check,
        }
    }
}
