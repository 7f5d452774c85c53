//! Internal RTC access
//!
//! The RTC (clocked from the 32.768 kHz LSE) holds wall time between SNTP
//! syncs. It only reads as valid after the first successful sync.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use critical_section::Mutex;
use defmt::{info, Format};
use dispenser_core::calendar::DateTime as Civil;
use embassy_stm32::rtc::{DateTime, DayOfWeek, Rtc};

/// Set once the RTC has been written from a trusted source
static TIME_SYNCED: AtomicBool = AtomicBool::new(false);

static RTC: Mutex<RefCell<Option<Rtc>>> = Mutex::new(RefCell::new(None));

/// Timestamp with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub struct Timestamp {
    /// Seconds since 1970-01-01 00:00:00 UTC
    pub unix_secs: u64,
    /// 0-999,999
    pub micros: u32,
}

impl Timestamp {
    pub const fn new(unix_secs: u64, micros: u32) -> Self {
        Self { unix_secs, micros }
    }

    /// Convert from NTP timestamp (seconds since 1900-01-01, 2^-32 fraction)
    pub fn from_ntp(ntp_secs: u64, ntp_frac: u32) -> Self {
        const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

        let unix_secs = ntp_secs.saturating_sub(NTP_UNIX_OFFSET);
        let micros = ((ntp_frac as u64 * 1_000_000) >> 32) as u32;
        Self::new(unix_secs, micros)
    }

    /// Add `micros`, carrying into the seconds
    pub fn add_micros(self, micros: u64) -> Self {
        let total = self.micros as u64 + micros;
        Self::new(
            self.unix_secs.saturating_add(total / 1_000_000),
            (total % 1_000_000) as u32,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum RtcError {
    NotInitialized,
    /// Date out of the RTC's range or peripheral failure
    HardwareError,
}

/// Must be called once from `init` before any time operation
pub fn initialize_rtc(rtc: Rtc) {
    critical_section::with(|cs| {
        RTC.borrow(cs).replace(Some(rtc));
    });
    info!("Internal RTC initialized");
}

pub fn is_time_synced() -> bool {
    TIME_SYNCED.load(Ordering::Acquire)
}

/// Write wall time to the RTC; marks time as synced on success
pub fn write_rtc(timestamp: Timestamp) -> Result<(), RtcError> {
    let datetime = to_rtc_datetime(timestamp.unix_secs)?;

    critical_section::with(|cs| {
        let mut rtc = RTC.borrow(cs).borrow_mut();
        let rtc = rtc.as_mut().ok_or(RtcError::NotInitialized)?;
        rtc.set_datetime(datetime)
            .map_err(|_| RtcError::HardwareError)?;
        TIME_SYNCED.store(true, Ordering::Release);
        Ok(())
    })
}

/// Current wall time (1 s resolution); fails until the first sync
pub fn read_rtc() -> Result<Timestamp, RtcError> {
    if !is_time_synced() {
        return Err(RtcError::NotInitialized);
    }

    critical_section::with(|cs| {
        let mut rtc = RTC.borrow(cs).borrow_mut();
        let rtc = rtc.as_mut().ok_or(RtcError::NotInitialized)?;
        let dt = rtc.now().map_err(|_| RtcError::HardwareError)?;
        let civil = Civil {
            year: dt.year(),
            month: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
            minute: dt.minute(),
            second: dt.second(),
        };
        Ok(Timestamp::new(civil.to_unix(), 0))
    })
}

fn to_rtc_datetime(unix_secs: u64) -> Result<DateTime, RtcError> {
    let civil = Civil::from_unix(unix_secs);
    // 1970-01-01 was a Thursday
    let day_of_week = match (unix_secs / 86_400 + 3) % 7 {
        0 => DayOfWeek::Monday,
        1 => DayOfWeek::Tuesday,
        2 => DayOfWeek::Wednesday,
        3 => DayOfWeek::Thursday,
        4 => DayOfWeek::Friday,
        5 => DayOfWeek::Saturday,
        _ => DayOfWeek::Sunday,
    };
    DateTime::from(
        civil.year,
        civil.month,
        civil.day,
        day_of_week,
        civil.hour,
        civil.minute,
        civil.second,
        0,
    )
    .map_err(|_| RtcError::HardwareError)
}
