//! Calendar date/time conversions using O(1) algorithms
//!
//! Howard Hinnant's `civil_from_days` and `days_from_civil`
//! (<http://howardhinnant.github.io/date_algorithms.html>). UTC only, no
//! leap seconds, years 1970-2105 (u16).

use core::fmt::Write;

const SECONDS_PER_DAY: u64 = 86_400;

/// Gregorian leap year rule
pub fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Broken-down UTC time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DateTime {
    pub fn from_unix(unix_secs: u64) -> Self {
        let days_since_epoch = (unix_secs / SECONDS_PER_DAY) as i32;
        let secs_today = unix_secs % SECONDS_PER_DAY;
        let (year, month, day) = civil_from_days(days_since_epoch);

        Self {
            year,
            month,
            day,
            hour: (secs_today / 3600) as u8,
            minute: ((secs_today % 3600) / 60) as u8,
            second: (secs_today % 60) as u8,
        }
    }

    pub fn to_unix(&self) -> u64 {
        let days = days_from_civil(self.year, self.month, self.day);
        (days as u64) * SECONDS_PER_DAY
            + (self.hour as u64) * 3600
            + (self.minute as u64) * 60
            + (self.second as u64)
    }
}

impl core::fmt::Display for DateTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// `YYYY-MM-DD HH:MM:SS` for a Unix timestamp
pub fn format_timestamp(unix_secs: u64) -> heapless::String<19> {
    let mut out = heapless::String::new();
    // 19 bytes is exact for four-digit years
    let _ = write!(out, "{}", DateTime::from_unix(unix_secs));
    out
}

/// Days since 1970-01-01 to (year, month, day)
pub fn civil_from_days(days_since_epoch: i32) -> (u16, u8, u8) {
    // Shift epoch to 0000-03-01 so the leap day ends the year
    let z = days_since_epoch + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32; // [0, 146096]
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365; // [0, 399]
    let y = (yoe as i32) + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100); // [0, 365]
    let mp = (5 * doy + 2) / 153; // March = 0
    let d = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u8;
    let year = if m <= 2 { y + 1 } else { y };

    (year as u16, m, d)
}

/// (year, month, day) to days since 1970-01-01
pub fn days_from_civil(year: u16, month: u8, day: u8) -> i32 {
    let y = year as i32;
    let m = month as i32;
    let d = day as i32;

    let (y, m) = if m <= 2 { (y - 1, m + 9) } else { (y, m - 3) };

    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as u32;
    let doy = (153 * (m as u32) + 2) / 5 + (d as u32) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;

    era * 146_097 + (doe as i32) - 719_468
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leap_year() {
        assert!(is_leap_year(2000));
        assert!(is_leap_year(2024));
        assert!(!is_leap_year(1900));
        assert!(!is_leap_year(2023));
        assert!(!is_leap_year(2100));
    }

    #[test]
    fn test_unix_epoch() {
        let dt = DateTime::from_unix(0);
        assert_eq!(
            dt,
            DateTime {
                year: 1970,
                month: 1,
                day: 1,
                hour: 0,
                minute: 0,
                second: 0
            }
        );
    }

    #[test]
    fn test_round_trip_conversion() {
        let samples = [
            0u64,
            946_684_800,   // 2000-01-01
            1_609_459_200, // 2021-01-01
            1_704_067_200, // 2024-01-01
            2_147_483_647, // 2038-01-19 03:14:07
            4_102_444_800, // 2100-01-01
        ];

        for &unix_secs in &samples {
            assert_eq!(DateTime::from_unix(unix_secs).to_unix(), unix_secs);
        }
    }

    #[test]
    fn test_leap_day_2024() {
        let leap_day = DateTime {
            year: 2024,
            month: 2,
            day: 29,
            hour: 0,
            minute: 0,
            second: 0,
        };
        let back = DateTime::from_unix(leap_day.to_unix());
        assert_eq!((back.year, back.month, back.day), (2024, 2, 29));
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(2_147_483_647).as_str(), "2038-01-19 03:14:07");
        assert_eq!(format_timestamp(0).as_str(), "1970-01-01 00:00:00");
    }
}
