//! Calendar arithmetic on Unix timestamps.
//!
//! The RTC hands out Unix seconds; everything the incubation timeline needs
//! (current day, expected hatch time, a human-readable breakdown for the
//! status payload) is derived here without touching hardware.

use serde::Serialize;

pub const SECS_PER_DAY: u32 = 86_400;

/// Incubation day for a run started at `start`, counting the first day as 1.
///
/// Returns 0 when no run is active (`start == 0`) or when the clock reads
/// earlier than the start (RTC reset behind the run).
pub fn incubation_day(start: u32, now: u32) -> u32 {
    if start == 0 || start > now {
        return 0;
    }
    (now - start) / SECS_PER_DAY + 1
}

/// Expected end of a run of `days` days, or 0 for an inactive run.
pub fn end_time(start: u32, days: u16) -> u32 {
    if start == 0 || days == 0 {
        return 0;
    }
    start.saturating_add(u32::from(days) * SECS_PER_DAY)
}

/// Broken-down UTC calendar time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeInfo {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub timestamp: u32,
}

impl TimeInfo {
    pub fn from_unix(ts: u32) -> Self {
        let days = (ts / SECS_PER_DAY) as i64;
        let rem = ts % SECS_PER_DAY;
        let (year, month, day) = civil_from_days(days);
        Self {
            year: year as u16,
            month,
            day,
            hour: (rem / 3600) as u8,
            minute: (rem % 3600 / 60) as u8,
            second: (rem % 60) as u8,
            timestamp: ts,
        }
    }

    /// Inverse of [`from_unix`](Self::from_unix).  `None` for dates before
    /// 1970 or fields out of range.
    pub fn to_unix(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) -> Option<u32> {
        if !(1..=12).contains(&month)
            || day == 0
            || day > days_in_month(year, month)
            || hour > 23
            || minute > 59
            || second > 59
        {
            return None;
        }
        let days = days_from_civil(i64::from(year), month, day);
        if days < 0 {
            return None;
        }
        let secs = days * i64::from(SECS_PER_DAY)
            + i64::from(hour) * 3600
            + i64::from(minute) * 60
            + i64::from(second);
        u32::try_from(secs).ok()
    }
}

pub fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

// Howard Hinnant's days-from-civil / civil-from-days algorithms.

fn days_from_civil(year: i64, month: u8, day: u8) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let m = i64::from(month);
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(days: i64) -> (i64, u8, u8) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
