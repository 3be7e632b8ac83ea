//! HAPI time handling.
//!
//! HAPI servers emit a restricted subset of ISO 8601: `YYYY[-MM[-DD]]` or
//! `YYYY-DOY`, optionally followed by `THH[:MM[:SS[.f...]]]` and a trailing
//! `Z`. Different servers (and different datasets on one server) pick
//! different precisions, so comparisons between a record timestamp and a
//! requested boundary are done by first re-rendering the boundary in the
//! record's own format. Once both share a format, byte order is time order.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HapiError, HapiResult};

/// Date layout of a HAPI timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Calendar {
    /// `YYYY`
    Year,
    /// `YYYY-MM`
    YearMonth,
    /// `YYYY-MM-DD`
    YearMonthDay,
    /// `YYYY-DOY`
    YearDayOfYear,
}

/// Finest time-of-day component present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Precision {
    Date,
    Hour,
    Minute,
    Second,
}

/// Format of a HAPI timestamp, inferred from a sample string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeFormat {
    pub calendar: Calendar,
    pub precision: Precision,
    /// Number of digits after the decimal point (0 if none).
    pub fraction_digits: usize,
    /// Seconds followed by a bare `.` with no digits.
    pub trailing_dot: bool,
    /// Trailing `Z` zone marker.
    pub zone: bool,
}

/// A timestamp split into its format and value.
struct Scanned {
    format: TimeFormat,
    datetime: NaiveDateTime,
}

impl TimeFormat {
    /// Infer the format of a single HAPI timestamp.
    pub fn infer(sample: &str) -> HapiResult<Self> {
        Ok(scan(sample)?.format)
    }

    /// Strftime-style rendering of the format, e.g. `%Y-%m-%dT%H:%M:%S.%fZ`.
    pub fn pattern(&self) -> String {
        let mut fmt = String::from("%Y");
        match self.calendar {
            Calendar::Year => {}
            Calendar::YearMonth => fmt.push_str("-%m"),
            Calendar::YearMonthDay => fmt.push_str("-%m-%d"),
            Calendar::YearDayOfYear => fmt.push_str("-%j"),
        }
        if self.precision >= Precision::Hour {
            fmt.push_str("T%H");
        }
        if self.precision >= Precision::Minute {
            fmt.push_str(":%M");
        }
        if self.precision >= Precision::Second {
            fmt.push_str(":%S");
        }
        if self.fraction_digits > 0 {
            fmt.push_str(".%f");
        } else if self.trailing_dot {
            fmt.push('.');
        }
        if self.zone {
            fmt.push('Z');
        }
        fmt
    }

    /// Whether chrono's RFC 3339 parser accepts strings of this format.
    pub fn is_rfc3339(&self) -> bool {
        self.calendar == Calendar::YearMonthDay
            && self.precision == Precision::Second
            && self.zone
            && !self.trailing_dot
    }

    /// Render a naive UTC datetime in this format.
    ///
    /// Components finer than the format are truncated; fractional seconds
    /// are truncated or zero-padded to `fraction_digits`.
    pub fn render(&self, dt: &NaiveDateTime) -> String {
        let mut out = String::with_capacity(32);
        out.push_str(&format!("{:04}", dt.year()));
        match self.calendar {
            Calendar::Year => {}
            Calendar::YearMonth => {
                out.push_str(&format!("-{:02}", dt.month()));
            }
            Calendar::YearMonthDay => {
                out.push_str(&format!("-{:02}-{:02}", dt.month(), dt.day()));
            }
            Calendar::YearDayOfYear => {
                out.push_str(&format!("-{:03}", dt.ordinal()));
            }
        }
        if self.precision >= Precision::Hour {
            out.push_str(&format!("T{:02}", dt.hour()));
        }
        if self.precision >= Precision::Minute {
            out.push_str(&format!(":{:02}", dt.minute()));
        }
        if self.precision >= Precision::Second {
            out.push_str(&format!(":{:02}", dt.second()));
        }
        if self.fraction_digits > 0 {
            let nanos = format!("{:09}", dt.nanosecond() % 1_000_000_000);
            out.push('.');
            if self.fraction_digits <= 9 {
                out.push_str(&nanos[..self.fraction_digits]);
            } else {
                out.push_str(&nanos);
                out.extend(std::iter::repeat('0').take(self.fraction_digits - 9));
            }
        } else if self.trailing_dot {
            out.push('.');
        }
        if self.zone {
            out.push('Z');
        }
        out
    }
}

fn digits(b: &[u8], from: usize, to: usize) -> Option<u32> {
    let part = b.get(from..to)?;
    if part.is_empty() || !part.iter().all(u8::is_ascii_digit) {
        return None;
    }
    Some(part.iter().fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0')))
}

fn scan(s: &str) -> HapiResult<Scanned> {
    let invalid = || HapiError::InvalidTime(format!("'{}' is not a valid HAPI time", s));

    let (body, zone) = match s.strip_suffix('Z') {
        Some(body) => (body, true),
        None => (s, false),
    };
    let b = body.as_bytes();

    let year = digits(b, 0, 4).ok_or_else(invalid)? as i32;

    let (calendar, date, mut pos) = if b.len() == 4 {
        (Calendar::Year, NaiveDate::from_ymd_opt(year, 1, 1), 4)
    } else if b[4] != b'-' {
        return Err(invalid());
    } else if let Some(doy) = digits(b, 5, 8).filter(|_| b.len() == 8 || b[8] == b'T') {
        (Calendar::YearDayOfYear, NaiveDate::from_yo_opt(year, doy), 8)
    } else if let Some(month) = digits(b, 5, 7) {
        if b.len() == 7 {
            (Calendar::YearMonth, NaiveDate::from_ymd_opt(year, month, 1), 7)
        } else if b[7] == b'-' {
            let day = digits(b, 8, 10).ok_or_else(invalid)?;
            (Calendar::YearMonthDay, NaiveDate::from_ymd_opt(year, month, day), 10)
        } else {
            return Err(invalid());
        }
    } else {
        return Err(invalid());
    };
    let date = date.ok_or_else(invalid)?;

    let mut precision = Precision::Date;
    let mut hms = [0u32; 3];
    let mut nanos = 0u32;
    let mut fraction_digits = 0;
    let mut trailing_dot = false;

    if pos < b.len() {
        let full_date = matches!(calendar, Calendar::YearMonthDay | Calendar::YearDayOfYear);
        if b[pos] != b'T' || !full_date {
            return Err(invalid());
        }
        let levels = [Precision::Hour, Precision::Minute, Precision::Second];
        for (i, level) in levels.into_iter().enumerate() {
            if pos == b.len() {
                break;
            }
            let sep = if i == 0 { b'T' } else { b':' };
            if b[pos] != sep {
                return Err(invalid());
            }
            hms[i] = digits(b, pos + 1, pos + 3).ok_or_else(invalid)?;
            precision = level;
            pos += 3;
        }
        if pos < b.len() {
            if precision != Precision::Second || b[pos] != b'.' {
                return Err(invalid());
            }
            let frac = &b[pos + 1..];
            if !frac.iter().all(u8::is_ascii_digit) {
                return Err(invalid());
            }
            if frac.is_empty() {
                trailing_dot = true;
            } else {
                fraction_digits = frac.len();
                nanos = frac
                    .iter()
                    .chain(std::iter::repeat(&b'0'))
                    .take(9)
                    .fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0'));
            }
        }
    }

    let time = NaiveTime::from_hms_nano_opt(hms[0], hms[1], hms[2], nanos).ok_or_else(invalid)?;

    Ok(Scanned {
        format: TimeFormat {
            calendar,
            precision,
            fraction_digits,
            trailing_dot,
            zone,
        },
        datetime: date.and_time(time),
    })
}

/// Infer the strftime-style format of a HAPI timestamp.
pub fn format_string(sample: &str) -> HapiResult<String> {
    Ok(TimeFormat::infer(sample)?.pattern())
}

/// Re-render `given` in the format of `form_to_match`.
///
/// The result has the same calendar, precision and fractional width as
/// `form_to_match`, so byte comparison against strings of that format is
/// chronological comparison.
pub fn reformat(form_to_match: &str, given: &str) -> HapiResult<String> {
    let target = TimeFormat::infer(form_to_match)?;
    let given = scan(given)?;

    let mut out = target.render(&given.datetime);
    if out.len() > form_to_match.len() {
        let keep = form_to_match.len() - usize::from(target.zone);
        out.truncate(keep);
        if target.zone {
            out.push('Z');
        }
    }
    Ok(out)
}

/// Render a UTC datetime in the given format.
pub fn format_time(dt: &DateTime<Utc>, format: &TimeFormat) -> String {
    format.render(&dt.naive_utc())
}

/// Strip NUL/space padding after a time value.
fn trim_padding(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|&c| c != 0 && c != b' ')
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

fn as_time_str(bytes: &[u8]) -> HapiResult<&str> {
    std::str::from_utf8(trim_padding(bytes))
        .map_err(|e| HapiError::InvalidTime(format!("time value is not UTF-8: {}", e)))
}

/// Parse HAPI timestamps (text or raw bytes) into UTC datetimes.
///
/// The format is inferred from the first element. Unless
/// `allow_missing_z` is set, the first element must end in `Z`. Full
/// calendar timestamps go through chrono's RFC 3339 parser; anything else
/// (day-of-year, truncated precision) is parsed component-wise.
pub fn parse_times<S: AsRef<[u8]>>(
    times: &[S],
    allow_missing_z: bool,
) -> HapiResult<Vec<DateTime<Utc>>> {
    let Some(first) = times.first() else {
        return Ok(Vec::new());
    };
    let first = as_time_str(first.as_ref())?;
    if !allow_missing_z && !first.ends_with('Z') {
        return Err(HapiError::InvalidTime(format!(
            "'{}' lacks a trailing Z",
            first
        )));
    }

    let format = TimeFormat::infer(first)?;
    if format.is_rfc3339() {
        let bulk: Option<Vec<DateTime<Utc>>> = times
            .iter()
            .map(|t| {
                as_time_str(t.as_ref())
                    .ok()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc))
            })
            .collect();
        if let Some(parsed) = bulk {
            return Ok(parsed);
        }
        debug!(format = %format.pattern(), "Bulk time parse failed, parsing per element");
    }

    times
        .iter()
        .map(|t| {
            let s = as_time_str(t.as_ref())?;
            Ok(Utc.from_utc_datetime(&scan(s)?.datetime))
        })
        .collect()
}

/// Parse a single HAPI timestamp; a missing `Z` is tolerated.
pub fn parse_time(s: &str) -> HapiResult<DateTime<Utc>> {
    Ok(Utc.from_utc_datetime(&scan(s.trim())?.datetime))
}
