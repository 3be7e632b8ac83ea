//! ISO 8601 durations as used by HAPI `cadence` and chunk sizes.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::HapiError;

/// A parsed `PnYnMnDTnHnMnS` duration.
///
/// Calendar components (years, months) are kept separate from the fixed
/// ones so that chunk arithmetic can step whole months.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IsoDuration {
    pub years: u32,
    pub months: u32,
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: f64,
}

impl IsoDuration {
    /// Approximate fixed length, with months as 30 days and years as 365 days.
    pub fn approx(&self) -> Duration {
        let days = i64::from(self.years) * 365 + i64::from(self.months) * 30 + i64::from(self.days);
        let whole = days * 86_400 + i64::from(self.hours) * 3_600 + i64::from(self.minutes) * 60;
        Duration::seconds(whole) + Duration::nanoseconds((self.seconds * 1e9).round() as i64)
    }

    pub fn is_zero(&self) -> bool {
        self.approx() == Duration::zero()
    }
}

impl FromStr for IsoDuration {
    type Err = HapiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || HapiError::Metadata(format!("'{}' is not an ISO 8601 duration", s));

        let rest = s.trim().strip_prefix('P').ok_or_else(invalid)?;
        if rest.is_empty() {
            return Err(invalid());
        }

        let mut duration = IsoDuration::default();
        let mut in_time = false;
        let mut number = String::new();
        let mut seen_component = false;

        for c in rest.chars() {
            match c {
                'T' if !in_time => {
                    if !number.is_empty() {
                        return Err(invalid());
                    }
                    in_time = true;
                }
                '0'..='9' | '.' => number.push(c),
                unit => {
                    if number.is_empty() {
                        return Err(invalid());
                    }
                    if unit != 'S' && number.contains('.') {
                        return Err(invalid());
                    }
                    match (in_time, unit) {
                        (false, 'Y') => duration.years = number.parse().map_err(|_| invalid())?,
                        (false, 'M') => duration.months = number.parse().map_err(|_| invalid())?,
                        (false, 'W') => {
                            let weeks: u32 = number.parse().map_err(|_| invalid())?;
                            duration.days += weeks * 7;
                        }
                        (false, 'D') => duration.days += number.parse::<u32>().map_err(|_| invalid())?,
                        (true, 'H') => duration.hours = number.parse().map_err(|_| invalid())?,
                        (true, 'M') => duration.minutes = number.parse().map_err(|_| invalid())?,
                        (true, 'S') => duration.seconds = number.parse().map_err(|_| invalid())?,
                        _ => return Err(invalid()),
                    }
                    number.clear();
                    seen_component = true;
                }
            }
        }

        if !number.is_empty() || !seen_component {
            return Err(invalid());
        }
        Ok(duration)
    }
}

impl fmt::Display for IsoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P")?;
        if self.years > 0 {
            write!(f, "{}Y", self.years)?;
        }
        if self.months > 0 {
            write!(f, "{}M", self.months)?;
        }
        if self.days > 0 {
            write!(f, "{}D", self.days)?;
        }
        if self.hours > 0 || self.minutes > 0 || self.seconds > 0.0 {
            write!(f, "T")?;
            if self.hours > 0 {
                write!(f, "{}H", self.hours)?;
            }
            if self.minutes > 0 {
                write!(f, "{}M", self.minutes)?;
            }
            if self.seconds > 0.0 {
                write!(f, "{}S", self.seconds)?;
            }
        } else if self.years == 0 && self.months == 0 && self.days == 0 {
            write!(f, "T0S")?;
        }
        Ok(())
    }
}

impl Serialize for IsoDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IsoDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
