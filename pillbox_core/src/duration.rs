//! Whole-second durations used by schedules.
//!
//! Durations serialize as compact strings such as `"24h"`, `"12h30m"` or
//! `"45s"`. Deserialization also accepts a bare integer number of seconds.

use crate::{Error, Result};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// A signed span of time counted in whole seconds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration(i64);

impl Duration {
    pub const ZERO: Duration = Duration(0);

    pub const fn seconds(secs: i64) -> Self {
        Duration(secs)
    }

    pub const fn minutes(mins: i64) -> Self {
        Duration(mins * MINUTE)
    }

    pub const fn hours(hours: i64) -> Self {
        Duration(hours * HOUR)
    }

    pub const fn days(days: i64) -> Self {
        Duration(days * DAY)
    }

    pub const fn as_secs(&self) -> i64 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Convert to a chrono duration for timestamp arithmetic
    pub fn to_chrono(self) -> chrono::Duration {
        // Saturates outside chrono's range; date arithmetic then overflows
        chrono::Duration::try_seconds(self.0).unwrap_or(if self.0 < 0 {
            chrono::Duration::MIN
        } else {
            chrono::Duration::MAX
        })
    }

    /// Multiply by a pass/refill counter, failing on overflow
    pub fn checked_mul(self, factor: i64) -> Option<Duration> {
        self.0.checked_mul(factor).map(Duration)
    }
}

impl From<chrono::Duration> for Duration {
    fn from(d: chrono::Duration) -> Self {
        Duration(d.num_seconds())
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("0s");
        }
        if self.0 < 0 {
            f.write_str("-")?;
        }

        let mut rest = self.0.unsigned_abs();
        let hours = rest / HOUR as u64;
        rest %= HOUR as u64;
        let minutes = rest / MINUTE as u64;
        let seconds = rest % MINUTE as u64;

        if hours > 0 {
            write!(f, "{}h", hours)?;
        }
        if minutes > 0 {
            write!(f, "{}m", minutes)?;
        }
        if seconds > 0 {
            write!(f, "{}s", seconds)?;
        }
        Ok(())
    }
}

impl FromStr for Duration {
    type Err = Error;

    /// Parse `[-]<n><unit>...` where unit is one of `d`, `h`, `m`, `s`
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        if body.is_empty() {
            return Err(Error::Validation(format!("Empty duration: {:?}", s)));
        }
        // At most one leading sign
        if !body.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(Error::Validation(format!("Malformed duration: {:?}", s)));
        }
        // Plain integers are seconds
        if let Ok(secs) = body.parse::<i64>() {
            return Ok(Duration(if negative { -secs } else { secs }));
        }

        let mut total: i64 = 0;
        let mut digits = String::new();
        for ch in body.chars() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                continue;
            }

            let unit = match ch {
                'd' => DAY,
                'h' => HOUR,
                'm' => MINUTE,
                's' => 1,
                _ => {
                    return Err(Error::Validation(format!(
                        "Unknown duration unit {:?} in {:?}",
                        ch, s
                    )))
                }
            };
            let value: i64 = digits
                .parse()
                .map_err(|_| Error::Validation(format!("Missing number before {:?} in {:?}", ch, s)))?;
            total = value
                .checked_mul(unit)
                .and_then(|v| total.checked_add(v))
                .ok_or_else(|| Error::Validation(format!("Duration overflow: {:?}", s)))?;
            digits.clear();
        }

        if !digits.is_empty() {
            return Err(Error::Validation(format!(
                "Trailing number without unit in {:?}",
                s
            )));
        }

        Ok(Duration(if negative { -total } else { total }))
    }
}

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct DurationVisitor;

impl<'de> Visitor<'de> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a duration string like \"12h\" or an integer number of seconds")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Duration, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Duration, E> {
        Ok(Duration(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Duration, E> {
        i64::try_from(v)
            .map(Duration)
            .map_err(|_| E::custom("duration out of range"))
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(DurationVisitor)
    }
}
