//! Duration tolerance attached to an order.
//!
//! Durations travel as strings in the form `72h3m0.5s`: a sequence of decimal
//! numbers, each with an optional fraction and a unit suffix (`ns`, `us`/`µs`,
//! `ms`, `s`, `m`, `h`). Formatting always produces the canonical form, e.g.
//! `30m` parses and prints back as `30m0s`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SECOND: u128 = 1_000_000_000;
const NANOS_PER_MINUTE: u128 = 60 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: u128 = 60 * NANOS_PER_MINUTE;

/// Errors produced when parsing a [`TimeGap`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeGapError {
    /// Input was empty or whitespace.
    #[error("empty duration")]
    Empty,

    /// Input is not a sequence of `<number><unit>` groups.
    #[error("invalid duration '{0}'")]
    Invalid(String),

    /// A number was not followed by a unit.
    #[error("missing unit in duration '{0}'")]
    MissingUnit(String),

    /// Unit suffix is not recognised.
    #[error("unknown unit '{unit}' in duration '{input}'")]
    UnknownUnit {
        /// The offending suffix.
        unit: String,
        /// Full input.
        input: String,
    },

    /// Negative tolerances are meaningless.
    #[error("negative duration '{0}'")]
    Negative(String),

    /// Value does not fit in 64 bits of nanoseconds.
    #[error("duration '{0}' out of range")]
    Overflow(String),
}

/// Non-negative tolerance window around an order's scheduled date.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeGap(Duration);

impl TimeGap {
    /// Zero tolerance.
    pub const ZERO: Self = Self(Duration::ZERO);

    /// Wrap a [`Duration`].
    #[must_use]
    pub const fn new(duration: Duration) -> Self {
        Self(duration)
    }

    /// The wrapped duration.
    #[must_use]
    pub const fn as_duration(&self) -> Duration {
        self.0
    }

    /// Whole microseconds, saturating at `i64::MAX`.
    #[must_use]
    pub fn as_micros(&self) -> i64 {
        i64::try_from(self.0.as_micros()).unwrap_or(i64::MAX)
    }

    /// Build from microseconds as stored in an interval column.
    ///
    /// # Errors
    ///
    /// Returns [`TimeGapError::Negative`] for values below zero.
    pub fn from_micros(micros: i64) -> Result<Self, TimeGapError> {
        u64::try_from(micros)
            .map(|m| Self(Duration::from_micros(m)))
            .map_err(|_| TimeGapError::Negative(format!("{micros}us")))
    }

    /// Parse a duration string such as `30m`, `1h30m` or `1.5h`.
    ///
    /// # Errors
    ///
    /// Returns a [`TimeGapError`] describing the first problem found.
    pub fn parse(input: &str) -> Result<Self, TimeGapError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(TimeGapError::Empty);
        }

        let (negative, mut rest) = match trimmed.as_bytes()[0] {
            b'-' => (true, &trimmed[1..]),
            b'+' => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };

        if rest == "0" {
            return Ok(Self::ZERO);
        }
        if rest.is_empty() {
            return Err(TimeGapError::Invalid(input.to_string()));
        }

        let mut total: u128 = 0;
        while !rest.is_empty() {
            let int_len = rest.bytes().take_while(u8::is_ascii_digit).count();
            let (int_digits, after_int) = rest.split_at(int_len);

            let (frac_digits, after_number) = match after_int.strip_prefix('.') {
                Some(tail) => {
                    let frac_len = tail.bytes().take_while(u8::is_ascii_digit).count();
                    tail.split_at(frac_len)
                }
                None => ("", after_int),
            };

            if int_digits.is_empty() && frac_digits.is_empty() {
                return Err(TimeGapError::Invalid(input.to_string()));
            }

            let unit_len = after_number
                .char_indices()
                .find(|(_, c)| c.is_ascii_digit() || *c == '.')
                .map_or(after_number.len(), |(idx, _)| idx);
            let (unit, tail) = after_number.split_at(unit_len);
            if unit.is_empty() {
                return Err(TimeGapError::MissingUnit(input.to_string()));
            }

            let scale = unit_scale(unit).ok_or_else(|| TimeGapError::UnknownUnit {
                unit: unit.to_string(),
                input: input.to_string(),
            })?;

            let overflow = || TimeGapError::Overflow(input.to_string());
            let whole: u128 = if int_digits.is_empty() {
                0
            } else {
                int_digits.parse().map_err(|_| overflow())?
            };
            let mut part = whole.checked_mul(scale).ok_or_else(overflow)?;

            if !frac_digits.is_empty() {
                // Digits beyond nanosecond precision cannot change the result.
                let significant = &frac_digits[..frac_digits.len().min(18)];
                let numerator: u128 = significant.parse().map_err(|_| overflow())?;
                let digits = u32::try_from(significant.len()).map_err(|_| overflow())?;
                let denominator = 10u128.pow(digits);
                part = part
                    .checked_add(numerator * scale / denominator)
                    .ok_or_else(overflow)?;
            }

            total = total.checked_add(part).ok_or_else(overflow)?;
            rest = tail;
        }

        if negative && total > 0 {
            return Err(TimeGapError::Negative(input.to_string()));
        }

        let nanos = u64::try_from(total).map_err(|_| TimeGapError::Overflow(input.to_string()))?;
        Ok(Self(Duration::from_nanos(nanos)))
    }
}

fn unit_scale(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(NANOS_PER_MICRO),
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SECOND),
        "m" => Some(NANOS_PER_MINUTE),
        "h" => Some(NANOS_PER_HOUR),
        _ => None,
    }
}

/// Write `value / scale` as a decimal with trailing fractional zeros removed.
fn write_fraction(out: &mut String, value: u128, scale: u128) -> fmt::Result {
    let whole = value / scale;
    let frac = value % scale;
    if frac == 0 {
        return write!(out, "{whole}");
    }
    let width = scale.ilog10() as usize;
    let digits = format!("{frac:0width$}");
    write!(out, "{whole}.{}", digits.trim_end_matches('0'))
}

impl fmt::Display for TimeGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.0.as_nanos();
        if nanos == 0 {
            return f.write_str("0s");
        }

        let mut out = String::new();
        if nanos < NANOS_PER_SECOND {
            let (unit, scale) = if nanos < NANOS_PER_MICRO {
                ("ns", 1)
            } else if nanos < NANOS_PER_MILLI {
                ("µs", NANOS_PER_MICRO)
            } else {
                ("ms", NANOS_PER_MILLI)
            };
            write_fraction(&mut out, nanos, scale)?;
            out.push_str(unit);
            return f.write_str(&out);
        }

        let hours = nanos / NANOS_PER_HOUR;
        let minutes = (nanos % NANOS_PER_HOUR) / NANOS_PER_MINUTE;
        let seconds = nanos % NANOS_PER_MINUTE;
        if hours > 0 {
            write!(out, "{hours}h")?;
        }
        if hours > 0 || minutes > 0 {
            write!(out, "{minutes}m")?;
        }
        write_fraction(&mut out, seconds, NANOS_PER_SECOND)?;
        out.push('s');
        f.write_str(&out)
    }
}

impl FromStr for TimeGap {
    type Err = TimeGapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Duration> for TimeGap {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

impl Serialize for TimeGap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeGap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn gap(s: &str) -> Duration {
        TimeGap::parse(s).unwrap().as_duration()
    }

    #[test]
    fn parses_single_units() {
        assert_eq!(gap("30m"), Duration::from_secs(1800));
        assert_eq!(gap("90s"), Duration::from_secs(90));
        assert_eq!(gap("250ms"), Duration::from_millis(250));
        assert_eq!(gap("15us"), Duration::from_micros(15));
        assert_eq!(gap("15µs"), Duration::from_micros(15));
        assert_eq!(gap("7ns"), Duration::from_nanos(7));
    }

    #[test]
    fn parses_compound_and_fractional() {
        assert_eq!(gap("1h30m"), Duration::from_secs(5400));
        assert_eq!(gap("1.5h"), Duration::from_secs(5400));
        assert_eq!(gap(".5s"), Duration::from_millis(500));
        assert_eq!(gap("2h45m30.25s"), Duration::from_millis(9_930_250));
    }

    #[test]
    fn parses_zero_and_signs() {
        assert_eq!(gap("0"), Duration::ZERO);
        assert_eq!(gap("-0"), Duration::ZERO);
        assert_eq!(gap("+5m"), Duration::from_secs(300));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(TimeGap::parse(""), Err(TimeGapError::Empty));
        assert!(matches!(TimeGap::parse("30"), Err(TimeGapError::MissingUnit(_))));
        assert!(matches!(
            TimeGap::parse("3d"),
            Err(TimeGapError::UnknownUnit { .. })
        ));
        assert!(matches!(TimeGap::parse("-5m"), Err(TimeGapError::Negative(_))));
        assert!(matches!(TimeGap::parse("m"), Err(TimeGapError::Invalid(_))));
        assert!(matches!(TimeGap::parse("."), Err(TimeGapError::Invalid(_))));
    }

    #[test]
    fn formats_canonically() {
        assert_eq!(TimeGap::parse("30m").unwrap().to_string(), "30m0s");
        assert_eq!(TimeGap::parse("1h").unwrap().to_string(), "1h0m0s");
        assert_eq!(TimeGap::parse("1h30m").unwrap().to_string(), "1h30m0s");
        assert_eq!(TimeGap::parse("1.5s").unwrap().to_string(), "1.5s");
        assert_eq!(TimeGap::parse("250ms").unwrap().to_string(), "250ms");
        assert_eq!(TimeGap::parse("1500us").unwrap().to_string(), "1.5ms");
        assert_eq!(TimeGap::ZERO.to_string(), "0s");
    }

    #[test]
    fn micros_conversion_rejects_negative() {
        assert_eq!(
            TimeGap::from_micros(1_800_000_000).unwrap(),
            TimeGap::parse("30m").unwrap()
        );
        assert!(TimeGap::from_micros(-1).is_err());
    }

    proptest! {
        #[test]
        fn display_output_parses_back(nanos in 0u64..=u64::MAX / 2) {
            let original = TimeGap::new(Duration::from_nanos(nanos));
            let reparsed = TimeGap::parse(&original.to_string()).unwrap();
            prop_assert_eq!(reparsed, original);
        }

        #[test]
        fn parse_never_panics(input in "\\PC{0,16}") {
            let _ = TimeGap::parse(&input);
        }
    }
}
