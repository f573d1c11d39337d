//! Duration-string parsing for CLI and configuration values.
//!
//! Run durations and intervals are written either as bare seconds
//! (`"3600"`) or with hour/minute/second suffixes (`"1h"`, `"30m"`,
//! `"1h30m"`, `"2.5h"`). A trailing number without a unit counts as
//! seconds.

use std::time::Duration;
use thiserror::Error;

/// Errors produced while parsing a duration string.
#[derive(Error, Debug, PartialEq)]
pub enum DurationError {
    #[error("empty duration string")]
    Empty,

    #[error("unit '{unit}' without a preceding number in '{input}'")]
    DanglingUnit { unit: char, input: String },

    #[error("invalid character '{ch}' in duration '{input}'")]
    InvalidChar { ch: char, input: String },

    #[error("invalid number '{num}' in duration '{input}'")]
    InvalidNumber { num: String, input: String },

    #[error("duration '{input}' is not a finite non-negative number of seconds")]
    OutOfRange { input: String },
}

/// Parse a duration string into seconds.
pub fn parse_duration_secs(input: &str) -> Result<f64, DurationError> {
    let trimmed = input.trim().to_lowercase();
    if trimmed.is_empty() {
        return Err(DurationError::Empty);
    }

    // Bare numeric input is interpreted as seconds. parse::<f64> also
    // accepts "-5", "inf", and "nan", none of which are durations.
    if let Ok(secs) = trimmed.parse::<f64>() {
        if !secs.is_finite() || secs < 0.0 {
            return Err(DurationError::OutOfRange { input: trimmed });
        }
        return Ok(secs);
    }

    let mut total = 0.0;
    let mut num = String::new();

    for ch in trimmed.chars() {
        match ch {
            '0'..='9' | '.' => num.push(ch),
            'h' | 'm' | 's' => {
                if num.is_empty() {
                    return Err(DurationError::DanglingUnit {
                        unit: ch,
                        input: trimmed.clone(),
                    });
                }
                let value = num.parse::<f64>().map_err(|_| DurationError::InvalidNumber {
                    num: num.clone(),
                    input: trimmed.clone(),
                })?;
                total += match ch {
                    'h' => value * 3600.0,
                    'm' => value * 60.0,
                    _ => value,
                };
                num.clear();
            }
            _ => {
                return Err(DurationError::InvalidChar {
                    ch,
                    input: trimmed.clone(),
                })
            }
        }
    }

    // Trailing number without a unit is seconds.
    if !num.is_empty() {
        let value = num.parse::<f64>().map_err(|_| DurationError::InvalidNumber {
            num: num.clone(),
            input: trimmed.clone(),
        })?;
        total += value;
    }

    if !total.is_finite() {
        return Err(DurationError::OutOfRange { input: trimmed });
    }
    Ok(total)
}

/// Parse a duration string into a [`Duration`].
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    parse_duration_secs(input).map(Duration::from_secs_f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_seconds() {
        assert_eq!(parse_duration_secs("3600").unwrap(), 3600.0);
        assert_eq!(parse_duration_secs("0.5").unwrap(), 0.5);
    }

    #[test]
    fn test_suffixed_units() {
        assert_eq!(parse_duration_secs("1h").unwrap(), 3600.0);
        assert_eq!(parse_duration_secs("30m").unwrap(), 1800.0);
        assert_eq!(parse_duration_secs("45s").unwrap(), 45.0);
        assert_eq!(parse_duration_secs("1h30m").unwrap(), 5400.0);
        assert_eq!(parse_duration_secs("2.5h").unwrap(), 9000.0);
    }

    #[test]
    fn test_trailing_number_is_seconds() {
        assert_eq!(parse_duration_secs("1m30").unwrap(), 90.0);
    }

    #[test]
    fn test_whitespace_and_case() {
        assert_eq!(parse_duration_secs("  1H ").unwrap(), 3600.0);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(parse_duration_secs(""), Err(DurationError::Empty));
        assert_eq!(parse_duration_secs("   "), Err(DurationError::Empty));
    }

    #[test]
    fn test_dangling_unit() {
        assert!(matches!(
            parse_duration_secs("h"),
            Err(DurationError::DanglingUnit { unit: 'h', .. })
        ));
        assert!(matches!(
            parse_duration_secs("1hm"),
            Err(DurationError::DanglingUnit { unit: 'm', .. })
        ));
    }

    #[test]
    fn test_invalid_character() {
        assert!(matches!(
            parse_duration_secs("1x"),
            Err(DurationError::InvalidChar { ch: 'x', .. })
        ));
    }

    #[test]
    fn test_parse_to_std_duration() {
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn test_negative_and_non_finite_rejected() {
        // Duration::from_secs_f64 panics on these, so they must never
        // get past parsing.
        for input in ["-5", "-0.5", "inf", "-inf", "nan"] {
            assert!(
                matches!(
                    parse_duration_secs(input),
                    Err(DurationError::OutOfRange { .. })
                ),
                "input {input:?} should be rejected"
            );
            assert!(parse_duration(input).is_err());
        }
    }
}
