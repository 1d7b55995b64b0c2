//! Human-readable duration formatting and parsing utilities

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid duration format: {0}")]
    InvalidFormat(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),

    #[error("Invalid unit: {0}")]
    InvalidUnit(String),

    #[error("Negative duration: {0}")]
    Negative(i64),
}

/// Duration wrapper accepting `"500ms"`, `"2s"`, `"4m"`, `"1h"` or a bare
/// integer number of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct HumanDuration(pub Duration);

impl HumanDuration {
    pub const fn from_millis(ms: u64) -> Self {
        Self(Duration::from_millis(ms))
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn to_human_readable(&self) -> String {
        let ms = self.0.as_millis();
        const UNITS: &[(&str, u128)] = &[("h", 3_600_000), ("m", 60_000), ("s", 1_000)];

        for &(unit, divisor) in UNITS {
            if ms >= divisor && ms % divisor == 0 {
                return format!("{}{}", ms / divisor, unit);
            }
        }

        format!("{}ms", ms)
    }
}

impl From<HumanDuration> for Duration {
    fn from(value: HumanDuration) -> Self {
        value.0
    }
}

impl From<Duration> for HumanDuration {
    fn from(value: Duration) -> Self {
        Self(value)
    }
}

impl Serialize for HumanDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_human_readable())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct HumanDurationVisitor;

        impl<'de> serde::de::Visitor<'de> for HumanDurationVisitor {
            type Value = HumanDuration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a duration as string (e.g., \"500ms\", \"2s\", \"4m\") or integer seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(HumanDuration::from_secs(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(HumanDuration::from_secs)
                    .map_err(|_| serde::de::Error::custom(ParseError::Negative(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse::<HumanDuration>().map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_any(HumanDurationVisitor)
    }
}

impl FromStr for HumanDuration {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        if let Ok(num) = s.parse::<u64>() {
            return Ok(HumanDuration::from_secs(num));
        }

        let (num_str, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
            Some(0) | None => return Err(ParseError::InvalidFormat(s.to_string())),
            Some(pos) => (&s[..pos], &s[pos..]),
        };

        let num: u64 = num_str.parse()?;

        let duration = match unit.trim() {
            "ms" => Duration::from_millis(num),
            "s" | "sec" | "secs" => Duration::from_secs(num),
            "m" | "min" | "mins" => Duration::from_secs(num * 60),
            "h" | "hr" | "hrs" => Duration::from_secs(num * 3600),
            _ => return Err(ParseError::InvalidUnit(unit.to_string())),
        };

        Ok(HumanDuration(duration))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_human_readable())
    }
}

/// Format integer minor units as `units.cents`
pub fn format_minor(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!("500ms".parse::<HumanDuration>().unwrap().0, Duration::from_millis(500));
        assert_eq!("2s".parse::<HumanDuration>().unwrap().0, Duration::from_secs(2));
        assert_eq!("4m".parse::<HumanDuration>().unwrap().0, Duration::from_secs(240));
        assert_eq!("1h".parse::<HumanDuration>().unwrap().0, Duration::from_secs(3600));
        assert_eq!(" 10S ".parse::<HumanDuration>().unwrap().0, Duration::from_secs(10));
    }

    #[test]
    fn test_parse_bare_seconds() {
        assert_eq!("30".parse::<HumanDuration>().unwrap().0, Duration::from_secs(30));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<HumanDuration>().is_err());
        assert!("ms".parse::<HumanDuration>().is_err());
        assert!("10 fortnights".parse::<HumanDuration>().is_err());
    }

    #[test]
    fn test_to_human_readable() {
        assert_eq!(HumanDuration::from_millis(1500).to_human_readable(), "1500ms");
        assert_eq!(HumanDuration::from_secs(2).to_human_readable(), "2s");
        assert_eq!(HumanDuration::from_secs(240).to_human_readable(), "4m");
        assert_eq!(HumanDuration::from_secs(7200).to_human_readable(), "2h");
    }

    #[test]
    fn test_deserialize_string_and_number() {
        #[derive(Deserialize)]
        struct TestStruct {
            a: HumanDuration,
            b: HumanDuration,
        }
        let parsed: TestStruct = serde_json::from_str(r#"{"a": "250ms", "b": 3}"#).unwrap();
        assert_eq!(parsed.a.0, Duration::from_millis(250));
        assert_eq!(parsed.b.0, Duration::from_secs(3));
    }

    #[test]
    fn test_format_minor() {
        assert_eq!(format_minor(0), "0.00");
        assert_eq!(format_minor(900), "9.00");
        assert_eq!(format_minor(750), "7.50");
        assert_eq!(format_minor(5), "0.05");
        assert_eq!(format_minor(-120), "-1.20");
    }
}
