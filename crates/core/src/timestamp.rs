//! Media timestamps
//!
//! Canonical wire format is `MM:SS`; `HH:MM:SS` and bare second counts are
//! accepted on read and normalized on write. Minutes are unbounded, so a
//! 75-minute mark renders as `75:00`.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A point in media time, stored as seconds.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Timestamp(f64);

impl Timestamp {
    pub fn from_seconds(seconds: f64) -> Self {
        Self(seconds.max(0.0))
    }

    pub fn as_seconds(&self) -> f64 {
        self.0
    }

    /// Canonical `MM:SS` rendering. Fractional seconds are truncated.
    pub fn to_mmss(&self) -> String {
        let total = self.0 as u64;
        format!("{:02}:{:02}", total / 60, total % 60)
    }
}

/// Accepts `MM:SS`, `HH:MM:SS`, and bare seconds (`93` or `93.5`).
impl FromStr for Timestamp {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parts: Vec<&str> = s.split(':').collect();
        let parse_unit = |p: &str| -> Result<f64, crate::Error> {
            p.parse::<f64>()
                .map_err(|_| crate::Error::Io(format!("invalid timestamp component: {p:?}")))
        };
        let seconds = match parts.as_slice() {
            [secs] => parse_unit(secs)?,
            [mins, secs] => parse_unit(mins)? * 60.0 + parse_unit(secs)?,
            [hours, mins, secs] => {
                parse_unit(hours)? * 3600.0 + parse_unit(mins)? * 60.0 + parse_unit(secs)?
            }
            _ => return Err(crate::Error::Io(format!("invalid timestamp: {s:?}"))),
        };
        if seconds < 0.0 {
            return Err(crate::Error::Io(format!("negative timestamp: {s:?}")));
        }
        Ok(Self(seconds))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_mmss())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_mmss())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl de::Visitor<'_> for Visitor {
            type Value = Timestamp;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a timestamp string or a number of seconds")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Timestamp, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Timestamp, E> {
                Ok(Timestamp::from_seconds(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Timestamp, E> {
                Ok(Timestamp::from_seconds(v as f64))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Timestamp, E> {
                Ok(Timestamp::from_seconds(v as f64))
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mmss() {
        let ts: Timestamp = "12:34".parse().unwrap();
        assert_eq!(ts.as_seconds(), 754.0);
    }

    #[test]
    fn parses_hhmmss_and_normalizes_to_mmss() {
        let ts: Timestamp = "01:15:30".parse().unwrap();
        assert_eq!(ts.as_seconds(), 4530.0);
        assert_eq!(ts.to_mmss(), "75:30");
    }

    #[test]
    fn parses_bare_seconds() {
        let ts: Timestamp = "93.5".parse().unwrap();
        assert_eq!(ts.as_seconds(), 93.5);
        assert_eq!(ts.to_mmss(), "01:33");
    }

    #[test]
    fn rejects_garbage() {
        assert!("1:2:3:4".parse::<Timestamp>().is_err());
        assert!("abc".parse::<Timestamp>().is_err());
    }

    #[test]
    fn serde_round_trip_is_mmss() {
        let ts = Timestamp::from_seconds(125.0);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"02:05\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_seconds(), 125.0);
    }

    #[test]
    fn serde_accepts_numbers() {
        let ts: Timestamp = serde_json::from_str("12").unwrap();
        assert_eq!(ts.as_seconds(), 12.0);
    }
}
