//! Time unit parsing and normalization.
//!
//! Limits express their window as a time unit, which may arrive as a
//! canonical name ("minute"), an alias ("mins"), or a plain number of
//! seconds. This module normalizes all of those to an integer-seconds
//! value with a canonical display name.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{FloodgateError, Result};

/// Recognized units with their canonical name first, aliases after.
const UNITS: &[(u64, &[&str])] = &[
    (1, &["second", "seconds", "secs", "sec", "s"]),
    (60, &["minute", "minutes", "mins", "min", "m"]),
    (3600, &["hour", "hours", "hrs", "hr", "h"]),
    (86400, &["day", "days", "d"]),
];

/// A positive number of seconds with a canonical display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeUnit(u64);

impl TimeUnit {
    /// Create a unit from an integer number of seconds.
    ///
    /// Non-positive values are rejected.
    pub fn from_seconds(seconds: i64) -> Result<Self> {
        if seconds <= 0 {
            return Err(FloodgateError::Validation {
                field: "unit",
                reason: format!("unit value must be > 0, got {}", seconds),
            });
        }
        Ok(TimeUnit(seconds as u64))
    }

    /// Parse a unit designator.
    ///
    /// Numeric strings always take priority over name lookup; other
    /// strings are matched case-insensitively against the alias table.
    pub fn parse(name: &str) -> Result<Self> {
        if let Ok(seconds) = name.parse::<i64>() {
            return Self::from_seconds(seconds);
        }

        let lower = name.to_lowercase();
        for (seconds, names) in UNITS {
            if names.contains(&lower.as_str()) {
                return Ok(TimeUnit(*seconds));
            }
        }

        Err(FloodgateError::UnknownUnit(name.to_string()))
    }

    /// The unit's value as an integer number of seconds.
    pub fn seconds(&self) -> u64 {
        self.0
    }

    /// The canonical name of this unit.
    ///
    /// Unknown-but-numeric values display as their decimal string.
    pub fn name(&self) -> String {
        for (seconds, names) in UNITS {
            if *seconds == self.0 {
                return names[0].to_string();
            }
        }
        self.0.to_string()
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for TimeUnit {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

impl<'de> Deserialize<'de> for TimeUnit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Seconds(i64),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Seconds(n) => TimeUnit::from_seconds(n),
            Repr::Name(s) => TimeUnit::parse(&s),
        }
        .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_aliases() {
        for name in ["second", "seconds", "secs", "sec", "s", "1"] {
            let unit = TimeUnit::parse(name).unwrap();
            assert_eq!(unit.seconds(), 1);
            assert_eq!(unit.to_string(), "second");
        }
    }

    #[test]
    fn test_minute_aliases() {
        for name in ["minute", "minutes", "mins", "min", "m", "60"] {
            let unit = TimeUnit::parse(name).unwrap();
            assert_eq!(unit.seconds(), 60);
            assert_eq!(unit.to_string(), "minute");
        }
    }

    #[test]
    fn test_hour_aliases() {
        for name in ["hour", "hours", "hrs", "hr", "h", "3600"] {
            let unit = TimeUnit::parse(name).unwrap();
            assert_eq!(unit.seconds(), 3600);
            assert_eq!(unit.to_string(), "hour");
        }
    }

    #[test]
    fn test_day_aliases() {
        for name in ["day", "days", "d", "86400"] {
            let unit = TimeUnit::parse(name).unwrap();
            assert_eq!(unit.seconds(), 86400);
            assert_eq!(unit.to_string(), "day");
        }
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(TimeUnit::parse("MINUTE").unwrap().seconds(), 60);
        assert_eq!(TimeUnit::parse("Hrs").unwrap().seconds(), 3600);
    }

    #[test]
    fn test_unknown_numeric_value() {
        let unit = TimeUnit::parse("31337").unwrap();
        assert_eq!(unit.seconds(), 31337);
        assert_eq!(unit.to_string(), "31337");

        let unit = TimeUnit::from_seconds(31337).unwrap();
        assert_eq!(unit.to_string(), "31337");
    }

    #[test]
    fn test_non_positive_rejected() {
        assert!(matches!(
            TimeUnit::from_seconds(-31337),
            Err(FloodgateError::Validation { field: "unit", .. })
        ));
        assert!(matches!(
            TimeUnit::from_seconds(0),
            Err(FloodgateError::Validation { field: "unit", .. })
        ));
        assert!(matches!(
            TimeUnit::parse("-31337"),
            Err(FloodgateError::Validation { field: "unit", .. })
        ));
    }

    #[test]
    fn test_unknown_name_rejected() {
        assert!(matches!(
            TimeUnit::parse("nosuchunit"),
            Err(FloodgateError::UnknownUnit(_))
        ));
    }

    #[test]
    fn test_round_trip_through_name() {
        for (_, names) in UNITS {
            for name in *names {
                let parsed = TimeUnit::parse(name).unwrap();
                let reparsed = TimeUnit::parse(&parsed.name()).unwrap();
                assert_eq!(parsed, reparsed);
            }
        }
    }

    #[test]
    fn test_serde_round_trip() {
        let unit = TimeUnit::parse("hour").unwrap();
        let json = serde_json::to_string(&unit).unwrap();
        assert_eq!(json, "\"hour\"");
        let back: TimeUnit = serde_json::from_str(&json).unwrap();
        assert_eq!(back, unit);

        let from_int: TimeUnit = serde_json::from_str("60").unwrap();
        assert_eq!(from_int.seconds(), 60);
    }
}
