//! Timestamp parsing and display-zone normalization.
//!
//! Emitters are not required to send zone information; a naive timestamp is
//! read as UTC. All comparison and rendering happens in one fixed display
//! zone, and normalizing an already-normalized value is a no-op.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Parse an ISO-8601 timestamp, treating values without an offset as UTC.
pub fn parse_lenient(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let raw = raw.trim();
    match DateTime::parse_from_rfc3339(raw) {
        Ok(aware) => Ok(aware.with_timezone(&Utc)),
        Err(rfc_err) => NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| Utc.from_utc_datetime(&naive))
            .ok_or(rfc_err),
    }
}

pub fn format_utc(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Fixed-offset zone used for ordering and rendering on the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayZone(FixedOffset);

impl DisplayZone {
    pub fn utc() -> Self {
        Self(Utc.fix())
    }

    pub fn offset(&self) -> FixedOffset {
        self.0
    }

    pub fn normalize<Tz: TimeZone>(&self, ts: &DateTime<Tz>) -> DateTime<FixedOffset> {
        ts.with_timezone(&self.0)
    }

    /// Re-express a textual timestamp in this zone.
    pub fn normalize_str(&self, raw: &str) -> Result<String, chrono::ParseError> {
        let parsed = parse_lenient(raw)?;
        Ok(self
            .normalize(&parsed)
            .to_rfc3339_opts(SecondsFormat::Micros, false))
    }
}

impl Default for DisplayZone {
    fn default() -> Self {
        Self::utc()
    }
}

impl FromStr for DisplayZone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("utc") || s == "Z" {
            return Ok(Self::utc());
        }

        let (sign, rest) = match s.as_bytes().first() {
            Some(b'+') => (1, &s[1..]),
            Some(b'-') => (-1, &s[1..]),
            _ => return Err(format!("display timezone must be UTC or ±HH:MM, got '{}'", s)),
        };
        let (hours, minutes) = rest
            .split_once(':')
            .ok_or_else(|| format!("display timezone must be ±HH:MM, got '{}'", s))?;
        let hours: i32 = hours
            .parse()
            .map_err(|_| format!("invalid hour offset in '{}'", s))?;
        let minutes: i32 = minutes
            .parse()
            .map_err(|_| format!("invalid minute offset in '{}'", s))?;
        if minutes >= 60 {
            return Err(format!("invalid minute offset in '{}'", s));
        }

        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .map(Self)
            .ok_or_else(|| format!("display timezone '{}' out of range", s))
    }
}

impl fmt::Display for DisplayZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for DisplayZone {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DisplayZone {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional envelope timestamps in lenient ISO-8601 form.
pub mod lenient {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_str(&format_utc(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(s) if !s.trim().is_empty() => parse_lenient(&s)
                .map(Some)
                .map_err(|e| serde::de::Error::custom(format!("bad timestamp '{}': {}", s, e))),
            _ => Ok(None),
        }
    }
}
