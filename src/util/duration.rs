//! Duration values written as `"500ms"`, `"5s"`, `"1m30s"` or bare seconds

use crate::error::{HestiaError, Result};
use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

/// Parse a duration string; a bare number counts seconds
pub fn parse(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(HestiaError::config("empty duration"));
    }
    if let Ok(secs) = s.parse::<f64>() {
        return seconds(secs);
    }

    let mut nanos = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| HestiaError::config(format!("missing unit in duration {}", s)))?;
        if num_len == 0 {
            return Err(HestiaError::config(format!("invalid duration {}", s)));
        }
        let value: f64 = rest[..num_len]
            .parse()
            .map_err(|_| HestiaError::config(format!("invalid duration {}", s)))?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let factor = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            unit => {
                return Err(HestiaError::config(format!(
                    "unknown unit {} in duration {}",
                    unit, s
                )));
            }
        };
        nanos += value * factor;
        rest = &rest[unit_len..];
    }

    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        return Err(HestiaError::config(format!("invalid duration {}", s)));
    }
    Ok(Duration::from_nanos(nanos.round() as u64))
}

fn seconds(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| HestiaError::config(format!("invalid duration {}", secs)))
}

/// Render a duration the way [`parse`] reads it back
pub fn format(d: Duration) -> String {
    let ms = d.as_millis();
    if ms == 0 && !d.is_zero() {
        return format!("{}us", d.as_micros());
    }
    if ms % 1000 != 0 {
        return format!("{}ms", ms);
    }
    format!("{}s", d.as_secs())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Raw {
    Int(u64),
    Float(f64),
    Str(String),
}

impl Raw {
    fn into_duration(self) -> Result<Duration> {
        match self {
            Raw::Int(secs) => Ok(Duration::from_secs(secs)),
            Raw::Float(secs) => seconds(secs),
            Raw::Str(s) => parse(&s),
        }
    }
}

pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
    Raw::deserialize(d)?
        .into_duration()
        .map_err(serde::de::Error::custom)
}

pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&format(*d))
}

/// Optional durations
pub mod option {
    use super::*;

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Option<Duration>, D::Error> {
        Option::<Raw>::deserialize(d)?
            .map(Raw::into_duration)
            .transpose()
            .map_err(serde::de::Error::custom)
    }

    pub fn serialize<S: Serializer>(
        d: &Option<Duration>,
        s: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_str(&format(*d)),
            None => s.serialize_none(),
        }
    }
}
