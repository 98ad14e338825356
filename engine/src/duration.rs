//! Serde helpers for duration fields.
//!
//! Config and watchlist files accept either an integer number of seconds
//! (`cooldown = 60`) or a literal with a unit suffix (`cooldown = "2m"`).
//! Supported suffixes: `ms`, `s`, `m`, `h`.

use std::fmt;
use std::time::Duration;

use serde::de::{self, Visitor};
use serde::Deserializer;

/// Parse a duration literal such as `"5s"`, `"2m"`, `"150ms"` or `"90"`.
pub fn parse(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(Duration::ZERO);
    }
    // bare number = seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let unit_at = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .ok_or_else(|| format!("invalid duration: {s:?}"))?;
    let (num, unit) = s.split_at(unit_at);
    let value: f64 = num
        .parse()
        .map_err(|_| format!("invalid duration: {s:?}"))?;

    let millis = match unit.trim() {
        "ms" => value,
        "s" => value * 1_000.0,
        "m" => value * 60_000.0,
        "h" => value * 3_600_000.0,
        _ => return Err(format!("invalid duration unit: {s:?}")),
    };
    if millis < 0.0 {
        return Err(format!("negative duration: {s:?}"));
    }
    Ok(Duration::from_millis(millis.round() as u64))
}

struct DurationVisitor;

impl<'de> Visitor<'de> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an integer number of seconds or a literal like \"5s\"")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
        Ok(Duration::from_secs(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
        if v < 0 {
            return Err(E::custom("negative duration"));
        }
        Ok(Duration::from_secs(v as u64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Duration, E> {
        if v < 0.0 {
            return Err(E::custom("negative duration"));
        }
        Ok(Duration::from_millis((v * 1_000.0).round() as u64))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
        parse(v).map_err(E::custom)
    }
}

/// `#[serde(deserialize_with = "duration::deserialize")]`
pub fn deserialize<'de, D>(d: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    d.deserialize_any(DurationVisitor)
}
