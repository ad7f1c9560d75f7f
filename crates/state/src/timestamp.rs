//! Timestamps in persisted documents.
//!
//! Always written as RFC 3339. Read as RFC 3339 or as an offset-less
//! ISO-8601 date-time (`2024-01-01T12:00:00.123456`), which is taken as UTC.
//! Use with `#[serde(with = "crate::timestamp")]`, or the `option` submodule
//! for optional fields.

use serde::{de, Deserialize, Deserializer, Serializer};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, PrimitiveDateTime};

const NAIVE_FORMAT: &str =
    "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]";

/// Parses RFC 3339, falling back to a naive date-time in UTC.
pub fn parse(raw: &str) -> Option<OffsetDateTime> {
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(ts);
    }
    let format = time::format_description::parse(NAIVE_FORMAT).ok()?;
    PrimitiveDateTime::parse(raw, &format)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

fn invalid<E: de::Error>(raw: &str) -> E {
    E::custom(format!("invalid timestamp '{raw}'"))
}

pub fn serialize<S: Serializer>(ts: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    time::serde::rfc3339::serialize(ts, serializer)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OffsetDateTime, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse(&raw).ok_or_else(|| invalid(&raw))
}

pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(
        ts: &Option<OffsetDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        time::serde::rfc3339::option::serialize(ts, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<OffsetDateTime>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) => parse(&raw).map(Some).ok_or_else(|| invalid(&raw)),
        }
    }
}
