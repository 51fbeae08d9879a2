//! Serde helper for durations written as integer milliseconds.
//!
//! Config files use `*_ms` keys so values stay readable in YAML:
//!
//! ```yaml
//! recovery_timeout_ms: 30000
//! ```
//!
//! Use with `#[serde(with = "crate::utils::duration_ms")]`.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
    serializer.serialize_u64(millis)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}
