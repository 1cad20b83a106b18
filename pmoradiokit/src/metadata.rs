//! Metadata snapshots pushed on the broadcast channel.
//!
//! The meaning of the metadata map is left to each channel's convention: a
//! track played from the RadioKit Depot carries whatever tags were attached
//! to the file, and manually edited metadata carries the editor's keys. The
//! only key this crate interprets is `duration`, in milliseconds.

use crate::error::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Arbitrary key/value metadata as received from the channel
pub type MetadataMap = serde_json::Map<String, Value>;

/// Key holding the track duration in milliseconds
pub const DURATION_KEY: &str = "duration";

/// Decoded `update` message.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataUpdate {
    /// New metadata, `None` when the channel cleared it
    pub metadata: Option<MetadataMap>,
    /// When the update was produced, if the timestamp could be read
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RawUpdate {
    #[serde(default)]
    metadata: Option<MetadataMap>,
    #[serde(default)]
    updated_at: Value,
}

impl MetadataUpdate {
    /// Decode an `update` payload (`{"metadata": ..., "updated_at": ...}`)
    pub fn from_payload(payload: Value) -> Result<Self> {
        let raw: RawUpdate = serde_json::from_value(payload)?;
        let updated_at = parse_timestamp(&raw.updated_at);

        if updated_at.is_none() && !raw.updated_at.is_null() {
            tracing::warn!(updated_at = %raw.updated_at, "Unparseable update timestamp");
        }

        Ok(Self {
            metadata: raw.metadata,
            updated_at,
        })
    }

    /// Track duration in milliseconds, if the metadata carries a usable one
    pub fn duration_ms(&self) -> Option<u64> {
        self.metadata.as_ref().and_then(duration_ms)
    }

    /// Update timestamp as epoch milliseconds
    pub fn updated_at_ms(&self) -> Option<i64> {
        self.updated_at.map(|t| t.timestamp_millis())
    }
}

/// Largest duration that still compares against signed elapsed milliseconds
pub const MAX_DURATION_MS: u64 = i64::MAX as u64;

/// Read the `duration` key of a metadata map.
///
/// Missing, non-numeric, non-finite and non-positive values all count as
/// "no duration". Fractional values are floored: elapsed time is counted in
/// whole milliseconds, so `elapsed > d` and `elapsed > floor(d)` agree.
/// Values above [`MAX_DURATION_MS`] are clamped.
pub fn duration_ms(metadata: &MetadataMap) -> Option<u64> {
    let value = metadata.get(DURATION_KEY)?;
    if let Some(ms) = value.as_u64() {
        return (ms > 0).then_some(ms.min(MAX_DURATION_MS));
    }
    let ms = value.as_f64()?;
    (ms.is_finite() && ms > 0.0).then(|| (ms.floor() as u64).min(MAX_DURATION_MS))
}

/// Parse an update timestamp.
///
/// Accepts RFC 3339 strings, naive ISO-8601 strings (taken as UTC) and
/// epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| naive.and_utc())
        }
        Value::Number(n) => {
            let ms = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            DateTime::from_timestamp_millis(ms)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> MetadataMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_decode_full_update() {
        let update = MetadataUpdate::from_payload(json!({
            "metadata": {"duration": 5000, "title": "X"},
            "updated_at": "2017-06-01T12:00:00Z"
        }))
        .unwrap();

        assert_eq!(update.duration_ms(), Some(5000));
        assert_eq!(
            update.metadata.as_ref().unwrap().get("title"),
            Some(&json!("X"))
        );
        assert_eq!(update.updated_at_ms(), Some(1_496_318_400_000));
    }

    #[test]
    fn test_decode_cleared_metadata() {
        let update = MetadataUpdate::from_payload(json!({
            "metadata": null,
            "updated_at": 1_496_318_400_000i64
        }))
        .unwrap();

        assert!(update.metadata.is_none());
        assert!(update.duration_ms().is_none());
        assert_eq!(update.updated_at_ms(), Some(1_496_318_400_000));
    }

    #[test]
    fn test_missing_fields_are_tolerated() {
        let update = MetadataUpdate::from_payload(json!({})).unwrap();
        assert!(update.metadata.is_none());
        assert!(update.updated_at.is_none());
    }

    #[test]
    fn test_non_object_payload_rejected() {
        assert!(MetadataUpdate::from_payload(json!("nope")).is_err());
        assert!(MetadataUpdate::from_payload(json!({"metadata": 42})).is_err());
    }

    #[test]
    fn test_duration_tolerance() {
        assert_eq!(duration_ms(&map(json!({"duration": 10000}))), Some(10000));
        assert_eq!(duration_ms(&map(json!({"duration": 1500.2}))), Some(1500));
        assert_eq!(duration_ms(&map(json!({"duration": 0}))), None);
        assert_eq!(duration_ms(&map(json!({"duration": -20}))), None);
        assert_eq!(duration_ms(&map(json!({"duration": "5000"}))), None);
        assert_eq!(duration_ms(&map(json!({"duration": null}))), None);
        assert_eq!(duration_ms(&map(json!({"title": "X"}))), None);
    }

    #[test]
    fn test_fractional_duration_is_floored() {
        assert_eq!(duration_ms(&map(json!({"duration": 1500.9}))), Some(1500));
        assert_eq!(duration_ms(&map(json!({"duration": 0.4}))), Some(0));
        assert_eq!(duration_ms(&map(json!({"duration": -0.4}))), None);
    }

    #[test]
    fn test_huge_duration_is_clamped() {
        assert_eq!(
            duration_ms(&map(json!({"duration": u64::MAX}))),
            Some(MAX_DURATION_MS)
        );
        assert_eq!(
            duration_ms(&map(json!({"duration": 1e300}))),
            Some(MAX_DURATION_MS)
        );
        assert_eq!(
            duration_ms(&map(json!({"duration": MAX_DURATION_MS}))),
            Some(MAX_DURATION_MS)
        );
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = 1_496_318_400_123;
        for value in [
            json!("2017-06-01T12:00:00.123Z"),
            json!("2017-06-01T14:00:00.123+02:00"),
            json!("2017-06-01T12:00:00.123000"),
            json!("2017-06-01 12:00:00.123"),
            json!(1_496_318_400_123i64),
        ] {
            let parsed = parse_timestamp(&value).unwrap();
            assert_eq!(parsed.timestamp_millis(), expected, "{value}");
        }
        assert!(parse_timestamp(&json!("yesterday")).is_none());
        assert!(parse_timestamp(&json!(true)).is_none());
    }
}
