//! Event codec - timestamp and payload normalization
//!
//! Remote producers disagree about timestamp precision: mobile clients emit
//! millisecond fractions, server-side clocks emit nanoseconds, older builds
//! emit whole seconds. `parse_timestamp` accepts all of them and returns
//! `None` for malformed input instead of erroring - bad timestamps are a
//! normal condition, not an exceptional one.

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use std::sync::OnceLock;

use crate::models::{DeviceId, Event};
use crate::wire::WireEvent;

/// Matches `(datetime).(first 3 fraction digits)(rest)(zone)`.
fn fraction_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2})\.(\d{1,3})\d*(.*)$")
            .expect("Invalid regex")
    })
}

/// Parse an ISO-8601 timestamp of heterogeneous precision.
///
/// Strategy ladder:
/// 1. strict RFC 3339 parse;
/// 2. truncate the fractional-seconds component to exactly 3 digits, retry;
/// 3. strip the fractional component entirely, retry;
/// 4. give up and return `None`.
#[must_use]
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    let truncated = truncate_fraction(value);
    if truncated != value {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&truncated) {
            return Some(parsed.with_timezone(&Utc));
        }
    }

    let stripped = strip_fraction(value);
    if stripped != value {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&stripped) {
            return Some(parsed.with_timezone(&Utc));
        }
    }

    None
}

/// Truncate a fractional-seconds component to exactly 3 digits.
///
/// Idempotent: input already at millisecond precision (or without a
/// fraction) passes through unchanged. The zone suffix is preserved.
#[must_use]
pub fn truncate_fraction(value: &str) -> String {
    fraction_pattern()
        .captures(value)
        .map_or_else(|| value.to_string(), |c| format!("{}.{}{}", &c[1], &c[2], &c[3]))
}

/// Remove the fractional-seconds component entirely.
fn strip_fraction(value: &str) -> String {
    fraction_pattern()
        .captures(value)
        .map_or_else(|| value.to_string(), |c| format!("{}{}", &c[1], &c[3]))
}

/// Format a timestamp for the wire: RFC 3339, millisecond precision, `Z`.
#[must_use]
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Encode an event for the wire
#[must_use]
pub fn wire_event(event: &Event) -> WireEvent {
    WireEvent {
        id: event.id.as_str(),
        event_type: event.event_type.clone(),
        payload: event.payload.clone(),
        entity_id: event.entity_id.clone(),
        user_id: event.user_id.clone(),
        device_id: event.device_id.as_ref().map(|d| d.as_str().to_string()),
        timestamp: format_timestamp(event.timestamp),
        payload_version: event.payload_version,
        base_revision: event.base_revision,
    }
}

/// Decode one out-of-band batch payload into an event.
///
/// Returns `None` when the envelope is malformed, a required field is
/// missing/blank, or the timestamp is unparseable - the offending event is
/// dropped and the batch continues.
#[must_use]
pub fn decode_wire_event(value: &serde_json::Value) -> Option<Event> {
    let wire: WireEvent = match serde_json::from_value(value.clone()) {
        Ok(wire) => wire,
        Err(error) => {
            tracing::warn!(%error, "dropping undecodable remote event");
            return None;
        }
    };

    let id = match wire.id.parse() {
        Ok(id) => id,
        Err(error) => {
            tracing::warn!(%error, id = %wire.id, "dropping remote event with invalid id");
            return None;
        }
    };
    if wire.event_type.trim().is_empty() || wire.payload.trim().is_empty() {
        tracing::warn!(id = %wire.id, "dropping remote event with empty type or payload");
        return None;
    }
    let Some(timestamp) = parse_timestamp(&wire.timestamp) else {
        tracing::warn!(id = %wire.id, raw = %wire.timestamp, "dropping remote event with unparseable timestamp");
        return None;
    };

    Some(Event {
        id,
        event_type: wire.event_type,
        payload: wire.payload,
        entity_id: wire.entity_id,
        user_id: wire.user_id,
        device_id: wire.device_id.map(DeviceId::from),
        timestamp,
        base_revision: wire.base_revision,
        payload_version: wire.payload_version,
        is_synced: true,
        seq: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_second_precision() {
        let parsed = parse_timestamp("2024-01-15T10:30:45Z").unwrap();
        assert_eq!(parsed.year(), 2024);
        assert_eq!(parsed.second(), 45);
    }

    #[test]
    fn test_parse_millisecond_fraction() {
        let parsed = parse_timestamp("2024-01-15T10:30:45.123Z").unwrap();
        assert_eq!(parsed.timestamp_subsec_millis(), 123);
    }

    #[test]
    fn test_parse_nanosecond_fraction() {
        let parsed = parse_timestamp("2024-01-15T10:30:45.123456789Z").unwrap();
        assert_eq!(parsed.year(), 2024);
        assert_eq!(parsed.month(), 1);
        assert_eq!(parsed.day(), 15);
        assert_eq!(parsed.second(), 45);
    }

    #[test]
    fn test_parse_overlong_fraction_falls_back_to_truncation() {
        // More than 9 digits fails the strict parse; truncation rescues it.
        let parsed = parse_timestamp("2024-01-15T10:30:45.1234567890123Z").unwrap();
        assert_eq!(parsed.timestamp_subsec_millis(), 123);
    }

    #[test]
    fn test_parse_explicit_zone_offset() {
        let parsed = parse_timestamp("2024-01-15T10:30:45.500+05:30").unwrap();
        assert_eq!(parsed.hour(), 5);
        assert_eq!(parsed.minute(), 0);
    }

    #[test]
    fn test_parse_all_fraction_widths() {
        for digits in 0..=9 {
            let fraction = if digits == 0 {
                String::new()
            } else {
                format!(".{}", "1".repeat(digits))
            };
            let raw = format!("2024-06-01T08:00:30{fraction}Z");
            let parsed = parse_timestamp(&raw).unwrap_or_else(|| panic!("failed on {raw}"));
            assert_eq!(parsed.second(), 30);
        }
    }

    #[test]
    fn test_parse_malformed_returns_none() {
        for raw in [
            "",
            "not a date",
            "2024-13-01T00:00:00Z",
            "2024-01-32T00:00:00Z",
            "2024-01-15T25:00:00Z",
            "2024-01-15",
        ] {
            assert_eq!(parse_timestamp(raw), None, "accepted {raw:?}");
        }
    }

    #[test]
    fn test_truncate_fraction_idempotent() {
        assert_eq!(
            truncate_fraction("2024-01-15T10:30:45.123Z"),
            "2024-01-15T10:30:45.123Z"
        );
        assert_eq!(
            truncate_fraction("2024-01-15T10:30:45.123456789Z"),
            "2024-01-15T10:30:45.123Z"
        );
    }

    #[test]
    fn test_truncate_fraction_preserves_zone() {
        assert_eq!(
            truncate_fraction("2024-01-15T10:30:45.999999+02:00"),
            "2024-01-15T10:30:45.999+02:00"
        );
    }

    #[test]
    fn test_truncate_fraction_passthrough_without_fraction() {
        assert_eq!(
            truncate_fraction("2024-01-15T10:30:45Z"),
            "2024-01-15T10:30:45Z"
        );
        assert_eq!(truncate_fraction("garbage"), "garbage");
    }

    #[test]
    fn test_format_roundtrip() {
        let raw = "2024-01-15T10:30:45.123Z";
        let parsed = parse_timestamp(raw).unwrap();
        assert_eq!(format_timestamp(parsed), raw);
    }

    #[test]
    fn test_decode_wire_event_roundtrip() {
        let event = Event::new(
            "stack.updated",
            r#"{"title":"inbox"}"#,
            "stack-1",
            "user-1",
            Some(DeviceId::from("device-a")),
            3,
        );
        let value = serde_json::to_value(wire_event(&event)).unwrap();
        let decoded = decode_wire_event(&value).unwrap();

        assert_eq!(decoded.id, event.id);
        assert_eq!(decoded.base_revision, 3);
        assert!(decoded.is_synced);
        // wire precision is milliseconds
        assert_eq!(decoded.timestamp_ms(), event.timestamp_ms());
    }

    #[test]
    fn test_decode_wire_event_drops_bad_timestamp() {
        let mut value = serde_json::to_value(wire_event(&Event::new(
            "task.created",
            "{}",
            "task-1",
            "user-1",
            None,
            0,
        )))
        .unwrap();
        value["timestamp"] = serde_json::Value::String("never".to_string());
        assert_eq!(decode_wire_event(&value), None);
    }

    #[test]
    fn test_decode_wire_event_drops_malformed_envelope() {
        assert_eq!(decode_wire_event(&serde_json::json!({"id": 42})), None);
        assert_eq!(decode_wire_event(&serde_json::json!("text")), None);
    }
}
