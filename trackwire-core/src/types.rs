//! Core domain types for trackwire
//!
//! These types describe the canonical event model that every producer
//! (public tracking API, lifecycle auto-events, attribution forwarders)
//! hands to the delivery pipeline.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **EventPayload** | One trackable occurrence with name, properties, identifiers, timestamp |
//! | **QueuedEvent** | An `EventPayload` plus queue-local metadata (enqueue time, retry count) |
//! | **PropertyValue** | A loosely-typed property bag value (string/number/bool/array/map/null) |
//! | **EventSource** | Which producer recorded the event |
//! | **Visitor** | The durable, install-scoped identity a device keeps across sessions |

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Maximum accepted event name length, in characters.
pub const MAX_EVENT_NAME_LEN: usize = 120;

/// Maximum serialized payload size admitted to the queue, in bytes.
pub const MAX_PAYLOAD_BYTES: usize = 32 * 1024;

// ============================================
// Property values
// ============================================

/// A dynamically-typed event property value.
///
/// Recursive tagged union covering everything the wire format can carry.
/// Serialized through serde_json only; the `untagged` representation keeps
/// the JSON shape identical to what a caller would write by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// JSON null
    Null,
    /// Boolean
    Bool(bool),
    /// Any numeric value (stored as f64, like JSON numbers)
    Number(f64),
    /// UTF-8 string
    String(String),
    /// Ordered list of values
    Array(Vec<PropertyValue>),
    /// Nested object
    Map(HashMap<String, PropertyValue>),
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Number(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Number(v as f64)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

/// A property bag as accepted by the tracking API.
pub type Properties = HashMap<String, PropertyValue>;

// ============================================
// Events
// ============================================

/// Which producer recorded an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Public `track` API
    Track,
    /// App-lifecycle auto-events
    Lifecycle,
    /// Attribution/deep-link forwarders
    Attribution,
}

impl EventSource {
    /// Wire-format string for this source
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Track => "track",
            EventSource::Lifecycle => "lifecycle",
            EventSource::Attribution => "attribution",
        }
    }
}

/// One occurrence to be delivered to the collection endpoint.
///
/// Immutable once constructed: the event id and timestamp are assigned at
/// creation and never change, which is what makes queue-side de-duplication
/// and at-least-once delivery accounting possible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Workspace this event belongs to
    pub workspace_id: String,
    /// Durable visitor identifier
    pub visitor_id: String,
    /// Anonymous identifier (rotated on reset)
    pub anonymous_id: String,
    /// Session identifier
    pub session_id: String,
    /// Unique event identifier (uuid v4), stable for the payload's lifetime
    pub event_id: String,
    /// Validated event name
    pub name: String,
    /// Caller-supplied property map
    pub properties: Properties,
    /// Identified user, if `identify` has been called
    pub user_id: Option<String>,
    /// User-level properties, if any
    pub user_properties: Option<Properties>,
    /// Which producer recorded this event
    pub source: EventSource,
    /// Assigned once at creation
    pub timestamp: DateTime<Utc>,
}

impl EventPayload {
    /// Serialized size of this payload in bytes.
    ///
    /// Used for the admission cap; oversized payloads are rejected before
    /// they ever reach the queue.
    pub fn encoded_len(&self) -> Result<usize> {
        Ok(serde_json::to_vec(self)?.len())
    }
}

/// Validate an event name against the admission rules.
///
/// Names are bounded in length and restricted to alphanumerics plus
/// `_`, `-`, `.` and space.
pub fn validate_event_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidEvent("event name is empty".to_string()));
    }
    if name.chars().count() > MAX_EVENT_NAME_LEN {
        return Err(Error::InvalidEvent(format!(
            "event name exceeds {} characters",
            MAX_EVENT_NAME_LEN
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ' ')))
    {
        return Err(Error::InvalidEvent(format!(
            "event name contains disallowed character {:?}",
            bad
        )));
    }
    Ok(())
}

/// Generate a fresh unique event identifier.
pub fn new_event_id() -> String {
    Uuid::new_v4().to_string()
}

// ============================================
// Queue entries
// ============================================

/// An [`EventPayload`] wrapped with queue-local delivery metadata.
///
/// The payload itself is never mutated after enqueue; only `retry_count`
/// moves, and only upward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    /// The event awaiting delivery
    pub payload: EventPayload,
    /// Epoch seconds at enqueue time, used to compute age
    pub enqueued_at: i64,
    /// Failed delivery attempts so far
    pub retry_count: u32,
}

impl QueuedEvent {
    /// Wrap a payload for the queue, stamped with the current time.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            enqueued_at: Utc::now().timestamp(),
            retry_count: 0,
        }
    }

    /// Age of this entry in seconds, relative to `now` (epoch seconds).
    pub fn age_secs(&self, now: i64) -> u64 {
        now.saturating_sub(self.enqueued_at).max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_payload(name: &str) -> EventPayload {
        EventPayload {
            workspace_id: "ws-1".to_string(),
            visitor_id: "visitor-1".to_string(),
            anonymous_id: "anon-1".to_string(),
            session_id: "session-1".to_string(),
            event_id: new_event_id(),
            name: name.to_string(),
            properties: HashMap::new(),
            user_id: None,
            user_properties: None,
            source: EventSource::Track,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_valid_event_names() {
        assert!(validate_event_name("signup_completed").is_ok());
        assert!(validate_event_name("Screen Viewed").is_ok());
        assert!(validate_event_name("checkout.step-2").is_ok());
    }

    #[test]
    fn test_invalid_event_names() {
        assert!(validate_event_name("").is_err());
        assert!(validate_event_name("bad/name").is_err());
        assert!(validate_event_name("emoji💥").is_err());
        assert!(validate_event_name(&"x".repeat(MAX_EVENT_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_property_value_json_shape() {
        let mut props = Properties::new();
        props.insert("plan".to_string(), "pro".into());
        props.insert("seats".to_string(), 4i64.into());
        props.insert("trial".to_string(), true.into());
        props.insert("tags".to_string(), PropertyValue::Array(vec!["a".into()]));
        props.insert("none".to_string(), PropertyValue::Null);

        let json = serde_json::to_value(&props).unwrap();
        assert_eq!(json["plan"], "pro");
        assert_eq!(json["seats"], 4.0);
        assert_eq!(json["trial"], true);
        assert_eq!(json["tags"][0], "a");
        assert!(json["none"].is_null());

        let back: Properties = serde_json::from_value(json).unwrap();
        assert_eq!(back, props);
    }

    #[test]
    fn test_queued_event_roundtrip() {
        let entry = QueuedEvent::new(make_payload("purchase"));
        let bytes = serde_json::to_vec(&entry).unwrap();
        let back: QueuedEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_queued_event_age() {
        let mut entry = QueuedEvent::new(make_payload("purchase"));
        entry.enqueued_at = 1_000;
        assert_eq!(entry.age_secs(1_030), 30);
        // Clock skew should not go negative
        assert_eq!(entry.age_secs(900), 0);
    }

    #[test]
    fn test_encoded_len_grows_with_properties() {
        let small = make_payload("purchase");
        let mut big = small.clone();
        big.properties
            .insert("blob".to_string(), "x".repeat(1024).into());
        assert!(big.encoded_len().unwrap() > small.encoded_len().unwrap());
    }
}
