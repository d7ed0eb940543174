//! Wire format for the collection endpoint
//!
//! One [`EventPayload`] becomes one JSON body POSTed over HTTPS. The caller's
//! property map is carried as-is inside `properties`, with `sessionId` and
//! `source` folded in alongside it; `context` identifies the sending library.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;
use crate::types::EventPayload;

/// JSON body for POST /v1/events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRequest {
    /// Event name
    pub event: String,

    /// ISO-8601 creation timestamp
    pub timestamp: DateTime<Utc>,

    /// Identified user, when known
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Anonymous identifier, always present
    #[serde(rename = "anonymousId")]
    pub anonymous_id: String,

    /// Caller property map plus `sessionId` and `source`
    pub properties: Value,

    /// User-level properties, when any were recorded
    #[serde(rename = "userProperties", skip_serializing_if = "Option::is_none")]
    pub user_properties: Option<Value>,

    /// Identifies the sending library
    pub context: RequestContext,
}

/// Context block identifying the sender
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// Library name and version
    pub library: LibraryInfo,
}

/// Library identification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryInfo {
    /// Crate name
    pub name: String,
    /// Crate version
    pub version: String,
}

impl TrackRequest {
    /// Build the wire body for one payload
    pub fn from_payload(payload: &EventPayload) -> Result<Self> {
        let mut map = match serde_json::to_value(&payload.properties)? {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        map.insert("sessionId".to_string(), json!(payload.session_id));
        map.insert("source".to_string(), json!(payload.source.as_str()));
        let properties = Value::Object(map);

        let user_properties = payload
            .user_properties
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        Ok(Self {
            event: payload.name.clone(),
            timestamp: payload.timestamp,
            user_id: payload.user_id.clone(),
            anonymous_id: payload.anonymous_id.clone(),
            properties,
            user_properties,
            context: RequestContext {
                library: LibraryInfo {
                    name: env!("CARGO_PKG_NAME").to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
            },
        })
    }
}

/// Response body for POST /v1/events
#[derive(Debug, Deserialize)]
pub struct TrackResponse {
    /// Whether the endpoint accepted the event
    #[serde(default)]
    pub accepted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{new_event_id, EventSource, Properties};
    use std::collections::HashMap;

    fn make_payload() -> EventPayload {
        let mut properties = Properties::new();
        properties.insert("plan".to_string(), "pro".into());
        EventPayload {
            workspace_id: "ws-1".to_string(),
            visitor_id: "visitor-1".to_string(),
            anonymous_id: "anon-1".to_string(),
            session_id: "session-1".to_string(),
            event_id: new_event_id(),
            name: "signup_completed".to_string(),
            properties,
            user_id: Some("user-7".to_string()),
            user_properties: Some(HashMap::from([("tier".to_string(), "gold".into())])),
            source: EventSource::Track,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_wire_body_shape() {
        let request = TrackRequest::from_payload(&make_payload()).unwrap();
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["event"], "signup_completed");
        assert_eq!(json["userId"], "user-7");
        assert_eq!(json["anonymousId"], "anon-1");
        assert_eq!(json["properties"]["plan"], "pro");
        assert_eq!(json["properties"]["sessionId"], "session-1");
        assert_eq!(json["properties"]["source"], "track");
        assert_eq!(json["userProperties"]["tier"], "gold");
        assert_eq!(json["context"]["library"]["name"], "trackwire-core");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_absent_user_fields_are_omitted() {
        let mut payload = make_payload();
        payload.user_id = None;
        payload.user_properties = None;

        let request = TrackRequest::from_payload(&payload).unwrap();
        let json = serde_json::to_value(&request).unwrap();

        assert!(json.get("userId").is_none());
        assert!(json.get("userProperties").is_none());
    }
}
