//! Durable event delivery pipeline
//!
//! The single path every producer goes through:
//!
//! ```text
//! producer → Pipeline.track → DurableQueue.enqueue → (persist)
//!         → flush cycle → Transport.send_event
//!         → success: remove & persist | failure: classify, retry or drop
//! ```
//!
//! Delivery is fire-and-forget and at-least-once: the caller never blocks on
//! network I/O and never sees a delivery error. Persistent failures are
//! observable only through [`DurableQueue::stats`] and the log.

pub mod queue;
pub mod transport;
pub mod wire;

pub use queue::{DurableQueue, QueueStats};
pub use transport::{FailureClass, HttpTransport, RateLimiter, SendResult, Transport};
pub use wire::TrackRequest;

use std::sync::{Arc, Mutex};

use chrono::Utc;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::{KeyValueStore, Scope};
use crate::types::{
    new_event_id, validate_event_name, EventPayload, EventSource, Properties, MAX_PAYLOAD_BYTES,
};

const KEY_VISITOR_ID: &str = "identity.visitor_id";
const KEY_ANONYMOUS_ID: &str = "identity.anonymous_id";
const KEY_USER_ID: &str = "identity.user_id";
const KEY_APP_VERSION: &str = "app.version";

/// Who the events we record belong to right now
struct Identity {
    visitor_id: String,
    anonymous_id: String,
    session_id: String,
    user_id: Option<String>,
    user_properties: Option<Properties>,
}

/// Entry point used by every producer: the public tracking API,
/// lifecycle auto-events, and attribution forwarders.
///
/// Owned by the host application's composition root and passed by reference
/// to producers; there is no global instance. Construction loads or creates
/// the durable identifiers and reloads any persisted queue.
pub struct Pipeline {
    queue: DurableQueue,
    store: Arc<KeyValueStore>,
    workspace_id: String,
    identity: Mutex<Identity>,
}

impl Pipeline {
    /// Create a pipeline with an HTTP transport built from `config`.
    pub fn new(config: Config, store: Arc<KeyValueStore>) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(config.transport.clone())?);
        Self::with_transport(config, store, transport)
    }

    /// Create a pipeline with a caller-supplied transport.
    ///
    /// This is the seam tests use to script delivery outcomes.
    pub fn with_transport(
        config: Config,
        store: Arc<KeyValueStore>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let workspace_id = config
            .transport
            .workspace_id
            .clone()
            .ok_or_else(|| Error::Config("transport.workspace_id is required".to_string()))?;

        let identity = load_identity(&store)?;
        let queue = DurableQueue::new(config.pipeline, Arc::clone(&store), transport)?;

        Ok(Self {
            queue,
            store,
            workspace_id,
            identity: Mutex::new(identity),
        })
    }

    /// Record an event from the public tracking API.
    ///
    /// Fire-and-forget: invalid or oversized events are logged and dropped,
    /// everything else is queued for asynchronous at-least-once delivery.
    pub fn track(&self, name: &str, properties: Properties) {
        self.record(EventSource::Track, name, properties);
    }

    /// Record an event on behalf of a non-API producer.
    pub fn record(&self, source: EventSource, name: &str, properties: Properties) {
        if let Err(e) = validate_event_name(name) {
            tracing::warn!(event = %name, error = %e, "Rejected event");
            return;
        }

        let payload = {
            let identity = self.identity.lock().unwrap();
            EventPayload {
                workspace_id: self.workspace_id.clone(),
                visitor_id: identity.visitor_id.clone(),
                anonymous_id: identity.anonymous_id.clone(),
                session_id: identity.session_id.clone(),
                event_id: new_event_id(),
                name: name.to_string(),
                properties,
                user_id: identity.user_id.clone(),
                user_properties: identity.user_properties.clone(),
                source,
                timestamp: Utc::now(),
            }
        };

        match payload.encoded_len() {
            Ok(len) if len > MAX_PAYLOAD_BYTES => {
                tracing::warn!(
                    event = %name,
                    bytes = len,
                    cap = MAX_PAYLOAD_BYTES,
                    "Rejected oversized event"
                );
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(event = %name, error = %e, "Rejected unserializable event");
                return;
            }
        }

        self.queue.enqueue(payload);
    }

    /// Attach a user identity to subsequent events.
    pub fn identify(&self, user_id: &str, user_properties: Option<Properties>) {
        {
            let mut identity = self.identity.lock().unwrap();
            identity.user_id = Some(user_id.to_string());
            identity.user_properties = user_properties;
        }
        if let Err(e) = self
            .store
            .set_string(Scope::Sensitive, KEY_USER_ID, user_id)
        {
            tracing::error!(error = %e, "Failed to persist user id");
        }
    }

    /// Forget the current user and start a fresh anonymous identity.
    ///
    /// Rotates the anonymous and session identifiers, drops the user, and
    /// empties the queue. The visitor identifier is durable and survives.
    pub fn reset(&self) {
        let anonymous_id = Uuid::new_v4().to_string();
        {
            let mut identity = self.identity.lock().unwrap();
            identity.anonymous_id = anonymous_id.clone();
            identity.session_id = Uuid::new_v4().to_string();
            identity.user_id = None;
            identity.user_properties = None;
        }
        if let Err(e) = self.store.delete(Scope::Sensitive, KEY_USER_ID) {
            tracing::error!(error = %e, "Failed to remove persisted user id");
        }
        if let Err(e) =
            self.store
                .set_string(Scope::Sensitive, KEY_ANONYMOUS_ID, &anonymous_id)
        {
            tracing::error!(error = %e, "Failed to persist anonymous id");
        }
        self.queue.clear();
        tracing::info!("Pipeline identity reset");
    }

    /// Record the running app version; returns `true` when it changed since
    /// the previous launch. Collaborators use this for update auto-events.
    pub fn record_app_version(&self, version: &str) -> bool {
        let previous = self
            .store
            .get_string(Scope::General, KEY_APP_VERSION)
            .unwrap_or(None);
        let changed = previous.as_deref() != Some(version);
        if changed {
            if let Err(e) = self
                .store
                .set_string(Scope::General, KEY_APP_VERSION, version)
            {
                tracing::error!(error = %e, "Failed to persist app version");
            }
        }
        changed
    }

    /// Run one flush cycle now
    pub async fn flush(&self) {
        self.queue.flush().await;
    }

    /// Report network reachability
    pub fn set_online_status(&self, online: bool) {
        self.queue.set_online_status(online);
    }

    /// Snapshot of the delivery queue
    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Stop the background driver and persist a final snapshot.
    pub fn shutdown(&self) {
        self.queue.destroy();
    }
}

/// Load the persisted identity, creating durable identifiers on first use.
///
/// Visitor and anonymous ids live in the sensitive scope; the session id is
/// fresh per construction.
fn load_identity(store: &KeyValueStore) -> Result<Identity> {
    let visitor_id = match store.get_string(Scope::Sensitive, KEY_VISITOR_ID)? {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            store.set_string(Scope::Sensitive, KEY_VISITOR_ID, &id)?;
            tracing::info!("Created visitor identity");
            id
        }
    };

    let anonymous_id = match store.get_string(Scope::Sensitive, KEY_ANONYMOUS_ID)? {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            store.set_string(Scope::Sensitive, KEY_ANONYMOUS_ID, &id)?;
            id
        }
    };

    let user_id = store.get_string(Scope::Sensitive, KEY_USER_ID)?;

    Ok(Identity {
        visitor_id,
        anonymous_id,
        session_id: Uuid::new_v4().to_string(),
        user_id,
        user_properties: None,
    })
}
