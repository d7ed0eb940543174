//! HTTP transport for the collection endpoint
//!
//! Delivers one event per call, applying authentication headers, a rolling
//! per-minute rate limit, and exponential-backoff retry for transient
//! failures. Every outcome crosses this boundary as a [`SendResult`] value;
//! nothing is thrown past it. Requeue/drop decisions belong to the queue,
//! which inspects the failure classification.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::types::EventPayload;

use super::wire::{TrackRequest, TrackResponse};

/// Outbound attempts allowed per rolling minute
pub const RATE_LIMIT_PER_MINUTE: usize = 100;

/// Rolling rate-limit window
const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Ceiling on any single backoff delay
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Why a delivery attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Authentication rejected (401); terminal
    Auth,
    /// Rolling rate limit exceeded, locally or by the server (429)
    RateLimited,
    /// Server error (5xx); retryable
    Server,
    /// Client error other than 401; terminal
    Client,
    /// Network unreachable, timeout, connection lost; retryable
    Network,
    /// Serialization failure or unexpected response body; terminal
    Malformed,
}

impl FailureClass {
    /// Whether the transport (or a later flush cycle) may retry this failure
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureClass::Server | FailureClass::Network)
    }
}

/// Per-call delivery outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendResult {
    /// Whether the endpoint confirmed the event
    pub success: bool,
    /// HTTP status, when a response was received
    pub status: Option<u16>,
    /// Failure classification, `None` on success
    pub failure: Option<FailureClass>,
}

impl SendResult {
    /// A confirmed delivery
    pub fn ok(status: u16) -> Self {
        Self {
            success: true,
            status: Some(status),
            failure: None,
        }
    }

    /// A classified failure
    pub fn failed(status: Option<u16>, failure: FailureClass) -> Self {
        Self {
            success: false,
            status,
            failure: Some(failure),
        }
    }
}

/// Delivery seam between the durable queue and the network.
///
/// Tests stub this to script per-event outcomes; production uses
/// [`HttpTransport`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one event, retrying transient failures internally
    async fn send_event(&self, payload: &EventPayload) -> SendResult;

    /// Deliver several events concurrently; results pair 1:1 by position
    async fn send_batch(&self, payloads: &[EventPayload]) -> Vec<SendResult> {
        futures::future::join_all(payloads.iter().map(|p| self.send_event(p))).await
    }
}

/// Rolling-window rate limiter over outbound attempt timestamps
pub struct RateLimiter {
    ceiling: usize,
    window: Duration,
    attempts: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Limiter allowing `ceiling` attempts per `window`
    pub fn new(ceiling: usize, window: Duration) -> Self {
        Self {
            ceiling,
            window,
            attempts: Mutex::new(VecDeque::new()),
        }
    }

    /// Record one attempt if the window has room; `false` when exhausted
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut attempts = self.attempts.lock().unwrap();
        while let Some(front) = attempts.front() {
            if now.duration_since(*front) >= self.window {
                attempts.pop_front();
            } else {
                break;
            }
        }
        if attempts.len() >= self.ceiling {
            return false;
        }
        attempts.push_back(now);
        true
    }
}

/// HTTP client for the collection endpoint
pub struct HttpTransport {
    config: TransportConfig,
    http_client: reqwest::Client,
    endpoint: String,
    limiter: RateLimiter,
}

impl HttpTransport {
    /// Create a transport from configuration
    ///
    /// Returns an error if the configuration is invalid or missing required
    /// fields.
    pub fn new(config: TransportConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config
            .endpoint_url
            .clone()
            .ok_or_else(|| Error::Config("transport.endpoint_url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();
        let endpoint = format!("{}/v1/events", base_url);

        // Build default headers
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &config.api_key {
            headers.insert(
                "X-Api-Key",
                HeaderValue::from_str(api_key)
                    .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
            );
        }

        // Workspace id doubles as a bearer credential for older endpoints
        if let Some(workspace_id) = &config.workspace_id {
            let auth_value = format!("Bearer {}", workspace_id);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid workspace_id: {}", e)))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            endpoint,
            limiter: RateLimiter::new(RATE_LIMIT_PER_MINUTE, RATE_WINDOW),
        })
    }

    /// One wire attempt, no retries
    async fn attempt(&self, payload: &EventPayload) -> SendResult {
        let body = match TrackRequest::from_payload(payload) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(event_id = %payload.event_id, error = %e, "Failed to serialize event");
                return SendResult::failed(None, FailureClass::Malformed);
            }
        };

        let response = match self.http_client.post(&self.endpoint).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                let class = classify_request_error(&e);
                tracing::warn!(event_id = %payload.event_id, error = %e, "HTTP request failed");
                return SendResult::failed(e.status().map(|s| s.as_u16()), class);
            }
        };

        let status = response.status().as_u16();
        match classify_status(status) {
            None => match response.json::<TrackResponse>().await {
                Ok(_) => SendResult::ok(status),
                Err(e) => {
                    tracing::warn!(event_id = %payload.event_id, error = %e, "Unexpected response body");
                    SendResult::failed(Some(status), FailureClass::Malformed)
                }
            },
            Some(class) => SendResult::failed(Some(status), class),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_event(&self, payload: &EventPayload) -> SendResult {
        let mut last = SendResult::failed(None, FailureClass::Network);

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(self.config.base_retry_delay(), attempt - 1);
                tracing::debug!(
                    event_id = %payload.event_id,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying event delivery"
                );
                tokio::time::sleep(delay).await;
            }

            // The window caps attempts, not events; an exhausted window fails
            // fast instead of queuing behind the network
            if !self.limiter.try_acquire() {
                tracing::warn!(event_id = %payload.event_id, "Outbound rate limit exceeded");
                return SendResult::failed(None, FailureClass::RateLimited);
            }

            let result = self.attempt(payload).await;
            if result.success {
                return result;
            }
            match result.failure {
                Some(class) if class.is_retryable() => {
                    tracing::warn!(
                        event_id = %payload.event_id,
                        status = ?result.status,
                        "Transient delivery failure"
                    );
                    last = result;
                }
                _ => return result,
            }
        }

        last
    }
}

/// Map an HTTP status to a failure class; `None` means success
fn classify_status(status: u16) -> Option<FailureClass> {
    match status {
        200..=299 => None,
        401 => Some(FailureClass::Auth),
        429 => Some(FailureClass::RateLimited),
        500..=599 => Some(FailureClass::Server),
        400..=499 => Some(FailureClass::Client),
        // Redirects and anything else unexpected
        _ => Some(FailureClass::Malformed),
    }
}

/// Classify a reqwest error that produced no HTTP status
fn classify_request_error(error: &reqwest::Error) -> FailureClass {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        FailureClass::Network
    } else if error.is_decode() || error.is_builder() {
        FailureClass::Malformed
    } else {
        FailureClass::Network
    }
}

/// `min(base * 2^attempt + random(0..1s), 30s)`
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.min(16);
    let scaled = base.saturating_mul(2_u32.saturating_pow(exponent));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
    std::cmp::min(scaled.saturating_add(jitter), MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{new_event_id, EventSource, Properties};
    use chrono::Utc;

    fn make_payload(name: &str) -> EventPayload {
        EventPayload {
            workspace_id: "ws-1".to_string(),
            visitor_id: "visitor-1".to_string(),
            anonymous_id: "anon-1".to_string(),
            session_id: "session-1".to_string(),
            event_id: new_event_id(),
            name: name.to_string(),
            properties: Properties::new(),
            user_id: None,
            user_properties: None,
            source: EventSource::Track,
            timestamp: Utc::now(),
        }
    }

    /// Transport stub whose outcome depends on the event name
    struct ParityTransport;

    #[async_trait]
    impl Transport for ParityTransport {
        async fn send_event(&self, payload: &EventPayload) -> SendResult {
            if payload.name.starts_with("ok") {
                SendResult::ok(200)
            } else {
                SendResult::failed(Some(500), FailureClass::Server)
            }
        }
    }

    /// Transport stub that completes only if both deliveries run at once
    struct BarrierTransport {
        barrier: tokio::sync::Barrier,
    }

    #[async_trait]
    impl Transport for BarrierTransport {
        async fn send_event(&self, _payload: &EventPayload) -> SendResult {
            self.barrier.wait().await;
            SendResult::ok(200)
        }
    }

    #[tokio::test]
    async fn test_send_batch_pairs_results_by_position() {
        let payloads = vec![
            make_payload("ok_first"),
            make_payload("rejected"),
            make_payload("ok_last"),
        ];
        let results = ParityTransport.send_batch(&payloads).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(results[1].failure, Some(FailureClass::Server));
        assert!(results[2].success);
    }

    #[tokio::test]
    async fn test_send_batch_delivers_concurrently() {
        // Each delivery blocks on the barrier, so a sequential batch would
        // never finish
        let transport = BarrierTransport {
            barrier: tokio::sync::Barrier::new(2),
        };
        let payloads = vec![make_payload("ok_a"), make_payload("ok_b")];
        let results = transport.send_batch(&payloads).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
    }

    #[test]
    fn test_transport_requires_valid_config() {
        let config = TransportConfig::default();
        assert!(HttpTransport::new(config).is_err());
    }

    #[test]
    fn test_transport_with_valid_config() {
        let config = TransportConfig {
            endpoint_url: Some("https://in.trackwire.example.com".to_string()),
            api_key: Some("tw_live_test".to_string()),
            workspace_id: Some("ws_1".to_string()),
            ..Default::default()
        };
        assert!(HttpTransport::new(config).is_ok());
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(200), None);
        assert_eq!(classify_status(204), None);
        assert_eq!(classify_status(401), Some(FailureClass::Auth));
        assert_eq!(classify_status(429), Some(FailureClass::RateLimited));
        assert_eq!(classify_status(500), Some(FailureClass::Server));
        assert_eq!(classify_status(503), Some(FailureClass::Server));
        assert_eq!(classify_status(400), Some(FailureClass::Client));
        assert_eq!(classify_status(404), Some(FailureClass::Client));
        assert_eq!(classify_status(301), Some(FailureClass::Malformed));
    }

    #[test]
    fn test_retryability() {
        assert!(FailureClass::Server.is_retryable());
        assert!(FailureClass::Network.is_retryable());
        assert!(!FailureClass::Auth.is_retryable());
        assert!(!FailureClass::Client.is_retryable());
        assert!(!FailureClass::RateLimited.is_retryable());
        assert!(!FailureClass::Malformed.is_retryable());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_millis(500);

        for attempt in 0..4 {
            let scaled = Duration::from_millis(500 * 2_u64.pow(attempt));
            let delay = backoff_delay(base, attempt);
            assert!(delay >= scaled, "attempt {attempt}: {delay:?} < {scaled:?}");
            assert!(delay <= scaled + Duration::from_secs(1));
        }

        // Far past the cap
        assert_eq!(backoff_delay(base, 30), MAX_BACKOFF);
    }

    #[test]
    fn test_rate_limiter_ceiling() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_rate_limiter_window_rolls() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.try_acquire());
    }
}
