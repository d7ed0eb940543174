//! # trackwire-core
//!
//! Core library for trackwire - a client library that records behavioral and
//! attribution events and ships them to a collection endpoint.
//!
//! This library provides:
//! - Domain types for events and property bags
//! - A durable, capacity-bounded delivery queue with at-least-once semantics
//! - An HTTP transport with auth, rate limiting, and backoff retry
//! - A SQLite-backed key-value store split into general and sensitive scopes
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Every producer hands events to one [`Pipeline`] owned by the host's
//! composition root:
//! - **Facade:** validates and sizes the event, stamps identity, enqueues
//! - **Durable Queue:** persists entries, drives flush cycles, owns retry/drop
//! - **Transport:** one network call per event, classified outcomes as values
//!
//! The worst case under a fully broken network is silent loss bounded by
//! `max_queue_size` events and `max_retry_count` attempts per event; nothing
//! is ever surfaced synchronously to a `track` caller.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trackwire_core::{Config, KeyValueStore, Pipeline, Properties};
//!
//! # async fn example() -> trackwire_core::Result<()> {
//! let config = Config::load()?;
//! let store = Arc::new(KeyValueStore::open_default()?);
//! let pipeline = Pipeline::new(config, store)?;
//!
//! pipeline.track("signup_completed", Properties::new());
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::{DurableQueue, Pipeline, QueueStats, SendResult, Transport};
pub use store::{KeyValueStore, Scope};
pub use types::*;

// Public modules
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod store;
pub mod types;
