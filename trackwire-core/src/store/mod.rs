//! Durable storage layer for trackwire
//!
//! This module provides the persistence layer using SQLite with:
//! - Schema migrations
//! - A typed key-value surface split into a general and a sensitive scope
//!
//! The durable queue serializes its whole collection as one blob under one
//! key; collaborators keep their scalar identifiers (visitor, session, device)
//! here as well. Sensitive keys (identifiers, credentials) live in their own
//! table so the host can apply stronger platform protection to that subset.

pub mod kv;
pub mod schema;

pub use kv::{KeyValueStore, Scope};
