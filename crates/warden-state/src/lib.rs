//! warden-state — embedded state store for the Warden control plane.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state management for settings, heartbeat health records, the primary
//! election record, and the license stock/usage tables.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! The primary record lives under a fixed singleton key; license tables use
//! `{product}:{id}` composite keys for prefix scans.
//!
//! Cross-handler ordering in the control plane rests entirely on this
//! store's conditional writes: the singleton primary record, the
//! unique-per-VM health record, and the unique-per-VM license usage row are
//! all guarded by compare-before-write inside a single write transaction.
//! A failed comparison surfaces as [`WardenError::RaceLost`], which callers
//! treat as a retryable collision rather than a failure.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod keys;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{WardenError, WardenResult};
pub use keys::SettingKey;
pub use store::StateStore;
pub use types::*;
