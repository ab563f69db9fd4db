//! warden-election — primary election over conditional KV writes.
//!
//! The singleton primary record moves through
//! `absent → pending → done → absent`, with `timeout` as a tombstone
//! equivalent to absence. There is no consensus protocol: the KV store's
//! conditional create/update/delete serializes candidacy, so the single
//! writer that created the pending record is the sole candidate and no
//! tie-break is needed.

pub mod machine;
pub mod runner;

pub use machine::{ElectionAssessment, assess};
pub use runner::{ElectionConfig, ElectionOutcome, run_election};
