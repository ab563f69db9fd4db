//! warden-license — reusable license assignment from a shared pool.
//!
//! Reconciles the license blob inventory against the stock and usage
//! tables, then assigns a license to a requesting VM: idempotently for a
//! VM that already holds one, from unused stock when available, by
//! recycling an out-of-sync holder's license otherwise, and failing with
//! `LicenseExhausted` when the pool is empty.

pub mod strategy;

pub use strategy::{LicenseAssignment, LicenseConfig, LicenseOutcome, assign_license};
