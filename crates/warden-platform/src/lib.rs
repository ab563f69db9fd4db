//! warden-platform — cloud and transport adapter seams for Warden.
//!
//! The control plane core never talks to a cloud SDK directly. All cloud
//! I/O (VM describe, KV store with conditional writes, blob listing, fleet
//! actions, request parsing) goes through the [`PlatformAdapter`] trait;
//! all request-context concerns (log sink, response formatting, the
//! remaining-execution-time clock consumed by bounded waiters) go through
//! the [`ProxyAdapter`] trait.
//!
//! [`MemoryPlatform`] is the reference implementation: an in-process fleet
//! and blob model over the redb-backed `StateStore`. Every test in the
//! workspace runs against it, and it doubles as a single-node local
//! platform.

pub mod adapter;
pub mod memory;
pub mod proxy;
pub mod request;

pub use adapter::{PlatformAdapter, VmDescriptor};
pub use memory::MemoryPlatform;
pub use proxy::{LogLevel, ProxyAdapter, Response, TracingProxy};
pub use request::{DeviceReport, HeartbeatInterval, LifecycleTransition, Request, RequestType};
