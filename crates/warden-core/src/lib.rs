//! warden-core — request dispatch for the Warden control plane.
//!
//! Ties the leaf components together: the settings registry resolves
//! typed configuration through the platform adapter, the heartbeat
//! orchestrator glues health classification to primary election, and the
//! dispatcher maps each typed request onto its handler. All dependencies
//! are injected at construction; there is no global state.

pub mod bootstrap;
pub mod dispatch;
pub mod settings;
pub mod sync;

pub use bootstrap::{BootstrapContext, BootstrapStrategy, PlainBootstrap};
pub use dispatch::Dispatcher;
pub use settings::SettingsRegistry;
pub use sync::HeartbeatOrchestrator;
