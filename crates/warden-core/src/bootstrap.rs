//! Bootstrap strategy seam.
//!
//! The core does not render device configuration templates; it hands a
//! [`BootstrapContext`] to a strategy supplied at dispatcher construction
//! and returns whatever configuration string comes back.

use warden_state::{LicenseFile, VirtualMachine};

/// Everything a strategy may need to produce the final configuration.
#[derive(Debug, Clone)]
pub struct BootstrapContext {
    pub vm: VirtualMachine,
    /// Whether the requesting VM holds the primary role.
    pub is_primary: bool,
    /// Private IP of the primary to follow; empty while undecided.
    pub primary_ip: String,
    pub psk_secret: String,
    pub sync_interface: String,
    pub traffic_port: u32,
    pub admin_port: u32,
    pub heartbeat_interval: u32,
    /// Callback URL the device reports heartbeats to.
    pub handler_url: String,
    /// License assigned from the shared pool, when hybrid licensing
    /// applies to this VM.
    pub license: Option<LicenseFile>,
}

/// Produces the final configuration string delivered to a booting VM.
pub trait BootstrapStrategy: Send + Sync {
    fn build_config(&self, ctx: &BootstrapContext) -> anyhow::Result<String>;
}

/// Reference strategy: a flat key/value rendition of the context, with
/// the license content appended when present. Real deployments substitute
/// a template-driven strategy.
pub struct PlainBootstrap;

impl BootstrapStrategy for PlainBootstrap {
    fn build_config(&self, ctx: &BootstrapContext) -> anyhow::Result<String> {
        let mut config = String::new();
        config.push_str(&format!("role = {}\n", if ctx.is_primary { "primary" } else { "secondary" }));
        config.push_str(&format!("primary-ip = {}\n", ctx.primary_ip));
        config.push_str(&format!("sync-interface = {}\n", ctx.sync_interface));
        config.push_str(&format!("psk-secret = {}\n", ctx.psk_secret));
        config.push_str(&format!("traffic-port = {}\n", ctx.traffic_port));
        config.push_str(&format!("admin-port = {}\n", ctx.admin_port));
        config.push_str(&format!("heartbeat-interval = {}\n", ctx.heartbeat_interval));
        config.push_str(&format!("callback-url = {}\n", ctx.handler_url));
        if let Some(license) = &ctx.license
            && let Some(content) = &license.content
        {
            config.push_str(content);
            config.push('\n');
        }
        Ok(config)
    }
}
