//! Request dispatcher — top-level handler for the control plane.
//!
//! Maps a typed request onto its handler, with all dependencies injected
//! at construction. The dispatcher is the only place errors are converted
//! into responses; components below it propagate everything except
//! `RaceLost`.

use tracing::{debug, error, info};

use warden_election::{ElectionOutcome, run_election};
use warden_license::assign_license;
use warden_platform::{PlatformAdapter, ProxyAdapter, Request, RequestType, Response};
use warden_state::{SettingKey, SyncState, WardenError, WardenResult};

use crate::bootstrap::{BootstrapContext, BootstrapStrategy};
use crate::settings::SettingsRegistry;
use crate::sync::{HeartbeatOrchestrator, locate_vm};

/// Lifecycle action completed when a terminating VM is cleaned up.
const LIFECYCLE_TERMINATING: &str = "terminating";

/// Top-level request handler.
pub struct Dispatcher<'a, P, X, B> {
    platform: &'a P,
    proxy: &'a X,
    bootstrap: &'a B,
}

impl<'a, P, X, B> Dispatcher<'a, P, X, B>
where
    P: PlatformAdapter,
    X: ProxyAdapter,
    B: BootstrapStrategy,
{
    pub fn new(platform: &'a P, proxy: &'a X, bootstrap: &'a B) -> Self {
        Self {
            platform,
            proxy,
            bootstrap,
        }
    }

    /// Handle a request, stamping it with the current wall clock.
    pub async fn handle(&self, req: &Request) -> Response {
        self.handle_at(req, epoch_ms()).await
    }

    /// Handle a request at an explicit timestamp (ms).
    pub async fn handle_at(&self, req: &Request, t_now: u64) -> Response {
        match self.dispatch(req, t_now).await {
            Ok(response) => response,
            Err(e) => self.error_response(e),
        }
    }

    async fn dispatch(&self, req: &Request, t_now: u64) -> WardenResult<Response> {
        self.platform.init().await?;
        let settings = SettingsRegistry::load(self.platform).await?;
        if !settings.deployment_settings_saved() {
            return Err(WardenError::ConfigurationMissing(
                SettingKey::DeploymentSettingsSaved.as_str().to_string(),
            ));
        }

        let request_type = self.platform.request_type(req);
        debug!(?request_type, "dispatching request");

        match request_type {
            RequestType::LaunchingVm => self.on_launching(req).await,
            RequestType::LaunchedVm => self.on_launched(req).await,
            RequestType::BootstrapConfig => self.on_bootstrap(req, &settings, t_now).await,
            RequestType::HeartbeatSync => {
                HeartbeatOrchestrator::new(self.platform, self.proxy, &settings)
                    .handle(req, t_now)
                    .await
            }
            RequestType::TerminatingVm => self.on_terminating(req).await,
            RequestType::TerminatedVm => self.on_terminated(req).await,
            // Status reports are accepted and ignored; forwarding is the
            // transport's concern.
            RequestType::StatusMessage
            | RequestType::ServiceForwarding
            | RequestType::Unknown => Ok(self.proxy.format_response(200, "", false)),
        }
    }

    /// Platform hook before a VM launches. No-op default.
    async fn on_launching(&self, req: &Request) -> WardenResult<Response> {
        if let Some(vm_id) = self.platform.request_vm_id(req) {
            debug!(%vm_id, "vm launching");
        }
        Ok(self.proxy.format_response(200, "", false))
    }

    /// A VM finished launching; it joins the fleet with no election.
    async fn on_launched(&self, req: &Request) -> WardenResult<Response> {
        if let Some(vm) = self.platform.get_target_vm(req).await? {
            info!(
                vm_id = %vm.vm_id,
                group = %vm.scaling_group_name,
                "vm launched into fleet"
            );
        }
        Ok(self.proxy.format_response(200, "", false))
    }

    /// Bootstrap: elect if needed, assign a license where hybrid
    /// licensing applies, and return the rendered configuration.
    async fn on_bootstrap(
        &self,
        req: &Request,
        settings: &SettingsRegistry,
        t_now: u64,
    ) -> WardenResult<Response> {
        let vm_id = self
            .platform
            .request_vm_id(req)
            .ok_or_else(|| WardenError::Unauthorized("Instance id not provided".to_string()))?;
        let self_vm = locate_vm(self.platform, settings, vm_id)
            .await?
            .ok_or_else(|| WardenError::Unauthorized(format!("unknown instance {vm_id}")))?;

        let cfg = settings.election_config()?;
        let outcome = run_election(self.platform, self.proxy, &cfg, &self_vm, t_now).await?;
        let (is_primary, primary_ip) = match &outcome {
            ElectionOutcome::Elected { record, finalized } if *finalized => {
                (true, record.ip.clone())
            }
            ElectionOutcome::Elected { .. } => (false, String::new()),
            ElectionOutcome::Incumbent(record) => {
                (record.vm_id == self_vm.vm_id, record.ip.clone())
            }
            // An unresolved or foreign-pending vote leaves the primary
            // unknown; the VM learns it over heartbeats.
            ElectionOutcome::Pending(_) | ElectionOutcome::Vacant => (false, String::new()),
        };

        let license = if settings.hybrid_licensing_enabled()
            && settings.byol_scaling_group() == Some(self_vm.scaling_group_name.as_str())
        {
            let license_cfg = settings.license_config()?;
            let assignment =
                assign_license(self.platform, self.proxy, &license_cfg, &self_vm, t_now).await?;
            Some(assignment.file)
        } else {
            None
        };

        let ctx = BootstrapContext {
            is_primary,
            primary_ip,
            psk_secret: settings.psk_secret().unwrap_or_default().to_string(),
            sync_interface: settings.sync_interface().to_string(),
            traffic_port: settings.traffic_port(),
            admin_port: settings.admin_port(),
            heartbeat_interval: settings.heartbeat_interval()?,
            handler_url: settings.handler_url().unwrap_or_default().to_string(),
            license,
            vm: self_vm,
        };
        let secret = ctx.license.is_some();
        let body = self
            .bootstrap
            .build_config(&ctx)
            .map_err(|e| WardenError::TransientIo(format!("bootstrap strategy failed: {e}")))?;

        info!(%vm_id, is_primary = ctx.is_primary, "bootstrap configuration served");
        Ok(self.proxy.format_response(200, &body, secret))
    }

    /// A VM is leaving: move it out of sync, drop its monitor record, and
    /// purge the primary record if it held the role.
    async fn on_terminating(&self, req: &Request) -> WardenResult<Response> {
        let vm_id = self
            .platform
            .request_vm_id(req)
            .ok_or_else(|| WardenError::Unauthorized("Instance id not provided".to_string()))?;

        if let Some(mut health) = self.platform.get_health_check_record(vm_id).await? {
            health.healthy = false;
            health.sync_state = SyncState::OutOfSync;
            self.platform.update_health_check_record(&health).await?;
        }
        self.platform.delete_health_check_record(vm_id).await?;
        self.purge_if_primary(vm_id).await?;

        self.platform
            .complete_lifecycle_action(vm_id, LIFECYCLE_TERMINATING, false)
            .await?;
        info!(%vm_id, "vm removed from monitoring");
        Ok(self.proxy.format_response(200, "", false))
    }

    /// Final teardown after the platform reports the VM gone.
    async fn on_terminated(&self, req: &Request) -> WardenResult<Response> {
        let vm_id = self
            .platform
            .request_vm_id(req)
            .ok_or_else(|| WardenError::Unauthorized("Instance id not provided".to_string()))?;

        self.platform.delete_health_check_record(vm_id).await?;
        self.purge_if_primary(vm_id).await?;
        info!(%vm_id, "vm teardown finalized");
        Ok(self.proxy.format_response(200, "", false))
    }

    /// Purge the primary record when the leaving VM holds it. A lost
    /// purge race means someone else already cleared it.
    async fn purge_if_primary(&self, vm_id: &str) -> WardenResult<()> {
        if let Some(record) = self.platform.get_primary_record().await?
            && record.vm_id == vm_id
        {
            match self.platform.delete_primary_record(&record.id).await {
                Ok(()) | Err(WardenError::RaceLost(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn error_response(&self, err: WardenError) -> Response {
        match err {
            WardenError::Unauthorized(msg) => {
                error!(%msg, "request rejected");
                self.proxy.format_response(403, &msg, false)
            }
            WardenError::LicenseExhausted => {
                error!("license pool exhausted");
                self.proxy.format_response(500, "No license available", false)
            }
            e => {
                error!(error = %e, "request failed");
                let body = serde_json::json!({ "message": e.to_string() }).to_string();
                self.proxy.format_response(500, &body, false)
            }
        }
    }
}

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
