//! Heartbeat sync orchestration.
//!
//! One invocation per reporting VM: authorize the caller, classify the
//! heartbeat, drive an election when no healthy primary exists, and
//! produce the response envelope. The device on the other end sees only
//! three bodies: the empty string, `{"master-ip":"<ip>"}` when the
//! primary it should follow changed, and `{"action":"shutdown"}` when it
//! has been dropped from the cluster.

use tracing::{info, warn};

use warden_election::{ElectionOutcome, run_election};
use warden_health::{HealthCheckEngine, HealthCheckResult};
use warden_platform::{
    DeviceReport, HeartbeatInterval, PlatformAdapter, ProxyAdapter, Request, Response,
    VmDescriptor,
};
use warden_state::{
    HealthCheckRecord, PrimaryRecord, SettingItem, SettingKey, SyncState, VirtualMachine,
    VoteState, WardenError, WardenResult,
};

use crate::settings::SettingsRegistry;

/// Lifecycle action completed when a VM's first heartbeat lands.
const LIFECYCLE_LAUNCHING: &str = "launching";

/// Glues health classification to primary election for one heartbeat.
pub struct HeartbeatOrchestrator<'a, P, X> {
    platform: &'a P,
    proxy: &'a X,
    settings: &'a SettingsRegistry,
}

impl<'a, P: PlatformAdapter, X: ProxyAdapter> HeartbeatOrchestrator<'a, P, X> {
    pub fn new(platform: &'a P, proxy: &'a X, settings: &'a SettingsRegistry) -> Self {
        Self {
            platform,
            proxy,
            settings,
        }
    }

    /// Handle one heartbeat arriving at `t_now` (ms).
    pub async fn handle(&self, req: &Request, t_now: u64) -> WardenResult<Response> {
        let vm_id = self
            .platform
            .request_vm_id(req)
            .ok_or_else(|| WardenError::Unauthorized("Instance id not provided".to_string()))?;
        let interval_req = self.platform.request_heartbeat_interval(req)?;

        let self_vm = locate_vm(self.platform, self.settings, vm_id)
            .await?
            .ok_or_else(|| WardenError::Unauthorized(format!("unknown instance {vm_id}")))?;

        if let Some(expected) = self.settings.virtual_network_id()
            && expected != self_vm.virtual_network_id
        {
            return Err(WardenError::Unauthorized(format!(
                "instance {vm_id} reports from network {}, expected {expected}",
                self_vm.virtual_network_id
            )));
        }

        let self_health = self.platform.get_health_check_record(vm_id).await?;

        // A VM dropped out of sync gets no further instructions until it
        // is explicitly reset.
        if let Some(health) = &self_health
            && health.sync_state == SyncState::OutOfSync
            && !health.healthy
        {
            return Ok(self.proxy.format_response(200, "", false));
        }

        let primary_group = self.settings.primary_scaling_group()?.to_string();
        let self_unhealthy = self_health.as_ref().is_some_and(|h| !h.healthy);

        let mut primary_record = self.platform.get_primary_record().await?;
        let mut lifecycle_should_abandon = false;

        if !self_unhealthy {
            let cfg = self.settings.election_config()?;
            match run_election(self.platform, self.proxy, &cfg, &self_vm, t_now).await {
                Ok(ElectionOutcome::Elected { record, finalized }) => {
                    if finalized {
                        primary_record = Some(record);
                    } else {
                        // The vote could not be finalized; clear it and
                        // let the lifecycle hook abandon this launch.
                        match self.platform.delete_primary_record(&record.id).await {
                            Ok(()) | Err(WardenError::RaceLost(_)) => {}
                            Err(e) => return Err(e),
                        }
                        lifecycle_should_abandon = true;
                        primary_record = self.platform.get_primary_record().await?;
                    }
                }
                Ok(ElectionOutcome::Incumbent(record)) => primary_record = Some(record),
                Ok(ElectionOutcome::Pending(record)) => primary_record = Some(record),
                Ok(ElectionOutcome::Vacant) => primary_record = None,
                Err(WardenError::ElectionTimeout(reason)) => {
                    self.abandon_self(&self_vm, primary_record.as_ref()).await?;
                    return Err(WardenError::ElectionTimeout(reason));
                }
                Err(e) => return Err(e),
            }
        }

        let (primary_ip, primary_pending) = match &primary_record {
            Some(r) if r.vote_state == VoteState::Done => (r.ip.clone(), false),
            Some(r) if r.vote_state == VoteState::Pending => (r.ip.clone(), true),
            _ => (String::new(), false),
        };
        let self_is_primary = primary_record.as_ref().is_some_and(|r| {
            r.vote_state == VoteState::Done
                && r.vm_id == self_vm.vm_id
                && self_vm.scaling_group_name == primary_group
        });

        match self_health {
            None => {
                self.first_heartbeat(
                    &self_vm,
                    req.device.as_ref(),
                    interval_req,
                    &primary_ip,
                    primary_pending,
                    self_is_primary,
                    lifecycle_should_abandon,
                    t_now,
                )
                .await
            }
            Some(health) if health.healthy => {
                self.continuing_heartbeat(
                    &self_vm,
                    health,
                    req.device.as_ref(),
                    interval_req,
                    &primary_ip,
                    t_now,
                )
                .await
            }
            Some(health) => self.failing_heartbeat(&self_vm, health).await,
        }
    }

    /// First accepted heartbeat: complete the launch lifecycle action and
    /// insert the monitor record.
    #[allow(clippy::too_many_arguments)]
    async fn first_heartbeat(
        &self,
        self_vm: &VirtualMachine,
        device: Option<&DeviceReport>,
        interval_req: HeartbeatInterval,
        primary_ip: &str,
        primary_pending: bool,
        self_is_primary: bool,
        lifecycle_should_abandon: bool,
        t_now: u64,
    ) -> WardenResult<Response> {
        self.platform
            .complete_lifecycle_action(&self_vm.vm_id, LIFECYCLE_LAUNCHING, lifecycle_should_abandon)
            .await?;

        // With no-wait elections a pending vote is not worth following
        // yet; the VM learns the primary on a later heartbeat.
        let followed_ip = if primary_pending && self.settings.election_no_wait() {
            ""
        } else {
            primary_ip
        };

        let interval = match interval_req {
            HeartbeatInterval::Seconds(n) => n,
            HeartbeatInterval::UseExisting => self.settings.heartbeat_interval()?,
        };

        let mut record = HealthCheckRecord::first_heartbeat(self_vm, followed_ip, interval, t_now);
        apply_device_report(&mut record, device);
        match self.platform.create_health_check_record(&record).await {
            Ok(()) => {}
            // Duplicate delivery of the first heartbeat; the winner's
            // record stands.
            Err(WardenError::RaceLost(_)) => {
                warn!(vm_id = %self_vm.vm_id, "first heartbeat delivered twice");
            }
            Err(e) => return Err(e),
        }
        info!(
            vm_id = %self_vm.vm_id,
            interval,
            primary_ip = %followed_ip,
            "vm joined heartbeat monitor"
        );

        if self_is_primary {
            // The new primary's vm id doubles as the fleet's initial
            // device credential.
            let item = SettingItem::new(
                SettingKey::DefaultPassword.as_str(),
                &self_vm.vm_id,
                "initial device credential",
            );
            self.platform.set_setting(&item).await?;
            return Ok(self.proxy.format_response(200, "", false));
        }

        if followed_ip.is_empty() {
            Ok(self.proxy.format_response(200, "", false))
        } else {
            Ok(self
                .proxy
                .format_response(200, &master_ip_body(followed_ip), false))
        }
    }

    /// Subsequent heartbeat from a healthy VM: classify and update.
    async fn continuing_heartbeat(
        &self,
        self_vm: &VirtualMachine,
        mut health: HealthCheckRecord,
        device: Option<&DeviceReport>,
        interval_req: HeartbeatInterval,
        primary_ip: &str,
        t_now: u64,
    ) -> WardenResult<Response> {
        apply_device_report(&mut health, device);
        if let HeartbeatInterval::Seconds(n) = interval_req
            && n != health.heartbeat_interval
        {
            info!(
                vm_id = %self_vm.vm_id,
                from = health.heartbeat_interval,
                to = n,
                "heartbeat interval replaced"
            );
            health.heartbeat_interval = n;
        }

        let engine = HealthCheckEngine::new(self.settings.health_policy());
        let result = engine.classify(&mut health, t_now);

        if result == HealthCheckResult::Dropped {
            health.send_time = t_now;
            self.platform.update_health_check_record(&health).await?;
            self.platform.delete_vm(self_vm).await?;
            warn!(vm_id = %self_vm.vm_id, "vm dropped, shutdown directed");
            return Ok(self.proxy.format_response(200, &shutdown_body(), false));
        }

        let changed = !primary_ip.is_empty() && primary_ip != health.primary_ip;
        if changed {
            health.primary_ip = primary_ip.to_string();
        }
        health.send_time = t_now;
        self.platform.update_health_check_record(&health).await?;

        if changed {
            Ok(self
                .proxy
                .format_response(200, &master_ip_body(primary_ip), false))
        } else {
            Ok(self.proxy.format_response(200, "", false))
        }
    }

    /// Heartbeat from a VM already judged unhealthy: drop it from the
    /// cluster and direct a shutdown.
    async fn failing_heartbeat(
        &self,
        self_vm: &VirtualMachine,
        mut health: HealthCheckRecord,
    ) -> WardenResult<Response> {
        if health.sync_state == SyncState::InSync {
            health.sync_state = SyncState::OutOfSync;
            self.platform.update_health_check_record(&health).await?;
            self.platform.delete_vm(self_vm).await?;
            warn!(vm_id = %self_vm.vm_id, "unhealthy vm moved out of sync and terminated");
        }
        Ok(self.proxy.format_response(200, &shutdown_body(), false))
    }

    /// Election-timeout recovery: take this VM out of monitoring, clear
    /// its own stale vote if it holds one, and terminate it.
    async fn abandon_self(
        &self,
        self_vm: &VirtualMachine,
        primary_record: Option<&PrimaryRecord>,
    ) -> WardenResult<()> {
        warn!(vm_id = %self_vm.vm_id, "election timed out, removing self from cluster");
        self.platform
            .delete_health_check_record(&self_vm.vm_id)
            .await?;
        if let Some(record) = primary_record
            && record.vm_id == self_vm.vm_id
        {
            match self.platform.delete_primary_record(&record.id).await {
                Ok(()) | Err(WardenError::RaceLost(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.platform.delete_vm(self_vm).await
    }
}

/// Locate the reporting VM: BYOL group first, then PAYG, then the primary
/// group as a fallback for deployments without hybrid licensing.
pub(crate) async fn locate_vm<P: PlatformAdapter>(
    platform: &P,
    settings: &SettingsRegistry,
    vm_id: &str,
) -> WardenResult<Option<VirtualMachine>> {
    let mut groups: Vec<&str> = Vec::new();
    if let Some(byol) = settings.byol_scaling_group() {
        groups.push(byol);
    }
    if let Some(payg) = settings.payg_scaling_group() {
        groups.push(payg);
    }
    if let Ok(primary) = settings.primary_scaling_group()
        && !groups.contains(&primary)
    {
        groups.push(primary);
    }

    for group in groups {
        let desc = VmDescriptor::in_group(vm_id, group);
        if let Some(vm) = platform.describe_vm(&desc).await? {
            return Ok(Some(vm));
        }
    }
    Ok(None)
}

/// Copy device-reported sync telemetry onto the health record.
fn apply_device_report(record: &mut HealthCheckRecord, report: Option<&DeviceReport>) {
    if let Some(report) = report {
        record.device_sync_time = report.sync_time;
        record.device_sync_fail_time = report.sync_fail_time;
        record.device_sync_status = report.sync_status.clone();
        record.device_is_primary = report.is_primary;
        record.device_checksum = report.checksum.clone();
    }
}

fn master_ip_body(ip: &str) -> String {
    serde_json::json!({ "master-ip": ip }).to_string()
}

fn shutdown_body() -> String {
    serde_json::json!({ "action": "shutdown" }).to_string()
}
