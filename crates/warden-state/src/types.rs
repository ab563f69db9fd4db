//! Domain types for the Warden control plane.
//!
//! These types represent the persisted state of the fleet: VM identity,
//! per-VM heartbeat health, the singleton primary election record, and the
//! license stock/usage tables. All persisted types are serializable to/from
//! JSON for storage in redb tables.
//!
//! Timestamps are absolute unix milliseconds (`u64`); intervals are seconds
//! (`u32`).

use serde::{Deserialize, Serialize};

/// Unique identifier of a VM within the fleet.
pub type VmId = String;

// ── Virtual machine ────────────────────────────────────────────────

/// Identity of a VM as seen by the platform.
///
/// Immutable for the lifetime of a VM; a re-launch produces a new `vm_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VirtualMachine {
    pub vm_id: VmId,
    pub scaling_group_name: String,
    pub primary_private_ip: String,
    pub primary_public_ip: Option<String>,
    pub virtual_network_id: String,
    pub subnet_id: String,
}

// ── Heartbeat health ───────────────────────────────────────────────

/// Whether a VM is participating in the cluster.
///
/// An out-of-sync VM is no longer eligible for the primary role and is not
/// counted as participating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    #[serde(rename = "in-sync")]
    InSync,
    #[serde(rename = "out-of-sync")]
    OutOfSync,
}

/// Per-VM heartbeat monitor record. Exactly one exists per live `vm_id`.
///
/// Created on first accepted heartbeat or by the bootstrap path; mutated
/// only by the heartbeat sync path; deleted when the VM is removed by the
/// lifecycle handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheckRecord {
    pub vm_id: VmId,
    pub scaling_group_name: String,
    pub ip: String,
    /// Private IP of the primary this VM currently follows; may be empty.
    pub primary_ip: String,
    /// Expected seconds between heartbeats. Always > 0.
    pub heartbeat_interval: u32,
    /// Consecutive heartbeats counted as lost.
    pub heartbeat_loss_count: u32,
    /// Absolute ms deadline for the next heartbeat. Strictly advances when
    /// a heartbeat is accepted.
    pub next_heartbeat_time: u64,
    pub sync_state: SyncState,
    /// Consecutive on-time heartbeats observed while recovering.
    pub sync_recovery_count: u32,
    /// Count of accepted heartbeats, monotonic per VM.
    pub seq: u64,
    pub healthy: bool,
    pub up_to_date: bool,
    /// Device-reported send timestamp of the last heartbeat (ms).
    pub send_time: u64,
    /// Device-reported auxiliary fields, passed through unparsed.
    pub device_sync_time: Option<u64>,
    pub device_sync_fail_time: Option<u64>,
    pub device_sync_status: Option<String>,
    pub device_is_primary: bool,
    pub device_checksum: Option<String>,
}

impl HealthCheckRecord {
    /// Build the record for a VM's first accepted heartbeat.
    pub fn first_heartbeat(
        vm: &VirtualMachine,
        primary_ip: &str,
        heartbeat_interval: u32,
        t_now: u64,
    ) -> Self {
        Self {
            vm_id: vm.vm_id.clone(),
            scaling_group_name: vm.scaling_group_name.clone(),
            ip: vm.primary_private_ip.clone(),
            primary_ip: primary_ip.to_string(),
            heartbeat_interval,
            heartbeat_loss_count: 0,
            next_heartbeat_time: t_now + u64::from(heartbeat_interval) * 1000,
            sync_state: SyncState::InSync,
            sync_recovery_count: 0,
            seq: 1,
            healthy: true,
            up_to_date: true,
            send_time: t_now,
            device_sync_time: None,
            device_sync_fail_time: None,
            device_sync_status: None,
            device_is_primary: false,
            device_checksum: None,
        }
    }
}

// ── Primary election ───────────────────────────────────────────────

/// Lifecycle state of the primary election record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteState {
    /// Election in progress; the candidate is not yet authoritative.
    Pending,
    /// The candidate is the authoritative primary until purged.
    Done,
    /// Terminal tombstone, equivalent to absence for the next election.
    Timeout,
}

/// The singleton primary election record.
///
/// At most one exists per scaling-group family. All writers use a
/// conditional put keyed by the current `id` (or absence).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrimaryRecord {
    /// Opaque token used for conditional writes.
    pub id: String,
    pub vm_id: VmId,
    pub ip: String,
    pub scaling_group_name: String,
    pub virtual_network_id: String,
    pub subnet_id: String,
    /// Absolute ms deadline for the pending vote.
    pub vote_end_time: u64,
    pub vote_state: VoteState,
}

impl PrimaryRecord {
    /// Build a pending candidacy record for `vm`.
    pub fn candidate(vm: &VirtualMachine, vote_end_time: u64) -> Self {
        Self {
            id: format!("{}-{vote_end_time}", vm.vm_id),
            vm_id: vm.vm_id.clone(),
            ip: vm.primary_private_ip.clone(),
            scaling_group_name: vm.scaling_group_name.clone(),
            virtual_network_id: vm.virtual_network_id.clone(),
            subnet_id: vm.subnet_id.clone(),
            vote_end_time,
            vote_state: VoteState::Pending,
        }
    }
}

// ── Licensing ──────────────────────────────────────────────────────

/// A license artifact present in blob storage.
///
/// `content` is loaded lazily; listings carry only metadata and checksum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LicenseFile {
    pub file_name: String,
    /// Content hash, the stable identity of the file across tables.
    pub checksum: String,
    pub algorithm: String,
    pub content: Option<String>,
}

/// Metadata of a license known to the pool, keyed by checksum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LicenseStockRecord {
    pub checksum: String,
    pub file_name: String,
    pub algorithm: String,
    pub product_name: String,
}

/// Assignment of one license checksum to one VM.
///
/// At most one usage exists per `vm_id` at any instant (conditional insert).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LicenseUsageRecord {
    pub vm_id: VmId,
    pub checksum: String,
    pub file_name: String,
    /// Cached from the last reconciliation against health records.
    pub vm_in_sync: bool,
    pub product_name: String,
    /// Absolute ms timestamp of the assignment.
    pub assigned_at: u64,
}

// ── Settings ───────────────────────────────────────────────────────

/// One persisted configuration tuple.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettingItem {
    pub key: String,
    pub value: String,
    pub description: String,
    pub editable: bool,
    pub json_encoded: bool,
}

impl SettingItem {
    /// Build a plain (non-JSON) editable setting.
    pub fn new(key: &str, value: &str, description: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            description: description.to_string(),
            editable: true,
            json_encoded: false,
        }
    }
}

impl LicenseStockRecord {
    /// Build the composite key for the license stock table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.product_name, self.checksum)
    }
}

impl LicenseUsageRecord {
    /// Build the composite key for the license usage table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.product_name, self.vm_id)
    }
}
