//! The platform adapter — the core's only window onto the cloud.
//!
//! Implementations wrap a concrete cloud SDK (or, for
//! [`MemoryPlatform`](crate::memory::MemoryPlatform), an in-process
//! model). Every method can suspend and every failure is a categorized
//! [`WardenError`](warden_state::WardenError); `RaceLost` is the only
//! non-fatal variant.

use warden_state::{
    HealthCheckRecord, LicenseFile, LicenseStockRecord, LicenseUsageRecord, PrimaryRecord,
    SettingItem, VirtualMachine, WardenResult,
};

use crate::request::{HeartbeatInterval, Request, RequestType};

/// Selector for [`PlatformAdapter::describe_vm`]. May name a VM, a scaling
/// group, or both; an empty descriptor matches nothing.
#[derive(Debug, Clone, Default)]
pub struct VmDescriptor {
    pub vm_id: Option<String>,
    pub scaling_group_name: Option<String>,
}

impl VmDescriptor {
    /// Select a VM by id in any scaling group.
    pub fn by_id(vm_id: &str) -> Self {
        Self {
            vm_id: Some(vm_id.to_string()),
            scaling_group_name: None,
        }
    }

    /// Select a VM by id within one scaling group.
    pub fn in_group(vm_id: &str, group: &str) -> Self {
        Self {
            vm_id: Some(vm_id.to_string()),
            scaling_group_name: Some(group.to_string()),
        }
    }
}

/// Capability set required by the control plane core.
#[allow(async_fn_in_trait)]
pub trait PlatformAdapter: Send + Sync {
    /// Initialize the adapter. Called once per handler invocation before
    /// any other method.
    async fn init(&self) -> WardenResult<()>;

    // ── Request parsing ────────────────────────────────────────────

    /// Classify an incoming request.
    fn request_type(&self, req: &Request) -> RequestType;

    /// Extract the reporting VM's id, if present.
    fn request_vm_id<'r>(&self, req: &'r Request) -> Option<&'r str>;

    /// Extract the heartbeat interval carried by the request.
    fn request_heartbeat_interval(&self, req: &Request) -> WardenResult<HeartbeatInterval>;

    // ── Fleet ──────────────────────────────────────────────────────

    /// Look up a VM matching the descriptor, or `None`.
    async fn describe_vm(&self, desc: &VmDescriptor) -> WardenResult<Option<VirtualMachine>>;

    /// The VM a request reports for, if the platform knows it.
    async fn get_target_vm(&self, req: &Request) -> WardenResult<Option<VirtualMachine>> {
        match self.request_vm_id(req) {
            Some(vm_id) => self.describe_vm(&VmDescriptor::by_id(vm_id)).await,
            None => Ok(None),
        }
    }

    /// The VM named by the current primary record, if both exist.
    async fn get_primary_vm(&self) -> WardenResult<Option<VirtualMachine>>;

    /// Whether two VM identities refer to the same VM.
    fn vm_equals(&self, a: &VirtualMachine, b: &VirtualMachine) -> bool {
        a.vm_id == b.vm_id && a.scaling_group_name == b.scaling_group_name
    }

    /// Terminate and deregister a VM. Idempotent.
    async fn delete_vm(&self, vm: &VirtualMachine) -> WardenResult<()>;

    /// Complete a pending scaling-group lifecycle action for a VM.
    async fn complete_lifecycle_action(
        &self,
        vm_id: &str,
        action: &str,
        abandon: bool,
    ) -> WardenResult<()>;

    // ── Settings ───────────────────────────────────────────────────

    async fn get_settings(&self) -> WardenResult<Vec<SettingItem>>;

    async fn set_setting(&self, item: &SettingItem) -> WardenResult<()>;

    // ── Health records ─────────────────────────────────────────────

    async fn get_health_check_record(&self, vm_id: &str)
    -> WardenResult<Option<HealthCheckRecord>>;

    /// Conditional create; `RaceLost` if the VM already has a record.
    async fn create_health_check_record(&self, record: &HealthCheckRecord) -> WardenResult<()>;

    async fn update_health_check_record(&self, record: &HealthCheckRecord) -> WardenResult<()>;

    async fn delete_health_check_record(&self, vm_id: &str) -> WardenResult<bool>;

    // ── Primary record ─────────────────────────────────────────────

    async fn get_primary_record(&self) -> WardenResult<Option<PrimaryRecord>>;

    /// Conditional put keyed by the current record's `id` (`None` when the
    /// record is expected absent). `RaceLost` on mismatch.
    async fn create_primary_record(
        &self,
        record: &PrimaryRecord,
        expected_id: Option<&str>,
    ) -> WardenResult<()>;

    /// Conditional update; `RaceLost` unless the stored `id` matches.
    async fn update_primary_record(&self, record: &PrimaryRecord) -> WardenResult<()>;

    /// Conditional delete; `RaceLost` unless the stored `id` matches.
    async fn delete_primary_record(&self, expected_id: &str) -> WardenResult<()>;

    // ── License I/O ────────────────────────────────────────────────

    /// List license files under `container`/`dir` with checksums computed;
    /// content is not loaded.
    async fn list_license_files(&self, container: &str, dir: &str)
    -> WardenResult<Vec<LicenseFile>>;

    /// Fetch one license file's content.
    async fn load_license_file_content(&self, container: &str, path: &str)
    -> WardenResult<String>;

    async fn list_license_stock(&self, product: &str) -> WardenResult<Vec<LicenseStockRecord>>;

    async fn list_license_usage(&self, product: &str) -> WardenResult<Vec<LicenseUsageRecord>>;

    async fn update_license_stock(
        &self,
        product: &str,
        upsert: &[LicenseStockRecord],
        delete: &[String],
    ) -> WardenResult<()>;

    /// Conditional insert unique on `vm_id`; `RaceLost` on collision.
    async fn insert_license_usage(&self, record: &LicenseUsageRecord) -> WardenResult<()>;

    async fn update_license_usage(
        &self,
        product: &str,
        upsert: &[LicenseUsageRecord],
        delete: &[String],
    ) -> WardenResult<()>;
}
