//! MemoryPlatform — in-process reference implementation of the platform
//! adapter.
//!
//! Models the fleet and blob storage in memory and delegates all persisted
//! state to the redb-backed `StateStore`, so its conditional writes carry
//! the same linearizable semantics a real cloud KV store provides. Records
//! terminated VMs and completed lifecycle actions so tests can assert on
//! them.

use std::collections::HashMap;
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use tracing::debug;

use warden_state::{
    HealthCheckRecord, LicenseFile, LicenseStockRecord, LicenseUsageRecord, PrimaryRecord,
    SettingItem, SettingKey, StateStore, VirtualMachine, WardenResult,
};

use crate::adapter::{PlatformAdapter, VmDescriptor};
use crate::request::{self, HeartbeatInterval, Request, RequestType};

/// A completed lifecycle action, for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleCompletion {
    pub vm_id: String,
    pub action: String,
    pub abandon: bool,
}

/// In-process platform: fleet + blob model over a `StateStore`.
pub struct MemoryPlatform {
    store: StateStore,
    fleet: Mutex<HashMap<String, VirtualMachine>>,
    /// container → [(path, content)]
    blobs: Mutex<HashMap<String, Vec<(String, String)>>>,
    terminated: Mutex<Vec<String>>,
    lifecycle_actions: Mutex<Vec<LifecycleCompletion>>,
}

impl MemoryPlatform {
    /// A platform over a fresh in-memory store.
    pub fn new() -> WardenResult<Self> {
        Ok(Self::with_store(StateStore::open_in_memory()?))
    }

    /// A platform over an existing store.
    pub fn with_store(store: StateStore) -> Self {
        Self {
            store,
            fleet: Mutex::new(HashMap::new()),
            blobs: Mutex::new(HashMap::new()),
            terminated: Mutex::new(Vec::new()),
            lifecycle_actions: Mutex::new(Vec::new()),
        }
    }

    /// The backing store.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Register a VM in the fleet.
    pub fn add_vm(&self, vm: VirtualMachine) {
        self.fleet.lock().unwrap().insert(vm.vm_id.clone(), vm);
    }

    /// Place a license blob under `{dir}/{file_name}` in `container`.
    pub fn add_license_blob(&self, container: &str, dir: &str, file_name: &str, content: &str) {
        let path = format!("{dir}/{file_name}");
        self.blobs
            .lock()
            .unwrap()
            .entry(container.to_string())
            .or_default()
            .push((path, content.to_string()));
    }

    /// Remove a license blob, simulating pool shrinkage.
    pub fn remove_license_blob(&self, container: &str, dir: &str, file_name: &str) {
        let path = format!("{dir}/{file_name}");
        if let Some(entries) = self.blobs.lock().unwrap().get_mut(container) {
            entries.retain(|(p, _)| *p != path);
        }
    }

    /// Seed a recognized setting.
    pub fn seed_setting(&self, key: SettingKey, value: &str) -> WardenResult<()> {
        self.store.put_setting(&SettingItem::new(key.as_str(), value, ""))
    }

    /// VM ids terminated through `delete_vm`, in order.
    pub fn terminated_vms(&self) -> Vec<String> {
        self.terminated.lock().unwrap().clone()
    }

    /// Lifecycle actions completed through `complete_lifecycle_action`.
    pub fn completed_lifecycle_actions(&self) -> Vec<LifecycleCompletion> {
        self.lifecycle_actions.lock().unwrap().clone()
    }
}

impl PlatformAdapter for MemoryPlatform {
    async fn init(&self) -> WardenResult<()> {
        Ok(())
    }

    fn request_type(&self, req: &Request) -> RequestType {
        request::classify(req)
    }

    fn request_vm_id<'r>(&self, req: &'r Request) -> Option<&'r str> {
        req.instance_id.as_deref()
    }

    fn request_heartbeat_interval(&self, req: &Request) -> WardenResult<HeartbeatInterval> {
        request::parse_interval(req)
    }

    async fn describe_vm(&self, desc: &VmDescriptor) -> WardenResult<Option<VirtualMachine>> {
        let fleet = self.fleet.lock().unwrap();
        if let Some(vm_id) = &desc.vm_id {
            let found = fleet.get(vm_id).filter(|vm| {
                desc.scaling_group_name
                    .as_ref()
                    .is_none_or(|g| *g == vm.scaling_group_name)
            });
            return Ok(found.cloned());
        }
        if let Some(group) = &desc.scaling_group_name {
            let mut in_group: Vec<_> = fleet
                .values()
                .filter(|vm| vm.scaling_group_name == *group)
                .collect();
            in_group.sort_by(|a, b| a.vm_id.cmp(&b.vm_id));
            return Ok(in_group.first().map(|vm| (*vm).clone()));
        }
        Ok(None)
    }

    async fn get_primary_vm(&self) -> WardenResult<Option<VirtualMachine>> {
        match self.store.get_primary_record()? {
            Some(record) => Ok(self.fleet.lock().unwrap().get(&record.vm_id).cloned()),
            None => Ok(None),
        }
    }

    async fn delete_vm(&self, vm: &VirtualMachine) -> WardenResult<()> {
        let removed = self.fleet.lock().unwrap().remove(&vm.vm_id);
        if removed.is_some() {
            debug!(vm_id = %vm.vm_id, "vm terminated");
            self.terminated.lock().unwrap().push(vm.vm_id.clone());
        }
        Ok(())
    }

    async fn complete_lifecycle_action(
        &self,
        vm_id: &str,
        action: &str,
        abandon: bool,
    ) -> WardenResult<()> {
        debug!(%vm_id, %action, abandon, "lifecycle action completed");
        self.lifecycle_actions.lock().unwrap().push(LifecycleCompletion {
            vm_id: vm_id.to_string(),
            action: action.to_string(),
            abandon,
        });
        Ok(())
    }

    async fn get_settings(&self) -> WardenResult<Vec<SettingItem>> {
        self.store.list_settings()
    }

    async fn set_setting(&self, item: &SettingItem) -> WardenResult<()> {
        self.store.put_setting(item)
    }

    async fn get_health_check_record(
        &self,
        vm_id: &str,
    ) -> WardenResult<Option<HealthCheckRecord>> {
        self.store.get_health_record(vm_id)
    }

    async fn create_health_check_record(&self, record: &HealthCheckRecord) -> WardenResult<()> {
        self.store.create_health_record(record)
    }

    async fn update_health_check_record(&self, record: &HealthCheckRecord) -> WardenResult<()> {
        self.store.update_health_record(record)
    }

    async fn delete_health_check_record(&self, vm_id: &str) -> WardenResult<bool> {
        self.store.delete_health_record(vm_id)
    }

    async fn get_primary_record(&self) -> WardenResult<Option<PrimaryRecord>> {
        self.store.get_primary_record()
    }

    async fn create_primary_record(
        &self,
        record: &PrimaryRecord,
        expected_id: Option<&str>,
    ) -> WardenResult<()> {
        self.store.create_primary_record(record, expected_id)
    }

    async fn update_primary_record(&self, record: &PrimaryRecord) -> WardenResult<()> {
        self.store.update_primary_record(record)
    }

    async fn delete_primary_record(&self, expected_id: &str) -> WardenResult<()> {
        self.store.delete_primary_record(expected_id)
    }

    async fn list_license_files(
        &self,
        container: &str,
        dir: &str,
    ) -> WardenResult<Vec<LicenseFile>> {
        let prefix = format!("{dir}/");
        let blobs = self.blobs.lock().unwrap();
        let files = blobs
            .get(container)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(path, _)| path.starts_with(&prefix))
                    .map(|(path, content)| LicenseFile {
                        file_name: path[prefix.len()..].to_string(),
                        checksum: hex::encode(Sha256::digest(content.as_bytes())),
                        algorithm: "sha256".to_string(),
                        content: None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(files)
    }

    async fn load_license_file_content(
        &self,
        container: &str,
        path: &str,
    ) -> WardenResult<String> {
        let blobs = self.blobs.lock().unwrap();
        blobs
            .get(container)
            .and_then(|entries| entries.iter().find(|(p, _)| p == path))
            .map(|(_, content)| content.clone())
            .ok_or_else(|| {
                warden_state::WardenError::TransientIo(format!(
                    "blob not found: {container}/{path}"
                ))
            })
    }

    async fn list_license_stock(&self, product: &str) -> WardenResult<Vec<LicenseStockRecord>> {
        self.store.list_license_stock(product)
    }

    async fn list_license_usage(&self, product: &str) -> WardenResult<Vec<LicenseUsageRecord>> {
        self.store.list_license_usage(product)
    }

    async fn update_license_stock(
        &self,
        product: &str,
        upsert: &[LicenseStockRecord],
        delete: &[String],
    ) -> WardenResult<()> {
        self.store.update_license_stock(product, upsert, delete)
    }

    async fn insert_license_usage(&self, record: &LicenseUsageRecord) -> WardenResult<()> {
        self.store.insert_license_usage(record)
    }

    async fn update_license_usage(
        &self,
        product: &str,
        upsert: &[LicenseUsageRecord],
        delete: &[String],
    ) -> WardenResult<()> {
        self.store.update_license_usage(product, upsert, delete)
    }
}
