//! StateStore — redb-backed reference store for the Warden control plane.
//!
//! Provides typed CRUD over settings, health records, the primary election
//! record, and license stock/usage. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).
//!
//! Conditional writes (`create_health_record`, `create_primary_record`,
//! `update_primary_record`, `delete_primary_record`,
//! `insert_license_usage`) compare current state inside the write
//! transaction and fail with [`WardenError::RaceLost`] on mismatch. redb's
//! single-writer transactions make these compare-and-set operations
//! linearizable.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable};
use tracing::debug;

use crate::error::{WardenError, WardenResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `WardenError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| WardenError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> WardenResult<Self> {
        let db = Database::create(path).map_err(map_err!(Store))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing and the
    /// single-node reference platform).
    pub fn open_in_memory() -> WardenResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Store))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> WardenResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Store))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SETTINGS).map_err(map_err!(Store))?;
        txn.open_table(HEALTH).map_err(map_err!(Store))?;
        txn.open_table(PRIMARY).map_err(map_err!(Store))?;
        txn.open_table(LICENSE_STOCK).map_err(map_err!(Store))?;
        txn.open_table(LICENSE_USAGE).map_err(map_err!(Store))?;
        txn.commit().map_err(map_err!(Store))?;
        Ok(())
    }

    // ── Settings ───────────────────────────────────────────────────

    /// Insert or update a setting.
    pub fn put_setting(&self, item: &SettingItem) -> WardenResult<()> {
        let value = serde_json::to_vec(item).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Store))?;
        {
            let mut table = txn.open_table(SETTINGS).map_err(map_err!(Store))?;
            table
                .insert(item.key.as_str(), value.as_slice())
                .map_err(map_err!(Store))?;
        }
        txn.commit().map_err(map_err!(Store))?;
        debug!(key = %item.key, "setting stored");
        Ok(())
    }

    /// Get a setting by wire key.
    pub fn get_setting(&self, key: &str) -> WardenResult<Option<SettingItem>> {
        let txn = self.db.begin_read().map_err(map_err!(Store))?;
        let table = txn.open_table(SETTINGS).map_err(map_err!(Store))?;
        match table.get(key).map_err(map_err!(Store))? {
            Some(guard) => {
                let item: SettingItem =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Serialize))?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    /// List all settings.
    pub fn list_settings(&self) -> WardenResult<Vec<SettingItem>> {
        let txn = self.db.begin_read().map_err(map_err!(Store))?;
        let table = txn.open_table(SETTINGS).map_err(map_err!(Store))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Store))? {
            let (_, value) = entry.map_err(map_err!(Store))?;
            let item: SettingItem =
                serde_json::from_slice(value.value()).map_err(map_err!(Serialize))?;
            results.push(item);
        }
        Ok(results)
    }

    // ── Health records ─────────────────────────────────────────────

    /// Get a health record by VM id.
    pub fn get_health_record(&self, vm_id: &str) -> WardenResult<Option<HealthCheckRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Store))?;
        let table = txn.open_table(HEALTH).map_err(map_err!(Store))?;
        match table.get(vm_id).map_err(map_err!(Store))? {
            Some(guard) => {
                let record: HealthCheckRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Serialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Create a health record; fails with `RaceLost` if one already exists
    /// for the VM. Serializes first-heartbeat races.
    pub fn create_health_record(&self, record: &HealthCheckRecord) -> WardenResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Store))?;
        {
            let mut table = txn.open_table(HEALTH).map_err(map_err!(Store))?;
            let exists = table
                .get(record.vm_id.as_str())
                .map_err(map_err!(Store))?
                .is_some();
            if exists {
                return Err(WardenError::RaceLost(format!(
                    "health record for {} already exists",
                    record.vm_id
                )));
            }
            table
                .insert(record.vm_id.as_str(), value.as_slice())
                .map_err(map_err!(Store))?;
        }
        txn.commit().map_err(map_err!(Store))?;
        debug!(vm_id = %record.vm_id, "health record created");
        Ok(())
    }

    /// Overwrite a health record.
    pub fn update_health_record(&self, record: &HealthCheckRecord) -> WardenResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Store))?;
        {
            let mut table = txn.open_table(HEALTH).map_err(map_err!(Store))?;
            table
                .insert(record.vm_id.as_str(), value.as_slice())
                .map_err(map_err!(Store))?;
        }
        txn.commit().map_err(map_err!(Store))?;
        Ok(())
    }

    /// Delete a health record by VM id. Returns true if it existed.
    pub fn delete_health_record(&self, vm_id: &str) -> WardenResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Store))?;
        let existed;
        {
            let mut table = txn.open_table(HEALTH).map_err(map_err!(Store))?;
            existed = table.remove(vm_id).map_err(map_err!(Store))?.is_some();
        }
        txn.commit().map_err(map_err!(Store))?;
        debug!(%vm_id, existed, "health record deleted");
        Ok(existed)
    }

    /// List all health records.
    pub fn list_health_records(&self) -> WardenResult<Vec<HealthCheckRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Store))?;
        let table = txn.open_table(HEALTH).map_err(map_err!(Store))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Store))? {
            let (_, value) = entry.map_err(map_err!(Store))?;
            let record: HealthCheckRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Serialize))?;
            results.push(record);
        }
        Ok(results)
    }

    // ── Primary record ─────────────────────────────────────────────

    /// Get the singleton primary record.
    pub fn get_primary_record(&self) -> WardenResult<Option<PrimaryRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Store))?;
        let table = txn.open_table(PRIMARY).map_err(map_err!(Store))?;
        match table.get(PRIMARY_KEY).map_err(map_err!(Store))? {
            Some(guard) => {
                let record: PrimaryRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Serialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Conditionally create (or replace) the primary record.
    ///
    /// `expected_id` must match the `id` of the current record, or be
    /// `None` when the record is expected absent. Exactly one concurrent
    /// writer wins; the rest observe `RaceLost`.
    pub fn create_primary_record(
        &self,
        record: &PrimaryRecord,
        expected_id: Option<&str>,
    ) -> WardenResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Store))?;
        {
            let mut table = txn.open_table(PRIMARY).map_err(map_err!(Store))?;
            let current_id = read_primary_id(&table)?;
            match (current_id.as_deref(), expected_id) {
                (None, None) => {}
                (Some(current), Some(expected)) if current == expected => {}
                (current, expected) => {
                    return Err(WardenError::RaceLost(format!(
                        "primary record changed: expected {expected:?}, found {current:?}"
                    )));
                }
            }
            table
                .insert(PRIMARY_KEY, value.as_slice())
                .map_err(map_err!(Store))?;
        }
        txn.commit().map_err(map_err!(Store))?;
        debug!(vm_id = %record.vm_id, state = ?record.vote_state, "primary record written");
        Ok(())
    }

    /// Conditionally update the primary record in place.
    ///
    /// Fails with `RaceLost` unless the current record carries the same
    /// `id` token. Used by the elected candidate to finalize its vote and
    /// by observers to time out an expired one.
    pub fn update_primary_record(&self, record: &PrimaryRecord) -> WardenResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Store))?;
        {
            let mut table = txn.open_table(PRIMARY).map_err(map_err!(Store))?;
            let current_id = read_primary_id(&table)?;
            if current_id.as_deref() != Some(record.id.as_str()) {
                return Err(WardenError::RaceLost(format!(
                    "primary record changed: expected {:?}, found {current_id:?}",
                    record.id
                )));
            }
            table
                .insert(PRIMARY_KEY, value.as_slice())
                .map_err(map_err!(Store))?;
        }
        txn.commit().map_err(map_err!(Store))?;
        debug!(vm_id = %record.vm_id, state = ?record.vote_state, "primary record updated");
        Ok(())
    }

    /// Conditionally delete the primary record (purge).
    ///
    /// Fails with `RaceLost` if the current record does not carry
    /// `expected_id` (including when it is already gone) — purge callers
    /// treat that as someone else having purged first.
    pub fn delete_primary_record(&self, expected_id: &str) -> WardenResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Store))?;
        {
            let mut table = txn.open_table(PRIMARY).map_err(map_err!(Store))?;
            let current_id = read_primary_id(&table)?;
            if current_id.as_deref() != Some(expected_id) {
                return Err(WardenError::RaceLost(format!(
                    "primary record changed: expected {expected_id:?}, found {current_id:?}"
                )));
            }
            table.remove(PRIMARY_KEY).map_err(map_err!(Store))?;
        }
        txn.commit().map_err(map_err!(Store))?;
        debug!(%expected_id, "primary record purged");
        Ok(())
    }

    // ── License stock ──────────────────────────────────────────────

    /// List license stock for a product.
    pub fn list_license_stock(&self, product: &str) -> WardenResult<Vec<LicenseStockRecord>> {
        let prefix = format!("{product}:");
        let txn = self.db.begin_read().map_err(map_err!(Store))?;
        let table = txn.open_table(LICENSE_STOCK).map_err(map_err!(Store))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Store))? {
            let (key, value) = entry.map_err(map_err!(Store))?;
            if key.value().starts_with(&prefix) {
                let record: LicenseStockRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Serialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    /// Apply a stock reconciliation: upsert `upsert`, remove the records
    /// keyed by `delete` (checksums scoped to `product`). One transaction.
    pub fn update_license_stock(
        &self,
        product: &str,
        upsert: &[LicenseStockRecord],
        delete: &[String],
    ) -> WardenResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Store))?;
        {
            let mut table = txn.open_table(LICENSE_STOCK).map_err(map_err!(Store))?;
            for record in upsert {
                let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
                table
                    .insert(record.table_key().as_str(), value.as_slice())
                    .map_err(map_err!(Store))?;
            }
            for checksum in delete {
                let key = format!("{product}:{checksum}");
                table.remove(key.as_str()).map_err(map_err!(Store))?;
            }
        }
        txn.commit().map_err(map_err!(Store))?;
        debug!(
            %product,
            added = upsert.len(),
            removed = delete.len(),
            "license stock reconciled"
        );
        Ok(())
    }

    // ── License usage ──────────────────────────────────────────────

    /// List license usage for a product.
    pub fn list_license_usage(&self, product: &str) -> WardenResult<Vec<LicenseUsageRecord>> {
        let prefix = format!("{product}:");
        let txn = self.db.begin_read().map_err(map_err!(Store))?;
        let table = txn.open_table(LICENSE_USAGE).map_err(map_err!(Store))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Store))? {
            let (key, value) = entry.map_err(map_err!(Store))?;
            if key.value().starts_with(&prefix) {
                let record: LicenseUsageRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Serialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    /// Conditionally insert a usage record; fails with `RaceLost` if the
    /// VM already holds one. Serializes license assignment.
    pub fn insert_license_usage(&self, record: &LicenseUsageRecord) -> WardenResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let key = record.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Store))?;
        {
            let mut table = txn.open_table(LICENSE_USAGE).map_err(map_err!(Store))?;
            let exists = table.get(key.as_str()).map_err(map_err!(Store))?.is_some();
            if exists {
                return Err(WardenError::RaceLost(format!(
                    "usage record for {} already exists",
                    record.vm_id
                )));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Store))?;
        }
        txn.commit().map_err(map_err!(Store))?;
        debug!(vm_id = %record.vm_id, checksum = %record.checksum, "license usage inserted");
        Ok(())
    }

    /// Apply a usage reconciliation: upsert `upsert`, remove the records
    /// keyed by `delete` (vm ids scoped to `product`). One transaction.
    pub fn update_license_usage(
        &self,
        product: &str,
        upsert: &[LicenseUsageRecord],
        delete: &[String],
    ) -> WardenResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Store))?;
        {
            let mut table = txn.open_table(LICENSE_USAGE).map_err(map_err!(Store))?;
            for record in upsert {
                let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
                table
                    .insert(record.table_key().as_str(), value.as_slice())
                    .map_err(map_err!(Store))?;
            }
            for vm_id in delete {
                let key = format!("{product}:{vm_id}");
                table.remove(key.as_str()).map_err(map_err!(Store))?;
            }
        }
        txn.commit().map_err(map_err!(Store))?;
        Ok(())
    }
}

/// Read the current primary record's id inside a write transaction.
fn read_primary_id<T: ReadableTable<&'static str, &'static [u8]>>(
    table: &T,
) -> WardenResult<Option<String>> {
    match table.get(PRIMARY_KEY).map_err(map_err!(Store))? {
        Some(guard) => {
            let record: PrimaryRecord =
                serde_json::from_slice(guard.value()).map_err(map_err!(Serialize))?;
            Ok(Some(record.id))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vm(vm_id: &str, group: &str) -> VirtualMachine {
        VirtualMachine {
            vm_id: vm_id.to_string(),
            scaling_group_name: group.to_string(),
            primary_private_ip: "10.0.1.10".to_string(),
            primary_public_ip: None,
            virtual_network_id: "vnet-1".to_string(),
            subnet_id: "subnet-1".to_string(),
        }
    }

    fn test_health(vm_id: &str) -> HealthCheckRecord {
        HealthCheckRecord::first_heartbeat(&test_vm(vm_id, "sg-primary"), "10.0.1.10", 30, 1_000)
    }

    fn test_usage(vm_id: &str, checksum: &str) -> LicenseUsageRecord {
        LicenseUsageRecord {
            vm_id: vm_id.to_string(),
            checksum: checksum.to_string(),
            file_name: format!("{checksum}.lic"),
            vm_in_sync: true,
            product_name: "fortigate".to_string(),
            assigned_at: 1_000,
        }
    }

    fn test_stock(checksum: &str) -> LicenseStockRecord {
        LicenseStockRecord {
            checksum: checksum.to_string(),
            file_name: format!("{checksum}.lic"),
            algorithm: "sha256".to_string(),
            product_name: "fortigate".to_string(),
        }
    }

    // ── Settings ───────────────────────────────────────────────────

    #[test]
    fn setting_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let item = SettingItem::new("heartbeat-interval", "30", "seconds between heartbeats");

        store.put_setting(&item).unwrap();
        assert_eq!(store.get_setting("heartbeat-interval").unwrap(), Some(item));
    }

    #[test]
    fn setting_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_setting("nope").unwrap().is_none());
    }

    #[test]
    fn setting_list_all() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_setting(&SettingItem::new("a", "1", "")).unwrap();
        store.put_setting(&SettingItem::new("b", "2", "")).unwrap();

        assert_eq!(store.list_settings().unwrap().len(), 2);
    }

    // ── Health records ─────────────────────────────────────────────

    #[test]
    fn health_create_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let record = test_health("i-001");

        store.create_health_record(&record).unwrap();
        assert_eq!(store.get_health_record("i-001").unwrap(), Some(record));
    }

    #[test]
    fn health_create_twice_loses_race() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_health_record(&test_health("i-001")).unwrap();

        let err = store.create_health_record(&test_health("i-001")).unwrap_err();
        assert!(matches!(err, WardenError::RaceLost(_)));
    }

    #[test]
    fn health_update_in_place() {
        let store = StateStore::open_in_memory().unwrap();
        let mut record = test_health("i-001");
        store.create_health_record(&record).unwrap();

        record.seq = 5;
        record.next_heartbeat_time = 151_000;
        store.update_health_record(&record).unwrap();

        let loaded = store.get_health_record("i-001").unwrap().unwrap();
        assert_eq!(loaded.seq, 5);
        assert_eq!(loaded.next_heartbeat_time, 151_000);
    }

    #[test]
    fn health_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_health_record(&test_health("i-001")).unwrap();

        assert!(store.delete_health_record("i-001").unwrap());
        assert!(!store.delete_health_record("i-001").unwrap());
        assert!(store.get_health_record("i-001").unwrap().is_none());
    }

    // ── Primary record ─────────────────────────────────────────────

    #[test]
    fn primary_create_when_absent() {
        let store = StateStore::open_in_memory().unwrap();
        let record = PrimaryRecord::candidate(&test_vm("i-001", "sg-primary"), 90_000);

        store.create_primary_record(&record, None).unwrap();
        assert_eq!(store.get_primary_record().unwrap(), Some(record));
    }

    #[test]
    fn primary_create_race_single_winner() {
        let store = StateStore::open_in_memory().unwrap();
        let a = PrimaryRecord::candidate(&test_vm("i-a", "sg-primary"), 90_000);
        let b = PrimaryRecord::candidate(&test_vm("i-b", "sg-primary"), 90_000);

        store.create_primary_record(&a, None).unwrap();
        let err = store.create_primary_record(&b, None).unwrap_err();
        assert!(matches!(err, WardenError::RaceLost(_)));

        // The loser's expected-absent write did not clobber the winner.
        assert_eq!(store.get_primary_record().unwrap().unwrap().vm_id, "i-a");
    }

    #[test]
    fn primary_replace_expected_id() {
        let store = StateStore::open_in_memory().unwrap();
        let mut tombstone = PrimaryRecord::candidate(&test_vm("i-old", "sg-primary"), 90_000);
        tombstone.vote_state = VoteState::Timeout;
        store.create_primary_record(&tombstone, None).unwrap();

        let fresh = PrimaryRecord::candidate(&test_vm("i-new", "sg-primary"), 180_000);
        store
            .create_primary_record(&fresh, Some(&tombstone.id))
            .unwrap();
        assert_eq!(store.get_primary_record().unwrap().unwrap().vm_id, "i-new");
    }

    #[test]
    fn primary_update_requires_matching_id() {
        let store = StateStore::open_in_memory().unwrap();
        let mut record = PrimaryRecord::candidate(&test_vm("i-001", "sg-primary"), 90_000);
        store.create_primary_record(&record, None).unwrap();

        record.vote_state = VoteState::Done;
        store.update_primary_record(&record).unwrap();
        assert_eq!(
            store.get_primary_record().unwrap().unwrap().vote_state,
            VoteState::Done
        );

        let stale = PrimaryRecord::candidate(&test_vm("i-002", "sg-primary"), 95_000);
        let err = store.update_primary_record(&stale).unwrap_err();
        assert!(matches!(err, WardenError::RaceLost(_)));
    }

    #[test]
    fn primary_delete_requires_matching_id() {
        let store = StateStore::open_in_memory().unwrap();
        let record = PrimaryRecord::candidate(&test_vm("i-001", "sg-primary"), 90_000);
        store.create_primary_record(&record, None).unwrap();

        let err = store.delete_primary_record("some-other-id").unwrap_err();
        assert!(matches!(err, WardenError::RaceLost(_)));

        store.delete_primary_record(&record.id).unwrap();
        assert!(store.get_primary_record().unwrap().is_none());

        // Second purge of the same record loses the race.
        let err = store.delete_primary_record(&record.id).unwrap_err();
        assert!(matches!(err, WardenError::RaceLost(_)));
    }

    // ── License stock & usage ──────────────────────────────────────

    #[test]
    fn stock_reconcile_add_and_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .update_license_stock("fortigate", &[test_stock("aaa"), test_stock("bbb")], &[])
            .unwrap();
        assert_eq!(store.list_license_stock("fortigate").unwrap().len(), 2);

        store
            .update_license_stock("fortigate", &[test_stock("ccc")], &["aaa".to_string()])
            .unwrap();
        let stock = store.list_license_stock("fortigate").unwrap();
        let checksums: Vec<_> = stock.iter().map(|s| s.checksum.as_str()).collect();
        assert_eq!(stock.len(), 2);
        assert!(checksums.contains(&"bbb"));
        assert!(checksums.contains(&"ccc"));
    }

    #[test]
    fn stock_scoped_by_product() {
        let store = StateStore::open_in_memory().unwrap();
        let mut other = test_stock("aaa");
        other.product_name = "other".to_string();
        store.update_license_stock("fortigate", &[test_stock("bbb")], &[]).unwrap();
        store.update_license_stock("other", &[other], &[]).unwrap();

        assert_eq!(store.list_license_stock("fortigate").unwrap().len(), 1);
        assert_eq!(store.list_license_stock("other").unwrap().len(), 1);
    }

    #[test]
    fn usage_conditional_insert() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_license_usage(&test_usage("i-001", "aaa")).unwrap();

        let err = store
            .insert_license_usage(&test_usage("i-001", "bbb"))
            .unwrap_err();
        assert!(matches!(err, WardenError::RaceLost(_)));

        // The original assignment survived the collision.
        let usage = store.list_license_usage("fortigate").unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].checksum, "aaa");
    }

    #[test]
    fn usage_recycle_moves_row() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_license_usage(&test_usage("i-old", "aaa")).unwrap();

        // Recycling: insert the new holder, delete the old row.
        store.insert_license_usage(&test_usage("i-new", "aaa")).unwrap();
        store
            .update_license_usage("fortigate", &[], &["i-old".to_string()])
            .unwrap();

        let usage = store.list_license_usage("fortigate").unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].vm_id, "i-new");
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.create_health_record(&test_health("i-001")).unwrap();
            let record = PrimaryRecord::candidate(&test_vm("i-001", "sg-primary"), 90_000);
            store.create_primary_record(&record, None).unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        assert!(store.get_health_record("i-001").unwrap().is_some());
        assert_eq!(store.get_primary_record().unwrap().unwrap().vm_id, "i-001");
    }

    // ── Edge cases ─────────────────────────────────────────────────

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_settings().unwrap().is_empty());
        assert!(store.list_health_records().unwrap().is_empty());
        assert!(store.get_primary_record().unwrap().is_none());
        assert!(store.list_license_stock("fortigate").unwrap().is_empty());
        assert!(store.list_license_usage("fortigate").unwrap().is_empty());
        assert!(!store.delete_health_record("nope").unwrap());
    }
}
