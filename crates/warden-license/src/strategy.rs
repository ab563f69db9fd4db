//! License assignment — reconcile, reuse, assign, recycle.
//!
//! The stock table mirrors the blob inventory by checksum; the usage
//! table holds at most one row per VM. Assignment order: the VM's own
//! existing row (idempotent re-request), then unused stock, then a
//! recyclable row held by an out-of-sync VM past the grace period.
//! The usage insert is conditional on `vm_id`; on a collision the
//! strategy re-lists usage and retries with a fixed backoff, bounded by
//! the handler's remaining execution time.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tracing::{debug, info, warn};

use warden_platform::{PlatformAdapter, ProxyAdapter};
use warden_state::{
    LicenseFile, LicenseStockRecord, LicenseUsageRecord, SyncState, VirtualMachine, WardenError,
    WardenResult,
};

/// Backoff between usage-insert retries.
pub const RETRY_BACKOFF_MS: u64 = 2_000;

/// Retries stop once the handler budget drops below this floor.
const MIN_REMAINING_MS: u64 = 6_000;

/// Pool parameters resolved from settings.
#[derive(Debug, Clone)]
pub struct LicenseConfig {
    pub product: String,
    /// Blob container holding the license files.
    pub container: String,
    /// Directory prefix of the license files inside the container.
    pub key_prefix: String,
    /// Seconds a fresh assignment is protected from recycling.
    pub grace_period_secs: u64,
}

/// How the returned license was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseOutcome {
    /// The VM already held this license.
    Reused,
    /// Assigned from unused stock.
    Fresh,
    /// Taken over from an out-of-sync holder.
    Recycled,
}

/// A successful assignment: the file with content loaded, and how it was
/// obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct LicenseAssignment {
    pub file: LicenseFile,
    pub outcome: LicenseOutcome,
}

/// Assign a license to `vm` at `t_now` (ms).
pub async fn assign_license<P: PlatformAdapter, X: ProxyAdapter>(
    platform: &P,
    proxy: &X,
    cfg: &LicenseConfig,
    vm: &VirtualMachine,
    t_now: u64,
) -> WardenResult<LicenseAssignment> {
    let (files, stock, usage) = tokio::join!(
        platform.list_license_files(&cfg.container, &cfg.key_prefix),
        platform.list_license_stock(&cfg.product),
        platform.list_license_usage(&cfg.product),
    );
    let files = files?;
    let stock = stock?;
    let mut usage = usage?;

    reconcile_stock(platform, cfg, &files, &stock).await?;
    usage = drop_orphans(platform, cfg, usage, &files).await?;

    let by_checksum: HashMap<&str, &LicenseFile> =
        files.iter().map(|f| (f.checksum.as_str(), f)).collect();

    loop {
        // Idempotent re-request: the VM already holds a license.
        if let Some(mine) = usage.iter().find(|u| u.vm_id == vm.vm_id) {
            let file = by_checksum.get(mine.checksum.as_str()).ok_or_else(|| {
                WardenError::TransientIo(format!(
                    "usage for {} references missing stock {}",
                    vm.vm_id, mine.checksum
                ))
            })?;
            debug!(vm_id = %vm.vm_id, checksum = %mine.checksum, "license re-request served");
            let file = load_content(platform, cfg, file).await?;
            return Ok(LicenseAssignment {
                file,
                outcome: LicenseOutcome::Reused,
            });
        }

        // Unused stock first.
        let used: HashSet<&str> = usage.iter().map(|u| u.checksum.as_str()).collect();
        let mut unused: Vec<&LicenseFile> = files
            .iter()
            .filter(|f| !used.contains(f.checksum.as_str()))
            .collect();
        unused.sort_by(|a, b| a.file_name.cmp(&b.file_name));

        if let Some(file) = unused.first() {
            let record = usage_row(cfg, vm, file, t_now);
            match platform.insert_license_usage(&record).await {
                Ok(()) => {
                    info!(vm_id = %vm.vm_id, checksum = %file.checksum, "license assigned");
                    let file = load_content(platform, cfg, file).await?;
                    return Ok(LicenseAssignment {
                        file,
                        outcome: LicenseOutcome::Fresh,
                    });
                }
                Err(WardenError::RaceLost(_)) => {
                    usage = relist_after_backoff(platform, proxy, cfg).await?;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        // Refresh the cached in-sync flags, then recycle greedily.
        usage = refresh_in_sync(platform, cfg, usage).await?;
        let grace_ms = cfg.grace_period_secs * 1000;
        let victim = usage
            .iter()
            .find(|u| !u.vm_in_sync && t_now >= u.assigned_at + grace_ms)
            .cloned();

        if let Some(victim) = victim {
            let file = by_checksum.get(victim.checksum.as_str()).ok_or_else(|| {
                WardenError::TransientIo(format!("recyclable stock {} vanished", victim.checksum))
            })?;
            let record = usage_row(cfg, vm, file, t_now);
            match platform.insert_license_usage(&record).await {
                Ok(()) => {
                    platform
                        .update_license_usage(&cfg.product, &[], &[victim.vm_id.clone()])
                        .await?;
                    info!(
                        vm_id = %vm.vm_id,
                        from = %victim.vm_id,
                        checksum = %victim.checksum,
                        "license recycled"
                    );
                    let file = load_content(platform, cfg, file).await?;
                    return Ok(LicenseAssignment {
                        file,
                        outcome: LicenseOutcome::Recycled,
                    });
                }
                Err(WardenError::RaceLost(_)) => {
                    usage = relist_after_backoff(platform, proxy, cfg).await?;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        warn!(vm_id = %vm.vm_id, product = %cfg.product, "license pool exhausted");
        return Err(WardenError::LicenseExhausted);
    }
}

/// Bring the stock table in line with the blob inventory.
async fn reconcile_stock<P: PlatformAdapter>(
    platform: &P,
    cfg: &LicenseConfig,
    files: &[LicenseFile],
    stock: &[LicenseStockRecord],
) -> WardenResult<()> {
    let file_checksums: HashSet<&str> = files.iter().map(|f| f.checksum.as_str()).collect();
    let stock_checksums: HashSet<&str> = stock.iter().map(|s| s.checksum.as_str()).collect();

    let add: Vec<LicenseStockRecord> = files
        .iter()
        .filter(|f| !stock_checksums.contains(f.checksum.as_str()))
        .map(|f| LicenseStockRecord {
            checksum: f.checksum.clone(),
            file_name: f.file_name.clone(),
            algorithm: f.algorithm.clone(),
            product_name: cfg.product.clone(),
        })
        .collect();
    let delete: Vec<String> = stock
        .iter()
        .filter(|s| !file_checksums.contains(s.checksum.as_str()))
        .map(|s| s.checksum.clone())
        .collect();

    if !add.is_empty() || !delete.is_empty() {
        platform
            .update_license_stock(&cfg.product, &add, &delete)
            .await?;
    }
    Ok(())
}

/// Remove usage rows whose checksum no longer exists in the inventory.
async fn drop_orphans<P: PlatformAdapter>(
    platform: &P,
    cfg: &LicenseConfig,
    usage: Vec<LicenseUsageRecord>,
    files: &[LicenseFile],
) -> WardenResult<Vec<LicenseUsageRecord>> {
    let file_checksums: HashSet<&str> = files.iter().map(|f| f.checksum.as_str()).collect();
    let (kept, orphans): (Vec<_>, Vec<_>) = usage
        .into_iter()
        .partition(|u| file_checksums.contains(u.checksum.as_str()));

    if !orphans.is_empty() {
        let ids: Vec<String> = orphans.iter().map(|u| u.vm_id.clone()).collect();
        debug!(count = ids.len(), "dropping orphaned license usage rows");
        platform.update_license_usage(&cfg.product, &[], &ids).await?;
    }
    Ok(kept)
}

/// Re-derive each holder's in-sync flag from its health record and persist
/// the rows whose cached flag changed.
async fn refresh_in_sync<P: PlatformAdapter>(
    platform: &P,
    cfg: &LicenseConfig,
    mut usage: Vec<LicenseUsageRecord>,
) -> WardenResult<Vec<LicenseUsageRecord>> {
    let mut changed = Vec::new();
    for row in &mut usage {
        let in_sync = match platform.get_health_check_record(&row.vm_id).await? {
            Some(health) => health.healthy && health.sync_state == SyncState::InSync,
            None => false,
        };
        if in_sync != row.vm_in_sync {
            row.vm_in_sync = in_sync;
            changed.push(row.clone());
        }
    }
    if !changed.is_empty() {
        platform
            .update_license_usage(&cfg.product, &changed, &[])
            .await?;
    }
    Ok(usage)
}

fn usage_row(
    cfg: &LicenseConfig,
    vm: &VirtualMachine,
    file: &LicenseFile,
    t_now: u64,
) -> LicenseUsageRecord {
    LicenseUsageRecord {
        vm_id: vm.vm_id.clone(),
        checksum: file.checksum.clone(),
        file_name: file.file_name.clone(),
        vm_in_sync: true,
        product_name: cfg.product.clone(),
        assigned_at: t_now,
    }
}

async fn load_content<P: PlatformAdapter>(
    platform: &P,
    cfg: &LicenseConfig,
    file: &LicenseFile,
) -> WardenResult<LicenseFile> {
    let mut file = file.clone();
    if file.content.is_none() {
        let path = format!("{}/{}", cfg.key_prefix, file.file_name);
        file.content = Some(
            platform
                .load_license_file_content(&cfg.container, &path)
                .await?,
        );
    }
    Ok(file)
}

/// Sleep one backoff interval, then re-read the usage table.
async fn relist_after_backoff<P: PlatformAdapter, X: ProxyAdapter>(
    platform: &P,
    proxy: &X,
    cfg: &LicenseConfig,
) -> WardenResult<Vec<LicenseUsageRecord>> {
    if proxy.remaining_execution_time_ms() < MIN_REMAINING_MS + RETRY_BACKOFF_MS {
        return Err(WardenError::TransientIo(
            "license assignment contention outlasted execution budget".to_string(),
        ));
    }
    tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS)).await;
    platform.list_license_usage(&cfg.product).await
}
