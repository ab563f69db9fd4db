//! The election runner — drives the primary record through one election
//! round on behalf of a reporting VM.
//!
//! Called by the bootstrap path and by heartbeat sync whenever no healthy
//! primary exists. Waiting on a foreign pending vote is a bounded poll
//! loop: the runner sleeps between observations and exits well before the
//! handler's execution budget runs out, per the deadline clock on the
//! proxy adapter.

use std::time::Duration;

use tracing::{debug, info, warn};

use warden_health::{HealthPolicy, still_reporting};
use warden_platform::{PlatformAdapter, ProxyAdapter, VmDescriptor};
use warden_state::{
    PrimaryRecord, SyncState, VirtualMachine, VoteState, WardenError, WardenResult,
};

use crate::machine::{ElectionAssessment, assess};

/// Poll cadence while observing a foreign pending vote.
pub const POLL_INTERVAL_MS: u64 = 5_000;

/// Bounded waiters leave the handler at least this much budget.
pub const MIN_REMAINING_MS: u64 = 6_000;

/// Election parameters resolved from settings.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Only members of this scaling group may stand.
    pub primary_scaling_group: String,
    /// Seconds a pending vote stays live before any observer may void it.
    pub election_timeout_secs: u32,
    /// When true, never wait on a foreign pending vote.
    pub no_wait: bool,
    /// Thresholds for judging whether the incumbent still reports.
    pub policy: HealthPolicy,
}

/// How one election round ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ElectionOutcome {
    /// This VM created the pending record. `finalized` is false when the
    /// `pending → done` update lost a race; the caller must clean up.
    Elected {
        record: PrimaryRecord,
        finalized: bool,
    },
    /// A finalized, still-reporting primary exists (possibly this VM).
    Incumbent(PrimaryRecord),
    /// A foreign vote is pending and waiting is disabled.
    Pending(PrimaryRecord),
    /// No primary exists and this VM is not eligible to stand.
    Vacant,
}

/// Run one election round for `self_vm`, starting at `t_start` (ms).
pub async fn run_election<P: PlatformAdapter, X: ProxyAdapter>(
    platform: &P,
    proxy: &X,
    cfg: &ElectionConfig,
    self_vm: &VirtualMachine,
    t_start: u64,
) -> WardenResult<ElectionOutcome> {
    let eligible = self_vm.scaling_group_name == cfg.primary_scaling_group;
    let mut now = t_start;

    loop {
        if proxy.remaining_execution_time_ms() < MIN_REMAINING_MS {
            return Err(WardenError::ElectionTimeout(format!(
                "execution budget exhausted while electing, candidate {}",
                self_vm.vm_id
            )));
        }

        let record = platform.get_primary_record().await?;
        let incumbent_reporting = match &record {
            Some(r) if r.vote_state == VoteState::Done => {
                incumbent_reports(platform, r, now, &cfg.policy).await?
            }
            _ => false,
        };

        let assessment = assess(record.as_ref(), incumbent_reporting, &self_vm.vm_id, now);
        match (assessment, record) {
            (ElectionAssessment::KeepIncumbent, Some(r)) => {
                debug!(primary = %r.vm_id, "incumbent primary healthy");
                return Ok(ElectionOutcome::Incumbent(r));
            }

            (ElectionAssessment::Purge, Some(r)) => {
                purge(platform, &r).await?;
                continue;
            }

            (ElectionAssessment::Stand, record) => {
                if !eligible {
                    if cfg.no_wait {
                        return Ok(ElectionOutcome::Vacant);
                    }
                    now = pause(proxy, now, &self_vm.vm_id).await?;
                    continue;
                }

                let vote_end = now + u64::from(cfg.election_timeout_secs) * 1000;
                let candidate = PrimaryRecord::candidate(self_vm, vote_end);
                let expected = record.as_ref().map(|r| r.id.as_str());
                match platform.create_primary_record(&candidate, expected).await {
                    Ok(()) => {
                        info!(candidate = %self_vm.vm_id, "won primary candidacy");
                        return finalize(platform, candidate).await;
                    }
                    Err(WardenError::RaceLost(reason)) => {
                        // Another candidate got there first; observe it.
                        debug!(candidate = %self_vm.vm_id, %reason, "lost candidacy race");
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            (ElectionAssessment::FinalizeSelf, Some(r)) => {
                return finalize(platform, r).await;
            }

            (ElectionAssessment::Wait, Some(r)) => {
                if cfg.no_wait {
                    return Ok(ElectionOutcome::Pending(r));
                }
                now = pause(proxy, now, &self_vm.vm_id).await?;
            }

            // Every assessment except Stand carries the record it judged.
            (_, None) => unreachable!(),
        }
    }
}

/// Whether the incumbent named by a finalized record is still reporting.
///
/// The VM must still exist in its scaling group. A record-less incumbent
/// (just elected, monitor entry not yet inserted) is trusted; a monitored
/// one must be in-sync and within its heartbeat loss budget.
async fn incumbent_reports<P: PlatformAdapter>(
    platform: &P,
    record: &PrimaryRecord,
    t_now: u64,
    policy: &HealthPolicy,
) -> WardenResult<bool> {
    let desc = VmDescriptor::in_group(&record.vm_id, &record.scaling_group_name);
    if platform.describe_vm(&desc).await?.is_none() {
        return Ok(false);
    }
    match platform.get_health_check_record(&record.vm_id).await? {
        Some(health) => Ok(still_reporting(&health, t_now, policy)),
        None => Ok(true),
    }
}

/// Purge a dead or expired record so the next round starts from absence.
///
/// A `RaceLost` on the delete means another observer purged first, which
/// is as good as success. For a finalized record the incumbent is also
/// taken out of monitoring and terminated.
async fn purge<P: PlatformAdapter>(platform: &P, record: &PrimaryRecord) -> WardenResult<()> {
    warn!(
        primary = %record.vm_id,
        state = ?record.vote_state,
        "purging primary record"
    );

    if record.vote_state == VoteState::Done {
        if let Some(mut health) = platform.get_health_check_record(&record.vm_id).await? {
            health.healthy = false;
            health.sync_state = SyncState::OutOfSync;
            platform.update_health_check_record(&health).await?;
        }
    }

    match platform.delete_primary_record(&record.id).await {
        Ok(()) | Err(WardenError::RaceLost(_)) => {}
        Err(e) => return Err(e),
    }

    if record.vote_state == VoteState::Done {
        let desc = VmDescriptor::in_group(&record.vm_id, &record.scaling_group_name);
        if let Some(vm) = platform.describe_vm(&desc).await? {
            platform.delete_vm(&vm).await?;
        }
    }
    Ok(())
}

/// Finalize a pending vote this VM owns.
async fn finalize<P: PlatformAdapter>(
    platform: &P,
    record: PrimaryRecord,
) -> WardenResult<ElectionOutcome> {
    let mut done = record.clone();
    done.vote_state = VoteState::Done;
    match platform.update_primary_record(&done).await {
        Ok(()) => {
            info!(primary = %done.vm_id, "primary vote finalized");
            Ok(ElectionOutcome::Elected {
                record: done,
                finalized: true,
            })
        }
        Err(WardenError::RaceLost(reason)) => {
            warn!(candidate = %record.vm_id, %reason, "vote finalization lost");
            Ok(ElectionOutcome::Elected {
                record,
                finalized: false,
            })
        }
        Err(e) => Err(e),
    }
}

/// Sleep one poll interval, advancing the logical clock.
async fn pause<X: ProxyAdapter>(proxy: &X, now: u64, vm_id: &str) -> WardenResult<u64> {
    if proxy.remaining_execution_time_ms() < MIN_REMAINING_MS + POLL_INTERVAL_MS {
        return Err(WardenError::ElectionTimeout(format!(
            "execution budget exhausted while waiting on vote, observer {vm_id}"
        )));
    }
    tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
    Ok(now + POLL_INTERVAL_MS)
}
