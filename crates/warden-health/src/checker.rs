//! Heartbeat classification logic.
//!
//! A heartbeat arrival is measured against the record's
//! `next_heartbeat_time`. Accepted arrivals (`OnTime`, `Late`, and the
//! recovery variants) bump `seq` and advance the deadline; arrivals beyond
//! the delay allowance accrue losses until the VM is dropped out of sync.

use tracing::{debug, warn};

use warden_state::{HealthCheckRecord, SyncState};

/// Classification of one heartbeat arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthCheckResult {
    /// Arrived at or before the deadline.
    OnTime,
    /// Arrived after the deadline but within the delay allowance.
    Late,
    /// Arrived beyond the allowance; counted as a loss.
    TooLate,
    /// Loss budget exhausted; the VM left the cluster.
    Dropped,
    /// Out-of-sync VM reporting on time again, ladder not yet complete.
    Recovering,
    /// Recovery ladder complete; the VM is back in sync.
    Recovered,
}

/// Thresholds governing classification.
#[derive(Debug, Clone, Copy)]
pub struct HealthPolicy {
    /// Losses tolerated before a VM is dropped.
    pub max_loss_count: u32,
    /// Tolerated delay beyond the interval, in seconds.
    pub delay_allowance_secs: u32,
    /// Consecutive on-time heartbeats required to leave out-of-sync.
    pub sync_recovery_count: u32,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            max_loss_count: 3,
            delay_allowance_secs: 2,
            sync_recovery_count: 3,
        }
    }
}

/// Classifies heartbeat arrivals and mutates the health record in place.
#[derive(Debug, Clone, Copy)]
pub struct HealthCheckEngine {
    policy: HealthPolicy,
}

impl HealthCheckEngine {
    pub fn new(policy: HealthPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Classify a heartbeat arriving at `t_now` (ms) and update the record.
    ///
    /// An out-of-sync record that has not been reset absorbs: the arrival
    /// classifies as `Dropped` and nothing is mutated. After
    /// [`reset`](Self::reset), on-time arrivals climb the recovery ladder
    /// back to `in-sync`.
    pub fn classify(&self, record: &mut HealthCheckRecord, t_now: u64) -> HealthCheckResult {
        if record.sync_state == SyncState::OutOfSync && !record.healthy {
            return HealthCheckResult::Dropped;
        }

        let recovering = record.sync_state == SyncState::OutOfSync;
        let interval_ms = u64::from(record.heartbeat_interval) * 1000;
        let allowance_ms = u64::from(self.policy.delay_allowance_secs) * 1000;
        let expected = record.next_heartbeat_time;
        let delay = t_now.saturating_sub(expected);

        if t_now <= expected || delay <= allowance_ms {
            let on_time = t_now <= expected;
            record.heartbeat_loss_count = 0;
            record.seq += 1;
            record.next_heartbeat_time = t_now + interval_ms;

            if recovering {
                if !on_time {
                    // A merely-late arrival breaks the consecutive run.
                    record.sync_recovery_count = 0;
                    return HealthCheckResult::Recovering;
                }
                record.sync_recovery_count += 1;
                if record.sync_recovery_count >= self.policy.sync_recovery_count {
                    record.sync_state = SyncState::InSync;
                    record.sync_recovery_count = 0;
                    debug!(vm_id = %record.vm_id, "vm recovered to in-sync");
                    return HealthCheckResult::Recovered;
                }
                return HealthCheckResult::Recovering;
            }

            return if on_time {
                HealthCheckResult::OnTime
            } else {
                HealthCheckResult::Late
            };
        }

        if record.heartbeat_loss_count + 1 < self.policy.max_loss_count {
            record.heartbeat_loss_count += 1;
            record.next_heartbeat_time = expected + interval_ms;
            if recovering {
                record.sync_recovery_count = 0;
            }
            debug!(
                vm_id = %record.vm_id,
                losses = record.heartbeat_loss_count,
                delay_ms = delay,
                "heartbeat too late"
            );
            return HealthCheckResult::TooLate;
        }

        record.heartbeat_loss_count += 1;
        record.healthy = false;
        record.sync_state = SyncState::OutOfSync;
        warn!(
            vm_id = %record.vm_id,
            losses = record.heartbeat_loss_count,
            "loss budget exhausted, vm dropped out of sync"
        );
        HealthCheckResult::Dropped
    }

    /// Explicitly re-arm a dropped record for recovery.
    ///
    /// The record stays out-of-sync (still not eligible for primary) but
    /// becomes classifiable again, with its deadline re-based at `t_now`.
    pub fn reset(&self, record: &mut HealthCheckRecord, t_now: u64) {
        record.healthy = true;
        record.heartbeat_loss_count = 0;
        record.sync_recovery_count = 0;
        record.next_heartbeat_time = t_now;
    }
}

/// Observer-side staleness judgment for another VM's record.
///
/// A VM whose record says healthy may still have silently stopped
/// reporting; its deadline plus the full loss budget bounds how long
/// observers keep trusting it.
pub fn still_reporting(record: &HealthCheckRecord, t_now: u64, policy: &HealthPolicy) -> bool {
    if !record.healthy || record.sync_state == SyncState::OutOfSync {
        return false;
    }
    let interval_ms = u64::from(record.heartbeat_interval) * 1000;
    let budget = u64::from(policy.delay_allowance_secs) * 1000
        + u64::from(policy.max_loss_count) * interval_ms;
    t_now <= record.next_heartbeat_time + budget
}
