//! Pure election-state assessment.
//!
//! Given the current primary record, an observer-side judgment of whether
//! the incumbent is still reporting, and the clock, decide the next move.
//! All I/O stays with the runner.

use warden_state::{PrimaryRecord, VoteState};

/// The next move for a VM observing the primary record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionAssessment {
    /// A healthy primary holds a finalized record; nothing to do.
    KeepIncumbent,
    /// The record must be purged before a fresh election (dead incumbent
    /// or expired vote).
    Purge,
    /// The record is absent or a tombstone; an eligible VM may stand.
    Stand,
    /// A pending vote names this VM; it should finalize.
    FinalizeSelf,
    /// A pending vote names another VM and is still within its deadline.
    Wait,
}

/// Assess the record as seen by `self_vm_id` at `t_now`.
///
/// `incumbent_reporting` is only consulted for finalized records.
pub fn assess(
    record: Option<&PrimaryRecord>,
    incumbent_reporting: bool,
    self_vm_id: &str,
    t_now: u64,
) -> ElectionAssessment {
    match record {
        None => ElectionAssessment::Stand,
        Some(r) => match r.vote_state {
            VoteState::Timeout => ElectionAssessment::Stand,
            VoteState::Done => {
                if incumbent_reporting {
                    ElectionAssessment::KeepIncumbent
                } else {
                    ElectionAssessment::Purge
                }
            }
            VoteState::Pending => {
                if t_now > r.vote_end_time {
                    ElectionAssessment::Purge
                } else if r.vm_id == self_vm_id {
                    ElectionAssessment::FinalizeSelf
                } else {
                    ElectionAssessment::Wait
                }
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_state::VirtualMachine;

    fn record(vm_id: &str, state: VoteState, vote_end: u64) -> PrimaryRecord {
        let vm = VirtualMachine {
            vm_id: vm_id.to_string(),
            scaling_group_name: "sg-primary".to_string(),
            primary_private_ip: "10.0.1.10".to_string(),
            primary_public_ip: None,
            virtual_network_id: "vnet-1".to_string(),
            subnet_id: "subnet-1".to_string(),
        };
        let mut r = PrimaryRecord::candidate(&vm, vote_end);
        r.vote_state = state;
        r
    }

    #[test]
    fn absent_invites_candidacy() {
        assert_eq!(assess(None, false, "i-b", 0), ElectionAssessment::Stand);
    }

    #[test]
    fn tombstone_equals_absence() {
        let r = record("i-a", VoteState::Timeout, 90_000);
        assert_eq!(assess(Some(&r), false, "i-b", 0), ElectionAssessment::Stand);
    }

    #[test]
    fn healthy_incumbent_is_kept() {
        let r = record("i-a", VoteState::Done, 90_000);
        assert_eq!(
            assess(Some(&r), true, "i-b", 500_000),
            ElectionAssessment::KeepIncumbent
        );
    }

    #[test]
    fn silent_incumbent_is_purged() {
        let r = record("i-a", VoteState::Done, 90_000);
        assert_eq!(assess(Some(&r), false, "i-b", 500_000), ElectionAssessment::Purge);
    }

    #[test]
    fn expired_vote_is_purged() {
        let r = record("i-a", VoteState::Pending, 90_000);
        assert_eq!(assess(Some(&r), false, "i-b", 90_001), ElectionAssessment::Purge);
    }

    #[test]
    fn own_pending_vote_finalizes() {
        let r = record("i-a", VoteState::Pending, 90_000);
        assert_eq!(
            assess(Some(&r), false, "i-a", 10_000),
            ElectionAssessment::FinalizeSelf
        );
    }

    #[test]
    fn foreign_pending_vote_waits() {
        let r = record("i-a", VoteState::Pending, 90_000);
        assert_eq!(assess(Some(&r), false, "i-b", 10_000), ElectionAssessment::Wait);
    }

    #[test]
    fn vote_deadline_is_inclusive() {
        let r = record("i-a", VoteState::Pending, 90_000);
        // Exactly at the deadline the vote is still live.
        assert_eq!(assess(Some(&r), false, "i-b", 90_000), ElectionAssessment::Wait);
    }
}
