//! Immutable per-epoch view of committee membership.

use peridot_types::{Committee, CommitteeKind, Hash, PublicKey, Role, Signature};
use std::collections::{HashMap, HashSet};

/// Errors from committee signature verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EpochError {
    /// No committee of the requested kind was elected this epoch.
    #[error("no {0} committee in epoch")]
    UnknownCommittee(CommitteeKind),

    /// A signature was produced by a key outside the committee.
    #[error("signature from non-member of {0} committee")]
    NonMemberSignature(CommitteeKind),
}

/// Per-committee membership view.
#[derive(Debug, Clone)]
struct CommitteeInfo {
    id: Hash,
    public_keys: HashSet<PublicKey>,
    local_role: Option<Role>,
}

/// An immutable snapshot of committee membership for one epoch.
///
/// Built at epoch-transition hooks and shared freely; all reads are
/// lock-free. The local node's roles are resolved against its identity key
/// at construction time.
#[derive(Debug, Clone)]
pub struct EpochSnapshot {
    epoch: u64,
    committees: HashMap<CommitteeKind, CommitteeInfo>,
}

impl EpochSnapshot {
    /// Build a snapshot from the elected committees, resolving the local
    /// node's roles from `local_key`.
    pub fn new(epoch: u64, local_key: PublicKey, committees: &[Committee]) -> Self {
        let committees = committees
            .iter()
            .map(|committee| {
                (
                    committee.kind,
                    CommitteeInfo {
                        id: committee.id(),
                        public_keys: committee
                            .members
                            .iter()
                            .map(|member| member.public_key)
                            .collect(),
                        local_role: committee.role_of(&local_key),
                    },
                )
            })
            .collect();

        Self { epoch, committees }
    }

    /// A snapshot with no elected committees; the node is not ready.
    pub fn empty(epoch: u64) -> Self {
        Self {
            epoch,
            committees: HashMap::new(),
        }
    }

    /// The epoch this snapshot describes.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    fn committee(&self, kind: CommitteeKind) -> Option<&CommitteeInfo> {
        self.committees.get(&kind)
    }

    fn executor_role(&self) -> Option<Role> {
        self.committee(CommitteeKind::Executor)?.local_role
    }

    /// Whether the local node is a member of the executor committee.
    pub fn is_executor_member(&self) -> bool {
        self.executor_role().is_some()
    }

    /// Whether the local node is a primary executor worker.
    pub fn is_executor_worker(&self) -> bool {
        self.executor_role() == Some(Role::Worker)
    }

    /// Whether the local node is an executor backup worker.
    pub fn is_executor_backup_worker(&self) -> bool {
        self.executor_role() == Some(Role::BackupWorker)
    }

    /// Whether the local node is a member of the merge committee.
    pub fn is_merge_member(&self) -> bool {
        self.committee(CommitteeKind::Merge)
            .is_some_and(|info| info.local_role.is_some())
    }

    /// The executor committee identifier, if one was elected.
    pub fn executor_committee_id(&self) -> Option<Hash> {
        self.committee(CommitteeKind::Executor).map(|info| info.id)
    }

    /// Public keys of the current transaction scheduler committee.
    pub fn transaction_scheduler_keys(&self) -> Option<&HashSet<PublicKey>> {
        self.committee(CommitteeKind::TransactionScheduler)
            .map(|info| &info.public_keys)
    }

    /// Verify that every signature in the bundle was produced by a current
    /// member of the committee of the given kind.
    ///
    /// Does not count quorum; replication floors are checked separately.
    pub fn verify_committee_signatures(
        &self,
        kind: CommitteeKind,
        signatures: &[Signature],
    ) -> Result<(), EpochError> {
        let info = self
            .committee(kind)
            .ok_or(EpochError::UnknownCommittee(kind))?;

        for signature in signatures {
            if !info.public_keys.contains(&signature.public_key) {
                return Err(EpochError::NonMemberSignature(kind));
            }
        }
        Ok(())
    }
}
