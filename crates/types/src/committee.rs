//! Committee and role types elected per epoch by the scheduler.

use crate::{Hash, PublicKey};
use sbor::prelude::*;
use std::fmt;

/// The functional kind of an elected committee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BasicSbor)]
pub enum CommitteeKind {
    /// Executes dispatched batches.
    Executor,
    /// Persists roots and signs receipts.
    Storage,
    /// Schedules and dispatches batches.
    TransactionScheduler,
    /// Merges executor commitments into a root hash.
    Merge,
}

impl fmt::Display for CommitteeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitteeKind::Executor => write!(f, "executor"),
            CommitteeKind::Storage => write!(f, "storage"),
            CommitteeKind::TransactionScheduler => write!(f, "txn_scheduler"),
            CommitteeKind::Merge => write!(f, "merge"),
        }
    }
}

/// The role a member plays within its committee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BasicSbor)]
pub enum Role {
    /// Primary worker: acts as soon as work arrives.
    Worker,
    /// Backup worker: acts only once a discrepancy is declared.
    BackupWorker,
}

/// A single elected committee member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct CommitteeMember {
    /// The member's node identity key.
    pub public_key: PublicKey,
    /// The member's role within the committee.
    pub role: Role,
}

/// An elected committee for one epoch.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Committee {
    /// What this committee does.
    pub kind: CommitteeKind,
    /// The elected members, in election order.
    pub members: Vec<CommitteeMember>,
}

impl Committee {
    /// The committee identifier: hash of the canonical encoding.
    ///
    /// Dispatches and discrepancy events reference committees by this id.
    pub fn id(&self) -> Hash {
        let bytes = basic_encode(self).expect("Committee encoding should never fail");
        Hash::digest(&bytes)
    }

    /// Look up a member's role by public key.
    pub fn role_of(&self, key: &PublicKey) -> Option<Role> {
        self.members
            .iter()
            .find(|m| &m.public_key == key)
            .map(|m| m.role)
    }
}
