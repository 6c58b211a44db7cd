//! Deterministic committees for tests.

use peridot_committee::EpochSnapshot;
use peridot_types::{Committee, CommitteeKind, CommitteeMember, Hash, PrivateKey, Role};

/// A full set of per-epoch committees with deterministic seeded keypairs.
///
/// Layout: one transaction scheduler, a configurable number of executor
/// workers and backups, three storage members and one merge member. Keys are
/// derived from the seed so fixtures are reproducible across runs.
pub struct TestCommittees {
    pub executor_workers: Vec<PrivateKey>,
    pub executor_backups: Vec<PrivateKey>,
    pub storage_members: Vec<PrivateKey>,
    pub txn_scheduler: PrivateKey,
    pub merge_members: Vec<PrivateKey>,
}

fn derive_key(seed: u64, tag: u8, index: u8) -> PrivateKey {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&seed.to_le_bytes());
    bytes[8] = tag;
    bytes[9] = index;
    PrivateKey::from_seed(&bytes)
}

impl TestCommittees {
    /// Build committees with 2 executor workers, 1 backup, 3 storage
    /// members, 1 transaction scheduler and 1 merge member.
    pub fn new(seed: u64) -> Self {
        Self {
            executor_workers: (0..2).map(|i| derive_key(seed, 1, i)).collect(),
            executor_backups: (0..1).map(|i| derive_key(seed, 2, i)).collect(),
            storage_members: (0..3).map(|i| derive_key(seed, 3, i)).collect(),
            txn_scheduler: derive_key(seed, 4, 0),
            merge_members: (0..1).map(|i| derive_key(seed, 5, i)).collect(),
        }
    }

    /// The executor committee (workers then backups).
    pub fn executor_committee(&self) -> Committee {
        let mut members: Vec<CommitteeMember> = self
            .executor_workers
            .iter()
            .map(|key| CommitteeMember {
                public_key: key.public_key(),
                role: Role::Worker,
            })
            .collect();
        members.extend(self.executor_backups.iter().map(|key| CommitteeMember {
            public_key: key.public_key(),
            role: Role::BackupWorker,
        }));
        Committee {
            kind: CommitteeKind::Executor,
            members,
        }
    }

    /// The executor committee identifier.
    pub fn executor_committee_id(&self) -> Hash {
        self.executor_committee().id()
    }

    /// All four elected committees.
    pub fn committees(&self) -> Vec<Committee> {
        let simple = |kind, keys: &[PrivateKey]| Committee {
            kind,
            members: keys
                .iter()
                .map(|key| CommitteeMember {
                    public_key: key.public_key(),
                    role: Role::Worker,
                })
                .collect(),
        };

        // The first executor worker doubles as a merge member, mirroring
        // nodes that serve on several committees at once.
        let mut merge_keys = self.merge_members.clone();
        merge_keys.push(self.executor_workers[0].clone());

        vec![
            self.executor_committee(),
            simple(CommitteeKind::Storage, &self.storage_members),
            simple(
                CommitteeKind::TransactionScheduler,
                std::slice::from_ref(&self.txn_scheduler),
            ),
            simple(CommitteeKind::Merge, &merge_keys),
        ]
    }

    /// Epoch snapshot as seen by the node holding `key`.
    pub fn snapshot_for(&self, epoch: u64, key: &PrivateKey) -> EpochSnapshot {
        EpochSnapshot::new(epoch, key.public_key(), &self.committees())
    }

    /// Snapshot for the first executor worker.
    pub fn worker_snapshot(&self, epoch: u64) -> EpochSnapshot {
        self.snapshot_for(epoch, &self.executor_workers[0])
    }

    /// Snapshot for the first executor backup worker.
    pub fn backup_snapshot(&self, epoch: u64) -> EpochSnapshot {
        self.snapshot_for(epoch, &self.executor_backups[0])
    }
}
