//! Executor committee node for the Peridot worker.
//!
//! The node is a per-runtime state machine coordinating four concerns:
//!
//! - the hosted runtime's lifecycle events (via `peridot-host`);
//! - admission of transaction-scheduler dispatches;
//! - batch execution with discrepancy handling between primary and backup
//!   workers;
//! - storage commitment and publication of signed executor commitments.
//!
//! External collaborators (storage, gossip, consensus submission, merge
//! node, registration) are narrow trait seams injected at construction.

mod config;
mod epoch;
mod fault;
mod node;
mod state;

pub use config::NodeConfig;
pub use epoch::{EpochError, EpochSnapshot};
pub use node::{Node, NodeDependencies};
pub use state::{NodeState, PendingBatch, ProcessingState, StateName};

use peridot_types::{CapabilityTee, CryptoError, ExecutorCommitment, Namespace, Version};

/// Executor node error taxonomy.
///
/// Admission errors surface to the peer-message handler and are logged;
/// in-flight failures route through batch abort. None of these crash the
/// node.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("executor: received txn scheduler dispatch msg from non-txn scheduler")]
    MsgFromNonTxnScheduler,

    #[error("executor: incompatible header")]
    IncompatibleHeader,

    #[error("executor: invalid storage receipt")]
    InvalidReceipt,

    #[error("executor: failed to fetch from storage")]
    StorageFailed,

    #[error("executor: incorrect state")]
    IncorrectState,

    #[error("executor: incorrect role")]
    IncorrectRole,

    #[error("executor: runtime aborted batch processing")]
    RuntimeAborted,

    #[error("executor: seen newer block")]
    SeenNewerBlock,

    #[error("executor: malformed dispatch: {0}")]
    MalformedDispatch(CryptoError),

    #[error("executor: failed to sign commitment: {0}")]
    SignCommitment(CryptoError),

    #[error("executor: failed to publish commitment")]
    PublishFailed,
}

/// Error from publishing or submitting a commitment.
#[derive(Debug, Clone, thiserror::Error)]
#[error("commitment distribution failed: {0}")]
pub struct DistributionError(pub String);

/// What the node advertises about its hosted runtime.
#[derive(Debug, Clone)]
pub struct RuntimeAdvertisement {
    pub runtime_id: Namespace,
    pub version: Version,
    pub capability_tee: Option<CapabilityTee>,
}

/// Registration seam: marks the node (un)available for its runtime.
pub trait RoleProvider: Send + Sync + 'static {
    /// Advertise the runtime as serviceable with the given capabilities.
    fn set_available(&self, advertisement: RuntimeAdvertisement);

    /// Withdraw the runtime from service.
    fn set_unavailable(&self);
}

/// Gossip seam: publishes executor commitments to the merge committee.
#[async_trait::async_trait]
pub trait CommitmentDistributor: Send + Sync + 'static {
    async fn publish_execute_finished(
        &self,
        commitment: &ExecutorCommitment,
    ) -> Result<(), DistributionError>;
}

/// Consensus seam: submits an executor commitment directly, bypassing the
/// merge committee. Used by the fault detector.
#[async_trait::async_trait]
pub trait CommitmentSubmitter: Send + Sync + 'static {
    async fn submit(&self, commitment: &ExecutorCommitment) -> Result<(), DistributionError>;
}

/// The local merge node, when this node is also a merge member. Passed in
/// explicitly at construction; the merge node holds no back-reference.
pub trait MergeHandler: Send + Sync + 'static {
    fn deliver_commitment(&self, commitment: &ExecutorCommitment);
}
