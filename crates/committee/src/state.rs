//! Executor node states and the transition table.

use peridot_types::{
    BlockHeader, ExecutionDiscrepancyEvent, Hash, RawBatch, Signature,
};
use std::fmt;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Span;

/// An admitted batch waiting for its prerequisites.
#[derive(Debug, Clone)]
pub struct PendingBatch {
    /// Root of the input batch in storage.
    pub io_root: Hash,
    /// The fetched input transactions.
    pub batch: RawBatch,
    /// Tracing span covering this batch from admission to finalize.
    pub span: Span,
    /// The transaction scheduler's signature over the dispatch.
    pub txn_sched_signature: Signature,
    /// Storage signatures attesting the inputs were durable.
    pub input_storage_signatures: Vec<Signature>,
}

/// A batch currently being executed by the runtime.
#[derive(Debug, Clone)]
pub struct ProcessingState {
    /// Root of the input batch in storage.
    pub io_root: Hash,
    /// The input transactions handed to the runtime.
    pub batch: RawBatch,
    /// Tracing span covering this batch.
    pub span: Span,
    /// When processing started.
    pub started_at: Instant,
    /// Cancels the batch task; callable exactly once from abort.
    pub cancel: CancellationToken,
    /// Sequence number tagging this batch's completion message, so stale
    /// completions are ignored.
    pub seq: u64,
    /// The transaction scheduler's signature over the dispatch.
    pub txn_sched_signature: Signature,
    /// Storage signatures attesting the inputs were durable.
    pub input_storage_signatures: Vec<Signature>,
}

/// The per-round state of the executor node.
#[derive(Debug, Clone)]
pub enum NodeState {
    /// Not an executor member this epoch.
    NotReady,
    /// Ready for a dispatch from the transaction scheduler.
    WaitingForBatch {
        /// A discrepancy event that arrived before the batch it belongs to.
        pending_event: Option<ExecutionDiscrepancyEvent>,
    },
    /// Dispatch accepted, local chain not yet caught up to its header.
    WaitingForBlock {
        pending: PendingBatch,
        /// The header the dispatch was scheduled against.
        header: BlockHeader,
    },
    /// Backup worker holding a batch until a discrepancy is declared.
    WaitingForEvent { pending: PendingBatch },
    /// The runtime is executing a batch.
    ProcessingBatch(ProcessingState),
    /// Commitment published (or batch aborted); waiting for the round to
    /// finalize.
    WaitingForFinalize { started_at: Instant },
}

impl NodeState {
    /// The state's name, used for transition validation and broadcasts.
    pub fn name(&self) -> StateName {
        match self {
            NodeState::NotReady => StateName::NotReady,
            NodeState::WaitingForBatch { .. } => StateName::WaitingForBatch,
            NodeState::WaitingForBlock { .. } => StateName::WaitingForBlock,
            NodeState::WaitingForEvent { .. } => StateName::WaitingForEvent,
            NodeState::ProcessingBatch(_) => StateName::ProcessingBatch,
            NodeState::WaitingForFinalize { .. } => StateName::WaitingForFinalize,
        }
    }
}

/// Discriminant of [`NodeState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateName {
    NotReady,
    WaitingForBatch,
    WaitingForBlock,
    WaitingForEvent,
    ProcessingBatch,
    WaitingForFinalize,
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateName::NotReady => "NotReady",
            StateName::WaitingForBatch => "WaitingForBatch",
            StateName::WaitingForBlock => "WaitingForBlock",
            StateName::WaitingForEvent => "WaitingForEvent",
            StateName::ProcessingBatch => "ProcessingBatch",
            StateName::WaitingForFinalize => "WaitingForFinalize",
        };
        write!(f, "{}", name)
    }
}

/// Whether `from -> to` is a valid state transition.
///
/// `NotReady` and `WaitingForBatch` permit self-transitions: epoch
/// transitions re-enter them, and recording a pending discrepancy event
/// replaces `WaitingForBatch` with itself. A backup worker whose dispatch
/// arrived ahead of the block moves `WaitingForBlock -> WaitingForEvent`
/// once the block lands.
pub(crate) fn transition_allowed(from: StateName, to: StateName) -> bool {
    use StateName::*;
    let allowed: &[StateName] = match from {
        NotReady => &[NotReady, WaitingForBatch],
        WaitingForBatch => &[
            WaitingForBatch,
            NotReady,
            WaitingForBlock,
            WaitingForEvent,
            ProcessingBatch,
        ],
        WaitingForBlock => &[WaitingForBatch, WaitingForEvent, ProcessingBatch],
        WaitingForEvent => &[WaitingForBatch, ProcessingBatch],
        ProcessingBatch => &[WaitingForFinalize],
        WaitingForFinalize => &[WaitingForBatch, NotReady],
    };
    allowed.contains(&to)
}
