//! Events delivered from the root-hash consensus backend.

use crate::Hash;
use sbor::prelude::*;

/// A discrepancy declaration: primary executor workers disagreed and backup
/// workers must re-execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct ExecutionDiscrepancyEvent {
    /// The executor committee the discrepancy occurred in.
    pub committee_id: Hash,
}

/// An event observed on a runtime's root-hash chain.
///
/// Events are delivered in backend order; consumers must tolerate duplicates
/// and events for rounds they have already moved past.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub enum RoothashEvent {
    /// Primary workers' commitments disagreed.
    ExecutionDiscrepancyDetected(ExecutionDiscrepancyEvent),
    /// A merge commitment was observed for the given round.
    MergeCommitted { round: u64 },
}
