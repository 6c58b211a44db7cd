//! Raw transaction batches, write logs and runtime execution results.

use crate::{BlockHeader, RawSignature};
use sbor::prelude::*;

/// An ordered sequence of opaque transaction blobs, identified by the I/O
/// root hash of the tree it was read from.
#[derive(Debug, Clone, Default, PartialEq, Eq, BasicSbor)]
#[sbor(transparent)]
pub struct RawBatch(pub Vec<Vec<u8>>);

impl RawBatch {
    /// Number of transactions in the batch.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the batch contains no transactions.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Vec<u8>>> for RawBatch {
    fn from(txs: Vec<Vec<u8>>) -> Self {
        Self(txs)
    }
}

/// A single key/value write against a content-addressed tree.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct LogEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// An ordered write log, replayable against a source root to produce a
/// destination root.
pub type WriteLog = Vec<LogEntry>;

/// Result of executing a batch inside the runtime.
///
/// Returned over the runtime wire protocol; the header is the runtime's
/// proposed header for the next round and the write logs transform the
/// current roots into the header's roots.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ComputedBatch {
    /// Proposed header for the next round.
    pub header: BlockHeader,

    /// Write log transforming the input I/O root into `header.io_root`.
    pub io_write_log: WriteLog,

    /// Write log transforming the current state root into `header.state_root`.
    pub state_write_log: WriteLog,

    /// Runtime attestation-key signature over the proposed header, produced
    /// inside the TEE. Zero when attestation is disabled.
    pub rak_signature: RawSignature,
}
