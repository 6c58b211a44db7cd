//! Block and block header types for a runtime's root-hash chain.

use crate::{Hash, Namespace};
use sbor::prelude::*;

/// Block header for one round of a runtime's chain.
///
/// The header is what the transaction scheduler dispatches against and what
/// the executor commits over. Storage roots are content-addressed: `io_root`
/// covers the batch inputs/outputs, `state_root` the runtime's mutable state.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct BlockHeader {
    /// Runtime namespace this header belongs to.
    pub namespace: Namespace,

    /// Round number, monotonically increasing per namespace.
    pub round: u64,

    /// Unix timestamp (seconds) when the block was produced.
    pub timestamp: u64,

    /// Hash of the previous block's header.
    pub previous_hash: Hash,

    /// Root of the batch I/O tree after this round.
    pub io_root: Hash,

    /// Root of the runtime state tree after this round.
    pub state_root: Hash,
}

impl BlockHeader {
    /// Compare two headers, ignoring the timestamp.
    ///
    /// A dispatched batch references the header it was scheduled against;
    /// the locally observed block may carry a different timestamp while
    /// still being the same round. All consensus-relevant fields must match.
    pub fn mostly_equal(&self, other: &BlockHeader) -> bool {
        self.namespace == other.namespace
            && self.round == other.round
            && self.previous_hash == other.previous_hash
            && self.io_root == other.io_root
            && self.state_root == other.state_root
    }

    /// Hash of the canonical encoding of this header.
    pub fn encoded_hash(&self) -> Hash {
        let bytes = basic_encode(self).expect("BlockHeader encoding should never fail");
        Hash::digest(&bytes)
    }
}

/// A block on a runtime's root-hash chain.
///
/// The worker only consumes headers; batch payloads are fetched from storage
/// by root.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Block {
    /// The block header.
    pub header: BlockHeader,
}

impl Block {
    /// Construct a block from its header.
    pub fn new(header: BlockHeader) -> Self {
        Self { header }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(round: u64, timestamp: u64) -> BlockHeader {
        BlockHeader {
            namespace: Namespace::from_raw([1; 32]),
            round,
            timestamp,
            previous_hash: Hash::digest(b"prev"),
            io_root: Hash::digest(b"io"),
            state_root: Hash::digest(b"state"),
        }
    }

    #[test]
    fn test_mostly_equal_ignores_timestamp() {
        let a = header(7, 1000);
        let b = header(7, 2000);
        assert!(a.mostly_equal(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_mostly_equal_detects_round_change() {
        let a = header(7, 1000);
        let b = header(8, 1000);
        assert!(!a.mostly_equal(&b));
    }

    #[test]
    fn test_encoded_hash_covers_timestamp() {
        let a = header(7, 1000);
        let b = header(7, 2000);
        assert_ne!(a.encoded_hash(), b.encoded_hash());
        assert_eq!(a.encoded_hash(), a.clone().encoded_hash());
    }
}
