//! Signed fixture builders.
//!
//! These create properly-signed test data that exercises the real
//! verification paths: dispatches signed by the transaction scheduler key,
//! input receipts signed by storage-member keys, and computed batches whose
//! headers chain onto a base header.

use crate::TestCommittees;
use peridot_types::{
    BatchDispatch, Block, BlockHeader, ComputedBatch, Hash, LogEntry, Namespace, RawSignature,
    ReceiptBody, Signature, SignedDispatch, RECEIPT_VERSION,
};

/// Deterministic block header for the given round.
pub fn test_header(namespace: Namespace, round: u64) -> BlockHeader {
    BlockHeader {
        namespace,
        round,
        timestamp: 1_000 + round,
        previous_hash: Hash::digest(format!("previous/{round}").as_bytes()),
        io_root: Hash::digest(format!("io/{round}").as_bytes()),
        state_root: Hash::digest(format!("state/{round}").as_bytes()),
    }
}

/// Deterministic block for the given round.
pub fn test_block(namespace: Namespace, round: u64) -> Block {
    Block::new(test_header(namespace, round))
}

/// Sign input-batch receipts over `io_root` with the first `count` storage
/// members.
///
/// The receipt body covers round `header_round + 1`, matching what the
/// admission pipeline reconstructs.
pub fn sign_input_receipts(
    committees: &TestCommittees,
    namespace: Namespace,
    header_round: u64,
    io_root: Hash,
    count: usize,
) -> Vec<Signature> {
    let body = ReceiptBody {
        version: RECEIPT_VERSION,
        namespace,
        round: header_round + 1,
        roots: vec![io_root],
    };
    let encoded = body.canonical_encoding();

    committees
        .storage_members
        .iter()
        .take(count)
        .map(|key| key.sign(peridot_types::DOMAIN_STORAGE_RECEIPT, &encoded))
        .collect()
}

/// A dispatch for `header` signed by the committees' transaction scheduler,
/// carrying `signature_count` input storage receipts.
pub fn make_signed_dispatch(
    committees: &TestCommittees,
    header: BlockHeader,
    io_root: Hash,
    signature_count: usize,
) -> SignedDispatch {
    let storage_signatures = sign_input_receipts(
        committees,
        header.namespace,
        header.round,
        io_root,
        signature_count,
    );
    let body = BatchDispatch {
        committee_id: committees.executor_committee_id(),
        io_root,
        storage_signatures,
        header,
    };
    SignedDispatch::sign(&committees.txn_scheduler, &body).expect("fixture dispatch signing")
}

/// A computed batch chaining onto `base`: proposes round `base.round + 1`
/// with deterministic result roots and minimal write logs.
pub fn make_computed_batch(base: &BlockHeader) -> ComputedBatch {
    let next_round = base.round + 1;
    ComputedBatch {
        header: BlockHeader {
            namespace: base.namespace,
            round: next_round,
            timestamp: base.timestamp + 1,
            previous_hash: base.encoded_hash(),
            io_root: Hash::digest(format!("computed-io/{next_round}").as_bytes()),
            state_root: Hash::digest(format!("computed-state/{next_round}").as_bytes()),
        },
        io_write_log: vec![LogEntry {
            key: b"output".to_vec(),
            value: format!("round/{next_round}").into_bytes(),
        }],
        state_write_log: vec![LogEntry {
            key: b"counter".to_vec(),
            value: next_round.to_le_bytes().to_vec(),
        }],
        rak_signature: RawSignature::zero(),
    }
}
