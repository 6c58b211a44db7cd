//! Executor commitments over computed batches.

use crate::{
    BlockHeader, CryptoError, Hash, Namespace, PrivateKey, RawSignature, ReceiptBody, Signature,
    Signed, DOMAIN_EXECUTOR_COMMIT, RECEIPT_VERSION,
};
use sbor::prelude::*;

/// Errors from validating a storage receipt against a proposed commitment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReceiptValidationError {
    #[error("unexpected receipt version: {0}")]
    UnexpectedVersion(u16),

    #[error("receipt is for a different namespace")]
    NamespaceMismatch,

    #[error("receipt is for round {got}, expected {expected}")]
    RoundMismatch { expected: u64, got: u64 },

    #[error("receipt roots do not match the proposed roots")]
    RootsMismatch,
}

/// Body of an executor commitment.
///
/// Binds together everything a merge worker needs to cross-check the
/// execution: the proposed header, the runtime attestation signature, the
/// dispatch that authorized the batch and the storage receipts for both the
/// inputs and the results.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ExecutorCommitmentBody {
    /// Executor committee the commitment is produced for.
    pub committee_id: Hash,
    /// Proposed header for the next round, as computed by the runtime.
    pub header: BlockHeader,
    /// Runtime attestation-key signature over the proposed header.
    pub rak_signature: RawSignature,
    /// The transaction scheduler's signature over the originating dispatch.
    pub txn_sched_signature: Signature,
    /// Root of the input batch the commitment was computed from.
    pub input_root: Hash,
    /// Storage signatures attesting the inputs were durable.
    pub input_storage_signatures: Vec<Signature>,
    /// Storage signatures attesting the results are durable.
    pub storage_signatures: Vec<Signature>,
}

impl ExecutorCommitmentBody {
    /// Validate a storage receipt returned by the commit of this body's
    /// write logs.
    ///
    /// The receipt must cover exactly `[header.io_root, header.state_root]`
    /// for the expected namespace and round.
    pub fn verify_storage_receipt(
        &self,
        namespace: Namespace,
        round: u64,
        receipt: &ReceiptBody,
    ) -> Result<(), ReceiptValidationError> {
        if receipt.version != RECEIPT_VERSION {
            return Err(ReceiptValidationError::UnexpectedVersion(receipt.version));
        }
        if receipt.namespace != namespace {
            return Err(ReceiptValidationError::NamespaceMismatch);
        }
        if receipt.round != round {
            return Err(ReceiptValidationError::RoundMismatch {
                expected: round,
                got: receipt.round,
            });
        }
        if receipt.roots != [self.header.io_root, self.header.state_root] {
            return Err(ReceiptValidationError::RootsMismatch);
        }
        Ok(())
    }
}

/// An executor commitment signed by the node's identity key.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
#[sbor(transparent)]
pub struct ExecutorCommitment(pub Signed);

impl ExecutorCommitment {
    /// Sign a commitment body with the node identity key.
    pub fn sign(key: &PrivateKey, body: &ExecutorCommitmentBody) -> Result<Self, CryptoError> {
        Ok(Self(Signed::sign(key, DOMAIN_EXECUTOR_COMMIT, body)?))
    }

    /// Verify the signature and decode the commitment body.
    pub fn open(&self) -> Result<ExecutorCommitmentBody, CryptoError> {
        self.0.open(DOMAIN_EXECUTOR_COMMIT)
    }

    /// The committing node's signature.
    pub fn signature(&self) -> &Signature {
        &self.0.signature
    }
}
