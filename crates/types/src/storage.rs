//! Storage backend contract: roots, apply operations and signed receipts.
//!
//! The worker does not store state itself; it drives an external storage
//! backend and verifies the receipts the storage committee returns.

use crate::{
    CryptoError, Hash, Namespace, PrivateKey, RawBatch, Signature, Signed, WriteLog,
    DOMAIN_STORAGE_RECEIPT,
};
use sbor::prelude::*;

/// Current receipt body version.
pub const RECEIPT_VERSION: u16 = 1;

/// A content-addressed storage root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct Root {
    /// Namespace the root is stored under.
    pub namespace: Namespace,
    /// Round the root was (or will be) committed in.
    pub version: u64,
    /// The root hash itself.
    pub hash: Hash,
}

/// A single apply operation: replay `write_log` against `(src_round,
/// src_root)` to produce `dst_root`.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ApplyOp {
    pub src_round: u64,
    pub src_root: Hash,
    pub dst_root: Hash,
    pub write_log: WriteLog,
}

/// A batch of apply operations committed atomically for one destination
/// round.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ApplyBatchRequest {
    pub namespace: Namespace,
    pub dst_round: u64,
    pub ops: Vec<ApplyOp>,
}

/// Body of a storage receipt: a storage-committee member's attestation that
/// the listed roots are durably applied.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ReceiptBody {
    /// Receipt format version; always [`RECEIPT_VERSION`].
    pub version: u16,
    /// Namespace the roots are stored under.
    pub namespace: Namespace,
    /// Round the roots belong to.
    pub round: u64,
    /// The attested roots, in apply order.
    pub roots: Vec<Hash>,
}

impl ReceiptBody {
    /// The canonical encoding storage members sign.
    pub fn canonical_encoding(&self) -> Vec<u8> {
        basic_encode(self).expect("ReceiptBody encoding should never fail")
    }
}

/// A signed storage receipt.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
#[sbor(transparent)]
pub struct Receipt(pub Signed);

impl Receipt {
    /// Sign a receipt body with a storage-committee member key.
    pub fn sign(key: &PrivateKey, body: &ReceiptBody) -> Result<Self, CryptoError> {
        Ok(Self(Signed::sign(key, DOMAIN_STORAGE_RECEIPT, body)?))
    }

    /// Verify the signature and decode the receipt body.
    pub fn open(&self) -> Result<ReceiptBody, CryptoError> {
        self.0.open(DOMAIN_STORAGE_RECEIPT)
    }

    /// The signature over the receipt body.
    pub fn signature(&self) -> &Signature {
        &self.0.signature
    }
}

/// Errors surfaced by a storage backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// The requested root is not present.
    #[error("storage: root not found")]
    RootNotFound,

    /// The backend failed to apply or serve a request.
    #[error("storage: backend failure: {0}")]
    Backend(String),

    /// The request exceeded its deadline.
    #[error("storage: request timed out")]
    Timeout,
}

/// The external storage backend the worker commits batches through.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Atomically apply a batch of write logs, returning one signed receipt
    /// per storage-committee replica that persisted it.
    async fn apply_batch(&self, request: ApplyBatchRequest) -> Result<Vec<Receipt>, StorageError>;

    /// Fetch the input transaction batch stored under the given root.
    async fn get_input_batch(&self, root: Root) -> Result<RawBatch, StorageError>;
}
