//! In-memory storage backend for tests.

use peridot_types::{
    ApplyBatchRequest, Hash, PrivateKey, RawBatch, Receipt, ReceiptBody, Root, StorageBackend,
    StorageError, RECEIPT_VERSION,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// A storage backend that serves seeded input batches and signs apply
/// receipts with the configured storage-member keys.
pub struct MemoryStorage {
    signers: Vec<PrivateKey>,
    batches: parking_lot::Mutex<HashMap<Hash, RawBatch>>,
    applies: parking_lot::Mutex<Vec<ApplyBatchRequest>>,
    fail_apply: AtomicBool,
    fail_fetch: AtomicBool,
}

impl MemoryStorage {
    /// Storage signing receipts with the given member keys.
    pub fn new(signers: Vec<PrivateKey>) -> Self {
        Self {
            signers,
            batches: parking_lot::Mutex::new(HashMap::new()),
            applies: parking_lot::Mutex::new(Vec::new()),
            fail_apply: AtomicBool::new(false),
            fail_fetch: AtomicBool::new(false),
        }
    }

    /// Seed an input batch retrievable by its root hash.
    pub fn insert_batch(&self, io_root: Hash, batch: RawBatch) {
        self.batches.lock().insert(io_root, batch);
    }

    /// Apply requests observed so far.
    pub fn applies(&self) -> Vec<ApplyBatchRequest> {
        self.applies.lock().clone()
    }

    /// Make subsequent `apply_batch` calls fail.
    pub fn set_fail_apply(&self, fail: bool) {
        self.fail_apply.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `get_input_batch` calls fail.
    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryStorage {
    async fn apply_batch(&self, request: ApplyBatchRequest) -> Result<Vec<Receipt>, StorageError> {
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected apply failure".into()));
        }

        let body = ReceiptBody {
            version: RECEIPT_VERSION,
            namespace: request.namespace,
            round: request.dst_round,
            roots: request.ops.iter().map(|op| op.dst_root).collect(),
        };
        self.applies.lock().push(request);

        Ok(self
            .signers
            .iter()
            .map(|key| Receipt::sign(key, &body).expect("receipt signing"))
            .collect())
    }

    async fn get_input_batch(&self, root: Root) -> Result<RawBatch, StorageError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected fetch failure".into()));
        }
        self.batches
            .lock()
            .get(&root.hash)
            .cloned()
            .ok_or(StorageError::RootNotFound)
    }
}
