//! Core types for the Peridot executor worker.
//!
//! This crate provides the foundational types used throughout the worker:
//!
//! - **Primitives**: Hash, namespaces, versions, keys and signatures
//! - **Chain types**: Block, BlockHeader, root-hash events
//! - **Work types**: RawBatch, ComputedBatch, dispatches, commitments
//! - **Storage contract**: roots, apply operations, receipts and the
//!   `StorageBackend` trait
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer. Everything
//! that is hashed or signed is encoded canonically with SBOR.

mod batch;
mod block;
mod commitment;
mod committee;
mod crypto;
mod dispatch;
mod events;
mod hash;
mod identifiers;
mod storage;

pub use batch::{ComputedBatch, LogEntry, RawBatch, WriteLog};
pub use block::{Block, BlockHeader};
pub use commitment::{ExecutorCommitment, ExecutorCommitmentBody, ReceiptValidationError};
pub use committee::{Committee, CommitteeKind, CommitteeMember, Role};
pub use crypto::{
    verify_many_to_one, CapabilityTee, CryptoError, PrivateKey, PublicKey, RawSignature, Signature,
    Signed, DOMAIN_BATCH_DISPATCH, DOMAIN_EXECUTOR_COMMIT, DOMAIN_STORAGE_RECEIPT,
};
pub use dispatch::{BatchDispatch, PeerMessage, SignedDispatch};
pub use events::{ExecutionDiscrepancyEvent, RoothashEvent};
pub use hash::{Hash, HexError};
pub use identifiers::{Namespace, Version};
pub use storage::{
    ApplyBatchRequest, ApplyOp, Receipt, ReceiptBody, Root, StorageBackend, StorageError,
    RECEIPT_VERSION,
};
