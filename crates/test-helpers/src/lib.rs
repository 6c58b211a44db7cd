//! Test helpers for the Peridot worker.
//!
//! Provides deterministic committee keypairs, signed fixture builders that
//! exercise real verification paths, an in-memory storage backend and a
//! scripted mock runtime.

mod committees;
mod fixtures;
mod runtime;
mod storage;

pub use committees::TestCommittees;
pub use fixtures::{
    make_computed_batch, make_signed_dispatch, sign_input_receipts, test_block, test_header,
};
pub use runtime::{
    MockRuntime, RecordingDistributor, RecordingMerge, RecordingRoleProvider, RecordingSubmitter,
};
pub use storage::MemoryStorage;
