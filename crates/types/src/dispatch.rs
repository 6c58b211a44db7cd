//! Transaction scheduler batch dispatches.

use crate::{
    BlockHeader, CryptoError, Hash, PrivateKey, Signature, Signed, DOMAIN_BATCH_DISPATCH,
};
use sbor::prelude::*;

/// Body of a batch dispatch from the transaction scheduler.
///
/// Announces that a batch with the given I/O root has been scheduled for the
/// named executor committee, backed by storage receipts for the inputs.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct BatchDispatch {
    /// Executor committee the batch is dispatched to.
    pub committee_id: Hash,
    /// Root of the input batch in storage.
    pub io_root: Hash,
    /// Storage-committee signatures attesting the inputs are durable.
    pub storage_signatures: Vec<Signature>,
    /// Header of the block the batch was scheduled against.
    pub header: BlockHeader,
}

/// A batch dispatch signed by the transaction scheduler.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
#[sbor(transparent)]
pub struct SignedDispatch(pub Signed);

impl SignedDispatch {
    /// Sign a dispatch body with a transaction-scheduler key.
    pub fn sign(key: &PrivateKey, body: &BatchDispatch) -> Result<Self, CryptoError> {
        Ok(Self(Signed::sign(key, DOMAIN_BATCH_DISPATCH, body)?))
    }

    /// Verify the signature and decode the dispatch body.
    pub fn open(&self) -> Result<BatchDispatch, CryptoError> {
        self.0.open(DOMAIN_BATCH_DISPATCH)
    }

    /// The dispatcher's signature over the body.
    pub fn signature(&self) -> &Signature {
        &self.0.signature
    }
}

/// An inbound peer-to-peer message relevant to the executor worker.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub enum PeerMessage {
    /// A signed batch dispatch from the transaction scheduler.
    TxnSchedulerBatchDispatch(SignedDispatch),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Namespace;

    fn dispatch_body() -> BatchDispatch {
        BatchDispatch {
            committee_id: Hash::digest(b"committee"),
            io_root: Hash::digest(b"inputs"),
            storage_signatures: vec![],
            header: BlockHeader {
                namespace: Namespace::from_raw([1; 32]),
                round: 5,
                timestamp: 100,
                previous_hash: Hash::digest(b"prev"),
                io_root: Hash::digest(b"io"),
                state_root: Hash::digest(b"state"),
            },
        }
    }

    #[test]
    fn test_dispatch_sign_open_roundtrip() {
        let key = PrivateKey::from_seed(&[4u8; 32]);
        let body = dispatch_body();

        let signed = SignedDispatch::sign(&key, &body).unwrap();
        assert_eq!(signed.signature().public_key, key.public_key());
        assert_eq!(signed.open().unwrap(), body);
    }

    #[test]
    fn test_dispatch_open_rejects_other_signer_claim() {
        let key = PrivateKey::from_seed(&[4u8; 32]);
        let imposter = PrivateKey::from_seed(&[5u8; 32]);
        let body = dispatch_body();

        let mut signed = SignedDispatch::sign(&key, &body).unwrap();
        // Claiming another signer's key must fail verification.
        signed.0.signature.public_key = imposter.public_key();
        assert!(signed.open().is_err());
    }
}
