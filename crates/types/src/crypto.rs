//! Keys, signatures and signed envelopes.
//!
//! All signing in the worker is domain-separated: the signed message is the
//! domain tag prepended to the canonical SBOR encoding of the body. Domain
//! separation prevents a signature produced in one context (e.g. a storage
//! receipt) from being replayed in another (e.g. an executor commitment).
//!
//! | Tag | Purpose |
//! |-----|---------|
//! | `TXN_SCHED_DISPATCH` | Transaction scheduler batch dispatches |
//! | `STORAGE_RECEIPT` | Storage committee write receipts |
//! | `EXECUTOR_COMMIT` | Executor commitments over computed batches |

use ed25519_dalek::{Signer as _, Verifier as _};
use sbor::prelude::*;
use std::fmt;

/// Domain tag for transaction scheduler batch dispatches.
pub const DOMAIN_BATCH_DISPATCH: &[u8] = b"TXN_SCHED_DISPATCH";

/// Domain tag for storage receipts.
pub const DOMAIN_STORAGE_RECEIPT: &[u8] = b"STORAGE_RECEIPT";

/// Domain tag for executor commitments.
pub const DOMAIN_EXECUTOR_COMMIT: &[u8] = b"EXECUTOR_COMMIT";

/// Build the signing message for a domain-separated signature.
fn signing_message(domain: &[u8], body: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(domain.len() + body.len());
    message.extend_from_slice(domain);
    message.extend_from_slice(body);
    message
}

/// Errors from signing, verification and envelope handling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Signature does not verify against the claimed public key.
    #[error("signature verification failed")]
    InvalidSignature,

    /// The envelope body could not be decoded.
    #[error("malformed signed body")]
    MalformedBody,

    /// Canonical encoding of a body failed.
    #[error("body encoding failed")]
    EncodingFailed,

    /// Key bytes do not form a valid key.
    #[error("invalid key bytes")]
    InvalidKey,
}

/// An Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BasicSbor)]
#[sbor(transparent)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    /// Verify `signature` over `body` under the given domain tag.
    pub fn verify(
        &self,
        domain: &[u8],
        body: &[u8],
        signature: &RawSignature,
    ) -> Result<(), CryptoError> {
        let key =
            ed25519_dalek::VerifyingKey::from_bytes(&self.0).map_err(|_| CryptoError::InvalidKey)?;
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        key.verify(&signing_message(domain, body), &sig)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(self.0);
        write!(f, "PublicKey({}..)", &hex[..8])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Raw Ed25519 signature bytes.
#[derive(Clone, Copy, PartialEq, Eq, BasicSbor)]
#[sbor(transparent)]
pub struct RawSignature(pub [u8; 64]);

impl RawSignature {
    /// Zero/placeholder signature for testing.
    pub const fn zero() -> Self {
        Self([0u8; 64])
    }
}

impl fmt::Debug for RawSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(self.0);
        write!(f, "RawSignature({}..)", &hex[..8])
    }
}

/// A signature bundled with the public key that produced it.
///
/// Committee membership checks need to know who signed, so signatures on the
/// wire always carry the signer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct Signature {
    /// The signer's public key.
    pub public_key: PublicKey,
    /// The raw signature bytes.
    pub signature: RawSignature,
}

impl Signature {
    /// Verify this signature over `body` under the given domain tag.
    pub fn verify(&self, domain: &[u8], body: &[u8]) -> Result<(), CryptoError> {
        self.public_key.verify(domain, body, &self.signature)
    }
}

/// Verify that every signature in a bundle covers the same body.
///
/// Returns `true` iff the bundle is non-empty and all signatures verify.
/// Membership of the signers in a committee is a separate check.
pub fn verify_many_to_one(domain: &[u8], body: &[u8], signatures: &[Signature]) -> bool {
    !signatures.is_empty()
        && signatures
            .iter()
            .all(|sig| sig.verify(domain, body).is_ok())
}

/// An Ed25519 signing key.
#[derive(Clone)]
pub struct PrivateKey(ed25519_dalek::SigningKey);

impl PrivateKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self(ed25519_dalek::SigningKey::generate(&mut csprng))
    }

    /// Derive a key from a seed (deterministic, for testing and fixtures).
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(seed))
    }

    /// The corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().to_bytes())
    }

    /// Sign `body` under the given domain tag.
    pub fn sign(&self, domain: &[u8], body: &[u8]) -> Signature {
        let sig = self.0.sign(&signing_message(domain, body));
        Signature {
            public_key: self.public_key(),
            signature: RawSignature(sig.to_bytes()),
        }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({:?})", self.public_key())
    }
}

/// A signed envelope: canonical body bytes plus the signature over them.
///
/// The body is kept as raw bytes so verification covers exactly what was
/// signed; `open` verifies before decoding.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Signed {
    /// Canonical SBOR encoding of the signed body.
    pub blob: Vec<u8>,
    /// Signature over the domain-tagged blob.
    pub signature: Signature,
}

impl Signed {
    /// Encode `value` canonically and sign it under the given domain tag.
    pub fn sign<T: BasicEncode>(
        key: &PrivateKey,
        domain: &[u8],
        value: &T,
    ) -> Result<Self, CryptoError> {
        let blob = sbor::basic_encode(value).map_err(|_| CryptoError::EncodingFailed)?;
        let signature = key.sign(domain, &blob);
        Ok(Self { blob, signature })
    }

    /// Verify the signature and decode the body.
    pub fn open<T: BasicDecode>(&self, domain: &[u8]) -> Result<T, CryptoError> {
        self.signature.verify(domain, &self.blob)?;
        sbor::basic_decode(&self.blob).map_err(|_| CryptoError::MalformedBody)
    }
}

/// Remote-attestation capability published on behalf of a runtime instance.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct CapabilityTee {
    /// Runtime attestation key.
    pub rak: PublicKey,
    /// Opaque attestation quote.
    pub attestation: Vec<u8>,
}
