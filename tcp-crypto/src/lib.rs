// tcp-crypto: Integrity layer for capability descriptors
// Classical truncated authenticators, lattice-proof verification, and the
// epoch keystore behind both

// CRITICAL: Enforce proper error handling - no unwrap/expect in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod classical;
pub mod hybrid;
pub mod keystore;
pub mod pq;
pub mod proof_store;

pub use classical::authenticator_tag;
pub use hybrid::{HybridMode, IntegrityConfig};
pub use keystore::{
    IssuerKeys, KeystoreFile, KeystoreManager, KeystoreSnapshot, NodeSigningKey, ValidatorKeys,
};
pub use proof_store::{CachedProofStore, MemoryProofStore, ProofStore, TimedProofStore};

use tcp_kernel::decision::ReasonCode;
use tcp_kernel::descriptor::Descriptor;
use tcp_kernel::variant::Variant;
use thiserror::Error;

/// Terminal authentication failures. The request never reaches the policy
/// engine after one of these; the validator folds the reason into a Deny
/// vote (Defer for the retryable `ProofUnavailable`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("authenticator does not verify")]
    BadSignature,
    #[error("no configured issuer matches")]
    UnknownIssuer,
    #[error("external proof unavailable within deadline")]
    ProofUnavailable,
    #[error("descriptor variant deprecated by deployment policy")]
    VariantDeprecated,
}

impl AuthError {
    pub fn reason(self) -> ReasonCode {
        match self {
            AuthError::BadSignature => ReasonCode::BadSignature,
            AuthError::UnknownIssuer => ReasonCode::UnknownIssuer,
            AuthError::ProofUnavailable => ReasonCode::ProofUnavailable,
            AuthError::VariantDeprecated => ReasonCode::VariantDeprecated,
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

/// Verify a descriptor's authenticator against the keystore.
///
/// Dispatches on the descriptor's variant: v2 checks the in-band truncated
/// classical tag, v3 resolves the authenticator as a selector into the
/// proof store and verifies the lattice signature (and, in hybrid strict
/// mode, the classical tag carried inside the proof blob as well).
pub fn verify(
    descriptor: &Descriptor,
    keystore: &KeystoreSnapshot,
    proofs: &dyn ProofStore,
    config: &IntegrityConfig,
) -> Result<()> {
    match descriptor.variant {
        Variant::V2Classical => {
            if config.pq_required {
                return Err(AuthError::VariantDeprecated);
            }
            classical::verify(descriptor, keystore)
        }
        Variant::V3PostQuantum => pq::verify(descriptor, keystore, proofs, config.hybrid),
    }
}
