// tcp-crypto: Post-quantum (v3) authenticator
// The 4-byte authenticator field is a selector into the content-addressed
// proof store; the proof blob carries the issuer ID, the classical tag for
// hybrid deployments, and a full Dilithium3 detached signature over the
// descriptor's signed region.

use crate::classical::{authenticator_tag, TAG_LEN};
use crate::hybrid::HybridMode;
use crate::keystore::{IssuerSigner, KeystoreSnapshot};
use crate::proof_store::{selector_for, ProofStore, SELECTOR_LEN};
use crate::{AuthError, Result};
use pqcrypto_dilithium::dilithium3;
use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _};
use tcp_kernel::ct;
use tcp_kernel::descriptor::Descriptor;

/// Proof blob layout: issuer_id (2, BE) || classical tag (4) || Dilithium3
/// detached signature.
const HEADER_LEN: usize = 2 + TAG_LEN;

/// Build the proof blob for a signed region under an issuer holding
/// Dilithium material.
pub fn build_proof(issuer: &IssuerSigner, signed_region: &[u8; 18]) -> Result<Vec<u8>> {
    let secret = issuer.pq_secret().ok_or(AuthError::UnknownIssuer)?;
    let signature = dilithium3::detached_sign(signed_region, &secret);
    let tag = authenticator_tag(&issuer.mac_key, signed_region);

    let mut blob = Vec::with_capacity(HEADER_LEN + signature.as_bytes().len());
    blob.extend_from_slice(&issuer.issuer_id.to_be_bytes());
    blob.extend_from_slice(&tag);
    blob.extend_from_slice(signature.as_bytes());
    Ok(blob)
}

/// Author-side sealing: store the proof and bind its selector as the
/// descriptor's authenticator.
pub fn seal(
    descriptor: &Descriptor,
    issuer: &IssuerSigner,
    proofs: &dyn ProofStore,
) -> Result<Descriptor> {
    let mut sealed = *descriptor;
    // The selector depends on the proof, which covers the signed region
    // with the authenticator bytes excluded by construction (region is
    // bytes 0..18, the authenticator sits at 18..22).
    let proof = build_proof(issuer, &sealed.signed_region())?;
    sealed.authenticator = proofs.insert(proof);
    Ok(sealed)
}

/// Verify a v3 descriptor against the proof store.
///
/// Fetch failures map to `ProofUnavailable` (the only retryable auth
/// class). Both authenticators inside the blob are always computed and
/// checked; the hybrid mode only changes how the two verdicts combine.
pub fn verify(
    descriptor: &Descriptor,
    keystore: &KeystoreSnapshot,
    proofs: &dyn ProofStore,
    mode: HybridMode,
) -> Result<()> {
    let proof = proofs
        .fetch(descriptor.authenticator)
        .ok_or(AuthError::ProofUnavailable)?;

    // Content-address check: the selector must be the proof's own hash.
    let expected_selector = selector_for(&proof);
    if !ct::ct_eq(&expected_selector, &descriptor.authenticator) {
        return Err(AuthError::BadSignature);
    }

    if proof.len() <= HEADER_LEN {
        return Err(AuthError::BadSignature);
    }
    let issuer_id = u16::from_be_bytes([proof[0], proof[1]]);
    let mut stored_tag = [0u8; TAG_LEN];
    stored_tag.copy_from_slice(&proof[2..HEADER_LEN]);
    let signature_bytes = &proof[HEADER_LEN..];

    let issuer = keystore.issuer(issuer_id).ok_or(AuthError::UnknownIssuer)?;
    let region = descriptor.signed_region();

    // Classical leg.
    let expected_tag = authenticator_tag(&issuer.mac_key, &region);
    let mac_ok = ct::ct_eq(&expected_tag, &stored_tag);

    // Lattice leg.
    let pq_ok = match issuer.pq_public.as_deref() {
        Some(pk_bytes) => {
            let pk = dilithium3::PublicKey::from_bytes(pk_bytes)
                .map_err(|_| AuthError::UnknownIssuer)?;
            match dilithium3::DetachedSignature::from_bytes(signature_bytes) {
                Ok(signature) => {
                    dilithium3::verify_detached_signature(&signature, &region, &pk).is_ok()
                }
                Err(_) => false,
            }
        }
        None => false,
    };

    let accepted = match mode {
        HybridMode::Strict => mac_ok & pq_ok,
        HybridMode::Permissive => mac_ok | pq_ok,
    };
    if accepted {
        Ok(())
    } else {
        Err(AuthError::BadSignature)
    }
}
