// tcp-crypto: Classical (v2) authenticator
// A 32-bit truncation of a keyed BLAKE3 tag over the descriptor's signed
// region, bytes 0..18. Truncation is acceptable because the codec already
// binds the command hash; the tag proves issuance by an authorised party
// within the forgery probability calibrated at system-build time.

use crate::keystore::{IssuerSigner, KeystoreSnapshot};
use crate::{AuthError, Result};
use tcp_kernel::ct;
use tcp_kernel::descriptor::Descriptor;

/// Authenticator width on the wire.
pub const TAG_LEN: usize = 4;

/// Compute the truncated issuance tag for a signed region under one
/// issuer key.
pub fn authenticator_tag(mac_key: &[u8; 32], signed_region: &[u8; 18]) -> [u8; TAG_LEN] {
    let full = blake3::keyed_hash(mac_key, signed_region);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&full.as_bytes()[0..TAG_LEN]);
    tag
}

/// Attach a fresh authenticator: returns the descriptor with its
/// authenticator field bound to the current field values. Any later edit
/// to bytes 0..18 invalidates it.
pub fn seal(descriptor: &Descriptor, issuer: &IssuerSigner) -> Descriptor {
    let mut sealed = *descriptor;
    sealed.authenticator = authenticator_tag(&issuer.mac_key, &sealed.signed_region());
    sealed
}

/// Verify the in-band v2 authenticator.
///
/// Scans the entire configured issuer set with constant-time tag
/// comparison, accumulating matches; the scan shape does not depend on
/// which issuer (if any) matches. An empty issuer set is a configuration
/// error surfaced as `UnknownIssuer`.
pub fn verify(descriptor: &Descriptor, keystore: &KeystoreSnapshot) -> Result<()> {
    let region = descriptor.signed_region();

    let mut any_issuer = false;
    let mut matched = false;
    for (_, issuer) in keystore.issuers() {
        any_issuer = true;
        let expected = authenticator_tag(&issuer.mac_key, &region);
        matched |= ct::ct_eq(&expected, &descriptor.authenticator);
    }

    if !any_issuer {
        return Err(AuthError::UnknownIssuer);
    }
    if matched {
        Ok(())
    } else {
        Err(AuthError::BadSignature)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::keystore::generate;
    use tcp_kernel::codec::encode;
    use tcp_kernel::descriptor::{CapabilityFlags, DescriptorBuilder, RiskLevel};
    use tcp_kernel::variant::Variant;

    fn sealed_ls(cluster: &crate::keystore::GeneratedCluster) -> Descriptor {
        let descriptor = DescriptorBuilder::new(Variant::V2Classical)
            .command("ls")
            .flags(CapabilityFlags::FILE_OPS)
            .risk(RiskLevel::Safe)
            .build();
        seal(&descriptor, &cluster.issuer)
    }

    #[test]
    fn test_seal_then_verify() {
        let cluster = generate(1, 1);
        let descriptor = sealed_ls(&cluster);
        assert_eq!(verify(&descriptor, &cluster.snapshot), Ok(()));
    }

    #[test]
    fn test_unsealed_descriptor_rejected() {
        let cluster = generate(1, 1);
        let descriptor = DescriptorBuilder::new(Variant::V2Classical)
            .command("ls")
            .risk(RiskLevel::Safe)
            .build();
        assert_eq!(
            verify(&descriptor, &cluster.snapshot),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn test_any_signed_region_edit_invalidates() {
        let cluster = generate(1, 1);
        let sealed = sealed_ls(&cluster);
        let bytes = encode(&sealed);

        for byte_idx in 0..18 {
            for bit in 0..8 {
                let mut tampered_bytes = bytes;
                tampered_bytes[byte_idx] ^= 1 << bit;
                // Re-parse leniently: most flips fail CRC first, but the
                // authenticator must also reject a re-CRC'd forgery.
                let mut forged = tampered_bytes;
                let crc = tcp_kernel::codec::crc16(&forged[0..22]);
                forged[22..24].copy_from_slice(&crc.to_be_bytes());
                if let Ok(descriptor) =
                    tcp_kernel::codec::decode_with_mode(&forged, tcp_kernel::codec::DecodeMode::Lenient)
                {
                    assert_eq!(
                        verify(&descriptor, &cluster.snapshot),
                        Err(AuthError::BadSignature),
                        "edit of byte {byte_idx} bit {bit} survived the authenticator"
                    );
                }
            }
        }
    }

    #[test]
    fn test_foreign_issuer_rejected() {
        let cluster_a = generate(1, 1);
        let cluster_b = generate(1, 1);
        let descriptor = sealed_ls(&cluster_a);
        assert_eq!(
            verify(&descriptor, &cluster_b.snapshot),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn test_empty_issuer_set_is_unknown_issuer() {
        let cluster = generate(1, 1);
        let empty = KeystoreSnapshot::new(1, None, Default::default(), Default::default());
        let descriptor = sealed_ls(&cluster);
        assert_eq!(verify(&descriptor, &empty), Err(AuthError::UnknownIssuer));
    }
}
