// tcp-consensus: Signed validator votes
// A vote binds (fingerprint, validator, decision, reason, epoch) under the
// validator's epoch key. Only votes that verify under the keystore are
// counted by the coordinator.

use ed25519_dalek::{Signature, Verifier};
use serde::{Deserialize, Serialize};
use tcp_crypto::keystore::{KeystoreSnapshot, NodeSigningKey};
use tcp_kernel::decision::{Decision, ReasonCode};
use tcp_lockchain::record::{vote_payload_bytes, VoteRecord};

/// A validator's signed verdict on one descriptor fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedVote {
    pub fingerprint: [u8; 32],
    pub validator_id: u16,
    pub decision: Decision,
    pub reason: ReasonCode,
    pub epoch: u64,
    /// Ed25519 signature over the canonical vote payload
    pub signature: Vec<u8>,
}

impl SignedVote {
    /// Sign a verdict with the node's current-epoch key.
    pub fn sign(
        node: &NodeSigningKey,
        fingerprint: [u8; 32],
        decision: Decision,
        reason: ReasonCode,
    ) -> Self {
        let payload = vote_payload_bytes(
            &fingerprint,
            node.validator_id,
            decision,
            reason,
            node.epoch,
        );
        let signature = node.sign(&payload);
        Self {
            fingerprint,
            validator_id: node.validator_id,
            decision,
            reason,
            epoch: node.epoch,
            signature: signature.to_bytes().to_vec(),
        }
    }

    /// Verify the signature under the claimed validator's key for the
    /// claimed epoch. Resolves through the keystore, which accepts the
    /// current epoch always and the previous epoch only inside the
    /// rotation overlap window.
    pub fn verify(&self, keystore: &KeystoreSnapshot) -> bool {
        let Some(verifying_key) = keystore.verifying_key(self.validator_id, self.epoch) else {
            return false;
        };
        let Ok(signature_bytes) = <[u8; 64]>::try_from(self.signature.as_slice()) else {
            return false;
        };
        let signature = Signature::from_bytes(&signature_bytes);
        let payload = vote_payload_bytes(
            &self.fingerprint,
            self.validator_id,
            self.decision,
            self.reason,
            self.epoch,
        );
        verifying_key.verify(&payload, &signature).is_ok()
    }

    /// Strip to the form stored inside sealed records.
    pub fn to_record(&self) -> VoteRecord {
        VoteRecord {
            validator_id: self.validator_id,
            decision: self.decision,
            reason: self.reason,
            epoch: self.epoch,
            signature: self.signature.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcp_crypto::keystore::generate;

    #[test]
    fn test_sign_and_verify() {
        let cluster = generate(1, 2);
        let vote = SignedVote::sign(
            &cluster.nodes[0],
            [4u8; 32],
            Decision::Allow,
            ReasonCode::None,
        );
        assert!(vote.verify(&cluster.snapshot));
        assert_eq!(vote.validator_id, 1);
        assert_eq!(vote.epoch, 1);
    }

    #[test]
    fn test_tampered_decision_fails() {
        let cluster = generate(1, 1);
        let mut vote = SignedVote::sign(
            &cluster.nodes[0],
            [4u8; 32],
            Decision::Allow,
            ReasonCode::None,
        );
        vote.decision = Decision::Deny;
        assert!(!vote.verify(&cluster.snapshot));
    }

    #[test]
    fn test_forged_signature_fails() {
        let cluster = generate(1, 1);
        let mut vote = SignedVote::sign(
            &cluster.nodes[0],
            [4u8; 32],
            Decision::Deny,
            ReasonCode::None,
        );
        vote.signature = vec![0u8; 64];
        assert!(!vote.verify(&cluster.snapshot));
    }

    #[test]
    fn test_claimed_identity_must_match_key() {
        let cluster = generate(1, 2);
        let mut vote = SignedVote::sign(
            &cluster.nodes[0],
            [4u8; 32],
            Decision::Allow,
            ReasonCode::None,
        );
        // Claim to be validator 2 while signed with validator 1's key
        vote.validator_id = 2;
        assert!(!vote.verify(&cluster.snapshot));
    }

    #[test]
    fn test_unknown_epoch_fails() {
        let cluster = generate(1, 1);
        let mut vote = SignedVote::sign(
            &cluster.nodes[0],
            [4u8; 32],
            Decision::Allow,
            ReasonCode::None,
        );
        vote.epoch = 99;
        assert!(!vote.verify(&cluster.snapshot));
    }
}
