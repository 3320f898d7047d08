// tcp-lockchain: Sealed consensus records and their canonical encoding
// The canonical byte form feeds both the chain hash and vote signing, so
// the chain is reconstructible from inputs alone.

use serde::{Deserialize, Serialize};
use tcp_kernel::decision::{Decision, ReasonCode};
use tcp_kernel::descriptor::DESCRIPTOR_LEN;

/// Chain hash of the empty log; the first record links to this.
pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// Width of the signed vote payload: fingerprint, validator ID, decision,
/// reason, epoch.
pub const VOTE_PAYLOAD_LEN: usize = 32 + 2 + 1 + 1 + 8;

/// The canonical byte form of a vote's signed fields. Validators sign
/// exactly these bytes; record hashing reuses them so the two surfaces
/// cannot drift apart.
pub fn vote_payload_bytes(
    fingerprint: &[u8; 32],
    validator_id: u16,
    decision: Decision,
    reason: ReasonCode,
    epoch: u64,
) -> [u8; VOTE_PAYLOAD_LEN] {
    let mut out = [0u8; VOTE_PAYLOAD_LEN];
    out[0..32].copy_from_slice(fingerprint);
    out[32..34].copy_from_slice(&validator_id.to_be_bytes());
    out[34] = decision.as_u8();
    out[35] = reason.as_u8();
    out[36..44].copy_from_slice(&epoch.to_be_bytes());
    out
}

/// One verified vote inside a sealed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub validator_id: u16,
    pub decision: Decision,
    pub reason: ReasonCode,
    pub epoch: u64,
    /// Ed25519 signature over [`vote_payload_bytes`]
    pub signature: Vec<u8>,
}

/// A record before sealing: everything the coordinator knows at resolution
/// time. The writer task assigns the sequence number and chain hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDraft {
    pub descriptor: [u8; DESCRIPTOR_LEN],
    pub fingerprint: [u8; 32],
    /// Verified votes, sorted by validator ID before sealing
    pub votes: Vec<VoteRecord>,
    pub final_decision: Decision,
    pub reason: ReasonCode,
    pub epoch: u64,
    pub t_start_ns: u64,
    pub t_end_ns: u64,
}

impl RecordDraft {
    /// Canonicalise vote order so every honest coordinator seals the same
    /// bytes for the same fingerprint and epoch.
    pub fn sort_votes(&mut self) {
        self.votes.sort_by_key(|v| v.validator_id);
    }
}

/// A sealed, chained audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub seq: u64,
    pub descriptor: [u8; DESCRIPTOR_LEN],
    pub fingerprint: [u8; 32],
    pub votes: Vec<VoteRecord>,
    pub final_decision: Decision,
    pub reason: ReasonCode,
    pub epoch: u64,
    pub t_start_ns: u64,
    pub t_end_ns: u64,
    pub chain_prev: [u8; 32],
    pub chain_self: [u8; 32],
}

impl Record {
    /// Seal a draft: fix the vote order, link to the predecessor, and
    /// compute the self hash.
    pub fn seal(mut draft: RecordDraft, seq: u64, chain_prev: [u8; 32]) -> Self {
        draft.sort_votes();
        let mut record = Record {
            seq,
            descriptor: draft.descriptor,
            fingerprint: draft.fingerprint,
            votes: draft.votes,
            final_decision: draft.final_decision,
            reason: draft.reason,
            epoch: draft.epoch,
            t_start_ns: draft.t_start_ns,
            t_end_ns: draft.t_end_ns,
            chain_prev,
            chain_self: [0u8; 32],
        };
        record.chain_self = record.compute_chain_self();
        record
    }

    /// Canonical bytes of everything except the self hash, field by field
    /// in layout order, lengths fixed or prefixed.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.votes.len() * 128);
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.descriptor);
        out.extend_from_slice(&self.fingerprint);
        out.extend_from_slice(&(self.votes.len() as u32).to_be_bytes());
        for vote in &self.votes {
            out.extend_from_slice(&vote_payload_bytes(
                &self.fingerprint,
                vote.validator_id,
                vote.decision,
                vote.reason,
                vote.epoch,
            ));
            out.extend_from_slice(&(vote.signature.len() as u32).to_be_bytes());
            out.extend_from_slice(&vote.signature);
        }
        out.push(self.final_decision.as_u8());
        out.push(self.reason.as_u8());
        out.extend_from_slice(&self.epoch.to_be_bytes());
        out.extend_from_slice(&self.t_start_ns.to_be_bytes());
        out.extend_from_slice(&self.t_end_ns.to_be_bytes());
        out
    }

    /// `H(chain_prev || canonical_bytes)`.
    pub fn compute_chain_self(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.chain_prev);
        hasher.update(&self.canonical_bytes());
        *hasher.finalize().as_bytes()
    }

    /// Recompute and compare the stored self hash.
    pub fn verify_self(&self) -> bool {
        self.compute_chain_self() == self.chain_self
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn draft() -> RecordDraft {
        RecordDraft {
            descriptor: [7u8; DESCRIPTOR_LEN],
            fingerprint: [9u8; 32],
            votes: vec![
                VoteRecord {
                    validator_id: 3,
                    decision: Decision::Allow,
                    reason: ReasonCode::None,
                    epoch: 1,
                    signature: vec![0u8; 64],
                },
                VoteRecord {
                    validator_id: 1,
                    decision: Decision::Allow,
                    reason: ReasonCode::None,
                    epoch: 1,
                    signature: vec![1u8; 64],
                },
            ],
            final_decision: Decision::Allow,
            reason: ReasonCode::None,
            epoch: 1,
            t_start_ns: 100,
            t_end_ns: 200,
        }
    }

    #[test]
    fn test_seal_sorts_votes() {
        let record = Record::seal(draft(), 0, GENESIS_HASH);
        assert_eq!(record.votes[0].validator_id, 1);
        assert_eq!(record.votes[1].validator_id, 3);
    }

    #[test]
    fn test_seal_is_deterministic_across_vote_order() {
        let mut reversed = draft();
        reversed.votes.reverse();
        let a = Record::seal(draft(), 0, GENESIS_HASH);
        let b = Record::seal(reversed, 0, GENESIS_HASH);
        assert_eq!(a.chain_self, b.chain_self);
    }

    #[test]
    fn test_verify_self_detects_tamper() {
        let mut record = Record::seal(draft(), 0, GENESIS_HASH);
        assert!(record.verify_self());

        record.final_decision = Decision::Deny;
        assert!(!record.verify_self());
    }

    #[test]
    fn test_chain_links_change_hash() {
        let a = Record::seal(draft(), 0, GENESIS_HASH);
        let b = Record::seal(draft(), 0, [1u8; 32]);
        assert_ne!(a.chain_self, b.chain_self);
    }

    #[test]
    fn test_vote_payload_layout() {
        let payload = vote_payload_bytes(&[5u8; 32], 0x0102, Decision::Deny, ReasonCode::CrcMismatch, 7);
        assert_eq!(payload.len(), VOTE_PAYLOAD_LEN);
        assert_eq!(&payload[0..32], &[5u8; 32]);
        assert_eq!(payload[32..34], [0x01, 0x02]);
        assert_eq!(payload[34], 1);
        assert_eq!(payload[35], 3);
        assert_eq!(payload[36..44], 7u64.to_be_bytes());
    }
}
