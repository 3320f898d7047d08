// tcp-consensus: Validator node
// One process-local unit holding keys, policy, and telemetry. Runs the
// codec -> integrity -> policy pipeline under the timing guard and wraps
// the verdict as a signed vote. Failures become Deny (or Defer for a
// missing proof) votes with the reason in the signed payload, never
// exceptions, so adversarial descriptors drive the same control path as
// benign ones.

use crate::vote::SignedVote;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tcp_crypto::keystore::{KeystoreManager, NodeSigningKey};
use tcp_crypto::{AuthError, IntegrityConfig, ProofStore};
use tcp_kernel::codec::{decode_with_mode, DecodeMode};
use tcp_kernel::decision::{Context, Decision, ReasonCode};
use tcp_kernel::descriptor::{Descriptor, PerfEnvelope, RiskLevel};
use tcp_kernel::guard::{Stage, TimingGuard};
use tcp_kernel::policy::PolicyManager;
use tcp_kernel::variant::Variant;
use tcp_telemetry::Telemetry;

/// Per-node settings fixed at deployment time.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub decode_mode: DecodeMode,
    pub integrity: IntegrityConfig,
    /// Variants this node advertises; status surface only, enforcement
    /// lives in `integrity.pq_required`
    pub supported_variants: Vec<Variant>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            decode_mode: DecodeMode::Strict,
            integrity: IntegrityConfig::default(),
            supported_variants: vec![Variant::V2Classical, Variant::V3PostQuantum],
        }
    }
}

/// Placeholder descriptor validated when decode fails, so the integrity
/// and policy stages still execute with their usual shape.
fn dummy_descriptor() -> Descriptor {
    Descriptor {
        variant: Variant::V2Classical,
        command_hash: [0; 4],
        flags: tcp_kernel::descriptor::CapabilityFlags::empty(),
        risk: RiskLevel::Safe,
        perf: PerfEnvelope::default(),
        authenticator: [0; 4],
    }
}

/// A single validator.
pub struct ValidatorNode {
    key: RwLock<Arc<NodeSigningKey>>,
    keystore: Arc<KeystoreManager>,
    policy: Arc<PolicyManager>,
    proofs: Arc<dyn ProofStore>,
    config: ValidatorConfig,
    guard: TimingGuard,
    telemetry: Arc<Telemetry>,
}

impl ValidatorNode {
    pub fn new(
        key: NodeSigningKey,
        keystore: Arc<KeystoreManager>,
        policy: Arc<PolicyManager>,
        proofs: Arc<dyn ProofStore>,
        config: ValidatorConfig,
        guard: TimingGuard,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            key: RwLock::new(Arc::new(key)),
            keystore,
            policy,
            proofs,
            config,
            guard,
            telemetry,
        }
    }

    pub fn validator_id(&self) -> u16 {
        self.key.read().validator_id
    }

    pub fn epoch(&self) -> u64 {
        self.key.read().epoch
    }

    pub fn supported_variants(&self) -> &[Variant] {
        &self.config.supported_variants
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Install the signing key for a new epoch. During the keystore's
    /// overlap window, votes signed under the old key keep verifying.
    pub fn rotate_key(&self, key: NodeSigningKey) {
        let epoch = key.epoch;
        *self.key.write() = Arc::new(key);
        tracing::info!(epoch, "validator signing key rotated");
    }

    /// Validate a raw descriptor submission and emit a signed vote.
    ///
    /// Every stage runs on every request: a failed decode still drives the
    /// integrity and policy stages against a placeholder descriptor, and
    /// each stage pads to its fixed tick budget before the next begins.
    /// Verdict precedence is parse over auth over policy.
    pub fn validate(&self, descriptor_bytes: &[u8], context: &Context) -> SignedVote {
        let fingerprint = crate::fingerprint(descriptor_bytes);
        let keystore = self.keystore.snapshot();
        let policy = self.policy.snapshot();
        let key = self.key.read().clone();

        let (decoded, decode_ticks) = self.guard.run_stage(Stage::Decode, || {
            decode_with_mode(descriptor_bytes, self.config.decode_mode)
        });
        self.telemetry.record_stage(Stage::Decode, decode_ticks);

        let descriptor = *decoded.as_ref().unwrap_or(&dummy_descriptor());

        let (integrity, integrity_ticks) = self.guard.run_stage(Stage::Integrity, || {
            tcp_crypto::verify(
                &descriptor,
                &keystore,
                self.proofs.as_ref(),
                &self.config.integrity,
            )
        });
        self.telemetry.record_stage(Stage::Integrity, integrity_ticks);

        let (policy_verdict, policy_ticks) = self
            .guard
            .run_stage(Stage::Policy, || policy.decide(&descriptor, context));
        self.telemetry.record_stage(Stage::Policy, policy_ticks);

        let (decision, reason) = match (decoded, integrity) {
            (Err(parse), _) => (Decision::Deny, parse.reason()),
            (Ok(_), Err(AuthError::ProofUnavailable)) => {
                (Decision::Defer, ReasonCode::ProofUnavailable)
            }
            (Ok(_), Err(auth)) => (Decision::Deny, auth.reason()),
            (Ok(_), Ok(())) => policy_verdict,
        };

        let (vote, sign_ticks) = self.guard.run_stage(Stage::Sign, || {
            SignedVote::sign(&key, fingerprint, decision, reason)
        });
        self.telemetry.record_stage(Stage::Sign, sign_ticks);
        self.telemetry.record_decision(decision);

        vote
    }
}

/// Source of votes for the coordinator: in-process validators here,
/// network transports elsewhere.
#[async_trait]
pub trait VoteProvider: Send + Sync {
    fn validator_id(&self) -> u16;

    /// Produce a vote for the descriptor, or `None` for a node that
    /// stays silent.
    async fn vote(&self, descriptor_bytes: Vec<u8>, context: Context) -> Option<SignedVote>;
}

/// In-process provider running the validator pipeline on the blocking
/// pool, keeping worker-thread timing out of the async scheduler.
pub struct LocalVoteProvider {
    node: Arc<ValidatorNode>,
}

impl LocalVoteProvider {
    pub fn new(node: Arc<ValidatorNode>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl VoteProvider for LocalVoteProvider {
    fn validator_id(&self) -> u16 {
        self.node.validator_id()
    }

    async fn vote(&self, descriptor_bytes: Vec<u8>, context: Context) -> Option<SignedVote> {
        let node = self.node.clone();
        tokio::task::spawn_blocking(move || node.validate(&descriptor_bytes, &context))
            .await
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcp_crypto::classical;
    use tcp_crypto::keystore::generate;
    use tcp_crypto::MemoryProofStore;
    use tcp_kernel::codec::encode;
    use tcp_kernel::descriptor::{CapabilityFlags, DescriptorBuilder};
    use tcp_kernel::guard::StageBudgets;
    use tcp_kernel::policy::PolicyManager;

    struct Harness {
        node: ValidatorNode,
        issuer: tcp_crypto::keystore::IssuerSigner,
        snapshot: tcp_crypto::keystore::KeystoreSnapshot,
        proofs: Arc<MemoryProofStore>,
    }

    fn harness() -> Harness {
        let cluster = generate(1, 1);
        let keystore = Arc::new(KeystoreManager::new(cluster.snapshot.clone()));
        let policy = Arc::new(PolicyManager::with_defaults());
        let proofs = Arc::new(MemoryProofStore::new());
        let mut nodes = cluster.nodes;
        let node = ValidatorNode::new(
            nodes.remove(0),
            keystore,
            policy,
            proofs.clone(),
            ValidatorConfig::default(),
            TimingGuard::new(StageBudgets {
                decode: 10,
                integrity: 10,
                policy: 10,
                sign: 10,
            }),
            Arc::new(Telemetry::default()),
        );
        Harness {
            node,
            issuer: cluster.issuer,
            snapshot: cluster.snapshot,
            proofs,
        }
    }

    fn sealed_safe_bytes(issuer: &tcp_crypto::keystore::IssuerSigner) -> Vec<u8> {
        let descriptor = DescriptorBuilder::new(Variant::V2Classical)
            .command("ls")
            .flags(CapabilityFlags::FILE_OPS)
            .risk(RiskLevel::Safe)
            .build();
        encode(&classical::seal(&descriptor, issuer)).to_vec()
    }

    #[test]
    fn test_sealed_safe_descriptor_allows() {
        let h = harness();
        let bytes = sealed_safe_bytes(&h.issuer);

        let vote = h.node.validate(&bytes, &Context::default());
        assert_eq!(vote.decision, Decision::Allow);
        assert_eq!(vote.reason, ReasonCode::None);
        assert!(vote.verify(&h.snapshot));
    }

    #[test]
    fn test_crc_tamper_is_deny_vote() {
        let h = harness();
        let mut bytes = sealed_safe_bytes(&h.issuer);
        bytes[10] ^= 0x08;

        let vote = h.node.validate(&bytes, &Context::default());
        assert_eq!(vote.decision, Decision::Deny);
        assert_eq!(vote.reason, ReasonCode::CrcMismatch);
        assert!(vote.verify(&h.snapshot), "failure votes are signed too");
    }

    #[test]
    fn test_bad_authenticator_is_deny_vote() {
        let h = harness();
        let descriptor = DescriptorBuilder::new(Variant::V2Classical)
            .command("ls")
            .flags(CapabilityFlags::FILE_OPS)
            .risk(RiskLevel::Safe)
            .authenticator([9, 9, 9, 9])
            .build();
        let bytes = encode(&descriptor);

        let vote = h.node.validate(&bytes, &Context::default());
        assert_eq!(vote.decision, Decision::Deny);
        assert_eq!(vote.reason, ReasonCode::BadSignature);
    }

    #[test]
    fn test_missing_pq_proof_is_defer_vote() {
        let h = harness();
        let descriptor = DescriptorBuilder::new(Variant::V3PostQuantum)
            .command("ls")
            .flags(CapabilityFlags::FILE_OPS)
            .risk(RiskLevel::Safe)
            .authenticator([1, 2, 3, 4])
            .build();
        let bytes = encode(&descriptor);

        let vote = h.node.validate(&bytes, &Context::default());
        assert_eq!(vote.decision, Decision::Defer);
        assert_eq!(vote.reason, ReasonCode::ProofUnavailable);
    }

    #[test]
    fn test_pq_sealed_descriptor_allows() {
        let h = harness();
        let descriptor = DescriptorBuilder::new(Variant::V3PostQuantum)
            .command("ls")
            .flags(CapabilityFlags::FILE_OPS)
            .risk(RiskLevel::Safe)
            .build();
        let sealed = tcp_crypto::pq::seal(&descriptor, &h.issuer, h.proofs.as_ref())
            .expect("issuer holds pq material");
        let bytes = encode(&sealed);

        let vote = h.node.validate(&bytes, &Context::default());
        assert_eq!(vote.decision, Decision::Allow);
    }

    #[test]
    fn test_wrong_length_input_is_deny_vote() {
        let h = harness();
        let vote = h.node.validate(&[0u8; 7], &Context::default());
        assert_eq!(vote.decision, Decision::Deny);
        assert_eq!(vote.reason, ReasonCode::BadMagic);
    }

    #[test]
    fn test_key_rotation_changes_epoch() {
        let h = harness();
        assert_eq!(h.node.epoch(), 1);
        let fresh = NodeSigningKey::new(
            1,
            2,
            ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng),
        );
        h.node.rotate_key(fresh);
        assert_eq!(h.node.epoch(), 2);
    }
}
