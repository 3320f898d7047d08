// tcp-consensus: Consensus coordinator
// Fans a descriptor out to N validators, collects votes to a deadline,
// counts only votes whose signatures verify and whose fingerprint matches,
// and applies the >=75% quorum rule. Every resolution seals an audit
// record, including cancellations, so the chain has no gaps.

use crate::byzantine::{ByzantineLedger, FaultKind, FaultReport};
use crate::validator::VoteProvider;
use crate::vote::SignedVote;
use crate::{fingerprint, ConsensusError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tcp_crypto::keystore::KeystoreManager;
use tcp_kernel::decision::{Context, Decision, ReasonCode};
use tcp_kernel::descriptor::DESCRIPTOR_LEN;
use tcp_kernel::guard::Stage;
use tcp_kernel::timer::StageTimer;
use tcp_lockchain::record::RecordDraft;
use tcp_lockchain::storage::AuditLog;
use tcp_lockchain::writer::AuditWriterHandle;
use tcp_lockchain::ChainError;
use tcp_telemetry::Telemetry;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Quorum parameters. The 75% honest threshold is a floor: deployments may
/// raise it, never lower it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumConfig {
    pub threshold_pct: u8,
    pub deadline: Duration,
}

impl QuorumConfig {
    pub const THRESHOLD_FLOOR: u8 = 75;

    pub fn new(threshold_pct: u8, deadline: Duration) -> Result<Self> {
        if threshold_pct < Self::THRESHOLD_FLOOR || threshold_pct > 100 {
            return Err(ConsensusError::ThresholdTooLow(threshold_pct));
        }
        Ok(Self {
            threshold_pct,
            deadline,
        })
    }

    /// Matching verified votes required for a non-Defer decision:
    /// `ceil(threshold_pct/100 * n)`.
    pub fn required(&self, n: usize) -> usize {
        (n * self.threshold_pct as usize).div_ceil(100)
    }
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            threshold_pct: Self::THRESHOLD_FLOOR,
            deadline: Duration::from_millis(250),
        }
    }
}

/// Cooperative cancellation for an in-flight resolution. Cancelling does
/// not abandon the request: the coordinator seals a `Defer/Cancelled`
/// record to preserve the audit chain.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// The network-level outcome returned to the descriptor source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkDecision {
    pub decision: Decision,
    pub reason: ReasonCode,
    pub fingerprint: [u8; 32],
    pub epoch: u64,
    pub votes_allow: u32,
    pub votes_deny: u32,
    pub votes_defer: u32,
    /// Sequence of the sealed audit record; absent only under backpressure
    pub record_seq: Option<u64>,
}

/// Collects votes and seals records. One coordinator per process; the
/// per-fingerprint seal ledger keeps decisions for a fingerprint stable
/// within an epoch.
pub struct Coordinator {
    providers: Vec<Arc<dyn VoteProvider>>,
    keystore: Arc<KeystoreManager>,
    config: QuorumConfig,
    writer: AuditWriterHandle,
    audit: Arc<AuditLog>,
    telemetry: Arc<Telemetry>,
    ledger: Arc<ByzantineLedger>,
    sealed: DashMap<([u8; 32], u64), Decision>,
}

impl Coordinator {
    pub fn new(
        providers: Vec<Arc<dyn VoteProvider>>,
        keystore: Arc<KeystoreManager>,
        config: QuorumConfig,
        writer: AuditWriterHandle,
        audit: Arc<AuditLog>,
        telemetry: Arc<Telemetry>,
        ledger: Arc<ByzantineLedger>,
    ) -> Self {
        Self {
            providers,
            keystore,
            config,
            writer,
            audit,
            telemetry,
            ledger,
            sealed: DashMap::new(),
        }
    }

    pub fn validator_count(&self) -> usize {
        self.providers.len()
    }

    pub fn byzantine_ledger(&self) -> &ByzantineLedger {
        &self.ledger
    }

    pub async fn resolve(&self, descriptor_bytes: &[u8], context: Context) -> Result<NetworkDecision> {
        self.resolve_with_cancel(descriptor_bytes, context, None).await
    }

    /// Resolve a descriptor submission into a network decision and a
    /// sealed audit record.
    pub async fn resolve_with_cancel(
        &self,
        descriptor_bytes: &[u8],
        context: Context,
        cancel: Option<&CancelHandle>,
    ) -> Result<NetworkDecision> {
        if self.providers.is_empty() {
            return Err(ConsensusError::EmptyValidatorSet);
        }

        let t_start_ns = unix_nanos();
        let quorum_timer = StageTimer::start();
        let fp = fingerprint(descriptor_bytes);
        let keystore = self.keystore.snapshot();
        let epoch = keystore.epoch();
        let n = self.providers.len();
        let required = self.config.required(n);

        // Fan out. Each provider task sends exactly one message.
        let (tx, mut rx) = mpsc::channel::<(u16, Option<SignedVote>)>(n);
        for provider in &self.providers {
            let provider = provider.clone();
            let tx = tx.clone();
            let bytes = descriptor_bytes.to_vec();
            tokio::spawn(async move {
                let id = provider.validator_id();
                let vote = provider.vote(bytes, context).await;
                let _ = tx.send((id, vote)).await;
            });
        }
        drop(tx);

        // Collect to the deadline.
        let mut verified: BTreeMap<u16, SignedVote> = BTreeMap::new();
        let mut responded: HashSet<u16> = HashSet::new();
        let mut cancelled = false;
        let mut timed_out = false;
        let mut cancel_rx = cancel.map(|c| c.subscribe());
        let deadline = tokio::time::sleep(self.config.deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    timed_out = true;
                    break;
                }
                _ = wait_cancel(&mut cancel_rx) => {
                    cancelled = true;
                    break;
                }
                message = rx.recv() => {
                    let Some((id, maybe_vote)) = message else {
                        break; // every provider has answered
                    };
                    responded.insert(id);
                    match maybe_vote {
                        Some(vote) => {
                            self.admit_vote(&fp, epoch, &keystore, vote, &mut verified)
                        }
                        None => self.ledger.report(FaultReport {
                            validator_id: id,
                            kind: FaultKind::Silence,
                            epoch,
                            fingerprint: fp,
                        }),
                    }
                    let (allow, deny, _) = tally(&verified);
                    if allow >= required || deny >= required {
                        break;
                    }
                }
            }
        }
        self.telemetry
            .record_stage(Stage::Quorum, quorum_timer.elapsed_ticks());

        if timed_out {
            for provider in &self.providers {
                let id = provider.validator_id();
                if !responded.contains(&id) {
                    self.ledger.report(FaultReport {
                        validator_id: id,
                        kind: FaultKind::Silence,
                        epoch,
                        fingerprint: fp,
                    });
                }
            }
        }

        // Apply the quorum rule.
        let (allow, deny, defer) = tally(&verified);
        let (mut decision, mut reason) = if cancelled {
            (Decision::Defer, ReasonCode::Cancelled)
        } else if verified.len() < required {
            (Decision::Defer, ReasonCode::QuorumTimeout)
        } else if allow >= required {
            (Decision::Allow, majority_reason(&verified, Decision::Allow))
        } else if deny >= required {
            (Decision::Deny, majority_reason(&verified, Decision::Deny))
        } else {
            (Decision::Defer, majority_reason(&verified, Decision::Defer))
        };

        // Seal-ledger safety: within an epoch, a fingerprint that already
        // sealed Allow or Deny keeps that decision.
        if decision != Decision::Defer {
            match self.sealed.entry((fp, epoch)) {
                dashmap::mapref::entry::Entry::Occupied(existing) => {
                    if *existing.get() != decision {
                        warn!(
                            fingerprint = %hex::encode(fp),
                            epoch,
                            sealed = %existing.get(),
                            recomputed = %decision,
                            "conflicting quorum outcome suppressed by seal ledger"
                        );
                        decision = *existing.get();
                        reason = ReasonCode::None;
                    }
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(decision);
                }
            }
        }

        debug!(
            fingerprint = %hex::encode(fp),
            %decision,
            allow, deny, defer,
            verified = verified.len(),
            required,
            "quorum resolved"
        );

        // Seal the record, cancellations included.
        let draft = RecordDraft {
            descriptor: fixed_bytes(descriptor_bytes),
            fingerprint: fp,
            votes: verified.values().map(SignedVote::to_record).collect(),
            final_decision: decision,
            reason,
            epoch,
            t_start_ns,
            t_end_ns: unix_nanos(),
        };

        let seal_timer = StageTimer::start();
        let record_seq = match self.writer.try_append(draft) {
            Ok(receiver) => {
                let record = receiver
                    .await
                    .map_err(|_| ChainError::WriterClosed)
                    .and_then(|sealed| sealed)?;
                self.audit.mark_acked(record.seq)?;
                Some(record.seq)
            }
            Err(ChainError::Backpressure) => {
                self.telemetry.record_backpressure();
                decision = Decision::Defer;
                reason = ReasonCode::Backpressure;
                None
            }
            Err(other) => return Err(other.into()),
        };
        self.telemetry
            .record_stage(Stage::Seal, seal_timer.elapsed_ticks());
        self.telemetry.record_decision(decision);

        Ok(NetworkDecision {
            decision,
            reason,
            fingerprint: fp,
            epoch,
            votes_allow: allow as u32,
            votes_deny: deny as u32,
            votes_defer: defer as u32,
            record_seq,
        })
    }

    /// Verify and admit one incoming vote, recording faults for the rest.
    fn admit_vote(
        &self,
        fp: &[u8; 32],
        epoch: u64,
        keystore: &tcp_crypto::keystore::KeystoreSnapshot,
        vote: SignedVote,
        verified: &mut BTreeMap<u16, SignedVote>,
    ) {
        if vote.fingerprint != *fp {
            self.ledger.report(FaultReport {
                validator_id: vote.validator_id,
                kind: FaultKind::FingerprintMismatch,
                epoch,
                fingerprint: *fp,
            });
            return;
        }
        if keystore
            .verifying_key(vote.validator_id, vote.epoch)
            .is_none()
        {
            self.ledger.report(FaultReport {
                validator_id: vote.validator_id,
                kind: FaultKind::EpochMismatch,
                epoch,
                fingerprint: *fp,
            });
            return;
        }
        if !vote.verify(keystore) {
            self.ledger.report(FaultReport {
                validator_id: vote.validator_id,
                kind: FaultKind::ForgedSignature,
                epoch,
                fingerprint: *fp,
            });
            return;
        }
        match verified.get(&vote.validator_id) {
            Some(existing) if existing.decision != vote.decision => {
                self.ledger.report(FaultReport {
                    validator_id: vote.validator_id,
                    kind: FaultKind::Equivocation,
                    epoch,
                    fingerprint: *fp,
                });
            }
            Some(_) => {} // benign duplicate
            None => {
                verified.insert(vote.validator_id, vote);
            }
        }
    }
}

async fn wait_cancel(rx: &mut Option<watch::Receiver<bool>>) {
    match rx {
        Some(rx) => {
            // Resolves when the flag flips; a dropped handle means the
            // caller can no longer cancel.
            if rx.wait_for(|flag| *flag).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

fn tally(verified: &BTreeMap<u16, SignedVote>) -> (usize, usize, usize) {
    let mut allow = 0;
    let mut deny = 0;
    let mut defer = 0;
    for vote in verified.values() {
        match vote.decision {
            Decision::Allow => allow += 1,
            Decision::Deny => deny += 1,
            Decision::Defer => defer += 1,
        }
    }
    (allow, deny, defer)
}

/// Most frequent reason among votes carrying the final decision; ties go
/// to the lowest code so the result is deterministic.
fn majority_reason(verified: &BTreeMap<u16, SignedVote>, decision: Decision) -> ReasonCode {
    let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
    for vote in verified.values().filter(|v| v.decision == decision) {
        *counts.entry(vote.reason.as_u8()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(code, _)| ReasonCode::from_u8(code))
        .unwrap_or(ReasonCode::None)
}

fn fixed_bytes(bytes: &[u8]) -> [u8; DESCRIPTOR_LEN] {
    let mut out = [0u8; DESCRIPTOR_LEN];
    let n = bytes.len().min(DESCRIPTOR_LEN);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

fn unix_nanos() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
