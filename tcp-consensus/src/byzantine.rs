// tcp-consensus: Byzantine fault accounting
// Records evidence of misbehaving validators so operators can rotate them
// out. The quorum rule already neutralises up to floor(0.25*N) faulty
// nodes; this ledger makes the faults visible.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Classes of observed validator misbehaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// Vote signature does not verify under the claimed identity
    ForgedSignature,
    /// Two verified votes for the same fingerprint and epoch with
    /// different decisions
    Equivocation,
    /// Vote references a fingerprint the coordinator never issued
    FingerprintMismatch,
    /// Vote epoch outside the current epoch and overlap window
    EpochMismatch,
    /// No vote by the collection deadline
    Silence,
}

/// One piece of recorded evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultReport {
    pub validator_id: u16,
    pub kind: FaultKind,
    pub epoch: u64,
    pub fingerprint: [u8; 32],
}

/// Per-validator fault ledger, shared across coordinator tasks.
#[derive(Debug, Default)]
pub struct ByzantineLedger {
    faults: DashMap<u16, Vec<FaultReport>>,
}

impl ByzantineLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, report: FaultReport) {
        warn!(
            validator_id = report.validator_id,
            kind = ?report.kind,
            epoch = report.epoch,
            fingerprint = %hex::encode(report.fingerprint),
            "byzantine behaviour recorded"
        );
        self.faults
            .entry(report.validator_id)
            .or_default()
            .push(report);
    }

    /// Validators with at least one recorded fault.
    pub fn faulty_validators(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.faults.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn fault_count(&self, validator_id: u16) -> usize {
        self.faults.get(&validator_id).map(|v| v.len()).unwrap_or(0)
    }

    pub fn total_faults(&self) -> usize {
        self.faults.iter().map(|e| e.value().len()).sum()
    }

    /// The tolerance bound: safety holds while faulty validators stay at
    /// or below floor(0.25 * N).
    pub fn within_tolerance(&self, total_validators: usize) -> bool {
        self.faulty_validators().len() <= total_validators / 4
    }
}
