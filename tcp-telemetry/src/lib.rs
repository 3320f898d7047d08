// tcp-telemetry: Stage latency accounting and the timing_ok invariant
// Lock-free atomic counters; the hot path pays one fetch_add per field.
// The guard samples real traffic: a stage whose coefficient of variation
// drifts past the threshold flips timing_ok so operators can quarantine
// the node.

pub mod histogram;

pub use histogram::{StageHistogram, BUCKETS};

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tcp_kernel::decision::Decision;
use tcp_kernel::guard::Stage;

/// Minimum samples before a stage participates in the timing verdict.
pub const MIN_SAMPLES: u64 = 10_000;

/// Default CV ceiling per stage, measured at install time.
pub const DEFAULT_CV_THRESHOLD: f64 = 0.2;

/// Process-wide telemetry hub. One instance per validator node, shared by
/// reference across workers.
pub struct Telemetry {
    stages: [StageHistogram; Stage::COUNT],
    allow: AtomicU64,
    deny: AtomicU64,
    defer: AtomicU64,
    backpressure: AtomicU64,
    cv_threshold: f64,
    min_samples: u64,
}

impl Telemetry {
    pub fn new(cv_threshold: f64, min_samples: u64) -> Self {
        Self {
            stages: std::array::from_fn(|_| StageHistogram::new()),
            allow: AtomicU64::new(0),
            deny: AtomicU64::new(0),
            defer: AtomicU64::new(0),
            backpressure: AtomicU64::new(0),
            cv_threshold,
            min_samples,
        }
    }

    /// Record one stage latency sample (pre-padding ticks, so drift inside
    /// the budget stays visible).
    #[inline(always)]
    pub fn record_stage(&self, stage: Stage, ticks: u64) {
        self.stages[stage.index()].record(ticks);
    }

    #[inline(always)]
    pub fn record_decision(&self, decision: Decision) {
        match decision {
            Decision::Allow => &self.allow,
            Decision::Deny => &self.deny,
            Decision::Defer => &self.defer,
        }
        .fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_backpressure(&self) {
        self.backpressure.fetch_add(1, Ordering::Relaxed);
    }

    /// Coefficient of variation for one stage; `None` below the sample
    /// floor.
    pub fn cv(&self, stage: Stage) -> Option<f64> {
        let h = &self.stages[stage.index()];
        if h.count() < self.min_samples {
            return None;
        }
        Some(h.cv())
    }

    /// The timing invariant: every stage with enough samples sits under
    /// the CV threshold. Stages still warming up do not fail the check.
    pub fn timing_ok(&self) -> bool {
        Stage::ALL.iter().all(|stage| match self.cv(*stage) {
            Some(cv) => cv < self.cv_threshold,
            None => true,
        })
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let stages = Stage::ALL
            .iter()
            .map(|stage| {
                let h = &self.stages[stage.index()];
                StageSnapshot {
                    stage: stage.name().to_string(),
                    count: h.count(),
                    mean_ticks: h.mean(),
                    cv: h.cv(),
                }
            })
            .collect();
        TelemetrySnapshot {
            stages,
            allow: self.allow.load(Ordering::Relaxed),
            deny: self.deny.load(Ordering::Relaxed),
            defer: self.defer.load(Ordering::Relaxed),
            backpressure: self.backpressure.load(Ordering::Relaxed),
            timing_ok: self.timing_ok(),
        }
    }

    /// Text exposition for the telemetry sink, one line per series.
    pub fn render_text(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();
        for s in &snapshot.stages {
            out.push_str(&format!(
                "tcp_stage_samples_total{{stage=\"{}\"}} {}\n",
                s.stage, s.count
            ));
            out.push_str(&format!(
                "tcp_stage_mean_ticks{{stage=\"{}\"}} {:.1}\n",
                s.stage, s.mean_ticks
            ));
            out.push_str(&format!(
                "tcp_stage_cv{{stage=\"{}\"}} {:.4}\n",
                s.stage, s.cv
            ));
        }
        out.push_str(&format!("tcp_decisions_total{{decision=\"allow\"}} {}\n", snapshot.allow));
        out.push_str(&format!("tcp_decisions_total{{decision=\"deny\"}} {}\n", snapshot.deny));
        out.push_str(&format!("tcp_decisions_total{{decision=\"defer\"}} {}\n", snapshot.defer));
        out.push_str(&format!("tcp_backpressure_total {}\n", snapshot.backpressure));
        out.push_str(&format!(
            "tcp_timing_ok {}\n",
            if snapshot.timing_ok { 1 } else { 0 }
        ));
        out
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new(DEFAULT_CV_THRESHOLD, MIN_SAMPLES)
    }
}

/// Point-in-time view of the hub, serialisable for the status surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub stages: Vec<StageSnapshot>,
    pub allow: u64,
    pub deny: u64,
    pub defer: u64,
    pub backpressure: u64,
    pub timing_ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub stage: String,
    pub count: u64,
    pub mean_ticks: f64,
    pub cv: f64,
}
