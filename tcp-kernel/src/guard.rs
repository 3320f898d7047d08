// tcp-kernel: Timing guard with fixed per-stage work budgets
// A stage that finishes early burns calibrated dummy work until its budget
// is met, so completion time does not depend on which path was taken.

use crate::timer::{read_tsc, StageTimer};
use serde::{Deserialize, Serialize};

/// Pipeline stages measured and padded individually.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Decode = 0,
    Integrity = 1,
    Policy = 2,
    Sign = 3,
    Quorum = 4,
    Seal = 5,
}

impl Stage {
    pub const COUNT: usize = 6;

    pub const ALL: [Stage; Stage::COUNT] = [
        Stage::Decode,
        Stage::Integrity,
        Stage::Policy,
        Stage::Sign,
        Stage::Quorum,
        Stage::Seal,
    ];

    #[inline(always)]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Decode => "decode",
            Stage::Integrity => "integrity",
            Stage::Policy => "policy",
            Stage::Sign => "sign",
            Stage::Quorum => "quorum",
            Stage::Seal => "seal",
        }
    }
}

/// Fixed tick budgets for the constant-time stages of the validator path.
/// Quorum and Seal are deadline-bounded, not tick-padded, so they carry no
/// budget here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageBudgets {
    pub decode: u64,
    pub integrity: u64,
    pub policy: u64,
    pub sign: u64,
}

impl Default for StageBudgets {
    fn default() -> Self {
        // Conservative defaults for commodity hardware; installs override
        // these with calibrated values.
        Self {
            decode: 600,
            integrity: 900,
            policy: 300,
            sign: 40_000,
        }
    }
}

impl StageBudgets {
    #[inline(always)]
    pub fn for_stage(&self, stage: Stage) -> u64 {
        match stage {
            Stage::Decode => self.decode,
            Stage::Integrity => self.integrity,
            Stage::Policy => self.policy,
            Stage::Sign => self.sign,
            Stage::Quorum | Stage::Seal => 0,
        }
    }
}

/// Enforces the fixed work budgets. One guard per validator node, shared
/// across workers; it holds no mutable state.
#[derive(Debug, Clone, Copy)]
pub struct TimingGuard {
    budgets: StageBudgets,
}

impl TimingGuard {
    pub fn new(budgets: StageBudgets) -> Self {
        Self { budgets }
    }

    pub fn budgets(&self) -> StageBudgets {
        self.budgets
    }

    /// Run `op`, then pad with dummy work until the stage budget elapses.
    /// Returns the op's result and the unpadded tick count (for telemetry,
    /// which records pre-padding latency so drift remains visible).
    #[inline]
    pub fn run_stage<T>(&self, stage: Stage, op: impl FnOnce() -> T) -> (T, u64) {
        let timer = StageTimer::start();
        let out = op();
        let raw_ticks = timer.elapsed_ticks();
        self.pad_to_budget(stage, timer.start_ticks());
        (out, raw_ticks)
    }

    /// Spin on data-independent dummy work until `budget` ticks have
    /// passed since `start_ticks`. A stage that overran its budget returns
    /// immediately; the overrun shows up in telemetry CV instead.
    #[inline]
    pub fn pad_to_budget(&self, stage: Stage, start_ticks: u64) {
        let budget = self.budgets.for_stage(stage);
        if budget == 0 {
            return;
        }
        let target = start_ticks.saturating_add(budget);
        let mut lcg: u64 = 0x9e37_79b9_7f4a_7c15;
        while read_tsc() < target {
            // Same instruction mix every iteration; the value is discarded.
            lcg = lcg.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            std::hint::black_box(lcg);
            std::hint::spin_loop();
        }
    }
}

impl Default for TimingGuard {
    fn default() -> Self {
        Self::new(StageBudgets::default())
    }
}

/// Install-time budget calibration: run each constant-time stage workload
/// `samples` times, take the worst observed latency, and add headroom so
/// the budget is met on effectively every request thereafter.
pub fn calibrate_budgets<F>(samples: usize, headroom_percent: u64, mut workload: F) -> StageBudgets
where
    F: FnMut(Stage) -> u64,
{
    let mut budgets = StageBudgets::default();
    for stage in [Stage::Decode, Stage::Integrity, Stage::Policy, Stage::Sign] {
        let mut worst = 0u64;
        for _ in 0..samples {
            worst = worst.max(workload(stage));
        }
        let padded = worst + worst * headroom_percent / 100;
        match stage {
            Stage::Decode => budgets.decode = padded.max(1),
            Stage::Integrity => budgets.integrity = padded.max(1),
            Stage::Policy => budgets.policy = padded.max(1),
            Stage::Sign => budgets.sign = padded.max(1),
            Stage::Quorum | Stage::Seal => {}
        }
    }
    budgets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_and_indices() {
        assert_eq!(Stage::ALL.len(), Stage::COUNT);
        for (i, stage) in Stage::ALL.iter().enumerate() {
            assert_eq!(stage.index(), i);
        }
        assert_eq!(Stage::Decode.name(), "decode");
    }

    #[test]
    fn test_run_stage_returns_result() {
        let guard = TimingGuard::new(StageBudgets {
            decode: 50,
            integrity: 50,
            policy: 50,
            sign: 50,
        });
        let (value, ticks) = guard.run_stage(Stage::Decode, || 41 + 1);
        assert_eq!(value, 42);
        let _ = ticks;
    }

    #[test]
    fn test_padding_reaches_budget() {
        let guard = TimingGuard::new(StageBudgets {
            decode: 5_000,
            integrity: 0,
            policy: 0,
            sign: 0,
        });
        let timer = StageTimer::start();
        let ((), _) = guard.run_stage(Stage::Decode, || ());
        // Total elapsed including padding must be at least the budget
        // minus the read overhead compensation.
        assert!(timer.elapsed_ticks() + 200 >= 5_000);
    }

    #[test]
    fn test_zero_budget_stages_do_not_pad() {
        let guard = TimingGuard::default();
        let timer = StageTimer::start();
        guard.pad_to_budget(Stage::Quorum, timer.start_ticks());
        // Returns immediately; generous bound to stay robust under CI noise.
        assert!(timer.elapsed_ticks() < 1_000_000);
    }

    #[test]
    fn test_calibration_adds_headroom() {
        let budgets = calibrate_budgets(10, 50, |_| 100);
        assert_eq!(budgets.decode, 150);
        assert_eq!(budgets.sign, 150);
    }
}
