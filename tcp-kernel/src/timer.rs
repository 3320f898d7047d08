// tcp-kernel: Cycle-accurate tick source for stage measurement
// RDTSC on x86-64, monotonic-clock fallback elsewhere; calibrated at startup

use std::sync::atomic::{AtomicU64, Ordering};

/// Ticks-per-nanosecond scale (x1000), cached after calibration.
static TICKS_PER_NS_MILLI: AtomicU64 = AtomicU64::new(0);

/// Overhead of the tick read itself, subtracted from measurements.
static TICK_READ_OVERHEAD: AtomicU64 = AtomicU64::new(0);

/// Read the CPU timestamp counter.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn read_tsc() -> u64 {
    // SAFETY: _rdtsc has no memory effects; it only reads the TSC register.
    unsafe { std::arch::x86_64::_rdtsc() }
}

/// Serialised TSC read for calibration (slower, ordered).
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn read_tsc_serialized() -> u64 {
    // SAFETY: CPUID serialises the instruction stream before the TSC read.
    unsafe {
        std::arch::x86_64::__cpuid(0);
        std::arch::x86_64::_rdtsc()
    }
}

/// Fallback for non-x86_64 platforms: nanoseconds from a fixed origin.
#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
pub fn read_tsc() -> u64 {
    use std::sync::OnceLock;
    static ORIGIN: OnceLock<std::time::Instant> = OnceLock::new();
    let origin = ORIGIN.get_or_init(std::time::Instant::now);
    origin.elapsed().as_nanos() as u64
}

#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
pub fn read_tsc_serialized() -> u64 {
    read_tsc()
}

/// Result of tick-source calibration, measured at install time.
#[derive(Debug, Clone, Copy)]
pub struct CalibrationResult {
    pub ticks_per_ns: f64,
    pub tick_read_overhead: u64,
    /// Coefficient of variation across calibration rounds
    pub cv: f64,
    /// 1 / (1 + cv): high when rounds agree
    pub confidence: f64,
}

/// Timer for a single pipeline stage.
pub struct StageTimer {
    start_ticks: u64,
    overhead: u64,
}

impl StageTimer {
    #[inline(always)]
    pub fn start() -> Self {
        Self {
            start_ticks: read_tsc(),
            overhead: TICK_READ_OVERHEAD.load(Ordering::Relaxed),
        }
    }

    /// Elapsed ticks, compensated for the read overhead.
    #[inline(always)]
    pub fn elapsed_ticks(&self) -> u64 {
        read_tsc()
            .saturating_sub(self.start_ticks)
            .saturating_sub(self.overhead)
    }

    #[inline(always)]
    pub fn start_ticks(&self) -> u64 {
        self.start_ticks
    }
}

/// Calibrate the tick source against the wall clock. Uses the median of
/// repeated short rounds; the CV across rounds is the calibration quality.
pub fn calibrate_tsc() -> CalibrationResult {
    const ROUNDS: usize = 50;
    const ROUND_MS: u64 = 5;

    let overhead = measure_tick_read_overhead();
    TICK_READ_OVERHEAD.store(overhead, Ordering::Relaxed);

    let mut rates = Vec::with_capacity(ROUNDS);
    for _ in 0..ROUNDS {
        let wall_start = std::time::Instant::now();
        let tsc_start = read_tsc_serialized();
        while wall_start.elapsed().as_millis() < ROUND_MS as u128 {
            std::hint::spin_loop();
        }
        let tsc_end = read_tsc_serialized();
        let nanos = wall_start.elapsed().as_nanos() as f64;
        rates.push((tsc_end - tsc_start) as f64 / nanos);
    }

    rates.sort_unstable_by(|a, b| a.total_cmp(b));
    let median = rates[ROUNDS / 2];

    let mean = rates.iter().sum::<f64>() / ROUNDS as f64;
    let variance = rates.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / ROUNDS as f64;
    let cv = if mean > 0.0 { variance.sqrt() / mean } else { 0.0 };

    TICKS_PER_NS_MILLI.store((median * 1000.0) as u64, Ordering::Relaxed);

    CalibrationResult {
        ticks_per_ns: median,
        tick_read_overhead: overhead,
        cv,
        confidence: 1.0 / (1.0 + cv),
    }
}

/// Cached ticks-per-nanosecond from the last calibration (0.0 before).
pub fn ticks_per_ns() -> f64 {
    TICKS_PER_NS_MILLI.load(Ordering::Relaxed) as f64 / 1000.0
}

/// Measure the cost of the tick read itself; the 10th percentile avoids
/// interrupt outliers.
fn measure_tick_read_overhead() -> u64 {
    const ROUNDS: usize = 4096;
    let mut samples = Vec::with_capacity(ROUNDS);

    for _ in 0..64 {
        let _ = read_tsc();
    }
    for _ in 0..ROUNDS {
        let start = read_tsc_serialized();
        std::hint::black_box(read_tsc());
        let end = read_tsc_serialized();
        samples.push(end.saturating_sub(start));
    }

    samples.sort_unstable();
    samples[ROUNDS / 10]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_measures_work() {
        let timer = StageTimer::start();
        let mut acc = 0u64;
        for i in 0..64 {
            acc = acc.wrapping_mul(31).wrapping_add(i);
        }
        std::hint::black_box(acc);
        // Elapsed may be zero after overhead compensation on a noisy box,
        // but must never go backwards.
        let a = timer.elapsed_ticks();
        let b = timer.elapsed_ticks();
        assert!(b >= a);
    }

    #[test]
    fn test_calibration_sane() {
        let result = calibrate_tsc();
        assert!(result.ticks_per_ns > 0.0);
        assert!(result.cv >= 0.0);
        assert!(result.confidence > 0.0 && result.confidence <= 1.0);
        assert!(ticks_per_ns() > 0.0);
    }

    #[test]
    fn test_overhead_small() {
        let overhead = measure_tick_read_overhead();
        assert!(overhead < 10_000, "tick read overhead implausibly large");
    }
}
