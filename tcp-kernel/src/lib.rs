// tcp-kernel: Hot path validation kernel for tool capability descriptors
// Codec, policy resolution, and timing discipline for the sub-microsecond gate

#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
// Note: unsafe code is isolated to the timer module (RDTSC intrinsics)

//! # TCP Kernel
//!
//! The validation core for the Tool Capability Protocol. Every tool
//! invocation is described by a fixed 24-byte descriptor; this crate parses
//! it, checks its structural integrity, and resolves a policy decision, all
//! with a constant-shape control flow so that timing does not leak which
//! check failed.
//!
//! ## Key Components
//!
//! - **Descriptor**: the 24-byte capability record and its field types
//! - **Codec**: fixed-offset encode/decode with CRC-16 and cross-field invariants
//! - **Policy**: compiled decision table, branch-free lookup, atomic snapshot swap
//! - **Timer**: RDTSC-based tick counting for stage measurement
//! - **Guard**: fixed per-stage work budgets met by calibrated dummy work
//! - **Variant**: magic+version dispatch between classical and post-quantum formats
//!
//! ## Guarantees
//!
//! - All decode paths touch every field and compute the CRC before any verdict
//! - Policy resolution is a table access plus a context mask, no data-dependent branches
//! - Same input always produces the same output for a loaded policy snapshot

pub mod codec;
pub mod ct;
pub mod decision;
pub mod descriptor;
pub mod guard;
pub mod policy;
pub mod timer;
pub mod variant;

// Re-exports for convenience
pub use codec::{decode, decode_with_mode, encode, DecodeMode, ParseError};
pub use decision::{Context, Decision, ReasonCode};
pub use descriptor::{
    command_hash, CapabilityFlags, Descriptor, DescriptorBuilder, PerfEnvelope, RiskLevel,
    DESCRIPTOR_LEN,
};
pub use guard::{Stage, StageBudgets, TimingGuard};
pub use policy::{PolicyManager, PolicySpec, PolicyTable};
pub use timer::{calibrate_tsc, read_tsc, StageTimer};
pub use variant::Variant;

/// Prelude for common imports
pub mod prelude {
    pub use crate::{
        codec::{decode, encode, DecodeMode, ParseError},
        decision::{Context, Decision, ReasonCode},
        descriptor::{CapabilityFlags, Descriptor, DescriptorBuilder, RiskLevel},
        guard::{Stage, TimingGuard},
        policy::{PolicyManager, PolicySpec},
        variant::Variant,
    };
}

/// Global initialization: calibrate the tick source and sanity-check the
/// measurement overhead against the smallest stage budget.
pub fn init() -> Result<(), String> {
    let calibration = timer::calibrate_tsc();

    if calibration.confidence < 0.9 {
        return Err(format!(
            "TSC calibration confidence too low: {:.2}%",
            calibration.confidence * 100.0
        ));
    }

    let probe = timer::StageTimer::start();
    let _ = timer::read_tsc();
    let elapsed = probe.elapsed_ticks();

    if elapsed > guard::StageBudgets::default().decode {
        return Err(format!(
            "tick-read overhead ({elapsed} ticks) exceeds the decode stage budget"
        ));
    }

    Ok(())
}
