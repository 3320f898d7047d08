// tcp-kernel: Decision, reason code, and request context types
// Every request resolves to exactly one of Allow/Deny/Defer with a machine-readable reason

use serde::{Deserialize, Serialize};

/// Outcome of validating a descriptor, locally or across the quorum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    Allow = 0,
    Deny = 1,
    Defer = 2,
}

impl Decision {
    #[inline(always)]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode from wire byte; out-of-range collapses to Defer so a
    /// corrupted vote can never widen into an Allow.
    #[inline]
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Decision::Allow,
            1 => Decision::Deny,
            _ => Decision::Defer,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Allow => write!(f, "allow"),
            Decision::Deny => write!(f, "deny"),
            Decision::Defer => write!(f, "defer"),
        }
    }
}

/// Machine-readable reason accompanying a decision.
///
/// The numbering is a wire surface: reason codes ride inside signed vote
/// payloads and sealed audit records, so variants are append-only.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonCode {
    None = 0,
    // Parse failures (terminal, Codec)
    BadMagic = 1,
    UnsupportedVersion = 2,
    CrcMismatch = 3,
    FlagRiskConflict = 4,
    OutOfRangeField = 5,
    // Auth failures (terminal, Integrity Layer)
    BadSignature = 16,
    UnknownIssuer = 17,
    ProofUnavailable = 18,
    VariantDeprecated = 19,
    // Policy outcomes (not exceptional)
    UnknownFlagStrict = 32,
    LockdownActive = 33,
    PolicyRule = 34,
    // Consensus outcomes
    QuorumTimeout = 48,
    EpochMismatch = 49,
    Cancelled = 50,
    // Infrastructure
    Backpressure = 64,
}

impl ReasonCode {
    #[inline(always)]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => ReasonCode::BadMagic,
            2 => ReasonCode::UnsupportedVersion,
            3 => ReasonCode::CrcMismatch,
            4 => ReasonCode::FlagRiskConflict,
            5 => ReasonCode::OutOfRangeField,
            16 => ReasonCode::BadSignature,
            17 => ReasonCode::UnknownIssuer,
            18 => ReasonCode::ProofUnavailable,
            19 => ReasonCode::VariantDeprecated,
            32 => ReasonCode::UnknownFlagStrict,
            33 => ReasonCode::LockdownActive,
            34 => ReasonCode::PolicyRule,
            48 => ReasonCode::QuorumTimeout,
            49 => ReasonCode::EpochMismatch,
            50 => ReasonCode::Cancelled,
            64 => ReasonCode::Backpressure,
            _ => ReasonCode::None,
        }
    }
}

/// Request context evaluated alongside the descriptor.
///
/// Small and fixed: a caller identity tag, an environment tag, and the
/// deployment-wide lockdown switch. No per-request policy mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Context {
    /// Caller identity tag (agent class, not an individual principal)
    pub caller: u8,
    /// Environment tag (production, staging, sandbox)
    pub environment: u8,
    /// Emergency lockdown: every request is denied while set
    pub lockdown: bool,
}

impl Context {
    pub fn new(caller: u8, environment: u8) -> Self {
        Self {
            caller,
            environment,
            lockdown: false,
        }
    }
}
