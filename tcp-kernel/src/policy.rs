// tcp-kernel: Policy engine with compiled decision table
// A policy is data: a fixed [risk][flag-class] table plus an allow-list,
// compiled once at load time and published as an immutable snapshot.
// Resolution is a table access plus a context mask; no data-dependent branches.

use crate::ct;
use crate::decision::{Context, Decision, ReasonCode};
use crate::descriptor::{CapabilityFlags, Descriptor, RiskLevel};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Number of flag equivalence classes (see [`CapabilityFlags::class`]).
pub const FLAG_CLASSES: usize = 16;
/// Number of risk levels.
pub const RISK_LEVELS: usize = 5;

/// Policy compilation errors.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("allow-list exceeds maximum size of {0} entries")]
    AllowListTooLarge(usize),
}

/// Declarative policy input, loaded from configuration and compiled into a
/// [`PolicyTable`]. Versioned: a new policy takes effect atomically via
/// [`PolicyManager::publish`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySpec {
    /// Monotonic policy version, for audit and status output
    pub version: u64,
    /// Reserved capability bits defer instead of passing through
    pub strict_flags: bool,
    /// Decision for HIGH-risk descriptors carrying only file/network flags
    pub high_plain: Decision,
    /// Command hashes exempted from the HIGH/CRITICAL default deny
    pub allow_list: Vec<[u8; 4]>,
}

impl Default for PolicySpec {
    fn default() -> Self {
        Self {
            version: 1,
            strict_flags: true,
            high_plain: Decision::Defer,
            allow_list: Vec::new(),
        }
    }
}

/// Upper bound keeps the constant-shape allow-list scan cheap.
pub const ALLOW_LIST_MAX: usize = 256;

/// Compiled, immutable policy. The table is total over
/// `(risk, flag_class)`; entries for combinations the codec invariants
/// exclude (privilege flags below HIGH) are pinned to Deny so a bypassed
/// decode still cannot widen the outcome.
pub struct PolicyTable {
    version: u64,
    strict_flags: bool,
    table: [[Decision; FLAG_CLASSES]; RISK_LEVELS],
    allow_list: Box<[[u8; 4]]>,
}

const PRIVILEGE_CLASS_BIT: usize = 1 << 2;
const MUTATION_CLASS_BIT: usize = 1 << 3;

impl PolicyTable {
    /// Compile a spec into the fixed lookup table.
    pub fn compile(spec: &PolicySpec) -> Result<Self, PolicyError> {
        if spec.allow_list.len() > ALLOW_LIST_MAX {
            return Err(PolicyError::AllowListTooLarge(ALLOW_LIST_MAX));
        }

        let mut table = [[Decision::Deny; FLAG_CLASSES]; RISK_LEVELS];
        for class in 0..FLAG_CLASSES {
            let privileged = class & PRIVILEGE_CLASS_BIT != 0;
            let mutating = class & MUTATION_CLASS_BIT != 0;

            // SAFE: the codec restricts flags to FILE_OPS; a SAFE request
            // is allowed unless the context forbids all activity.
            table[RiskLevel::Safe.as_u8() as usize][class] =
                if privileged || mutating { Decision::Deny } else { Decision::Allow };

            // LOW / MEDIUM: ordinary capabilities pass; privilege flags
            // cannot appear here per the cross-field invariants.
            for risk in [RiskLevel::Low, RiskLevel::Medium] {
                table[risk.as_u8() as usize][class] =
                    if privileged { Decision::Deny } else { Decision::Allow };
            }

            // HIGH: privileged or mutating capabilities deny unless
            // allow-listed; plain file/network work takes the configured
            // escalation decision.
            table[RiskLevel::High.as_u8() as usize][class] = if privileged || mutating {
                Decision::Deny
            } else {
                spec.high_plain
            };

            // CRITICAL: deny across the board unless allow-listed.
            table[RiskLevel::Critical.as_u8() as usize][class] = Decision::Deny;
        }

        let mut allow_list: Vec<[u8; 4]> = spec.allow_list.clone();
        allow_list.sort_unstable();
        allow_list.dedup();

        Ok(Self {
            version: spec.version,
            strict_flags: spec.strict_flags,
            table,
            allow_list: allow_list.into_boxed_slice(),
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Constant-shape membership scan: every entry is compared, matches
    /// accumulate into a flag, no early exit.
    #[inline]
    fn allow_listed(&self, command_hash: &[u8; 4]) -> bool {
        let mut hit = false;
        for entry in self.allow_list.iter() {
            hit |= ct::ct_eq(entry, command_hash);
        }
        hit
    }

    /// Resolve a decision for a decoded descriptor and request context.
    ///
    /// Pure and deterministic for a fixed table: same inputs, same output.
    /// The resolution order is fixed (lockdown mask, reserved-bit defer,
    /// table lookup, allow-list override) and every step runs on every
    /// call regardless of which one decides.
    pub fn decide(&self, descriptor: &Descriptor, context: &Context) -> (Decision, ReasonCode) {
        let class = CapabilityFlags(descriptor.flags.0 & CapabilityFlags::KNOWN_MASK).class();
        let base = self.table[descriptor.risk.as_u8() as usize][class];

        let listed = self.allow_listed(&descriptor.command_hash);
        let unknown_flags = self.strict_flags & descriptor.flags.has_reserved();

        // Allow-list lifts the table's Deny; everything below runs on bytes.
        let mut decision = base.as_u8();
        let mut reason = ct::ct_select_u8(
            base == Decision::Allow,
            ReasonCode::None.as_u8(),
            ReasonCode::PolicyRule.as_u8(),
        );
        let lifted = (base == Decision::Deny) & listed;
        decision = ct::ct_select_u8(lifted, Decision::Allow.as_u8(), decision);
        reason = ct::ct_select_u8(lifted, ReasonCode::None.as_u8(), reason);

        // Unknown-but-valid future capability classes defer, never deny.
        decision = ct::ct_select_u8(unknown_flags, Decision::Defer.as_u8(), decision);
        reason = ct::ct_select_u8(unknown_flags, ReasonCode::UnknownFlagStrict.as_u8(), reason);

        // Emergency lockdown forbids all activity, SAFE included.
        decision = ct::ct_select_u8(context.lockdown, Decision::Deny.as_u8(), decision);
        reason = ct::ct_select_u8(context.lockdown, ReasonCode::LockdownActive.as_u8(), reason);

        (Decision::from_u8(decision), ReasonCode::from_u8(reason))
    }
}

impl std::fmt::Debug for PolicyTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyTable")
            .field("version", &self.version)
            .field("strict_flags", &self.strict_flags)
            .field("allow_list_len", &self.allow_list.len())
            .finish()
    }
}

/// Atomic publication of policy snapshots. Readers clone the `Arc` once
/// per request and never hold the lock across the hot path; a swap to an
/// equal snapshot is idempotent.
pub struct PolicyManager {
    active: RwLock<Arc<PolicyTable>>,
}

impl PolicyManager {
    pub fn new(initial: PolicyTable) -> Self {
        Self {
            active: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn with_defaults() -> Self {
        let table = PolicyTable::compile(&PolicySpec::default())
            .unwrap_or_else(|_| unreachable!("default spec has an empty allow-list"));
        Self::new(table)
    }

    /// Publish a new policy snapshot. In-flight requests keep the snapshot
    /// they already cloned and see the old policy end-to-end.
    pub fn publish(&self, table: PolicyTable) {
        let version = table.version;
        *self.active.write() = Arc::new(table);
        tracing::info!(policy_version = version, "policy snapshot published");
    }

    #[inline(always)]
    pub fn snapshot(&self) -> Arc<PolicyTable> {
        self.active.read().clone()
    }
}
