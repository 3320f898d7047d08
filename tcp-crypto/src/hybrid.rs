// tcp-crypto: Hybrid verification policy
// Deployment-wide, never per-request: strict requires both the lattice
// signature and the classical tag inside a v3 proof; permissive accepts
// either.

use serde::{Deserialize, Serialize};

/// How the two authenticators inside a v3 proof blob combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HybridMode {
    /// Both the Dilithium signature and the classical tag must verify
    #[default]
    Strict,
    /// Either authenticator suffices (transition deployments)
    Permissive,
}

/// Deployment-wide integrity settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IntegrityConfig {
    /// Deny v2 descriptors with `VariantDeprecated` once the deprecation
    /// window closes
    pub pq_required: bool,
    pub hybrid: HybridMode,
}
