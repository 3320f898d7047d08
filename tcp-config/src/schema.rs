// tcp-config: Configuration schema and validation

use crate::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use tcp_crypto::{HybridMode, IntegrityConfig};
use tcp_kernel::codec::DecodeMode;
use tcp_kernel::descriptor::command_hash;
use tcp_kernel::policy::PolicySpec;

/// Top-level deployment configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    pub node: NodeSection,
    pub quorum: QuorumSection,
    pub integrity: IntegritySection,
    pub codec: CodecSection,
    pub policy: PolicySection,
    pub audit: AuditSection,
    pub keystore: KeystoreSection,
    pub telemetry: TelemetrySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// This node's validator ID
    pub validator_id: u16,
    /// tracing env-filter directive
    pub log_filter: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            validator_id: 1,
            log_filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuorumSection {
    /// Honest-quorum threshold; 75 is the floor, raising is legal
    pub threshold_pct: u8,
    pub deadline_ms: u64,
    /// Expected validator count, for status display
    pub validators: u16,
}

impl Default for QuorumSection {
    fn default() -> Self {
        Self {
            threshold_pct: 75,
            deadline_ms: 250,
            validators: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegritySection {
    pub pq_required: bool,
    /// "strict" or "permissive"
    pub hybrid: String,
    pub proof_timeout_ms: u64,
    pub proof_cache_entries: usize,
}

impl Default for IntegritySection {
    fn default() -> Self {
        Self {
            pq_required: false,
            hybrid: "strict".to_string(),
            proof_timeout_ms: 50,
            proof_cache_entries: 1024,
        }
    }
}

impl IntegritySection {
    pub fn to_integrity_config(&self) -> Result<IntegrityConfig> {
        let hybrid = match self.hybrid.as_str() {
            "strict" => HybridMode::Strict,
            "permissive" => HybridMode::Permissive,
            other => {
                return Err(ConfigError::Validation(format!(
                    "unknown hybrid mode: {other}"
                )))
            }
        };
        Ok(IntegrityConfig {
            pq_required: self.pq_required,
            hybrid,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecSection {
    /// "strict" or "lenient" reserved-bit handling
    pub mode: String,
}

impl Default for CodecSection {
    fn default() -> Self {
        Self {
            mode: "strict".to_string(),
        }
    }
}

impl CodecSection {
    pub fn to_decode_mode(&self) -> Result<DecodeMode> {
        match self.mode.as_str() {
            "strict" => Ok(DecodeMode::Strict),
            "lenient" => Ok(DecodeMode::Lenient),
            other => Err(ConfigError::Validation(format!(
                "unknown decode mode: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    pub version: u64,
    pub strict_flags: bool,
    /// Decision for HIGH-risk file/network-only descriptors:
    /// "allow", "deny", or "defer"
    pub high_plain: String,
    /// Commands exempt from the HIGH/CRITICAL default deny; hashed at load
    pub allow_commands: Vec<String>,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            version: 1,
            strict_flags: true,
            high_plain: "defer".to_string(),
            allow_commands: Vec::new(),
        }
    }
}

impl PolicySection {
    pub fn to_policy_spec(&self) -> Result<PolicySpec> {
        use tcp_kernel::decision::Decision;
        let high_plain = match self.high_plain.as_str() {
            "allow" => Decision::Allow,
            "deny" => Decision::Deny,
            "defer" => Decision::Defer,
            other => {
                return Err(ConfigError::Validation(format!(
                    "unknown high_plain decision: {other}"
                )))
            }
        };
        Ok(PolicySpec {
            version: self.version,
            strict_flags: self.strict_flags,
            high_plain,
            allow_list: self.allow_commands.iter().map(|c| command_hash(c)).collect(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSection {
    pub path: String,
    pub channel_capacity: usize,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            path: "tcp-audit".to_string(),
            channel_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreSection {
    pub path: String,
}

impl Default for KeystoreSection {
    fn default() -> Self {
        Self {
            path: "tcp-keystore.toml".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySection {
    pub cv_threshold: f64,
    pub min_samples: u64,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            cv_threshold: 0.2,
            min_samples: 10_000,
        }
    }
}

impl TcpConfig {
    /// Reject configurations that would weaken the protocol invariants.
    pub fn validate(&self) -> Result<()> {
        if self.quorum.threshold_pct < 75 || self.quorum.threshold_pct > 100 {
            return Err(ConfigError::Validation(format!(
                "quorum threshold {}% outside [75, 100]",
                self.quorum.threshold_pct
            )));
        }
        if self.quorum.deadline_ms == 0 {
            return Err(ConfigError::Validation("quorum deadline must be nonzero".into()));
        }
        if self.quorum.validators == 0 {
            return Err(ConfigError::Validation("validator count must be nonzero".into()));
        }
        if !(self.telemetry.cv_threshold > 0.0 && self.telemetry.cv_threshold <= 1.0) {
            return Err(ConfigError::Validation(format!(
                "cv_threshold {} outside (0, 1]",
                self.telemetry.cv_threshold
            )));
        }
        if self.audit.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "audit channel capacity must be nonzero".into(),
            ));
        }
        // Surface enum-typed fields early instead of at wiring time.
        self.integrity.to_integrity_config()?;
        self.codec.to_decode_mode()?;
        self.policy.to_policy_spec()?;
        Ok(())
    }
}
