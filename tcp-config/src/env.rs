// tcp-config: Environment variable overrides
// TCP_* variables take precedence over the file: env > file > defaults.

use crate::schema::TcpConfig;
use crate::{ConfigError, Result};

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| ConfigError::Validation(format!("invalid value for {key}: {value}")))
}

/// Apply recognised `TCP_*` overrides in place.
pub fn apply_env_overrides(config: &mut TcpConfig) -> Result<()> {
    for (key, value) in std::env::vars() {
        match key.as_str() {
            "TCP_NODE_VALIDATOR_ID" => config.node.validator_id = parse(&key, &value)?,
            "TCP_NODE_LOG_FILTER" => config.node.log_filter = value,
            "TCP_QUORUM_THRESHOLD_PCT" => config.quorum.threshold_pct = parse(&key, &value)?,
            "TCP_QUORUM_DEADLINE_MS" => config.quorum.deadline_ms = parse(&key, &value)?,
            "TCP_QUORUM_VALIDATORS" => config.quorum.validators = parse(&key, &value)?,
            "TCP_INTEGRITY_PQ_REQUIRED" => config.integrity.pq_required = parse(&key, &value)?,
            "TCP_INTEGRITY_HYBRID" => config.integrity.hybrid = value,
            "TCP_INTEGRITY_PROOF_TIMEOUT_MS" => {
                config.integrity.proof_timeout_ms = parse(&key, &value)?
            }
            "TCP_CODEC_MODE" => config.codec.mode = value,
            "TCP_POLICY_STRICT_FLAGS" => config.policy.strict_flags = parse(&key, &value)?,
            "TCP_AUDIT_PATH" => config.audit.path = value,
            "TCP_AUDIT_CHANNEL_CAPACITY" => config.audit.channel_capacity = parse(&key, &value)?,
            "TCP_KEYSTORE_PATH" => config.keystore.path = value,
            "TCP_TELEMETRY_CV_THRESHOLD" => config.telemetry.cv_threshold = parse(&key, &value)?,
            _ => {}
        }
    }
    Ok(())
}
