// tcp-config: Deployment configuration
// Loading hierarchy: environment > file > defaults. A new config takes
// effect only through snapshot publication at an epoch boundary; nothing
// here mutates a running pipeline.

pub mod env;
pub mod schema;

pub use env::apply_env_overrides;
pub use schema::{
    AuditSection, CodecSection, IntegritySection, KeystoreSection, NodeSection, PolicySection,
    QuorumSection, TcpConfig, TelemetrySection,
};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors map to CLI exit code 2.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Load configuration: defaults, then the file (if present), then
/// environment overrides, then validation.
pub fn load_config(path: Option<&Path>) -> Result<TcpConfig> {
    let mut config = match path {
        Some(explicit) => load_from_file(explicit)?,
        None => {
            let default_path = default_config_path()?;
            if default_path.exists() {
                load_from_file(&default_path)?
            } else {
                TcpConfig::default()
            }
        }
    };

    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

pub fn load_from_file(path: &Path) -> Result<TcpConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// `$TCP_CONFIG` wins; otherwise `~/.tcp/config.toml`.
pub fn default_config_path() -> Result<PathBuf> {
    if let Ok(explicit) = std::env::var("TCP_CONFIG") {
        return Ok(PathBuf::from(explicit));
    }
    let home = std::env::var("HOME").map_err(|_| ConfigError::Io("HOME not set".to_string()))?;
    let mut path = PathBuf::from(home);
    path.push(".tcp");
    path.push("config.toml");
    Ok(path)
}
