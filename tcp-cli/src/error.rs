// tcp-cli: Error-to-exit-code mapping

use tcp_crypto::keystore::KeystoreError;
use tcp_lockchain::ChainError;
use thiserror::Error;

/// CLI failure classes, each pinned to an exit code.
#[derive(Debug, Error)]
pub enum CliError {
    /// Exit 1: tamper evidence or broken chain
    #[error("integrity failure: {0}")]
    Integrity(String),

    /// Exit 2: configuration problems
    #[error("config error: {0}")]
    Config(String),

    /// Exit 3: runtime failures (I/O, storage)
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Integrity(_) => 1,
            CliError::Config(_) => 2,
            CliError::Runtime(_) => 3,
        }
    }
}

impl From<tcp_config::ConfigError> for CliError {
    fn from(e: tcp_config::ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<ChainError> for CliError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::Broken { .. } | ChainError::AckedRecordLost { .. } => {
                CliError::Integrity(e.to_string())
            }
            other => CliError::Runtime(other.to_string()),
        }
    }
}

impl From<KeystoreError> for CliError {
    fn from(e: KeystoreError) -> Self {
        match e {
            KeystoreError::Io(_) => CliError::Runtime(e.to_string()),
            other => CliError::Config(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for CliError {
    fn from(e: anyhow::Error) -> Self {
        CliError::Runtime(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::Integrity("x".into()).exit_code(), 1);
        assert_eq!(CliError::Config("x".into()).exit_code(), 2);
        assert_eq!(CliError::Runtime("x".into()).exit_code(), 3);
    }

    #[test]
    fn test_chain_error_classes() {
        let broken: CliError = ChainError::Broken { seq: 3 }.into();
        assert_eq!(broken.exit_code(), 1);
        let backpressure: CliError = ChainError::Backpressure.into();
        assert_eq!(backpressure.exit_code(), 3);
    }
}
