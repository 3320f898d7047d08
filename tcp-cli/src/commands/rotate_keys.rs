// tcp-cli: rotate-keys
// Stages fresh validator keypairs for a new epoch. The staged keystore
// moves today's public keys into the overlap slot; node secrets land in a
// separate per-epoch file for distribution to the validators.

use crate::error::CliError;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tcp_config::TcpConfig;
use tcp_crypto::keystore::KeystoreFile;

/// Per-epoch node secrets, hex-encoded seeds. Distributed out of band.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeKeyFile {
    pub epoch: u64,
    pub nodes: Vec<NodeKeyEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeKeyEntry {
    pub validator_id: u16,
    pub secret_seed: String,
}

pub fn run(config: &TcpConfig, epoch: u64) -> Result<(), CliError> {
    let keystore_path = Path::new(&config.keystore.path);
    let current = KeystoreFile::load(keystore_path)?;
    let snapshot = current.to_snapshot()?;

    let mut new_keys = BTreeMap::new();
    let mut secrets = Vec::new();
    for id in snapshot.validator_ids() {
        let signing = SigningKey::generate(&mut OsRng);
        new_keys.insert(id, signing.verifying_key());
        secrets.push(NodeKeyEntry {
            validator_id: id,
            secret_seed: hex::encode(signing.to_bytes()),
        });
    }

    let rotated = snapshot.rotated(epoch, new_keys)?;
    let staged_path = staged_path(keystore_path);
    KeystoreFile::from_snapshot(&rotated).save(&staged_path)?;

    let secrets_path = PathBuf::from(format!("tcp-node-keys-{epoch}.toml"));
    let node_file = NodeKeyFile {
        epoch,
        nodes: secrets,
    };
    std::fs::write(
        &secrets_path,
        toml::to_string_pretty(&node_file).map_err(|e| CliError::Runtime(e.to_string()))?,
    )
    .map_err(|e| CliError::Runtime(e.to_string()))?;

    println!(
        "staged epoch {epoch}: {} validator keys",
        rotated.validator_count()
    );
    println!("  staged keystore: {}", staged_path.display());
    println!("  node secrets:    {}", secrets_path.display());
    println!("activate by replacing the keystore file at the epoch boundary");
    Ok(())
}

fn staged_path(keystore_path: &Path) -> PathBuf {
    let mut name = keystore_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "keystore.toml".to_string());
    name.push_str(".staged");
    keystore_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use tcp_crypto::keystore::generate;

    #[test]
    fn test_rotate_stages_files() {
        let dir = tempfile::tempdir().unwrap();
        let keystore_path = dir.path().join("keystore.toml");
        let cluster = generate(1, 3);
        KeystoreFile::from_snapshot(&cluster.snapshot)
            .save(&keystore_path)
            .unwrap();

        let mut config = TcpConfig::default();
        config.keystore.path = keystore_path.to_string_lossy().into_owned();

        let cwd = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let result = run(&config, 2);
        std::env::set_current_dir(cwd).unwrap();
        result.unwrap();

        let staged = KeystoreFile::load(&dir.path().join("keystore.toml.staged"))
            .unwrap()
            .to_snapshot()
            .unwrap();
        assert_eq!(staged.epoch(), 2);
        assert_eq!(staged.previous_epoch(), Some(1));
        // Overlap keys are the old current keys
        assert_eq!(
            staged.verifying_key(1, 1).unwrap(),
            cluster.snapshot.verifying_key(1, 1).unwrap()
        );
    }

    #[test]
    fn test_stale_epoch_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let keystore_path = dir.path().join("keystore.toml");
        let cluster = generate(5, 1);
        KeystoreFile::from_snapshot(&cluster.snapshot)
            .save(&keystore_path)
            .unwrap();

        let mut config = TcpConfig::default();
        config.keystore.path = keystore_path.to_string_lossy().into_owned();

        let err = run(&config, 5).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
