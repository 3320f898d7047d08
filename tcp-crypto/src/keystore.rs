// tcp-crypto: Epoch keystore
// Current-epoch public keys per validator ID, issuer keys for
// authenticators, and rotation with overlapping epochs. Read-only from the
// hot path; updates publish a new immutable snapshot.

use ed25519_dalek::{SigningKey, VerifyingKey};
use parking_lot::RwLock;
use pqcrypto_dilithium::dilithium3;
use pqcrypto_traits::sign::{PublicKey as _, SecretKey as _};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use zeroize::Zeroizing;

/// Keystore loading and rotation errors. Misconfiguration here halts the
/// node; there is no degraded verification mode.
#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("bad key material for {0}: {1}")]
    BadKey(String, String),
    #[error("epoch {requested} is not newer than current epoch {current}")]
    StaleEpoch { requested: u64, current: u64 },
}

/// Per-validator verification keys for the current epoch and, during a
/// rotation overlap window, the previous one.
#[derive(Debug, Clone)]
pub struct ValidatorKeys {
    pub current: VerifyingKey,
    pub previous: Option<VerifyingKey>,
}

/// Issuer material validators hold: the symmetric key behind the truncated
/// classical authenticator and, for v3, the issuer's Dilithium public key.
#[derive(Clone)]
pub struct IssuerKeys {
    pub mac_key: [u8; 32],
    pub pq_public: Option<Vec<u8>>,
}

impl std::fmt::Debug for IssuerKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuerKeys")
            .field("pq_public", &self.pq_public.as_ref().map(|p| p.len()))
            .finish_non_exhaustive()
    }
}

/// Immutable keystore snapshot shared across workers.
#[derive(Debug, Clone)]
pub struct KeystoreSnapshot {
    epoch: u64,
    previous_epoch: Option<u64>,
    validators: BTreeMap<u16, ValidatorKeys>,
    issuers: BTreeMap<u16, IssuerKeys>,
}

impl KeystoreSnapshot {
    pub fn new(
        epoch: u64,
        previous_epoch: Option<u64>,
        validators: BTreeMap<u16, ValidatorKeys>,
        issuers: BTreeMap<u16, IssuerKeys>,
    ) -> Self {
        Self {
            epoch,
            previous_epoch,
            validators,
            issuers,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn previous_epoch(&self) -> Option<u64> {
        self.previous_epoch
    }

    pub fn validator_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.validators.keys().copied()
    }

    pub fn validator_count(&self) -> usize {
        self.validators.len()
    }

    pub fn issuers(&self) -> impl Iterator<Item = (&u16, &IssuerKeys)> {
        self.issuers.iter()
    }

    pub fn issuer(&self, id: u16) -> Option<&IssuerKeys> {
        self.issuers.get(&id)
    }

    /// Resolve the verification key for `(validator_id, epoch)`. The
    /// current epoch always resolves; the previous epoch resolves only
    /// inside the announced overlap window.
    pub fn verifying_key(&self, validator_id: u16, epoch: u64) -> Option<&VerifyingKey> {
        let keys = self.validators.get(&validator_id)?;
        if epoch == self.epoch {
            Some(&keys.current)
        } else if Some(epoch) == self.previous_epoch {
            keys.previous.as_ref()
        } else {
            None
        }
    }

    /// Derive the successor snapshot for `new_epoch`: the supplied keys
    /// become current, today's current keys become the overlap set.
    pub fn rotated(
        &self,
        new_epoch: u64,
        new_keys: BTreeMap<u16, VerifyingKey>,
    ) -> std::result::Result<Self, KeystoreError> {
        if new_epoch <= self.epoch {
            return Err(KeystoreError::StaleEpoch {
                requested: new_epoch,
                current: self.epoch,
            });
        }
        let mut validators = BTreeMap::new();
        for (id, current) in new_keys {
            let previous = self.validators.get(&id).map(|k| k.current);
            validators.insert(id, ValidatorKeys { current, previous });
        }
        Ok(Self {
            epoch: new_epoch,
            previous_epoch: Some(self.epoch),
            validators,
            issuers: self.issuers.clone(),
        })
    }
}

/// A validator node's signing identity for one epoch.
pub struct NodeSigningKey {
    pub validator_id: u16,
    pub epoch: u64,
    signing: SigningKey,
}

impl NodeSigningKey {
    pub fn new(validator_id: u16, epoch: u64, signing: SigningKey) -> Self {
        Self {
            validator_id,
            epoch,
            signing,
        }
    }

    #[inline]
    pub fn sign(&self, message: &[u8]) -> ed25519_dalek::Signature {
        use ed25519_dalek::Signer;
        self.signing.sign(message)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }
}

impl std::fmt::Debug for NodeSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSigningKey")
            .field("validator_id", &self.validator_id)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

/// Issuer-side secrets for authoring descriptors. Lives in the descriptor
/// source, not in validators; kept here so authoring tools and tests share
/// one implementation.
pub struct IssuerSigner {
    pub issuer_id: u16,
    pub mac_key: [u8; 32],
    pq_secret: Option<Vec<u8>>,
}

impl IssuerSigner {
    pub fn new(issuer_id: u16, mac_key: [u8; 32], pq_secret: Option<Vec<u8>>) -> Self {
        Self {
            issuer_id,
            mac_key,
            pq_secret,
        }
    }

    pub fn pq_secret(&self) -> Option<dilithium3::SecretKey> {
        self.pq_secret
            .as_deref()
            .and_then(|bytes| dilithium3::SecretKey::from_bytes(bytes).ok())
    }
}

impl Drop for IssuerSigner {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.mac_key.zeroize();
        if let Some(secret) = self.pq_secret.as_mut() {
            secret.zeroize();
        }
    }
}

/// A freshly generated single-issuer cluster: snapshot for verification,
/// node signing keys, and the issuer's authoring secrets.
pub struct GeneratedCluster {
    pub snapshot: KeystoreSnapshot,
    pub nodes: Vec<NodeSigningKey>,
    pub issuer: IssuerSigner,
}

/// Generate a cluster keystore with `validator_count` validators (IDs
/// 1..=count) and one issuer (ID 1) holding both classical and Dilithium
/// material.
pub fn generate(epoch: u64, validator_count: u16) -> GeneratedCluster {
    let mut validators = BTreeMap::new();
    let mut nodes = Vec::with_capacity(validator_count as usize);
    for id in 1..=validator_count {
        let signing = SigningKey::generate(&mut OsRng);
        validators.insert(
            id,
            ValidatorKeys {
                current: signing.verifying_key(),
                previous: None,
            },
        );
        nodes.push(NodeSigningKey::new(id, epoch, signing));
    }

    let mut mac_key = [0u8; 32];
    OsRng.fill_bytes(&mut mac_key);
    let (pq_public, pq_secret) = dilithium3::keypair();

    let mut issuers = BTreeMap::new();
    issuers.insert(
        1u16,
        IssuerKeys {
            mac_key,
            pq_public: Some(pq_public.as_bytes().to_vec()),
        },
    );

    GeneratedCluster {
        snapshot: KeystoreSnapshot::new(epoch, None, validators, issuers),
        nodes,
        issuer: IssuerSigner::new(1, mac_key, Some(pq_secret.as_bytes().to_vec())),
    }
}

/// On-disk keystore format (TOML, hex-encoded key material). Secret keys
/// never appear here; node signing keys live in per-node files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreFile {
    pub epoch: u64,
    pub previous_epoch: Option<u64>,
    pub validators: Vec<ValidatorEntry>,
    pub issuers: Vec<IssuerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorEntry {
    pub id: u16,
    pub public_key: String,
    pub previous_public_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerEntry {
    pub id: u16,
    pub mac_key: String,
    pub pq_public: Option<String>,
}

fn decode_vk(label: &str, hex_str: &str) -> std::result::Result<VerifyingKey, KeystoreError> {
    let bytes = Zeroizing::new(
        hex::decode(hex_str).map_err(|e| KeystoreError::BadKey(label.into(), e.to_string()))?,
    );
    let arr: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| KeystoreError::BadKey(label.into(), "wrong length".into()))?;
    VerifyingKey::from_bytes(&arr).map_err(|e| KeystoreError::BadKey(label.into(), e.to_string()))
}

impl KeystoreFile {
    pub fn load(path: &Path) -> std::result::Result<Self, KeystoreError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| KeystoreError::Parse(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> std::result::Result<(), KeystoreError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| KeystoreError::Parse(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn to_snapshot(&self) -> std::result::Result<KeystoreSnapshot, KeystoreError> {
        let mut validators = BTreeMap::new();
        for entry in &self.validators {
            let label = format!("validator {}", entry.id);
            let current = decode_vk(&label, &entry.public_key)?;
            let previous = entry
                .previous_public_key
                .as_deref()
                .map(|h| decode_vk(&label, h))
                .transpose()?;
            validators.insert(entry.id, ValidatorKeys { current, previous });
        }

        let mut issuers = BTreeMap::new();
        for entry in &self.issuers {
            let label = format!("issuer {}", entry.id);
            let bytes = Zeroizing::new(
                hex::decode(&entry.mac_key)
                    .map_err(|e| KeystoreError::BadKey(label.clone(), e.to_string()))?,
            );
            let mac_key: [u8; 32] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| KeystoreError::BadKey(label.clone(), "wrong length".into()))?;
            let pq_public = entry
                .pq_public
                .as_deref()
                .map(|h| hex::decode(h).map_err(|e| KeystoreError::BadKey(label.clone(), e.to_string())))
                .transpose()?;
            issuers.insert(entry.id, IssuerKeys { mac_key, pq_public });
        }

        Ok(KeystoreSnapshot::new(
            self.epoch,
            self.previous_epoch,
            validators,
            issuers,
        ))
    }

    pub fn from_snapshot(snapshot: &KeystoreSnapshot) -> Self {
        Self {
            epoch: snapshot.epoch,
            previous_epoch: snapshot.previous_epoch,
            validators: snapshot
                .validators
                .iter()
                .map(|(id, keys)| ValidatorEntry {
                    id: *id,
                    public_key: hex::encode(keys.current.as_bytes()),
                    previous_public_key: keys.previous.as_ref().map(|k| hex::encode(k.as_bytes())),
                })
                .collect(),
            issuers: snapshot
                .issuers
                .iter()
                .map(|(id, keys)| IssuerEntry {
                    id: *id,
                    mac_key: hex::encode(keys.mac_key),
                    pq_public: keys.pq_public.as_ref().map(hex::encode),
                })
                .collect(),
        }
    }
}

/// Atomic publication of keystore snapshots, same shape as the policy
/// manager: readers clone the `Arc`, the epoch swap is the only mutation.
pub struct KeystoreManager {
    active: RwLock<Arc<KeystoreSnapshot>>,
}

impl KeystoreManager {
    pub fn new(initial: KeystoreSnapshot) -> Self {
        Self {
            active: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn publish(&self, snapshot: KeystoreSnapshot) {
        let epoch = snapshot.epoch;
        *self.active.write() = Arc::new(snapshot);
        tracing::info!(epoch, "keystore snapshot published");
    }

    #[inline(always)]
    pub fn snapshot(&self) -> Arc<KeystoreSnapshot> {
        self.active.read().clone()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_generate_cluster() {
        let cluster = generate(7, 4);
        assert_eq!(cluster.snapshot.epoch(), 7);
        assert_eq!(cluster.snapshot.validator_count(), 4);
        assert_eq!(cluster.nodes.len(), 4);
        for node in &cluster.nodes {
            let vk = cluster
                .snapshot
                .verifying_key(node.validator_id, 7)
                .unwrap();
            assert_eq!(vk, &node.verifying_key());
        }
    }

    #[test]
    fn test_epoch_overlap_resolution() {
        let cluster = generate(1, 2);
        let new_signing = SigningKey::generate(&mut OsRng);
        let mut new_keys = BTreeMap::new();
        new_keys.insert(1u16, new_signing.verifying_key());
        new_keys.insert(2u16, SigningKey::generate(&mut OsRng).verifying_key());

        let rotated = cluster.snapshot.rotated(2, new_keys).unwrap();
        assert_eq!(rotated.epoch(), 2);
        assert_eq!(rotated.previous_epoch(), Some(1));

        // Current epoch resolves to the new key, overlap epoch to the old.
        assert_eq!(
            rotated.verifying_key(1, 2).unwrap(),
            &new_signing.verifying_key()
        );
        assert_eq!(
            rotated.verifying_key(1, 1).unwrap(),
            &cluster.nodes[0].verifying_key()
        );
        assert!(rotated.verifying_key(1, 0).is_none());
    }

    #[test]
    fn test_rotation_rejects_stale_epoch() {
        let cluster = generate(5, 1);
        let result = cluster.snapshot.rotated(5, BTreeMap::new());
        assert!(matches!(result, Err(KeystoreError::StaleEpoch { .. })));
    }

    #[test]
    fn test_file_round_trip() {
        let cluster = generate(3, 2);
        let file = KeystoreFile::from_snapshot(&cluster.snapshot);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keystore.toml");
        file.save(&path).unwrap();

        let loaded = KeystoreFile::load(&path).unwrap().to_snapshot().unwrap();
        assert_eq!(loaded.epoch(), 3);
        assert_eq!(loaded.validator_count(), 2);
        assert_eq!(
            loaded.verifying_key(1, 3).unwrap(),
            cluster.snapshot.verifying_key(1, 3).unwrap()
        );
        assert_eq!(
            loaded.issuer(1).unwrap().mac_key,
            cluster.snapshot.issuer(1).unwrap().mac_key
        );
    }

    #[test]
    fn test_manager_swap() {
        let cluster = generate(1, 1);
        let manager = KeystoreManager::new(cluster.snapshot.clone());
        let before = manager.snapshot();

        let mut new_keys = BTreeMap::new();
        new_keys.insert(1u16, SigningKey::generate(&mut OsRng).verifying_key());
        manager.publish(cluster.snapshot.rotated(2, new_keys).unwrap());

        assert_eq!(before.epoch(), 1);
        assert_eq!(manager.snapshot().epoch(), 2);
    }
}
