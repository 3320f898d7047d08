// tcp-consensus: Service facade for descriptor sources
// One request/response surface: submit 24 descriptor bytes plus an
// optional external proof, get back the network decision and reason code.

use crate::coordinator::{CancelHandle, Coordinator, NetworkDecision};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tcp_crypto::keystore::KeystoreManager;
use tcp_crypto::ProofStore;
use tcp_kernel::decision::Context;
use tcp_kernel::variant::Variant;
use tcp_telemetry::Telemetry;

/// Operator-facing status summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub epoch: u64,
    pub supported_variants: Vec<Variant>,
    pub timing_ok: bool,
    pub validators: usize,
    pub faulty_validators: Vec<u16>,
}

/// The validation service: coordinator plus the shared stores it feeds.
pub struct TcpService {
    coordinator: Arc<Coordinator>,
    proofs: Arc<dyn ProofStore>,
    keystore: Arc<KeystoreManager>,
    telemetry: Arc<Telemetry>,
    supported_variants: Vec<Variant>,
}

impl TcpService {
    pub fn new(
        coordinator: Arc<Coordinator>,
        proofs: Arc<dyn ProofStore>,
        keystore: Arc<KeystoreManager>,
        telemetry: Arc<Telemetry>,
        supported_variants: Vec<Variant>,
    ) -> Self {
        Self {
            coordinator,
            proofs,
            keystore,
            telemetry,
            supported_variants,
        }
    }

    /// Submit a descriptor for a network decision. An offered proof blob
    /// is stored before resolution so v3 verification can find it.
    pub async fn submit(
        &self,
        descriptor_bytes: &[u8],
        proof: Option<Vec<u8>>,
        context: Context,
    ) -> Result<NetworkDecision> {
        if let Some(blob) = proof {
            let selector = self.proofs.insert(blob);
            tracing::debug!(selector = %hex::encode(selector), "proof stored with submission");
        }
        self.coordinator.resolve(descriptor_bytes, context).await
    }

    /// Submit with a cancellation handle; cancelled requests still seal a
    /// `Defer/Cancelled` audit record.
    pub async fn submit_with_cancel(
        &self,
        descriptor_bytes: &[u8],
        proof: Option<Vec<u8>>,
        context: Context,
        cancel: &CancelHandle,
    ) -> Result<NetworkDecision> {
        if let Some(blob) = proof {
            self.proofs.insert(blob);
        }
        self.coordinator
            .resolve_with_cancel(descriptor_bytes, context, Some(cancel))
            .await
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            epoch: self.keystore.snapshot().epoch(),
            supported_variants: self.supported_variants.clone(),
            timing_ok: self.telemetry.timing_ok(),
            validators: self.coordinator.validator_count(),
            faulty_validators: self.coordinator.byzantine_ledger().faulty_validators(),
        }
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }
}
