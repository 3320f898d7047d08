// tcp-consensus: Multi-validator consensus over capability descriptors
// A validator runs codec -> integrity -> policy and emits a signed vote;
// the coordinator collects votes to a deadline and applies the >=75%
// honest-quorum rule. Up to floor(0.25*N) validators may be malicious or
// crashed without affecting the network decision.

pub mod byzantine;
pub mod coordinator;
pub mod service;
pub mod validator;
pub mod vote;

pub use byzantine::{ByzantineLedger, FaultKind, FaultReport};
pub use coordinator::{CancelHandle, Coordinator, NetworkDecision, QuorumConfig};
pub use service::{TcpService, ServiceStatus};
pub use validator::{LocalVoteProvider, ValidatorConfig, ValidatorNode, VoteProvider};
pub use vote::SignedVote;

use thiserror::Error;

/// Consensus-level failures. Individual bad votes are not errors (they are
/// simply not counted); these cover infrastructure the coordinator cannot
/// proceed without.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("audit chain error: {0}")]
    Chain(#[from] tcp_lockchain::ChainError),

    #[error("no validators configured")]
    EmptyValidatorSet,

    #[error("quorum threshold {0}% below the 75% floor")]
    ThresholdTooLow(u8),
}

pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Fingerprint of a raw descriptor submission: BLAKE3 over the bytes as
/// received. Votes and sealed records reference descriptors by this value.
pub fn fingerprint(descriptor_bytes: &[u8]) -> [u8; 32] {
    *blake3::hash(descriptor_bytes).as_bytes()
}
