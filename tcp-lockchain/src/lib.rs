// tcp-lockchain: Append-only, hash-chained audit log
// Every sealed consensus record links to its predecessor; any prefix of
// the log can be independently re-derived from canonical inputs.

// CRITICAL: Enforce proper error handling - no unwrap/expect in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod record;
pub mod storage;
pub mod writer;

pub use record::{vote_payload_bytes, Record, RecordDraft, VoteRecord, GENESIS_HASH};
pub use storage::AuditLog;
pub use writer::{spawn_writer, AuditWriterHandle};

use thiserror::Error;

/// Audit log failures. I/O is fatal for the coordinator (it refuses to
/// seal new records); chain breakage at startup triggers safe truncation
/// or refusal to start.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("storage error: {0}")]
    Io(#[from] sled::Error),

    #[error("record encoding error: {0}")]
    Codec(String),

    #[error("chain hash mismatch at sequence {seq}")]
    Broken { seq: u64 },

    #[error("truncation would drop acknowledged record {seq}")]
    AckedRecordLost { seq: u64 },

    #[error("audit writer channel full")]
    Backpressure,

    #[error("audit writer has shut down")]
    WriterClosed,
}

impl From<bincode::Error> for ChainError {
    fn from(e: bincode::Error) -> Self {
        ChainError::Codec(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;
