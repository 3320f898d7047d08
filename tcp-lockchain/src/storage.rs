// tcp-lockchain: sled-backed persistence with crash recovery
// Keys "rec:{seq:020}" so lexicographic order is sequence order. On open
// the chain is rescanned; trailing entries that fail the hash check are
// discarded unless that would drop a record already acknowledged to a
// caller.

use crate::record::{Record, RecordDraft, GENESIS_HASH};
use crate::{ChainError, Result};
use sled::Db;
use std::path::Path;
use std::sync::Mutex;

const LAST_ACK_KEY: &[u8] = b"meta:last_ack";

fn record_key(seq: u64) -> String {
    format!("rec:{seq:020}")
}

struct ChainHead {
    next_seq: u64,
    last_hash: [u8; 32],
}

/// The audit log. A single writer appends; any number of readers may
/// iterate or verify concurrently.
pub struct AuditLog {
    db: Db,
    head: Mutex<ChainHead>,
}

impl AuditLog {
    /// Open (or create) the log and recover the chain head.
    ///
    /// Scans forward verifying each link. The first broken link marks the
    /// truncation point: everything after it is treated as a partial
    /// trailing write and deleted. Refuses to open when truncation would
    /// remove a record at or below the durable last-ack marker.
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)?;
        let last_ack = read_last_ack(&db)?;

        let mut next_seq = 0u64;
        let mut last_hash = GENESIS_HASH;
        let mut truncate_from: Option<u64> = None;

        for entry in db.scan_prefix(b"rec:") {
            let (_, value) = entry?;
            let record: Record = match bincode::deserialize(&value) {
                Ok(r) => r,
                Err(_) => {
                    truncate_from = Some(next_seq);
                    break;
                }
            };
            let intact = record.seq == next_seq
                && record.chain_prev == last_hash
                && record.verify_self();
            if !intact {
                truncate_from = Some(next_seq);
                break;
            }
            last_hash = record.chain_self;
            next_seq += 1;
        }

        if let Some(from) = truncate_from {
            if let Some(acked) = last_ack {
                if from <= acked {
                    return Err(ChainError::AckedRecordLost { seq: from });
                }
            }
            let mut removed = 0u64;
            for entry in db.scan_prefix(b"rec:") {
                let (key, value) = entry?;
                let seq = bincode::deserialize::<Record>(&value)
                    .map(|r| r.seq)
                    .unwrap_or(from);
                if seq >= from {
                    db.remove(key)?;
                    removed += 1;
                }
            }
            db.flush()?;
            tracing::warn!(
                truncated_from = from,
                removed,
                "audit log truncated at last intact chain hash"
            );
        }

        tracing::info!(records = next_seq, "audit log opened");
        Ok(Self {
            db,
            head: Mutex::new(ChainHead {
                next_seq,
                last_hash,
            }),
        })
    }

    /// Seal a draft onto the chain and persist it durably.
    pub fn append(&self, draft: RecordDraft) -> Result<Record> {
        let mut head = self.head.lock().map_err(|_| ChainError::WriterClosed)?;
        let record = Record::seal(draft, head.next_seq, head.last_hash);

        let value = bincode::serialize(&record)?;
        self.db.insert(record_key(record.seq).as_bytes(), value)?;
        self.db.flush()?;

        head.last_hash = record.chain_self;
        head.next_seq += 1;
        Ok(record)
    }

    /// Durably mark `seq` as acknowledged to a caller. Recovery will never
    /// truncate at or below this point.
    pub fn mark_acked(&self, seq: u64) -> Result<()> {
        self.db.insert(LAST_ACK_KEY, &seq.to_be_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    pub fn last_acked(&self) -> Result<Option<u64>> {
        read_last_ack(&self.db)
    }

    pub fn len(&self) -> u64 {
        self.head.lock().map(|h| h.next_seq).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stream records in sequence order.
    pub fn iter(&self) -> impl Iterator<Item = Result<Record>> + '_ {
        self.db.scan_prefix(b"rec:").map(|entry| {
            let (_, value) = entry?;
            Ok(bincode::deserialize(&value)?)
        })
    }

    /// Recompute every link from genesis; idempotent.
    pub fn verify_chain(&self) -> Result<u64> {
        let mut expected_prev = GENESIS_HASH;
        let mut expected_seq = 0u64;
        for record in self.iter() {
            let record = record?;
            let intact = record.seq == expected_seq
                && record.chain_prev == expected_prev
                && record.verify_self();
            if !intact {
                return Err(ChainError::Broken { seq: expected_seq });
            }
            expected_prev = record.chain_self;
            expected_seq += 1;
        }
        Ok(expected_seq)
    }

    /// Fetch one record by sequence number.
    pub fn get(&self, seq: u64) -> Result<Option<Record>> {
        match self.db.get(record_key(seq).as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Overwrite a stored record in place, bypassing the chain. Test-only
    /// hook for exercising recovery.
    #[cfg(test)]
    pub fn raw_put(&self, seq: u64, bytes: &[u8]) -> Result<()> {
        self.db.insert(record_key(seq).as_bytes(), bytes)?;
        self.db.flush()?;
        Ok(())
    }
}

fn read_last_ack(db: &Db) -> Result<Option<u64>> {
    match db.get(LAST_ACK_KEY)? {
        Some(value) => {
            let arr: [u8; 8] = value
                .as_ref()
                .try_into()
                .map_err(|_| ChainError::Codec("last-ack marker malformed".into()))?;
            Ok(Some(u64::from_be_bytes(arr)))
        }
        None => Ok(None),
    }
}
