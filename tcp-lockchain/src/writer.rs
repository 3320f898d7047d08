// tcp-lockchain: Single-writer append task behind a bounded channel
// Workers never touch the disk: they hand drafts to this task so request
// latency is independent of storage jitter. A full channel is surfaced as
// backpressure, never a silent drop; an I/O failure poisons the writer and
// the coordinator stops sealing.

use crate::record::{Record, RecordDraft};
use crate::storage::AuditLog;
use crate::ChainError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

struct AppendRequest {
    draft: RecordDraft,
    reply: oneshot::Sender<std::result::Result<Record, ChainError>>,
}

/// Handle used by coordinators to enqueue sealed-record drafts.
#[derive(Clone)]
pub struct AuditWriterHandle {
    tx: mpsc::Sender<AppendRequest>,
    poisoned: Arc<AtomicBool>,
}

impl AuditWriterHandle {
    /// Enqueue without waiting for durability. Returns the receiver for
    /// the sealed record, or `Backpressure` when the channel is full.
    pub fn try_append(
        &self,
        draft: RecordDraft,
    ) -> std::result::Result<oneshot::Receiver<std::result::Result<Record, ChainError>>, ChainError>
    {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(ChainError::WriterClosed);
        }
        let (reply, rx) = oneshot::channel();
        match self.tx.try_send(AppendRequest { draft, reply }) {
            Ok(()) => Ok(rx),
            Err(mpsc::error::TrySendError::Full(_)) => Err(ChainError::Backpressure),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ChainError::WriterClosed),
        }
    }

    /// Enqueue and wait for the record to be durable.
    pub async fn append(&self, draft: RecordDraft) -> std::result::Result<Record, ChainError> {
        let rx = self.try_append(draft)?;
        rx.await.map_err(|_| ChainError::WriterClosed)?
    }

    /// True once an I/O failure has halted the writer.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }
}

/// Spawn the writer task. `capacity` bounds queued appends; sizing it is a
/// latency/shed-load trade the deployment makes in configuration.
pub fn spawn_writer(
    log: Arc<AuditLog>,
    capacity: usize,
) -> (AuditWriterHandle, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<AppendRequest>(capacity.max(1));
    let poisoned = Arc::new(AtomicBool::new(false));
    let poison_flag = poisoned.clone();

    let join = tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let append_log = log.clone();
            let draft = request.draft;
            let result = match tokio::task::spawn_blocking(move || append_log.append(draft)).await {
                Ok(result) => result,
                Err(_) => Err(ChainError::WriterClosed),
            };
            let failed = result.is_err();
            if let Err(e) = &result {
                tracing::error!(error = %e, "audit append failed; writer poisoned");
                poison_flag.store(true, Ordering::Release);
            }
            let _ = request.reply.send(result);
            if failed {
                // Drain and refuse remaining requests, then stop.
                while let Ok(pending) = rx.try_recv() {
                    let _ = pending.reply.send(Err(ChainError::WriterClosed));
                }
                break;
            }
        }
    });

    (AuditWriterHandle { tx, poisoned }, join)
}
