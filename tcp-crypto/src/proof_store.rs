// tcp-crypto: Content-addressed proof store for v3 descriptors
// Keyed by the truncated BLAKE3 of the proof blob; the descriptor's
// authenticator field is the selector. Fetches are bounded by a deadline
// and cached so steady-state verification is comparable to the classical
// path.

use crate::{AuthError, Result};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// Selector width: first 4 bytes of `blake3(proof)`.
pub const SELECTOR_LEN: usize = 4;

/// Compute the content address of a proof blob.
pub fn selector_for(proof: &[u8]) -> [u8; SELECTOR_LEN] {
    let digest = blake3::hash(proof);
    let mut selector = [0u8; SELECTOR_LEN];
    selector.copy_from_slice(&digest.as_bytes()[0..SELECTOR_LEN]);
    selector
}

/// Content-addressed blob store holding full lattice signatures.
pub trait ProofStore: Send + Sync {
    /// Look up a proof by selector. `None` means not present; transport
    /// failures are indistinguishable from absence at this layer.
    fn fetch(&self, selector: [u8; SELECTOR_LEN]) -> Option<Arc<Vec<u8>>>;

    /// Insert a proof, returning its selector.
    fn insert(&self, proof: Vec<u8>) -> [u8; SELECTOR_LEN];
}

/// In-memory proof store, used by descriptor sources and tests.
#[derive(Default)]
pub struct MemoryProofStore {
    blobs: Mutex<std::collections::HashMap<[u8; SELECTOR_LEN], Arc<Vec<u8>>>>,
}

impl MemoryProofStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }
}

impl ProofStore for MemoryProofStore {
    fn fetch(&self, selector: [u8; SELECTOR_LEN]) -> Option<Arc<Vec<u8>>> {
        self.blobs.lock().get(&selector).cloned()
    }

    fn insert(&self, proof: Vec<u8>) -> [u8; SELECTOR_LEN] {
        let selector = selector_for(&proof);
        self.blobs.lock().insert(selector, Arc::new(proof));
        selector
    }
}

/// LRU-cached wrapper over a backing store.
pub struct CachedProofStore<S> {
    inner: S,
    cache: Mutex<LruCache<[u8; SELECTOR_LEN], Arc<Vec<u8>>>>,
}

impl<S: ProofStore> CachedProofStore<S> {
    pub fn new(inner: S, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }
}

impl<S: ProofStore> ProofStore for CachedProofStore<S> {
    fn fetch(&self, selector: [u8; SELECTOR_LEN]) -> Option<Arc<Vec<u8>>> {
        if let Some(hit) = self.cache.lock().get(&selector).cloned() {
            return Some(hit);
        }
        let fetched = self.inner.fetch(selector)?;
        self.cache.lock().put(selector, fetched.clone());
        Some(fetched)
    }

    fn insert(&self, proof: Vec<u8>) -> [u8; SELECTOR_LEN] {
        let selector = self.inner.insert(proof.clone());
        self.cache.lock().put(selector, Arc::new(proof));
        selector
    }
}

enum FetchRequest {
    Fetch {
        selector: [u8; SELECTOR_LEN],
        reply: mpsc::Sender<Option<Arc<Vec<u8>>>>,
    },
    Shutdown,
}

/// Deadline-bounded wrapper for stores whose fetch may stall (remote
/// backends). A fetch that misses the deadline returns `ProofUnavailable`,
/// but the worker lets the underlying fetch complete and caches the
/// result, so a retry within the same deployment hits warm.
pub struct TimedProofStore {
    cache: Arc<Mutex<LruCache<[u8; SELECTOR_LEN], Arc<Vec<u8>>>>>,
    requests: Mutex<mpsc::Sender<FetchRequest>>,
    timeout: Duration,
    inner: Arc<dyn ProofStore>,
}

impl TimedProofStore {
    pub fn new(inner: Arc<dyn ProofStore>, timeout: Duration, cache_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        let cache = Arc::new(Mutex::new(LruCache::new(capacity)));
        let (tx, rx) = mpsc::channel::<FetchRequest>();

        let worker_inner = inner.clone();
        let worker_cache = cache.clone();
        std::thread::Builder::new()
            .name("tcp-proof-fetch".into())
            .spawn(move || {
                while let Ok(request) = rx.recv() {
                    match request {
                        FetchRequest::Fetch { selector, reply } => {
                            let result = worker_inner.fetch(selector);
                            if let Some(blob) = result.as_ref() {
                                worker_cache.lock().put(selector, blob.clone());
                            }
                            // Receiver may have timed out and gone away.
                            let _ = reply.send(result);
                        }
                        FetchRequest::Shutdown => break,
                    }
                }
            })
            .ok();

        Self {
            cache,
            requests: Mutex::new(tx),
            timeout,
            inner,
        }
    }

    /// Fetch with the configured deadline. Cache hits never block.
    pub fn fetch_bounded(&self, selector: [u8; SELECTOR_LEN]) -> Result<Arc<Vec<u8>>> {
        if let Some(hit) = self.cache.lock().get(&selector).cloned() {
            return Ok(hit);
        }

        let (reply_tx, reply_rx) = mpsc::channel();
        self.requests
            .lock()
            .send(FetchRequest::Fetch {
                selector,
                reply: reply_tx,
            })
            .map_err(|_| AuthError::ProofUnavailable)?;

        match reply_rx.recv_timeout(self.timeout) {
            Ok(Some(blob)) => Ok(blob),
            Ok(None) => Err(AuthError::ProofUnavailable),
            Err(_) => {
                tracing::debug!(
                    selector = %hex::encode(selector),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "proof fetch missed deadline"
                );
                Err(AuthError::ProofUnavailable)
            }
        }
    }
}

impl ProofStore for TimedProofStore {
    fn fetch(&self, selector: [u8; SELECTOR_LEN]) -> Option<Arc<Vec<u8>>> {
        self.fetch_bounded(selector).ok()
    }

    fn insert(&self, proof: Vec<u8>) -> [u8; SELECTOR_LEN] {
        let selector = self.inner.insert(proof.clone());
        self.cache.lock().put(selector, Arc::new(proof));
        selector
    }
}

impl Drop for TimedProofStore {
    fn drop(&mut self) {
        let _ = self.requests.lock().send(FetchRequest::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    /// Backing store whose first fetch stalls past any short deadline.
    struct SlowStore {
        inner: MemoryProofStore,
        delay: Duration,
        slow_calls: Mutex<u32>,
    }

    impl SlowStore {
        fn new(delay: Duration) -> Self {
            Self {
                inner: MemoryProofStore::new(),
                delay,
                slow_calls: Mutex::new(1),
            }
        }
    }

    impl ProofStore for SlowStore {
        fn fetch(&self, selector: [u8; SELECTOR_LEN]) -> Option<Arc<Vec<u8>>> {
            let mut remaining = self.slow_calls.lock();
            if *remaining > 0 {
                *remaining -= 1;
                drop(remaining);
                std::thread::sleep(self.delay);
            }
            self.inner.fetch(selector)
        }

        fn insert(&self, proof: Vec<u8>) -> [u8; SELECTOR_LEN] {
            self.inner.insert(proof)
        }
    }

    #[test]
    fn test_selector_is_content_address() {
        let a = selector_for(b"proof-a");
        let b = selector_for(b"proof-b");
        assert_ne!(a, b);
        assert_eq!(a, selector_for(b"proof-a"));
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryProofStore::new();
        let selector = store.insert(b"blob".to_vec());
        assert_eq!(store.fetch(selector).unwrap().as_slice(), b"blob");
        assert!(store.fetch([9, 9, 9, 9]).is_none());
    }

    #[test]
    fn test_cached_store_populates_on_fetch() {
        let backing = MemoryProofStore::new();
        let selector = backing.insert(b"blob".to_vec());
        let cached = CachedProofStore::new(backing, 8);
        assert_eq!(cached.cache_len(), 0);
        assert!(cached.fetch(selector).is_some());
        assert_eq!(cached.cache_len(), 1);
    }

    #[test]
    fn test_timed_store_miss_then_warm_hit() {
        let slow = Arc::new(SlowStore::new(Duration::from_millis(200)));
        let selector = slow.insert(b"lattice-proof".to_vec());
        let timed = TimedProofStore::new(slow, Duration::from_millis(20), 8);

        // Cold: the fetch misses the deadline.
        assert_eq!(
            timed.fetch_bounded(selector),
            Err(AuthError::ProofUnavailable)
        );

        // The worker completes the stalled fetch and caches it.
        std::thread::sleep(Duration::from_millis(400));
        assert_eq!(
            timed.fetch_bounded(selector).unwrap().as_slice(),
            b"lattice-proof"
        );
    }

    #[test]
    fn test_timed_store_absent_proof() {
        let timed = TimedProofStore::new(
            Arc::new(MemoryProofStore::new()),
            Duration::from_millis(100),
            8,
        );
        assert_eq!(
            timed.fetch_bounded([1, 2, 3, 4]),
            Err(AuthError::ProofUnavailable)
        );
    }
}
