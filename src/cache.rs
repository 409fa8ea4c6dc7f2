//! # Byte Cache
//! In-memory, process-local store of fetched image bytes keyed by normalized URL.
//!
//! Expiry is lazy: an entry older than the TTL is reported as [`Lookup::Stale`] and kept
//! around so the proxy can still serve it when the upstream is down. A successful refetch
//! replaces it. Concurrent misses for one key share a single upstream call.
//!
//! The in-flight registry only holds weak handles. A fetch whose waiters have all gone
//! away is dropped with them, and the next caller for that key starts a fresh one.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use tokio::time::Instant;
use tracing::debug;

use crate::client::FetchError;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub bytes: Bytes,
    pub content_type: String,
    pub stored_at: Instant,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, bytes: Bytes, content_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            bytes,
            content_type: content_type.into(),
            stored_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.stored_at)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Fresh(CacheEntry),
    Stale(CacheEntry),
    Miss,
}

type FetchTask = BoxFuture<'static, Result<CacheEntry, FetchError>>;

struct Inflight {
    id: u64,
    fetch: WeakShared<FetchTask>,
}

type InflightMap = Arc<Mutex<HashMap<String, Inflight>>>;

pub struct ByteCache {
    ttl: Duration,
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    inflight: InflightMap,
    next_id: AtomicU64,
}

impl ByteCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn lookup(&self, key: &str) -> Lookup {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(e) if e.age() < self.ttl => Lookup::Fresh(e.clone()),
            Some(e) => Lookup::Stale(e.clone()),
            None => Lookup::Miss,
        }
    }

    pub fn store(&self, entry: CacheEntry) {
        store_into(&self.entries, entry);
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `fetch` for `key` unless a fetch for the same key is already running, in which
    /// case wait for that one. A successful result is stored before any waiter sees it.
    ///
    /// The fetch unregisters itself when it completes, whether or not the caller that
    /// started it is still waiting.
    pub async fn fetch_coalesced<F, Fut>(&self, key: &str, fetch: F) -> Result<CacheEntry, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheEntry, FetchError>> + Send + 'static,
    {
        let shared = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            match inflight.get(key).and_then(|f| f.fetch.upgrade()) {
                Some(existing) => {
                    debug!(target: "image_proxy", key, "joining in-flight fetch");
                    existing
                }
                None => {
                    inflight.retain(|_, f| f.fetch.upgrade().is_some());
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let entries = Arc::clone(&self.entries);
                    let registry = Arc::clone(&self.inflight);
                    let owned_key = key.to_string();
                    let fut = fetch();
                    let task: FetchTask = async move {
                        let result = fut.await;
                        if let Ok(entry) = &result {
                            store_into(&entries, entry.clone());
                        }
                        unregister(&registry, &owned_key, id);
                        result
                    }
                    .boxed();
                    let shared = task.shared();
                    if let Some(fetch) = shared.downgrade() {
                        inflight.insert(key.to_string(), Inflight { id, fetch });
                    }
                    shared
                }
            }
        };

        shared.await
    }

    #[cfg(test)]
    fn inflight_len(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Drop `key` from the registry if it still points at fetch `id`.
fn unregister(registry: &Mutex<HashMap<String, Inflight>>, key: &str, id: u64) {
    let mut inflight = registry.lock().unwrap_or_else(PoisonError::into_inner);
    if inflight.get(key).is_some_and(|f| f.id == id) {
        inflight.remove(key);
    }
}

fn store_into(entries: &RwLock<HashMap<String, CacheEntry>>, entry: CacheEntry) {
    entries
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(entry.key.clone(), entry);
}
