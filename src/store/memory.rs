//! In-process store.
//!
//! Backs single-instance deployments and tests. Entries expire against the
//! injected [`Clock`], so TTL behavior can be exercised without sleeping.
//! Reads purge the key they touch; every [`SWEEP_EVERY`] writes a full sweep
//! drops expired keys nobody reads again.
//!
//! ## Limitations
//!
//! - No cross-process visibility: every process has its own map
//! - No persistence: all state is lost when the process exits

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::clock::{self, Clock};
use crate::store::{StateStore, StoreError, StoreResult};

/// Writes between two full expiry sweeps.
pub const SWEEP_EVERY: u64 = 256;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Thread-safe TTL map implementing [`StateStore`].
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
    latency_ms: AtomicU64,
    writes: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_clock(clock::system())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Delay every call by `latency`, simulating a slow network.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    /// Change the simulated latency; zero disables it.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Simulate the store becoming unreachable (`false`) or recovering (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn stored_len(&self) -> usize {
        self.entries.len()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Remaining time to live for `key`.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| clock::elapsed_since(e.expires_at, now))
    }

    async fn enter(&self) -> StoreResult<DateTime<Utc>> {
        let latency_ms = self.latency_ms.load(Ordering::SeqCst);
        if latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(latency_ms)).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unavailable".into()));
        }
        Ok(self.clock.now())
    }

    fn note_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_EVERY == 0 {
            let purged = self.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "Swept expired memory store entries");
            }
        }
    }

    fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let now = self.enter().await?;
        if let Some(entry) = self.entries.get(key) {
            if entry.is_live(now) {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Lazy purge of the expired entry
        self.entries.remove_if(key, |_, e| !e.is_live(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<()> {
        let now = self.enter().await?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Self::expiry(now, ttl),
            },
        );
        self.note_write();
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<bool> {
        let now = self.enter().await?;
        let claimed = {
            let mut slot = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Vec::new(),
                expires_at: now,
            });
            if slot.is_live(now) {
                false
            } else {
                *slot = Entry {
                    value,
                    expires_at: Self::expiry(now, ttl),
                };
                true
            }
        };
        self.note_write();
        Ok(claimed)
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        let now = self.enter().await?;
        Ok(match self.entries.remove(key) {
            Some((_, entry)) if entry.is_live(now) => 1,
            _ => 0,
        })
    }

    async fn delete_matching(&self, prefix: &str) -> StoreResult<u64> {
        let now = self.enter().await?;
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();

        let mut deleted = 0;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(&key) {
                if entry.is_live(now) {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.enter().await.map(|_| ())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> (MemoryStore, Arc<ManualClock>) {
        let clock = ManualClock::new();
        (MemoryStore::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let (store, clock) = store();
        store.set("k", b"v".to_vec(), Duration::from_secs(5)).await.unwrap();

        clock.advance(Duration::from_secs(4));
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        clock.advance(Duration::from_secs(1));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_set_refreshes_ttl() {
        let (store, clock) = store();
        store.set("k", b"1".to_vec(), Duration::from_secs(5)).await.unwrap();
        clock.advance(Duration::from_secs(4));
        store.set("k", b"2".to_vec(), Duration::from_secs(5)).await.unwrap();
        clock.advance(Duration::from_secs(4));
        assert_eq!(store.get("k").await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_set_if_absent_respects_live_entries() {
        let (store, clock) = store();
        let ttl = Duration::from_secs(3);
        assert!(store.set_if_absent("lock", b"a".to_vec(), ttl).await.unwrap());
        assert!(!store.set_if_absent("lock", b"b".to_vec(), ttl).await.unwrap());

        clock.advance(ttl);
        assert!(store.set_if_absent("lock", b"b".to_vec(), ttl).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some(b"b".to_vec()));
    }

    #[tokio::test]
    async fn test_delete_matching_prefix() {
        let (store, _) = store();
        let ttl = Duration::from_secs(60);
        store.set("search:a", vec![1], ttl).await.unwrap();
        store.set("search:b", vec![2], ttl).await.unwrap();
        store.set("intent:a", vec![3], ttl).await.unwrap();

        assert_eq!(store.delete_matching("search:").await.unwrap(), 2);
        assert_eq!(store.get("intent:a").await.unwrap(), Some(vec![3]));
        assert_eq!(store.delete("intent:a").await.unwrap(), 1);
        assert_eq!(store.delete("intent:a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_write_traffic_sweeps_keys_never_read_again() {
        let (store, clock) = store();
        for i in 0..SWEEP_EVERY {
            store
                .set(&format!("search:{i}"), vec![1], Duration::from_secs(1))
                .await
                .unwrap();
        }
        assert_eq!(store.stored_len(), SWEEP_EVERY as usize);

        // None of the first batch is read again; later writes reclaim them
        clock.advance(Duration::from_secs(2));
        for i in 0..SWEEP_EVERY {
            store
                .set(&format!("intent:{i}"), vec![2], Duration::from_secs(60))
                .await
                .unwrap();
        }
        assert_eq!(store.stored_len(), SWEEP_EVERY as usize);
        assert_eq!(store.len(), SWEEP_EVERY as usize);
    }

    #[tokio::test]
    async fn test_purge_expired_counts_removed_entries() {
        let (store, clock) = store();
        store.set("short", vec![1], Duration::from_secs(1)).await.unwrap();
        store.set("long", vec![2], Duration::from_secs(10)).await.unwrap();

        clock.advance(Duration::from_secs(1));
        assert_eq!(store.stored_len(), 2);
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.stored_len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let (store, _) = store();
        store.set_available(false);
        assert!(store.ping().await.unwrap_err().is_unavailable());
        assert!(store.get("k").await.is_err());

        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }
}
