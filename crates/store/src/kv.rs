use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use mg_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of an atomic windowed-counter reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowReserve {
    /// Whether the reservation fit under the cap.
    pub allowed: bool,
    /// Occurrences counted in the window after the attempt.
    pub count: u64,
}

/// Narrow KV contract. Every compound operation must be atomic with
/// respect to all other operations on the same key.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set `key` with a TTL.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Set `key` only if absent, with a millisecond TTL.
    /// Returns `true` when the key was set (lock acquired).
    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete `key` only if its current value equals `token`.
    /// Returns `true` when the key was deleted.
    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool>;

    /// Atomic windowed counter: prune members older than `window`,
    /// refuse when the cardinality is already at `max_n`, otherwise add
    /// `member` stamped now and extend the key's TTL to twice the window.
    async fn window_reserve(
        &self,
        key: &str,
        window: Duration,
        max_n: u64,
        member: &str,
    ) -> Result<WindowReserve>;

    /// Remove `member` from the window if still present.
    async fn window_release(&self, key: &str, member: &str) -> Result<()>;

    /// Drop everything. Test hook.
    async fn flush(&self) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Window {
    /// (stamped_at, member), kept unsorted; pruning scans.
    members: Vec<(DateTime<Utc>, String)>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    windows: HashMap<String, Window>,
}

/// In-process [`KvStore`]. A single mutex over the whole map gives the
/// same atomicity the Redis scripts give: no interleaving within one
/// compound operation.
#[derive(Default)]
pub struct MemoryKv {
    inner: Mutex<Inner>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn live<'a>(inner: &'a mut Inner, key: &str, now: DateTime<Utc>) -> Option<&'a Entry> {
        if let Some(entry) = inner.entries.get(key) {
            if entry.expires_at.is_some_and(|at| at <= now) {
                inner.entries.remove(key);
                return None;
            }
        }
        inner.entries.get(key)
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        Ok(Self::live(&mut inner, key, now).map(|e| e.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.entries.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at: Some(Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default()),
            },
        );
        Ok(())
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool> {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        if Self::live(&mut inner, key, now).is_some() {
            return Ok(false);
        }
        inner.entries.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at: Some(now + chrono::Duration::milliseconds(ttl_ms as i64)),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.lock().entries.remove(key);
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let matches = Self::live(&mut inner, key, now).is_some_and(|e| e.value == token);
        if matches {
            inner.entries.remove(key);
        }
        Ok(matches)
    }

    async fn window_reserve(
        &self,
        key: &str,
        window: Duration,
        max_n: u64,
        member: &str,
    ) -> Result<WindowReserve> {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let window_chrono = chrono::Duration::from_std(window).unwrap_or_default();

        let entry = inner.windows.entry(key.to_owned()).or_insert(Window {
            members: Vec::new(),
            expires_at: None,
        });

        if entry.expires_at.is_some_and(|at| at <= now) {
            entry.members.clear();
        }

        // Prune members that fell out of the rolling window.
        let cutoff = now - window_chrono;
        entry.members.retain(|(at, _)| *at >= cutoff);

        let count = entry.members.len() as u64;
        if count >= max_n {
            return Ok(WindowReserve {
                allowed: false,
                count,
            });
        }

        entry.members.push((now, member.to_owned()));
        entry.expires_at = Some(now + window_chrono * 2);
        Ok(WindowReserve {
            allowed: true,
            count: count + 1,
        })
    }

    async fn window_release(&self, key: &str, member: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.windows.get_mut(key) {
            entry.members.retain(|(_, m)| m != member);
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.windows.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_is_exclusive() {
        let kv = MemoryKv::new();
        assert!(kv.set_nx_px("lock", "a", 5_000).await.unwrap());
        assert!(!kv.set_nx_px("lock", "b", 5_000).await.unwrap());
    }

    #[tokio::test]
    async fn compare_and_delete_only_matches_owner() {
        let kv = MemoryKv::new();
        kv.set_nx_px("lock", "token-a", 5_000).await.unwrap();

        assert!(!kv.compare_and_delete("lock", "token-b").await.unwrap());
        assert!(kv.get("lock").await.unwrap().is_some());

        assert!(kv.compare_and_delete("lock", "token-a").await.unwrap());
        assert!(kv.get("lock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_keys_read_as_absent() {
        let kv = MemoryKv::new();
        kv.set_nx_px("lock", "t", 0).await.unwrap();
        assert!(kv.get("lock").await.unwrap().is_none());
        // And the slot is free for the next acquirer.
        assert!(kv.set_nx_px("lock", "u", 5_000).await.unwrap());
    }

    #[tokio::test]
    async fn window_reserve_enforces_cap() {
        let kv = MemoryKv::new();
        let window = Duration::from_secs(60);

        for i in 0..3 {
            let r = kv
                .window_reserve("limit", window, 3, &format!("m{i}"))
                .await
                .unwrap();
            assert!(r.allowed);
            assert_eq!(r.count, i + 1);
        }

        let denied = kv.window_reserve("limit", window, 3, "m3").await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.count, 3);
    }

    #[tokio::test]
    async fn window_release_frees_a_slot() {
        let kv = MemoryKv::new();
        let window = Duration::from_secs(60);

        kv.window_reserve("limit", window, 1, "m0").await.unwrap();
        assert!(!kv.window_reserve("limit", window, 1, "m1").await.unwrap().allowed);

        kv.window_release("limit", "m0").await.unwrap();
        assert!(kv.window_reserve("limit", window, 1, "m1").await.unwrap().allowed);
    }
}
