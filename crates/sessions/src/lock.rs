//! Token-based distributed lock for the session-boundary critical
//! section.
//!
//! Acquire is `SET key token NX PX ttl` with jittered backoff; release
//! is an atomic compare-and-delete, so a lock that expired and was
//! re-acquired by someone else is never deleted by the old holder.

use std::sync::Arc;
use std::time::Duration;

use mg_domain::{Error, Result};
use mg_store::KvStore;

pub struct BoundaryLock {
    kv: Arc<dyn KvStore>,
    ttl_ms: u64,
    max_retries: u32,
}

/// Proof of lock ownership. Must be given back to [`BoundaryLock::release`].
#[must_use = "a held boundary lock must be released"]
#[derive(Debug)]
pub struct LockGuard {
    key: String,
    token: String,
}

impl BoundaryLock {
    pub fn new(kv: Arc<dyn KvStore>, ttl_ms: u64, max_retries: u32) -> Self {
        Self {
            kv,
            ttl_ms,
            max_retries,
        }
    }

    fn key(clinic_id: &str, phone: &str) -> String {
        format!("boundary_lock:{clinic_id}:{phone}")
    }

    /// Acquire the lock for (clinic, phone), retrying with growing
    /// jittered sleeps. Fails with [`Error::LockBusy`] when every retry
    /// found the lock held.
    pub async fn acquire(&self, clinic_id: &str, phone: &str) -> Result<LockGuard> {
        let key = Self::key(clinic_id, phone);
        let token = uuid::Uuid::new_v4().to_string();

        if self.kv.set_nx_px(&key, &token, self.ttl_ms).await? {
            tracing::debug!(%key, "acquired boundary lock");
            return Ok(LockGuard { key, token });
        }

        for attempt in 0..self.max_retries {
            tokio::time::sleep(Duration::from_millis(50 * (attempt as u64 + 1))).await;
            if self.kv.set_nx_px(&key, &token, self.ttl_ms).await? {
                tracing::debug!(%key, attempt, "acquired boundary lock after retry");
                return Ok(LockGuard { key, token });
            }
        }

        Err(Error::LockBusy(format!(
            "boundary lock busy for {}:{} after {} retries",
            clinic_id,
            mask_phone(phone),
            self.max_retries
        )))
    }

    /// Release a held lock. A no-op when the TTL already expired and
    /// another holder owns the key.
    pub async fn release(&self, guard: LockGuard) -> Result<()> {
        let deleted = self
            .kv
            .compare_and_delete(&guard.key, &guard.token)
            .await?;
        if !deleted {
            tracing::warn!(key = %guard.key, "boundary lock expired before release");
        }
        Ok(())
    }
}

fn mask_phone(phone: &str) -> String {
    let head: String = phone.chars().take(3).collect();
    format!("{head}***")
}
