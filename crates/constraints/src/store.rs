//! KV-backed constraint block storage.
//!
//! One JSON document per session under `constraints:{session_id}`, with
//! a TTL matching the session TTL. Updates are read-modify-write under
//! the session's turn serialization (one turn per session at a time),
//! accumulate exclusions, replace desired fields, touch `last_updated`,
//! and re-apply the TTL.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use mg_domain::Result;
use mg_store::KvStore;

use crate::block::{ConstraintBlock, TimeWindow};

/// A partial update applied on top of the stored block.
#[derive(Debug, Clone, Default)]
pub struct ConstraintUpdate {
    pub desired_service: Option<String>,
    pub desired_service_id: Option<String>,
    pub desired_doctor: Option<String>,
    pub desired_doctor_id: Option<String>,
    pub exclude_doctors: Vec<String>,
    pub exclude_services: Vec<String>,
    pub time_window: Option<TimeWindow>,
}

impl ConstraintUpdate {
    pub fn is_empty(&self) -> bool {
        self.desired_service.is_none()
            && self.desired_doctor.is_none()
            && self.exclude_doctors.is_empty()
            && self.exclude_services.is_empty()
            && self.time_window.is_none()
    }
}

pub struct ConstraintsStore {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl ConstraintsStore {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    fn key(session_id: &str) -> String {
        format!("constraints:{session_id}")
    }

    /// Fetch the block for a session; absent or unparsable blocks read
    /// as empty rather than failing the turn.
    pub async fn get(&self, session_id: &str) -> Result<ConstraintBlock> {
        let Some(raw) = self.kv.get(&Self::key(session_id)).await? else {
            return Ok(ConstraintBlock::default());
        };
        match serde_json::from_str(&raw) {
            Ok(block) => Ok(block),
            Err(e) => {
                tracing::error!(session_id, error = %e, "unparsable constraint block, resetting");
                Ok(ConstraintBlock::default())
            }
        }
    }

    /// Store a block verbatim, stamping `last_updated`.
    pub async fn set(&self, session_id: &str, mut block: ConstraintBlock) -> Result<()> {
        block.session_id = Some(session_id.to_owned());
        block.last_updated = Some(Utc::now());
        let raw = serde_json::to_string(&block)?;
        self.kv.set_ex(&Self::key(session_id), &raw, self.ttl).await
    }

    /// Apply a partial update: desired fields replace, exclusions
    /// accumulate. Returns the resulting block.
    pub async fn update(
        &self,
        session_id: &str,
        update: ConstraintUpdate,
    ) -> Result<ConstraintBlock> {
        let mut block = self.get(session_id).await?;

        if let Some(service) = update.desired_service {
            block.desired_service = Some(service);
        }
        if let Some(id) = update.desired_service_id {
            block.desired_service_id = Some(id);
        }
        if let Some(doctor) = update.desired_doctor {
            block.desired_doctor = Some(doctor);
        }
        if let Some(id) = update.desired_doctor_id {
            block.desired_doctor_id = Some(id);
        }
        for doctor in update.exclude_doctors {
            block.excluded_doctors.insert(doctor);
        }
        for service in update.exclude_services {
            block.excluded_services.insert(service);
        }
        if let Some(window) = update.time_window {
            block.time_window = Some(window);
        }

        self.set(session_id, block.clone()).await?;
        // set() stamps these; reflect them in the returned copy.
        block.session_id = Some(session_id.to_owned());
        block.last_updated = Some(Utc::now());
        Ok(block)
    }

    /// Drop the block entirely (meta-reset, hard boundary).
    pub async fn clear(&self, session_id: &str) -> Result<()> {
        tracing::info!(session_id, "clearing constraint block");
        self.kv.delete(&Self::key(session_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mg_store::MemoryKv;

    fn store() -> ConstraintsStore {
        ConstraintsStore::new(Arc::new(MemoryKv::new()), Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn missing_block_reads_as_empty() {
        let block = store().get("s1").await.unwrap();
        assert!(block.is_empty());
    }

    #[tokio::test]
    async fn desired_fields_replace() {
        let store = store();
        store
            .update(
                "s1",
                ConstraintUpdate {
                    desired_service: Some("cleaning".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let block = store
            .update(
                "s1",
                ConstraintUpdate {
                    desired_service: Some("veneers".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(block.desired_service.as_deref(), Some("veneers"));
    }

    #[tokio::test]
    async fn exclusions_accumulate_and_never_shrink() {
        let store = store();
        store
            .update(
                "s1",
                ConstraintUpdate {
                    exclude_doctors: vec!["Дан".into()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let block = store
            .update(
                "s1",
                ConstraintUpdate {
                    exclude_doctors: vec!["Марк".into()],
                    desired_doctor: Some("Андреа".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(block.excluded_doctors.len(), 2);
        assert!(block.should_exclude_doctor(Some("Дан"), None));
        assert!(block.should_exclude_doctor(Some("Марк"), None));
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let store = store();
        store
            .update(
                "s1",
                ConstraintUpdate {
                    exclude_services: vec!["пломба".into()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store.clear("s1").await.unwrap();
        assert!(store.get("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_stamps_last_updated() {
        let store = store();
        let block = store
            .update("s1", ConstraintUpdate::default())
            .await
            .unwrap();
        assert!(block.last_updated.is_some());
    }
}
