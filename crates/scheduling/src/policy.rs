//! Active-policy loading for the scheduling engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mg_policy::{CompiledPolicy, PolicyCompiler};

use crate::model::SchedulingError;
use crate::store::SchedulingRepo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Draft,
    Staged,
    Active,
}

/// A stored rule-bundle snapshot with its digest and version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub snapshot_id: Uuid,
    pub clinic_id: Uuid,
    pub bundle: serde_json::Value,
    pub sha256: String,
    pub version: i64,
    pub status: SnapshotStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl PolicySnapshot {
    pub fn new(
        clinic_id: Uuid,
        bundle: serde_json::Value,
        sha256: String,
        version: i64,
        actor_id: Option<String>,
    ) -> Self {
        Self {
            snapshot_id: Uuid::new_v4(),
            clinic_id,
            bundle,
            sha256,
            version,
            status: SnapshotStatus::Draft,
            created_at: Utc::now(),
            actor_id,
            metadata: serde_json::Value::Null,
        }
    }
}

/// The compiled policy in force for a clinic, with the snapshot
/// identity appointments are stamped with.
#[derive(Clone)]
pub struct ActivePolicy {
    pub snapshot_id: Uuid,
    pub version: i64,
    pub sha256: String,
    pub policy: Arc<CompiledPolicy>,
    pub tenant_id: Option<String>,
}

pub struct PolicyManager {
    repo: Arc<dyn SchedulingRepo>,
    compiler: Arc<PolicyCompiler>,
}

impl PolicyManager {
    pub fn new(repo: Arc<dyn SchedulingRepo>, compiler: Arc<PolicyCompiler>) -> Self {
        Self { repo, compiler }
    }

    /// Load and compile the active policy for a clinic, if any. The
    /// compile is a digest-cache hit on every call after the first.
    pub async fn active_policy(
        &self,
        clinic_id: Uuid,
    ) -> Result<Option<ActivePolicy>, SchedulingError> {
        let Some(snapshot) = self.repo.active_snapshot(clinic_id).await? else {
            return Ok(None);
        };

        let policy = self.compiler.get_or_compile(&snapshot.bundle).map_err(|e| {
            // An unparsable active bundle is a policy violation surfaced
            // to the caller, never a partial compile.
            SchedulingError::PolicyViolation {
                messages: vec![e.to_string()],
            }
        })?;

        let tenant_id = snapshot
            .bundle
            .get("tenant_id")
            .and_then(|v| v.as_str())
            .map(str::to_owned);

        Ok(Some(ActivePolicy {
            snapshot_id: snapshot.snapshot_id,
            version: snapshot.version,
            sha256: snapshot.sha256,
            policy,
            tenant_id,
        }))
    }
}
