//! External calendar synchronization seam.
//!
//! The calendar service is an external collaborator; confirm reports
//! `calendar_synced` but never fails because of it.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use mg_domain::Result;

#[derive(Debug, Clone, Default)]
pub struct CalendarSyncResult {
    pub synced: bool,
    pub event_ids: Option<serde_json::Value>,
}

#[async_trait::async_trait]
pub trait CalendarSync: Send + Sync {
    async fn sync_appointment(
        &self,
        appointment_id: Uuid,
        doctor_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<CalendarSyncResult>;
}

/// No calendar configured: every sync reports not-synced.
pub struct DisabledCalendarSync;

#[async_trait::async_trait]
impl CalendarSync for DisabledCalendarSync {
    async fn sync_appointment(
        &self,
        appointment_id: Uuid,
        _doctor_id: Uuid,
        _start_time: DateTime<Utc>,
        _end_time: DateTime<Utc>,
    ) -> Result<CalendarSyncResult> {
        tracing::debug!(%appointment_id, "calendar sync disabled");
        Ok(CalendarSyncResult::default())
    }
}
