//! SQLite-backed call records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_agent::{CallRecordStore, CallSummary, CollaboratorError};
use parley_db::{CallOutcome, DbPool};
use parley_types::Role;

#[derive(Clone)]
pub struct SqliteCallRecords {
    pool: DbPool,
}

impl SqliteCallRecords {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, work: F) -> Result<T, CollaboratorError>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> Result<T, parley_db::CallRecordError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| CollaboratorError::Records(format!("db connection failed: {}", e)))?;
            work(&conn).map_err(|e| CollaboratorError::Records(e.to_string()))
        })
        .await
        .map_err(|e| CollaboratorError::Records(format!("task join error: {}", e)))?
    }
}

#[async_trait]
impl CallRecordStore for SqliteCallRecords {
    async fn save_turn(
        &self,
        call_id: &str,
        speaker: Role,
        text: &str,
        spoken_at: DateTime<Utc>,
    ) -> Result<(), CollaboratorError> {
        let call_id = call_id.to_string();
        let text = text.to_string();
        self.run(move |conn| parley_db::save_turn(conn, &call_id, speaker, &text, spoken_at))
            .await
            .map(|_| ())
    }

    async fn save_summary(
        &self,
        call_id: &str,
        summary: &CallSummary,
    ) -> Result<(), CollaboratorError> {
        let call_id = call_id.to_string();
        let outcome = CallOutcome {
            summary: summary.summary.clone(),
            transfer_requested: summary.transfer_requested,
            transfer_reason: summary.transfer_reason.clone(),
        };
        self.run(move |conn| parley_db::save_summary(conn, &call_id, &outcome))
            .await
    }
}
