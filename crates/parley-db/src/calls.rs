//! Call records and transcripts.

use chrono::{DateTime, SecondsFormat, Utc};
use parley_types::Role;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallRecordError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("corrupt transcript row {id}: {reason}")]
    CorruptRow { id: i64, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// Parameters for announcing a call before its media stream connects.
#[derive(Debug, Clone)]
pub struct NewCall<'a> {
    pub call_id: &'a str,
    pub tenant_id: Option<&'a str>,
    pub direction: CallDirection,
    pub caller_number: Option<&'a str>,
    pub called_number: Option<&'a str>,
}

/// How a call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    pub summary: String,
    pub transfer_requested: bool,
    pub transfer_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub call_id: String,
    pub tenant_id: Option<String>,
    pub direction: String,
    pub caller_number: Option<String>,
    pub called_number: Option<String>,
    pub status: String,
    pub transfer_requested: bool,
    pub transfer_reason: Option<String>,
    pub summary: Option<String>,
    pub started_at: String,
    pub ended_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub speaker: Role,
    pub text: String,
    pub spoken_at: DateTime<Utc>,
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Records a new call. Re-announcing an existing call id is a no-op.
pub fn create_call(conn: &Connection, call: &NewCall<'_>) -> Result<(), CallRecordError> {
    conn.execute(
        "INSERT OR IGNORE INTO calls (call_id, tenant_id, direction, caller_number, called_number)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            call.call_id,
            call.tenant_id,
            call.direction.as_str(),
            call.caller_number,
            call.called_number,
        ],
    )?;
    Ok(())
}

/// Appends one utterance to a call's transcript. Returns the row id.
pub fn save_turn(
    conn: &Connection,
    call_id: &str,
    speaker: Role,
    text: &str,
    spoken_at: DateTime<Utc>,
) -> Result<i64, CallRecordError> {
    conn.execute(
        "INSERT INTO call_transcripts (call_id, speaker, text, spoken_at) VALUES (?1, ?2, ?3, ?4)",
        params![call_id, speaker.as_str(), text, timestamp(spoken_at)],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Closes a call with its summary, creating the row if signaling never did.
pub fn save_summary(
    conn: &Connection,
    call_id: &str,
    outcome: &CallOutcome,
) -> Result<(), CallRecordError> {
    conn.execute(
        "INSERT INTO calls (call_id, status, summary, transfer_requested, transfer_reason, ended_at)
         VALUES (?1, 'completed', ?2, ?3, ?4, ?5)
         ON CONFLICT(call_id) DO UPDATE SET
             status = 'completed',
             summary = excluded.summary,
             transfer_requested = excluded.transfer_requested,
             transfer_reason = excluded.transfer_reason,
             ended_at = excluded.ended_at",
        params![
            call_id,
            outcome.summary,
            outcome.transfer_requested,
            outcome.transfer_reason,
            timestamp(Utc::now()),
        ],
    )?;
    Ok(())
}

pub fn get_call(conn: &Connection, call_id: &str) -> Result<Option<CallRecord>, CallRecordError> {
    let record = conn
        .query_row(
            "SELECT call_id, tenant_id, direction, caller_number, called_number, status,
                    transfer_requested, transfer_reason, summary, started_at, ended_at
             FROM calls WHERE call_id = ?1",
            [call_id],
            |row| {
                Ok(CallRecord {
                    call_id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    direction: row.get(2)?,
                    caller_number: row.get(3)?,
                    called_number: row.get(4)?,
                    status: row.get(5)?,
                    transfer_requested: row.get(6)?,
                    transfer_reason: row.get(7)?,
                    summary: row.get(8)?,
                    started_at: row.get(9)?,
                    ended_at: row.get(10)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

/// Returns a call's transcript in the order it was spoken.
pub fn list_transcript(
    conn: &Connection,
    call_id: &str,
) -> Result<Vec<TranscriptEntry>, CallRecordError> {
    let mut stmt = conn.prepare(
        "SELECT id, speaker, text, spoken_at FROM call_transcripts WHERE call_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map([call_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (id, speaker, text, spoken_at) = row?;
        let speaker = Role::parse(&speaker).ok_or_else(|| CallRecordError::CorruptRow {
            id,
            reason: format!("unknown speaker {}", speaker),
        })?;
        let spoken_at = DateTime::parse_from_rfc3339(&spoken_at)
            .map_err(|e| CallRecordError::CorruptRow {
                id,
                reason: e.to_string(),
            })?
            .with_timezone(&Utc);
        entries.push(TranscriptEntry {
            speaker,
            text,
            spoken_at,
        });
    }
    Ok(entries)
}
