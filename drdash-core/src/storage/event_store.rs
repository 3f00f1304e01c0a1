use super::Database;
use crate::error::{DashError, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use rusqlite::types::Type;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MIN_TAIL_LIMIT: usize = 1;
pub const MAX_TAIL_LIMIT: usize = 200;

pub type EventId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeAction {
    DbWriteRead,
    MediaUpload,
}

impl ProbeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DbWriteRead => "db_write_read",
            Self::MediaUpload => "media_upload",
        }
    }
}

impl fmt::Display for ProbeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeAction {
    type Err = DashError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "db_write_read" => Ok(Self::DbWriteRead),
            "media_upload" => Ok(Self::MediaUpload),
            other => Err(DashError::Internal(format!("unknown probe action: {}", other))),
        }
    }
}

/// One probe outcome as stored in the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeEvent {
    pub id: EventId,
    pub ts_utc: DateTime<Utc>,
    pub action: ProbeAction,
    pub ok: bool,
    pub backend: String,
    /// `null` when the probe recorded no details.
    pub details: serde_json::Value,
}

/// Append-only log of probe outcomes. Reads are capped to the most recent
/// [`MAX_TAIL_LIMIT`] events.
pub struct EventStore {
    db: Database,
}

impl EventStore {
    pub fn new(db: Database) -> Result<Self> {
        let store = Self { db };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.db.connect()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS drd_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts_utc TEXT NOT NULL,
                action TEXT NOT NULL,
                ok INTEGER NOT NULL,
                backend TEXT NOT NULL,
                details TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_drd_events_ts_utc ON drd_events(ts_utc)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_drd_events_action ON drd_events(action)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_drd_events_ok ON drd_events(ok)",
            [],
        )?;

        Ok(())
    }

    /// Record a probe outcome and return its id.
    pub fn append(
        &self,
        action: ProbeAction,
        ok: bool,
        backend: &str,
        details: Option<&serde_json::Value>,
    ) -> Result<EventId> {
        let conn = self.db.connect()?;
        let details_json = details.map(serde_json::to_string).transpose()?;

        conn.execute(
            "INSERT INTO drd_events (ts_utc, action, ok, backend, details)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Utc::now().to_rfc3339(),
                action.as_str(),
                ok as i64,
                backend,
                details_json,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Most recent events first. `limit` is clamped into
    /// `[MIN_TAIL_LIMIT, MAX_TAIL_LIMIT]`.
    pub fn tail(&self, limit: usize) -> Result<Vec<ProbeEvent>> {
        self.tail_filtered(limit, None, None)
    }

    pub fn tail_filtered(
        &self,
        limit: usize,
        action: Option<ProbeAction>,
        ok: Option<bool>,
    ) -> Result<Vec<ProbeEvent>> {
        let limit = clamp_limit(limit);
        let conn = self.db.connect()?;

        let mut stmt = conn.prepare(
            "SELECT id, ts_utc, action, ok, backend, details
             FROM drd_events
             WHERE (?1 IS NULL OR action = ?1) AND (?2 IS NULL OR ok = ?2)
             ORDER BY id DESC
             LIMIT ?3",
        )?;

        let rows = stmt.query_map(
            params![
                action.map(|action| action.as_str()),
                ok.map(|ok| ok as i64),
                limit as i64
            ],
            |row| {
                let id: i64 = row.get(0)?;
                let ts_utc: String = row.get(1)?;
                let action: String = row.get(2)?;
                let ok: i64 = row.get(3)?;
                let backend: String = row.get(4)?;
                let details: Option<String> = row.get(5)?;

                Ok(ProbeEvent {
                    id,
                    ts_utc: DateTime::parse_from_rfc3339(&ts_utc)
                        .map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e))
                        })?
                        .with_timezone(&Utc),
                    action: action
                        .parse()
                        .map_err(|e: DashError| {
                            rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e))
                        })?,
                    ok: ok != 0,
                    backend,
                    details: decode_details(details),
                })
            },
        )?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }

        Ok(events)
    }
}

pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(MIN_TAIL_LIMIT, MAX_TAIL_LIMIT)
}

fn decode_details(raw: Option<String>) -> serde_json::Value {
    match raw {
        None => serde_json::Value::Null,
        // Rows written by other tools may hold plain text.
        Some(raw) => serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw)),
    }
}
