use rusqlite::Connection;
use serde::Serialize;
use std::fmt;

use crate::subscriber;
use crate::Result;

/// Outcome of one bulk-send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SendStatus {
    #[serde(rename = "SENT")]
    Sent,
    #[serde(rename = "DRY_RUN")]
    DryRun,
    #[serde(rename = "FAILED")]
    Failed,
}

impl SendStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SendStatus::Sent => "SENT",
            SendStatus::DryRun => "DRY_RUN",
            SendStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SendLogEntry {
    pub id: i64,
    pub phone: String,
    pub name: String,
    pub status: String,
    /// Gateway message id on success, error text on failure.
    pub detail: String,
    pub created_at: String,
}

pub(crate) fn append(
    conn: &Connection,
    phone: &str,
    name: &str,
    status: SendStatus,
    detail: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO send_log (phone, name, status, detail, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![phone, name, status.as_str(), detail, subscriber::now()?],
    )?;
    Ok(())
}

pub(crate) fn recent(conn: &Connection, limit: usize) -> Result<Vec<SendLogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, phone, name, status, detail, created_at
         FROM send_log ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([crate::sql_limit(limit)], |row| {
            Ok(SendLogEntry {
                id: row.get(0)?,
                phone: row.get(1)?,
                name: row.get(2)?,
                status: row.get(3)?,
                detail: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
