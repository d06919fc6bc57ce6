use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{Connection, OptionalExtension, Params, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::{Result, StoreError};

/// Whether a number may receive bulk messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    OptedIn,
    OptedOut,
}

impl ConsentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsentStatus::OptedIn => "opted_in",
            ConsentStatus::OptedOut => "opted_out",
        }
    }
}

impl fmt::Display for ConsentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown consent status {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for ConsentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "opted_in" => Ok(ConsentStatus::OptedIn),
            "opted_out" => Ok(ConsentStatus::OptedOut),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl ToSql for ConsentStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ConsentStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: UnknownStatus| FromSqlError::Other(Box::new(e)))
    }
}

/// One consenting (or formerly consenting) phone number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: i64,
    /// E.164, unique.
    pub phone: String,
    pub name: Option<String>,
    pub status: ConsentStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Subscriber {
    pub fn is_opted_in(&self) -> bool {
        self.status == ConsentStatus::OptedIn
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let name: String = row.get(2)?;
        Ok(Self {
            id: row.get(0)?,
            phone: row.get(1)?,
            name: Some(name).filter(|n| !n.is_empty()),
            status: row.get(3)?,
            created_at: parse_ts(row, 4)?,
            updated_at: parse_ts(row, 5)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Counts {
    pub total: u64,
    pub opted_in: u64,
    pub opted_out: u64,
}

const COLUMNS: &str = "SELECT id, phone, name, status, created_at, updated_at FROM subscribers";

/// Current UTC time, whole seconds, RFC 3339.
pub(crate) fn now() -> Result<String> {
    let now = OffsetDateTime::now_utc();
    let now = now
        .replace_nanosecond(0)
        .map_err(|e| StoreError::Time(e.to_string()))?;
    now.format(&Rfc3339)
        .map_err(|e| StoreError::Time(e.to_string()))
}

pub(crate) fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let raw: String = row.get(idx)?;
    OffsetDateTime::parse(&raw, &Rfc3339)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn by_phone(conn: &Connection, phone: &str) -> Result<Option<Subscriber>> {
    let found = conn
        .query_row(
            &format!("{COLUMNS} WHERE phone = ?1"),
            [phone],
            Subscriber::from_row,
        )
        .optional()?;
    Ok(found)
}

pub(crate) fn by_id(conn: &Connection, id: i64) -> Result<Subscriber> {
    Ok(conn.query_row(&format!("{COLUMNS} WHERE id = ?1"), [id], Subscriber::from_row)?)
}

/// Run `SELECT <columns> FROM subscribers <suffix>`.
pub(crate) fn query<P: Params>(conn: &Connection, suffix: &str, params: P) -> Result<Vec<Subscriber>> {
    let mut stmt = conn.prepare(&format!("{COLUMNS} {suffix}"))?;
    let rows = stmt
        .query_map(params, Subscriber::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
