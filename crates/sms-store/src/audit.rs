use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;

use crate::subscriber::{self, ConsentStatus, Subscriber};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    OptIn,
    OptOut,
    Update,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::OptIn => "opt_in",
            AuditAction::OptOut => "opt_out",
            AuditAction::Update => "update",
        }
    }

    pub(crate) fn for_status(status: ConsentStatus) -> Self {
        match status {
            ConsentStatus::OptedIn => AuditAction::OptIn,
            ConsentStatus::OptedOut => AuditAction::OptOut,
        }
    }
}

/// One row of the compliance trail.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub actor: String,
    pub action: String,
    pub subscriber_id: Option<i64>,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub created_at: String,
}

impl AuditEntry {
    /// Human-readable description of what changed.
    pub fn summary(&self) -> String {
        let describe = |v: &Value| {
            let phone = v["phone"].as_str().unwrap_or_default();
            match v["name"].as_str().filter(|n| !n.trim().is_empty()) {
                Some(name) => format!("{phone} ({name})"),
                None => phone.to_string(),
            }
        };

        match (&self.before, &self.after) {
            (None, Some(after)) => format!("Created {}", describe(after)),
            (Some(before), None) => format!("Removed {}", describe(before)),
            (Some(before), Some(after)) => {
                let changes: Vec<String> = ["phone", "name", "status"]
                    .iter()
                    .filter(|k| before[**k] != after[**k])
                    .map(|k| format!("{k}: {} -> {}", show(&before[*k]), show(&after[*k])))
                    .collect();
                if changes.is_empty() {
                    "Updated".to_string()
                } else {
                    changes.join("; ")
                }
            }
            (None, None) => String::new(),
        }
    }
}

fn show(v: &Value) -> String {
    match v {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn append(
    conn: &Connection,
    actor: &str,
    action: AuditAction,
    subscriber_id: i64,
    before: Option<&Subscriber>,
    after: Option<&Subscriber>,
) -> Result<()> {
    let before = before.map(serde_json::to_string).transpose()?;
    let after = after.map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT INTO audit_log (actor, action, subscriber_id, before_json, after_json, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            actor,
            action.as_str(),
            subscriber_id,
            before,
            after,
            subscriber::now()?
        ],
    )?;
    Ok(())
}

pub(crate) fn recent(conn: &Connection, limit: usize) -> Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, actor, action, subscriber_id, before_json, after_json, created_at
         FROM audit_log ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([crate::sql_limit(limit)], |row| {
            let before: Option<String> = row.get(4)?;
            let after: Option<String> = row.get(5)?;
            Ok(AuditEntry {
                id: row.get(0)?,
                actor: row.get(1)?,
                action: row.get(2)?,
                subscriber_id: row.get(3)?,
                // unreadable JSON degrades to "no snapshot" instead of hiding the row
                before: before.and_then(|s| serde_json::from_str(&s).ok()),
                after: after.and_then(|s| serde_json::from_str(&s).ok()),
                created_at: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
