//! # SMS Store
//!
//! SQLite-backed opt-in store. One row per phone number, never deleted;
//! every mutation is paired with an `audit_log` row in the same transaction,
//! and bulk-send attempts land in `send_log`.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::info;

mod audit;
mod sends;
mod subscriber;

pub use audit::{AuditAction, AuditEntry};
pub use sends::{SendLogEntry, SendStatus};
pub use subscriber::{ConsentStatus, Counts, Subscriber, UnknownStatus};

/// Actor recorded for changes driven by inbound SMS.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("{0} is already in the store")]
    Duplicate(String),
    #[error("{0} is not in the store")]
    NotFound(String),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("timestamp: {0}")]
    Time(String),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    fn classify(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Constraint(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            _ => StoreError::Sqlite(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Outcome of [`Store::record_consent`].
#[derive(Debug, Clone)]
pub struct ConsentChange {
    pub subscriber: Subscriber,
    /// Row did not exist before this call.
    pub created: bool,
    /// Status differs from what was stored (always true when created).
    pub changed: bool,
}

/// Thread-safe handle to the opt-in database.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open or create the database at `path` in WAL mode.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        // journal_mode returns the resulting mode as a row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        // the CLI and the webhook server may hold the file at the same time
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::run_migrations(&conn)?;
        info!("opt-in store opened at {}", path.display());
        Ok(Self::wrap(conn))
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self::wrap(conn))
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS subscribers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                phone TEXT NOT NULL UNIQUE
                    CHECK (phone GLOB '+[1-9]*'
                        AND length(phone) BETWEEN 9 AND 16
                        AND substr(phone, 2) NOT GLOB '*[^0-9]*'),
                name TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL CHECK (status IN ('opted_in', 'opted_out')),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_subscribers_status
                ON subscribers(status, id);

            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                actor TEXT NOT NULL,
                action TEXT NOT NULL,
                subscriber_id INTEGER,
                before_json TEXT,
                after_json TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS send_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                phone TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL,
                detail TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Look up a subscriber by E.164 phone number.
    pub fn get(&self, phone: &str) -> Result<Option<Subscriber>> {
        let conn = self.lock()?;
        subscriber::by_phone(&conn, phone)
    }

    /// Set `phone` to `status`, creating the row if the number is unseen.
    ///
    /// Idempotent: an unchanged status writes nothing, including `updated_at`.
    pub fn record_consent(
        &self,
        phone: &str,
        status: ConsentStatus,
        actor: &str,
    ) -> Result<ConsentChange> {
        let mut conn = self.lock()?;
        let tx = write_tx(&mut conn)?;
        let before = subscriber::by_phone(&tx, phone)?;

        let change = match before {
            None => {
                let created = insert(&tx, phone, "", status)?;
                audit::append(&tx, actor, AuditAction::Create, created.id, None, Some(&created))?;
                ConsentChange {
                    subscriber: created,
                    created: true,
                    changed: true,
                }
            }
            Some(existing) if existing.status == status => ConsentChange {
                subscriber: existing,
                created: false,
                changed: false,
            },
            Some(existing) => {
                tx.execute(
                    "UPDATE subscribers SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![status, subscriber::now()?, existing.id],
                )
                .map_err(StoreError::classify)?;
                let after = subscriber::by_id(&tx, existing.id)?;
                audit::append(
                    &tx,
                    actor,
                    AuditAction::for_status(status),
                    existing.id,
                    Some(&existing),
                    Some(&after),
                )?;
                ConsentChange {
                    subscriber: after,
                    created: false,
                    changed: true,
                }
            }
        };

        tx.commit()?;
        Ok(change)
    }

    /// Insert a new opted-in subscriber; fails with [`StoreError::Duplicate`] if present.
    pub fn add(&self, phone: &str, name: &str, actor: &str) -> Result<Subscriber> {
        let mut conn = self.lock()?;
        let tx = write_tx(&mut conn)?;
        if subscriber::by_phone(&tx, phone)?.is_some() {
            return Err(StoreError::Duplicate(phone.to_string()));
        }
        let created = insert(&tx, phone, name, ConsentStatus::OptedIn)?;
        audit::append(&tx, actor, AuditAction::Create, created.id, None, Some(&created))?;
        tx.commit()?;
        Ok(created)
    }

    /// Replace the display name of an existing subscriber.
    pub fn set_name(&self, phone: &str, name: &str, actor: &str) -> Result<Subscriber> {
        let mut conn = self.lock()?;
        let tx = write_tx(&mut conn)?;
        let before = subscriber::by_phone(&tx, phone)?
            .ok_or_else(|| StoreError::NotFound(phone.to_string()))?;
        tx.execute(
            "UPDATE subscribers SET name = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![name, subscriber::now()?, before.id],
        )
        .map_err(StoreError::classify)?;
        let after = subscriber::by_id(&tx, before.id)?;
        audit::append(&tx, actor, AuditAction::Update, before.id, Some(&before), Some(&after))?;
        tx.commit()?;
        Ok(after)
    }

    /// Store `name` for an opted-in subscriber that has none yet.
    ///
    /// Returns `None`, writing nothing, if the number is unknown, opted out
    /// or already named.
    pub fn capture_name(&self, phone: &str, name: &str, actor: &str) -> Result<Option<Subscriber>> {
        let mut conn = self.lock()?;
        let tx = write_tx(&mut conn)?;
        let Some(before) = subscriber::by_phone(&tx, phone)? else {
            return Ok(None);
        };
        let updated = tx
            .execute(
                "UPDATE subscribers SET name = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = 'opted_in' AND name = ''",
                rusqlite::params![name, subscriber::now()?, before.id],
            )
            .map_err(StoreError::classify)?;
        if updated == 0 {
            return Ok(None);
        }
        let after = subscriber::by_id(&tx, before.id)?;
        audit::append(&tx, actor, AuditAction::Update, before.id, Some(&before), Some(&after))?;
        tx.commit()?;
        Ok(Some(after))
    }

    /// Every subscriber currently opted in, oldest first.
    pub fn opted_in(&self) -> Result<Vec<Subscriber>> {
        let conn = self.lock()?;
        subscriber::query(
            &conn,
            "WHERE status = 'opted_in' ORDER BY id ASC",
            rusqlite::params![],
        )
    }

    /// All subscribers, most recently updated first, optionally filtered by
    /// a substring of the phone number or name.
    pub fn list(&self, filter: Option<&str>) -> Result<Vec<Subscriber>> {
        let conn = self.lock()?;
        match filter.map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => {
                let like = format!("%{}%", escape_like(q));
                subscriber::query(
                    &conn,
                    "WHERE phone LIKE ?1 ESCAPE '\\' OR name LIKE ?1 ESCAPE '\\'
                     ORDER BY updated_at DESC, id DESC",
                    rusqlite::params![like],
                )
            }
            None => subscriber::query(
                &conn,
                "ORDER BY updated_at DESC, id DESC",
                rusqlite::params![],
            ),
        }
    }

    pub fn counts(&self) -> Result<Counts> {
        let conn = self.lock()?;
        let counts = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'opted_in'), 0),
                    COALESCE(SUM(status = 'opted_out'), 0)
             FROM subscribers",
            [],
            |row| {
                Ok(Counts {
                    total: row.get::<_, i64>(0)? as u64,
                    opted_in: row.get::<_, i64>(1)? as u64,
                    opted_out: row.get::<_, i64>(2)? as u64,
                })
            },
        )?;
        Ok(counts)
    }

    /// Most recent audit entries, newest first.
    pub fn audit_entries(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let conn = self.lock()?;
        audit::recent(&conn, limit)
    }

    /// Append one bulk-send outcome.
    pub fn record_send(
        &self,
        phone: &str,
        name: &str,
        status: SendStatus,
        detail: &str,
    ) -> Result<()> {
        let conn = self.lock()?;
        sends::append(&conn, phone, name, status, detail)
    }

    /// Most recent send attempts, newest first.
    pub fn recent_sends(&self, limit: usize) -> Result<Vec<SendLogEntry>> {
        let conn = self.lock()?;
        sends::recent(&conn, limit)
    }
}

/// Take the write lock up front so a second process waits on `busy_timeout`
/// instead of failing to upgrade a read snapshot.
fn write_tx(conn: &mut Connection) -> Result<Transaction<'_>> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

fn escape_like(q: &str) -> String {
    let mut out = String::with_capacity(q.len());
    for c in q.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// SQLite binds integers as i64.
pub(crate) fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn insert(tx: &Transaction<'_>, phone: &str, name: &str, status: ConsentStatus) -> Result<Subscriber> {
    let now = subscriber::now()?;
    tx.execute(
        "INSERT INTO subscribers (phone, name, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        rusqlite::params![phone, name, status, now],
    )
    .map_err(StoreError::classify)?;
    subscriber::by_id(tx, tx.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHONE: &str = "+15551234567";

    #[test]
    fn opt_in_creates_row() {
        let store = Store::open_in_memory().unwrap();
        let change = store
            .record_consent(PHONE, ConsentStatus::OptedIn, SYSTEM_ACTOR)
            .unwrap();
        assert!(change.created && change.changed);

        let s = store.get(PHONE).unwrap().unwrap();
        assert_eq!(s.status, ConsentStatus::OptedIn);
        assert_eq!(s.name, None);
    }

    #[test]
    fn stop_updates_without_new_row() {
        let store = Store::open_in_memory().unwrap();
        store
            .record_consent(PHONE, ConsentStatus::OptedIn, SYSTEM_ACTOR)
            .unwrap();
        let change = store
            .record_consent(PHONE, ConsentStatus::OptedOut, SYSTEM_ACTOR)
            .unwrap();
        assert!(!change.created && change.changed);

        let counts = store.counts().unwrap();
        assert_eq!(counts.total, 1);
        assert_eq!(counts.opted_out, 1);
        assert_eq!(counts.opted_in, 0);
    }

    #[test]
    fn repeated_opt_in_is_a_no_op() {
        let store = Store::open_in_memory().unwrap();
        let first = store
            .record_consent(PHONE, ConsentStatus::OptedIn, SYSTEM_ACTOR)
            .unwrap();
        let second = store
            .record_consent(PHONE, ConsentStatus::OptedIn, SYSTEM_ACTOR)
            .unwrap();
        assert!(!second.changed);
        assert_eq!(first.subscriber, second.subscriber);
        assert_eq!(store.audit_entries(10).unwrap().len(), 1);
    }

    #[test]
    fn malformed_phone_violates_constraint() {
        let store = Store::open_in_memory().unwrap();
        for bad in ["5551234567", "+1555abc4567", "+0123456789", "+1"] {
            let err = store
                .record_consent(bad, ConsentStatus::OptedIn, SYSTEM_ACTOR)
                .unwrap_err();
            assert!(matches!(err, StoreError::Constraint(_)), "{bad}: {err}");
        }
        assert_eq!(store.counts().unwrap().total, 0);
    }

    #[test]
    fn add_rejects_duplicates() {
        let store = Store::open_in_memory().unwrap();
        store.add(PHONE, "Joey", "dad").unwrap();
        assert!(matches!(
            store.add(PHONE, "Other", "dad"),
            Err(StoreError::Duplicate(_))
        ));
        assert_eq!(store.get(PHONE).unwrap().unwrap().name.as_deref(), Some("Joey"));
    }

    #[test]
    fn set_name_requires_existing_row() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.set_name(PHONE, "Joey", SYSTEM_ACTOR),
            Err(StoreError::NotFound(_))
        ));

        store
            .record_consent(PHONE, ConsentStatus::OptedIn, SYSTEM_ACTOR)
            .unwrap();
        let s = store.set_name(PHONE, "Joey", SYSTEM_ACTOR).unwrap();
        assert_eq!(s.name.as_deref(), Some("Joey"));
    }

    #[test]
    fn opted_in_excludes_opted_out() {
        let store = Store::open_in_memory().unwrap();
        store
            .record_consent("+15550000001", ConsentStatus::OptedIn, SYSTEM_ACTOR)
            .unwrap();
        store
            .record_consent("+15550000002", ConsentStatus::OptedOut, SYSTEM_ACTOR)
            .unwrap();
        store
            .record_consent("+15550000003", ConsentStatus::OptedIn, SYSTEM_ACTOR)
            .unwrap();

        let phones: Vec<String> = store
            .opted_in()
            .unwrap()
            .into_iter()
            .map(|s| s.phone)
            .collect();
        assert_eq!(phones, vec!["+15550000001", "+15550000003"]);
    }

    #[test]
    fn list_filters_on_phone_and_name() {
        let store = Store::open_in_memory().unwrap();
        store.add("+15550000001", "Joey", "dad").unwrap();
        store.add("+15550000002", "Maria", "dad").unwrap();

        assert_eq!(store.list(None).unwrap().len(), 2);
        assert_eq!(store.list(Some("  ")).unwrap().len(), 2);

        let joey = store.list(Some("joe")).unwrap();
        assert_eq!(joey.len(), 1);
        assert_eq!(joey[0].phone, "+15550000001");

        assert_eq!(store.list(Some("0002")).unwrap()[0].name.as_deref(), Some("Maria"));
    }

    fn temp_dir(label: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "sms-store-{label}-{}-{nanos}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn list_treats_wildcards_literally() {
        let store = Store::open_in_memory().unwrap();
        store.add("+15550000001", "Joey", "dad").unwrap();
        store.add("+15550000002", "Mary_Ann", "dad").unwrap();

        assert!(store.list(Some("%")).unwrap().is_empty());
        let named = store.list(Some("y_A")).unwrap();
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].phone, "+15550000002");
    }

    #[test]
    fn huge_limit_is_clamped() {
        let store = Store::open_in_memory().unwrap();
        store.add(PHONE, "Joey", "dad").unwrap();
        store.record_send(PHONE, "Joey", SendStatus::Sent, "SM1").unwrap();

        assert_eq!(store.audit_entries(usize::MAX).unwrap().len(), 1);
        assert_eq!(store.recent_sends(usize::MAX).unwrap().len(), 1);
        assert_eq!(sql_limit(usize::MAX), i64::MAX);
    }

    #[test]
    fn capture_name_only_fills_an_opted_in_blank_name() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.capture_name(PHONE, "Joey", SYSTEM_ACTOR).unwrap().is_none());

        store
            .record_consent(PHONE, ConsentStatus::OptedIn, SYSTEM_ACTOR)
            .unwrap();
        store
            .record_consent(PHONE, ConsentStatus::OptedOut, SYSTEM_ACTOR)
            .unwrap();
        assert!(store.capture_name(PHONE, "Joey", SYSTEM_ACTOR).unwrap().is_none());
        assert_eq!(store.get(PHONE).unwrap().unwrap().name, None);
        assert_eq!(store.audit_entries(10).unwrap().len(), 2);

        store
            .record_consent(PHONE, ConsentStatus::OptedIn, SYSTEM_ACTOR)
            .unwrap();
        let named = store.capture_name(PHONE, "Joey", SYSTEM_ACTOR).unwrap().unwrap();
        assert_eq!(named.name.as_deref(), Some("Joey"));
        assert!(store.capture_name(PHONE, "Maria", SYSTEM_ACTOR).unwrap().is_none());
        assert_eq!(store.get(PHONE).unwrap().unwrap().name.as_deref(), Some("Joey"));
    }

    #[test]
    fn two_handles_on_one_file_write_concurrently() {
        let dir = temp_dir("shared");
        let path = dir.join("contacts.db");
        let first = Store::open(&path).unwrap();
        let second = Store::open(&path).unwrap();

        let writers: Vec<_> = [first, second]
            .into_iter()
            .map(|store| {
                std::thread::spawn(move || {
                    let mut errors = Vec::new();
                    for i in 0..200 {
                        let status = if i % 2 == 0 {
                            ConsentStatus::OptedIn
                        } else {
                            ConsentStatus::OptedOut
                        };
                        if let Err(e) = store.record_consent(PHONE, status, SYSTEM_ACTOR) {
                            errors.push(e.to_string());
                        }
                    }
                    errors
                })
            })
            .collect();

        for writer in writers {
            let errors = writer.join().unwrap();
            assert!(errors.is_empty(), "{} failed writes, first: {}", errors.len(), errors[0]);
        }

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.counts().unwrap().total, 1);
        drop(reopened);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn open_creates_file_backed_store() {
        let dir = temp_dir("reopen");
        let path = dir.join("contacts.db");

        {
            let store = Store::open(&path).unwrap();
            store.add(PHONE, "Joey", "dad").unwrap();
        }
        let reopened = Store::open(&path).unwrap();
        assert!(reopened.get(PHONE).unwrap().is_some());

        drop(reopened);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
