//! Database module for Mailsieve
//!
//! SQLite-backed implementation of the mail store: mailbox owners with their
//! sync watermark, normalized mail records, and the label-name cache.
//! Every label mutation is a single conditional UPDATE so concurrent runs
//! against the same owner never apply the same change twice.

mod query;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

// Connection pooling
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::filters::Predicate;

/// Database error types
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Mail store contract used by the sync and rule engines.
///
/// Implementations must make `insert_mail_if_absent`, `add_label_if_absent`
/// and `remove_label_if_present` atomic and report whether they actually
/// changed anything.
pub trait MailStore: Send + Sync {
    /// Fetch the owner row, creating it on first use
    fn get_or_create_user(&self, email: &str) -> DbResult<User>;

    fn get_user(&self, email: &str) -> DbResult<Option<User>>;

    /// Persist sync progress. The cursor never moves backwards.
    fn save_sync_state(
        &self,
        email: &str,
        is_first_sync_done: bool,
        sync_cursor: Option<DateTime<Utc>>,
    ) -> DbResult<()>;

    /// Insert a mail unless its provider id is already stored.
    /// Returns `true` when a row was inserted.
    fn insert_mail_if_absent(&self, mail: &Mail) -> DbResult<bool>;

    fn get_mail(&self, id: &str) -> DbResult<Option<Mail>>;

    /// Latest provider timestamp stored for an owner
    fn max_internal_date(&self, owner: &str) -> DbResult<Option<DateTime<Utc>>>;

    /// Run a predicate tree against the stored mail
    fn find_mails(&self, predicate: &Predicate) -> DbResult<Vec<Mail>>;

    /// Append `label` unless present. Returns `true` on a genuine append.
    fn add_label_if_absent(&self, mail_id: &str, label: &str) -> DbResult<bool>;

    /// Remove `label` if present. Returns `true` on a genuine removal.
    fn remove_label_if_present(&self, mail_id: &str, label: &str) -> DbResult<bool>;

    /// Mapping for `name`, compared case-insensitively
    fn get_label_mapping(&self, owner: &str, name: &str) -> DbResult<Option<LabelMapping>>;

    /// Store a mapping, keeping an existing one (in any letter case) if
    /// another writer got there first. Returns the mapping that won.
    fn insert_label_mapping(&self, owner: &str, name: &str, label_id: &str) -> DbResult<LabelMapping>;
}

/// Per-connection SQL functions.
///
/// `casefold(text)` lowercases with full Unicode rules; SQLite's own
/// `lower()` only folds ASCII.
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "casefold",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| t.to_lowercase()))
        },
    )
}

/// Database manager for thread-safe SQLite access
#[derive(Clone)]
pub struct Database {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl Database {
    /// Open (or create) a database file and apply the schema
    pub fn new(db_path: PathBuf) -> DbResult<Self> {
        let manager = SqliteConnectionManager::file(&db_path).with_init(|conn| {
            conn.execute_batch(
                r#"
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
            "#,
            )?;
            register_functions(conn)
        });

        let pool = Pool::builder()
            .max_size(8)
            .min_idle(Some(1))
            .connection_timeout(std::time::Duration::from_secs(10))
            .build(manager)?;

        let conn = pool.get()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        "#,
        )?;
        Self::init_schema(&conn)?;
        drop(conn);

        log::debug!("Opened database at {:?}", db_path);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Create an in-memory database (for testing)
    ///
    /// Each SQLite `:memory:` connection is its own database, so the pool is
    /// pinned to a single long-lived connection.
    pub fn in_memory() -> DbResult<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| {
                conn.execute_batch("PRAGMA foreign_keys = ON;")?;
                register_functions(conn)
            });

        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;

        let conn = pool.get()?;
        Self::init_schema(&conn)?;
        drop(conn);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Get a connection from the pool
    #[inline]
    pub fn get_conn(&self) -> DbResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn init_schema(conn: &Connection) -> DbResult<()> {
        let schema = include_str!("schema.sql");
        conn.execute_batch(schema)?;
        Ok(())
    }

    // =========================================================================
    // HELPER METHODS
    // =========================================================================

    /// Execute a SQL statement and return affected rows
    pub fn execute<P>(&self, sql: &str, params: P) -> DbResult<usize>
    where
        P: rusqlite::Params,
    {
        let conn = self.get_conn()?;

        let affected = conn.execute(sql, params)?;
        Ok(affected)
    }

    /// Query database and map results
    pub fn query<T, P, F>(&self, sql: &str, params: P, f: F) -> DbResult<Vec<T>>
    where
        P: rusqlite::Params,
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, f)?;

        rows.collect::<rusqlite::Result<Vec<T>>>()
            .map_err(DbError::from)
    }
}

// =============================================================================
// MAIL STORE
// =============================================================================

const MAIL_COLUMNS: &str = r#"
    id, thread_id, owner, subject, body, labels,
    sent_at, received_at, internal_date,
    sent_to, sent_cc, sent_bcc, all_recipients, from_email
"#;

const USER_COLUMNS: &str = r#"
    email, name, created_at, mail_count, last_synced, sync_cursor, is_first_sync_done
"#;

impl MailStore for Database {
    fn get_or_create_user(&self, email: &str) -> DbResult<User> {
        let conn = self.get_conn()?;
        let name = email.split('@').next().unwrap_or(email).to_string();

        let created = conn.execute(
            "INSERT INTO users (email, name, created_at) VALUES (?1, ?2, ?3) ON CONFLICT(email) DO NOTHING",
            params![email, name, Utc::now().timestamp_millis()],
        )?;
        if created > 0 {
            log::info!("Created mailbox owner {}", email);
        }

        let sql = format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS);
        let user = conn.query_row(&sql, [email], User::from_row)?;
        Ok(user)
    }

    fn get_user(&self, email: &str) -> DbResult<Option<User>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS);
        let user = conn.query_row(&sql, [email], User::from_row).optional()?;
        Ok(user)
    }

    fn save_sync_state(
        &self,
        email: &str,
        is_first_sync_done: bool,
        sync_cursor: Option<DateTime<Utc>>,
    ) -> DbResult<()> {
        let conn = self.get_conn()?;
        let cursor = sync_cursor.map(|c| c.timestamp_millis());

        let affected = conn.execute(
            r#"
            UPDATE users SET
                is_first_sync_done = ?2,
                sync_cursor = CASE
                    WHEN sync_cursor IS NULL OR ?3 > sync_cursor THEN COALESCE(?3, sync_cursor)
                    ELSE sync_cursor
                END
            WHERE email = ?1
            "#,
            params![email, is_first_sync_done, cursor],
        )?;

        if affected == 0 {
            return Err(DbError::NotFound(format!("user {}", email)));
        }
        Ok(())
    }

    fn insert_mail_if_absent(&self, mail: &Mail) -> DbResult<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            r#"
            INSERT INTO mails (
                id, thread_id, owner, subject, body, labels,
                sent_at, received_at, internal_date,
                sent_to, sent_cc, sent_bcc, all_recipients, from_email
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(id) DO NOTHING
            "#,
            params![
                mail.id,
                mail.thread_id,
                mail.owner,
                mail.subject,
                mail.body,
                to_json(&mail.labels)?,
                mail.sent_at.map(|t| t.timestamp_millis()),
                mail.received_at.map(|t| t.timestamp_millis()),
                mail.internal_date.timestamp_millis(),
                to_json(&mail.sent_to)?,
                to_json(&mail.sent_cc)?,
                to_json(&mail.sent_bcc)?,
                mail.all_recipients.as_ref().map(to_json).transpose()?,
                mail.from_email,
            ],
        )?;

        // The counter moves only with a genuine insert, inside the same transaction.
        if inserted > 0 {
            let last_synced = mail.received_at.or(mail.sent_at).map(|t| t.timestamp_millis());
            tx.execute(
                r#"
                UPDATE users
                SET mail_count = mail_count + 1,
                    last_synced = COALESCE(?2, last_synced)
                WHERE email = ?1
                "#,
                params![mail.owner, last_synced],
            )?;
        }

        tx.commit()?;
        Ok(inserted > 0)
    }

    fn get_mail(&self, id: &str) -> DbResult<Option<Mail>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM mails WHERE id = ?1", MAIL_COLUMNS);
        let mail = conn.query_row(&sql, [id], Mail::from_row).optional()?;
        Ok(mail)
    }

    fn max_internal_date(&self, owner: &str) -> DbResult<Option<DateTime<Utc>>> {
        let conn = self.get_conn()?;
        let millis: Option<i64> = conn.query_row(
            "SELECT MAX(internal_date) FROM mails WHERE owner = ?1",
            [owner],
            |row| row.get(0),
        )?;
        Ok(millis.and_then(from_millis))
    }

    fn find_mails(&self, predicate: &Predicate) -> DbResult<Vec<Mail>> {
        let (clause, values) = query::compile(predicate);
        let sql = format!(
            "SELECT {} FROM mails WHERE {} ORDER BY internal_date DESC",
            MAIL_COLUMNS, clause
        );
        log::debug!("Executing query: {} with {} params", clause, values.len());

        self.query(&sql, rusqlite::params_from_iter(values), Mail::from_row)
    }

    fn add_label_if_absent(&self, mail_id: &str, label: &str) -> DbResult<bool> {
        let affected = self.execute(
            r#"
            UPDATE mails
            SET labels = json_insert(labels, '$[#]', ?2)
            WHERE id = ?1
              AND NOT EXISTS (SELECT 1 FROM json_each(mails.labels) WHERE value = ?2)
            "#,
            params![mail_id, label],
        )?;
        Ok(affected > 0)
    }

    fn remove_label_if_present(&self, mail_id: &str, label: &str) -> DbResult<bool> {
        let affected = self.execute(
            r#"
            UPDATE mails
            SET labels = (
                SELECT json_group_array(value) FROM json_each(mails.labels) WHERE value <> ?2
            )
            WHERE id = ?1
              AND EXISTS (SELECT 1 FROM json_each(mails.labels) WHERE value = ?2)
            "#,
            params![mail_id, label],
        )?;
        Ok(affected > 0)
    }

    fn get_label_mapping(&self, owner: &str, name: &str) -> DbResult<Option<LabelMapping>> {
        let conn = self.get_conn()?;
        let mapping = conn
            .query_row(
                "SELECT owner, name, label_id, created_at FROM label_mappings WHERE owner = ?1 AND name = ?2",
                params![owner, name],
                LabelMapping::from_row,
            )
            .optional()?;
        Ok(mapping)
    }

    fn insert_label_mapping(&self, owner: &str, name: &str, label_id: &str) -> DbResult<LabelMapping> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO label_mappings (owner, name, label_id, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(owner, name) DO NOTHING
            "#,
            params![owner, name, label_id, Utc::now().timestamp_millis()],
        )?;

        let winner = conn.query_row(
            "SELECT owner, name, label_id, created_at FROM label_mappings WHERE owner = ?1 AND name = ?2",
            params![owner, name],
            LabelMapping::from_row,
        )?;
        Ok(winner)
    }
}

// =============================================================================
// RECORDS
// =============================================================================

/// Canonical normalized mail record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    pub id: String,
    pub thread_id: String,
    pub owner: String,
    pub subject: String,
    pub body: String,
    pub labels: Vec<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub internal_date: DateTime<Utc>,
    pub sent_to: Vec<String>,
    pub sent_cc: Vec<String>,
    pub sent_bcc: Vec<String>,
    pub all_recipients: Option<Vec<String>>,
    pub from_email: Option<String>,
}

impl Mail {
    /// Create Mail from a row selected with `MAIL_COLUMNS`
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Mail {
            id: row.get(0)?,
            thread_id: row.get(1)?,
            owner: row.get(2)?,
            subject: row.get(3)?,
            body: row.get(4)?,
            labels: json_column(row, 5)?,
            sent_at: millis_column(row, 6)?,
            received_at: millis_column(row, 7)?,
            internal_date: millis_column(row, 8)?.unwrap_or_default(),
            sent_to: json_column(row, 9)?,
            sent_cc: json_column(row, 10)?,
            sent_bcc: json_column(row, 11)?,
            all_recipients: optional_json_column(row, 12)?,
            from_email: row.get(13)?,
        })
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

}

/// Mailbox owner and its sync state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub mail_count: i64,
    /// Timestamp of the most recently ingested mail
    pub last_synced: Option<DateTime<Utc>>,
    pub sync_cursor: Option<DateTime<Utc>>,
    pub is_first_sync_done: bool,
}

impl User {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(User {
            email: row.get(0)?,
            name: row.get(1)?,
            created_at: millis_column(row, 2)?.unwrap_or_default(),
            mail_count: row.get(3)?,
            last_synced: millis_column(row, 4)?,
            sync_cursor: millis_column(row, 5)?,
            is_first_sync_done: row.get(6)?,
        })
    }
}

/// Symbolic label name resolved to a provider label id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelMapping {
    pub owner: String,
    pub name: String,
    pub label_id: String,
    pub created_at: DateTime<Utc>,
}

impl LabelMapping {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(LabelMapping {
            owner: row.get(0)?,
            name: row.get(1)?,
            label_id: row.get(2)?,
            created_at: millis_column(row, 3)?.unwrap_or_default(),
        })
    }
}

// =============================================================================
// COLUMN CONVERSIONS
// =============================================================================

pub(crate) fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

fn to_json(values: &Vec<String>) -> DbResult<String> {
    serde_json::to_string(values).map_err(|e| DbError::Serialization(e.to_string()))
}

fn conversion_error(idx: usize, e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn json_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn optional_json_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<Vec<String>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| serde_json::from_str(&r).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn millis_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let millis: Option<i64> = row.get(idx)?;
    Ok(millis.and_then(from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn received_mail(id: &str, owner: &str) -> Mail {
        let when = Utc.with_ymd_and_hms(2024, 10, 2, 17, 15, 0).unwrap();
        Mail {
            id: id.to_string(),
            thread_id: format!("t-{}", id),
            owner: owner.to_string(),
            subject: "Quarterly report".to_string(),
            body: "Numbers attached".to_string(),
            labels: vec!["INBOX".to_string(), "UNREAD".to_string()],
            sent_at: None,
            received_at: Some(when),
            internal_date: when,
            sent_to: vec![],
            sent_cc: vec![],
            sent_bcc: vec![],
            all_recipients: None,
            from_email: Some("boss@example.com".to_string()),
        }
    }

    #[test]
    fn test_user_created_once() {
        let db = Database::in_memory().unwrap();

        let user = db.get_or_create_user("alice@example.com").unwrap();
        assert_eq!(user.name.as_deref(), Some("alice"));
        assert_eq!(user.mail_count, 0);
        assert!(!user.is_first_sync_done);
        assert!(user.sync_cursor.is_none());

        let again = db.get_or_create_user("alice@example.com").unwrap();
        assert_eq!(again.created_at, user.created_at);
    }

    #[test]
    fn test_insert_mail_is_idempotent() {
        let db = Database::in_memory().unwrap();
        db.get_or_create_user("alice@example.com").unwrap();
        let mail = received_mail("m1", "alice@example.com");

        assert!(db.insert_mail_if_absent(&mail).unwrap());
        assert!(!db.insert_mail_if_absent(&mail).unwrap());

        let user = db.get_user("alice@example.com").unwrap().unwrap();
        assert_eq!(user.mail_count, 1);
        assert_eq!(user.last_synced, mail.received_at);

        let stored = db.get_mail("m1").unwrap().unwrap();
        assert_eq!(stored, mail);
    }

    #[test]
    fn test_conditional_label_mutations() {
        let db = Database::in_memory().unwrap();
        db.get_or_create_user("alice@example.com").unwrap();
        db.insert_mail_if_absent(&received_mail("m1", "alice@example.com")).unwrap();

        assert!(db.add_label_if_absent("m1", "Reports").unwrap());
        assert!(!db.add_label_if_absent("m1", "Reports").unwrap());
        assert!(db.remove_label_if_present("m1", "UNREAD").unwrap());
        assert!(!db.remove_label_if_present("m1", "UNREAD").unwrap());

        let stored = db.get_mail("m1").unwrap().unwrap();
        assert_eq!(stored.labels, vec!["INBOX".to_string(), "Reports".to_string()]);
    }

    #[test]
    fn test_label_mutation_on_unknown_mail() {
        let db = Database::in_memory().unwrap();
        assert!(!db.add_label_if_absent("missing", "Reports").unwrap());
        assert!(!db.remove_label_if_present("missing", "Reports").unwrap());
    }

    #[test]
    fn test_sync_cursor_never_moves_back() {
        let db = Database::in_memory().unwrap();
        db.get_or_create_user("alice@example.com").unwrap();
        let later = Utc.with_ymd_and_hms(2024, 10, 2, 0, 0, 0).unwrap();

        db.save_sync_state("alice@example.com", true, Some(later)).unwrap();
        db.save_sync_state("alice@example.com", true, Some(later - Duration::days(3))).unwrap();
        db.save_sync_state("alice@example.com", true, None).unwrap();

        let user = db.get_user("alice@example.com").unwrap().unwrap();
        assert_eq!(user.sync_cursor, Some(later));
        assert!(user.is_first_sync_done);
    }

    #[test]
    fn test_save_sync_state_unknown_user() {
        let db = Database::in_memory().unwrap();
        let result = db.save_sync_state("nobody@example.com", true, None);
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_max_internal_date() {
        let db = Database::in_memory().unwrap();
        db.get_or_create_user("alice@example.com").unwrap();
        assert!(db.max_internal_date("alice@example.com").unwrap().is_none());

        let older = received_mail("m1", "alice@example.com");
        let mut newer = received_mail("m2", "alice@example.com");
        newer.internal_date = older.internal_date + Duration::hours(5);
        newer.received_at = Some(newer.internal_date);
        db.insert_mail_if_absent(&older).unwrap();
        db.insert_mail_if_absent(&newer).unwrap();

        assert_eq!(
            db.max_internal_date("alice@example.com").unwrap(),
            Some(newer.internal_date)
        );
    }

    #[test]
    fn test_label_mapping_existing_wins() {
        let db = Database::in_memory().unwrap();
        let first = db.insert_label_mapping("alice@example.com", "Reports", "Label_1").unwrap();
        assert_eq!(first.label_id, "Label_1");
        let second = db.insert_label_mapping("alice@example.com", "Reports", "Label_2").unwrap();
        assert_eq!(second.label_id, "Label_1");
        let mapping = db.get_label_mapping("alice@example.com", "Reports").unwrap().unwrap();
        assert_eq!(mapping.label_id, "Label_1");
        assert!(db.get_label_mapping("bob@example.com", "Reports").unwrap().is_none());
    }

    #[test]
    fn test_label_mapping_ignores_case() {
        let db = Database::in_memory().unwrap();
        db.insert_label_mapping("alice@example.com", "Receipts", "Label_1").unwrap();

        let other_case = db.insert_label_mapping("alice@example.com", "RECEIPTS", "Label_2").unwrap();
        assert_eq!(other_case.name, "Receipts");
        assert_eq!(other_case.label_id, "Label_1");

        let found = db.get_label_mapping("alice@example.com", "receipts").unwrap().unwrap();
        assert_eq!(found.name, "Receipts");
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailsieve.db");

        {
            let db = Database::new(path.clone()).unwrap();
            db.get_or_create_user("alice@example.com").unwrap();
            db.insert_mail_if_absent(&received_mail("m1", "alice@example.com")).unwrap();
        }

        let db = Database::new(path).unwrap();
        assert!(db.get_mail("m1").unwrap().is_some());
        assert_eq!(db.get_user("alice@example.com").unwrap().unwrap().mail_count, 1);
    }
}
