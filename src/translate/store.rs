//! Persistent translation store backed by SQLite.
//! One committed row per (language, key). Human overrides are protected:
//! automatic writes against an overridden key land in `review_queue` instead.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Language, Role, Translation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationRecord {
    pub language: Language,
    pub key: String,
    pub value: String,
    pub role: Role,
    pub is_override: bool,
    pub needs_review: bool,
}

impl TranslationRecord {
    /// Machine-produced record; flagged for review unless really translated.
    pub fn automatic(language: Language, key: impl Into<String>, role: Role, translation: &Translation) -> Self {
        Self {
            language,
            key: key.into(),
            value: translation.text.clone(),
            role,
            is_override: false,
            needs_review: translation.needs_review(),
        }
    }

    /// Human-corrected record, protected from automatic overwrite.
    pub fn manual(language: Language, key: impl Into<String>, role: Role, value: impl Into<String>) -> Self {
        Self {
            language,
            key: key.into(),
            value: value.into(),
            role,
            is_override: true,
            needs_review: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PutOutcome {
    Inserted,
    Updated,
    /// The key is overridden; the automatic value was queued for review.
    QueuedForReview,
}

/// An automatic write that hit an overridden key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewItem {
    pub id: i64,
    pub language: Language,
    pub key: String,
    pub proposed_value: String,
    pub needs_review: bool,
    pub created_at: i64,
}

/// Per-batch tally of [`TranslationStore::put_batch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub inserted: usize,
    pub updated: usize,
    pub queued: usize,
    pub rejected: usize,
}

impl std::ops::AddAssign for BatchSummary {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.queued += other.queued;
        self.rejected += other.rejected;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("empty key")]
    EmptyKey,
    #[error("empty value for {language}/{key}")]
    EmptyValue { language: Language, key: String },
    #[error("key {language}/{key} is held by a long-content row")]
    RoleConflict { language: Language, key: String },
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("store task failed: {0}")]
    Task(String),
}

pub trait TranslationStore: Send + Sync {
    fn get(&self, language: Language, key: &str) -> Result<Option<TranslationRecord>, StoreError>;

    /// All committed key → value pairs of a language.
    fn get_all(&self, language: Language) -> Result<HashMap<String, String>, StoreError>;

    fn put(&self, record: &TranslationRecord) -> Result<PutOutcome, StoreError>;

    /// Apply many records in one transaction. Invalid records are skipped
    /// and counted as rejected.
    fn put_batch(&self, records: &[TranslationRecord]) -> Result<BatchSummary, StoreError>;

    /// Replace every ui-label row of `language` with `entries`, atomically.
    /// A key already held by a long-content row aborts the whole call.
    /// Returns the number of rows inserted.
    fn reinitialize(&self, language: Language, entries: &HashMap<String, String>) -> Result<usize, StoreError>;

    fn pending_reviews(&self, language: Language) -> Result<Vec<ReviewItem>, StoreError>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store database at the given path.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self::init(conn)?;
        info!(path = %db_path.display(), "translation store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS translations (
                language TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL CHECK (value <> ''),
                role TEXT NOT NULL,
                is_override INTEGER NOT NULL DEFAULT 0,
                needs_review INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (language, key)
            );
            CREATE TABLE IF NOT EXISTS review_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                language TEXT NOT NULL,
                key TEXT NOT NULL,
                proposed_value TEXT NOT NULL,
                needs_review INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_review_language
                ON review_queue(language);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl TranslationStore for SqliteStore {
    fn get(&self, language: Language, key: &str) -> Result<Option<TranslationRecord>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT value, role, is_override, needs_review FROM translations
                 WHERE language = ?1 AND key = ?2",
                params![language.code(), key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, bool>(2)?,
                        row.get::<_, bool>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(value, role, is_override, needs_review)| {
            Ok(TranslationRecord {
                language,
                key: key.to_string(),
                value,
                role: Role::parse(&role).ok_or_else(|| StoreError::Corrupt(format!("role {role:?}")))?,
                is_override,
                needs_review,
            })
        })
        .transpose()
    }

    fn get_all(&self, language: Language) -> Result<HashMap<String, String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT key, value FROM translations WHERE language = ?1")?;
        let rows = stmt.query_map(params![language.code()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let map = rows.collect::<Result<HashMap<_, _>, _>>()?;
        Ok(map)
    }

    fn put(&self, record: &TranslationRecord) -> Result<PutOutcome, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let outcome = upsert(&tx, record, now_unix())?;
        tx.commit()?;
        Ok(outcome)
    }

    fn put_batch(&self, records: &[TranslationRecord]) -> Result<BatchSummary, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = now_unix();
        let mut summary = BatchSummary::default();

        for record in records {
            match upsert(&tx, record, now) {
                Ok(PutOutcome::Inserted) => summary.inserted += 1,
                Ok(PutOutcome::Updated) => summary.updated += 1,
                Ok(PutOutcome::QueuedForReview) => summary.queued += 1,
                Err(e @ (StoreError::EmptyKey | StoreError::EmptyValue { .. })) => {
                    warn!(error = %e, "skipping invalid record in batch");
                    summary.rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }

        tx.commit()?;
        Ok(summary)
    }

    fn reinitialize(&self, language: Language, entries: &HashMap<String, String>) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        // Dropping the transaction on any early return rolls it back.
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM translations WHERE language = ?1 AND role = ?2",
            params![language.code(), Role::UiLabel.as_str()],
        )?;

        let now = now_unix();
        {
            let mut held = tx.prepare_cached(
                "SELECT 1 FROM translations WHERE language = ?1 AND key = ?2",
            )?;
            let mut insert = tx.prepare_cached(
                "INSERT INTO translations
                 (language, key, value, role, is_override, needs_review, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 0, 0, ?5)",
            )?;
            for (key, value) in entries {
                if key.trim().is_empty() {
                    return Err(StoreError::EmptyKey);
                }
                if value.is_empty() {
                    return Err(StoreError::EmptyValue {
                        language,
                        key: key.clone(),
                    });
                }
                // Only ui-label rows were deleted; anything left is long content.
                if held.exists(params![language.code(), key])? {
                    warn!(%language, key = %key, "seed key clashes with long-content row");
                    return Err(StoreError::RoleConflict {
                        language,
                        key: key.clone(),
                    });
                }
                insert.execute(params![language.code(), key, value, Role::UiLabel.as_str(), now])?;
            }
        }
        tx.commit()?;

        info!(%language, removed, inserted = entries.len(), "ui dictionary reinitialized");
        Ok(entries.len())
    }

    fn pending_reviews(&self, language: Language) -> Result<Vec<ReviewItem>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, key, proposed_value, needs_review, created_at FROM review_queue
             WHERE language = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![language.code()], |row| {
            Ok(ReviewItem {
                id: row.get(0)?,
                language,
                key: row.get(1)?,
                proposed_value: row.get(2)?,
                needs_review: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        let items = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }
}

/// Insert or update one record inside an open transaction, honouring
/// override protection.
fn upsert(conn: &Connection, record: &TranslationRecord, now: i64) -> Result<PutOutcome, StoreError> {
    if record.key.trim().is_empty() {
        return Err(StoreError::EmptyKey);
    }
    if record.value.is_empty() {
        return Err(StoreError::EmptyValue {
            language: record.language,
            key: record.key.clone(),
        });
    }

    let lang = record.language.code();
    let existing: Option<bool> = conn
        .query_row(
            "SELECT is_override FROM translations WHERE language = ?1 AND key = ?2",
            params![lang, record.key],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(true) if !record.is_override => {
            conn.execute(
                "INSERT INTO review_queue (language, key, proposed_value, needs_review, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![lang, record.key, record.value, record.needs_review, now],
            )?;
            warn!(language = lang, key = %record.key, "automatic write on overridden key queued for review");
            Ok(PutOutcome::QueuedForReview)
        }
        Some(_) => {
            conn.execute(
                "UPDATE translations
                 SET value = ?3, role = ?4, is_override = ?5, needs_review = ?6, updated_at = ?7
                 WHERE language = ?1 AND key = ?2",
                params![
                    lang,
                    record.key,
                    record.value,
                    record.role.as_str(),
                    record.is_override,
                    record.needs_review,
                    now
                ],
            )?;
            debug!(language = lang, key = %record.key, "translation updated");
            Ok(PutOutcome::Updated)
        }
        None => {
            conn.execute(
                "INSERT INTO translations
                 (language, key, value, role, is_override, needs_review, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    lang,
                    record.key,
                    record.value,
                    record.role.as_str(),
                    record.is_override,
                    record.needs_review,
                    now
                ],
            )?;
            debug!(language = lang, key = %record.key, "translation inserted");
            Ok(PutOutcome::Inserted)
        }
    }
}

/// Current time as Unix timestamp (seconds).
fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
