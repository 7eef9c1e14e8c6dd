//! Persistent draft store: drafts and their revisions in SQLite.
//!
//! Writes are serialized behind one connection mutex; reads may come from
//! any thread. Revisions are append-only: storing a revision never rewrites
//! the original draft row.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use scrive_events::Draft;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }
}

/// Hard cap on page size, mirrored by the HTTP layer's validation.
pub const MAX_PAGE_LIMIT: usize = 1000;

/// A draft as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftRecord {
    pub draft_id: String,
    pub timestamp: f64,
    pub start_text: String,
    pub end_text: Option<String>,
    pub full_text: String,
    pub classname: String,
    pub directory_path: Option<String>,
    pub parent_draft_id: Option<String>,
    pub created_at: String,
}

impl From<&Draft> for DraftRecord {
    fn from(draft: &Draft) -> Self {
        Self {
            draft_id: draft.draft_id.to_string(),
            timestamp: draft.timestamp,
            start_text: draft.start_mark.text.clone(),
            end_text: draft.end_mark.as_ref().map(|m| m.text.clone()),
            full_text: draft.full_text.clone(),
            classname: "Draft".to_string(),
            directory_path: None,
            parent_draft_id: draft.parent_draft_id.map(|id| id.to_string()),
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// A stored alternative transcription of a draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub revision_id: String,
    pub original_draft_id: String,
    pub revised_draft_json: String,
    pub model: Option<String>,
    pub source: Option<String>,
    pub source_uri: Option<String>,
    pub created_at: String,
}

/// Caller-supplied revision metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RevisionMetadata {
    pub model: Option<String>,
    pub source: Option<String>,
    pub source_uri: Option<String>,
    pub timestamp: Option<f64>,
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS drafts (
                draft_id TEXT PRIMARY KEY,
                timestamp REAL NOT NULL,
                start_text TEXT NOT NULL,
                end_text TEXT,
                full_text TEXT NOT NULL,
                classname TEXT NOT NULL,
                directory_path TEXT,
                parent_draft_id TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS draft_revisions (
                revision_id TEXT PRIMARY KEY,
                original_draft_id TEXT NOT NULL,
                revised_draft_json TEXT NOT NULL,
                model TEXT,
                source TEXT,
                source_uri TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (original_draft_id) REFERENCES drafts(draft_id)
            );

            CREATE INDEX IF NOT EXISTS idx_drafts_timestamp ON drafts(timestamp);
            CREATE INDEX IF NOT EXISTS idx_drafts_parent ON drafts(parent_draft_id);
            CREATE INDEX IF NOT EXISTS idx_revisions_original ON draft_revisions(original_draft_id);
            "#,
        )?;
        Ok(())
    }

    /// Upsert by `draft_id`.
    pub fn put(&self, record: &DraftRecord) -> Result<()> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO drafts
             (draft_id, timestamp, start_text, end_text, full_text, classname, directory_path, parent_draft_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            (
                &record.draft_id,
                record.timestamp,
                &record.start_text,
                &record.end_text,
                &record.full_text,
                &record.classname,
                &record.directory_path,
                &record.parent_draft_id,
                &record.created_at,
            ),
        )?;
        Ok(())
    }

    pub fn get(&self, draft_id: &str) -> Result<Option<DraftRecord>> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        Self::get_with_conn(&conn, draft_id)
    }

    fn get_with_conn(conn: &Connection, draft_id: &str) -> Result<Option<DraftRecord>> {
        let record = conn
            .query_row(
                "SELECT draft_id, timestamp, start_text, end_text, full_text, classname,
                        directory_path, parent_draft_id, created_at
                 FROM drafts WHERE draft_id = ?1",
                [draft_id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// A draft with (optionally) its parent and children.
    pub fn get_with_family(
        &self,
        draft_id: &str,
        include_parent: bool,
        include_children: bool,
    ) -> Result<Option<(DraftRecord, Option<DraftRecord>, Vec<DraftRecord>)>> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        let Some(draft) = Self::get_with_conn(&conn, draft_id)? else {
            return Ok(None);
        };

        let parent = if include_parent {
            match &draft.parent_draft_id {
                Some(parent_id) => Self::get_with_conn(&conn, parent_id)?,
                None => None,
            }
        } else {
            None
        };

        let mut children = Vec::new();
        if include_children {
            let mut stmt = conn.prepare(
                "SELECT draft_id, timestamp, start_text, end_text, full_text, classname,
                        directory_path, parent_draft_id, created_at
                 FROM drafts WHERE parent_draft_id = ?1 ORDER BY timestamp ASC",
            )?;
            let rows = stmt.query_map([draft_id], Self::row_to_record)?;
            for row in rows {
                children.push(row?);
            }
        }

        Ok(Some((draft, parent, children)))
    }

    /// A page of drafts plus the total count.
    pub fn list_paginated(
        &self,
        limit: usize,
        offset: usize,
        order: SortOrder,
    ) -> Result<(Vec<DraftRecord>, usize)> {
        self.list_page(None, limit, offset, order)
    }

    /// Like [`list_paginated`](Self::list_paginated) but restricted to
    /// drafts with `timestamp >= since`.
    pub fn list_since(
        &self,
        since: f64,
        limit: usize,
        offset: usize,
        order: SortOrder,
    ) -> Result<(Vec<DraftRecord>, usize)> {
        self.list_page(Some(since), limit, offset, order)
    }

    fn list_page(
        &self,
        since: Option<f64>,
        limit: usize,
        offset: usize,
        order: SortOrder,
    ) -> Result<(Vec<DraftRecord>, usize)> {
        let limit = limit.min(MAX_PAGE_LIMIT);
        let conn = self.conn.lock().expect("database mutex poisoned");

        let total: usize = match since {
            Some(since) => conn.query_row(
                "SELECT COUNT(*) FROM drafts WHERE timestamp >= ?1",
                [since],
                |row| row.get::<_, i64>(0),
            )? as usize,
            None => {
                conn.query_row("SELECT COUNT(*) FROM drafts", [], |row| row.get::<_, i64>(0))?
                    as usize
            }
        };

        let sql = format!(
            "SELECT draft_id, timestamp, start_text, end_text, full_text, classname,
                    directory_path, parent_draft_id, created_at
             FROM drafts {} ORDER BY timestamp {} LIMIT ?1 OFFSET ?2",
            if since.is_some() {
                "WHERE timestamp >= ?3"
            } else {
                ""
            },
            order.as_sql(),
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut records = Vec::new();
        match since {
            Some(since) => {
                let rows = stmt.query_map(
                    (limit as i64, offset as i64, since),
                    Self::row_to_record,
                )?;
                for row in rows {
                    records.push(row?);
                }
            }
            None => {
                let rows = stmt.query_map((limit as i64, offset as i64), Self::row_to_record)?;
                for row in rows {
                    records.push(row?);
                }
            }
        }
        Ok((records, total))
    }

    /// Store a revision of an existing draft. The original row is left
    /// untouched; a missing original is `NotFound`.
    pub fn put_revision(
        &self,
        original_draft_id: &str,
        revised_draft_json: &str,
        metadata: &RevisionMetadata,
    ) -> Result<String> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        if Self::get_with_conn(&conn, original_draft_id)?.is_none() {
            return Err(StorageError::NotFound(format!(
                "draft {original_draft_id}"
            )));
        }

        let revision_id = Uuid::new_v4().to_string();
        let created_at = match metadata.timestamp {
            Some(ts) => chrono::DateTime::from_timestamp(
                ts as i64,
                ((ts.fract()) * 1e9) as u32,
            )
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| Utc::now().to_rfc3339()),
            None => Utc::now().to_rfc3339(),
        };
        conn.execute(
            "INSERT INTO draft_revisions
             (revision_id, original_draft_id, revised_draft_json, model, source, source_uri, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            (
                &revision_id,
                original_draft_id,
                revised_draft_json,
                &metadata.model,
                &metadata.source,
                &metadata.source_uri,
                &created_at,
            ),
        )?;
        tracing::debug!(%revision_id, original_draft_id, "revision stored");
        Ok(revision_id)
    }

    /// All revisions of a draft, oldest first.
    pub fn list_revisions(&self, original_draft_id: &str) -> Result<Vec<RevisionRecord>> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT revision_id, original_draft_id, revised_draft_json, model, source, source_uri, created_at
             FROM draft_revisions WHERE original_draft_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([original_draft_id], |row| {
            Ok(RevisionRecord {
                revision_id: row.get(0)?,
                original_draft_id: row.get(1)?,
                revised_draft_json: row.get(2)?,
                model: row.get(3)?,
                source: row.get(4)?,
                source_uri: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;
        let mut revisions = Vec::new();
        for row in rows {
            revisions.push(row?);
        }
        Ok(revisions)
    }

    pub fn draft_count(&self) -> Result<usize> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM drafts", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<DraftRecord> {
        Ok(DraftRecord {
            draft_id: row.get(0)?,
            timestamp: row.get(1)?,
            start_text: row.get(2)?,
            end_text: row.get(3)?,
            full_text: row.get(4)?,
            classname: row.get(5)?,
            directory_path: row.get(6)?,
            parent_draft_id: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}
