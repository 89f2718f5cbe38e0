//! SQLite-backed local content backend.
//!
//! # Responsibility
//! - Serve the content fetch/save/rollback-sync contracts from a local file.
//! - Record every persisted body as a numbered revision.
//!
//! # Invariants
//! - Write paths call `Document::validate()` before SQL mutations.
//! - Read paths reject invalid persisted state instead of masking it.
//! - Revision numbers per document start at 1 and increase by one.
//! - The async contract runs rusqlite on the blocking pool, never on a
//!   runtime worker.

use crate::db::{open_db, open_db_in_memory, DbError};
use crate::model::document::{
    Document, DocumentBody, DocumentId, DocumentMetadata, DocumentValidationError,
};
use crate::repo::content_backend::{BackendError, BackendResult, ContentBackend, SaveReceipt};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const DOCUMENT_SELECT_SQL: &str = "SELECT
    id,
    title,
    summary,
    category,
    tags_json,
    banner_url,
    body_json,
    created_at,
    updated_at
FROM documents";

pub type RepoResult<T> = Result<T, RepoError>;

/// Local persistence failure.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Validation(#[from] DocumentValidationError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("document not found: {0}")]
    NotFound(DocumentId),
    #[error("document already exists: {0}")]
    Duplicate(DocumentId),
    #[error("invalid persisted document data: {0}")]
    InvalidData(String),
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<RepoError> for BackendError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(id) => Self::NotFound(id),
            RepoError::Validation(err) => Self::Validation(err.to_string()),
            RepoError::Duplicate(id) => Self::Validation(format!("document already exists: {id}")),
            other => Self::Network(other.to_string()),
        }
    }
}

/// Why a revision row was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionReason {
    Save,
    Rollback,
}

impl RevisionReason {
    fn as_db(self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::Rollback => "rollback",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "save" => Some(Self::Save),
            "rollback" => Some(Self::Rollback),
            _ => None,
        }
    }
}

/// One persisted body revision.
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionRecord {
    pub document_id: DocumentId,
    pub revision: u64,
    pub reason: RevisionReason,
    pub body: DocumentBody,
    pub recorded_at: DateTime<Utc>,
}

/// Content backend over one SQLite connection. Clones share the connection.
#[derive(Clone)]
pub struct SqliteContentBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteContentBackend {
    /// Wraps an already-migrated connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Opens (and migrates) a database file.
    pub fn open(path: impl AsRef<Path>) -> RepoResult<Self> {
        Ok(Self::new(open_db(path)?))
    }

    pub fn open_in_memory() -> RepoResult<Self> {
        Ok(Self::new(open_db_in_memory()?))
    }

    /// Inserts a new document row.
    pub fn insert_document(&self, document: &Document) -> RepoResult<()> {
        document.validate()?;
        let conn = self.conn.lock();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM documents WHERE id = ?1);",
            [document.id.as_str()],
            |row| row.get(0),
        )?;
        if exists {
            return Err(RepoError::Duplicate(document.id.clone()));
        }

        let metadata = &document.metadata;
        conn.execute(
            "INSERT INTO documents (
                id,
                title,
                summary,
                category,
                tags_json,
                banner_url,
                body_json,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                document.id.as_str(),
                metadata.title.as_str(),
                metadata.summary.as_deref(),
                metadata.category.as_deref(),
                to_json(&metadata.tags)?,
                metadata.banner_url.as_deref(),
                to_json(&document.body)?,
                metadata.created_at.timestamp_millis(),
                metadata.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// Reads one document by id.
    pub fn fetch_document(&self, id: &str) -> RepoResult<Option<Document>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("{DOCUMENT_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_document_row(row)?)),
            None => Ok(None),
        }
    }

    /// Replaces the stored body and appends a revision row atomically.
    ///
    /// Returns the new revision number.
    pub fn write_body(
        &self,
        id: &str,
        body: &DocumentBody,
        reason: RevisionReason,
    ) -> RepoResult<u64> {
        let body_json = to_json(body)?;
        let now = Utc::now().timestamp_millis();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE documents
             SET body_json = ?1,
                 updated_at = MAX(updated_at + 1, ?2)
             WHERE id = ?3;",
            params![body_json, now, id],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(id.to_string()));
        }

        let revision: i64 = tx.query_row(
            "SELECT COALESCE(MAX(revision), 0) + 1 FROM document_revisions WHERE document_id = ?1;",
            [id],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO document_revisions (document_id, revision, reason, body_json, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![id, revision, reason.as_db(), body_json, now],
        )?;
        tx.commit()?;

        u64::try_from(revision)
            .map_err(|_| RepoError::InvalidData(format!("negative revision `{revision}`")))
    }

    /// Lists revisions for one document, oldest first.
    pub fn list_revisions(&self, id: &str) -> RepoResult<Vec<RevisionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT document_id, revision, reason, body_json, recorded_at
             FROM document_revisions
             WHERE document_id = ?1
             ORDER BY revision ASC;",
        )?;
        let mut rows = stmt.query([id])?;
        let mut revisions = Vec::new();
        while let Some(row) = rows.next()? {
            revisions.push(parse_revision_row(row)?);
        }
        Ok(revisions)
    }

    /// Returns the newest revision number, or 0 when nothing was written yet.
    pub fn latest_revision(&self, id: &str) -> RepoResult<u64> {
        let conn = self.conn.lock();
        let latest: Option<i64> = conn
            .query_row(
                "SELECT MAX(revision) FROM document_revisions WHERE document_id = ?1;",
                [id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(latest.map_or(0, |value| value.max(0) as u64))
    }

    fn write_logged(
        &self,
        id: &str,
        body: &DocumentBody,
        reason: RevisionReason,
    ) -> BackendResult<u64> {
        match self.write_body(id, body, reason) {
            Ok(revision) => {
                info!(
                    "event=backend_write module=repo status=ok reason={} document_id={id} revision={revision} blocks={}",
                    reason.as_db(),
                    body.block_count()
                );
                Ok(revision)
            }
            Err(err) => {
                error!(
                    "event=backend_write module=repo status=error reason={} document_id={id} error={err}",
                    reason.as_db()
                );
                Err(err.into())
            }
        }
    }
}

#[async_trait]
impl ContentBackend for SqliteContentBackend {
    async fn get_document(&self, id: &str) -> BackendResult<Document> {
        let backend = self.clone();
        let id = id.to_string();
        run_blocking(move || match backend.fetch_document(&id)? {
            Some(document) => Ok(document),
            None => Err(BackendError::NotFound(id)),
        })
        .await
    }

    async fn save_document(&self, id: &str, body: &DocumentBody) -> BackendResult<SaveReceipt> {
        let backend = self.clone();
        let (id, body) = (id.to_string(), body.clone());
        let version =
            run_blocking(move || backend.write_logged(&id, &body, RevisionReason::Save)).await?;
        Ok(SaveReceipt { ok: true, version })
    }

    async fn sync_rollback(&self, id: &str, body: &DocumentBody) -> BackendResult<()> {
        let backend = self.clone();
        let (id, body) = (id.to_string(), body.clone());
        run_blocking(move || backend.write_logged(&id, &body, RevisionReason::Rollback)).await?;
        Ok(())
    }
}

async fn run_blocking<T, F>(task: F) -> BackendResult<T>
where
    F: FnOnce() -> BackendResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task).await.map_err(|err| {
        error!("event=backend_task module=repo status=error error={err}");
        BackendError::Network(format!("database task failed: {err}"))
    })?
}

fn to_json<T: serde::Serialize>(value: &T) -> RepoResult<String> {
    serde_json::to_string(value)
        .map_err(|err| RepoError::InvalidData(format!("failed to encode json: {err}")))
}

fn parse_json<T: serde::de::DeserializeOwned>(raw: &str, column: &str) -> RepoResult<T> {
    serde_json::from_str(raw)
        .map_err(|err| RepoError::InvalidData(format!("invalid json in {column}: {err}")))
}

fn parse_millis(value: i64, column: &str) -> RepoResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| RepoError::InvalidData(format!("invalid timestamp `{value}` in {column}")))
}

fn parse_document_row(row: &Row<'_>) -> RepoResult<Document> {
    let tags_json: String = row.get("tags_json")?;
    let body_json: String = row.get("body_json")?;
    let document = Document {
        id: row.get("id")?,
        body: parse_json(&body_json, "documents.body_json")?,
        metadata: DocumentMetadata {
            title: row.get("title")?,
            summary: row.get("summary")?,
            category: row.get("category")?,
            tags: parse_json(&tags_json, "documents.tags_json")?,
            banner_url: row.get("banner_url")?,
            created_at: parse_millis(row.get("created_at")?, "documents.created_at")?,
            updated_at: parse_millis(row.get("updated_at")?, "documents.updated_at")?,
        },
    };
    document.validate()?;
    Ok(document)
}

fn parse_revision_row(row: &Row<'_>) -> RepoResult<RevisionRecord> {
    let reason_text: String = row.get("reason")?;
    let reason = RevisionReason::parse(&reason_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid revision reason `{reason_text}` in document_revisions.reason"
        ))
    })?;
    let revision: i64 = row.get("revision")?;
    let body_json: String = row.get("body_json")?;
    Ok(RevisionRecord {
        document_id: row.get("document_id")?,
        revision: u64::try_from(revision).map_err(|_| {
            RepoError::InvalidData(format!("negative revision `{revision}`"))
        })?,
        reason,
        body: parse_json(&body_json, "document_revisions.body_json")?,
        recorded_at: parse_millis(row.get("recorded_at")?, "document_revisions.recorded_at")?,
    })
}
