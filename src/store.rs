//! Durable storage for the semantic index.
//!
//! The [`IndexStorage`] trait reports a load as a tagged [`IndexLoad`]
//! instead of an error, so the index builder can match on "present",
//! "absent" and "unreadable" explicitly.
//!
//! [`SqliteIndexStorage`] keeps the whole index in one SQLite file:
//!
//! | Table | Contents |
//! |-------|----------|
//! | `index_meta` | format version, embedding model, dims, document count, text digest, build time |
//! | `documents` | position, id, embedded text, record JSON, vector BLOB (little-endian `f32`) |
//!
//! A load succeeds only when the metadata row exists, every vector has the
//! recorded dimensionality, the document count matches and the text digest
//! recomputes to the stored value.

use anyhow::{bail, Context};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{PipelineError, Result};
use crate::index::SemanticIndex;
use crate::models::{CatalogRecord, IndexedDocument};

/// Artifact layout version written by this build.
pub const FORMAT_VERSION: i64 = 1;

/// Outcome of reading the persisted index.
#[derive(Debug)]
pub enum IndexLoad {
    Loaded(SemanticIndex),
    /// Nothing stored at the location.
    Absent,
    /// Something is stored but cannot be used; the reason is for logging.
    Corrupt(String),
}

/// A location that can hold one persisted [`SemanticIndex`].
#[async_trait]
pub trait IndexStorage: Send + Sync {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    async fn load(&self) -> IndexLoad;

    /// Replace whatever is stored with `index`.
    async fn save(&self, index: &SemanticIndex) -> Result<()>;
}

/// Single-file SQLite index artifact.
pub struct SqliteIndexStorage {
    path: PathBuf,
}

impl SqliteIndexStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn connect(&self, create: bool) -> anyhow::Result<SqlitePool> {
        let mut options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(create);
        if create {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        Ok(pool)
    }

    async fn read(&self) -> anyhow::Result<SemanticIndex> {
        let pool = self.connect(false).await?;
        let result = read_index(&pool).await;
        pool.close().await;
        result
    }

    async fn write(&self, index: &SemanticIndex) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        self.remove_artifact()?;

        let pool = self.connect(true).await?;
        let result = write_index(&pool, index).await;
        pool.close().await;
        result
    }

    /// Delete the database file and its WAL side files, if any.
    fn remove_artifact(&self) -> anyhow::Result<()> {
        for suffix in ["", "-wal", "-shm"] {
            let mut name = self.path.clone().into_os_string();
            name.push(suffix);
            match std::fs::remove_file(&name) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("failed to remove {}", PathBuf::from(&name).display())
                    })
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl IndexStorage for SqliteIndexStorage {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn load(&self) -> IndexLoad {
        match std::fs::metadata(&self.path) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return IndexLoad::Corrupt(format!("{} is not a file", self.describe())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return IndexLoad::Absent,
            Err(e) => return IndexLoad::Corrupt(e.to_string()),
        }

        match self.read().await {
            Ok(index) => IndexLoad::Loaded(index),
            Err(e) => IndexLoad::Corrupt(format!("{:#}", e)),
        }
    }

    async fn save(&self, index: &SemanticIndex) -> Result<()> {
        self.write(index)
            .await
            .map_err(|e| PipelineError::StorageWrite {
                path: self.path.clone(),
                message: format!("{:#}", e),
            })
    }
}

async fn read_index(pool: &SqlitePool) -> anyhow::Result<SemanticIndex> {
    let meta = sqlx::query(
        "SELECT format_version, model, dims, document_count, digest, built_at FROM index_meta",
    )
    .fetch_optional(pool)
    .await?
    .context("index metadata missing")?;

    let version: i64 = meta.try_get("format_version")?;
    if version != FORMAT_VERSION {
        bail!(
            "unsupported index format {} (expected {})",
            version,
            FORMAT_VERSION
        );
    }
    let model: String = meta.try_get("model")?;
    let dims: i64 = meta.try_get("dims")?;
    let document_count: i64 = meta.try_get("document_count")?;
    let digest: String = meta.try_get("digest")?;
    let built_at: i64 = meta.try_get("built_at")?;

    let rows = sqlx::query(
        "SELECT id, text, record_json, vector FROM documents ORDER BY position ASC",
    )
    .fetch_all(pool)
    .await?;

    if rows.len() as i64 != document_count {
        bail!(
            "index holds {} documents, metadata says {}",
            rows.len(),
            document_count
        );
    }

    let mut documents = Vec::with_capacity(rows.len());
    for row in &rows {
        let id: String = row.try_get("id")?;
        let record_json: String = row.try_get("record_json")?;
        let blob: Vec<u8> = row.try_get("vector")?;
        if blob.len() % 4 != 0 {
            bail!("vector for document {} is truncated", id);
        }
        let record: CatalogRecord = serde_json::from_str(&record_json)
            .with_context(|| format!("record for document {} is not valid JSON", id))?;
        documents.push(IndexedDocument {
            id,
            text: row.try_get("text")?,
            record,
            vector: blob_to_vec(&blob),
        });
    }

    let index = SemanticIndex::new(model, dims as usize, built_at, documents)?;
    if index.digest() != digest {
        bail!("document digest mismatch");
    }
    Ok(index)
}

async fn write_index(pool: &SqlitePool, index: &SemanticIndex) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            format_version INTEGER NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            document_count INTEGER NOT NULL,
            digest TEXT NOT NULL,
            built_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            position INTEGER PRIMARY KEY,
            id TEXT NOT NULL,
            text TEXT NOT NULL,
            record_json TEXT NOT NULL,
            vector BLOB NOT NULL
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    for (position, doc) in index.documents().iter().enumerate() {
        let record_json = serde_json::to_string(&doc.record)?;
        sqlx::query(
            "INSERT INTO documents (position, id, text, record_json, vector) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(position as i64)
        .bind(&doc.id)
        .bind(&doc.text)
        .bind(&record_json)
        .bind(vec_to_blob(&doc.vector))
        .execute(&mut *tx)
        .await?;
    }

    // Written last so an interrupted save never looks complete.
    sqlx::query(
        "INSERT INTO index_meta (format_version, model, dims, document_count, digest, built_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(FORMAT_VERSION)
    .bind(index.model())
    .bind(index.dims() as i64)
    .bind(index.len() as i64)
    .bind(index.digest())
    .bind(index.built_at())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
