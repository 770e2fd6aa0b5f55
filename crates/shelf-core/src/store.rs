//! File store: record operations over a single markdown document.
//!
//! Every operation reads the whole file and every write replaces it. The
//! store does not serialize concurrent writers; callers hold the vault's
//! exclusive scope around read-modify-write sequences.

use crate::fs::{FileSystem, FsError};
use crate::mapper::map_document;
use crate::markdown::{self, ParseError};
use crate::record::{Category, Priority, Record, RecordId, Status};
use crate::serializer::serialize;
use thiserror::Error;
use tracing::debug;

/// Vault-relative path of the backing document.
pub const DOCUMENT_PATH: &str = "reading.md";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Fs(#[from] FsError),

    #[error("Document error: {0}")]
    Parse(#[from] ParseError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Filter for [`MarkdownStore::find`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub status: Option<Status>,
    /// Every listed tag must be present
    pub tags: Vec<String>,
    pub priority: Option<Priority>,
    pub category: Option<Category>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl RecordQuery {
    pub fn matches(&self, record: &Record) -> bool {
        self.status.is_none_or(|s| record.status() == s)
            && self.priority.is_none_or(|p| record.priority == p)
            && self.category.is_none_or(|c| record.category == c)
            && self.tags.iter().all(|t| record.has_tag(t))
    }
}

pub struct MarkdownStore<F: FileSystem> {
    fs: F,
    path: String,
}

impl<F: FileSystem> MarkdownStore<F> {
    pub fn new(fs: F) -> Self {
        Self::with_path(fs, DOCUMENT_PATH)
    }

    pub fn with_path(fs: F, path: impl Into<String>) -> Self {
        Self {
            fs,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Read and map the document. A missing file is an empty record set.
    pub async fn load(&self) -> Result<Vec<Record>> {
        let bytes = match self.fs.read(&self.path).await {
            Ok(bytes) => bytes,
            Err(FsError::NotFound(_)) => {
                debug!("{} does not exist yet, treating as empty", self.path);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let doc = markdown::parse_bytes(&bytes)?;
        Ok(map_document(&doc))
    }

    /// Replace the document with `records`.
    pub async fn write(&self, records: &[Record]) -> Result<()> {
        let content = serialize(records);
        self.fs.write(&self.path, content.as_bytes()).await?;
        debug!("Wrote {} records to {}", records.len(), self.path);
        Ok(())
    }

    pub async fn find_all(&self) -> Result<Vec<Record>> {
        self.load().await
    }

    pub async fn find_by_id(&self, id: &RecordId) -> Result<Option<Record>> {
        Ok(self.load().await?.into_iter().find(|r| r.id() == id))
    }

    pub async fn find_by_status(&self, status: Status) -> Result<Vec<Record>> {
        self.find(&RecordQuery {
            status: Some(status),
            ..RecordQuery::default()
        })
        .await
    }

    pub async fn find_by_tag(&self, tag: &str) -> Result<Vec<Record>> {
        self.find(&RecordQuery {
            tags: vec![tag.to_string()],
            ..RecordQuery::default()
        })
        .await
    }

    /// Matching records in document order, paged by `offset` / `limit`.
    pub async fn find(&self, query: &RecordQuery) -> Result<Vec<Record>> {
        let matching = self
            .load()
            .await?
            .into_iter()
            .filter(|r| query.matches(r))
            .skip(query.offset);

        Ok(match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    /// Number of matching records, ignoring paging.
    pub async fn count(&self, query: &RecordQuery) -> Result<usize> {
        Ok(self.load().await?.iter().filter(|r| query.matches(r)).count())
    }

    /// Upsert: replace the record with the same id in place, or append.
    pub async fn save(&self, record: &Record) -> Result<()> {
        let mut records = self.load().await?;

        match records.iter_mut().find(|r| r.id() == record.id()) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }

        self.write(&records).await
    }

    /// Same as [`save`](Self::save).
    pub async fn update(&self, record: &Record) -> Result<()> {
        self.save(record).await
    }

    /// Remove by id. Returns whether a record was removed; absence is not an error.
    pub async fn delete(&self, id: &RecordId) -> Result<bool> {
        let mut records = self.load().await?;
        let before = records.len();
        records.retain(|r| r.id() != id);

        if records.len() == before {
            debug!("Delete of {} was a no-op", id);
            return Ok(false);
        }

        self.write(&records).await?;
        Ok(true)
    }
}
