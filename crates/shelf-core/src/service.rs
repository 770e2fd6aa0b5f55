//! Reading list operations for callers (CLI, API).
//!
//! Each operation is one critical section in the vault's exclusive scope:
//! pull (if enabled) → read → mutate → write → commit and push (if
//! enabled). Sync problems are logged and never fail the operation; the
//! local write has already happened by then.

use crate::config::Config;
use crate::fs::{FileSystem, NativeFs};
use crate::git::GitCli;
use crate::record::{
    Category, Priority, Progress, Rating, Record, RecordId, Status, ValidationError,
};
use crate::store::{MarkdownStore, RecordQuery, StoreError};
use crate::sync::{RepositorySettings, SyncCoordinator};
use crate::vault::{Vault, VaultGuard};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Record as exposed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordDto {
    pub id: RecordId,
    pub title: String,
    pub author: String,
    #[serde(rename = "type")]
    pub category: Category,
    pub status: Status,
    pub priority: Priority,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub notes: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub review: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<NaiveDate>,
}

impl From<&Record> for RecordDto {
    fn from(record: &Record) -> Self {
        let nonzero = |n: u32| (n > 0).then_some(n);
        Self {
            id: record.id().clone(),
            title: record.title().to_string(),
            author: record.author.clone(),
            category: record.category,
            status: record.status(),
            priority: record.priority,
            tags: record.tags().to_vec(),
            progress: record.progress.map(|p| p.percentage),
            current_page: record.progress.and_then(|p| nonzero(p.current_page)),
            total_pages: record.progress.and_then(|p| nonzero(p.total_pages)),
            rating: record.rating.map(|r| r.value()),
            url: record.metadata.url.clone(),
            notes: record.metadata.notes.clone(),
            review: record.metadata.review.clone(),
            added: record.metadata.added,
            started: record.metadata.started,
            finished: record.metadata.finished,
        }
    }
}

/// Input for [`ReadingService::add`]. Enum fields are free text and fall
/// back to defaults when unrecognised.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AddRecord {
    pub title: String,
    pub author: String,
    #[serde(rename = "type")]
    pub category: String,
    pub priority: String,
    pub tags: Vec<String>,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateProgress {
    pub id: String,
    pub percentage: i64,
    /// 0 keeps the previously recorded page
    #[serde(default)]
    pub current_page: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FinishRecord {
    pub id: String,
    pub rating: i64,
    #[serde(default)]
    pub review: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub total: usize,
    pub to_read: usize,
    pub reading: usize,
    pub done: usize,
    /// Mean over rated records; `None` when nothing is rated
    pub average_rating: Option<f64>,
}

/// When foreground operations talk to the remote.
#[derive(Debug, Clone)]
pub struct SyncPolicy {
    pub auto_pull: bool,
    pub auto_commit: bool,
    pub commit_message: String,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            auto_pull: true,
            auto_commit: true,
            commit_message: "Update reading list".to_string(),
        }
    }
}

pub struct ReadingService<F: FileSystem> {
    vault: Vault,
    store: MarkdownStore<F>,
    sync: Option<Arc<SyncCoordinator>>,
    policy: SyncPolicy,
}

impl ReadingService<NativeFs> {
    /// Wire a service, git client and coordinator for the configured vault.
    pub fn from_config(config: &Config) -> Self {
        let vault = Vault::open(&config.vault_path);
        let git = GitCli::new(&config.vault_path)
            .with_ssh_key(&config.ssh_key_path)
            .with_timeout(config.git_timeout);
        let coordinator = SyncCoordinator::new(
            vault.clone(),
            Arc::new(git),
            RepositorySettings {
                remote: config.vault_repo.clone(),
                user_name: config.git_user_name.clone(),
                user_email: config.git_user_email.clone(),
            },
        );

        Self::with_sync(
            MarkdownStore::new(NativeFs::new(&config.vault_path)),
            Arc::new(coordinator),
            SyncPolicy {
                auto_pull: config.auto_sync,
                auto_commit: config.auto_commit,
                commit_message: config.commit_message.clone(),
            },
        )
    }
}

impl<F: FileSystem> ReadingService<F> {
    /// Service without any version control.
    pub fn local(vault: Vault, store: MarkdownStore<F>) -> Self {
        Self {
            vault,
            store,
            sync: None,
            policy: SyncPolicy::default(),
        }
    }

    /// Service sharing `coordinator`'s vault and exclusive scope.
    pub fn with_sync(
        store: MarkdownStore<F>,
        coordinator: Arc<SyncCoordinator>,
        policy: SyncPolicy,
    ) -> Self {
        Self {
            vault: coordinator.vault().clone(),
            store,
            sync: Some(coordinator),
            policy,
        }
    }

    pub fn coordinator(&self) -> Option<&Arc<SyncCoordinator>> {
        self.sync.as_ref()
    }

    /// Enter the exclusive scope and pull if enabled.
    async fn begin(&self) -> VaultGuard<'_> {
        let scope = self.vault.lock().await;
        if let Some(sync) = self.sync.as_ref().filter(|_| self.policy.auto_pull) {
            sync.pull_locked(&scope).await;
        }
        scope
    }

    /// Commit and push a completed write if enabled. Failures are logged only.
    async fn publish(&self, scope: &VaultGuard<'_>) {
        let Some(sync) = self.sync.as_ref().filter(|_| self.policy.auto_commit) else {
            return;
        };
        if let Err(e) = sync.publish_locked(scope, &self.policy.commit_message).await {
            warn!("Change saved locally but not synced: {}", e);
        }
    }

    async fn read<T>(&self, read: impl FnOnce(Vec<Record>) -> T) -> Result<T> {
        let _scope = self.begin().await;
        Ok(read(self.store.load().await?))
    }

    /// Load, apply `mutate` to the record with `id`, write back.
    async fn modify<M>(&self, id: &str, mutate: M) -> Result<RecordDto>
    where
        M: FnOnce(&mut Record) -> std::result::Result<(), ValidationError>,
    {
        let scope = self.begin().await;
        let id = RecordId::from(id);

        let mut records = self.store.load().await?;
        let record = records
            .iter_mut()
            .find(|r| *r.id() == id)
            .ok_or_else(|| ValidationError::NotFound(id.clone()))?;
        mutate(record)?;
        let dto = RecordDto::from(&*record);

        self.store.write(&records).await?;
        self.publish(&scope).await;
        Ok(dto)
    }

    pub async fn list_all(&self) -> Result<Vec<RecordDto>> {
        self.read(|records| records.iter().map(RecordDto::from).collect())
            .await
    }

    pub async fn list_by_status(&self, status: &str) -> Result<Vec<RecordDto>> {
        let status: Status = status.parse()?;
        self.query(&RecordQuery {
            status: Some(status),
            ..RecordQuery::default()
        })
        .await
    }

    pub async fn list_by_tag(&self, tag: &str) -> Result<Vec<RecordDto>> {
        self.query(&RecordQuery {
            tags: vec![tag.to_string()],
            ..RecordQuery::default()
        })
        .await
    }

    pub async fn query(&self, query: &RecordQuery) -> Result<Vec<RecordDto>> {
        let _scope = self.begin().await;
        let records = self.store.find(query).await?;
        Ok(records.iter().map(RecordDto::from).collect())
    }

    pub async fn get(&self, id: &str) -> Result<RecordDto> {
        let id = RecordId::from(id);
        self.read(|records| {
            records
                .iter()
                .find(|r| *r.id() == id)
                .map(RecordDto::from)
                .ok_or_else(|| ValidationError::NotFound(id.clone()))
        })
        .await?
        .map_err(Into::into)
    }

    pub async fn statistics(&self) -> Result<Statistics> {
        self.read(|records| {
            let count = |s: Status| records.iter().filter(|r| r.status() == s).count();
            let ratings: Vec<f64> = records
                .iter()
                .filter_map(|r| r.rating)
                .map(|r| f64::from(r.value()))
                .collect();

            Statistics {
                total: records.len(),
                to_read: count(Status::ToRead),
                reading: count(Status::Reading),
                done: count(Status::Done),
                average_rating: (!ratings.is_empty())
                    .then(|| ratings.iter().sum::<f64>() / ratings.len() as f64),
            }
        })
        .await
    }

    /// Create a to-read record. Adding the same title and author again
    /// replaces the earlier record.
    pub async fn add(&self, cmd: AddRecord) -> Result<RecordDto> {
        let author = match cmd.author.trim() {
            "" => "Unknown",
            author => author,
        };
        let mut record = Record::new(
            &cmd.title,
            author,
            Category::parse(&cmd.category).unwrap_or_default(),
            today(),
        )?;
        record.priority = Priority::parse(&cmd.priority).unwrap_or_default();
        for tag in &cmd.tags {
            record.add_tag(tag);
        }
        record.metadata.url = cmd.url.trim().to_string();

        let scope = self.begin().await;
        self.store.save(&record).await?;
        self.publish(&scope).await;

        info!("Added '{}' ({})", record.title(), record.id());
        Ok(RecordDto::from(&record))
    }

    pub async fn start(&self, id: &str) -> Result<RecordDto> {
        self.modify(id, |record| record.start(today())).await
    }

    /// Put an in-progress record back on the to-read list.
    pub async fn stop(&self, id: &str) -> Result<RecordDto> {
        self.modify(id, |record| record.stop()).await
    }

    pub async fn update_progress(&self, cmd: UpdateProgress) -> Result<RecordDto> {
        let mut progress = Progress::new(cmd.percentage)?;
        self.modify(&cmd.id, |record| {
            let previous = record.progress.unwrap_or_default();
            progress.total_pages = previous.total_pages;
            progress.current_page = match cmd.current_page {
                0 => previous.current_page,
                page => page,
            };
            record.update_progress(progress)
        })
        .await
    }

    pub async fn finish(&self, cmd: FinishRecord) -> Result<RecordDto> {
        let rating = Rating::new(cmd.rating)?;
        self.modify(&cmd.id, |record| {
            record.finish(today(), rating)?;
            let review = cmd.review.trim();
            if !review.is_empty() {
                record.metadata.review = review.to_string();
            }
            Ok(())
        })
        .await
    }

    /// Remove a record. Returns whether it existed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let scope = self.begin().await;
        let removed = self.store.delete(&RecordId::from(id)).await?;
        if removed {
            self.publish(&scope).await;
        }
        Ok(removed)
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}
