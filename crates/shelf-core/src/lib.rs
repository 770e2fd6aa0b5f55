//! shelf-core: a reading list kept in one markdown file inside a git vault.
//!
//! This crate provides:
//! - Parsing the markdown document and mapping it to typed records
//! - Serializing records back into the same canonical layout
//! - A whole-file store with upsert/delete semantics
//! - A sync coordinator that pulls, commits and pushes through git
//! - A service layer running each operation in the vault's exclusive scope

pub mod config;
pub mod fs;
pub mod git;
pub mod mapper;
pub mod markdown;
pub mod record;
pub mod serializer;
pub mod service;
pub mod store;
pub mod sync;
pub mod vault;

pub use config::{Config, ConfigError};
pub use fs::{FileSystem, FsError, InMemoryFs, NativeFs};
pub use git::{GitCli, GitError, VersionControl};
pub use markdown::{GenericDocument, ParseError};
pub use record::{Category, Priority, Progress, Rating, Record, RecordId, Status, ValidationError};
pub use service::{
    AddRecord, FinishRecord, ReadingService, RecordDto, ServiceError, Statistics, SyncPolicy,
    UpdateProgress,
};
pub use store::{MarkdownStore, RecordQuery, StoreError};
pub use sync::{CycleOutcome, SyncCoordinator, SyncError, SyncHandle, SyncState, VaultStatus};
pub use vault::Vault;
