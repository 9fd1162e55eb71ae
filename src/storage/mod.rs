//! Document storage for mdstore.
//!
//! This module provides:
//! - The filename policy every backend enforces
//! - The `StorageBackend` contract shared by all backends
//! - A filesystem backend with per-user directories and quotas
//! - A relational backend over a single `documents` table

mod filename;
mod fs;
mod sql;

use std::future::Future;

use tracing::info;
use uuid::Uuid;

pub use filename::{
    validate_filename, validate_filename_bytes, InvalidFilename, ALLOWED_EXTENSIONS,
    FORBIDDEN_CHARS, MAX_FILENAME_BYTES, RESERVED_NAMES,
};
pub use fs::FsBackend;
pub use sql::{DbPool, SqlBackend};

use crate::config::{BackendKind, Config};
use crate::Result;

/// Default per-user byte quota.
pub const DEFAULT_SPACE_LIMIT: u64 = 1024;

/// Default per-user file-count quota.
pub const DEFAULT_MAX_FILES: usize = 3;

/// Per-user quota ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    /// Maximum total size of a user's documents in bytes.
    pub space_bytes: u64,
    /// Maximum number of documents per user.
    pub max_files: usize,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            space_bytes: DEFAULT_SPACE_LIMIT,
            max_files: DEFAULT_MAX_FILES,
        }
    }
}

/// Space and file count currently occupied by a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    /// Total size in bytes.
    pub bytes: u64,
    /// Number of documents.
    pub files: usize,
}

/// Operations every storage backend provides.
///
/// Every operation validates the filename itself, whatever the caller did
/// before. The quota check and the write that follows are not atomic: with
/// concurrent writers for the same user a quota can be exceeded by the writes
/// that raced past the check.
pub trait StorageBackend: Send + Sync {
    /// Store a new document.
    ///
    /// Fails with `AlreadyExists` if the name is taken, `SpaceFull` or
    /// `FileCountLimit` if the write would break a quota.
    fn create(
        &self,
        user: Uuid,
        filename: &str,
        data: &[u8],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Overwrite an existing document.
    ///
    /// Fails with `NotFound` if it does not exist. The old content does not
    /// count against the space quota.
    fn save(
        &self,
        user: Uuid,
        filename: &str,
        data: &[u8],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Read a document.
    fn get(&self, user: Uuid, filename: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Remove a document.
    fn delete(&self, user: Uuid, filename: &str) -> impl Future<Output = Result<()>> + Send;

    /// List a user's document names, sorted. Empty for a user without documents.
    fn list(&self, user: Uuid) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Rename a document.
    ///
    /// Fails with `NotFound` if `from` does not exist and `AlreadyExists` if
    /// `to` is taken.
    fn rename(
        &self,
        user: Uuid,
        from: &str,
        to: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// The backend selected by configuration.
#[derive(Debug)]
pub enum Backend {
    /// Per-user directories on the local filesystem.
    Filesystem(FsBackend),
    /// A shared relational table.
    Relational(SqlBackend),
}

impl Backend {
    /// Open the backend described by `config`.
    pub async fn open(config: &Config) -> Result<Self> {
        let limits = config.quota.limits();
        match config.storage.backend {
            BackendKind::Filesystem => {
                info!("Using filesystem storage at {}", config.storage.path);
                Ok(Backend::Filesystem(FsBackend::new(
                    &config.storage.path,
                    limits,
                )?))
            }
            BackendKind::Relational => {
                info!("Using relational storage");
                Ok(Backend::Relational(
                    SqlBackend::connect(&config.database).await?,
                ))
            }
        }
    }

    /// Short name of the backend.
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Filesystem(_) => "filesystem",
            Backend::Relational(_) => "relational",
        }
    }

    /// Release resources held by the backend.
    pub async fn close(&self) {
        if let Backend::Relational(sql) = self {
            sql.close().await;
        }
    }
}

impl StorageBackend for Backend {
    async fn create(&self, user: Uuid, filename: &str, data: &[u8]) -> Result<()> {
        match self {
            Backend::Filesystem(b) => b.create(user, filename, data).await,
            Backend::Relational(b) => b.create(user, filename, data).await,
        }
    }

    async fn save(&self, user: Uuid, filename: &str, data: &[u8]) -> Result<()> {
        match self {
            Backend::Filesystem(b) => b.save(user, filename, data).await,
            Backend::Relational(b) => b.save(user, filename, data).await,
        }
    }

    async fn get(&self, user: Uuid, filename: &str) -> Result<Vec<u8>> {
        match self {
            Backend::Filesystem(b) => b.get(user, filename).await,
            Backend::Relational(b) => b.get(user, filename).await,
        }
    }

    async fn delete(&self, user: Uuid, filename: &str) -> Result<()> {
        match self {
            Backend::Filesystem(b) => b.delete(user, filename).await,
            Backend::Relational(b) => b.delete(user, filename).await,
        }
    }

    async fn list(&self, user: Uuid) -> Result<Vec<String>> {
        match self {
            Backend::Filesystem(b) => b.list(user).await,
            Backend::Relational(b) => b.list(user).await,
        }
    }

    async fn rename(&self, user: Uuid, from: &str, to: &str) -> Result<()> {
        match self {
            Backend::Filesystem(b) => b.rename(user, from, to).await,
            Backend::Relational(b) => b.rename(user, from, to).await,
        }
    }
}
