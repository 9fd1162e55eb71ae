//! Filesystem storage backend.
//!
//! Documents are stored one file per document, grouped by owner:
//! ```text
//! {base_path}/
//! ├── 0b6e1c1e-5f0e-4a43-9d1c-1f0b8e0c3a11/
//! │   ├── notes.md
//! │   └── todo.markdown
//! └── 7d2f.../
//!     └── ...
//! ```
//!
//! A user's directory is created on the first `create`, `list` or `usage`
//! call. Reads, saves and deletes for a user without a directory report
//! `NotFound`.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{validate_filename, QuotaLimits, StorageBackend, Usage};
use crate::{Result, StoreError};

#[cfg(unix)]
const DIR_MODE: u32 = 0o755;
#[cfg(unix)]
const FILE_MODE: u32 = 0o644;

/// Storage backend over a local directory tree.
#[derive(Debug, Clone)]
pub struct FsBackend {
    /// Base directory for all users.
    base_path: PathBuf,
    /// Per-user quota ceilings.
    limits: QuotaLimits,
}

impl FsBackend {
    /// Create a new FsBackend with the given base path.
    ///
    /// The base directory will be created if it doesn't exist.
    pub fn new(base_path: impl Into<PathBuf>, limits: QuotaLimits) -> Result<Self> {
        let base_path = base_path.into();

        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(DIR_MODE);
        }
        builder.create(&base_path)?;

        Ok(Self { base_path, limits })
    }

    /// Get the base path of this backend.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Get the quota ceilings of this backend.
    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    /// Directory holding a user's documents.
    pub fn user_dir(&self, user: Uuid) -> PathBuf {
        self.base_path.join(user.to_string())
    }

    /// Validate `filename` and build its path inside the user's directory.
    fn document_path(&self, user: Uuid, filename: &str) -> Result<PathBuf> {
        validate_filename(filename)?;
        Ok(self.user_dir(user).join(filename))
    }

    async fn ensure_user_dir(&self, user: Uuid) -> Result<PathBuf> {
        let dir = self.user_dir(user);

        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(DIR_MODE);
        builder.create(&dir).await?;

        Ok(dir)
    }

    /// Space and file count occupied by a user, ignoring the names in `exclude`.
    ///
    /// Scans the user's directory on every call.
    pub async fn usage(&self, user: Uuid, exclude: &[&str]) -> Result<Usage> {
        let dir = self.ensure_user_dir(user).await?;

        let mut usage = Usage::default();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name();
            if exclude.iter().any(|excluded| name.as_os_str() == *excluded) {
                continue;
            }
            usage.bytes += metadata.len();
            usage.files += 1;
        }

        Ok(usage)
    }

    fn check_space(&self, user: Uuid, usage: Usage, incoming: usize) -> Result<()> {
        let space_bytes = self.limits.space_bytes;
        if usage.bytes.saturating_add(incoming as u64) > space_bytes {
            warn!(%user, occupied = usage.bytes, incoming, "user space is full");
            return Err(StoreError::SpaceFull { limit: space_bytes });
        }
        Ok(())
    }

    async fn write_file(path: &Path, data: &[u8], create_new: bool) -> io::Result<()> {
        let mut options = fs::OpenOptions::new();
        options.write(true);
        if create_new {
            options.create_new(true);
        } else {
            options.truncate(true);
        }
        #[cfg(unix)]
        options.mode(FILE_MODE);

        let mut file = options.open(path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Returns whether `path` exists, treating "not found" as `false`.
async fn exists(path: &Path) -> Result<bool> {
    match fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn map_not_found(e: io::Error) -> StoreError {
    if e.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound
    } else {
        e.into()
    }
}

impl StorageBackend for FsBackend {
    async fn create(&self, user: Uuid, filename: &str, data: &[u8]) -> Result<()> {
        let path = self.document_path(user, filename)?;
        self.ensure_user_dir(user).await?;

        if exists(&path).await? {
            return Err(StoreError::AlreadyExists);
        }

        let usage = self.usage(user, &[]).await?;
        self.check_space(user, usage, data.len())?;
        if usage.files + 1 > self.limits.max_files {
            warn!(%user, files = usage.files, "file count limit reached");
            return Err(StoreError::FileCountLimit {
                max: self.limits.max_files,
            });
        }

        Self::write_file(&path, data, true)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => StoreError::AlreadyExists,
                _ => e.into(),
            })?;

        debug!(%user, filename, size = data.len(), "document created");
        Ok(())
    }

    async fn save(&self, user: Uuid, filename: &str, data: &[u8]) -> Result<()> {
        let path = self.document_path(user, filename)?;

        if !exists(&path).await? {
            return Err(StoreError::NotFound);
        }

        let usage = self.usage(user, &[filename]).await?;
        self.check_space(user, usage, data.len())?;

        Self::write_file(&path, data, false)
            .await
            .map_err(map_not_found)?;

        debug!(%user, filename, size = data.len(), "document saved");
        Ok(())
    }

    async fn get(&self, user: Uuid, filename: &str) -> Result<Vec<u8>> {
        let path = self.document_path(user, filename)?;

        match fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) => Err(map_not_found(e)),
        }
    }

    async fn delete(&self, user: Uuid, filename: &str) -> Result<()> {
        let path = self.document_path(user, filename)?;

        fs::remove_file(&path).await.map_err(map_not_found)?;

        debug!(%user, filename, "document deleted");
        Ok(())
    }

    async fn list(&self, user: Uuid) -> Result<Vec<String>> {
        let dir = self.ensure_user_dir(user).await?;

        let mut names = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            // Names written by this backend are always UTF-8.
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }

    async fn rename(&self, user: Uuid, from: &str, to: &str) -> Result<()> {
        let source = self.document_path(user, from)?;
        let target = self.document_path(user, to)?;

        if !exists(&source).await? {
            return Err(StoreError::NotFound);
        }
        if exists(&target).await? {
            return Err(StoreError::AlreadyExists);
        }

        fs::rename(&source, &target).await.map_err(map_not_found)?;

        debug!(%user, from, to, "document renamed");
        Ok(())
    }
}
