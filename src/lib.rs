//! mdstore - per-user Markdown document store
//!
//! Stores small Markdown documents per user with a strict filename policy,
//! per-user byte and file-count quotas, and a rate limit on creation.
//! Two backends implement the same contract: a directory tree on the local
//! filesystem and a relational table.

pub mod config;
pub mod error;
pub mod logging;
pub mod rate_limit;
pub mod service;
pub mod storage;

pub use config::{BackendKind, Config};
pub use error::{Result, StoreError};
pub use rate_limit::{RateLimitConfig, RateLimitResult, RateLimiter};
pub use service::DocumentService;
pub use storage::{
    validate_filename, Backend, FsBackend, InvalidFilename, QuotaLimits, SqlBackend,
    StorageBackend, Usage,
};
