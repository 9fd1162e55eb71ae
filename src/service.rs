//! Document service for mdstore.
//!
//! This is the entry point for callers such as an HTTP layer. It owns one
//! rate limiter and one backend and applies the limiter to creations before
//! they reach storage. Turning errors into transport responses is left to the
//! caller.

use tracing::warn;
use uuid::Uuid;

use crate::rate_limit::{RateLimitResult, RateLimiter};
use crate::storage::StorageBackend;
use crate::{Result, StoreError};

/// Document operations for verified users.
#[derive(Debug)]
pub struct DocumentService<B> {
    backend: B,
    limiter: RateLimiter,
}

impl<B: StorageBackend> DocumentService<B> {
    /// Create a new DocumentService.
    pub fn new(backend: B, limiter: RateLimiter) -> Self {
        Self { backend, limiter }
    }

    /// Get the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Get the rate limiter.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Create a document, subject to the creation rate limit.
    ///
    /// A rate-limited request never touches storage. An allowed request
    /// consumes budget even if storage then rejects it.
    pub async fn create(&self, user: Uuid, filename: &str, data: &[u8]) -> Result<()> {
        if let RateLimitResult::Denied { retry_after } = self.limiter.check_and_record(user) {
            warn!(%user, ?retry_after, "create rate limited");
            return Err(StoreError::RateLimited { retry_after });
        }

        self.backend.create(user, filename, data).await
    }

    /// Overwrite an existing document.
    pub async fn save(&self, user: Uuid, filename: &str, data: &[u8]) -> Result<()> {
        self.backend.save(user, filename, data).await
    }

    /// Read a document.
    pub async fn get(&self, user: Uuid, filename: &str) -> Result<Vec<u8>> {
        self.backend.get(user, filename).await
    }

    /// Remove a document.
    pub async fn delete(&self, user: Uuid, filename: &str) -> Result<()> {
        self.backend.delete(user, filename).await
    }

    /// List a user's documents.
    pub async fn list(&self, user: Uuid) -> Result<Vec<String>> {
        self.backend.list(user).await
    }

    /// Rename a document.
    pub async fn rename(&self, user: Uuid, from: &str, to: &str) -> Result<()> {
        self.backend.rename(user, from, to).await
    }
}
