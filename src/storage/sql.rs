//! Relational storage backend.
//!
//! All documents live in one `documents` table keyed by title. The table has
//! no owner column, so the backend is single-tenant: the user id is accepted
//! for interface compatibility and no per-user quotas are enforced.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use sqlx::pool::PoolOptions;
use tracing::{debug, info};
use uuid::Uuid;

use super::{validate_filename, StorageBackend};
use crate::config::DatabaseConfig;
use crate::{Result, StoreError};

#[cfg(not(any(feature = "sqlite", feature = "postgres")))]
compile_error!("enable the `sqlite` or `postgres` feature");

/// Database driver selected at build time.
#[cfg(feature = "postgres")]
pub type Db = sqlx::Postgres;
/// Database driver selected at build time.
#[cfg(all(feature = "sqlite", not(feature = "postgres")))]
pub type Db = sqlx::Sqlite;

/// Connection pool for the selected driver.
pub type DbPool = sqlx::Pool<Db>;

#[cfg(feature = "postgres")]
const CREATE_DOCUMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    title       VARCHAR(255) PRIMARY KEY,
    content     BYTEA NOT NULL,
    created_at  TIMESTAMP NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMP NOT NULL DEFAULT NOW()
)
"#;

#[cfg(all(feature = "sqlite", not(feature = "postgres")))]
const CREATE_DOCUMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    title       TEXT PRIMARY KEY,
    content     BLOB NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
)
"#;

/// Storage backend over a shared `documents` table.
#[derive(Debug, Clone)]
pub struct SqlBackend {
    pool: DbPool,
    /// Deadline for each operation.
    query_timeout: Duration,
}

impl SqlBackend {
    /// Open a connection pool from configuration and ensure the schema exists.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = PoolOptions::<Db>::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .max_lifetime(config.max_lifetime())
            .idle_timeout(config.idle_timeout())
            .acquire_timeout(config.acquire_timeout());

        let pool = match config.url.as_deref().filter(|u| !u.is_empty()) {
            Some(url) => options.connect(url).await,
            None => options.connect_with(connect_options(config)?).await,
        }
        .map_err(|e| StoreError::Database(format!("failed to connect: {e}")))?;

        info!(
            max_connections = config.max_connections,
            "Connected to document database"
        );

        Self::with_pool(pool, config.query_timeout()).await
    }

    /// Wrap an existing pool and ensure the schema exists.
    pub async fn with_pool(pool: DbPool, query_timeout: Duration) -> Result<Self> {
        let backend = Self {
            pool,
            query_timeout,
        };

        backend
            .run(sqlx::query(CREATE_DOCUMENTS_TABLE).execute(&backend.pool))
            .await?;
        debug!("documents table ready");

        Ok(backend)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Close the pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run a query under the configured deadline.
    async fn run<T, F>(&self, query: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.query_timeout, query).await {
            Ok(result) => result.map_err(convert_error),
            Err(_) => Err(StoreError::Timeout(self.query_timeout)),
        }
    }

    async fn exists(&self, filename: &str) -> Result<bool> {
        let found: Option<String> = self
            .run(
                sqlx::query_scalar("SELECT title FROM documents WHERE title = $1")
                    .bind(filename)
                    .fetch_optional(&self.pool),
            )
            .await?;
        Ok(found.is_some())
    }
}

#[cfg(feature = "postgres")]
fn connect_options(config: &DatabaseConfig) -> Result<sqlx::postgres::PgConnectOptions> {
    use sqlx::postgres::{PgConnectOptions, PgSslMode};

    let ssl_mode: PgSslMode = config
        .sslmode
        .parse()
        .map_err(|e| StoreError::Config(format!("invalid database.sslmode: {e}")))?;

    Ok(PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.name)
        .ssl_mode(ssl_mode))
}

/// For SQLite, `host` is the database file path.
#[cfg(all(feature = "sqlite", not(feature = "postgres")))]
fn connect_options(config: &DatabaseConfig) -> Result<sqlx::sqlite::SqliteConnectOptions> {
    Ok(sqlx::sqlite::SqliteConnectOptions::new()
        .filename(&config.host)
        .create_if_missing(true))
}

/// Map driver errors onto the storage taxonomy.
fn convert_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(ref db) if db.is_unique_violation() => StoreError::AlreadyExists,
        other => other.into(),
    }
}

fn not_found_if_untouched(rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(StoreError::NotFound)
    } else {
        Ok(())
    }
}

impl StorageBackend for SqlBackend {
    async fn create(&self, _user: Uuid, filename: &str, data: &[u8]) -> Result<()> {
        validate_filename(filename)?;

        self.run(
            sqlx::query("INSERT INTO documents (title, content, updated_at) VALUES ($1, $2, $3)")
                .bind(filename)
                .bind(data)
                .bind(Utc::now().naive_utc())
                .execute(&self.pool),
        )
        .await?;

        debug!(filename, size = data.len(), "document created");
        Ok(())
    }

    async fn save(&self, _user: Uuid, filename: &str, data: &[u8]) -> Result<()> {
        validate_filename(filename)?;

        let result = self
            .run(
                sqlx::query("UPDATE documents SET content = $1, updated_at = $2 WHERE title = $3")
                    .bind(data)
                    .bind(Utc::now().naive_utc())
                    .bind(filename)
                    .execute(&self.pool),
            )
            .await?;
        not_found_if_untouched(result.rows_affected())?;

        debug!(filename, size = data.len(), "document saved");
        Ok(())
    }

    async fn get(&self, _user: Uuid, filename: &str) -> Result<Vec<u8>> {
        validate_filename(filename)?;

        self.run(
            sqlx::query_scalar("SELECT content FROM documents WHERE title = $1")
                .bind(filename)
                .fetch_one(&self.pool),
        )
        .await
    }

    async fn delete(&self, _user: Uuid, filename: &str) -> Result<()> {
        validate_filename(filename)?;

        let result = self
            .run(
                sqlx::query("DELETE FROM documents WHERE title = $1")
                    .bind(filename)
                    .execute(&self.pool),
            )
            .await?;
        not_found_if_untouched(result.rows_affected())?;

        debug!(filename, "document deleted");
        Ok(())
    }

    async fn list(&self, _user: Uuid) -> Result<Vec<String>> {
        self.run(
            sqlx::query_scalar("SELECT title FROM documents ORDER BY title")
                .fetch_all(&self.pool),
        )
        .await
    }

    async fn rename(&self, _user: Uuid, from: &str, to: &str) -> Result<()> {
        validate_filename(from)?;
        validate_filename(to)?;

        // Updating a key onto itself would succeed silently
        if from == to {
            return if self.exists(from).await? {
                Err(StoreError::AlreadyExists)
            } else {
                Err(StoreError::NotFound)
            };
        }

        let result = self
            .run(
                sqlx::query("UPDATE documents SET title = $1, updated_at = $2 WHERE title = $3")
                    .bind(to)
                    .bind(Utc::now().naive_utc())
                    .bind(from)
                    .execute(&self.pool),
            )
            .await?;
        not_found_if_untouched(result.rows_affected())?;

        debug!(from, to, "document renamed");
        Ok(())
    }
}

#[cfg(all(test, feature = "sqlite", not(feature = "postgres")))]
mod tests {
    use super::*;
    use crate::storage::InvalidFilename;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_backend() -> SqlBackend {
        // A single connection keeps the in-memory database alive and shared
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqlBackend::with_pool(pool, Duration::from_secs(5))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_schema_created() {
        let backend = setup_backend().await;

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='documents'",
        )
        .fetch_one(backend.pool())
        .await
        .unwrap();
        assert_eq!(count, 1);

        // Opening twice is harmless
        SqlBackend::with_pool(backend.pool().clone(), Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let backend = setup_backend().await;
        let user = Uuid::new_v4();

        backend.create(user, "test.md", b"Hello, World!").await.unwrap();
        assert_eq!(backend.get(user, "test.md").await.unwrap(), b"Hello, World!");
    }

    #[tokio::test]
    async fn test_create_duplicate() {
        let backend = setup_backend().await;
        let user = Uuid::new_v4();

        backend.create(user, "test.md", b"first").await.unwrap();
        let result = backend.create(user, "test.md", b"second").await;

        assert!(matches!(result, Err(StoreError::AlreadyExists)));
        assert_eq!(backend.get(user, "test.md").await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_get_missing() {
        let backend = setup_backend().await;
        let result = backend.get(Uuid::new_v4(), "missing.md").await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_save() {
        let backend = setup_backend().await;
        let user = Uuid::new_v4();

        backend.create(user, "doc.md", b"v1").await.unwrap();
        backend.save(user, "doc.md", b"v2").await.unwrap();
        assert_eq!(backend.get(user, "doc.md").await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_save_missing() {
        let backend = setup_backend().await;
        let result = backend.save(Uuid::new_v4(), "nope.md", b"x").await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_save_updates_timestamp_column() {
        let backend = setup_backend().await;
        let user = Uuid::new_v4();

        backend.create(user, "doc.md", b"v1").await.unwrap();
        sqlx::query(
            "UPDATE documents SET updated_at = '2000-01-01 00:00:00' WHERE title = 'doc.md'",
        )
        .execute(backend.pool())
        .await
        .unwrap();

        backend.save(user, "doc.md", b"v2").await.unwrap();

        let updated: String =
            sqlx::query_scalar("SELECT updated_at FROM documents WHERE title = 'doc.md'")
                .fetch_one(backend.pool())
                .await
                .unwrap();
        assert_ne!(updated, "2000-01-01 00:00:00");
        assert!(updated.starts_with(&Utc::now().format("%Y-").to_string()));
    }

    #[tokio::test]
    async fn test_query_deadline() {
        let backend = setup_backend().await;
        let impatient = SqlBackend {
            pool: backend.pool().clone(),
            query_timeout: Duration::from_millis(20),
        };

        let result = impatient
            .run(std::future::pending::<std::result::Result<(), sqlx::Error>>())
            .await;
        assert!(matches!(
            result,
            Err(StoreError::Timeout(d)) if d == Duration::from_millis(20)
        ));

        // Queries that finish in time are unaffected
        assert!(impatient.list(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let backend = setup_backend().await;
        let user = Uuid::new_v4();

        backend.create(user, "doc.md", b"x").await.unwrap();
        backend.delete(user, "doc.md").await.unwrap();

        assert!(matches!(
            backend.get(user, "doc.md").await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            backend.delete(user, "doc.md").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_list() {
        let backend = setup_backend().await;
        let user = Uuid::new_v4();

        assert!(backend.list(user).await.unwrap().is_empty());

        backend.create(user, "b.md", b"b").await.unwrap();
        backend.create(user, "a.md", b"a").await.unwrap();

        assert_eq!(
            backend.list(user).await.unwrap(),
            vec!["a.md".to_string(), "b.md".to_string()]
        );
    }

    #[tokio::test]
    async fn test_single_tenant() {
        let backend = setup_backend().await;
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();

        backend.create(u1, "shared.md", b"one").await.unwrap();

        assert_eq!(backend.get(u2, "shared.md").await.unwrap(), b"one");
        assert!(matches!(
            backend.create(u2, "shared.md", b"two").await,
            Err(StoreError::AlreadyExists)
        ));
    }

    #[tokio::test]
    async fn test_rename() {
        let backend = setup_backend().await;
        let user = Uuid::new_v4();

        backend.create(user, "old.md", b"content").await.unwrap();
        backend.rename(user, "old.md", "new.md").await.unwrap();

        assert!(matches!(
            backend.get(user, "old.md").await,
            Err(StoreError::NotFound)
        ));
        assert_eq!(backend.get(user, "new.md").await.unwrap(), b"content");
    }

    #[tokio::test]
    async fn test_rename_conflicts() {
        let backend = setup_backend().await;
        let user = Uuid::new_v4();

        backend.create(user, "a.md", b"a").await.unwrap();
        backend.create(user, "b.md", b"b").await.unwrap();

        assert!(matches!(
            backend.rename(user, "a.md", "b.md").await,
            Err(StoreError::AlreadyExists)
        ));
        assert!(matches!(
            backend.rename(user, "missing.md", "c.md").await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            backend.rename(user, "a.md", "a.md").await,
            Err(StoreError::AlreadyExists)
        ));
        assert!(matches!(
            backend.rename(user, "c.md", "c.md").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_invalid_filename() {
        let backend = setup_backend().await;
        let user = Uuid::new_v4();

        assert!(matches!(
            backend.create(user, "../x.md", b"x").await,
            Err(StoreError::InvalidFilename(InvalidFilename::PathInFilename))
        ));
        assert!(matches!(
            backend.get(user, "x.txt").await,
            Err(StoreError::InvalidFilename(InvalidFilename::BadExtension { .. }))
        ));
        assert!(backend.list(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connect_from_config() {
        let config = DatabaseConfig {
            url: Some("sqlite::memory:".to_string()),
            max_connections: 1,
            ..DatabaseConfig::default()
        };

        let backend = SqlBackend::connect(&config).await.unwrap();
        backend.create(Uuid::new_v4(), "x.md", b"x").await.unwrap();
        backend.close().await;
        assert!(backend.pool().is_closed());
    }

    #[tokio::test]
    async fn test_connect_file_database() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = DatabaseConfig {
            host: temp_dir.path().join("docs.db").display().to_string(),
            ..DatabaseConfig::default()
        };

        let user = Uuid::new_v4();
        {
            let backend = SqlBackend::connect(&config).await.unwrap();
            backend.create(user, "persist.md", b"kept").await.unwrap();
            backend.close().await;
        }

        let backend = SqlBackend::connect(&config).await.unwrap();
        assert_eq!(backend.get(user, "persist.md").await.unwrap(), b"kept");
        backend.close().await;
    }

    #[test]
    fn test_convert_error() {
        assert!(matches!(
            convert_error(sqlx::Error::RowNotFound),
            StoreError::NotFound
        ));
        assert!(matches!(
            convert_error(sqlx::Error::PoolTimedOut),
            StoreError::Database(_)
        ));
    }
}
