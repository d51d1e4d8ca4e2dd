mod postgres;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;
use tracing::info;

pub use crate::database::postgres::PgMetadataStore;
use crate::models::{FileMetadata, FileRecord};

#[derive(Debug, Error)]
pub enum MetadataError {
    /// A uniqueness constraint (filename or hash) rejected the write.
    #[error("Conflicting record: {0}")]
    Conflict(String),

    #[error("Record {0} no longer exists")]
    NotFound(i64),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl MetadataError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, MetadataError::Conflict(_))
    }
}

/// Row storage for [`FileRecord`]s. Every dedup decision is made by
/// querying this store at request time; nothing is cached in process.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<FileRecord>, MetadataError>;

    async fn find_by_filename(&self, filename: &str) -> Result<Option<FileRecord>, MetadataError>;

    async fn find_by_hash(&self, hash: &str) -> Result<Option<FileRecord>, MetadataError>;

    async fn find_by_hash_excluding(
        &self,
        hash: &str,
        excluded_id: i64,
    ) -> Result<Option<FileRecord>, MetadataError>;

    async fn count_by_hash_excluding_filename(
        &self,
        hash: &str,
        filename: &str,
    ) -> Result<i64, MetadataError>;

    /// Create a row; the store assigns `id`, `created_at` and `updated_at`.
    async fn insert(&self, metadata: &FileMetadata) -> Result<FileRecord, MetadataError>;

    /// Rewrite every derived column of an existing row and refresh `updated_at`.
    async fn update(&self, id: i64, metadata: &FileMetadata) -> Result<FileRecord, MetadataError>;

    /// Refresh `updated_at` only and return the row as it now stands.
    async fn touch(&self, id: i64) -> Result<FileRecord, MetadataError>;

    async fn delete(&self, id: i64) -> Result<(), MetadataError>;
}

/// Initialize and return a PostgreSQL connection pool.
pub async fn init_db(database_url: &str) -> Result<PgPool, sqlx::Error> {
    info!("Connecting to database...");

    // Create a new PostgreSQL connection pool with a maximum of 5 connections
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    info!("Database connection established");
    Ok(pool)
}

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations applied");
    Ok(())
}
