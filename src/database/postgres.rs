use async_trait::async_trait;
use sqlx::PgPool;

use super::{MetadataError, MetadataStore};
use crate::models::{FileMetadata, FileRecord};

/// Postgres-backed metadata store over the `cdn_files` table.
#[derive(Clone)]
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Unique violations become `Conflict` so the pipeline can re-resolve.
fn map_write_error(err: sqlx::Error) -> MetadataError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return MetadataError::Conflict(db_err.message().to_string());
        }
    }
    MetadataError::Database(err)
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<FileRecord>, MetadataError> {
        let record = sqlx::query_as::<_, FileRecord>("SELECT * FROM cdn_files WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn find_by_filename(&self, filename: &str) -> Result<Option<FileRecord>, MetadataError> {
        let record = sqlx::query_as::<_, FileRecord>("SELECT * FROM cdn_files WHERE filename = $1")
            .bind(filename)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<FileRecord>, MetadataError> {
        let record = sqlx::query_as::<_, FileRecord>(
            "SELECT * FROM cdn_files WHERE file_hash = $1 ORDER BY id LIMIT 1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn find_by_hash_excluding(
        &self,
        hash: &str,
        excluded_id: i64,
    ) -> Result<Option<FileRecord>, MetadataError> {
        let record = sqlx::query_as::<_, FileRecord>(
            "SELECT * FROM cdn_files WHERE file_hash = $1 AND id <> $2 ORDER BY id LIMIT 1",
        )
        .bind(hash)
        .bind(excluded_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn count_by_hash_excluding_filename(
        &self,
        hash: &str,
        filename: &str,
    ) -> Result<i64, MetadataError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM cdn_files WHERE file_hash = $1 AND filename <> $2",
        )
        .bind(hash)
        .bind(filename)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn insert(&self, metadata: &FileMetadata) -> Result<FileRecord, MetadataError> {
        sqlx::query_as::<_, FileRecord>(
            r#"
            INSERT INTO cdn_files (
                filename, thumb_filename, file_hash, original_width, original_height,
                width, height, thumb_width, thumb_height, file_size, thumb_size,
                extension, mime_type
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(&metadata.filename)
        .bind(&metadata.thumb_filename)
        .bind(&metadata.file_hash)
        .bind(metadata.original_width)
        .bind(metadata.original_height)
        .bind(metadata.width)
        .bind(metadata.height)
        .bind(metadata.thumb_width)
        .bind(metadata.thumb_height)
        .bind(metadata.file_size)
        .bind(metadata.thumb_size)
        .bind(&metadata.extension)
        .bind(&metadata.mime_type)
        .fetch_one(&self.pool)
        .await
        .map_err(map_write_error)
    }

    async fn update(&self, id: i64, metadata: &FileMetadata) -> Result<FileRecord, MetadataError> {
        sqlx::query_as::<_, FileRecord>(
            r#"
            UPDATE cdn_files SET
                filename = $1,
                thumb_filename = $2,
                file_hash = $3,
                original_width = $4,
                original_height = $5,
                width = $6,
                height = $7,
                thumb_width = $8,
                thumb_height = $9,
                file_size = $10,
                thumb_size = $11,
                extension = $12,
                mime_type = $13,
                updated_at = now()
            WHERE id = $14
            RETURNING *
            "#,
        )
        .bind(&metadata.filename)
        .bind(&metadata.thumb_filename)
        .bind(&metadata.file_hash)
        .bind(metadata.original_width)
        .bind(metadata.original_height)
        .bind(metadata.width)
        .bind(metadata.height)
        .bind(metadata.thumb_width)
        .bind(metadata.thumb_height)
        .bind(metadata.file_size)
        .bind(metadata.thumb_size)
        .bind(&metadata.extension)
        .bind(&metadata.mime_type)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_write_error)?
        .ok_or(MetadataError::NotFound(id))
    }

    async fn touch(&self, id: i64) -> Result<FileRecord, MetadataError> {
        sqlx::query_as::<_, FileRecord>(
            "UPDATE cdn_files SET updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(MetadataError::NotFound(id))
    }

    async fn delete(&self, id: i64) -> Result<(), MetadataError> {
        sqlx::query("DELETE FROM cdn_files WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
