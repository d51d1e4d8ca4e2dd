use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use chrono::{DateTime, Utc};


/// One stored asset, as held by the metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FileRecord {
    pub id: i64,
    pub filename: String,
    /// Same as `filename` when a thumbnail exists, empty otherwise.
    pub thumb_filename: String,
    pub file_hash: String,
    pub original_width: i32,
    pub original_height: i32,
    pub width: i32,
    pub height: i32,
    pub thumb_width: i32,
    pub thumb_height: i32,
    pub file_size: i64,
    pub thumb_size: i64,
    pub extension: String,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn has_thumbnail(&self) -> bool {
        !self.thumb_filename.is_empty()
    }
}

/// Every column derived from the stored bytes. Used both to create a row
/// and to rewrite one in place; `id` and `created_at` are never part of it.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMetadata {
    pub filename: String,
    pub thumb_filename: String,
    pub file_hash: String,
    pub original_width: i32,
    pub original_height: i32,
    pub width: i32,
    pub height: i32,
    pub thumb_width: i32,
    pub thumb_height: i32,
    pub file_size: i64,
    pub thumb_size: i64,
    pub extension: String,
    pub mime_type: String,
}

impl From<&FileRecord> for FileMetadata {
    fn from(record: &FileRecord) -> Self {
        Self {
            filename: record.filename.clone(),
            thumb_filename: record.thumb_filename.clone(),
            file_hash: record.file_hash.clone(),
            original_width: record.original_width,
            original_height: record.original_height,
            width: record.width,
            height: record.height,
            thumb_width: record.thumb_width,
            thumb_height: record.thumb_height,
            file_size: record.file_size,
            thumb_size: record.thumb_size,
            extension: record.extension.clone(),
            mime_type: record.mime_type.clone(),
        }
    }
}

/// Transport-agnostic ingestion request.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub data: bytes::Bytes,
    /// Client-supplied name; empty means "generate one".
    pub filename: String,
    pub force: bool,
}

/// JSON upload body: `image` holds plain base64 or a `data:` URL.
#[derive(Debug, Deserialize)]
pub struct Base64Upload {
    pub image: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct FileUrls {
    pub image: String,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FileResponse {
    #[serde(flatten)]
    pub record: FileRecord,
    pub urls: FileUrls,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub data: FileResponse,
}
