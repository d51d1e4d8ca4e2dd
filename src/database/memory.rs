//! In-memory metadata store used by the pipeline tests. Enforces the same
//! unique constraints as the `cdn_files` migration.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use super::{MetadataError, MetadataStore};
use crate::models::{FileMetadata, FileRecord};

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<FileRecord>>,
    next_id: Mutex<i64>,
    fail_writes: AtomicBool,
    /// A competing row slipped in just before the next insert, as a
    /// concurrent request on another instance would.
    racer: Mutex<Option<FileMetadata>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<FileRecord> {
        self.rows.lock().unwrap().clone()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn race_next_insert(&self, competitor: FileMetadata) {
        *self.racer.lock().unwrap() = Some(competitor);
    }

    fn check_writable(&self) -> Result<(), MetadataError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(MetadataError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn check_unique(
        rows: &[FileRecord],
        metadata: &FileMetadata,
        own_id: Option<i64>,
    ) -> Result<(), MetadataError> {
        for row in rows.iter().filter(|r| Some(r.id) != own_id) {
            if row.filename == metadata.filename {
                return Err(MetadataError::Conflict(format!("filename {}", row.filename)));
            }
            if row.file_hash == metadata.file_hash {
                return Err(MetadataError::Conflict(format!("file_hash {}", row.file_hash)));
            }
        }
        Ok(())
    }

    fn insert_row(&self, rows: &mut Vec<FileRecord>, metadata: &FileMetadata) -> Result<FileRecord, MetadataError> {
        Self::check_unique(rows, metadata, None)?;
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let now = Utc::now();
        let record = apply(
            FileRecord {
                id: *next_id,
                created_at: now,
                updated_at: now,
                ..blank()
            },
            metadata,
        );
        rows.push(record.clone());
        Ok(record)
    }
}

fn blank() -> FileRecord {
    let now = Utc::now();
    FileRecord {
        id: 0,
        filename: String::new(),
        thumb_filename: String::new(),
        file_hash: String::new(),
        original_width: 0,
        original_height: 0,
        width: 0,
        height: 0,
        thumb_width: 0,
        thumb_height: 0,
        file_size: 0,
        thumb_size: 0,
        extension: String::new(),
        mime_type: String::new(),
        created_at: now,
        updated_at: now,
    }
}

fn apply(mut record: FileRecord, m: &FileMetadata) -> FileRecord {
    record.filename = m.filename.clone();
    record.thumb_filename = m.thumb_filename.clone();
    record.file_hash = m.file_hash.clone();
    record.original_width = m.original_width;
    record.original_height = m.original_height;
    record.width = m.width;
    record.height = m.height;
    record.thumb_width = m.thumb_width;
    record.thumb_height = m.thumb_height;
    record.file_size = m.file_size;
    record.thumb_size = m.thumb_size;
    record.extension = m.extension.clone();
    record.mime_type = m.mime_type.clone();
    record
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<FileRecord>, MetadataError> {
        Ok(self.rows.lock().unwrap().iter().find(|r| r.id == id).cloned())
    }

    async fn find_by_filename(&self, filename: &str) -> Result<Option<FileRecord>, MetadataError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.filename == filename)
            .cloned())
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<FileRecord>, MetadataError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.file_hash == hash)
            .cloned())
    }

    async fn find_by_hash_excluding(
        &self,
        hash: &str,
        excluded_id: i64,
    ) -> Result<Option<FileRecord>, MetadataError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.file_hash == hash && r.id != excluded_id)
            .cloned())
    }

    async fn count_by_hash_excluding_filename(
        &self,
        hash: &str,
        filename: &str,
    ) -> Result<i64, MetadataError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.file_hash == hash && r.filename != filename)
            .count() as i64)
    }

    async fn insert(&self, metadata: &FileMetadata) -> Result<FileRecord, MetadataError> {
        self.check_writable()?;
        let mut rows = self.rows.lock().unwrap();
        if let Some(competitor) = self.racer.lock().unwrap().take() {
            self.insert_row(&mut rows, &competitor)?;
        }
        self.insert_row(&mut rows, metadata)
    }

    async fn update(&self, id: i64, metadata: &FileMetadata) -> Result<FileRecord, MetadataError> {
        self.check_writable()?;
        let mut rows = self.rows.lock().unwrap();
        Self::check_unique(&rows, metadata, Some(id))?;
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(MetadataError::NotFound(id))?;
        *row = apply(row.clone(), metadata);
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn touch(&self, id: i64) -> Result<FileRecord, MetadataError> {
        self.check_writable()?;
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(MetadataError::NotFound(id))?;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn delete(&self, id: i64) -> Result<(), MetadataError> {
        self.check_writable()?;
        self.rows.lock().unwrap().retain(|r| r.id != id);
        Ok(())
    }
}
