use std::sync::Arc;

use bytes::Bytes;
use tracing::{error, info, warn};

use crate::{
    classifier::{classify, ContentInfo},
    database::MetadataStore,
    dedup::{self, Decision, ResolveMode},
    error::IngestError,
    filename::{ensure_extension, generate_random_filename, sanitize_filename, with_numeric_suffix},
    models::{FileMetadata, FileRecord, UploadRequest},
    storage::{validate_name, Namespace, Storage},
    transcoder::{transcode, TranscodeSettings, Transcoded},
    utils::{calculate_sha256, extension_in},
};

/// Attempts at resolve-and-apply before a unique-constraint conflict is
/// reported to the caller.
const MAX_CONFLICT_ATTEMPTS: u32 = 3;

/// Settings the pipeline is constructed with.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub max_file_size: usize,
    pub allowed_extensions: Vec<String>,
    pub thumbnail_extensions: Vec<String>,
    pub deduplicate_uploads: bool,
    pub normalize_filenames: bool,
    pub transcode: TranscodeSettings,
}

/// Everything derived from the submitted bytes. Independent of the name the
/// bytes end up stored under.
#[derive(Debug, Clone)]
pub(crate) struct Prepared {
    pub content: ContentInfo,
    pub transcoded: Transcoded,
    /// Hash of the bytes that will be stored, i.e. after any resize.
    pub hash: String,
}

impl Prepared {
    pub fn metadata(&self, filename: &str) -> FileMetadata {
        let t = &self.transcoded;
        let (thumb_filename, thumb_width, thumb_height, thumb_size) = match &t.thumbnail {
            Some(thumb) => (
                filename.to_string(),
                thumb.width as i32,
                thumb.height as i32,
                thumb.data.len() as i64,
            ),
            None => (String::new(), 0, 0, 0),
        };

        FileMetadata {
            filename: filename.to_string(),
            thumb_filename,
            file_hash: self.hash.clone(),
            original_width: t.original_width as i32,
            original_height: t.original_height as i32,
            width: t.width as i32,
            height: t.height as i32,
            thumb_width,
            thumb_height,
            file_size: t.data.len() as i64,
            thumb_size,
            extension: self.content.extension.clone(),
            mime_type: self.content.mime_type.clone(),
        }
    }
}

/// The ingestion pipeline. Keeps the blob store and the metadata store in
/// agreement; it is the only writer of either for a live record.
pub struct Ingestor {
    config: IngestConfig,
    pub(crate) metadata: Arc<dyn MetadataStore>,
    pub(crate) blobs: Arc<dyn Storage>,
}

impl Ingestor {
    pub fn new(config: IngestConfig, metadata: Arc<dyn MetadataStore>, blobs: Arc<dyn Storage>) -> Self {
        Self { config, metadata, blobs }
    }

    /// Ingest one upload and return the record that now represents it.
    pub async fn ingest(&self, request: UploadRequest) -> Result<FileRecord, IngestError> {
        let UploadRequest { data, filename, force } = request;

        self.check_size(&data)?;
        let prepared = self.prepare(data).await?;
        let filename = self.resolve_filename(&filename, &prepared.content.extension)?;
        let mode = ResolveMode {
            force,
            deduplicate: self.config.deduplicate_uploads,
        };

        let mut attempt = 1;
        loop {
            match self.resolve_and_apply(mode, &filename, &prepared).await {
                Err(err) if err.is_conflict() && attempt < MAX_CONFLICT_ATTEMPTS => {
                    warn!(attempt, filename = %filename, error = %err, "Concurrent ingest won a unique constraint, re-resolving");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn check_size(&self, data: &Bytes) -> Result<(), IngestError> {
        if data.is_empty() {
            return Err(IngestError::MissingPayload);
        }
        if data.len() > self.config.max_file_size {
            error!(
                "File size {} exceeds maximum limit of {} bytes",
                data.len(),
                self.config.max_file_size
            );
            return Err(IngestError::PayloadTooLarge {
                size: data.len(),
                max: self.config.max_file_size,
            });
        }
        Ok(())
    }

    /// Classify, enforce the allow-list, bound/thumbnail and hash.
    pub(crate) async fn prepare(&self, data: Bytes) -> Result<Prepared, IngestError> {
        let content = classify(&data);
        if !extension_in(&content.extension, &self.config.allowed_extensions) {
            error!("File extension .{} is not allowed", content.extension);
            return Err(IngestError::DisallowedExtension(content.extension));
        }

        let make_thumbnail =
            content.is_image && extension_in(&content.extension, &self.config.thumbnail_extensions);
        let settings = self.config.transcode;
        let task_content = content.clone();

        // Decode/resize/encode is CPU-bound; keep it off the async workers
        let transcoded = tokio::task::spawn_blocking(move || {
            transcode(data, &task_content, &settings, make_thumbnail)
        })
        .await??;

        let hash = calculate_sha256(&transcoded.data);
        Ok(Prepared { content, transcoded, hash })
    }

    /// Client name -> stored name. Falls back to a generated name when none
    /// was given or nothing usable survives sanitizing.
    fn resolve_filename(&self, requested: &str, extension: &str) -> Result<String, IngestError> {
        let requested = requested.trim();
        let filename = match sanitize_filename(requested, self.config.normalize_filenames) {
            Some(name) if !requested.is_empty() => ensure_extension(&name, extension),
            _ => generate_random_filename(extension),
        };

        match validate_name(&filename) {
            Ok(()) => Ok(filename),
            Err(_) if self.config.normalize_filenames => {
                warn!("Sanitized name {:?} is not storable, generating one", filename);
                Ok(generate_random_filename(extension))
            }
            // Un-normalized names go to the blob store verbatim
            Err(_) => Err(IngestError::Malformed(format!("unusable filename {:?}", filename))),
        }
    }

    async fn resolve_and_apply(
        &self,
        mode: ResolveMode,
        filename: &str,
        prepared: &Prepared,
    ) -> Result<FileRecord, IngestError> {
        let candidates = dedup::lookup(&*self.metadata, mode, filename, &prepared.hash).await?;
        let decision = dedup::decide(mode, filename, &prepared.hash, candidates);
        info!(decision = %decision, filename = %filename, hash = %prepared.hash, force = mode.force, "Resolved upload");

        match decision {
            Decision::AdoptExisting { record, discard } => {
                if let Some(target) = discard {
                    self.remove(&target).await?;
                }
                Ok(self.metadata.touch(record.id).await?)
            }
            Decision::ReplaceInPlace { target } => self.replace(&target, &target.filename, prepared).await,
            Decision::UpdateInPlace { existing, filename, needs_suffix } => {
                let filename = if needs_suffix {
                    self.unique_filename(&filename).await?
                } else {
                    filename
                };
                self.replace(&existing, &filename, prepared).await
            }
            Decision::RenameAndCreate { filename } => {
                let filename = self.unique_filename(&filename).await?;
                self.create(&filename, prepared).await
            }
            Decision::CreateNew { filename } => self.create(&filename, prepared).await,
        }
    }

    /// First `<stem>_<n>.<ext>` (n >= 2) no record holds.
    async fn unique_filename(&self, filename: &str) -> Result<String, IngestError> {
        let mut counter = 2;
        loop {
            let candidate = with_numeric_suffix(filename, counter);
            if self.metadata.find_by_filename(&candidate).await?.is_none() {
                return Ok(candidate);
            }
            counter += 1;
        }
    }

    async fn write_blobs(&self, filename: &str, prepared: &Prepared) -> Result<(), IngestError> {
        self.blobs
            .write(Namespace::Images, filename, prepared.transcoded.data.clone())
            .await?;
        if let Some(thumb) = &prepared.transcoded.thumbnail {
            self.blobs
                .write(Namespace::Thumbnails, filename, thumb.data.clone())
                .await?;
        }
        Ok(())
    }

    async fn delete_blobs(&self, record: &FileRecord) -> Result<(), IngestError> {
        self.blobs.delete(Namespace::Images, &record.filename).await?;
        if record.has_thumbnail() {
            self.blobs
                .delete(Namespace::Thumbnails, &record.thumb_filename)
                .await?;
        }
        Ok(())
    }

    /// Delete the blobs `record` held under a name it no longer owns, unless
    /// another row has claimed that name since.
    async fn release_blobs(&self, record: &FileRecord) -> Result<(), IngestError> {
        if self.metadata.find_by_filename(&record.filename).await?.is_some() {
            info!(filename = %record.filename, "Name reclaimed by another record, keeping its blobs");
            return Ok(());
        }
        self.delete_blobs(record)
            .await
            .map_err(|err| orphaned(record, err))
    }

    async fn remove(&self, record: &FileRecord) -> Result<(), IngestError> {
        info!(id = record.id, filename = %record.filename, "Removing record superseded by existing content");
        self.metadata.delete(record.id).await?;
        self.release_blobs(record).await
    }

    /// The row claims the filename before any blob is written, so a request
    /// that loses a unique-constraint race never touches another record's
    /// blobs.
    async fn create(&self, filename: &str, prepared: &Prepared) -> Result<FileRecord, IngestError> {
        let record = self.metadata.insert(&prepared.metadata(filename)).await?;

        if let Err(err) = self.write_blobs(filename, prepared).await {
            error!(id = record.id, filename = %filename, error = %err, "Blob write failed, rolling back record");
            return Err(self.roll_back_create(&record, err).await);
        }

        info!(id = record.id, filename = %record.filename, size = record.file_size, "File stored");
        Ok(record)
    }

    /// Undo a create whose blobs could not be written. Returns the error to
    /// report: the original one when both stores are clean again.
    async fn roll_back_create(&self, record: &FileRecord, err: IngestError) -> IngestError {
        if let Err(cleanup) = self.delete_blobs(record).await {
            warn!(id = record.id, error = %cleanup, "Could not delete partial blobs");
            return orphaned(record, err);
        }
        match self.metadata.delete(record.id).await {
            Ok(()) => err,
            Err(cleanup) => {
                warn!(id = record.id, error = %cleanup, "Could not delete record");
                orphaned(record, err)
            }
        }
    }

    /// Rewrite `existing` to describe `prepared` stored under `filename`.
    /// The row is updated first; a conflicting update leaves both stores
    /// untouched.
    async fn replace(
        &self,
        existing: &FileRecord,
        filename: &str,
        prepared: &Prepared,
    ) -> Result<FileRecord, IngestError> {
        let record = self
            .metadata
            .update(existing.id, &prepared.metadata(filename))
            .await?;

        self.rewrite_blobs(existing, &record, prepared)
            .await
            .map_err(|err| orphaned(&record, err))?;

        if existing.filename != record.filename {
            self.release_blobs(existing).await?;
        }

        info!(id = record.id, filename = %record.filename, size = record.file_size, "File replaced");
        Ok(record)
    }

    async fn rewrite_blobs(
        &self,
        existing: &FileRecord,
        record: &FileRecord,
        prepared: &Prepared,
    ) -> Result<(), IngestError> {
        let same_name = existing.filename == record.filename;
        if same_name && existing.has_thumbnail() && !record.has_thumbnail() {
            self.blobs
                .delete(Namespace::Thumbnails, &existing.thumb_filename)
                .await?;
        }
        self.write_blobs(&record.filename, prepared).await
    }
}

/// The metadata store describes `record` but its blobs may be missing,
/// partial or stale. Nothing reconciles this later.
fn orphaned(record: &FileRecord, source: IngestError) -> IngestError {
    let mut paths = vec![Namespace::Images.key(&record.filename)];
    if record.has_thumbnail() {
        paths.push(Namespace::Thumbnails.key(&record.thumb_filename));
    }
    error!(
        orphaned_blob = %paths.join(", "),
        id = record.id,
        error = %source,
        "Blob and metadata stores disagree"
    );
    IngestError::Orphaned {
        paths,
        source: Box::new(source),
    }
}
