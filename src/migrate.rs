//! Backfill: reconcile blobs already sitting in the images namespace with
//! the metadata store.

use tracing::{info, warn};

use crate::{
    error::{ErrorKind, IngestError},
    ingest::{Ingestor, Prepared},
    models::{FileMetadata, FileRecord},
    storage::Namespace,
    transcoder,
};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub thumbnails_created: usize,
    pub skipped: usize,
}

enum Outcome {
    Created { thumbnail_created: bool },
    Updated { thumbnail_created: bool },
    Skipped,
}

impl Ingestor {
    /// Walk every full-size blob and make sure it has an accurate record and,
    /// where eligible, a thumbnail. Unreadable or disallowed blobs are
    /// skipped; store failures abort the run.
    pub async fn backfill(&self) -> Result<MigrationReport, IngestError> {
        let names = self.blobs.list(Namespace::Images).await?;
        let total = names.len();
        let mut report = MigrationReport::default();
        info!("Starting migration of {} files", total);

        for (index, name) in names.into_iter().enumerate() {
            report.processed += 1;
            info!("[{}/{}] Processing {}", index + 1, total, name);

            match self.backfill_one(&name).await? {
                Outcome::Created { thumbnail_created } => {
                    report.created += 1;
                    report.thumbnails_created += thumbnail_created as usize;
                }
                Outcome::Updated { thumbnail_created } => {
                    report.updated += 1;
                    report.thumbnails_created += thumbnail_created as usize;
                }
                Outcome::Skipped => report.skipped += 1,
            }
        }

        info!(
            processed = report.processed,
            created = report.created,
            updated = report.updated,
            thumbnails_created = report.thumbnails_created,
            skipped = report.skipped,
            "Migration completed"
        );
        Ok(report)
    }

    async fn backfill_one(&self, name: &str) -> Result<Outcome, IngestError> {
        let data = self.blobs.read(Namespace::Images, name).await?;

        let prepared = match self.prepare(data).await {
            Ok(prepared) => prepared,
            Err(err) if matches!(err.kind(), ErrorKind::Input | ErrorKind::Decode) => {
                warn!("Skipping {}: {}", name, err);
                return Ok(Outcome::Skipped);
            }
            Err(err) => return Err(err),
        };

        if prepared.transcoded.resized {
            info!(
                "Resized {} from {}x{} to {}x{}",
                name,
                prepared.transcoded.original_width,
                prepared.transcoded.original_height,
                prepared.transcoded.width,
                prepared.transcoded.height
            );
            self.blobs
                .write(Namespace::Images, name, prepared.transcoded.data.clone())
                .await?;
        }

        let by_name = self.metadata.find_by_filename(name).await?;
        let by_hash = self.metadata.find_by_hash(&prepared.hash).await?;

        match (by_name, by_hash) {
            (None, None) => self.backfill_create(name, &prepared).await,
            (None, Some(existing)) => {
                info!("Content of {} already recorded as {}, re-pointing record", name, existing.filename);
                let thumbnail_created = self.ensure_thumbnail(name, &prepared).await?;
                self.metadata
                    .update(existing.id, &prepared.metadata(name))
                    .await?;
                Ok(Outcome::Updated { thumbnail_created })
            }
            (Some(record), _) => self.backfill_refresh(name, record, &prepared).await,
        }
    }

    async fn backfill_create(&self, name: &str, prepared: &Prepared) -> Result<Outcome, IngestError> {
        let mut metadata = prepared.metadata(name);
        let mut thumbnail_created = false;

        if prepared.transcoded.thumbnail.is_some() {
            match self.existing_thumbnail(name).await? {
                Some((width, height, size)) => {
                    metadata.thumb_width = width;
                    metadata.thumb_height = height;
                    metadata.thumb_size = size;
                }
                None => thumbnail_created = self.ensure_thumbnail(name, prepared).await?,
            }
        }

        match self.metadata.insert(&metadata).await {
            Ok(record) => {
                info!(id = record.id, "Record created for {}", name);
                Ok(Outcome::Created { thumbnail_created })
            }
            Err(err) if err.is_conflict() => {
                warn!("Record for {} conflicts with an existing one, skipping: {}", name, err);
                Ok(Outcome::Skipped)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn backfill_refresh(
        &self,
        name: &str,
        record: FileRecord,
        prepared: &Prepared,
    ) -> Result<Outcome, IngestError> {
        let current = FileMetadata::from(&record);
        let mut metadata = current.clone();

        let elsewhere = self
            .metadata
            .count_by_hash_excluding_filename(&prepared.hash, name)
            .await?;
        if elsewhere > 0 {
            warn!("Hash of {} already belongs to another record, keeping old hash", name);
        } else {
            let fresh = prepared.metadata(name);
            metadata.file_hash = fresh.file_hash;
            metadata.file_size = fresh.file_size;
            metadata.width = fresh.width;
            metadata.height = fresh.height;
            metadata.original_width = fresh.original_width;
            metadata.original_height = fresh.original_height;
        }

        let thumbnail_created = self.ensure_thumbnail(name, prepared).await?;
        if thumbnail_created {
            let fresh = prepared.metadata(name);
            metadata.thumb_filename = fresh.thumb_filename;
            metadata.thumb_width = fresh.thumb_width;
            metadata.thumb_height = fresh.thumb_height;
            metadata.thumb_size = fresh.thumb_size;
        }

        if metadata == current {
            self.metadata.touch(record.id).await?;
        } else {
            self.metadata.update(record.id, &metadata).await?;
        }
        Ok(Outcome::Updated { thumbnail_created })
    }

    /// Write the derived thumbnail unless one is already stored.
    async fn ensure_thumbnail(&self, name: &str, prepared: &Prepared) -> Result<bool, IngestError> {
        let Some(thumb) = &prepared.transcoded.thumbnail else {
            return Ok(false);
        };
        if self.blobs.exists(Namespace::Thumbnails, name).await? {
            return Ok(false);
        }
        self.blobs
            .write(Namespace::Thumbnails, name, thumb.data.clone())
            .await?;
        info!("Created thumbnail for {}", name);
        Ok(true)
    }

    /// Dimensions and size of a thumbnail already in the store, if any.
    async fn existing_thumbnail(&self, name: &str) -> Result<Option<(i32, i32, i64)>, IngestError> {
        if !self.blobs.exists(Namespace::Thumbnails, name).await? {
            return Ok(None);
        }
        let data = self.blobs.read(Namespace::Thumbnails, name).await?;
        match transcoder::dimensions(&data) {
            Ok((width, height)) => Ok(Some((width as i32, height as i32, data.len() as i64))),
            Err(err) => {
                warn!("Existing thumbnail for {} is unreadable, regenerating: {}", name, err);
                Ok(None)
            }
        }
    }
}
