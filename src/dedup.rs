//! Reconciles a submitted (filename, content hash) pair against what the
//! metadata store already holds.
//!
//! [`decide`] is pure: it sees the two candidate rows and returns a
//! [`Decision`]. The ingestion pipeline gathers the rows with [`lookup`]
//! and applies the side effects.

use std::fmt;

use crate::database::{MetadataError, MetadataStore};
use crate::models::FileRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveMode {
    /// Client asked to overwrite the record at its filename.
    pub force: bool,
    /// Identical content returns the existing record instead of rewriting it.
    pub deduplicate: bool,
}

/// Rows relevant to one ingest.
#[derive(Debug, Clone, Default)]
pub struct Candidates {
    /// Row holding the desired filename.
    pub by_name: Option<FileRecord>,
    /// Row holding the content hash. In force mode this never is `by_name`.
    pub by_hash: Option<FileRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Serve `record` as-is after refreshing `updated_at`. When `discard`
    /// is set, that row and its blobs are removed first.
    AdoptExisting {
        record: FileRecord,
        discard: Option<FileRecord>,
    },
    /// Overwrite the blobs of `target` under its own filename and rewrite
    /// every derived column, hash included. `id` and `filename` stay.
    ReplaceInPlace { target: FileRecord },
    /// Name taken by different content: create under the first free
    /// `<stem>_<n>.<ext>` derived from `filename`.
    RenameAndCreate { filename: String },
    /// Same content re-submitted under another name with deduplication off:
    /// move `existing` to `filename`, rewriting its blobs. When
    /// `needs_suffix` is set another row owns `filename`, so a free
    /// suffixed name is used instead.
    UpdateInPlace {
        existing: FileRecord,
        filename: String,
        needs_suffix: bool,
    },
    CreateNew { filename: String },
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::AdoptExisting { discard: None, .. } => "adopt_existing",
            Decision::AdoptExisting { discard: Some(_), .. } => "adopt_existing_discard_target",
            Decision::ReplaceInPlace { .. } => "replace_in_place",
            Decision::RenameAndCreate { .. } => "rename_and_create",
            Decision::UpdateInPlace { .. } => "update_in_place",
            Decision::CreateNew { .. } => "create_new",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Fetch the rows [`decide`] needs.
///
/// In force mode the hash lookup skips the row at the desired filename, so a
/// target holding the same content is only ever seen through `by_name`.
pub async fn lookup<S>(
    store: &S,
    mode: ResolveMode,
    filename: &str,
    hash: &str,
) -> Result<Candidates, MetadataError>
where
    S: MetadataStore + ?Sized,
{
    let by_name = store.find_by_filename(filename).await?;
    let by_hash = match (&by_name, mode.force) {
        (Some(target), true) => store.find_by_hash_excluding(hash, target.id).await?,
        _ => store.find_by_hash(hash).await?,
    };
    Ok(Candidates { by_name, by_hash })
}

pub fn decide(mode: ResolveMode, filename: &str, hash: &str, candidates: Candidates) -> Decision {
    let Candidates { by_name, by_hash } = candidates;

    if mode.force {
        return match (by_name, by_hash) {
            // Filename is free: content already stored elsewhere wins and the
            // requested name is dropped.
            (None, Some(existing)) => Decision::AdoptExisting {
                record: existing,
                discard: None,
            },
            (None, None) => Decision::CreateNew {
                filename: filename.to_string(),
            },
            (Some(target), _) if target.file_hash == hash => Decision::ReplaceInPlace { target },
            // Incoming content already lives under another name: the target
            // goes away and the other record is served.
            (Some(target), Some(elsewhere)) => Decision::AdoptExisting {
                record: elsewhere,
                discard: Some(target),
            },
            (Some(target), None) => Decision::ReplaceInPlace { target },
        };
    }

    match (by_hash, by_name) {
        (Some(existing), _) if mode.deduplicate => Decision::AdoptExisting {
            record: existing,
            discard: None,
        },
        (Some(existing), by_name) => {
            let needs_suffix = by_name.is_some_and(|owner| owner.id != existing.id);
            Decision::UpdateInPlace {
                existing,
                filename: filename.to_string(),
                needs_suffix,
            }
        }
        (None, Some(_)) => Decision::RenameAndCreate {
            filename: filename.to_string(),
        },
        (None, None) => Decision::CreateNew {
            filename: filename.to_string(),
        },
    }
}
