//! Offline duplicate audit of the stored dataset.
//!
//! Every image in both partitions is hashed and grouped by content. Within a
//! group the keeper comes first: a confirmed copy if one exists, otherwise
//! the first pending copy in path order.

use crate::config::ThreadingMode;
use crate::fingerprint::{self, ContentHash};
use crate::storage::{DatasetStorage, Partition, StorageError};
use indicatif::ProgressBar;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

type HashGroups = FxHashMap<ContentHash, Vec<AuditEntry>>;

/// A stored image that belongs to a duplicate group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub path: PathBuf,
    pub partition: Partition,
    pub size_bytes: u64,
}

/// Files sharing one content hash, keeper first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub hash: ContentHash,
    pub files: Vec<AuditEntry>,
}

impl DuplicateGroup {
    pub fn keeper(&self) -> Option<&AuditEntry> {
        self.files.first()
    }

    /// Pending copies other than the keeper. Confirmed files never qualify.
    pub fn redundant_pending(&self) -> impl Iterator<Item = &AuditEntry> {
        self.files
            .iter()
            .skip(1)
            .filter(|entry| entry.partition == Partition::Pending)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub scanned: usize,
    pub unreadable: usize,
    /// Only groups with more than one file, ordered by keeper path.
    pub groups: Vec<DuplicateGroup>,
}

impl AuditSummary {
    pub fn redundant_files(&self) -> usize {
        self.groups
            .iter()
            .map(|group| group.redundant_pending().count())
            .sum()
    }

    pub fn is_clean(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Lists both partitions and groups every image by content hash.
pub fn audit<S>(
    storage: &S,
    threading: ThreadingMode,
    progress_bar: &ProgressBar,
) -> Result<AuditSummary, StorageError>
where
    S: DatasetStorage + Sync,
{
    let mut files = Vec::new();
    for partition in Partition::ALL {
        files.extend(
            storage
                .list_image_files(partition)?
                .into_iter()
                .map(|path| (partition, path)),
        );
    }
    progress_bar.set_length(files.len() as u64);
    let scanned = files.len();

    let (map, unreadable) = match threading {
        ThreadingMode::Parallel => files
            .into_par_iter()
            .map(|(partition, path)| hash_entry(storage, partition, path, progress_bar))
            .fold(
                || (HashGroups::default(), 0usize),
                |(mut map, unreadable), record| match record {
                    Some((hash, entry)) => {
                        map.entry(hash).or_default().push(entry);
                        (map, unreadable)
                    }
                    None => (map, unreadable + 1),
                },
            )
            .reduce(|| (HashGroups::default(), 0usize), merge_maps),
        ThreadingMode::Sequential => {
            let mut map = HashGroups::default();
            let mut unreadable = 0usize;
            for (partition, path) in files {
                match hash_entry(storage, partition, path, progress_bar) {
                    Some((hash, entry)) => map.entry(hash).or_default().push(entry),
                    None => unreadable += 1,
                }
            }
            (map, unreadable)
        }
    };

    let summary = AuditSummary {
        scanned,
        unreadable,
        groups: group_duplicates(map),
    };
    info!(
        scanned = summary.scanned,
        groups = summary.groups.len(),
        redundant = summary.redundant_files(),
        "audit complete"
    );
    Ok(summary)
}

fn hash_entry<S: DatasetStorage>(
    storage: &S,
    partition: Partition,
    path: PathBuf,
    progress_bar: &ProgressBar,
) -> Option<(ContentHash, AuditEntry)> {
    progress_bar.inc(1);
    progress_bar.set_message(format!("Hashing: {}", path.display()));
    match storage.read(&path) {
        Ok(bytes) => Some((
            fingerprint::hash(&bytes),
            AuditEntry {
                path,
                partition,
                size_bytes: bytes.len() as u64,
            },
        )),
        Err(error) => {
            warn!(%error, "skipping unreadable image");
            None
        }
    }
}

fn merge_maps(
    (mut left, left_unreadable): (HashGroups, usize),
    (right, right_unreadable): (HashGroups, usize),
) -> (HashGroups, usize) {
    for (hash, mut entries) in right {
        left.entry(hash).or_default().append(&mut entries);
    }
    (left, left_unreadable + right_unreadable)
}

fn group_duplicates(map: HashGroups) -> Vec<DuplicateGroup> {
    let mut groups: Vec<DuplicateGroup> = map
        .into_iter()
        .filter(|(_, files)| files.len() > 1)
        .map(|(hash, mut files)| {
            files.sort_by(|a, b| {
                (a.partition != Partition::Confirmed, &a.path)
                    .cmp(&(b.partition != Partition::Confirmed, &b.path))
            });
            DuplicateGroup { hash, files }
        })
        .collect();
    groups.sort_by(|a, b| a.files[0].path.cmp(&b.files[0].path));
    groups
}
