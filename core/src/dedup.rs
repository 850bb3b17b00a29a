//! In-memory duplicate index rebuilt from the dataset tree on every run.

use crate::fingerprint::{self, ContentHash};
use crate::storage::{DatasetStorage, Partition, StorageError};
use rustc_hash::FxHashSet;
use tracing::{debug, info, warn};

/// Why a candidate image was considered a duplicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DuplicateKind {
    /// A file with the same name already exists under the label.
    Name,
    /// Byte-identical content is already stored somewhere in the dataset.
    Content,
}

/// Known content hashes across the pending and confirmed partitions.
///
/// The index is owned by a single driver; callers that process images in
/// parallel must wrap it in a lock and hold it across check and record.
#[derive(Debug, Default)]
pub struct DuplicateIndex {
    hashes: FxHashSet<ContentHash>,
}

impl DuplicateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the index and rebuilds it from every stored image.
    ///
    /// Unreadable files are logged and skipped. A partition that exists but
    /// cannot be listed aborts initialisation.
    pub fn initialize(&mut self, storage: &dyn DatasetStorage) -> Result<(), StorageError> {
        self.hashes.clear();
        for partition in Partition::ALL {
            let files = storage.list_image_files(partition)?;
            let mut indexed = 0usize;
            for path in files {
                match storage.read(&path) {
                    Ok(bytes) => {
                        self.hashes.insert(fingerprint::hash(&bytes));
                        indexed += 1;
                    }
                    Err(error) => {
                        warn!(
                            path = %path.display(),
                            %error,
                            "skipping unreadable image during index rebuild"
                        );
                    }
                }
            }
            debug!(partition = %partition, files = indexed, "indexed partition");
        }
        info!(hashes = self.hashes.len(), "duplicate index ready");
        Ok(())
    }

    /// Returns which check matched, if any.
    ///
    /// The name probe runs first and wins even for content never seen before.
    pub fn check(
        &self,
        storage: &dyn DatasetStorage,
        bytes: &[u8],
        file_name: &str,
        label: &str,
    ) -> Result<Option<DuplicateKind>, StorageError> {
        for partition in Partition::ALL {
            if storage.exists(file_name, label, partition)? {
                return Ok(Some(DuplicateKind::Name));
            }
        }
        if self.hashes.contains(&fingerprint::hash(bytes)) {
            return Ok(Some(DuplicateKind::Content));
        }
        Ok(None)
    }

    pub fn is_duplicate(
        &self,
        storage: &dyn DatasetStorage,
        bytes: &[u8],
        file_name: &str,
        label: &str,
    ) -> Result<bool, StorageError> {
        Ok(self.check(storage, bytes, file_name, label)?.is_some())
    }

    /// Marks `bytes` as known. Call only after the image was persisted.
    pub fn record_accepted(&mut self, bytes: &[u8]) {
        self.hashes.insert(fingerprint::hash(bytes));
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.hashes.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}
