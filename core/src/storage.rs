//! Label-partitioned dataset storage.
//!
//! Images live under `<root>/<partition>/<label>/<file_name>`. New images are
//! always written into the pending partition; promotion into the confirmed
//! partition happens outside this crate.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// The two storage areas of the dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    /// Machine-labelled, not yet reviewed.
    Pending,
    /// Reviewed and approved by an operator.
    Confirmed,
}

impl Partition {
    pub const ALL: [Partition; 2] = [Partition::Pending, Partition::Confirmed];
}

impl Display for Partition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Confirmed => write!(f, "confirmed"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error for {}: {source}", .path.display())]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to walk {}: {source}", .path.display())]
    Walk {
        source: walkdir::Error,
        path: PathBuf,
    },
    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),
}

/// Persistence operations the pipeline needs from the dataset tree.
pub trait DatasetStorage {
    /// Returns whether `file_name` already exists under `label` in `partition`.
    fn exists(&self, file_name: &str, label: &str, partition: Partition)
        -> Result<bool, StorageError>;

    /// Writes `bytes` into the pending partition under `label`.
    fn save(&self, bytes: &[u8], file_name: &str, label: &str) -> Result<PathBuf, StorageError>;

    /// Lists every supported image file below `partition`, recursively.
    fn list_image_files(&self, partition: Partition) -> Result<Vec<PathBuf>, StorageError>;

    /// Reads a file previously returned by [`DatasetStorage::list_image_files`].
    fn read(&self, path: &Path) -> Result<Vec<u8>, StorageError>;
}

/// Filesystem-backed dataset tree.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
    pending_dir: String,
    confirmed_dir: String,
    extensions: Vec<String>,
}

impl LocalStorage {
    pub fn new(
        root: impl Into<PathBuf>,
        pending_dir: impl Into<String>,
        confirmed_dir: impl Into<String>,
        extensions: Vec<String>,
    ) -> Self {
        Self {
            root: root.into(),
            pending_dir: pending_dir.into(),
            confirmed_dir: confirmed_dir.into(),
            extensions: extensions.into_iter().map(|ext| ext.to_lowercase()).collect(),
        }
    }

    /// Directory that holds `partition`.
    pub fn partition_dir(&self, partition: Partition) -> PathBuf {
        match partition {
            Partition::Pending => self.root.join(&self.pending_dir),
            Partition::Confirmed => self.root.join(&self.confirmed_dir),
        }
    }

    fn label_dir(&self, label: &str, partition: Partition) -> Result<PathBuf, StorageError> {
        validate_component(label)?;
        Ok(self.partition_dir(partition).join(label))
    }
}

impl DatasetStorage for LocalStorage {
    fn exists(
        &self,
        file_name: &str,
        label: &str,
        partition: Partition,
    ) -> Result<bool, StorageError> {
        validate_component(file_name)?;
        let path = self.label_dir(label, partition)?.join(file_name);
        path.try_exists()
            .map_err(|source| StorageError::Io { source, path })
    }

    fn save(&self, bytes: &[u8], file_name: &str, label: &str) -> Result<PathBuf, StorageError> {
        validate_component(file_name)?;
        let directory = self.label_dir(label, Partition::Pending)?;
        fs::create_dir_all(&directory).map_err(|source| StorageError::Io {
            source,
            path: directory.clone(),
        })?;
        let path = directory.join(file_name);
        fs::write(&path, bytes).map_err(|source| StorageError::Io {
            source,
            path: path.clone(),
        })?;
        debug!(path = %path.display(), "saved image");
        Ok(path)
    }

    fn list_image_files(&self, partition: Partition) -> Result<Vec<PathBuf>, StorageError> {
        let directory = self.partition_dir(partition);
        if !directory.exists() {
            debug!(partition = %partition, "partition directory missing, treating as empty");
            return Ok(Vec::new());
        }
        // Surface an unreadable partition root instead of silently returning nothing.
        fs::read_dir(&directory).map_err(|source| StorageError::Io {
            source,
            path: directory.clone(),
        })?;

        let mut files = Vec::new();
        for entry in WalkDir::new(&directory).sort_by_file_name() {
            match entry {
                Ok(entry) => {
                    let path = entry.path();
                    if entry.file_type().is_file() && has_image_extension(path, &self.extensions) {
                        files.push(path.to_path_buf());
                    }
                }
                Err(error) if error.depth() == 0 => {
                    return Err(StorageError::Walk {
                        source: error,
                        path: directory,
                    });
                }
                Err(error) => {
                    warn!(partition = %partition, %error, "skipping unreadable entry");
                }
            }
        }
        Ok(files)
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
        fs::read(path).map_err(|source| StorageError::Io {
            source,
            path: path.to_path_buf(),
        })
    }
}

/// Checks whether `path` carries one of the (lowercase) `extensions`.
pub fn has_image_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lower = ext.to_lowercase();
            extensions.iter().any(|candidate| candidate == &lower)
        })
        .unwrap_or(false)
}

fn validate_component(name: &str) -> Result<(), StorageError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\');
    if invalid {
        return Err(StorageError::InvalidFileName(name.to_string()));
    }
    Ok(())
}
