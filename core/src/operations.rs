use crate::audit::AuditSummary;
use indicatif::ProgressBar;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MoveStats {
    pub moved: usize,
}

#[derive(Debug, Error)]
pub enum MoveError {
    #[error("failed to move {}: {source}", .path.display())]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("file name not found for {}", .0.display())]
    MissingFileName(PathBuf),
}

/// Moves every redundant pending copy into `target_directory`.
///
/// Keepers and confirmed files stay where they are. Name clashes in the
/// target get a ` (n)` suffix.
pub fn move_redundant(
    summary: &AuditSummary,
    target_directory: &Path,
    progress_bar: &ProgressBar,
) -> Result<MoveStats, MoveError> {
    fs::create_dir_all(target_directory).map_err(|source| MoveError::Io {
        source,
        path: target_directory.to_path_buf(),
    })?;
    progress_bar.set_length(summary.redundant_files() as u64);

    let mut moved = 0;
    for entry in summary
        .groups
        .iter()
        .flat_map(|group| group.redundant_pending())
    {
        let source = &entry.path;
        let destination = resolve_destination(target_directory, source)?;
        fs::rename(source, &destination).map_err(|error| MoveError::Io {
            source: error,
            path: source.clone(),
        })?;
        debug!(from = %source.display(), to = %destination.display(), "moved duplicate");
        moved += 1;
        progress_bar.inc(1);
        progress_bar.set_message(format!("Moving: {}", destination.display()));
    }

    progress_bar.finish_with_message("File moving complete");
    Ok(MoveStats { moved })
}

fn resolve_destination(target_directory: &Path, source: &Path) -> Result<PathBuf, MoveError> {
    let file_name = source
        .file_name()
        .ok_or_else(|| MoveError::MissingFileName(source.to_path_buf()))?;

    let candidate = target_directory.join(file_name);
    if !candidate.exists() {
        return Ok(candidate);
    }

    let stem = source
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("file");
    let extension = source.extension().and_then(|ext| ext.to_str());

    (1..)
        .map(|index| {
            let name = match extension {
                Some(ext) => format!("{} ({}).{}", stem, index, ext),
                None => format!("{} ({})", stem, index),
            };
            target_directory.join(name)
        })
        .find(|candidate| !candidate.exists())
        .ok_or_else(|| MoveError::MissingFileName(source.to_path_buf()))
}
