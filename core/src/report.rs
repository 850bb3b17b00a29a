//! JSON run and audit reports.

use crate::audit::AuditSummary;
use crate::stats::ProcessingStats;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub const REPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub version: u32,
    pub generated_at: String,
    pub dataset_root: PathBuf,
    pub stats: ProcessingStats,
}

impl RunReport {
    pub fn new(dataset_root: PathBuf, stats: ProcessingStats) -> Self {
        Self {
            version: REPORT_VERSION,
            generated_at: now_rfc3339(),
            dataset_root,
            stats,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub version: u32,
    pub generated_at: String,
    pub dataset_root: PathBuf,
    pub summary: AuditSummary,
}

impl AuditReport {
    pub fn new(dataset_root: PathBuf, summary: AuditSummary) -> Self {
        Self {
            version: REPORT_VERSION,
            generated_at: now_rfc3339(),
            dataset_root,
            summary,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("io error for {}: {source}", .path.display())]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("unknown"))
}

/// Writes `report` as pretty JSON, creating parent directories.
pub fn write_report<T: Serialize, P: AsRef<Path>>(report: &T, path: P) -> Result<(), ReportError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| ReportError::Io {
            source,
            path: parent.to_path_buf(),
        })?;
    }
    let file = File::create(path).map_err(|source| ReportError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    let writer = BufWriter::new(file);
    Ok(serde_json::to_writer_pretty(writer, report)?)
}

pub fn read_report<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T, ReportError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| ReportError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEntry, DuplicateGroup};
    use crate::fingerprint;
    use crate::storage::Partition;
    use tempfile::tempdir;

    #[test]
    fn writes_and_reads_run_report() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("reports/run.json");
        let mut stats = ProcessingStats {
            fetched_urls: 10,
            processed_images: 10,
            no_winner: 3,
            ..ProcessingStats::default()
        };
        stats.record_saved("sleeping");

        write_report(&RunReport::new(PathBuf::from("Dataset"), stats), &output).unwrap();
        let loaded: RunReport = read_report(&output).unwrap();
        assert_eq!(loaded.version, REPORT_VERSION);
        assert_eq!(loaded.dataset_root, PathBuf::from("Dataset"));
        assert_eq!(loaded.stats.no_winner, 3);
        assert_eq!(loaded.stats.label_counts["sleeping"], 1);
        assert_ne!(loaded.generated_at, "unknown");
    }

    #[test]
    fn audit_report_serializes_partitions_in_lowercase() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("audit.json");
        let summary = AuditSummary {
            scanned: 2,
            unreadable: 0,
            groups: vec![DuplicateGroup {
                hash: fingerprint::hash(b"same"),
                files: vec![
                    AuditEntry {
                        path: PathBuf::from("Verified/cat/a.jpg"),
                        partition: Partition::Confirmed,
                        size_bytes: 4,
                    },
                    AuditEntry {
                        path: PathBuf::from("Unverified/cat/a.jpg"),
                        partition: Partition::Pending,
                        size_bytes: 4,
                    },
                ],
            }],
        };

        write_report(&AuditReport::new(PathBuf::from("Dataset"), summary.clone()), &output)
            .unwrap();
        let raw = std::fs::read_to_string(&output).unwrap();
        assert!(raw.contains("\"confirmed\""));
        assert!(raw.contains("\"pending\""));
        let loaded: AuditReport = read_report(&output).unwrap();
        assert_eq!(loaded.summary, summary);
    }

    #[test]
    fn missing_report_is_io_error() {
        let dir = tempdir().unwrap();
        let result: Result<RunReport, _> = read_report(dir.path().join("missing.json"));
        assert!(matches!(result, Err(ReportError::Io { .. })));
    }
}
