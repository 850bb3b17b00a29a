//! Core curation engine for the dataset curator.
//!
//! This crate exposes the batch pipeline that fetches candidate images,
//! drops duplicates, gates them through a binary-classifier ensemble and
//! files survivors into the pending partition of a labelled dataset. It
//! also carries the offline duplicate audit over an existing dataset. Run
//! statistics and audit summaries are serialisable for downstream tooling.
//!
//! The ONNX backend lives behind the `classification` feature; the gate
//! itself only depends on the `BinaryClassifier` trait.

pub mod audit;
pub mod classifier;
pub mod config;
pub mod dedup;
pub mod fingerprint;
pub mod operations;
pub mod orchestrator;
pub mod progress;
pub mod report;
pub mod reporting;
pub mod retry;
pub mod source;
pub mod stats;
pub mod storage;

pub use audit::{audit, AuditEntry, AuditSummary, DuplicateGroup};
pub use classifier::{
    decide, BinaryClassifier, ClassificationGate, ClassificationVote, ClassifierConfig,
    ClassifierError, DecisionOutcome, RejectReason, TieBreaker,
};
pub use config::{ConfigError, CuratorConfig, SourceConfig, ThreadingMode};
pub use dedup::{DuplicateIndex, DuplicateKind};
pub use fingerprint::ContentHash;
pub use operations::{move_redundant, MoveError, MoveStats};
pub use orchestrator::{BatchOrchestrator, ImageOutcome, PipelineError};
pub use report::{read_report, write_report, AuditReport, ReportError, RunReport};
pub use reporting::{print_audit, print_run_summary};
pub use retry::{RetryError, RetryPolicy};
pub use source::{
    CatApiClient, HttpDownloader, ImageAsset, ImageDownloader, ImageReference, ImageSource,
    SourceError,
};
pub use stats::{BatchEstimate, ProcessingStats};
pub use storage::{DatasetStorage, LocalStorage, Partition, StorageError};

#[cfg(feature = "classification")]
pub use classifier::{init_ort_runtime, load_gate, OnnxClassifier};
