//! One-vs-rest classifier ensemble and the single-winner decision gate.
//!
//! Each ensemble member is a binary classifier bound to one positive label
//! that also reports a confidence for the reserved "rest" label. The gate
//! fans out over all members, drops the rest votes and accepts an image only
//! when exactly one label clears the threshold.
//!
//! # Configuration
//!
//! Models are configured through the `[classifier]` section of
//! `curator.toml`:
//!
//! ```toml
//! [classifier]
//! models_dir = ".vendor/models"
//! rest_label = "rest"
//!
//! [[classifier.ensemble]]
//! path = "ovr/OvR_sleeping.onnx"
//! labels = ["sleeping", "rest"]
//!
//! [[classifier.tie_breakers]]
//! path = "ovo/OvO_mouth_open_vs_safe.onnx"
//! ambiguous_label = "mouth_open"
//! safe_label = "safe"
//! labels = ["mouth_open", "safe"]
//! ```
//!
//! Without explicit entries the models are discovered from `ovr/` and `ovo/`
//! below `models_dir`.
//!
//! # Runtime Initialization
//!
//! With the `classification` feature the ONNX backend needs the runtime
//! library to be initialised once via [`init_ort_runtime`] before any model
//! is loaded; [`load_gate`] does this from the configured `ort_library`.

mod config;
mod gate;
mod labels;
#[cfg(feature = "classification")]
mod runtime;

pub use config::{
    discover_models, ClassifierConfig, DiscoveredModels, EnsembleModelConfig, ModelInputSpec,
    TieBreakerConfig,
};
pub use gate::{decide, ClassificationGate, TieBreaker};
pub use labels::{load_labels, load_labels_from_csv, load_labels_from_json, load_labels_from_text};
#[cfg(feature = "classification")]
pub use runtime::{init_ort_runtime, load_gate, softmax, OnnxClassifier};

use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use thiserror::Error;

/// Confidence reported by one classifier for one label.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassificationVote {
    pub label: String,
    pub confidence: f32,
}

impl ClassificationVote {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MultipleWinners,
    NoWinner,
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MultipleWinners => write!(f, "multiple labels above threshold"),
            Self::NoWinner => write!(f, "no label above threshold"),
        }
    }
}

/// Result of gating one image.
#[derive(Clone, Debug, PartialEq)]
pub enum DecisionOutcome {
    Accepted { label: String, confidence: f32 },
    Rejected(RejectReason),
}

/// A binary classifier that scores raw encoded image bytes.
pub trait BinaryClassifier: Send + Sync {
    /// Identifier used in logs, usually the model file stem.
    fn name(&self) -> &str;

    fn classify(&self, image: &[u8]) -> Result<Vec<ClassificationVote>, ClassifierError>;
}

/// Errors that can occur while loading or running classifiers.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("model not found: {}", .0.display())]
    ModelNotFound(PathBuf),
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("processing error: {0}")]
    Processing(String),
    #[cfg(feature = "classification")]
    #[error("ONNX runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[cfg(feature = "classification")]
    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),
}
