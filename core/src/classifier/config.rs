//! Classifier section of the curator configuration.
//!
//! Ensemble members and tie-breakers are either listed explicitly or
//! discovered from the `ovr/` and `ovo/` directories below `models_dir`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use super::labels::load_labels;
use super::ClassifierError;
use crate::config::ThreadingMode;

const OVR_DIR: &str = "ovr";
const OVO_DIR: &str = "ovo";
const OVR_PREFIX: &str = "OvR_";
const OVO_PREFIX: &str = "OvO_";
const OVO_SEPARATOR: &str = "_vs_";
const MODEL_EXTENSION: &str = "onnx";

/// Input format requirements shared by the ensemble models.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelInputSpec {
    /// Input image width in pixels
    pub width: u32,
    /// Input image height in pixels
    pub height: u32,
    /// Whether to apply mean/std normalization
    #[serde(default)]
    pub normalize: bool,
    /// Input tensor layout (default: "NCHW")
    #[serde(default = "default_layout")]
    pub layout: String,
    /// Per-channel mean in RGB order (default: ImageNet)
    #[serde(default)]
    pub mean: Option<[f32; 3]>,
    /// Per-channel standard deviation in RGB order (default: ImageNet)
    #[serde(default)]
    pub std: Option<[f32; 3]>,
}

fn default_layout() -> String {
    "NCHW".to_string()
}

impl Default for ModelInputSpec {
    fn default() -> Self {
        Self {
            width: 224,
            height: 224,
            normalize: true,
            layout: default_layout(),
            mean: None,
            std: None,
        }
    }
}

/// A one-vs-rest ensemble member.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnsembleModelConfig {
    /// Path to the ONNX model file (relative to models_dir or absolute)
    pub path: PathBuf,
    /// Output labels in model output order
    #[serde(default)]
    pub labels: Vec<String>,
    /// Label file used when `labels` is empty
    #[serde(default)]
    pub labels_file: Option<PathBuf>,
}

/// A pairwise model that re-checks one easily confused label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TieBreakerConfig {
    pub path: PathBuf,
    pub ambiguous_label: String,
    pub safe_label: String,
    /// Output labels in model output order (default: `[ambiguous, safe]`)
    #[serde(default)]
    pub labels: Vec<String>,
}

impl TieBreakerConfig {
    pub fn output_labels(&self) -> Vec<String> {
        if self.labels.is_empty() {
            vec![self.ambiguous_label.clone(), self.safe_label.clone()]
        } else {
            self.labels.clone()
        }
    }
}

/// Models resolved from the configuration, with paths made absolute
/// relative to `models_dir` and labels loaded.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DiscoveredModels {
    pub ensemble: Vec<EnsembleModelConfig>,
    pub tie_breakers: Vec<TieBreakerConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Base directory for model files (default: .vendor/models)
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,

    /// Path to ONNX Runtime library
    #[serde(default = "default_ort_lib")]
    pub ort_library: PathBuf,

    /// Label every ensemble member reports for "none of the positive classes"
    #[serde(default = "default_rest_label")]
    pub rest_label: String,

    /// Whether ensemble members run in parallel for each image
    #[serde(default)]
    pub threading: ThreadingMode,

    #[serde(default)]
    pub input: ModelInputSpec,

    #[serde(default)]
    pub ensemble: Vec<EnsembleModelConfig>,

    #[serde(default)]
    pub tie_breakers: Vec<TieBreakerConfig>,
}

fn default_models_dir() -> PathBuf {
    PathBuf::from(".vendor/models")
}

fn default_ort_lib() -> PathBuf {
    #[cfg(windows)]
    {
        PathBuf::from(".vendor/onnxruntime/lib/onnxruntime.dll")
    }
    #[cfg(not(windows))]
    {
        PathBuf::from(".vendor/onnxruntime/lib/libonnxruntime.so")
    }
}

fn default_rest_label() -> String {
    "rest".to_string()
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            ort_library: default_ort_lib(),
            rest_label: default_rest_label(),
            threading: ThreadingMode::default(),
            input: ModelInputSpec::default(),
            ensemble: Vec::new(),
            tie_breakers: Vec::new(),
        }
    }
}

impl ClassifierConfig {
    /// Get the full path to a model file.
    pub fn model_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.models_dir.join(path)
        }
    }

    /// Resolves explicit entries, falling back to discovery for whichever
    /// list is empty. Every ensemble member ends up with its labels loaded.
    pub fn resolve_models(&self) -> Result<DiscoveredModels, ClassifierError> {
        let discovered = if self.ensemble.is_empty() || self.tie_breakers.is_empty() {
            discover_models(&self.models_dir, &self.rest_label)?
        } else {
            DiscoveredModels::default()
        };

        let ensemble = if self.ensemble.is_empty() {
            discovered.ensemble
        } else {
            self.ensemble
                .iter()
                .map(|entry| self.resolve_ensemble_entry(entry))
                .collect::<Result<_, _>>()?
        };

        let tie_breakers = if self.tie_breakers.is_empty() {
            discovered.tie_breakers
        } else {
            self.tie_breakers
                .iter()
                .map(|entry| TieBreakerConfig {
                    path: self.model_path(&entry.path),
                    labels: entry.output_labels(),
                    ..entry.clone()
                })
                .collect()
        };

        Ok(DiscoveredModels {
            ensemble,
            tie_breakers,
        })
    }

    fn resolve_ensemble_entry(
        &self,
        entry: &EnsembleModelConfig,
    ) -> Result<EnsembleModelConfig, ClassifierError> {
        let path = self.model_path(&entry.path);
        let explicit = load_labels(
            &self.models_dir,
            &entry.labels,
            entry.labels_file.as_deref(),
        )?;
        let labels = match explicit {
            Some(labels) => labels,
            None => ovr_labels(&path, &self.rest_label)?,
        };
        Ok(EnsembleModelConfig {
            path,
            labels,
            labels_file: None,
        })
    }
}

/// Scans `<models_dir>/ovr` and `<models_dir>/ovo` for ONNX models.
///
/// Missing directories yield no models.
pub fn discover_models(
    models_dir: &Path,
    rest_label: &str,
) -> Result<DiscoveredModels, ClassifierError> {
    let mut models = DiscoveredModels::default();

    for path in model_files(&models_dir.join(OVR_DIR))? {
        let labels = ovr_labels(&path, rest_label)?;
        debug!(model = %path.display(), label = %labels[0], "discovered ensemble model");
        models.ensemble.push(EnsembleModelConfig {
            path,
            labels,
            labels_file: None,
        });
    }

    for path in model_files(&models_dir.join(OVO_DIR))? {
        let Some((ambiguous_label, safe_label)) = ovo_labels(&path) else {
            debug!(model = %path.display(), "skipping pairwise model without OvO_<a>_vs_<b> name");
            continue;
        };
        debug!(model = %path.display(), %ambiguous_label, %safe_label, "discovered tie-breaker");
        models.tie_breakers.push(TieBreakerConfig {
            path,
            labels: vec![ambiguous_label.clone(), safe_label.clone()],
            ambiguous_label,
            safe_label,
        });
    }

    Ok(models)
}

fn model_files(directory: &Path) -> Result<Vec<PathBuf>, ClassifierError> {
    if !directory.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(directory)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            ClassifierError::Processing(format!(
                "failed to list models in {}: {}",
                directory.display(),
                e
            ))
        })?;
        let path = entry.path();
        let is_model = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(MODEL_EXTENSION))
            .unwrap_or(false);
        if entry.file_type().is_file() && is_model {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

fn model_stem(path: &Path) -> Result<&str, ClassifierError> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| ClassifierError::ModelNotFound(path.to_path_buf()))
}

fn ovr_labels(path: &Path, rest_label: &str) -> Result<Vec<String>, ClassifierError> {
    let stem = model_stem(path)?;
    let label = stem.strip_prefix(OVR_PREFIX).unwrap_or(stem);
    Ok(vec![label.to_string(), rest_label.to_string()])
}

fn ovo_labels(path: &Path) -> Option<(String, String)> {
    let stem = path.file_stem()?.to_str()?;
    let pair = stem.strip_prefix(OVO_PREFIX)?;
    let (ambiguous, safe) = pair.split_once(OVO_SEPARATOR)?;
    if ambiguous.is_empty() || safe.is_empty() {
        return None;
    }
    Some((ambiguous.to_string(), safe.to_string()))
}
