//! ONNX Runtime backend for ensemble members and tie-breakers.

use super::config::{ClassifierConfig, ModelInputSpec};
use super::gate::{ClassificationGate, TieBreaker};
use super::{BinaryClassifier, ClassificationVote, ClassifierError};
use ndarray::{Array, Array4};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use tracing::{info, warn};

/// Default ImageNet normalization mean (RGB order).
pub const IMAGE_NET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Default ImageNet normalization standard deviation (RGB order).
pub const IMAGE_NET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Global flag to track if ORT runtime has been initialized.
static ORT_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the ONNX Runtime with the path to the dynamic library.
///
/// Idempotent: calls after the first successful one are no-ops.
pub fn init_ort_runtime(dylib_path: impl AsRef<Path>) -> Result<(), ClassifierError> {
    let path = dylib_path.as_ref();

    if ORT_INITIALIZED.get().is_some() {
        return Ok(());
    }

    if !path.exists() {
        return Err(ClassifierError::Processing(format!(
            "ONNX Runtime library not found at: {}",
            path.display()
        )));
    }

    let path_str = path.to_str().ok_or_else(|| {
        ClassifierError::Processing("ONNX Runtime path contains invalid UTF-8".to_string())
    })?;

    ort::init_from(path_str).commit()?;

    let _ = ORT_INITIALIZED.set(());
    Ok(())
}

/// Load an ONNX session from a model file.
pub fn load_session(model_path: &Path) -> Result<Session, ClassifierError> {
    if !model_path.exists() {
        return Err(ClassifierError::ModelNotFound(model_path.to_path_buf()));
    }

    let model_bytes = std::fs::read(model_path).map_err(|e| {
        ClassifierError::Processing(format!("failed to read model file: {}", e))
    })?;

    Ok(Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(1)?
        .commit_from_memory(&model_bytes)?)
}

/// Decode encoded image bytes and lay them out as a model input tensor.
pub fn preprocess_bytes(
    image: &[u8],
    input: &ModelInputSpec,
) -> Result<Array4<f32>, ClassifierError> {
    use opencv::core::{Mat, MatTraitConst, MatTraitConstManual, Size, Vector, CV_32FC3};
    use opencv::imgcodecs;
    use opencv::imgproc;

    let buffer = Vector::<u8>::from_slice(image);
    let decoded = imgcodecs::imdecode(&buffer, imgcodecs::IMREAD_COLOR)?;
    if decoded.empty() {
        return Err(ClassifierError::InvalidImage(format!(
            "could not decode {} bytes",
            image.len()
        )));
    }

    let mut resized = Mat::default();
    imgproc::resize(
        &decoded,
        &mut resized,
        Size::new(input.width as i32, input.height as i32),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;

    let mut float_image = Mat::default();
    resized.convert_to(&mut float_image, CV_32FC3, 1.0 / 255.0, 0.0)?;

    // OpenCV is BGR, HWC
    let rows = float_image.rows() as usize;
    let cols = float_image.cols() as usize;
    let data: Vec<f32> = float_image
        .data_typed::<opencv::core::Vec3f>()?
        .iter()
        .flat_map(|pixel| [pixel[2], pixel[1], pixel[0]])
        .collect();

    let hwc = Array::from_shape_vec((rows, cols, 3), data)
        .map_err(|e| ClassifierError::Processing(e.to_string()))?;

    let mean = input.mean.unwrap_or(IMAGE_NET_MEAN);
    let std = input.std.unwrap_or(IMAGE_NET_STD);

    if input.layout.eq_ignore_ascii_case("NHWC") {
        let mut nhwc = hwc.insert_axis(ndarray::Axis(0)).into_owned();
        if input.normalize {
            for c in 0..3 {
                nhwc.slice_mut(ndarray::s![0, .., .., c])
                    .mapv_inplace(|v| (v - mean[c]) / std[c]);
            }
        }
        Ok(nhwc)
    } else {
        let mut nchw = hwc
            .permuted_axes([2, 0, 1])
            .insert_axis(ndarray::Axis(0))
            .as_standard_layout()
            .into_owned();
        if input.normalize {
            for c in 0..3 {
                nchw.slice_mut(ndarray::s![0, c, .., ..])
                    .mapv_inplace(|v| (v - mean[c]) / std[c]);
            }
        }
        Ok(nchw)
    }
}

/// Softmax function for converting logits to probabilities.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_val = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp_vals: Vec<f32> = logits.iter().map(|x| (x - max_val).exp()).collect();
    let sum: f32 = exp_vals.iter().sum();
    exp_vals.iter().map(|x| x / sum).collect()
}

fn as_probabilities(scores: Vec<f32>) -> Vec<f32> {
    let sum: f32 = scores.iter().sum();
    if sum > 0.99 && sum < 1.01 && scores.iter().all(|&x| x >= 0.0) {
        scores
    } else {
        softmax(&scores)
    }
}

/// A binary ONNX classifier whose outputs map onto `labels` in order.
pub struct OnnxClassifier {
    name: String,
    session: Mutex<Session>,
    input: ModelInputSpec,
    labels: Vec<String>,
}

impl OnnxClassifier {
    pub fn new(
        model_path: &Path,
        input: ModelInputSpec,
        labels: Vec<String>,
    ) -> Result<Self, ClassifierError> {
        let session = load_session(model_path)?;
        let name = model_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("model")
            .to_string();
        Ok(Self {
            name,
            session: Mutex::new(session),
            input,
            labels,
        })
    }
}

impl BinaryClassifier for OnnxClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn classify(&self, image: &[u8]) -> Result<Vec<ClassificationVote>, ClassifierError> {
        let input = preprocess_bytes(image, &self.input)?;
        let input_tensor = ort::value::Tensor::from_array(input)?;

        let mut session = self.session.lock().map_err(|_| {
            ClassifierError::Processing(format!("session lock poisoned for {}", self.name))
        })?;
        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "input".to_string());

        // Extract scores before dropping outputs
        let scores = {
            let outputs = session.run(ort::inputs![input_name => input_tensor])?;
            let output = outputs
                .values()
                .next()
                .ok_or_else(|| ClassifierError::Processing("no output tensor found".into()))?;
            let (_shape, scores) = output.try_extract_tensor::<f32>()?;
            scores.to_vec()
        };

        if scores.len() != self.labels.len() {
            return Err(ClassifierError::Processing(format!(
                "{} produced {} outputs for {} labels",
                self.name,
                scores.len(),
                self.labels.len()
            )));
        }

        Ok(self
            .labels
            .iter()
            .zip(as_probabilities(scores))
            .map(|(label, confidence)| ClassificationVote::new(label.clone(), confidence))
            .collect())
    }
}

/// Initialises the runtime and loads every configured model into a gate.
///
/// Individual models that fail to load are logged and skipped; the gate
/// only fails when no ensemble member could be loaded.
pub fn load_gate(config: &ClassifierConfig) -> Result<ClassificationGate, ClassifierError> {
    init_ort_runtime(&config.ort_library)?;
    let models = config.resolve_models()?;

    let mut members: Vec<Box<dyn BinaryClassifier>> = Vec::new();
    for entry in models.ensemble {
        match OnnxClassifier::new(&entry.path, config.input.clone(), entry.labels) {
            Ok(classifier) => members.push(Box::new(classifier)),
            Err(error) => warn!(model = %entry.path.display(), %error, "skipping ensemble model"),
        }
    }
    if members.is_empty() {
        return Err(ClassifierError::ModelNotFound(config.models_dir.join("ovr")));
    }

    let mut tie_breakers = Vec::new();
    for entry in models.tie_breakers {
        let labels = entry.output_labels();
        match OnnxClassifier::new(&entry.path, config.input.clone(), labels) {
            Ok(classifier) => tie_breakers.push(TieBreaker::new(
                entry.ambiguous_label,
                entry.safe_label,
                Box::new(classifier),
            )),
            Err(error) => warn!(model = %entry.path.display(), %error, "skipping tie-breaker"),
        }
    }

    info!(
        members = members.len(),
        tie_breakers = tie_breakers.len(),
        "classifier ensemble loaded"
    );
    ClassificationGate::new(members, tie_breakers, config.rest_label.clone(), config.threading)
}
