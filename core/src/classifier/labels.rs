//! Output label loading for ensemble and tie-break models.
//!
//! Labels name the model outputs in order. They come from the config inline,
//! or from a label file next to the models:
//! - CSV (label in the second column, header row skipped)
//! - Plain text (one label per line)
//! - JSON (array, or object with a `labels` field)

use super::ClassifierError;
use csv::ReaderBuilder;
use std::fs;
use std::path::Path;

/// Resolves the output labels for a model.
///
/// Inline labels win over `labels_file`; relative label files are resolved
/// against `models_dir`. Returns `Ok(None)` when neither is configured so the
/// caller can fall back to labels derived from the model name.
pub fn load_labels(
    models_dir: &Path,
    inline: &[String],
    labels_file: Option<&Path>,
) -> Result<Option<Vec<String>>, ClassifierError> {
    if !inline.is_empty() {
        return Ok(Some(inline.to_vec()));
    }

    let Some(labels_file) = labels_file else {
        return Ok(None);
    };
    let label_path = if labels_file.is_absolute() {
        labels_file.to_path_buf()
    } else {
        models_dir.join(labels_file)
    };

    if !label_path.exists() {
        return Err(ClassifierError::ModelNotFound(label_path));
    }

    let extension = label_path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase);
    let labels = match extension.as_deref() {
        Some("csv") => load_labels_from_csv(&label_path)?,
        Some("json") => load_labels_from_json(&label_path)?,
        _ => load_labels_from_text(&label_path)?,
    };
    Ok(Some(labels))
}

/// Load labels from the second column of a CSV file with a header row.
///
/// ```csv
/// id,name
/// 0,mouth_open
/// 1,rest
/// ```
pub fn load_labels_from_csv(path: &Path) -> Result<Vec<String>, ClassifierError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| {
            ClassifierError::Processing(format!(
                "failed to read labels CSV {}: {}",
                path.display(),
                e
            ))
        })?;

    let mut labels = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| {
            ClassifierError::Processing(format!("invalid label record: {}", e))
        })?;

        if let Some(name) = record.get(1) {
            let trimmed = name.trim();
            if !trimmed.is_empty() {
                labels.push(trimmed.to_string());
            }
        }
    }

    if labels.is_empty() {
        return Err(ClassifierError::Processing(format!(
            "no labels found in {}",
            path.display()
        )));
    }

    Ok(labels)
}

/// Load labels from a plain text file, one per line.
pub fn load_labels_from_text(path: &Path) -> Result<Vec<String>, ClassifierError> {
    let content = fs::read_to_string(path).map_err(|e| {
        ClassifierError::Processing(format!(
            "failed to read label file {}: {}",
            path.display(),
            e
        ))
    })?;

    let labels: Vec<String> = content
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();

    if labels.is_empty() {
        return Err(ClassifierError::Processing(format!(
            "no labels found in {}",
            path.display()
        )));
    }

    Ok(labels)
}

/// Load labels from a JSON array of strings or an object with `labels`.
pub fn load_labels_from_json(path: &Path) -> Result<Vec<String>, ClassifierError> {
    let content = fs::read_to_string(path).map_err(|e| {
        ClassifierError::Processing(format!(
            "failed to read JSON file {}: {}",
            path.display(),
            e
        ))
    })?;

    if let Ok(labels) = serde_json::from_str::<Vec<String>>(&content) {
        if !labels.is_empty() {
            return Ok(labels);
        }
    }

    #[derive(serde::Deserialize)]
    struct LabelsObject {
        labels: Vec<String>,
    }

    if let Ok(obj) = serde_json::from_str::<LabelsObject>(&content) {
        if !obj.labels.is_empty() {
            return Ok(obj.labels);
        }
    }

    Err(ClassifierError::Processing(format!(
        "invalid JSON label format in {}",
        path.display()
    )))
}
