//! Загрузка артефактов обучения.
//!
//! Артефакты загружаются один раз при старте: порядок колонок, значения по умолчанию
//! и файл модели. Для модели вычисляется SHA256, чтобы в ответах API было видно,
//! какой именно файл отвечает на запросы.

use crate::model::classifier::AttritionClassifier;
use crate::model::explain::Explainer;
use crate::model::features::FeatureTemplate;
use crate::model::logistic::{LogisticClassifier, LogisticDocument};
use crate::model::tree_ensemble::{TreeEnsembleClassifier, TreeEnsembleDocument};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Формат файла модели.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelFormat {
    /// JSON-документ (`tree_ensemble` или `logistic`).
    Json,
    /// ONNX-граф (требует feature `onnx`).
    Onnx,
}

/// JSON-документ модели; тип определяется полем `format`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum ModelDocument {
    TreeEnsemble(TreeEnsembleDocument),
    Logistic(LogisticDocument),
}

/// Метаданные загруженной модели.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub path: PathBuf,
    pub format: ModelFormat,
    /// Тип классификатора (`tree_ensemble`, `logistic`, `onnx`).
    pub kind: String,
    pub sha256: String,
    pub file_size: u64,
    pub loaded_at: DateTime<Utc>,
    /// Есть ли для модели объяснитель (график вкладов фич).
    pub explainable: bool,
}

/// Классификатор и (если поддерживается) объяснитель одной модели.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub classifier: Arc<dyn AttritionClassifier>,
    pub explainer: Option<Arc<dyn Explainer>>,
    pub info: ModelInfo,
}

/// Загрузить порядок колонок обучения (JSON-массив строк).
pub fn load_feature_columns(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read feature columns from {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("feature columns at {} must be a JSON array of strings", path.display()))
}

/// Загрузить значения по умолчанию (JSON-объект колонка → число).
pub fn load_default_values(path: impl AsRef<Path>) -> Result<HashMap<String, f64>> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read default values from {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| {
        format!(
            "default values at {} must be a JSON object of numbers",
            path.display()
        )
    })
}

/// Вычислить SHA256 и размер файла.
pub fn file_fingerprint(path: impl AsRef<Path>) -> Result<(String, u64)> {
    let path = path.as_ref();
    let data = std::fs::read(path)
        .with_context(|| format!("Не удалось прочитать файл модели: {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok((format!("{:x}", hasher.finalize()), data.len() as u64))
}

/// Загрузить модель и связать её колонки с шаблоном фич.
///
/// # Ошибки
///
/// * файл не найден или не читается
/// * JSON-документ не соответствует ни одному поддерживаемому формату
/// * модель ссылается на колонки, которых нет в шаблоне
/// * формат `onnx` при сборке без feature `onnx`
pub fn load_model(
    path: impl AsRef<Path>,
    format: ModelFormat,
    template: &FeatureTemplate,
) -> Result<LoadedModel> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(anyhow::anyhow!("Файл модели не найден: {}", path.display()))
            .context("Проверьте путь к файлу модели в конфигурации");
    }

    let (sha256, file_size) = file_fingerprint(path)?;

    let (classifier, explainer): (Arc<dyn AttritionClassifier>, Option<Arc<dyn Explainer>>) =
        match format {
            ModelFormat::Json => {
                let data = std::fs::read_to_string(path).with_context(|| {
                    format!("Не удалось прочитать файл модели: {}", path.display())
                })?;
                let document: ModelDocument = serde_json::from_str(&data).with_context(|| {
                    format!("failed to parse JSON model at {}", path.display())
                })?;
                match document {
                    ModelDocument::TreeEnsemble(doc) => {
                        let model = Arc::new(TreeEnsembleClassifier::from_document(doc, template)?);
                        (
                            model.clone() as Arc<dyn AttritionClassifier>,
                            Some(model as Arc<dyn Explainer>),
                        )
                    }
                    ModelDocument::Logistic(doc) => {
                        let model = Arc::new(LogisticClassifier::from_document(doc, template)?);
                        (
                            model.clone() as Arc<dyn AttritionClassifier>,
                            Some(model as Arc<dyn Explainer>),
                        )
                    }
                }
            }
            ModelFormat::Onnx => load_onnx(path, template)?,
        };

    let info = ModelInfo {
        path: path.to_path_buf(),
        format,
        kind: classifier.kind().to_string(),
        sha256,
        file_size,
        loaded_at: Utc::now(),
        explainable: explainer.is_some(),
    };

    info!(
        path = %info.path.display(),
        kind = %info.kind,
        sha256 = %info.sha256,
        explainable = info.explainable,
        "model loaded"
    );

    Ok(LoadedModel {
        classifier,
        explainer,
        info,
    })
}

#[cfg(feature = "onnx")]
fn load_onnx(
    path: &Path,
    template: &FeatureTemplate,
) -> Result<(Arc<dyn AttritionClassifier>, Option<Arc<dyn Explainer>>)> {
    let model = crate::model::onnx_classifier::OnnxClassifier::load(path, template.len())?;
    Ok((Arc::new(model) as Arc<dyn AttritionClassifier>, None))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(
    path: &Path,
    _template: &FeatureTemplate,
) -> Result<(Arc<dyn AttritionClassifier>, Option<Arc<dyn Explainer>>)> {
    anyhow::bail!(
        "model {} is in ONNX format, but attrition-core was built without the `onnx` feature",
        path.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("tempfile");
        file.write_all(contents.as_bytes()).expect("write temp file");
        file
    }

    fn template() -> FeatureTemplate {
        FeatureTemplate::new(
            vec!["OverTime".to_string(), "MonthlyIncome".to_string()],
            &HashMap::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_load_feature_columns_and_defaults() {
        let columns = write_temp(r#"["Age", "OverTime"]"#);
        let defaults = write_temp(r#"{"Age": 36.5, "OverTime": 0}"#);

        assert_eq!(
            load_feature_columns(columns.path()).unwrap(),
            vec!["Age".to_string(), "OverTime".to_string()]
        );
        let defaults = load_default_values(defaults.path()).unwrap();
        assert_eq!(defaults.get("Age"), Some(&36.5));
    }

    #[test]
    fn test_load_feature_columns_rejects_wrong_shape() {
        let columns = write_temp(r#"{"Age": 1}"#);
        assert!(load_feature_columns(columns.path()).is_err());
    }

    #[test]
    fn test_file_fingerprint_is_sha256() {
        let file = write_temp("abc");
        let (hash, size) = file_fingerprint(file.path()).unwrap();
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(size, 3);
    }

    #[test]
    fn test_load_model_missing_file() {
        let err = load_model("does/not/exist.json", ModelFormat::Json, &template()).unwrap_err();
        assert!(err.to_string().contains("Проверьте путь"));
    }

    #[test]
    fn test_load_logistic_model() {
        let file = write_temp(
            r#"{"format": "logistic", "intercept": -2.0, "coefficients": {"OverTime": 1.5}}"#,
        );
        let model = load_model(file.path(), ModelFormat::Json, &template()).unwrap();
        assert_eq!(model.info.kind, "logistic");
        assert!(model.info.explainable);
        assert_eq!(model.info.sha256.len(), 64);
    }

    #[test]
    fn test_load_model_rejects_unknown_format() {
        let file = write_temp(r#"{"format": "random_forest", "trees": []}"#);
        assert!(load_model(file.path(), ModelFormat::Json, &template()).is_err());
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_onnx_requires_feature() {
        let file = write_temp("not really onnx");
        let err = load_model(file.path(), ModelFormat::Onnx, &template()).unwrap_err();
        assert!(err.to_string().contains("onnx"));
    }
}
