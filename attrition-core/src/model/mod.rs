//! Модуль для ML-модели риска увольнения.
//!
//! # Компоненты
//!
//! - **features**: шаблон колонок обучения и построение вектора фич из анкеты
//! - **artifacts**: загрузка артефактов обучения (колонки, значения по умолчанию, модель)
//! - **classifier**: интерфейс классификатора (с заглушкой для тестирования)
//! - **explain**: интерфейс объяснения предсказаний (вклады фич)
//! - **tree_ensemble**: ансамбль деревьев в JSON с точным TreeSHAP
//! - **logistic**: логистическая регрессия с линейным объяснением
//! - **onnx_classifier**: ONNX-модель (только с feature `onnx`)
//!
//! # Пример
//!
//! ```ignore
//! use attrition_core::form::{FormInput, FormSchema};
//! use attrition_core::model::artifacts::{load_model, ModelFormat};
//! use attrition_core::model::features::{build_features, FeatureTemplate};
//!
//! let template = FeatureTemplate::from_files("artifacts/feature_columns.json", "artifacts/default_values.json")?;
//! let model = load_model("artifacts/attrition_model.json", ModelFormat::Json, &template)?;
//! let schema = FormSchema::standard();
//! let profile = schema.validate(&FormInput::new().with_text("over_time", "Yes"))?;
//! let features = build_features(&schema, &template, &profile);
//! let probability = model.classifier.predict_proba(&features)?;
//! ```

pub mod artifacts;
pub mod classifier;
pub mod explain;
pub mod features;
pub mod logistic;
#[cfg(feature = "onnx")]
pub mod onnx_classifier;
pub mod tree_ensemble;
