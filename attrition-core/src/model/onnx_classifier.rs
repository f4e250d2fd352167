//! Классификатор на основе ONNX-модели (feature `onnx`).
//!
//! Ожидается граф с одним входом формы `[batch, n_features]` (или `[n_features]`).
//! Если у графа несколько выходов, вероятности читаются из второго; выход из двух
//! значений трактуется как `[p(stay), p(leave)]`.
//! Объяснения для ONNX-моделей не поддерживаются.

use crate::model::classifier::{ensure_width, AttritionClassifier};
use crate::model::features::FeatureVector;
use anyhow::{Context, Result};
use ort::{session::Session, value::Tensor};
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug)]
pub struct OnnxClassifier {
    session: Mutex<Session>,
    expected_input_size: usize,
    input_name: String,
    output_name: String,
}

impl OnnxClassifier {
    /// Загрузить ONNX-модель и проверить, что ширина входа совпадает с шаблоном фич.
    pub fn load(model_path: &Path, template_width: usize) -> Result<Self> {
        let session = Session::builder()?
            .commit_from_file(model_path)
            .with_context(|| {
                format!(
                    "Не удалось загрузить ONNX модель из файла: {}",
                    model_path.display()
                )
            })?;

        let input_info = session
            .inputs
            .first()
            .context("Модель не имеет входных тензоров")?;
        let input_name = input_info.name.clone();

        // У классификаторов, экспортированных из sklearn, вероятности классов во втором выходе
        let output_name = session
            .outputs
            .get(1)
            .or_else(|| session.outputs.first())
            .map(|output| output.name.clone())
            .context("Модель не имеет выходных тензоров")?;

        let input_shape = match &input_info.input_type {
            ort::value::ValueType::Tensor { shape, .. } => shape,
            other => anyhow::bail!("Входной тензор имеет неожиданный тип: {:?}", other),
        };
        let feature_size = match input_shape.len() {
            1 => input_shape[0],
            2 => input_shape[1],
            _ => anyhow::bail!("Неподдерживаемая форма входного тензора: {:?}", input_shape),
        };
        anyhow::ensure!(
            feature_size != -1,
            "Неподдерживаемая динамическая форма входного тензора: {:?}",
            input_shape
        );
        let expected_input_size = feature_size as usize;
        anyhow::ensure!(
            expected_input_size == template_width,
            "ONNX model expects {} features, but the training template has {} columns",
            expected_input_size,
            template_width
        );

        Ok(Self {
            session: Mutex::new(session),
            expected_input_size,
            input_name,
            output_name,
        })
    }

    fn features_to_tensor(&self, features: &FeatureVector) -> Result<Tensor<f32>> {
        ensure_width(features, self.expected_input_size)
            .context("Проверьте соответствие фич модели. Возможно, модель была обучена на других данных.")?;
        let shape = [1usize, self.expected_input_size];
        Tensor::from_array((shape, features.to_f32().into_boxed_slice()))
            .map_err(|e| anyhow::anyhow!("Не удалось создать тензор из вектора фич: {}", e))
    }

    fn run_inference(&self, input_tensor: &Tensor<f32>) -> Result<f64> {
        let inputs = ort::inputs! {
            self.input_name.clone() => input_tensor.view(),
        };

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("Mutex poisoned: {}", e))
            .context("Ошибка блокировки ONNX сессии для инференса")?;

        let outputs = session
            .run(inputs)
            .context("Ошибка выполнения ONNX инференса")?;

        let output_tensor = outputs
            .get(&self.output_name)
            .with_context(|| format!("Ожидаемый выходной тензор: {}", self.output_name))?;

        let (_, output) = output_tensor
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow::anyhow!("Не удалось извлечь тензор из выхода: {}", e))?;

        let probability = match output.len() {
            1 => output[0],
            2 => output[1],
            n => anyhow::bail!("unexpected ONNX output with {} values", n),
        };
        Ok(f64::from(probability).clamp(0.0, 1.0))
    }
}

impl AttritionClassifier for OnnxClassifier {
    fn predict_proba(&self, features: &FeatureVector) -> Result<f64> {
        let tensor = self.features_to_tensor(features)?;
        self.run_inference(&tensor)
    }

    fn kind(&self) -> &'static str {
        "onnx"
    }
}
