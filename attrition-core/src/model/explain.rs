//! Объяснение предсказаний: вклад каждой фичи в ответ модели.

use crate::model::features::FeatureVector;
use anyhow::Result;
use serde::Serialize;

/// Объяснение одного предсказания.
///
/// Структура повторяет `shap.Explanation`: `base_value + Σ values = output_value`,
/// все величины в пространстве margin (log-odds) модели.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    /// Ожидаемый ответ модели на фоновых данных.
    pub base_value: f64,
    /// Ответ модели для этого вектора.
    pub output_value: f64,
    /// Вклад каждой фичи, в порядке колонок обучения.
    pub values: Vec<f64>,
    /// Значения фич.
    pub data: Vec<f64>,
    pub feature_names: Vec<String>,
}

impl Explanation {
    /// Фича с наибольшим по модулю вкладом.
    pub fn top_factor(&self) -> Option<(&str, f64)> {
        self.values
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(i, v)| (self.feature_names[i].as_str(), *v))
    }

    /// Сумма вкладов плюс базовое значение.
    pub fn reconstructed_output(&self) -> f64 {
        self.base_value + self.values.iter().sum::<f64>()
    }
}

/// Трейт для объяснения предсказаний классификатора.
pub trait Explainer: Send + Sync + std::fmt::Debug {
    fn explain(&self, features: &FeatureVector) -> Result<Explanation>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explanation() -> Explanation {
        Explanation {
            base_value: -1.0,
            output_value: -0.3,
            values: vec![0.2, -0.1, 0.6],
            data: vec![1.0, 3000.0, 0.0],
            feature_names: vec!["OverTime".into(), "MonthlyIncome".into(), "Age".into()],
        }
    }

    #[test]
    fn test_top_factor() {
        assert_eq!(explanation().top_factor(), Some(("Age", 0.6)));
    }

    #[test]
    fn test_reconstructed_output() {
        assert!((explanation().reconstructed_output() - -0.3).abs() < 1e-12);
    }
}
