//! Интерфейс классификатора риска увольнения.
//!
//! Классификатор — внешний, заранее обученный компонент. Здесь описана только
//! граница: по вектору фич он возвращает вероятность положительного класса
//! («сотрудник уйдёт»).

use crate::model::features::FeatureVector;
use anyhow::{ensure, Result};

/// Трейт для оценки вероятности увольнения.
///
/// Трейт требует `Send + Sync`, так как классификатор разделяется между
/// обработчиками HTTP API через `Arc`.
pub trait AttritionClassifier: Send + Sync + std::fmt::Debug {
    /// Вероятность увольнения в диапазоне [0.0, 1.0].
    fn predict_proba(&self, features: &FeatureVector) -> Result<f64>;

    /// Короткое имя типа модели для логов и API.
    fn kind(&self) -> &'static str;
}

/// Логистическая функция: margin (log-odds) → вероятность.
pub fn sigmoid(margin: f64) -> f64 {
    1.0 / (1.0 + (-margin).exp())
}

/// Обратная к [`sigmoid`]: вероятность → margin.
pub fn logit(probability: f64) -> f64 {
    (probability / (1.0 - probability)).ln()
}

/// Проверить, что вектор имеет ширину, с которой обучалась модель.
pub(crate) fn ensure_width(features: &FeatureVector, expected: usize) -> Result<()> {
    ensure!(
        features.len() == expected,
        "Размер вектора фич ({}) не совпадает с ожидаемым размером модели ({})",
        features.len(),
        expected
    );
    Ok(())
}

/// Заглушка классификатора для тестирования.
///
/// Всегда возвращает фиксированную вероятность.
#[derive(Debug, Clone)]
pub struct StubClassifier {
    probability: f64,
}

impl StubClassifier {
    pub fn new(probability: f64) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
        }
    }
}

impl Default for StubClassifier {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl AttritionClassifier for StubClassifier {
    fn predict_proba(&self, _features: &FeatureVector) -> Result<f64> {
        Ok(self.probability)
    }

    fn kind(&self) -> &'static str {
        "stub"
    }
}
