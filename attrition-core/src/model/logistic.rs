//! Логистическая регрессия по колонкам обучения.
//!
//! Объяснение линейное: вклад колонки `coef * (x - mean)`, где `mean` — среднее
//! значение колонки на обучающей выборке (если не задано, берётся значение по умолчанию
//! из шаблона).

use crate::model::classifier::{ensure_width, sigmoid, AttritionClassifier};
use crate::model::explain::{Explainer, Explanation};
use crate::model::features::{FeatureTemplate, FeatureVector};
use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
pub struct LogisticDocument {
    pub intercept: f64,
    /// Коэффициенты по именам колонок; отсутствующие колонки имеют коэффициент 0.
    pub coefficients: BTreeMap<String, f64>,
    #[serde(default)]
    pub means: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct LogisticClassifier {
    intercept: f64,
    coefficients: Vec<f64>,
    means: Vec<f64>,
    feature_names: Vec<String>,
}

impl LogisticClassifier {
    pub fn from_document(document: LogisticDocument, template: &FeatureTemplate) -> Result<Self> {
        ensure!(document.intercept.is_finite(), "logistic intercept must be finite");

        let mut coefficients = vec![0.0; template.len()];
        for (column, coef) in &document.coefficients {
            let index = template
                .column_index(column)
                .with_context(|| format!("coefficient for `{column}`, which is not a training column"))?;
            ensure!(coef.is_finite(), "coefficient for `{column}` must be finite");
            coefficients[index] = *coef;
        }

        for column in document.means.keys() {
            ensure!(
                template.column_index(column).is_some(),
                "mean for `{column}`, which is not a training column"
            );
        }
        let means = template
            .columns()
            .iter()
            .map(|column| {
                document
                    .means
                    .get(column)
                    .copied()
                    .or_else(|| template.default_value(column))
                    .unwrap_or(0.0)
            })
            .collect();

        Ok(Self {
            intercept: document.intercept,
            coefficients,
            means,
            feature_names: template.columns().to_vec(),
        })
    }

    pub fn margin(&self, x: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(x)
                .map(|(coef, value)| coef * value)
                .sum::<f64>()
    }

    /// Margin в точке средних значений.
    pub fn expected_margin(&self) -> f64 {
        self.margin(&self.means)
    }
}

impl AttritionClassifier for LogisticClassifier {
    fn predict_proba(&self, features: &FeatureVector) -> Result<f64> {
        ensure_width(features, self.coefficients.len())?;
        Ok(sigmoid(self.margin(features.values())))
    }

    fn kind(&self) -> &'static str {
        "logistic"
    }
}

impl Explainer for LogisticClassifier {
    fn explain(&self, features: &FeatureVector) -> Result<Explanation> {
        ensure_width(features, self.coefficients.len())?;
        let x = features.values();
        let values = self
            .coefficients
            .iter()
            .zip(x.iter().zip(&self.means))
            .map(|(coef, (value, mean))| coef * (value - mean))
            .collect();
        Ok(Explanation {
            base_value: self.expected_margin(),
            output_value: self.margin(x),
            values,
            data: x.to_vec(),
            feature_names: self.feature_names.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn template() -> FeatureTemplate {
        let defaults = HashMap::from([("MonthlyIncome".to_string(), 6500.0)]);
        FeatureTemplate::new(
            vec!["OverTime".into(), "MonthlyIncome".into(), "Age".into()],
            &defaults,
        )
        .unwrap()
    }

    fn model() -> LogisticClassifier {
        let document: LogisticDocument = serde_json::from_str(
            r#"{
                "intercept": -1.5,
                "coefficients": {"OverTime": 1.2, "MonthlyIncome": -0.0001},
                "means": {"OverTime": 0.28}
            }"#,
        )
        .unwrap();
        LogisticClassifier::from_document(document, &template()).unwrap()
    }

    #[test]
    fn test_predict_proba() {
        let template = template();
        let mut vector = template.base_vector();
        vector.set("OverTime", 1.0);
        vector.set("MonthlyIncome", 3000.0);

        let p = model().predict_proba(&vector).unwrap();
        let expected = sigmoid(-1.5 + 1.2 - 0.3);
        assert!((p - expected).abs() < 1e-12);
    }

    #[test]
    fn test_linear_explanation_is_locally_accurate() {
        let template = template();
        let mut vector = template.base_vector();
        vector.set("OverTime", 1.0);
        vector.set("MonthlyIncome", 3000.0);
        vector.set("Age", 29.0);

        let explanation = model().explain(&vector).unwrap();
        assert!((explanation.values[0] - 1.2 * 0.72).abs() < 1e-12);
        // Среднее дохода берётся из значений по умолчанию шаблона
        assert!((explanation.values[1] - -0.0001 * (3000.0 - 6500.0)).abs() < 1e-12);
        assert_eq!(explanation.values[2], 0.0);
        assert!((explanation.reconstructed_output() - explanation.output_value).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_unknown_columns() {
        let document: LogisticDocument = serde_json::from_str(
            r#"{"intercept": 0.0, "coefficients": {"Salary": 1.0}}"#,
        )
        .unwrap();
        let err = LogisticClassifier::from_document(document, &template()).unwrap_err();
        assert!(err.to_string().contains("Salary"));

        let document: LogisticDocument = serde_json::from_str(
            r#"{"intercept": 0.0, "coefficients": {}, "means": {"Salary": 1.0}}"#,
        )
        .unwrap();
        assert!(LogisticClassifier::from_document(document, &template()).is_err());
    }
}
