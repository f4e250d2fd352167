pub mod api;
pub mod batch;
pub mod chart;
pub mod config;
pub mod form;
pub mod model;
pub mod risk;

use anyhow::{ensure, Context, Result};
use chrono::{DateTime, Utc};
use config::Config;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{ApiServer, ApiState};
use crate::chart::AttributionChart;
use crate::form::{FormError, FormInput, FormSchema};
use crate::model::artifacts::{load_model, LoadedModel, ModelInfo};
use crate::model::explain::Explanation;
use crate::model::features::{build_features, FeatureTemplate};
use crate::risk::{RiskBands, RiskLevel, SensitivityRange};

/// Значение одной колонки вектора фич, переданного модели.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureValue {
    pub column: String,
    pub value: f64,
}

/// Результат оценки риска для одного сотрудника.
#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    pub assessment_id: Uuid,
    pub assessed_at: DateTime<Utc>,
    /// Вероятность увольнения в диапазоне [0.0, 1.0].
    pub probability: f64,
    pub risk_level: RiskLevel,
    pub risk_label: &'static str,
    pub risk_color: &'static str,
    /// Порог чувствительности, с которым проводилась оценка.
    pub sensitivity: f64,
    /// `probability >= sensitivity`.
    pub flagged: bool,
    /// Вектор фич в порядке колонок обучения.
    pub features_used: Vec<FeatureValue>,
    /// Вклады фич (нет, если модель не поддерживает объяснения).
    pub explanation: Option<Explanation>,
    pub chart: Option<AttributionChart>,
}

/// Анализатор риска увольнения.
///
/// Держит загруженные один раз артефакты (шаблон фич и модель) и не имеет
/// изменяемого состояния, поэтому разделяется между обработчиками через `Arc`.
#[derive(Debug)]
pub struct Analyzer {
    schema: FormSchema,
    template: FeatureTemplate,
    model: LoadedModel,
    bands: RiskBands,
    sensitivity: SensitivityRange,
    max_display: usize,
}

impl Analyzer {
    /// Загрузить артефакты, указанные в конфигурации.
    ///
    /// # Ошибки
    ///
    /// Файлы артефактов не читаются, имеют неверный формат, или модель ссылается
    /// на колонки, которых нет в шаблоне.
    pub fn from_config(config: &Config) -> Result<Self> {
        let artifacts = &config.artifacts;
        let template = FeatureTemplate::from_files(
            &artifacts.feature_columns_path,
            &artifacts.default_values_path,
        )
        .context("Failed to load training feature template")?;
        info!(
            columns = template.len(),
            path = %artifacts.feature_columns_path.display(),
            "feature template loaded"
        );

        let model = load_model(&artifacts.model_path, artifacts.model_format, &template)
            .context("Failed to load attrition model")?;

        Ok(Self::from_parts(FormSchema::standard(), template, model, config))
    }

    /// Собрать анализатор из уже загруженных частей.
    pub fn from_parts(
        schema: FormSchema,
        template: FeatureTemplate,
        model: LoadedModel,
        config: &Config,
    ) -> Self {
        for missing in schema.template_coverage(&template) {
            if missing.indicator {
                debug!(
                    field = %missing.field,
                    column = %missing.column,
                    "one-hot indicator is not a training column (dropped baseline category)"
                );
            } else {
                warn!(
                    field = %missing.field,
                    column = %missing.column,
                    "form field is not a training column and will not reach the model"
                );
            }
        }

        Self {
            schema,
            template,
            model,
            bands: config.risk,
            sensitivity: config.sensitivity,
            max_display: config.chart.max_display,
        }
    }

    pub fn schema(&self) -> &FormSchema {
        &self.schema
    }

    pub fn template(&self) -> &FeatureTemplate {
        &self.template
    }

    pub fn model_info(&self) -> &ModelInfo {
        &self.model.info
    }

    pub fn sensitivity_range(&self) -> &SensitivityRange {
        &self.sensitivity
    }

    /// Описание формы для фронтенда.
    pub fn describe_form(&self) -> serde_json::Value {
        self.schema.describe(&self.sensitivity)
    }

    /// Оценить риск увольнения по данным формы.
    ///
    /// Ошибки ввода возвращаются как [`FormError`] внутри `anyhow::Error`
    /// (проверяются через `downcast_ref::<FormError>()`); остальные ошибки означают
    /// сбой модели или несоответствие артефактов.
    pub fn assess(&self, input: &FormInput, sensitivity: Option<f64>) -> Result<Assessment> {
        let sensitivity = self.sensitivity.resolve(sensitivity)?;
        let profile = self.schema.validate(input)?;

        let features = build_features(&self.schema, &self.template, &profile);
        self.template.check_conformance(&features)?;

        let probability = self.model.classifier.predict_proba(&features)?;
        ensure!(
            probability.is_finite() && (0.0..=1.0).contains(&probability),
            "model returned an invalid probability: {probability}"
        );

        let risk_level = self.bands.classify(probability);
        let flagged = probability >= sensitivity;

        let explanation = self
            .model
            .explainer
            .as_ref()
            .map(|explainer| explainer.explain(&features))
            .transpose()
            .context("Failed to explain prediction")?;
        let chart = explanation
            .as_ref()
            .map(|explanation| AttributionChart::from_explanation(explanation, self.max_display));

        let features_used = features
            .columns()
            .iter()
            .zip(features.values())
            .map(|(column, value)| FeatureValue {
                column: column.clone(),
                value: *value,
            })
            .collect();

        let assessment = Assessment {
            assessment_id: Uuid::new_v4(),
            assessed_at: Utc::now(),
            probability,
            risk_level,
            risk_label: risk_level.label(),
            risk_color: risk_level.color(),
            sensitivity,
            flagged,
            features_used,
            explanation,
            chart,
        };

        debug!(
            assessment_id = %assessment.assessment_id,
            probability,
            risk = %risk_level,
            flagged,
            "assessment completed"
        );

        Ok(assessment)
    }
}

/// Статистика оценок.
///
/// Собирается обработчиками API и пакетным режимом: количество оценок по уровням
/// риска, отклонённые формы, ошибки модели и время выполнения.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalyzerStats {
    total_assessments: u64,
    low_risk: u64,
    medium_risk: u64,
    high_risk: u64,
    flagged: u64,
    /// Формы, отклонённые валидацией.
    rejected: u64,
    /// Сбои модели или артефактов.
    errors: u64,
    total_duration_us: u128,
    max_duration_us: u128,
}

impl AnalyzerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Учесть успешную оценку.
    pub fn record_assessment(&mut self, assessment: &Assessment, duration_us: u128) {
        self.total_assessments += 1;
        match assessment.risk_level {
            RiskLevel::Low => self.low_risk += 1,
            RiskLevel::Medium => self.medium_risk += 1,
            RiskLevel::High => self.high_risk += 1,
        }
        if assessment.flagged {
            self.flagged += 1;
        }
        self.total_duration_us += duration_us;
        self.max_duration_us = self.max_duration_us.max(duration_us);
    }

    /// Учесть ошибку оценки: ошибки формы и сбои модели считаются раздельно.
    pub fn record_failure(&mut self, error: &anyhow::Error) {
        if error.downcast_ref::<FormError>().is_some() {
            self.rejected += 1;
        } else {
            self.errors += 1;
        }
    }

    pub fn total_assessments(&self) -> u64 {
        self.total_assessments
    }

    pub fn count(&self, level: RiskLevel) -> u64 {
        match level {
            RiskLevel::Low => self.low_risk,
            RiskLevel::Medium => self.medium_risk,
            RiskLevel::High => self.high_risk,
        }
    }

    pub fn flagged(&self) -> u64 {
        self.flagged
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }

    /// Среднее время успешной оценки в миллисекундах (0.0, если оценок не было).
    pub fn average_duration_ms(&self) -> f64 {
        if self.total_assessments > 0 {
            self.total_duration_us as f64 / self.total_assessments as f64 / 1000.0
        } else {
            0.0
        }
    }

    pub fn log_stats(&self) {
        info!(
            "Analyzer stats: {} assessments (low {}, medium {}, high {}, flagged {}), \
             {} rejected forms, {} errors, avg: {:.3}ms, max: {:.3}ms",
            self.total_assessments,
            self.low_risk,
            self.medium_risk,
            self.high_risk,
            self.flagged,
            self.rejected,
            self.errors,
            self.average_duration_ms(),
            self.max_duration_us as f64 / 1000.0
        );
    }
}

/// Оценить форму и записать результат в статистику.
pub fn assess_and_record(
    analyzer: &Analyzer,
    stats: &mut AnalyzerStats,
    input: &FormInput,
    sensitivity: Option<f64>,
) -> Result<Assessment> {
    let started = Instant::now();
    let result = analyzer.assess(input, sensitivity);
    match &result {
        Ok(assessment) => stats.record_assessment(assessment, started.elapsed().as_micros()),
        Err(err) => stats.record_failure(err),
    }
    result
}

/// Запустить HTTP API и работать до сигнала завершения.
///
/// # Параметры
///
/// - `config`: конфигурация (артефакты и адрес API)
/// - `shutdown_rx`: канал, по которому приходит `true` для остановки
pub async fn run_server(config: Config, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
    info!("Initializing attrition risk analyzer");

    let analyzer = Arc::new(Analyzer::from_config(&config)?);
    let stats = Arc::new(RwLock::new(AnalyzerStats::new()));
    let addr = config.api.socket_addr()?;

    let state = ApiState::new(Arc::clone(&analyzer), Arc::clone(&stats));
    let handle = ApiServer::new(addr, state)
        .with_cors(config.api.enable_cors)
        .start()
        .await?;

    info!(addr = %handle.local_addr(), "attrition API is ready");

    while !*shutdown_rx.borrow_and_update() {
        if shutdown_rx.changed().await.is_err() {
            break;
        }
    }

    info!("Shutdown signal received, stopping API server");
    handle.shutdown().await?;
    stats.read().await.log_stats();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::FieldValue;
    use crate::model::artifacts::ModelFormat;
    use crate::model::classifier::{AttritionClassifier, StubClassifier};
    use crate::model::logistic::{LogisticClassifier, LogisticDocument};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn template() -> FeatureTemplate {
        let columns = ["Age", "MonthlyIncome", "OverTime", "JobRole_Sales Executive"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        FeatureTemplate::new(columns, &HashMap::from([("Age".to_string(), 36.0)])).unwrap()
    }

    fn info(kind: &str, explainable: bool) -> ModelInfo {
        ModelInfo {
            path: PathBuf::from("memory"),
            format: ModelFormat::Json,
            kind: kind.to_string(),
            sha256: String::new(),
            file_size: 0,
            loaded_at: Utc::now(),
            explainable,
        }
    }

    fn stub_analyzer(probability: f64) -> Analyzer {
        let classifier: Arc<dyn AttritionClassifier> = Arc::new(StubClassifier::new(probability));
        let model = LoadedModel {
            classifier,
            explainer: None,
            info: info("stub", false),
        };
        Analyzer::from_parts(
            FormSchema::standard(),
            template(),
            model,
            &Config::with_artifacts_dir("unused"),
        )
    }

    fn logistic_analyzer() -> Analyzer {
        let template = template();
        let document: LogisticDocument = serde_json::from_str(
            r#"{"intercept": -1.0, "coefficients": {"OverTime": 1.5, "Age": -0.02}}"#,
        )
        .unwrap();
        let model = Arc::new(LogisticClassifier::from_document(document, &template).unwrap());
        let loaded = LoadedModel {
            classifier: model.clone() as Arc<dyn AttritionClassifier>,
            explainer: Some(model as Arc<dyn crate::model::explain::Explainer>),
            info: info("logistic", true),
        };
        Analyzer::from_parts(
            FormSchema::standard(),
            template,
            loaded,
            &Config::with_artifacts_dir("unused"),
        )
    }

    #[test]
    fn test_assess_tiers_and_flag() {
        let assessment = stub_analyzer(0.10).assess(&FormInput::new(), None).unwrap();
        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert_eq!(assessment.risk_label, "Low Risk");
        assert!(!assessment.flagged);
        assert_eq!(assessment.sensitivity, 0.35);
        assert!(assessment.chart.is_none());

        let assessment = stub_analyzer(0.25).assess(&FormInput::new(), Some(0.2)).unwrap();
        assert_eq!(assessment.risk_level, RiskLevel::Medium);
        assert!(assessment.flagged);

        let assessment = stub_analyzer(0.35).assess(&FormInput::new(), None).unwrap();
        assert_eq!(assessment.risk_level, RiskLevel::High);
        assert_eq!(assessment.risk_color, "red");
        assert!(assessment.flagged);
    }

    #[test]
    fn test_assess_features_follow_template() {
        let input = FormInput::new()
            .with_number("age", 45.0)
            .with_text("over_time", "Yes")
            .with_text("job_role", "Sales Executive");
        let assessment = stub_analyzer(0.5).assess(&input, None).unwrap();

        let columns: Vec<_> = assessment.features_used.iter().map(|f| f.column.as_str()).collect();
        assert_eq!(columns, vec!["Age", "MonthlyIncome", "OverTime", "JobRole_Sales Executive"]);
        let values: Vec<_> = assessment.features_used.iter().map(|f| f.value).collect();
        assert_eq!(values, vec![45.0, 3000.0, 1.0, 1.0]);
    }

    #[test]
    fn test_assess_form_errors_are_distinguishable() {
        let analyzer = stub_analyzer(0.5);
        let input = FormInput::new().with("age", FieldValue::Number(99.0));
        let err = analyzer.assess(&input, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FormError>(),
            Some(FormError::OutOfRange { .. })
        ));

        let err = analyzer.assess(&FormInput::new(), Some(0.9)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FormError>(),
            Some(FormError::SensitivityOutOfRange { .. })
        ));
    }

    #[test]
    fn test_assess_with_explainer_builds_chart() {
        let input = FormInput::new().with_text("over_time", "Yes");
        let assessment = logistic_analyzer().assess(&input, None).unwrap();

        let explanation = assessment.explanation.as_ref().unwrap();
        assert!((explanation.reconstructed_output() - explanation.output_value).abs() < 1e-9);
        let chart = assessment.chart.as_ref().unwrap();
        assert_eq!(chart.bars.len(), 4);
        assert_eq!(chart.bars[0].feature.as_deref(), Some("OverTime"));
    }

    #[test]
    fn test_stats_record_outcomes() {
        let analyzer = stub_analyzer(0.4);
        let mut stats = AnalyzerStats::new();

        assess_and_record(&analyzer, &mut stats, &FormInput::new(), None).unwrap();
        let bad = FormInput::new().with_number("salary", 1.0);
        assert!(assess_and_record(&analyzer, &mut stats, &bad, None).is_err());
        stats.record_failure(&anyhow::anyhow!("model crashed"));

        assert_eq!(stats.total_assessments(), 1);
        assert_eq!(stats.count(RiskLevel::High), 1);
        assert_eq!(stats.flagged(), 1);
        assert_eq!(stats.rejected(), 1);
        assert_eq!(stats.errors(), 1);
        assert!(stats.average_duration_ms() >= 0.0);
        stats.log_stats();
    }

    #[test]
    fn test_empty_stats() {
        let stats = AnalyzerStats::new();
        assert_eq!(stats.total_assessments(), 0);
        assert_eq!(stats.average_duration_ms(), 0.0);
    }
}
