//! Построение вектора фич для классификатора.
//!
//! Этот модуль преобразует провалидированный профиль сотрудника в числовой вектор,
//! совместимый с моделью: длина и порядок колонок совпадают с `feature_columns`,
//! сохранёнными при обучении, а все незаполненные колонки берутся из шаблона
//! значений по умолчанию.

use crate::form::{EmployeeProfile, FieldKind, FieldValue, FormSchema};
use crate::model::artifacts::{load_default_values, load_feature_columns};
use anyhow::{bail, ensure, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Порядок колонок и индекс «имя → позиция», общий для шаблона и всех векторов.
#[derive(Debug, PartialEq)]
struct ColumnLayout {
    columns: Vec<String>,
    index: HashMap<String, usize>,
}

/// Шаблон вектора фич: порядок колонок обучения и строка значений по умолчанию.
///
/// Семантика совпадает с `DataFrame([defaults]).reindex(columns, fill_value=0)`:
/// значения по умолчанию для колонок, которых нет в `columns`, игнорируются,
/// а колонки без значения по умолчанию заполняются нулём.
#[derive(Debug, Clone)]
pub struct FeatureTemplate {
    layout: Arc<ColumnLayout>,
    defaults: Vec<f64>,
}

impl FeatureTemplate {
    /// Создать шаблон из списка колонок и значений по умолчанию.
    ///
    /// # Ошибки
    ///
    /// Пустой список колонок, повторяющиеся колонки или нечисловые значения по умолчанию.
    pub fn new(columns: Vec<String>, defaults: &HashMap<String, f64>) -> Result<Self> {
        ensure!(!columns.is_empty(), "feature_columns must not be empty");

        let mut index = HashMap::with_capacity(columns.len());
        for (position, column) in columns.iter().enumerate() {
            if index.insert(column.clone(), position).is_some() {
                bail!("duplicate column `{column}` in feature_columns");
            }
        }

        let mut row = vec![0.0; columns.len()];
        let mut ignored = 0usize;
        for (column, value) in defaults {
            match index.get(column) {
                Some(&position) => {
                    ensure!(
                        value.is_finite(),
                        "default value for `{column}` must be finite (got {value})"
                    );
                    row[position] = *value;
                }
                None => ignored += 1,
            }
        }
        if ignored > 0 {
            debug!(
                ignored,
                "default values without a matching feature column were ignored"
            );
        }

        Ok(Self {
            layout: Arc::new(ColumnLayout { columns, index }),
            defaults: row,
        })
    }

    /// Загрузить шаблон из JSON-артефактов обучения.
    pub fn from_files(columns_path: impl AsRef<Path>, defaults_path: impl AsRef<Path>) -> Result<Self> {
        let columns = load_feature_columns(columns_path)?;
        let defaults = load_default_values(defaults_path)?;
        Self::new(columns, &defaults)
    }

    /// Количество колонок (ширина вектора).
    pub fn len(&self) -> usize {
        self.layout.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.columns.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.layout.columns
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.layout.index.get(column).copied()
    }

    pub fn default_value(&self, column: &str) -> Option<f64> {
        self.column_index(column).map(|i| self.defaults[i])
    }

    /// Новый вектор, заполненный значениями по умолчанию.
    pub fn base_vector(&self) -> FeatureVector {
        FeatureVector {
            layout: Arc::clone(&self.layout),
            values: self.defaults.clone(),
        }
    }

    /// Проверить, что вектор совпадает со схемой обучения по длине и порядку колонок.
    pub fn check_conformance(&self, vector: &FeatureVector) -> Result<()> {
        ensure!(
            vector.values.len() == self.len() && vector.layout.columns.len() == self.len(),
            "feature vector has {} values, training schema expects {}",
            vector.values.len(),
            self.len()
        );
        if !Arc::ptr_eq(&vector.layout, &self.layout) {
            ensure!(
                vector.layout.columns == self.layout.columns,
                "feature vector column order differs from the training schema"
            );
        }
        Ok(())
    }
}

/// Вектор фич одного сотрудника в порядке колонок обучения.
#[derive(Debug, Clone)]
pub struct FeatureVector {
    layout: Arc<ColumnLayout>,
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn columns(&self) -> &[String] {
        &self.layout.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, column: &str) -> Option<f64> {
        self.layout.index.get(column).map(|&i| self.values[i])
    }

    /// Записать значение в колонку.
    ///
    /// Возвращает `false`, если колонки нет в шаблоне; вектор при этом не меняется
    /// (новые колонки никогда не добавляются).
    pub fn set(&mut self, column: &str, value: f64) -> bool {
        match self.layout.index.get(column) {
            Some(&i) => {
                self.values[i] = value;
                true
            }
            None => false,
        }
    }

    /// Значения в f32 для рантаймов, которые принимают только такие тензоры.
    pub fn to_f32(&self) -> Vec<f32> {
        self.values.iter().map(|&v| v as f32).collect()
    }
}

fn assign(vector: &mut FeatureVector, column: &str, value: f64) {
    if !vector.set(column, value) {
        debug!(column, "column is not part of the training schema, skipped");
    }
}

/// Построить вектор фич для профиля сотрудника.
///
/// # Аргументы
///
/// * `schema` - схема формы (какое поле в какую колонку попадает)
/// * `template` - шаблон колонок обучения и значений по умолчанию
/// * `profile` - провалидированный профиль
///
/// # Возвращает
///
/// `FeatureVector` той же длины и с тем же порядком колонок, что и шаблон.
///
/// # Примечания
///
/// - Для известной категории one-hot группы выбранный индикатор получает 1,
///   остальные индикаторы группы, присутствующие в шаблоне, получают 0
/// - Для неизвестной категории индикаторы группы остаются по умолчанию
pub fn build_features(
    schema: &FormSchema,
    template: &FeatureTemplate,
    profile: &EmployeeProfile,
) -> FeatureVector {
    let mut vector = template.base_vector();

    for field in schema.fields() {
        match &field.kind {
            FieldKind::Integer { .. } => {
                if let Some(value) = profile.get(&field.key).and_then(FieldValue::as_number) {
                    assign(&mut vector, &field.column, value);
                }
            }
            FieldKind::Choice { options, .. } => {
                let chosen = profile
                    .get(&field.key)
                    .and_then(FieldValue::as_text)
                    .and_then(|label| options.iter().find(|o| o.label == label));
                if let Some(option) = chosen {
                    assign(&mut vector, &field.column, option.value);
                }
            }
            FieldKind::Fixed { value } => assign(&mut vector, &field.column, *value),
            FieldKind::OneHot { options } => {
                let Some(chosen) = profile.get(&field.key).and_then(FieldValue::as_text) else {
                    continue;
                };
                if options.iter().any(|o| o == chosen) {
                    for option in options {
                        let indicator = if option == chosen { 1.0 } else { 0.0 };
                        vector.set(&field.indicator_column(option), indicator);
                    }
                } else {
                    warn!(
                        field = %field.key,
                        value = %chosen,
                        "unknown category, indicator columns keep their defaults"
                    );
                }
            }
        }
    }

    vector
}
