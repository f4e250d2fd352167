//! Значения полей формы: сырой ввод, провалидированный профиль и ошибки.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Значение одного поля формы.
///
/// Числовые поля приходят как `Number`, варианты выбора и категории — как `Text`.
/// Строки из CSV всегда приходят как `Text` и приводятся к нужному типу при валидации.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Числовое значение, если оно есть.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(_) => None,
        }
    }

    /// Текстовое значение, если оно есть.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            FieldValue::Number(_) => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

/// Ошибки валидации пользовательского ввода.
///
/// Эти ошибки показываются пользователю как есть (HTTP 400 в API,
/// колонка `error` в пакетном режиме), поэтому сообщения должны быть понятны без контекста.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormError {
    #[error("form payload must be a JSON object")]
    NotAnObject,

    #[error("unknown form field `{0}`")]
    UnknownField(String),

    #[error("field `{0}` is fixed and cannot be set from the form")]
    FixedField(String),

    #[error("field `{field}` expects {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },

    #[error("field `{field}` must be a whole number (got {value})")]
    NotAnInteger { field: String, value: f64 },

    #[error("field `{field}` must be within {min}..={max} (got {value})")]
    OutOfRange {
        field: String,
        min: i64,
        max: i64,
        value: f64,
    },

    #[error("field `{field}` does not accept `{value}` (allowed: {allowed})")]
    UnknownOption {
        field: String,
        value: String,
        allowed: String,
    },

    #[error("sensitivity must be within {min}..={max} (got {value})")]
    SensitivityOutOfRange { min: f64, max: f64, value: f64 },
}

/// Сырой ввод формы: разреженное отображение ключ поля → значение.
///
/// Отсутствующие ключи при валидации заполняются значениями по умолчанию из схемы.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormInput {
    values: BTreeMap<String, FieldValue>,
}

impl FormInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавить значение поля (builder-стиль).
    pub fn with(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn with_number(self, key: impl Into<String>, value: f64) -> Self {
        self.with(key, FieldValue::Number(value))
    }

    pub fn with_text(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(key, FieldValue::Text(value.into()))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) {
        self.values.insert(key.into(), value);
    }

    /// Построить ввод из JSON-объекта.
    ///
    /// Допустимы только числа и строки; `null`, булевы значения, массивы и объекты отклоняются.
    pub fn from_json(payload: &Value) -> Result<Self, FormError> {
        let object = payload.as_object().ok_or(FormError::NotAnObject)?;
        let mut values = BTreeMap::new();
        for (key, value) in object {
            let value = match value {
                Value::Number(n) => FieldValue::Number(n.as_f64().ok_or_else(|| {
                    FormError::WrongType {
                        field: key.clone(),
                        expected: "a finite number",
                    }
                })?),
                Value::String(s) => FieldValue::Text(s.clone()),
                _ => {
                    return Err(FormError::WrongType {
                        field: key.clone(),
                        expected: "a number or a string",
                    })
                }
            };
            values.insert(key.clone(), value);
        }
        Ok(Self { values })
    }

    /// Построить ввод из строковых ячеек (строка CSV).
    ///
    /// Пустые ячейки пропускаются и при валидации получают значение по умолчанию.
    pub fn from_strings<'a, I>(cells: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let values = cells
            .into_iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(key, value)| (key.to_string(), FieldValue::Text(value.trim().to_string())))
            .collect();
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.values.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Провалидированный и полный профиль сотрудника.
///
/// Содержит значение для каждого редактируемого поля схемы. Создаётся только
/// через [`FormSchema::validate`](crate::form::FormSchema::validate).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EmployeeProfile {
    values: BTreeMap<String, FieldValue>,
}

impl EmployeeProfile {
    pub(crate) fn from_validated(values: BTreeMap<String, FieldValue>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.values.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
