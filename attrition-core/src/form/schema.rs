//! Статическая схема формы.
//!
//! Схема описывает, какие поля собирает форма, как они сгруппированы по секциям,
//! какие значения допустимы и в какие колонки вектора фич попадают. Порядок полей
//! совпадает с порядком на странице; порядок колонок задаёт шаблон фич, а не схема.

use crate::chart::{ABOUT, HOW_TO_READ, KEY_LEARNINGS};
use crate::form::profile::{EmployeeProfile, FieldValue, FormError, FormInput};
use crate::model::features::FeatureTemplate;
use crate::risk::SensitivityRange;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Секция страницы.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    EmployeeProfile,
    WorkConditions,
    SatisfactionEngagement,
    JobPersonalDetails,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::EmployeeProfile,
        Section::WorkConditions,
        Section::SatisfactionEngagement,
        Section::JobPersonalDetails,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Section::EmployeeProfile => "Employee Profile",
            Section::WorkConditions => "Work Conditions",
            Section::SatisfactionEngagement => "Satisfaction & Engagement",
            Section::JobPersonalDetails => "Job & Personal Details",
        }
    }
}

/// Вариант выбора: подпись в форме и числовое значение в векторе фич.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChoiceOption {
    pub label: String,
    pub value: f64,
}

impl ChoiceOption {
    fn new(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

/// Тип поля и его ограничения.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// Целое число в диапазоне `min..=max`.
    Integer { min: i64, max: i64, default: i64 },
    /// Выбор из фиксированного списка; `default` — индекс варианта по умолчанию.
    Choice {
        options: Vec<ChoiceOption>,
        default: usize,
    },
    /// Значение не редактируется и всегда равно `value`.
    Fixed { value: f64 },
    /// Категория, раскладываемая в индикаторные колонки `{column}_{option}`.
    /// Первый вариант — значение по умолчанию.
    OneHot { options: Vec<String> },
}

/// Описание одного поля формы.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    /// Ключ поля во входном JSON/CSV.
    pub key: String,
    /// Подпись поля на странице.
    pub label: String,
    pub section: Section,
    /// Целевая колонка; для one-hot полей — префикс индикаторных колонок.
    pub column: String,
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl FieldSpec {
    fn integer(key: &str, label: &str, column: &str, min: i64, max: i64, default: i64) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            section: Section::EmployeeProfile,
            column: column.to_string(),
            kind: FieldKind::Integer { min, max, default },
        }
    }

    fn choice(
        section: Section,
        key: &str,
        label: &str,
        column: &str,
        options: Vec<ChoiceOption>,
    ) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            section,
            column: column.to_string(),
            kind: FieldKind::Choice { options, default: 0 },
        }
    }

    fn fixed(key: &str, label: &str, column: &str, value: f64) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            section: Section::SatisfactionEngagement,
            column: column.to_string(),
            kind: FieldKind::Fixed { value },
        }
    }

    fn one_hot(key: &str, label: &str, prefix: &str, options: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            section: Section::JobPersonalDetails,
            column: prefix.to_string(),
            kind: FieldKind::OneHot {
                options: options.iter().map(|o| o.to_string()).collect(),
            },
        }
    }

    /// Имя индикаторной колонки для варианта one-hot поля.
    pub fn indicator_column(&self, option: &str) -> String {
        format!("{}_{}", self.column, option)
    }

    /// Редактируется ли поле пользователем.
    pub fn is_editable(&self) -> bool {
        !matches!(self.kind, FieldKind::Fixed { .. })
    }

    /// Значение поля по умолчанию (для фиксированных полей — `None`).
    pub fn default_value(&self) -> Option<FieldValue> {
        match &self.kind {
            FieldKind::Integer { default, .. } => Some(FieldValue::Number(*default as f64)),
            FieldKind::Choice { options, default } => options
                .get(*default)
                .map(|o| FieldValue::Text(o.label.clone())),
            FieldKind::Fixed { .. } => None,
            FieldKind::OneHot { options } => options.first().cloned().map(FieldValue::Text),
        }
    }

    /// Все колонки шаблона, которые может затронуть это поле.
    pub fn target_columns(&self) -> Vec<String> {
        match &self.kind {
            FieldKind::OneHot { options } => {
                options.iter().map(|o| self.indicator_column(o)).collect()
            }
            _ => vec![self.column.clone()],
        }
    }

    /// Привести сырое значение к каноническому виду и проверить ограничения.
    ///
    /// Канонический вид: число для целочисленных полей, подпись варианта для полей
    /// выбора, строка категории для one-hot полей. Неизвестные категории one-hot
    /// полей допускаются: при сборке вектора их индикаторы остаются по умолчанию.
    fn parse(&self, raw: &FieldValue) -> Result<FieldValue, FormError> {
        match &self.kind {
            FieldKind::Integer { min, max, .. } => {
                let value = match raw {
                    FieldValue::Number(n) => *n,
                    FieldValue::Text(s) => {
                        s.trim().parse::<f64>().map_err(|_| FormError::WrongType {
                            field: self.key.clone(),
                            expected: "a number",
                        })?
                    }
                };
                if !value.is_finite() || value.fract() != 0.0 {
                    return Err(FormError::NotAnInteger {
                        field: self.key.clone(),
                        value,
                    });
                }
                if value < *min as f64 || value > *max as f64 {
                    return Err(FormError::OutOfRange {
                        field: self.key.clone(),
                        min: *min,
                        max: *max,
                        value,
                    });
                }
                Ok(FieldValue::Number(value))
            }
            FieldKind::Choice { options, .. } => {
                let found = match raw {
                    FieldValue::Text(s) => options.iter().find(|o| o.label == s.trim()),
                    FieldValue::Number(n) => options.iter().find(|o| o.value == *n),
                };
                found
                    .map(|o| FieldValue::Text(o.label.clone()))
                    .ok_or_else(|| FormError::UnknownOption {
                        field: self.key.clone(),
                        value: raw.to_string(),
                        allowed: options
                            .iter()
                            .map(|o| o.label.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                    })
            }
            FieldKind::Fixed { .. } => Err(FormError::FixedField(self.key.clone())),
            FieldKind::OneHot { .. } => match raw {
                FieldValue::Text(s) => Ok(FieldValue::Text(s.trim().to_string())),
                FieldValue::Number(_) => Err(FormError::WrongType {
                    field: self.key.clone(),
                    expected: "a category name",
                }),
            },
        }
    }
}

/// Колонка схемы, отсутствующая в шаблоне фич.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingColumn {
    pub field: String,
    pub column: String,
    /// Индикатор one-hot группы (обычно это отброшенная при обучении первая категория).
    pub indicator: bool,
}

/// Схема формы.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormSchema {
    fields: Vec<FieldSpec>,
}

impl FormSchema {
    /// Стандартная схема формы оценки риска увольнения.
    pub fn standard() -> Self {
        let mut fields = vec![
            FieldSpec::integer("age", "Age", "Age", 18, 60, 30),
            FieldSpec::integer("distance_from_home", "Distance From Home", "DistanceFromHome", 1, 30, 10),
            FieldSpec::integer("monthly_income", "Monthly Income", "MonthlyIncome", 1000, 50000, 3000),
            FieldSpec::integer("total_working_years", "Total Working Years", "TotalWorkingYears", 0, 40, 8),
            FieldSpec::integer("years_at_company", "Years At Company", "YearsAtCompany", 0, 40, 2),
            FieldSpec::integer("years_in_current_role", "Years In Current Role", "YearsInCurrentRole", 0, 20, 2),
            FieldSpec::integer(
                "years_since_last_promotion",
                "Years Since Last Promotion",
                "YearsSinceLastPromotion",
                0,
                15,
                1,
            ),
            FieldSpec::integer("num_companies_worked", "Num Companies Worked", "NumCompaniesWorked", 0, 10, 2),
            FieldSpec::choice(
                Section::EmployeeProfile,
                "job_level",
                "Job Level",
                "JobLevel",
                numeric_options(1..=5),
            ),
            FieldSpec::choice(
                Section::WorkConditions,
                "over_time",
                "OverTime",
                "OverTime",
                vec![ChoiceOption::new("Yes", 1.0), ChoiceOption::new("No", 0.0)],
            ),
            FieldSpec::choice(
                Section::WorkConditions,
                "gender",
                "Gender",
                "Gender",
                vec![ChoiceOption::new("Male", 1.0), ChoiceOption::new("Female", 0.0)],
            ),
            FieldSpec::choice(
                Section::WorkConditions,
                "stock_option_level",
                "Stock Option Level",
                "StockOptionLevel",
                numeric_options(0..=3),
            ),
        ];

        // Удовлетворённость не спрашиваем: считаем нейтральной.
        for (key, label, column) in [
            ("job_satisfaction", "Job Satisfaction", "JobSatisfaction"),
            ("environment_satisfaction", "Environment Satisfaction", "EnvironmentSatisfaction"),
            ("relationship_satisfaction", "Relationship Satisfaction", "RelationshipSatisfaction"),
            ("work_life_balance", "Work Life Balance", "WorkLifeBalance"),
        ] {
            fields.push(FieldSpec::fixed(key, label, column, 3.0));
        }

        fields.push(FieldSpec::one_hot(
            "job_role",
            "Job Role",
            "JobRole",
            &[
                "Sales Executive",
                "Research Scientist",
                "Laboratory Technician",
                "Manufacturing Director",
                "Healthcare Representative",
                "Manager",
                "Sales Representative",
                "Research Director",
                "Human Resources",
            ],
        ));
        fields.push(FieldSpec::one_hot(
            "department",
            "Department",
            "Department",
            &["Sales", "Research & Development", "Human Resources"],
        ));
        fields.push(FieldSpec::one_hot(
            "marital_status",
            "Marital Status",
            "MaritalStatus",
            &["Single", "Married", "Divorced"],
        ));
        fields.push(FieldSpec::one_hot(
            "business_travel",
            "Business Travel",
            "BusinessTravel",
            &["Travel_Rarely", "Travel_Frequently", "Non-Travel"],
        ));

        Self { fields }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.key == key)
    }

    /// Секции, в которых есть хотя бы одно поле.
    pub fn sections(&self) -> Vec<Section> {
        Section::ALL
            .into_iter()
            .filter(|section| self.fields.iter().any(|f| f.section == *section))
            .collect()
    }

    /// Поля одной секции в порядке страницы.
    pub fn section_fields(&self, section: Section) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(move |f| f.section == section)
    }

    /// Проверить ввод и дополнить его значениями по умолчанию.
    ///
    /// # Ошибки
    ///
    /// * `UnknownField` — ключ не описан в схеме
    /// * `FixedField` — попытка задать нередактируемое поле
    /// * `WrongType`, `NotAnInteger`, `OutOfRange`, `UnknownOption` — значение не проходит ограничения поля
    pub fn validate(&self, input: &FormInput) -> Result<EmployeeProfile, FormError> {
        for key in input.keys() {
            match self.field(key) {
                None => return Err(FormError::UnknownField(key.to_string())),
                Some(field) if !field.is_editable() => {
                    return Err(FormError::FixedField(key.to_string()))
                }
                Some(_) => {}
            }
        }

        let mut values = BTreeMap::new();
        for field in &self.fields {
            let value = match input.get(&field.key) {
                Some(raw) => field.parse(raw)?,
                None => match field.default_value() {
                    Some(value) => value,
                    None => continue,
                },
            };
            values.insert(field.key.clone(), value);
        }

        Ok(EmployeeProfile::from_validated(values))
    }

    /// Колонки схемы, которых нет в шаблоне фич.
    pub fn template_coverage(&self, template: &FeatureTemplate) -> Vec<MissingColumn> {
        self.fields
            .iter()
            .flat_map(|field| {
                let indicator = matches!(field.kind, FieldKind::OneHot { .. });
                field
                    .target_columns()
                    .into_iter()
                    .filter(|column| template.column_index(column).is_none())
                    .map(move |column| MissingColumn {
                        field: field.key.clone(),
                        column,
                        indicator,
                    })
            })
            .collect()
    }

    /// JSON-описание страницы для фронтенда: секции, поля, ползунок чувствительности
    /// и статические текстовые блоки.
    pub fn describe(&self, sensitivity: &SensitivityRange) -> Value {
        let sections: Vec<Value> = self
            .sections()
            .iter()
            .map(|section| {
                json!({
                    "id": section,
                    "title": section.title(),
                    "fields": self.section_fields(*section).collect::<Vec<_>>(),
                })
            })
            .collect();

        json!({
            "title": "Employee Attrition Risk Analyzer",
            "sections": sections,
            "sensitivity": {
                "label": "Attrition Sensitivity Threshold",
                "min": sensitivity.min,
                "max": sensitivity.max,
                "step": sensitivity.step,
                "default": sensitivity.default,
            },
            "how_to_read": HOW_TO_READ,
            "about": ABOUT,
            "key_learnings": KEY_LEARNINGS,
        })
    }
}

impl Default for FormSchema {
    fn default() -> Self {
        Self::standard()
    }
}

fn numeric_options(range: std::ops::RangeInclusive<i64>) -> Vec<ChoiceOption> {
    range
        .map(|v| ChoiceOption::new(v.to_string(), v as f64))
        .collect()
}
