//! Описание формы оценки риска увольнения.
//!
//! Модуль содержит статическую схему полей формы (секции, подписи, диапазоны,
//! списки вариантов) и типы для сырых и провалидированных значений полей.
//!
//! # Компоненты
//!
//! - **schema**: Схема полей и их целевых колонок в векторе фич
//! - **profile**: Отображение «поле → значение» и ошибки валидации формы

pub mod profile;
pub mod schema;

pub use profile::{EmployeeProfile, FieldValue, FormError, FormInput};
pub use schema::{ChoiceOption, FieldKind, FieldSpec, FormSchema, MissingColumn, Section};
