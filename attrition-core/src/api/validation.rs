//! Утилиты для валидации входных данных API.

use crate::form::{FormError, FormInput};
use axum::{http::StatusCode, response::Json};
use serde_json::{json, Value};

/// Разобранный запрос `/api/assess`.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessRequest {
    pub input: FormInput,
    pub sensitivity: Option<f64>,
}

/// Валидирует payload для endpoint `/api/assess`.
///
/// Ожидается объект `{"profile": {...}, "sensitivity": 0.35}`; оба ключа необязательны.
/// Значения полей профиля проверяются позже схемой формы.
pub fn parse_assess_request(payload: &Value) -> Result<AssessRequest, FormError> {
    let object = payload.as_object().ok_or(FormError::NotAnObject)?;

    if let Some(key) = object
        .keys()
        .find(|key| !matches!(key.as_str(), "profile" | "sensitivity"))
    {
        return Err(FormError::UnknownField(key.clone()));
    }

    let input = match object.get("profile") {
        None | Some(Value::Null) => FormInput::new(),
        Some(profile) => FormInput::from_json(profile)?,
    };

    let sensitivity = match object.get("sensitivity") {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.as_f64().ok_or_else(|| FormError::WrongType {
            field: "sensitivity".to_string(),
            expected: "a number",
        })?),
    };

    Ok(AssessRequest { input, sensitivity })
}

/// Создаёт ответ с ошибкой в едином формате API.
pub fn create_error_response(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({
            "status": "error",
            "error": message.into(),
        })),
    )
}
