//! HTTP API анализатора риска увольнения.
//!
//! Модуль предоставляет REST API для фронтенда формы: описание формы,
//! метаданные модели, статистику и оценку риска.

mod server;
pub mod validation;

pub use server::{create_router, ApiServer, ApiServerHandle, ApiState};
