//! HTTP сервер для API оценки риска.

use crate::api::validation::{create_error_response, parse_assess_request};
use crate::form::FormError;
use crate::{Analyzer, AnalyzerStats};
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

/// Состояние API сервера.
#[derive(Clone)]
pub struct ApiState {
    analyzer: Arc<Analyzer>,
    stats: Arc<RwLock<AnalyzerStats>>,
}

impl ApiState {
    pub fn new(analyzer: Arc<Analyzer>, stats: Arc<RwLock<AnalyzerStats>>) -> Self {
        Self { analyzer, stats }
    }

    pub fn stats(&self) -> Arc<RwLock<AnalyzerStats>> {
        Arc::clone(&self.stats)
    }
}

/// Обработчик для endpoint `/health`.
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "attrition-api"
    }))
}

/// Обработчик для endpoint `/api/form`.
///
/// Возвращает описание формы: секции, поля с ограничениями и ползунок чувствительности.
async fn form_handler(State(state): State<ApiState>) -> Json<Value> {
    Json(state.analyzer.describe_form())
}

/// Обработчик для endpoint `/api/model`.
async fn model_handler(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "model": state.analyzer.model_info(),
        "feature_count": state.analyzer.template().len(),
    }))
}

/// Обработчик для endpoint `/api/stats`.
async fn stats_handler(State(state): State<ApiState>) -> Json<Value> {
    let stats = state.stats.read().await;
    Json(json!({
        "status": "ok",
        "stats": *stats,
    }))
}

/// Обработчик для endpoint `/api/assess`.
///
/// Ошибки формы возвращаются с кодом 400, сбои модели с кодом 500.
async fn assess_handler(
    State(state): State<ApiState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    // Нечитаемое тело отвечает тем же JSON-конвертом, что и остальные ошибки
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "malformed assessment request body");
            return create_error_response(rejection.status(), rejection.body_text());
        }
    };

    let request = match parse_assess_request(&payload) {
        Ok(request) => request,
        Err(err) => {
            state.stats.write().await.record_failure(&anyhow::Error::from(err.clone()));
            warn!(error = %err, "rejected assessment request");
            return create_error_response(StatusCode::BAD_REQUEST, err.to_string());
        }
    };

    let started = Instant::now();
    let result = state.analyzer.assess(&request.input, request.sensitivity);
    {
        let mut stats = state.stats.write().await;
        match &result {
            Ok(assessment) => stats.record_assessment(assessment, started.elapsed().as_micros()),
            Err(err) => stats.record_failure(err),
        }
    }

    match result {
        Ok(assessment) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "assessment": assessment,
            })),
        ),
        Err(err) => match err.downcast_ref::<FormError>() {
            Some(form_error) => {
                warn!(error = %form_error, "rejected assessment request");
                create_error_response(StatusCode::BAD_REQUEST, form_error.to_string())
            }
            None => {
                error!("Assessment failed: {:#}", err);
                create_error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("assessment failed: {err:#}"),
                )
            }
        },
    }
}

/// Создаёт роутер для API.
pub fn create_router(state: ApiState, enable_cors: bool) -> Router {
    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/api/form", get(form_handler))
        .route("/api/model", get(model_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/assess", post(assess_handler))
        .with_state(state);

    if enable_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

/// HTTP сервер API.
///
/// # Примеры
///
/// ```no_run
/// # use attrition_core::api::{ApiServer, ApiState};
/// # use attrition_core::config::Config;
/// # use attrition_core::{Analyzer, AnalyzerStats};
/// # use std::sync::Arc;
/// # use tokio::sync::RwLock;
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::load("configs/attrition.yml")?;
/// let analyzer = Arc::new(Analyzer::from_config(&config)?);
/// let state = ApiState::new(analyzer, Arc::new(RwLock::new(AnalyzerStats::new())));
///
/// let handle = ApiServer::new("127.0.0.1:8501".parse()?, state).start().await?;
/// // Сервер работает в фоне
/// handle.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct ApiServer {
    /// Адрес для прослушивания
    addr: SocketAddr,
    state: ApiState,
    enable_cors: bool,
}

impl ApiServer {
    pub fn new(addr: SocketAddr, state: ApiState) -> Self {
        Self {
            addr,
            state,
            enable_cors: false,
        }
    }

    pub fn with_cors(mut self, enable_cors: bool) -> Self {
        self.enable_cors = enable_cors;
        self
    }

    /// Запускает API сервер в фоновой задаче.
    ///
    /// # Ошибки
    ///
    /// Возвращает ошибку, если не удалось запустить сервер (например, адрес уже занят).
    pub async fn start(self) -> Result<ApiServerHandle> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("Failed to bind API server to {}", self.addr))?;
        let local_addr = listener
            .local_addr()
            .context("Failed to read API server local address")?;

        info!("API server listening on http://{}", local_addr);

        let router = create_router(self.state, self.enable_cors);
        let server = axum::serve(listener, router);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let graceful = server.with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            });

            if let Err(e) = graceful.await {
                error!("API server error: {}", e);
            } else {
                info!("API server stopped");
            }
        });

        Ok(ApiServerHandle {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }
}

/// Handle для управления API сервером.
pub struct ApiServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl ApiServerHandle {
    /// Фактический адрес (полезно при запуске на порту 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Останавливает API сервер.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            tx.send(()).map_err(|_| {
                anyhow::anyhow!("Failed to send shutdown signal to API server (receiver dropped)")
            })?;
        }
        Ok(())
    }
}
