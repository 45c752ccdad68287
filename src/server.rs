//! HTTP service for quality assessment.
//!
//! Every request goes through one shared [`EngineQueue`], so no matter how
//! many clients connect, at most `--jobs` documents are assessed at once.

use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::future;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::{
    engine::{AssessmentMode, AssessmentRequest, MetricsRequest, QualityMetrics, QualityReport},
    errors::find_assess_error,
    prelude::*,
    queues::{
        engine::EngineQueue,
        work::{BatchSummary, WorkInput, WorkOutput},
    },
};

/// Batches can be much larger than single documents.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    engine: EngineQueue,
}

/// Build our router.
pub fn router(engine: EngineQueue) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/ocr/process", post(ocr_process))
        .route("/noise/process", post(noise_process))
        .route("/metrics/calculate", post(metrics_calculate))
        .route("/ocr/batch-process", post(batch_process))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { engine })
}

/// Serve until we receive Ctrl+C or SIGTERM.
pub async fn run_server(host: &str, port: u16, engine: EngineQueue) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("invalid address {}:{}", host, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    info!("Listening on http://{}", addr);
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;
    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", err);
            future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {}", err);
                future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// An error response. Caller mistakes are 400s, everything else is a 500.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    err: anyhow::Error,
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let status = match find_assess_error(&err) {
            Some(assess_err) if assess_err.is_input_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, err }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            err: anyhow!("invalid request: {}", rejection.body_text()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed: {:?}", self.err);
        } else {
            warn!("Rejected request: {:#}", self.err);
        }
        let body = ErrorBody {
            error: format!("{:#}", self.err),
        };
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct HealthResponse {
    healthy: bool,
    service: String,
    version: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        service: env!("CARGO_PKG_NAME").to_owned(),
        version: env!("CARGO_PKG_VERSION").to_owned(),
    })
}

#[instrument(level = "info", skip_all, fields(request_id = %Uuid::new_v4()))]
async fn ocr_process(
    State(state): State<AppState>,
    payload: Result<Json<AssessmentRequest>, JsonRejection>,
) -> Result<Json<QualityReport>, AppError> {
    let Json(request) = payload?;
    let report = state.engine.assess(request, AssessmentMode::Standard).await?;
    Ok(Json(report))
}

#[instrument(level = "info", skip_all, fields(request_id = %Uuid::new_v4()))]
async fn noise_process(
    State(state): State<AppState>,
    payload: Result<Json<AssessmentRequest>, JsonRejection>,
) -> Result<Json<QualityReport>, AppError> {
    let Json(request) = payload?;
    let report = state.engine.assess(request, AssessmentMode::Noisy).await?;
    Ok(Json(report))
}

#[instrument(level = "info", skip_all, fields(request_id = %Uuid::new_v4()))]
async fn metrics_calculate(
    State(state): State<AppState>,
    payload: Result<Json<MetricsRequest>, JsonRejection>,
) -> Result<Json<QualityMetrics>, AppError> {
    let Json(request) = payload?;
    Ok(Json(state.engine.metrics(request).await?))
}

/// A batch of documents. Each may have an `id`; we number those which don't.
#[derive(Debug, Deserialize)]
struct BatchRequest {
    documents: Vec<Value>,
}

/// The outcome for one document of a batch.
#[derive(Debug, Deserialize, Serialize)]
struct BatchResult {
    id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    report: Option<QualityReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct BatchResponse {
    results: Vec<BatchResult>,
    summary: BatchSummary,
}

/// Assess every document in a batch. One bad document doesn't fail the
/// others.
#[instrument(level = "info", skip_all, fields(request_id = %Uuid::new_v4()))]
async fn batch_process(
    State(state): State<AppState>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Json<BatchResponse>, AppError> {
    let Json(BatchRequest { documents }) = payload?;
    info!(documents = documents.len(), "Assessing batch");

    let outputs = future::join_all(documents.into_iter().enumerate().map(|(idx, document)| {
        let engine = state.engine.clone();
        async move {
            let WorkInput { id, data } = WorkInput::<AssessmentRequest>::from_json(document);
            let id = if id.is_null() { json!(idx) } else { id };
            let result = match data {
                Ok(request) => engine.assess(request, AssessmentMode::Standard).await,
                Err(err) => Err(err),
            };
            WorkOutput::from_result(id, result)
        }
    }))
    .await;

    let mut summary = BatchSummary::default();
    let results = outputs
        .into_iter()
        .map(|output| {
            summary.record(&output);
            BatchResult {
                id: output.id,
                report: output.data,
                error: (!output.errors.is_empty()).then(|| output.errors.join(": ")),
            }
        })
        .collect();
    Ok(Json(BatchResponse { results, summary }))
}
