//! Thin HTTP adapter over the engine's public operations.
//!
//! Binds JSON payloads, calls the engine or extractor manager, shapes JSON
//! responses. No behavior of its own.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use drover_ocr::{ExtractorError, ExtractorManager};
use drover_protocol::{ScriptExecution, ScriptRequest};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::engine::ScriptEngine;
use crate::error::EngineError;

const DEFAULT_HISTORY_LIMIT: usize = 50;
const DEFAULT_CLEANUP_AGE_HOURS: i64 = 24;
const DEFAULT_OCR_LANGUAGES: &str = "eng+chi_sim+jpn+kor";

pub struct AppState {
    pub engine: Arc<ScriptEngine>,
    pub ocr: Arc<ExtractorManager>,
}

type SharedState = Arc<AppState>;

enum AppError {
    Validation(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> HttpResponse {
        let (status, message) = match self {
            AppError::Validation(message) => (StatusCode::BAD_REQUEST, message),
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            AppError::Conflict(message) => (StatusCode::CONFLICT, message),
            AppError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match &err {
            EngineError::ExecutionNotFound(_) => AppError::NotFound(err.to_string()),
            EngineError::ExecutionCollision(_) => AppError::Conflict(err.to_string()),
            _ => AppError::Validation(err.to_string()),
        }
    }
}

impl From<ExtractorError> for AppError {
    fn from(err: ExtractorError) -> Self {
        match &err {
            ExtractorError::EngineNotFound(_) | ExtractorError::NoEngines => {
                AppError::NotFound(err.to_string())
            }
            _ => AppError::Internal(err.to_string()),
        }
    }
}

pub fn router(state: SharedState) -> Router {
    let api = Router::new()
        .route("/execute", post(execute_script))
        .route("/execution/:id", get(get_execution).delete(cancel_execution))
        .route("/executions", get(list_executions))
        .route("/executions/history", get(execution_history))
        .route("/scripts", get(list_scripts))
        .route("/scripts/info", get(script_info))
        .route("/health", get(health))
        .route("/cleanup", post(cleanup))
        .route("/ocr/process", post(ocr_process))
        .route("/ocr/process/:engine", post(ocr_process_with))
        .route("/ocr/engines", get(ocr_engines))
        .route("/ocr/engines/status", get(ocr_engine_status))
        .route("/ocr/engines/default", post(ocr_set_default));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn execute_script(
    State(state): State<SharedState>,
    Json(request): Json<ScriptRequest>,
) -> Result<Json<Value>, AppError> {
    let response = state.engine.execute(request).await?;
    Ok(Json(serde_json::to_value(response).unwrap_or_default()))
}

/// Record plus a computed duration, the shape clients poll for status.
fn execution_json(execution: &ScriptExecution) -> Value {
    let mut value = serde_json::to_value(execution).unwrap_or_default();
    if let Value::Object(map) = &mut value {
        map.insert("duration".to_string(), json!(execution.duration_ms()));
    }
    value
}

fn execution_summary(execution: &ScriptExecution) -> Value {
    let mut item = json!({
        "id": execution.id,
        "script_name": execution.script_name,
        "device_id": execution.device_id,
        "start_time": execution.start_time,
        "status": execution.status,
        "duration": execution.duration_ms(),
    });
    if let Some(end_time) = execution.end_time {
        item["end_time"] = json!(end_time);
    }
    if let Some(result) = &execution.result {
        item["success"] = json!(result.success);
        item["message"] = json!(result.message);
        if let Some(error) = &result.error {
            item["error"] = json!(error);
        }
    }
    item
}

async fn get_execution(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let execution = state
        .engine
        .get_status(&id)
        .ok_or_else(|| AppError::NotFound(format!("execution `{id}` not found")))?;
    Ok(Json(execution_json(&execution)))
}

async fn cancel_execution(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.engine.cancel(&id).await?;
    Ok(Json(json!({ "message": "Execution cancelled successfully" })))
}

async fn list_executions(State(state): State<SharedState>) -> Json<Value> {
    let executions = state.engine.list();
    let items: Vec<Value> = executions.iter().map(execution_summary).collect();
    Json(json!({ "executions": items, "total": items.len() }))
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn execution_history(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> Json<Value> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let history = state.engine.history(limit);
    let items: Vec<Value> = history.iter().map(execution_summary).collect();
    Json(json!({ "history": items, "total": items.len(), "limit": limit }))
}

async fn list_scripts(State(state): State<SharedState>) -> Json<Value> {
    let names = state.engine.catalog().names();
    Json(json!({ "scripts": names, "total": names.len() }))
}

async fn script_info(State(state): State<SharedState>) -> Json<Value> {
    let descriptors = state.engine.catalog().descriptors();
    Json(json!({ "scripts": descriptors, "total": descriptors.len() }))
}

async fn health(State(state): State<SharedState>) -> Json<Value> {
    let (total, running) = state.engine.counts();
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().timestamp(),
        "version": env!("CARGO_PKG_VERSION"),
        "total_executions": total,
        "running_executions": running,
        "available_scripts": state.engine.catalog().len(),
    }))
}

#[derive(Deserialize, Default)]
struct CleanupRequest {
    max_age_hours: Option<i64>,
}

async fn cleanup(
    State(state): State<SharedState>,
    body: Option<Json<CleanupRequest>>,
) -> Json<Value> {
    let max_age_hours = body
        .and_then(|Json(request)| request.max_age_hours)
        .filter(|hours| *hours > 0)
        .unwrap_or(DEFAULT_CLEANUP_AGE_HOURS);
    let cleaned = state.engine.cleanup(max_age_hours);
    Json(json!({
        "message": "Cleanup completed",
        "cleaned": cleaned,
        "max_age_hours": max_age_hours,
    }))
}

#[derive(Deserialize)]
struct OcrRequest {
    image_base64: String,
    languages: Option<String>,
}

fn split_languages(languages: &Option<String>) -> (String, Vec<String>) {
    let joined = languages
        .clone()
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| DEFAULT_OCR_LANGUAGES.to_string());
    let list = joined.split('+').map(str::to_string).collect();
    (joined, list)
}

fn decode_image(image_base64: &str) -> Result<Vec<u8>, AppError> {
    BASE64
        .decode(image_base64.as_bytes())
        .map_err(|err| AppError::Validation(format!("invalid base64 image data: {err}")))
}

async fn ocr_process(
    State(state): State<SharedState>,
    Json(request): Json<OcrRequest>,
) -> Result<Json<Value>, AppError> {
    let image = decode_image(&request.image_base64)?;
    let (joined, languages) = split_languages(&request.languages);
    let positions = state.ocr.process(&image, &languages).await?;
    Ok(Json(json!({
        "success": true,
        "text_positions": positions,
        "total_found": positions.len(),
        "languages_used": joined,
    })))
}

async fn ocr_process_with(
    State(state): State<SharedState>,
    Path(engine): Path<String>,
    Json(request): Json<OcrRequest>,
) -> Result<Json<Value>, AppError> {
    let image = decode_image(&request.image_base64)?;
    let (joined, languages) = split_languages(&request.languages);
    let positions = state.ocr.process_with(&engine, &image, &languages).await?;
    Ok(Json(json!({
        "success": true,
        "engine_used": engine,
        "text_positions": positions,
        "total_found": positions.len(),
        "languages_used": joined,
    })))
}

async fn ocr_engines(State(state): State<SharedState>) -> Json<Value> {
    let engines = state.ocr.engines();
    Json(json!({ "engines": engines, "total": engines.len() }))
}

async fn ocr_engine_status(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({ "status": state.ocr.engine_status() }))
}

#[derive(Deserialize)]
struct DefaultEngineRequest {
    engine: String,
}

async fn ocr_set_default(
    State(state): State<SharedState>,
    Json(request): Json<DefaultEngineRequest>,
) -> Result<Json<Value>, AppError> {
    state
        .ocr
        .set_default(&request.engine)
        .map_err(|err| AppError::Validation(err.to_string()))?;
    Ok(Json(json!({
        "message": "Default OCR engine updated successfully",
        "default_engine": request.engine,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ScriptCatalog;
    use crate::persistence::ExecutionStore;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use drover_broker::mock::MockCommandPublisher;
    use tower::ServiceExt;

    fn test_router() -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ocr = Arc::new(ExtractorManager::new());
        let engine = Arc::new(ScriptEngine::new(
            Arc::new(MockCommandPublisher::new()),
            Arc::new(ScriptCatalog::with_builtin_scripts()),
            Arc::clone(&ocr),
            ExecutionStore::new(dir.path()),
        ));
        let state = Arc::new(AppState { engine, ocr });
        (router(state), dir)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn execute_rejects_missing_device_without_side_effects() {
        let (router, _dir) = test_router();

        let response = router
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/execute",
                json!({"device_id": "", "script_name": "wait"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // No execution record was created.
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/executions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["total"], 0);
    }

    #[tokio::test]
    async fn execute_rejects_unknown_script() {
        let (router, _dir) = test_router();

        let response = router
            .oneshot(json_request(
                Method::POST,
                "/api/v1/execute",
                json!({"device_id": "SN1", "script_name": "no_such_script"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("no_such_script"));
    }

    #[tokio::test]
    async fn unknown_execution_is_404() {
        let (router, _dir) = test_router();

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/execution/SN1_wait_0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_counts_and_version() {
        let (router, _dir) = test_router();

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["running_executions"], 0);
        assert_eq!(body["available_scripts"], 14);
        assert!(body["version"].as_str().is_some());
    }

    #[tokio::test]
    async fn scripts_info_exposes_descriptors() {
        let (router, _dir) = test_router();

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/scripts/info")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["total"], 14);
        let scripts = body["scripts"].as_array().unwrap();
        assert!(scripts
            .iter()
            .any(|s| s["name"] == "wait" && s["parameters"]["seconds"].is_string()));
    }

    #[tokio::test]
    async fn ocr_process_rejects_bad_base64() {
        let (router, _dir) = test_router();

        let response = router
            .oneshot(json_request(
                Method::POST,
                "/api/v1/ocr/process",
                json!({"image_base64": "!!not-base64!!"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ocr_process_without_engines_is_404() {
        let (router, _dir) = test_router();

        let response = router
            .oneshot(json_request(
                Method::POST,
                "/api/v1/ocr/process",
                json!({"image_base64": "cGluZw=="}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cleanup_defaults_to_24_hours() {
        let (router, _dir) = test_router();

        let response = router
            .oneshot(json_request(Method::POST, "/api/v1/cleanup", json!({})))
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["max_age_hours"], 24);
        assert_eq!(body["cleaned"], 0);
    }
}
