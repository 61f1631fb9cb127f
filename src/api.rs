use std::sync::Arc;

use shuttle_axum::axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::error::{InferError, StoreError};
use crate::extract::{compile_pattern, extract_candidates, infer_pattern, validate_match_count};
use crate::metrics::Metrics;
use crate::model::{DestinationId, PlatformKind, ReportConfigId, ScheduleKey, SourceId};
use crate::notify::Dispatcher;
use crate::pipeline::Pipeline;
use crate::scheduler::dispatch;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

/// Admin surface: health, metrics, run-now triggers, run history and the
/// pattern preview/inference actions. Previews never write to the store.
pub fn create_router(state: AppState, metrics: &Metrics) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/sources", get(list_sources))
        .route("/sources/{id}", delete(delete_source))
        .route("/sources/{id}/run", post(run_source))
        .route("/reports/{id}/run", post(run_report_now))
        .route("/reports/{id}/runs", get(list_runs))
        .route("/destinations", get(list_destinations))
        .route("/destinations/{id}/test", post(test_destination))
        .route("/preview/extract", post(preview_extract))
        .route("/preview/infer", post(preview_infer))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
        .merge(metrics.router())
}

fn store_error(e: StoreError) -> Response {
    let status = match e {
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::Referenced(_) => StatusCode::CONFLICT,
        StoreError::Poisoned | StoreError::Snapshot(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}

async fn list_sources(State(state): State<AppState>) -> Response {
    match state.pipeline.store.list_sources().await {
        Ok(sources) => Json(sources).into_response(),
        Err(e) => store_error(e),
    }
}

/// Refused with 409 while a report config still references the source.
async fn delete_source(State(state): State<AppState>, Path(id): Path<SourceId>) -> Response {
    match state.pipeline.store.delete_source(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => store_error(e),
    }
}

/// Destinations without their webhook URLs, which carry the access key.
#[derive(Debug, Serialize)]
struct DestinationView {
    id: DestinationId,
    name: String,
    kind: PlatformKind,
    enabled: bool,
}

async fn list_destinations(State(state): State<AppState>) -> Response {
    match state.pipeline.store.list_destinations().await {
        Ok(list) => Json(
            list.into_iter()
                .map(|d| DestinationView {
                    id: d.id,
                    name: d.name,
                    kind: d.kind,
                    enabled: d.enabled,
                })
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => store_error(e),
    }
}

async fn trigger(state: &AppState, key: ScheduleKey) -> Response {
    match dispatch(&state.pipeline, key).await {
        Ok(Some(_)) => (
            StatusCode::ACCEPTED,
            Json(json!({ "dispatched": key.to_string() })),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": format!("{key} is already running") })),
        )
            .into_response(),
        Err(e) => store_error(e),
    }
}

async fn run_source(State(state): State<AppState>, Path(id): Path<SourceId>) -> Response {
    trigger(&state, ScheduleKey::Source(id)).await
}

async fn run_report_now(State(state): State<AppState>, Path(id): Path<ReportConfigId>) -> Response {
    trigger(&state, ScheduleKey::Report(id)).await
}

async fn list_runs(State(state): State<AppState>, Path(id): Path<ReportConfigId>) -> Response {
    let store = state.pipeline.store.as_ref();
    if let Err(e) = store.get_report(id).await {
        return store_error(e);
    }
    match store.list_runs(id).await {
        Ok(runs) => Json(runs).into_response(),
        Err(e) => store_error(e),
    }
}

async fn test_destination(State(state): State<AppState>, Path(id): Path<DestinationId>) -> Response {
    let p = &state.pipeline;
    let dispatcher = Dispatcher::new(p.store.as_ref(), p.webhook.as_ref(), &p.settings.delivery);
    Json(dispatcher.send_test(id, p.now()).await).into_response()
}

/// Either a URL to fetch or an inline page body.
#[derive(Debug, Deserialize)]
struct PageInput {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

impl PageInput {
    async fn load(&self, p: &Pipeline) -> Result<String, Response> {
        if let Some(body) = &self.body {
            return Ok(body.clone());
        }
        let Some(url) = &self.url else {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "either `url` or `body` is required" })),
            )
                .into_response());
        };
        p.fetcher.fetch(url).await.map_err(|e| {
            (StatusCode::BAD_GATEWAY, Json(json!({ "error": e.to_string() }))).into_response()
        })
    }
}

#[derive(Debug, Deserialize)]
struct ExtractReq {
    #[serde(flatten)]
    page: PageInput,
    pattern: String,
}

#[derive(Debug, Serialize)]
struct ExtractResp {
    count: usize,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    candidates: Vec<String>,
}

async fn preview_extract(State(state): State<AppState>, Json(req): Json<ExtractReq>) -> Response {
    let body = match req.page.load(&state.pipeline).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let re = match compile_pattern(Some(&req.pattern)) {
        Ok(re) => re,
        Err(e) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    };
    let candidates = extract_candidates(&body, &re);
    let check = validate_match_count(candidates.len(), state.pipeline.settings.crawl.bounds());
    Json(ExtractResp {
        count: candidates.len(),
        valid: check.is_ok(),
        error: check.err().map(|e| e.to_string()),
        candidates,
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
struct InferReq {
    #[serde(flatten)]
    page: PageInput,
    #[serde(default)]
    hints: Vec<String>,
}

async fn preview_infer(State(state): State<AppState>, Json(req): Json<InferReq>) -> Response {
    let p = &state.pipeline;
    let body = match req.page.load(p).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    match infer_pattern(
        p.llm.as_ref(),
        &body,
        &req.hints,
        p.settings.crawl.bounds(),
        p.settings.llm_retry,
    )
    .await
    {
        Ok(inferred) => Json(inferred).into_response(),
        Err(e) => {
            let status = match e {
                InferError::Llm(_) => StatusCode::BAD_GATEWAY,
                InferError::Pattern(_) => StatusCode::UNPROCESSABLE_ENTITY,
            };
            (status, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}
