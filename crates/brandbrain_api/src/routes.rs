//! Route table and handlers.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use brandbrain_compile::{CompileError, CompileService, IncludeSet, KickoffOutcome, OverridesPatch};
use brandbrain_db::encode_ts;
use brandbrain_protocol::{BrandId, CompileRunId};

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CompileService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/brands/{id}/brandbrain/compile",
            axum::routing::post(compile),
        )
        .route(
            "/api/brands/{id}/brandbrain/compile/{run}/status",
            get(status),
        )
        .route("/api/brands/{id}/brandbrain/latest", get(latest))
        .route("/api/brands/{id}/brandbrain/history", get(history))
        .route(
            "/api/brands/{id}/brandbrain/overrides",
            get(get_overrides).patch(patch_overrides),
        )
        .with_state(state)
}

fn parse_brand(raw: &str) -> Result<BrandId, ApiError> {
    BrandId::parse(raw).map_err(|e| CompileError::Validation(e.to_string()).into())
}

fn parse_run(raw: &str) -> Result<CompileRunId, ApiError> {
    CompileRunId::parse(raw).map_err(|e| CompileError::Validation(e.to_string()).into())
}

#[derive(Debug, Default, Deserialize)]
struct CompileRequest {
    #[serde(default)]
    force_refresh: bool,
}

async fn compile(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<CompileRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let brand_id = parse_brand(&id)?;
    let request = match body {
        Ok(Json(request)) => request,
        // No body at all is a bare kickoff; a malformed one is a 400.
        Err(JsonRejection::MissingJsonContentType(_)) => CompileRequest::default(),
        Err(rejection) => {
            return Err(CompileError::Validation(rejection.to_string()).into());
        }
    };

    match state.service.kickoff(&brand_id, request.force_refresh).await? {
        KickoffOutcome::Enqueued {
            compile_run_id,
            poll_url,
        } => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "compile_run_id": compile_run_id,
                "status": "PENDING",
                "poll_url": poll_url,
            })),
        )
            .into_response()),
        KickoffOutcome::Unchanged { snapshot } => Ok((
            StatusCode::OK,
            Json(json!({
                "compile_run_id": snapshot.compile_run_id,
                "status": "UNCHANGED",
                "snapshot": {
                    "snapshot_id": snapshot.id,
                    "created_at": encode_ts(snapshot.created_at),
                    "snapshot_json": snapshot.snapshot,
                },
            })),
        )
            .into_response()),
    }
}

async fn status(
    State(state): State<AppState>,
    Path((id, run)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let brand_id = parse_brand(&id)?;
    let run_id = parse_run(&run)?;
    let response = state.service.get_status(&brand_id, &run_id).await?;
    Ok(Json(response).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct LatestQuery {
    include: Option<String>,
}

async fn latest(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LatestQuery>,
) -> Result<Response, ApiError> {
    let brand_id = parse_brand(&id)?;
    let include = match query.include.as_deref() {
        Some(raw) => IncludeSet::parse(raw)?,
        None => IncludeSet::default(),
    };
    let response = state.service.latest(&brand_id, include).await?;
    Ok(Json(response).into_response())
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    page: Option<u32>,
    page_size: Option<u32>,
}

async fn history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    let brand_id = parse_brand(&id)?;
    let response = state
        .service
        .history(
            &brand_id,
            query.page.unwrap_or(1),
            query.page_size.unwrap_or(10),
        )
        .await?;
    Ok(Json(response).into_response())
}

async fn get_overrides(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let brand_id = parse_brand(&id)?;
    let response = state.service.get_overrides(&brand_id).await?;
    Ok(Json(response).into_response())
}

async fn patch_overrides(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<OverridesPatch>, JsonRejection>,
) -> Result<Response, ApiError> {
    let brand_id = parse_brand(&id)?;
    let Json(patch) = body.map_err(|r| CompileError::Validation(r.to_string()))?;
    let response = state.service.patch_overrides(&brand_id, patch).await?;
    Ok(Json(response).into_response())
}
