use crate::core::complaints::*;
use crate::core::ent::*;
use crate::core::error::AggregatorError;
use crate::core::scheduler::Scheduler;

use axum::Json;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub complaints: Arc<ComplaintLog>,
}

impl IntoResponse for AggregatorError {
    fn into_response(self) -> Response {
        let status = match self {
            AggregatorError::InvalidConfig { .. } => StatusCode::BAD_REQUEST,
            AggregatorError::UnknownTarget(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl IntoResponse for ComplaintError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

// The query parameters for targets index
#[derive(Debug, Deserialize, Default)]
pub struct Pagination {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SnapshotFilter {
    pub building: Option<String>,
    pub service: Option<String>,
}

pub async fn snapshot(
    filter: Option<Query<SnapshotFilter>>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let snapshot = state.scheduler.aggregator().get_snapshot();
    let Query(filter) = filter.unwrap_or_default();
    if filter.building.is_none() && filter.service.is_none() {
        return Json(snapshot.as_ref().clone());
    }
    Json(snapshot.filtered(filter.building.as_deref(), filter.service.as_deref()))
}

pub async fn summary(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scheduler.aggregator().get_snapshot().summary())
}

pub async fn targets_index(
    pagination: Option<Query<Pagination>>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let Query(pagination) = pagination.unwrap_or_default();

    let targets = state
        .scheduler
        .aggregator()
        .targets()
        .into_iter()
        .skip(pagination.offset.unwrap_or(0))
        .take(pagination.limit.unwrap_or(usize::MAX))
        .collect::<Vec<_>>();

    Json(targets)
}

pub async fn target_register(
    State(state): State<Arc<AppState>>,
    Json(input): Json<ServiceTarget>,
) -> Result<impl IntoResponse, AggregatorError> {
    let name = input.name.clone();
    state.scheduler.register(input)?;
    let target = state.scheduler.aggregator().target(&name)?;
    Ok((StatusCode::CREATED, Json(target)))
}

pub async fn target_delete(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, AggregatorError> {
    state.scheduler.deregister(&name)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn target_reset(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, AggregatorError> {
    state.scheduler.aggregator().reset_target(&name)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn target_poll(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Observation>, AggregatorError> {
    let observation = state.scheduler.aggregator().poll(&name).await?;
    Ok(Json(observation))
}

pub async fn target_history(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Observation>>, AggregatorError> {
    Ok(Json(state.scheduler.aggregator().history(&name)?))
}

pub async fn complaint_submit(
    State(state): State<Arc<AppState>>,
    Json(input): Json<NewComplaint>,
) -> Result<impl IntoResponse, ComplaintError> {
    let complaint = state.complaints.submit(input)?;
    Ok((StatusCode::CREATED, Json(complaint)))
}

pub async fn complaints_index(
    Query(filter): Query<ComplaintFilter>,
    pagination: Option<Query<Pagination>>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let Query(pagination) = pagination.unwrap_or_default();

    let complaints = state
        .complaints
        .list(&filter)
        .into_iter()
        .skip(pagination.offset.unwrap_or(0))
        .take(pagination.limit.unwrap_or(usize::MAX))
        .collect::<Vec<_>>();

    Json(complaints)
}

pub async fn complaints_summary(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.complaints.summary())
}
