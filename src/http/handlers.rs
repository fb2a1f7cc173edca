//! Request handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::pipeline::validation::{parse_page, validate_search, validate_submit, ValidationError};
use crate::pipeline::Submission;
use crate::store::{LogKind, MessageFilter, MessageRecord, StatusFilter};

use super::server::HttpState;

/// Records per page, matching the original gateway's listing pages.
const PAGE_SIZE: usize = 5;

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct SendParams {
    #[serde(default)]
    pub src: String,
    #[serde(default)]
    pub dest: String,
    #[serde(default)]
    pub cont: String,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub result: i32,
    pub error: String,
}

pub async fn send_form(
    State(state): State<Arc<HttpState>>,
    Form(params): Form<SendParams>,
) -> Response {
    submit(state, params).await
}

pub async fn send_query(
    State(state): State<Arc<HttpState>>,
    Query(params): Query<SendParams>,
) -> Response {
    submit(state, params).await
}

async fn submit(state: Arc<HttpState>, params: SendParams) -> Response {
    if params.dest.is_empty() || params.cont.is_empty() {
        return Json(SendResponse {
            result: -1,
            error: "parameters 'dest' and 'cont' are required".to_string(),
        })
        .into_response();
    }

    if let Err(e) = validate_submit(&params.src, &params.dest, &params.cont) {
        return Json(SendResponse {
            result: -1,
            error: e.to_string(),
        })
        .into_response();
    }

    debug!(dest = %params.dest, "accepting submission");

    let submission = Submission {
        source: params.src,
        destination: params.dest,
        content: params.cont,
    };

    match state.queue.enqueue(submission).await {
        Ok(()) => Json(SendResponse {
            result: 0,
            error: String::new(),
        })
        .into_response(),
        Err(e) => Json(SendResponse {
            result: -1,
            error: e.to_string(),
        })
        .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub page: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub dest: String,
    #[serde(default)]
    pub src: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub total: u64,
    pub page: usize,
    pub pages: usize,
    pub items: Vec<MessageRecord>,
}

pub async fn list_messages(
    State(state): State<Arc<HttpState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, ApiError> {
    list(state, LogKind::Outbound, params)
}

pub async fn list_inbound(
    State(state): State<Arc<HttpState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, ApiError> {
    list(state, LogKind::Inbound, params)
}

fn list(
    state: Arc<HttpState>,
    log: LogKind,
    params: ListParams,
) -> Result<Json<ListResponse>, ApiError> {
    let page = parse_page(&params.page)?;
    validate_search(&params.dest, &params.src, &params.content)?;
    let status = StatusFilter::from_param(&params.status).map_err(ApiError::bad_request)?;

    let filter = MessageFilter {
        content: non_empty(params.content),
        destination: non_empty(params.dest),
        source: non_empty(params.src),
        status,
    };

    let offset = (page - 1) * PAGE_SIZE;
    let (total, items) = if filter.is_empty() {
        (
            state.store.count(log).map_err(ApiError::internal)?,
            state
                .store
                .list(log, offset, PAGE_SIZE)
                .map_err(ApiError::internal)?,
        )
    } else {
        (
            state
                .store
                .count_matching(log, &filter)
                .map_err(ApiError::internal)?,
            state
                .store
                .scan(log, &filter, offset, PAGE_SIZE)
                .map_err(ApiError::internal)?,
        )
    };

    Ok(Json(ListResponse {
        total,
        page,
        pages: (total as usize).div_ceil(PAGE_SIZE),
        items,
    }))
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

pub async fn list_pending(
    State(state): State<Arc<HttpState>>,
) -> Result<Json<Vec<MessageRecord>>, ApiError> {
    let pending = state.store.list_pending().map_err(ApiError::internal)?;
    Ok(Json(pending))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    /// Inbound messages received.
    pub received: u64,
    /// Submissions still awaiting their response.
    pub pending: u64,
}

pub async fn stats(
    State(state): State<Arc<HttpState>>,
) -> Result<Json<StatsResponse>, ApiError> {
    let traffic = state.store.stats().map_err(ApiError::internal)?;
    let received = state
        .store
        .count(LogKind::Inbound)
        .map_err(ApiError::internal)?;
    let pending = state.store.list_pending().map_err(ApiError::internal)?.len() as u64;

    Ok(Json(StatsResponse {
        total: traffic.total,
        success: traffic.success,
        failed: traffic.failed,
        received,
        pending,
    }))
}

pub async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn readyz(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    if state.manager.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
