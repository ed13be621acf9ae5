//! HTTP transport for the request and status surfaces.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::handler::{LicenseRequest, LicenseResponse, RequestError, RequestHandler};
use crate::identity::RemoteIdentity;
use crate::status::{to_table, StatusApi};

const API_PREFIX: &str = "/apis/proxyserver.licenses.appscode.com/v1alpha1";

#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<RequestHandler>,
    pub status: Arc<StatusApi>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(
            &format!("{API_PREFIX}/licenserequests"),
            post(create_license_request),
        )
        .route(
            &format!("{API_PREFIX}/licensestatuses"),
            get(list_license_statuses),
        )
        .route(
            &format!("{API_PREFIX}/licensestatuses/:id"),
            get(get_license_status),
        )
        .with_state(state)
}

/// Typed API failure, rendered as a `Status`-shaped JSON body.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

#[derive(Serialize)]
struct StatusBody {
    kind: &'static str,
    status: &'static str,
    reason: &'static str,
    message: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, reason, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, "BadRequest", m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, "NotFound", m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError", m),
        };
        let body = StatusBody {
            kind: "Status",
            status: "Failure",
            reason,
            message,
            code: code.as_u16(),
        };
        (code, Json(body)).into_response()
    }
}

impl From<RequestError> for ApiError {
    fn from(err: RequestError) -> Self {
        if err.is_bad_request() {
            ApiError::BadRequest(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

async fn create_license_request(
    State(state): State<AppState>,
    RemoteIdentity(user): RemoteIdentity,
    Json(request): Json<LicenseRequest>,
) -> Result<Json<LicenseResponse>, ApiError> {
    let response = state.handler.handle(user, &request).await?;
    Ok(Json(response))
}

#[derive(Deserialize)]
struct ListParams {
    output: Option<String>,
}

async fn list_license_statuses(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Response {
    let items = state.status.list();
    if params.output.as_deref() == Some("table") {
        Json(to_table(&items, Utc::now())).into_response()
    } else {
        Json(items).into_response()
    }
}

async fn get_license_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.status.get(&id) {
        Some(item) => Ok(Json(item).into_response()),
        None => Err(ApiError::NotFound(format!(
            "licensestatuses.proxyserver.licenses.appscode.com {id:?} not found"
        ))),
    }
}
