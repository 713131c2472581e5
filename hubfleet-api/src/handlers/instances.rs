use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hubfleet_common::InstanceView;
use hubfleet_orchestrator::{CancelOutcome, CreateRequest, OrchestratorError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::app::state::AppState;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateInstanceRequest {
    /// External billing customer id; replays with the same id are idempotent.
    pub billing_id: String,
    pub subscription_id: Option<String>,
    /// Contact address; its local part seeds the slug.
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

pub struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            OrchestratorError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            OrchestratorError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            OrchestratorError::SlugExhausted(_) => (StatusCode::INTERNAL_SERVER_ERROR, "slug_exhausted"),
            OrchestratorError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        let message = if status.is_server_error() {
            tracing::error!(error = %self.0, "❌ request failed");
            "internal error".to_string()
        } else {
            self.0.to_string()
        };
        (
            status,
            Json(ErrorBody {
                error: code.to_string(),
                message,
            }),
        )
            .into_response()
    }
}

#[utoipa::path(
    post,
    path = "/instances",
    request_body = CreateInstanceRequest,
    responses(
        (status = 202, description = "Instance accepted, provisioning started", body = InstanceView),
        (status = 200, description = "Instance already exists for this billing id", body = InstanceView),
        (status = 400, description = "Malformed request", body = ErrorBody)
    )
)]
pub async fn create_instance(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateInstanceRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|rej| OrchestratorError::InvalidRequest(rej.body_text()))?;
    let intake = state
        .orchestrator
        .create(CreateRequest {
            billing_id: req.billing_id,
            subscription_id: req.subscription_id,
            email: req.email,
        })
        .await?;

    let status = if intake.is_new() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(InstanceView::from(intake.record()))))
}

#[utoipa::path(
    get,
    path = "/instances/{slug}",
    params(("slug" = String, Path, description = "Instance slug")),
    responses(
        (status = 200, description = "Instance", body = InstanceView),
        (status = 404, description = "Unknown slug", body = ErrorBody)
    )
)]
pub async fn get_instance(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<InstanceView>, ApiError> {
    let record = state.orchestrator.get(&slug).await?;
    Ok(Json(InstanceView::from(&record)))
}

#[utoipa::path(
    delete,
    path = "/instances/{slug}",
    params(("slug" = String, Path, description = "Instance slug")),
    responses(
        (status = 202, description = "Cancellation accepted, teardown started", body = InstanceView),
        (status = 200, description = "Instance was already cancelled", body = InstanceView),
        (status = 404, description = "Unknown slug", body = ErrorBody)
    )
)]
pub async fn cancel_instance(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.orchestrator.cancel(&slug).await?;
    let status = match outcome {
        CancelOutcome::Accepted(_) => StatusCode::ACCEPTED,
        CancelOutcome::AlreadyCancelled(_) => StatusCode::OK,
    };
    Ok((status, Json(InstanceView::from(outcome.record()))))
}
