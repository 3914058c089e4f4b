use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;

use reqflow_core::errors::WorkflowError;
use reqflow_db::RepositoryError;

/// Boundary error: the single place workflow error kinds become HTTP status
/// codes. Components below this layer never see transport concerns.
#[derive(Debug)]
pub enum ApiError {
    Workflow(WorkflowError),
    /// Missing/invalid/expired bearer token. Raised by the auth extractor
    /// before any role check runs.
    Unauthorized(String),
}

impl From<WorkflowError> for ApiError {
    fn from(error: WorkflowError) -> Self {
        ApiError::Workflow(error)
    }
}

impl From<RepositoryError> for ApiError {
    fn from(error: RepositoryError) -> Self {
        ApiError::Workflow(error.into())
    }
}

/// JSON body extractor/response wrapper. Extraction failures (malformed
/// body, missing field, wrong content type) surface through the same
/// `{"message": ...}` 400 shape as every other validation error instead of
/// the framework's raw 422.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json<T>(pub T);

impl<T, S> FromRequest<S> for Json<T>
where
    axum::Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::Json(value) = axum::Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| WorkflowError::validation(rejection.body_text()))?;
        Ok(Json(value))
    }
}

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message),
            ApiError::Workflow(error) => match error {
                WorkflowError::Validation(message) | WorkflowError::Conflict(message) => {
                    (StatusCode::BAD_REQUEST, message)
                }
                WorkflowError::Auth => (StatusCode::BAD_REQUEST, error.to_string()),
                WorkflowError::Forbidden(message) => (StatusCode::FORBIDDEN, message),
                WorkflowError::NotFound(message) => (StatusCode::NOT_FOUND, message),
                WorkflowError::Storage(detail) => {
                    tracing::error!(
                        event_name = "api.storage_failure",
                        error = %detail,
                        "storage failure while handling request"
                    );
                    (StatusCode::INTERNAL_SERVER_ERROR, "Server Error".to_string())
                }
            },
        };

        (status, Json(json!({ "message": message }))).into_response()
    }
}
