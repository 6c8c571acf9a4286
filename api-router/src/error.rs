use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Internal server error")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Service temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("Too many requests")]
    CircuitOpen { retry_after_secs: u64 },
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Validation(msg) => Self::Validation(msg),
            AppError::Unauthorized(msg) => Self::Unauthorized(msg),
            AppError::NoResults => Self::NotFound("no matching records".to_string()),
            AppError::CircuitOpen { retry_after, .. } => Self::CircuitOpen {
                retry_after_secs: retry_after.as_secs().max(1),
            },
            AppError::RecordSource(msg)
            | AppError::Embedder(msg)
            | AppError::Generator(msg)
            | AppError::VectorIndex(msg)
            | AppError::MetadataStore(msg) => {
                tracing::error!(error = %msg, "dependency unavailable");
                Self::Unavailable("a backing service is unavailable".to_string())
            }
            other => {
                tracing::error!(error = %other, "internal error");
                Self::Internal("Internal server error".to_string())
            }
        }
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::CircuitOpen { .. } => StatusCode::TOO_MANY_REQUESTS,
        };
        let body = ErrorResponse {
            error: self.to_string(),
            status: "error".to_string(),
        };

        if let Self::CircuitOpen { retry_after_secs } = self {
            return (
                status,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                Json(body),
            )
                .into_response();
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn app_errors_map_to_expected_statuses() {
        assert_eq!(
            status_of(AppError::Validation("bad".into()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(AppError::NoResults.into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(AppError::Generator("down".into()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(AppError::Internal("boom".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn circuit_open_carries_retry_after_header() {
        let err: ApiError = AppError::CircuitOpen {
            dependency: "generator".into(),
            retry_after: std::time::Duration::from_secs(30),
        }
        .into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let header = response
            .headers()
            .get(header::RETRY_AFTER)
            .expect("Retry-After header")
            .to_str()
            .expect("ascii header");
        assert_eq!(header, "30");
    }

    #[test]
    fn internal_errors_are_sanitized() {
        let err = ApiError::Internal("db password wrong".into());
        assert_eq!(err.to_string(), "Internal server error");
    }
}
