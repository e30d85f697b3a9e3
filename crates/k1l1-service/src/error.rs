use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use k1l1_core::RankError;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("internal server error")]
    Internal,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorBody {
    error: String,
}

impl ServiceError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<RankError>() {
            Some(RankError::WordNotFound(_)) => Self::NotFound(err.to_string()),
            Some(RankError::Validation(_)) => Self::BadRequest(err.to_string()),
            None => {
                tracing::error!(error = %format!("{err:#}"), "request failed");
                Self::Internal
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}
