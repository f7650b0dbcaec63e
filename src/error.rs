use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::repo::RepoError;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("posting from this id is forbidden")]
    Forbidden,
    #[error("rate limit exceeded")]
    RateExceeded,
    #[error("cooldown active")]
    Cooldown { retry_after_secs: u64 },
    #[error("internal error")]
    Internal,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        // user sees a generic 500; the store detail stays in the logs
        tracing::error!(error = %e, "record store operation failed");
        ApiError::Internal
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::RateExceeded | ApiError::Cooldown { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut builder = HttpResponse::build(status);
        let retry_after_secs = match self {
            ApiError::Cooldown { retry_after_secs } => {
                builder.insert_header(("Retry-After", retry_after_secs.to_string()));
                Some(*retry_after_secs)
            }
            _ => None,
        };
        builder.json(ApiErrorBody {
            error: self.to_string(),
            retry_after_secs,
        })
    }
}
