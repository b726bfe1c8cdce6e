// web-server/src/error.rs
use actix_web::{http::header, http::StatusCode, HttpResponse, ResponseError};
use common::models::auth::ErrorResponse;
use common::AuthError;
use thiserror::Error;

/// Errors surfaced by HTTP handlers and middleware.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    /// Body is deliberately generic.
    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn unauthorized() -> Self {
        ApiError::Unauthorized("Unauthorized")
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidAddress => ApiError::BadRequest("Invalid Ethereum address".into()),
            AuthError::EmptySignature => ApiError::BadRequest("Signature is required".into()),
            AuthError::ChallengeExpired | AuthError::InvalidSignature => {
                ApiError::Unauthorized("Signature verification failed")
            }
            AuthError::InvalidToken | AuthError::Ucan(_) => ApiError::unauthorized(),
            AuthError::UserNotFound => ApiError::Forbidden("No user is registered for this wallet"),
            err @ (AuthError::ProvisioningFailed(_)
            | AuthError::Store(_)
            | AuthError::TokenGeneration(_)) => {
                tracing::error!("Request failed: {}", err);
                ApiError::Internal
            }
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut response = HttpResponse::build(self.status_code());
        if matches!(self, ApiError::Unauthorized(_)) {
            response.insert_header((header::WWW_AUTHENTICATE, "Bearer"));
        }
        response.json(ErrorResponse::new(self.to_string()))
    }
}
