use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

/// Closed set of auth failures surfaced to the HTTP layer. Token-internal
/// failures (bad signature, expiry) are collapsed into `Unauthorized` before
/// they reach a client.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("user with email {email} already exists")]
    DuplicateUser { email: String },
    #[error("activation link is incorrect")]
    InvalidActivationLink,
    #[error("no user found with this email")]
    UserNotFound,
    #[error("incorrect password")]
    InvalidCredentials,
    #[error("unauthorized")]
    Unauthorized,
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::DuplicateUser { .. } => StatusCode::CONFLICT,
            AuthError::InvalidActivationLink => StatusCode::BAD_REQUEST,
            AuthError::UserNotFound => StatusCode::NOT_FOUND,
            AuthError::InvalidCredentials | AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
            AuthError::Internal(e) => {
                error!(error = %e, "internal auth error");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "message": "internal error" })),
                )
                    .into_response();
            }
        };
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}
