use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, RefreshRequest, RegisterRequest},
        error::AuthError,
        jwt::AuthUser,
        repo::User,
        service::AuthSession,
    },
    state::AppState,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/activate/:link", get(activate))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/refresh", post(refresh))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new().route("/auth/users", get(list_users))
}

fn auth_response(session: AuthSession) -> Json<AuthResponse> {
    Json(AuthResponse {
        access_token: session.tokens.access_token,
        refresh_token: session.tokens.refresh_token,
        user: session.user,
    })
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, Response> {
    payload.email = payload.email.trim().to_lowercase();

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err((StatusCode::BAD_REQUEST, "Invalid email").into_response());
    }

    if payload.password.len() < 8 {
        warn!("password too short");
        return Err((StatusCode::BAD_REQUEST, "Password too short").into_response());
    }

    let session = state
        .auth
        .register(&payload.email, &payload.password)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(auth_response(session))
}

#[instrument(skip(state))]
pub async fn activate(
    State(state): State<AppState>,
    Path(link): Path<String>,
) -> Result<Json<serde_json::Value>, Response> {
    // Activation links are UUIDs; anything else is simply an unknown link.
    let link = link
        .parse::<Uuid>()
        .map_err(|_| AuthError::InvalidActivationLink.into_response())?;
    state
        .auth
        .activate(link)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(serde_json::json!({ "message": "account activated" })))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, Response> {
    payload.email = payload.email.trim().to_lowercase();

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err((StatusCode::BAD_REQUEST, "Invalid email").into_response());
    }

    let session = state
        .auth
        .login(&payload.email, &payload.password)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(auth_response(session))
}

#[instrument(skip(state, payload))]
pub async fn logout(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<StatusCode, Response> {
    state
        .auth
        .logout(&payload.refresh_token)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, Response> {
    let session = state
        .auth
        .refresh(&payload.refresh_token)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(auth_response(session))
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
) -> Result<Json<Vec<User>>, Response> {
    let users = state
        .auth
        .list_users()
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(users))
}
