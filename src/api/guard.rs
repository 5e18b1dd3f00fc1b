//! Guard API endpoints.
//!
//! The frontend adapter calls these before and during any privileged action.
//! Every response body is an [`AuthDecision`]; wrong credentials come back as
//! prompt decisions, not HTTP errors.

use axum::{Json, extract::State};
use serde::Deserialize;
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState};
use crate::services::{AuthDecision, GuardError};

#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    pub user_id: i64,
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordRequest {
    pub user_id: i64,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SecondFactorRequest {
    pub user_id: i64,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct NewPasswordRequest {
    pub user_id: i64,
    pub password: String,
    pub confirm: String,
}

impl From<GuardError> for ApiError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::Database(msg) => Self::DatabaseError(msg),
            GuardError::TwoFactor(msg) | GuardError::Internal(msg) => Self::internal(msg),
        }
    }
}

/// Entry point for every privileged action.
///
/// # Endpoint
/// `POST /api/guard/authorize`
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AuthorizeRequest>,
) -> Result<Json<ApiResponse<AuthDecision>>, ApiError> {
    if payload.action.trim().is_empty() {
        return Err(ApiError::validation("Action is required"));
    }

    let decision = state
        .guard()
        .authorize(payload.user_id, &payload.action)
        .await?;

    Ok(Json(ApiResponse::success(decision)))
}

/// Password step of an in-flight authentication.
///
/// # Endpoint
/// `POST /api/guard/password`
///
/// An empty or wrong password is not rejected here; the guard answers it
/// with the same prompt it gave before.
pub async fn submit_password(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PasswordRequest>,
) -> Result<Json<ApiResponse<AuthDecision>>, ApiError> {
    let decision = state
        .guard()
        .submit_password(payload.user_id, &payload.password)
        .await?;

    Ok(Json(ApiResponse::success(decision)))
}

/// Second-factor step: a TOTP code or a backup code.
///
/// # Endpoint
/// `POST /api/guard/second-factor`
pub async fn submit_second_factor(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SecondFactorRequest>,
) -> Result<Json<ApiResponse<AuthDecision>>, ApiError> {
    let decision = state
        .guard()
        .submit_second_factor(payload.user_id, &payload.code)
        .await?;

    Ok(Json(ApiResponse::success(decision)))
}

/// Forced-rotation step: new password plus its confirmation.
///
/// # Endpoint
/// `POST /api/guard/new-password`
pub async fn submit_new_password(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewPasswordRequest>,
) -> Result<Json<ApiResponse<AuthDecision>>, ApiError> {
    let decision = state
        .guard()
        .submit_new_password(payload.user_id, &payload.password, &payload.confirm)
        .await?;

    Ok(Json(ApiResponse::success(decision)))
}
