//! Two-factor enrollment and deactivation endpoints.
//!
//! Enrollment is a two-call handshake: `enroll` hands out a fresh secret,
//! `confirm` proves the authenticator has it. Nothing is persisted until the
//! confirmation code checks out.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState};
use crate::services::{ConfirmOutcome, EnrollmentStart, TwoFactorError};

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub user_id: i64,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct DisableRequest {
    pub user_id: i64,
    pub password: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct DisableResponse {
    pub disabled: bool,
}

impl From<TwoFactorError> for ApiError {
    fn from(err: TwoFactorError) -> Self {
        match err {
            TwoFactorError::UserNotFound => Self::NotFound("User not found".to_string()),
            TwoFactorError::NotEnabled
            | TwoFactorError::AlreadyEnabled
            | TwoFactorError::NoPendingEnrollment => Self::conflict(err.to_string()),
            TwoFactorError::Database(msg) => Self::DatabaseError(msg),
            TwoFactorError::Internal(msg) => Self::internal(msg),
        }
    }
}

/// Starts enrollment and returns the secret artifacts.
///
/// # Endpoint
/// `POST /api/two-factor/enroll`
///
/// The response reveals the shared secret; whatever renders it should be
/// scheduled for ephemeral disclosure deletion.
pub async fn enroll(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EnrollRequest>,
) -> Result<Json<ApiResponse<EnrollmentStart>>, ApiError> {
    let start = state.two_factor().begin_enrollment(payload.user_id).await?;
    Ok(Json(ApiResponse::success(start)))
}

/// Confirms enrollment with the first authenticator code.
///
/// # Endpoint
/// `POST /api/two-factor/confirm`
///
/// On success the payload carries the plaintext backup codes exactly once.
/// A wrong code discards the pending secret; enrollment must restart.
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConfirmRequest>,
) -> Result<Json<ApiResponse<ConfirmOutcome>>, ApiError> {
    let outcome = state
        .two_factor()
        .confirm_enrollment(payload.user_id, &payload.code)
        .await?;

    Ok(Json(ApiResponse::success(outcome)))
}

/// Turns the second factor off after re-proving both factors.
///
/// # Endpoint
/// `POST /api/two-factor/disable`
///
/// `disabled: false` covers every rejection; the response never says which
/// factor failed.
pub async fn disable(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DisableRequest>,
) -> Result<Json<ApiResponse<DisableResponse>>, ApiError> {
    let disabled = state
        .two_factor()
        .disable(payload.user_id, &payload.password, &payload.code)
        .await?;

    Ok(Json(ApiResponse::success(DisableResponse { disabled })))
}
