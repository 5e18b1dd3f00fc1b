//! Privileged-user roster endpoints.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState};
use crate::db::{User, UserRole};
use crate::services::RosterSync;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub chat_id: i64,
    pub role: String,
}

/// Lists privileged users, optionally filtered by role.
///
/// # Endpoint
/// `GET /api/users?role=curator`
///
/// Summaries only; hashes, secrets and backup codes never leave the store.
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<User>>>, ApiError> {
    let users = match query.role.as_deref() {
        None => state.store().list_users().await?,
        Some(raw) => {
            let role = UserRole::parse(raw)
                .ok_or_else(|| ApiError::validation(format!("Unknown role '{raw}'")))?;
            state.store().list_users_by_role(role).await?
        }
    };

    Ok(Json(ApiResponse::success(users)))
}

/// Grants a role, assigning the role default password on first sight.
///
/// # Endpoint
/// `POST /api/users/grant`
///
/// Same path as the startup roster sync and the `grant` CLI command.
pub async fn grant(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GrantRequest>,
) -> Result<Json<ApiResponse<User>>, ApiError> {
    if payload.chat_id <= 0 {
        return Err(ApiError::validation("chat_id must be positive"));
    }

    let role = UserRole::parse(&payload.role)
        .ok_or_else(|| ApiError::validation(format!("Unknown role '{}'", payload.role)))?;

    let user = RosterSync::new(state.store().clone(), state.policy().clone())
        .grant(payload.chat_id, role)
        .await?;

    Ok(Json(ApiResponse::success(user)))
}
