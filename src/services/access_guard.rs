//! Orchestration state machine wrapping every protected action.
//!
//! Collaborators ask [`AccessGuard::authorize`] before running anything
//! privileged; interactive credential input flows back in through the
//! `submit_*` step functions. In-flight flow state is minimal and in-memory,
//! keyed by user id: losing it only costs the user a restarted prompt.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{RwLock, broadcast};
use tracing::{info, warn};

use crate::db::{Store, UserRole};
use crate::entities::users;
use crate::events::SecurityEvent;
use crate::services::password_policy::{self, PasswordPolicy};
use crate::services::session::{self, SessionManager};
use crate::services::two_factor_service::{TwoFactorError, TwoFactorService};

/// Violation text for a confirmation that does not match the new password.
pub const CONFIRMATION_MISMATCH: &str = "New password and confirmation do not match";

/// Violation text for reuse of the current or a recent password.
pub const REUSED_PASSWORD: &str = "Must differ from your current and recent passwords";

/// Errors from the guard's own plumbing. Wrong credentials are not errors;
/// they surface as decisions.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Second factor error: {0}")]
    TwoFactor(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for GuardError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for GuardError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// What the caller must do next. `Proceed` carries the action exactly once;
/// every other value means the action has not run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AuthDecision {
    /// Session valid; execute the named action now.
    Proceed { action: String },

    /// Ask the user for their password and feed it to `submit_password`.
    PromptPassword,

    /// Password accepted; ask for a TOTP or backup code.
    PromptSecondFactor,

    /// The stored password is still a role default (or the submitted
    /// replacement was rejected); collect a new password before anything else.
    ForcedPasswordChange { violations: Vec<String> },

    /// Rotation applied and session invalidated; the next action starts a
    /// fresh authentication.
    PasswordChanged,

    /// Not a privileged user, or no step is pending.
    Denied,
}

/// Per-user in-flight authentication step. Absence from the map is `idle`.
#[derive(Debug, Clone)]
enum GuardFlow {
    AwaitingPassword { action: String },
    AwaitingSecondFactor { action: String },
    AwaitingNewPassword,
}

pub struct AccessGuard {
    store: Store,
    policy: PasswordPolicy,
    sessions: SessionManager,
    two_factor: Arc<dyn TwoFactorService>,
    event_bus: broadcast::Sender<SecurityEvent>,
    flows: RwLock<HashMap<i64, GuardFlow>>,
}

impl AccessGuard {
    #[must_use]
    pub fn new(
        store: Store,
        policy: PasswordPolicy,
        sessions: SessionManager,
        two_factor: Arc<dyn TwoFactorService>,
        event_bus: broadcast::Sender<SecurityEvent>,
    ) -> Self {
        Self {
            store,
            policy,
            sessions,
            two_factor,
            event_bus,
            flows: RwLock::new(HashMap::new()),
        }
    }

    /// Entry point for every protected action.
    ///
    /// Re-authorizing while a flow is already in flight replaces the flow:
    /// the newest requested action supersedes the old one.
    pub async fn authorize(&self, user_id: i64, action: &str) -> Result<AuthDecision, GuardError> {
        let Some(user) = self.privileged_user(user_id).await? else {
            return Ok(AuthDecision::Denied);
        };

        let now = chrono::Utc::now().timestamp();
        if user.password_changed && session::is_active_at(user.last_auth_time, now) {
            self.flows.write().await.remove(&user_id);
            self.sessions.touch(user_id).await?;
            return Ok(AuthDecision::Proceed {
                action: action.to_string(),
            });
        }

        self.flows.write().await.insert(
            user_id,
            GuardFlow::AwaitingPassword {
                action: action.to_string(),
            },
        );

        Ok(AuthDecision::PromptPassword)
    }

    /// Step function for the password prompt.
    ///
    /// A wrong password stays at the same prompt and mutates nothing; there
    /// is no lockout or attempt cap here, only the watchdog counting the
    /// warning stream behind the scenes.
    pub async fn submit_password(
        &self,
        user_id: i64,
        text: &str,
    ) -> Result<AuthDecision, GuardError> {
        let flow = self.flows.read().await.get(&user_id).cloned();
        let Some(GuardFlow::AwaitingPassword { action }) = flow else {
            return Ok(AuthDecision::Denied);
        };

        let Some(user) = self.privileged_user(user_id).await? else {
            self.flows.write().await.remove(&user_id);
            return Ok(AuthDecision::Denied);
        };

        let password_ok = match &user.hashed_password {
            Some(stored_hash) => self.policy.verify(text, stored_hash).await?,
            None => false,
        };

        if !password_ok {
            warn!("Password rejected for user {user_id}");
            let _ = self
                .event_bus
                .send(SecurityEvent::PasswordRejected { user_id });
            metrics::counter!("chime_password_rejections_total").increment(1);
            return Ok(AuthDecision::PromptPassword);
        }

        // The second factor gates even the forced-change path; an attacker
        // holding a leaked default password must not reach the rotation
        // prompt on a 2FA-protected account.
        if user.two_fa_enabled {
            self.flows
                .write()
                .await
                .insert(user_id, GuardFlow::AwaitingSecondFactor { action });
            return Ok(AuthDecision::PromptSecondFactor);
        }

        if user.password_changed {
            self.release(user_id, action).await
        } else {
            self.begin_forced_change(user_id).await
        }
    }

    /// Step function for the TOTP/backup-code prompt.
    pub async fn submit_second_factor(
        &self,
        user_id: i64,
        input: &str,
    ) -> Result<AuthDecision, GuardError> {
        let flow = self.flows.read().await.get(&user_id).cloned();
        let Some(GuardFlow::AwaitingSecondFactor { action }) = flow else {
            return Ok(AuthDecision::Denied);
        };

        let outcome = match self.two_factor.verify(user_id, input).await {
            Ok(outcome) => outcome,
            Err(TwoFactorError::NotEnabled) => {
                // Disabled while mid-flow; restart from authorize.
                self.flows.write().await.remove(&user_id);
                return Ok(AuthDecision::Denied);
            }
            Err(err) => return Err(GuardError::TwoFactor(err.to_string())),
        };

        if !outcome.is_pass() {
            warn!("Second factor rejected for user {user_id}");
            let _ = self
                .event_bus
                .send(SecurityEvent::SecondFactorRejected { user_id });
            metrics::counter!("chime_second_factor_rejections_total").increment(1);
            return Ok(AuthDecision::PromptSecondFactor);
        }

        let Some(user) = self.privileged_user(user_id).await? else {
            self.flows.write().await.remove(&user_id);
            return Ok(AuthDecision::Denied);
        };

        if user.password_changed {
            self.release(user_id, action).await
        } else {
            self.begin_forced_change(user_id).await
        }
    }

    /// Step function for the forced password change.
    ///
    /// Every rejection lists all violated rules at once; the flow stays at
    /// the same prompt until an acceptable password arrives.
    pub async fn submit_new_password(
        &self,
        user_id: i64,
        text: &str,
        confirm: &str,
    ) -> Result<AuthDecision, GuardError> {
        let flow = self.flows.read().await.get(&user_id).cloned();
        let Some(GuardFlow::AwaitingNewPassword) = flow else {
            return Ok(AuthDecision::Denied);
        };

        if text != confirm {
            return Ok(AuthDecision::ForcedPasswordChange {
                violations: vec![CONFIRMATION_MISMATCH.to_string()],
            });
        }

        let mut violations: Vec<String> = password_policy::validate(text)
            .iter()
            .map(ToString::to_string)
            .collect();

        let Some(user) = self.privileged_user(user_id).await? else {
            self.flows.write().await.remove(&user_id);
            return Ok(AuthDecision::Denied);
        };

        let mut history = password_policy::parse_history(&user.password_history);
        if self.is_reused(text, user.hashed_password.as_deref(), &history).await? {
            violations.push(REUSED_PASSWORD.to_string());
        }

        if !violations.is_empty() {
            warn!(
                "Weak password rejected for user {user_id} ({} violations)",
                violations.len()
            );
            let _ = self.event_bus.send(SecurityEvent::WeakPasswordRejected {
                user_id,
                violations: violations.len(),
            });
            metrics::counter!("chime_weak_password_rejections_total").increment(1);
            return Ok(AuthDecision::ForcedPasswordChange { violations });
        }

        let new_hash = self.policy.hash(text).await?;
        if let Some(old_hash) = user.hashed_password {
            password_policy::push_history(&mut history, old_hash);
        }
        let history_json = serde_json::to_string(&history)
            .map_err(|e| GuardError::Internal(e.to_string()))?;

        // Rotation and session invalidation land in one update; nothing can
        // observe the new password with the old session still open.
        self.store
            .apply_password_change(user_id, new_hash, history_json)
            .await?;
        self.flows.write().await.remove(&user_id);

        info!("Password rotated for user {user_id}; session invalidated");

        Ok(AuthDecision::PasswordChanged)
    }

    /// Loads the user and gates on role: unknown ids and non-privileged
    /// roles are denied without ever being prompted.
    async fn privileged_user(&self, user_id: i64) -> Result<Option<users::Model>, GuardError> {
        let Some(user) = self.store.get_user_model(user_id).await? else {
            self.deny_unauthorized(user_id);
            return Ok(None);
        };

        if UserRole::parse(&user.role).is_none() {
            self.deny_unauthorized(user_id);
            return Ok(None);
        }

        Ok(Some(user))
    }

    fn deny_unauthorized(&self, user_id: i64) {
        warn!("Unauthorized access attempt by user {user_id}");
        let _ = self
            .event_bus
            .send(SecurityEvent::UnauthorizedAccess { user_id });
        metrics::counter!("chime_unauthorized_attempts_total").increment(1);
    }

    /// Hand the pending action back to the caller, exactly once.
    async fn release(&self, user_id: i64, action: String) -> Result<AuthDecision, GuardError> {
        self.flows.write().await.remove(&user_id);
        self.sessions.touch(user_id).await?;
        info!("Authorized action {action:?} for user {user_id}");
        Ok(AuthDecision::Proceed { action })
    }

    /// Enter the forced-change sub-flow. The pending action is dropped: the
    /// user re-requests it after rotating, with a fresh authentication.
    async fn begin_forced_change(&self, user_id: i64) -> Result<AuthDecision, GuardError> {
        self.flows
            .write()
            .await
            .insert(user_id, GuardFlow::AwaitingNewPassword);
        info!("Forcing password change for user {user_id}");
        Ok(AuthDecision::ForcedPasswordChange { violations: vec![] })
    }

    /// Reuse covers the current password plus the retained history. The
    /// current hash joins the history at rotation time, so accepting it here
    /// would let a "change" keep the same password.
    async fn is_reused(
        &self,
        candidate: &str,
        current_hash: Option<&str>,
        history: &[String],
    ) -> Result<bool, GuardError> {
        if let Some(current) = current_hash
            && self.policy.verify(candidate, current).await?
        {
            return Ok(true);
        }

        Ok(self.policy.is_reused(candidate, history).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_serialization() {
        let proceed = AuthDecision::Proceed {
            action: "resend_notice".to_string(),
        };
        let json = serde_json::to_value(&proceed).unwrap();
        assert_eq!(json["decision"], "proceed");
        assert_eq!(json["action"], "resend_notice");

        let forced = AuthDecision::ForcedPasswordChange {
            violations: vec![CONFIRMATION_MISMATCH.to_string()],
        };
        let json = serde_json::to_value(&forced).unwrap();
        assert_eq!(json["decision"], "forced_password_change");
        assert_eq!(json["violations"][0], CONFIRMATION_MISMATCH);

        let denied = serde_json::to_value(AuthDecision::Denied).unwrap();
        assert_eq!(denied["decision"], "denied");
    }
}
