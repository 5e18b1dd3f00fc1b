//! Domain service for TOTP enrollment and second-factor verification.
//!
//! Owns the per-user shared secret and one-time backup codes. Secrets are
//! persisted only after a successful enrollment confirmation.

use serde::Serialize;
use thiserror::Error;

/// Errors specific to second-factor operations.
#[derive(Debug, Error)]
pub enum TwoFactorError {
    #[error("Two-factor authentication is not enabled")]
    NotEnabled,

    #[error("Two-factor authentication is already enabled")]
    AlreadyEnabled,

    #[error("No enrollment pending confirmation")]
    NoPendingEnrollment,

    #[error("User not found")]
    UserNotFound,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for TwoFactorError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for TwoFactorError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Artifacts handed to the user when enrollment starts. Every field reveals
/// the secret, so anything rendered from this must go through ephemeral
/// disclosure scheduling.
#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentStart {
    /// Base32 secret for manual entry.
    pub secret_base32: String,

    /// otpauth:// provisioning URI.
    pub provisioning_uri: String,

    /// QR code as a PNG data URL.
    pub qr_data_url: String,
}

/// Result of an enrollment confirmation attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmOutcome {
    pub confirmed: bool,

    /// Plaintext backup codes, present exactly once on success. Only hashes
    /// are stored; this is the user's single chance to save them.
    pub backup_codes: Vec<String>,
}

/// Outcome of a second-factor check. Callers that relay pass/fail to the
/// user must not surface which branch matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyOutcome {
    TotpOk,
    BackupConsumed,
    Fail,
}

impl VerifyOutcome {
    #[must_use]
    pub const fn is_pass(self) -> bool {
        matches!(self, Self::TotpOk | Self::BackupConsumed)
    }
}

/// Domain service trait for the second factor.
#[async_trait::async_trait]
pub trait TwoFactorService: Send + Sync {
    /// Generates a fresh secret and holds it in memory pending confirmation.
    /// Calling again before confirming replaces the pending secret.
    ///
    /// # Errors
    ///
    /// Returns [`TwoFactorError::AlreadyEnabled`] if the user already has an
    /// active second factor.
    async fn begin_enrollment(&self, user_id: i64) -> Result<EnrollmentStart, TwoFactorError>;

    /// Verifies the first code against the pending secret (±1 time step).
    /// On success persists the secret with ten fresh backup codes in one
    /// transaction; on failure the pending secret is discarded and
    /// enrollment must restart.
    async fn confirm_enrollment(
        &self,
        user_id: i64,
        code: &str,
    ) -> Result<ConfirmOutcome, TwoFactorError>;

    /// Checks a submitted credential: TOTP first (±1 time step), then backup
    /// codes. A matched backup code is consumed atomically with the success,
    /// so the same code can never authorize twice.
    ///
    /// # Errors
    ///
    /// Returns [`TwoFactorError::NotEnabled`] if the user has no active
    /// second factor.
    async fn verify(
        &self,
        user_id: i64,
        code_or_backup: &str,
    ) -> Result<VerifyOutcome, TwoFactorError>;

    /// Turns the second factor off. Requires a fresh password verification
    /// and a passing [`TwoFactorService::verify`]; clears the secret and all
    /// backup codes on success. Returns whether the factor was disabled.
    async fn disable(
        &self,
        user_id: i64,
        password: &str,
        code_or_backup: &str,
    ) -> Result<bool, TwoFactorError>;
}
