//! Security events for the application.
//!
//! Every variant is warning-grade: services publish these on the broadcast bus
//! alongside their `warn!` lines, and the watchdog counts them against its
//! sliding window.

use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum SecurityEvent {
    /// Wrong password submitted during an authorization flow.
    PasswordRejected { user_id: i64 },
    /// Wrong TOTP/backup code submitted during an authorization flow.
    SecondFactorRejected { user_id: i64 },
    /// Forced password change attempt violated the policy.
    WeakPasswordRejected { user_id: i64, violations: usize },
    /// A user outside the privileged roster asked for a guarded action.
    UnauthorizedAccess { user_id: i64 },
    /// Two-factor enrollment confirmation failed; pending secret discarded.
    EnrollmentAborted { user_id: i64 },
    /// A backup code was submitted while none remain unused.
    BackupCodesExhausted { user_id: i64 },
    /// Two-factor disable attempt failed credential re-verification.
    DisableRejected { user_id: i64 },
}
