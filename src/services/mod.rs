pub mod access_guard;
pub use access_guard::{AccessGuard, AuthDecision, GuardError};

pub mod disclosure;
pub use disclosure::{
    DISCLOSURE_TTL, DisclosureSink, DisclosureTarget, DisclosureToken, EphemeralDisclosure,
    LoggingSink,
};

pub mod password_policy;
pub use password_policy::{PasswordPolicy, PasswordViolation};

pub mod roster;
pub use roster::RosterSync;

pub mod session;
pub use session::{SESSION_TIMEOUT_SECS, SessionManager};

pub mod two_factor_service;
pub mod two_factor_service_impl;
pub use two_factor_service::{
    ConfirmOutcome, EnrollmentStart, TwoFactorError, TwoFactorService, VerifyOutcome,
};
pub use two_factor_service_impl::SeaOrmTwoFactorService;

pub mod watchdog;
pub use watchdog::{RESTART_EXIT_CODE, WarningWatchdog};
