//! Inactivity-window session tracking for privileged users.

use anyhow::Result;

use crate::db::Store;

/// Fixed inactivity timeout. Not configurable per user.
pub const SESSION_TIMEOUT_SECS: i64 = 120;

/// Sentinel for "never authenticated this process lifetime."
pub const NEVER_AUTHENTICATED: i64 = 0;

/// True when a session last touched at `last_auth_time` is still live at `now`.
/// Both are unix seconds. The window is strict: exactly 120s old is expired.
#[must_use]
pub const fn is_active_at(last_auth_time: i64, now: i64) -> bool {
    last_auth_time != NEVER_AUTHENTICATED && now - last_auth_time < SESSION_TIMEOUT_SECS
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Store-backed session bookkeeping. One session per user, keyed by the
/// persisted `last_auth_time` column.
#[derive(Clone)]
pub struct SessionManager {
    store: Store,
}

impl SessionManager {
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// Renew the window. Called on every successful protected-action
    /// authorization, including ones where the session was already active.
    /// Expiry needs no counterpart here: rotation and two-factor changes
    /// reset `last_auth_time` inside their own atomic updates.
    pub async fn touch(&self, user_id: i64) -> Result<()> {
        self.store.set_last_auth_time(user_id, now_unix()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_boundaries() {
        let last = 1_000_000;
        assert!(is_active_at(last, last + 119));
        assert!(!is_active_at(last, last + 120));
        assert!(!is_active_at(last, last + 121));
    }

    #[test]
    fn test_never_authenticated_is_inactive() {
        assert!(!is_active_at(NEVER_AUTHENTICATED, 0));
        assert!(!is_active_at(NEVER_AUTHENTICATED, 1_000_000));
    }

    #[test]
    fn test_fresh_touch_is_active() {
        let now = 1_000_000;
        assert!(is_active_at(now, now));
    }
}
