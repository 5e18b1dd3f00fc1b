//! Role roster synchronization.
//!
//! Privileged roles come from an external roster (config file or an admin
//! CLI action). Granting a role creates the user row with the role-default
//! password; accounts that already customized their password never get a
//! default re-assigned.

use anyhow::Result;
use tracing::info;

use crate::config::RosterConfig;
use crate::db::{Store, User, UserRole};
use crate::services::password_policy::PasswordPolicy;

pub struct RosterSync {
    store: Store,
    policy: PasswordPolicy,
}

impl RosterSync {
    #[must_use]
    pub const fn new(store: Store, policy: PasswordPolicy) -> Self {
        Self { store, policy }
    }

    /// Apply the configured roster. Runs once at startup; listed ids are
    /// granted their role, nothing is ever revoked here.
    pub async fn sync(&self, roster: &RosterConfig) -> Result<()> {
        for &chat_id in &roster.admins {
            self.grant(chat_id, UserRole::Admin).await?;
        }

        for &chat_id in &roster.curators {
            self.grant(chat_id, UserRole::Curator).await?;
        }

        info!(
            "Role roster synced: {} admins, {} curators",
            roster.admins.len(),
            roster.curators.len()
        );

        Ok(())
    }

    /// Grant a role to one chat id. Hashing the role default is skipped when
    /// the user already holds the role, so repeated syncs stay cheap and a
    /// default is assigned at most once per role grant.
    pub async fn grant(&self, chat_id: i64, role: UserRole) -> Result<User> {
        if let Some(existing) = self.store.get_user(chat_id).await?
            && existing.role == role.as_str()
        {
            return Ok(existing);
        }

        let default_hash = self.policy.hash(role.default_password()).await?;
        self.store.grant_role(chat_id, role, default_hash).await
    }
}
