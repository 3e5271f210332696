//! Share invites — machine-scoped viewer grants with an absolute expiry.
//!
//! An invite lets someone watch one machine without an account. Expiry is
//! absolute (7 days from creation) and enforced lazily: the first access
//! past the deadline deletes the entry. No background sweep needed.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

pub const INVITE_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct Invite {
    pub token: String,
    pub user_id: String,
    pub machine_id: String,
    /// Owner and machine names snapshotted at creation time.
    pub display_name: String,
    pub machine_name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct InviteStore {
    invites: DashMap<String, Invite>,
}

impl InviteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &self,
        user_id: &str,
        machine_id: &str,
        display_name: &str,
        machine_name: &str,
    ) -> Invite {
        let now = Utc::now();
        let invite = Invite {
            token: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            machine_id: machine_id.to_string(),
            display_name: display_name.to_string(),
            machine_name: machine_name.to_string(),
            created_at: now,
            expires_at: now + Duration::days(INVITE_TTL_DAYS),
        };
        self.invites.insert(invite.token.clone(), invite.clone());
        invite
    }

    /// Look up an invite. Past its deadline the entry is deleted and `None`
    /// is returned.
    pub fn inspect(&self, token: &str) -> Option<Invite> {
        let now = Utc::now();
        let invite = self.invites.get(token).map(|r| r.value().clone())?;
        if now > invite.expires_at {
            self.invites.remove(token);
            return None;
        }
        Some(invite)
    }

    /// Remove an invite, owner-scoped. Returns whether anything was removed.
    pub fn revoke(&self, user_id: &str, token: &str) -> bool {
        self.invites
            .remove_if(token, |_, inv| inv.user_id == user_id)
            .is_some()
    }

    pub fn count(&self) -> usize {
        self.invites.len()
    }

    /// Test hook: move an invite's deadline into the past.
    #[cfg(test)]
    fn expire_now(&self, token: &str) {
        if let Some(mut inv) = self.invites.get_mut(token) {
            inv.expires_at = Utc::now() - Duration::seconds(1);
        }
    }
}
