//! In-memory login sessions with a 24-hour inactivity TTL.
//!
//! Tokens are opaque 128-bit randoms. Every successful check refreshes the
//! activity timestamp; expired entries are removed lazily on access and by
//! the periodic sweeper. Everything here evaporates on restart.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

pub const SESSION_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a session for a logged-in user.
    pub fn create(&self, user_id: &str) -> Session {
        let now = Utc::now();
        let session = Session {
            token: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            last_active: now,
        };
        self.sessions.insert(session.token.clone(), session.clone());
        session
    }

    /// Resolve a token to its user id. A valid check refreshes the activity
    /// timestamp; an expired session is deleted on sight.
    pub fn validate(&self, token: &str) -> Option<String> {
        let now = Utc::now();
        {
            let mut session = self.sessions.get_mut(token)?;
            if now - session.last_active <= Duration::hours(SESSION_TTL_HOURS) {
                session.last_active = now;
                return Some(session.user_id.clone());
            }
        }
        self.sessions.remove(token);
        None
    }

    /// Explicit logout. Returns whether the token existed.
    pub fn remove(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Drop every session idle past the TTL; returns how many went.
    pub fn sweep(&self) -> usize {
        let cutoff = Utc::now() - Duration::hours(SESSION_TTL_HOURS);
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.last_active >= cutoff);
        before - self.sessions.len()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Test hook: shift a session's activity timestamp into the past.
    #[cfg(test)]
    fn backdate(&self, token: &str, hours: i64) {
        if let Some(mut s) = self.sessions.get_mut(token) {
            s.last_active = Utc::now() - Duration::hours(hours);
        }
    }
}
