//! User accounts and login sessions.
//!
//! Sessions carry a hard 24 hour expiry and an `active` flag flipped by
//! logout. Validation is fail-closed: a session counts only if it exists,
//! belongs to the claimed user, is still active, and has not expired.
//! Callers re-validate on every connection attempt rather than caching the
//! outcome, so revocation takes effect immediately.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use voicebank_error::VoicebankError;

pub const SESSION_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.active && now < self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub name: String,
    pub customer_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct UserRecord {
    profile: UserProfile,
    salt: [u8; 16],
    password_digest: [u8; 32],
}

#[derive(Debug, Default)]
struct StoreInner {
    users: HashMap<String, UserRecord>,
    sessions: HashMap<String, SessionRecord>,
}

/// In-memory store. All state is process-local; a restart logs everyone out.
#[derive(Debug, Default)]
pub struct SessionStore {
    inner: Mutex<StoreInner>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user. The password is stored as a salted SHA-256 digest,
    /// never in the clear.
    pub fn create_user(
        &self,
        user_id: &str,
        name: &str,
        customer_id: &str,
        password: &str,
    ) -> Result<UserProfile, VoicebankError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.users.contains_key(user_id) {
            return Err(VoicebankError::Conflict {
                message: format!("user already exists: {user_id}"),
            });
        }
        let mut salt = [0u8; 16];
        rand::Rng::fill(&mut rand::thread_rng(), &mut salt);
        let profile = UserProfile {
            user_id: user_id.to_string(),
            name: name.to_string(),
            customer_id: customer_id.to_string(),
            created_at: Utc::now(),
        };
        inner.users.insert(
            user_id.to_string(),
            UserRecord {
                profile: profile.clone(),
                salt,
                password_digest: digest_password(&salt, password),
            },
        );
        Ok(profile)
    }

    /// Checks a password and returns the profile on a match. A missing user
    /// and a wrong password are indistinguishable to the caller.
    pub fn verify_password(&self, user_id: &str, password: &str) -> Option<UserProfile> {
        let inner = self.inner.lock().unwrap();
        let record = inner.users.get(user_id)?;
        if record.password_digest == digest_password(&record.salt, password) {
            Some(record.profile.clone())
        } else {
            None
        }
    }

    pub fn user_profile(&self, user_id: &str) -> Option<UserProfile> {
        let inner = self.inner.lock().unwrap();
        inner.users.get(user_id).map(|record| record.profile.clone())
    }

    /// Opens a fresh session for the user, valid for 24 hours.
    pub fn create_session(&self, user_id: &str) -> SessionRecord {
        let now = Utc::now();
        let session = SessionRecord {
            session_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            expires_at: now + Duration::hours(SESSION_TTL_HOURS),
            active: true,
            revoked_at: None,
        };
        let mut inner = self.inner.lock().unwrap();
        inner
            .sessions
            .insert(session.session_id.clone(), session.clone());
        session
    }

    pub fn validate(&self, session_id: &str, user_id: &str) -> bool {
        self.validate_at(session_id, user_id, Utc::now())
    }

    /// Validation at an explicit instant. Unknown session, wrong user,
    /// revoked, or expired all fail the same way.
    pub fn validate_at(&self, session_id: &str, user_id: &str, now: DateTime<Utc>) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.sessions.get(session_id) {
            Some(session) => session.user_id == user_id && session.is_usable(now),
            None => false,
        }
    }

    /// Revokes a session. Idempotent: revoking an unknown or already-revoked
    /// session succeeds without effect.
    pub fn revoke(&self, session_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(session) = inner.sessions.get_mut(session_id) {
            if session.active {
                session.active = false;
                session.revoked_at = Some(Utc::now());
                tracing::info!(session_id, user_id = %session.user_id, "session revoked");
            }
        }
    }

    pub fn sessions_for_user(&self, user_id: &str) -> Vec<SessionRecord> {
        let inner = self.inner.lock().unwrap();
        inner
            .sessions
            .values()
            .filter(|session| session.user_id == user_id)
            .cloned()
            .collect()
    }
}

fn digest_password(salt: &[u8; 16], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}
