//! Participant credential minting for the voice banking room.
//!
//! Issues short-lived HS256 access tokens admitting one identity into one
//! real-time room. The grant never widens beyond the user's own room, and the
//! just-validated session id rides along as opaque participant metadata so
//! in-room RPC traffic can be correlated back to a server-side session
//! without another round-trip.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Credential lifetime in seconds. Deliberately far below the 24 h session
/// TTL so an expired session cannot be revived by replaying a stale token.
pub const CREDENTIAL_TTL_SECS: i64 = 15 * 60;

/// One room per user.
pub fn room_name_for_user(user_id: &str) -> String {
    format!("bank_room_{user_id}")
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("missing identity")]
    MissingIdentity,
    #[error("jwt error: {message}")]
    Jwt { message: String },
}

/// Capabilities granted inside exactly one room. Never global.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrants {
    pub room: String,
    pub room_join: bool,
    pub can_publish: bool,
    pub can_subscribe: bool,
    pub can_publish_data: bool,
}

impl VideoGrants {
    fn for_room(room: String) -> Self {
        Self {
            room,
            room_join: true,
            can_publish: true,
            can_subscribe: true,
            can_publish_data: true,
        }
    }
}

/// Agent dispatch directive embedded in the token when the client asks for a
/// specific agent to join its room. Accepts the snake_case field used on the
/// HTTP surface; serializes in the camelCase form the room server expects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomAgentDispatch {
    #[serde(rename = "agentName", alias = "agent_name")]
    pub agent_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomConfig {
    #[serde(default)]
    pub agents: Vec<RoomAgentDispatch>,
}

/// Inputs for one credential. When a session id is supplied the caller must
/// have validated it against the session store immediately before
/// constructing this; the issuer trusts that check and only enforces that an
/// identity is present.
#[derive(Debug, Clone)]
pub struct CredentialRequest {
    pub identity: String,
    pub display_name: Option<String>,
    pub session_id: Option<String>,
    pub room_config: Option<RoomConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimSet {
    pub iss: String,
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub nbf: i64,
    pub exp: i64,
    pub metadata: String,
    pub video: VideoGrants,
    #[serde(
        rename = "roomConfig",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub room_config: Option<RoomConfig>,
}

impl ClaimSet {
    /// Parses the opaque metadata blob back into the session id it carries.
    pub fn session_id(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(&self.metadata).ok()?;
        value
            .get("session_id")
            .and_then(serde_json::Value::as_str)
            .map(|id| id.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct TokenIssuer {
    api_key: String,
    api_secret: String,
}

impl TokenIssuer {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Mints a signed credential scoped to `bank_room_<identity>`.
    pub fn mint(&self, request: &CredentialRequest) -> Result<String, TokenError> {
        if request.identity.is_empty() {
            return Err(TokenError::MissingIdentity);
        }

        let now = Utc::now().timestamp();
        let metadata = match &request.session_id {
            Some(session_id) => serde_json::json!({ "session_id": session_id }).to_string(),
            None => serde_json::json!({}).to_string(),
        };
        let claims = ClaimSet {
            iss: self.api_key.clone(),
            sub: request.identity.clone(),
            name: request.display_name.clone(),
            nbf: now,
            exp: now + CREDENTIAL_TTL_SECS,
            metadata,
            video: VideoGrants::for_room(room_name_for_user(&request.identity)),
            room_config: request.room_config.clone(),
        };

        let key = EncodingKey::from_secret(self.api_secret.as_bytes());
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &key).map_err(|error| {
            TokenError::Jwt {
                message: error.to_string(),
            }
        })
    }

    /// Verifies a credential's signature and expiry and returns its claims.
    pub fn decode(&self, token: &str) -> Result<ClaimSet, TokenError> {
        let key = DecodingKey::from_secret(self.api_secret.as_bytes());
        let validation = Validation::new(Algorithm::HS256);
        jsonwebtoken::decode::<ClaimSet>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|error| TokenError::Jwt {
                message: error.to_string(),
            })
    }
}
