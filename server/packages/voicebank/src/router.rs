//! HTTP surface: account signup/login/logout and room connection details.
//!
//! Every route re-reads the session store on the request path; nothing about
//! a session is cached between requests. Connection details in particular
//! validate the presented session id immediately before minting the room
//! credential, so a revoked session is refused even one request later.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::Span;
use utoipa::{OpenApi, ToSchema};
use voicebank_error::{ProblemDetails, VoicebankError};
use voicebank_room_token::{CredentialRequest, RoomConfig, TokenIssuer};

use crate::session_store::SessionStore;

pub const HEADER_USER_ID: &str = "x-user-id";
pub const HEADER_USER_NAME: &str = "x-user-name";
pub const HEADER_SESSION_ID: &str = "x-session-id";

const MIN_USER_ID_LEN: usize = 3;
const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug)]
pub struct AppState {
    store: Arc<SessionStore>,
    issuer: TokenIssuer,
    server_url: String,
}

impl AppState {
    pub fn new(issuer: TokenIssuer, server_url: impl Into<String>) -> Self {
        Self {
            store: Arc::new(SessionStore::new()),
            issuer,
            server_url: server_url.into(),
        }
    }

    pub fn store(&self) -> Arc<SessionStore> {
        self.store.clone()
    }
}

pub fn build_router(state: AppState) -> Router {
    build_router_with_state(Arc::new(state)).0
}

pub fn build_router_with_state(shared: Arc<AppState>) -> (Router, Arc<AppState>) {
    let mut router = Router::new()
        .route("/health", get(get_health))
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/connection-details", post(connection_details))
        .with_state(shared.clone())
        .fallback(not_found);

    let http_logging = match std::env::var("VOICEBANK_LOG_HTTP") {
        Ok(value) if value == "0" || value.eq_ignore_ascii_case("false") => false,
        _ => true,
    };
    if http_logging {
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|req: &Request<_>| {
                tracing::info_span!(
                    "http.request",
                    method = %req.method(),
                    uri = %req.uri()
                )
            })
            .on_request(|_req: &Request<_>, span: &Span| {
                tracing::info!(parent: span, "request");
            })
            .on_response(|res: &Response<_>, latency: Duration, span: &Span| {
                tracing::info!(
                    parent: span,
                    status = %res.status(),
                    latency_ms = latency.as_millis()
                );
            });
        router = router.layer(trace_layer);
    }

    (router, shared)
}

#[derive(OpenApi)]
#[openapi(
    paths(get_health, signup, login, logout, connection_details),
    components(schemas(
        HealthResponse,
        SignupRequest,
        SignupResponse,
        LoginRequest,
        LoginResponse,
        LogoutRequest,
        LogoutResponse,
        ConnectionDetailsRequest,
        ConnectionDetailsResponse,
        ProblemDetails
    ))
)]
pub struct ApiDoc;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Voicebank(#[from] VoicebankError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let problem: ProblemDetails = match &self {
            ApiError::Voicebank(err) => err.to_problem_details(),
        };
        let status =
            StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(problem)).into_response()
    }
}

#[derive(Debug, Serialize, ToSchema, JsonSchema)]
struct HealthResponse {
    status: String,
}

// Request bodies keep every field optional so an absent field surfaces as a
// 400 from our own validation instead of an extractor rejection.
#[derive(Debug, Deserialize, ToSchema, JsonSchema)]
pub struct SignupRequest {
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub password: Option<String>,
    pub customer_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema, JsonSchema)]
pub struct SignupResponse {
    pub ok: bool,
    pub user_id: String,
    pub user_name: String,
}

#[derive(Debug, Deserialize, ToSchema, JsonSchema)]
pub struct LoginRequest {
    pub user_id: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize, ToSchema, JsonSchema)]
pub struct LoginResponse {
    pub ok: bool,
    pub session_id: String,
    pub user_id: String,
    pub user_name: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema, JsonSchema)]
pub struct LogoutRequest {
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema, JsonSchema)]
pub struct LogoutResponse {
    pub ok: bool,
}

#[derive(Debug, Default, Deserialize, ToSchema, JsonSchema)]
pub struct ConnectionDetailsRequest {
    #[schema(value_type = Option<Object>)]
    #[schemars(with = "Option<serde_json::Value>")]
    pub room_config: Option<RoomConfig>,
}

#[derive(Debug, Serialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetailsResponse {
    pub server_url: String,
    pub participant_name: String,
    pub participant_token: String,
    pub room_name: String,
}

fn require(value: Option<String>, field: &str) -> Result<String, VoicebankError> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(VoicebankError::InvalidRequest {
            message: format!("missing required field: {field}"),
        }),
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, body = HealthResponse)),
    tag = "health"
)]
async fn get_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 200, body = SignupResponse),
        (status = 400, body = ProblemDetails),
        (status = 409, body = ProblemDetails)
    ),
    tag = "auth"
)]
async fn signup(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SignupRequest>,
) -> Result<Json<SignupResponse>, ApiError> {
    let user_id = require(request.user_id, "user_id")?;
    let name = require(request.name, "name")?;
    let password = require(request.password, "password")?;
    let customer_id = require(request.customer_id, "customer_id")?;

    if user_id.len() < MIN_USER_ID_LEN {
        return Err(VoicebankError::InvalidRequest {
            message: format!("user_id must be at least {MIN_USER_ID_LEN} characters"),
        }
        .into());
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(VoicebankError::InvalidRequest {
            message: format!("password must be at least {MIN_PASSWORD_LEN} characters"),
        }
        .into());
    }

    let profile = state
        .store
        .create_user(&user_id, &name, &customer_id, &password)?;
    tracing::info!(user_id = %profile.user_id, "user registered");
    Ok(Json(SignupResponse {
        ok: true,
        user_id: profile.user_id,
        user_name: profile.name,
    }))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, body = LoginResponse),
        (status = 400, body = ProblemDetails),
        (status = 401, body = ProblemDetails)
    ),
    tag = "auth"
)]
async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user_id = require(request.user_id, "user_id")?;
    let password = require(request.password, "password")?;

    let profile = state
        .store
        .verify_password(&user_id, &password)
        .ok_or(VoicebankError::InvalidCredentials)?;
    let session = state.store.create_session(&profile.user_id);
    tracing::info!(user_id = %profile.user_id, session_id = %session.session_id, "login");
    Ok(Json(LoginResponse {
        ok: true,
        session_id: session.session_id,
        user_id: profile.user_id,
        user_name: profile.name,
        expires_at: session.expires_at,
    }))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, body = LogoutResponse),
        (status = 400, body = ProblemDetails)
    ),
    tag = "auth"
)]
async fn logout(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LogoutRequest>,
) -> Result<Json<LogoutResponse>, ApiError> {
    let session_id = require(request.session_id, "session_id")?;
    // Idempotent: revoking an already-inactive or unknown session still
    // reports success, so a client can retry logout safely.
    state.store.revoke(&session_id);
    Ok(Json(LogoutResponse { ok: true }))
}

#[utoipa::path(
    post,
    path = "/connection-details",
    request_body = ConnectionDetailsRequest,
    params(
        ("x-user-id" = String, Header, description = "User identity"),
        ("x-user-name" = Option<String>, Header, description = "Display name override"),
        ("x-session-id" = Option<String>, Header, description = "Login session to bind into room metadata")
    ),
    responses(
        (status = 200, body = ConnectionDetailsResponse),
        (status = 401, body = ProblemDetails),
        (status = 502, body = ProblemDetails)
    ),
    tag = "connection"
)]
async fn connection_details(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Option<Json<ConnectionDetailsRequest>>,
) -> Result<Json<ConnectionDetailsResponse>, ApiError> {
    let user_id = header(&headers, HEADER_USER_ID)
        .filter(|value| !value.is_empty())
        .ok_or(VoicebankError::Unauthenticated)?
        .to_string();

    // The session header is optional, but when supplied it must validate
    // right now; a stale or revoked session fails the whole request.
    let session_id = match header(&headers, HEADER_SESSION_ID) {
        Some(session_id) if !session_id.is_empty() => {
            if !state.store.validate(session_id, &user_id) {
                return Err(VoicebankError::InvalidSession {
                    session_id: session_id.to_string(),
                }
                .into());
            }
            Some(session_id.to_string())
        }
        _ => None,
    };

    let participant_name = match header(&headers, HEADER_USER_NAME) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => state
            .store
            .user_profile(&user_id)
            .map(|profile| profile.name)
            .unwrap_or_else(|| user_id.clone()),
    };

    let room_config = request.and_then(|Json(body)| body.room_config);
    let credential = CredentialRequest {
        identity: user_id.clone(),
        display_name: Some(participant_name.clone()),
        session_id,
        room_config,
    };
    let token = state
        .issuer
        .mint(&credential)
        .map_err(|err| VoicebankError::TransportFailure {
            message: err.to_string(),
        })?;
    let room_name = voicebank_room_token::room_name_for_user(&user_id);
    tracing::info!(user_id = %user_id, room = %room_name, "issued room credential");

    Ok(Json(ConnectionDetailsResponse {
        server_url: state.server_url.clone(),
        participant_name,
        participant_token: token,
        room_name,
    }))
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}
