use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    InvalidRequest,
    Conflict,
    Unauthenticated,
    InvalidCredentials,
    InvalidSession,
    PromptBusy,
    NoPromptPending,
    ConnectionClosed,
    TransportFailure,
}

impl ErrorType {
    pub fn as_urn(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "urn:voicebank:error:invalid_request",
            Self::Conflict => "urn:voicebank:error:conflict",
            Self::Unauthenticated => "urn:voicebank:error:unauthenticated",
            Self::InvalidCredentials => "urn:voicebank:error:invalid_credentials",
            Self::InvalidSession => "urn:voicebank:error:invalid_session",
            Self::PromptBusy => "urn:voicebank:error:prompt_busy",
            Self::NoPromptPending => "urn:voicebank:error:no_prompt_pending",
            Self::ConnectionClosed => "urn:voicebank:error:connection_closed",
            Self::TransportFailure => "urn:voicebank:error:transport_failure",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "Invalid Request",
            Self::Conflict => "Conflict",
            Self::Unauthenticated => "Unauthenticated",
            Self::InvalidCredentials => "Invalid Credentials",
            Self::InvalidSession => "Invalid Session",
            Self::PromptBusy => "Prompt Busy",
            Self::NoPromptPending => "No Prompt Pending",
            Self::ConnectionClosed => "Connection Closed",
            Self::TransportFailure => "Transport Failure",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::Conflict => 409,
            Self::Unauthenticated => 401,
            Self::InvalidCredentials => 401,
            Self::InvalidSession => 401,
            Self::PromptBusy => 409,
            Self::NoPromptPending => 409,
            Self::ConnectionClosed => 410,
            Self::TransportFailure => 502,
        }
    }
}

/// RFC 7807 problem document rendered on every HTTP error response.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_: String,
    pub title: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl ProblemDetails {
    pub fn new(error_type: ErrorType, detail: Option<String>) -> Self {
        Self {
            type_: error_type.as_urn().to_string(),
            title: error_type.title().to_string(),
            status: error_type.status_code(),
            detail,
            instance: None,
            extensions: Map::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum VoicebankError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("conflict: {message}")]
    Conflict { message: String },
    #[error("missing identity")]
    Unauthenticated,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid or expired session")]
    InvalidSession { session_id: String },
    #[error("a prompt is already awaiting a response")]
    PromptBusy { method: String },
    #[error("no prompt is awaiting a response")]
    NoPromptPending,
    #[error("room connection closed")]
    ConnectionClosed { method: Option<String> },
    #[error("transport failure: {message}")]
    TransportFailure { message: String },
}

impl VoicebankError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::InvalidRequest { .. } => ErrorType::InvalidRequest,
            Self::Conflict { .. } => ErrorType::Conflict,
            Self::Unauthenticated => ErrorType::Unauthenticated,
            Self::InvalidCredentials => ErrorType::InvalidCredentials,
            Self::InvalidSession { .. } => ErrorType::InvalidSession,
            Self::PromptBusy { .. } => ErrorType::PromptBusy,
            Self::NoPromptPending => ErrorType::NoPromptPending,
            Self::ConnectionClosed { .. } => ErrorType::ConnectionClosed,
            Self::TransportFailure { .. } => ErrorType::TransportFailure,
        }
    }

    pub fn to_problem_details(&self) -> ProblemDetails {
        let mut problem = ProblemDetails::new(self.error_type(), Some(self.to_string()));

        let mut extensions = Map::new();
        match self {
            Self::InvalidSession { session_id } => {
                extensions.insert("sessionId".to_string(), Value::String(session_id.clone()));
            }
            Self::PromptBusy { method } => {
                extensions.insert("method".to_string(), Value::String(method.clone()));
            }
            Self::ConnectionClosed {
                method: Some(method),
            } => {
                extensions.insert("method".to_string(), Value::String(method.clone()));
            }
            _ => {}
        }
        problem.extensions = extensions;
        problem
    }
}

impl From<VoicebankError> for ProblemDetails {
    fn from(value: VoicebankError) -> Self {
        value.to_problem_details()
    }
}

impl From<&VoicebankError> for ProblemDetails {
    fn from(value: &VoicebankError) -> Self {
        value.to_problem_details()
    }
}
