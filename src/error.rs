use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Upstream error ({status})")]
    Upstream { status: StatusCode, detail: String },

    #[error("Backend unreachable: {0}")]
    Transport(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Builds an upstream error from a non-2xx backend response body.
    pub fn upstream(status: StatusCode, body: &str) -> Self {
        Self::Upstream {
            status,
            detail: extract_detail(body),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Upstream { status, .. } => *status,
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Upstream { .. } => "UPSTREAM_ERROR",
            Self::Transport(_) => "BAD_GATEWAY",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Structured error body sent to the browser.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        match &self {
            ProxyError::Transport(msg) | ProxyError::Internal(msg) => {
                error!(error_code = code, message = %msg, "proxy error");
            }
            ProxyError::Upstream { status, .. } => {
                warn!(error_code = code, %status, "backend rejected request");
            }
            ProxyError::BadRequest(msg) => {
                debug!(error_code = code, message = %msg, "client error");
            }
        }

        let detail = match &self {
            ProxyError::Upstream { detail, .. } if !detail.is_empty() => Some(detail.clone()),
            _ => None,
        };
        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            detail,
        };

        (status, Json(body)).into_response()
    }
}

/// Client-side failure, decoded once from whatever the transport produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    #[error("HTTP {status}")]
    Backend { status: u16, detail: Option<String> },

    #[error("Network error: {0}")]
    Transport(String),

    #[error("{0}")]
    Validation(String),

    #[error("A response is still streaming")]
    Busy,

    #[error("Stream cancelled")]
    Cancelled,
}

impl ApiError {
    /// Decodes a failed response body: a JSON `detail` string wins, then the
    /// proxy's own `error` field, then the raw text.
    pub fn from_body(status: u16, body: &str) -> Self {
        let detail = Some(extract_detail(body)).filter(|detail| !detail.is_empty());
        Self::Backend { status, detail }
    }

    /// Short human-readable description for notifications.
    pub fn description(&self) -> String {
        match self {
            ApiError::Backend {
                detail: Some(detail),
                ..
            } => detail.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

fn extract_detail(body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for key in ["detail", "error", "message"] {
            if let Some(Value::String(text)) = map.get(key) {
                return text.clone();
            }
        }
    }
    body.trim().to_string()
}
