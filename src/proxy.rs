use crate::error::ProxyError;
use crate::protocol::{LoginResponse, TOKEN_PLACEHOLDER};
use crate::relay::relay_event_stream;
use crate::server::AppState;
use crate::translate::{
    CONTENT_TYPE_EVENT_STREAM, CONTENT_TYPE_JSON, InboundRequest, OutboundRequest, translate,
};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::Json;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

pub const LOGIN_PATH: &str = "auth/login";
pub const LOGOUT_PATH: &str = "auth/logout";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Login,
    Logout,
    Streaming,
    Passthrough,
}

impl Strategy {
    pub fn select(method: &Method, path: &str, accept: Option<&str>) -> Self {
        if path == LOGIN_PATH && *method == Method::POST {
            Strategy::Login
        } else if path == LOGOUT_PATH && *method == Method::DELETE {
            Strategy::Logout
        } else if accept.is_some_and(|accept| accept.contains(CONTENT_TYPE_EVENT_STREAM)) {
            Strategy::Streaming
        } else {
            Strategy::Passthrough
        }
    }
}

/// Per-request view of the browser session: its cookie jar and the token
/// read from it, if any.
#[derive(Debug)]
pub struct SessionContext {
    pub jar: CookieJar,
    pub token: Option<String>,
}

impl SessionContext {
    pub fn from_jar(state: &AppState, jar: CookieJar) -> Self {
        let token = state.credentials.token(&jar);
        Self { jar, token }
    }
}

pub async fn handle(
    State(state): State<Arc<AppState>>,
    method: Method,
    Path(path): Path<String>,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let span = info_span!("proxy", request_id = %Uuid::new_v4(), %method, %path);

    let inbound = InboundRequest {
        method,
        path,
        query: query
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect(),
        headers,
        body,
    };

    dispatch(&state, SessionContext::from_jar(&state, jar), inbound)
        .instrument(span)
        .await
}

pub async fn dispatch(
    state: &AppState,
    session: SessionContext,
    inbound: InboundRequest,
) -> Result<Response, ProxyError> {
    let accept = inbound
        .headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok());
    let strategy = Strategy::select(&inbound.method, &inbound.path, accept);
    debug!(?strategy, authenticated = session.token.is_some(), "dispatching");

    let request = translate(inbound, &state.backend, session.token.as_deref())?;

    match strategy {
        Strategy::Login => login(state, session, request).await,
        Strategy::Logout => Ok(logout(state, session, request).await),
        Strategy::Streaming => stream(state, request).await,
        Strategy::Passthrough => passthrough(state, request).await,
    }
}

async fn login(
    state: &AppState,
    session: SessionContext,
    request: OutboundRequest,
) -> Result<Response, ProxyError> {
    let response = request.send(&state.http).await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProxyError::upstream(status, &body));
    }

    let login: LoginResponse = response
        .json()
        .await
        .map_err(|e| ProxyError::Transport(format!("unreadable login response: {e}")))?;

    let jar = match login.token.filter(|token| !token.is_empty()) {
        Some(token) => state.credentials.store(session.jar, token),
        None => {
            warn!("backend accepted login without issuing a token");
            session.jar
        }
    };

    let body = LoginResponse {
        token: Some(TOKEN_PLACEHOLDER.to_string()),
    };
    Ok((jar, Json(body)).into_response())
}

/// Clears the cookie first, then tells the backend. The browser ends up
/// logged out even when the backend is down.
async fn logout(state: &AppState, session: SessionContext, request: OutboundRequest) -> Response {
    let jar = state.credentials.clear(session.jar);

    if session.token.is_some() {
        if let Err(ignored) = notify_logout(state, request).await {
            warn!(error = %ignored, "backend logout failed; session cookie already cleared");
        }
    }

    (jar, StatusCode::NO_CONTENT).into_response()
}

async fn notify_logout(state: &AppState, request: OutboundRequest) -> Result<(), ProxyError> {
    let response = request.send(&state.http).await?;
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(ProxyError::upstream(status, &body))
    }
}

async fn stream(state: &AppState, request: OutboundRequest) -> Result<Response, ProxyError> {
    let response = request.send(&state.http).await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProxyError::upstream(status, &body));
    }
    relay_event_stream(response)
}

async fn passthrough(state: &AppState, request: OutboundRequest) -> Result<Response, ProxyError> {
    let response = request.send(&state.http).await?;
    let status = response.status();

    if status == StatusCode::NO_CONTENT {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| content_type.contains(CONTENT_TYPE_JSON));

    if is_json {
        let value: Value = response
            .json()
            .await
            .map_err(|e| ProxyError::Transport(format!("unreadable backend JSON: {e}")))?;
        Ok((status, Json(value)).into_response())
    } else {
        let text = response.text().await?;
        Ok((status, text).into_response())
    }
}
