use crate::error::ApiError;
use crate::protocol::{
    AboutMe, CompletionRequest, LoginRequest, LoginResponse, Orchestrator, OrgWithRole,
    TOKEN_PLACEHOLDER, unreachable_health,
};
use crate::translate::CONTENT_TYPE_EVENT_STREAM;
use bytes::Bytes;
use futures::Stream;
use reqwest::header::ACCEPT;
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

/// Browser-side view of the relay: a cookie-carrying HTTP client that only
/// ever talks to `/api/*` on the proxy.
#[derive(Clone)]
pub struct ProxyClient {
    base_url: String,
    http: HttpClient,
}

type ClientResult<T> = Result<T, ApiError>;

impl ProxyClient {
    pub fn new(base_url: &str) -> ClientResult<Self> {
        let http = HttpClient::builder().cookie_store(true).build()?;
        Ok(Self {
            base_url: normalize_base_url(base_url),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Logs in through the relay. The relay keeps the real token in its
    /// cookie and only echoes a placeholder back.
    pub async fn login(&self, username: &str, password: &str) -> ClientResult<bool> {
        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response = self
            .send(self.http.post(self.url("auth/login")).json(&request))
            .await?;
        let body: LoginResponse = response.json().await?;
        Ok(body.token.as_deref() == Some(TOKEN_PLACEHOLDER))
    }

    /// Always succeeds locally; the relay clears the cookie regardless.
    pub async fn logout(&self) {
        if let Err(err) = self.send(self.http.delete(self.url("auth/logout"))).await {
            warn!(error = %err, "logout request failed");
        }
    }

    pub async fn me(&self) -> ClientResult<AboutMe> {
        self.get_json("me").await
    }

    pub async fn orgs(&self) -> ClientResult<Vec<OrgWithRole>> {
        self.get_json("orgs").await
    }

    pub async fn orchestrators(&self, org_id: &str) -> ClientResult<Vec<Orchestrator>> {
        self.get_json(&format!("orgs/{org_id}/orchestrators")).await
    }

    pub async fn health(&self) -> Value {
        match self.get_json("system-health").await {
            Ok(status) => status,
            Err(err) => {
                warn!(error = %err, "relay health check failed");
                unreachable_health()
            }
        }
    }

    /// Opens the completion event stream. Non-2xx answers are turned into
    /// [`ApiError::Backend`] before any byte is decoded.
    pub async fn open_completion_stream(
        &self,
        org_id: &str,
        request: &CompletionRequest,
    ) -> ClientResult<impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static> {
        let url = self.url(&format!("orgs/{org_id}/completion/stream"));
        debug!(%url, instance_id = %request.instance_id, "opening completion stream");
        let response = self
            .send(
                self.http
                    .post(url)
                    .header(ACCEPT, CONTENT_TYPE_EVENT_STREAM)
                    .json(request),
            )
            .await?;
        Ok(response.bytes_stream())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let response = self.send(self.http.get(self.url(path))).await?;
        Ok(response.json().await?)
    }

    async fn send(&self, request: RequestBuilder) -> ClientResult<Response> {
        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_body(status, &body))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}
