use crate::backend::BackendUrl;
use crate::error::ProxyError;
use axum::http::{HeaderMap, HeaderValue, Method, header};
use bytes::Bytes;
use reqwest::{Client as HttpClient, RequestBuilder, Response, Url};
use serde_json::Value;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_MULTIPART: &str = "multipart/form-data";
pub const CONTENT_TYPE_EVENT_STREAM: &str = "text/event-stream";

#[derive(Debug)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, Value)>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundBody {
    Empty,
    Json(String),
    /// Raw multipart payload together with the browser's own content type,
    /// which carries the boundary the bytes were framed with.
    Multipart {
        content_type: HeaderValue,
        bytes: Bytes,
    },
}

#[derive(Debug)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: OutboundBody,
}

impl OutboundRequest {
    pub fn into_builder(self, http: &HttpClient) -> RequestBuilder {
        let builder = http.request(self.method, self.url).headers(self.headers);
        match self.body {
            OutboundBody::Empty => builder,
            OutboundBody::Json(json) => builder.body(json),
            OutboundBody::Multipart {
                content_type,
                bytes,
            } => builder.header(header::CONTENT_TYPE, content_type).body(bytes),
        }
    }

    pub async fn send(self, http: &HttpClient) -> Result<Response, ProxyError> {
        Ok(self.into_builder(http).send().await?)
    }
}

pub fn carries_body(method: &Method) -> bool {
    [Method::POST, Method::PUT, Method::PATCH, Method::DELETE].contains(method)
}

/// Builds the backend request for `inbound`, attaching `token` as a bearer
/// credential when the browser has a session.
pub fn translate(
    inbound: InboundRequest,
    backend: &BackendUrl,
    token: Option<&str>,
) -> Result<OutboundRequest, ProxyError> {
    let url = backend.resolve(&inbound.path, &inbound.query);

    let content_type = inbound
        .headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(CONTENT_TYPE_JSON));

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, content_type.clone());
    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ProxyError::BadRequest("session cookie is not a valid token".into()))?;
        headers.insert(header::AUTHORIZATION, value);
    }
    if let Some(accept) = inbound.headers.get(header::ACCEPT) {
        headers.insert(header::ACCEPT, accept.clone());
    }

    let body = if carries_body(&inbound.method) {
        encode_body(&mut headers, content_type, inbound.body)?
    } else {
        OutboundBody::Empty
    };

    Ok(OutboundRequest {
        method: inbound.method,
        url,
        headers,
        body,
    })
}

fn encode_body(
    headers: &mut HeaderMap,
    content_type: HeaderValue,
    raw: Bytes,
) -> Result<OutboundBody, ProxyError> {
    let essence = media_type(&content_type);

    if essence == CONTENT_TYPE_MULTIPART {
        headers.remove(header::CONTENT_TYPE);
        return Ok(OutboundBody::Multipart {
            content_type,
            bytes: raw,
        });
    }

    if essence == CONTENT_TYPE_JSON {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(OutboundBody::Empty);
        }
        let parsed: Value = serde_json::from_slice(&raw)
            .map_err(|e| ProxyError::BadRequest(format!("invalid JSON body: {e}")))?;
        return Ok(OutboundBody::Json(parsed.to_string()));
    }

    Ok(OutboundBody::Empty)
}

fn media_type(value: &HeaderValue) -> String {
    value
        .to_str()
        .unwrap_or_default()
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
