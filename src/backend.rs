use crate::protocol::unreachable_health;
use reqwest::{Client as HttpClient, Url};
use serde_json::Value;
use tracing::{debug, warn};

/// Resolves logical API paths against the backend base URL.
#[derive(Debug, Clone)]
pub struct BackendUrl {
    base: Url,
}

impl BackendUrl {
    pub fn parse(base: &str) -> Result<Self, String> {
        let base = Url::parse(base).map_err(|e| format!("invalid backend url {base:?}: {e}"))?;
        if base.cannot_be_a_base() {
            return Err(format!("backend url {base} cannot be used as a base"));
        }
        Ok(Self { base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Builds `<base>/api/<path>` with each non-null query value set as a
    /// string. A repeated key keeps its first position and its values are
    /// joined with commas, the way an array query value renders.
    pub fn resolve(&self, path: &str, query: &[(String, Value)]) -> Url {
        let mut url = self.endpoint(&format!("api/{}", path.trim_start_matches('/')));

        let mut params: Vec<(&str, String)> = Vec::new();
        for (key, value) in query {
            let Some(value) = query_value(value) else {
                continue;
            };
            match params.iter_mut().find(|(existing, _)| *existing == key.as_str()) {
                Some(slot) => {
                    slot.1.push(',');
                    slot.1.push_str(&value);
                }
                None => params.push((key.as_str(), value)),
            }
        }

        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        url
    }

    pub fn health(&self) -> Url {
        self.endpoint("health")
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        let joined = format!("{}/{}", self.base.path().trim_end_matches('/'), path);
        url.set_path(&joined);
        url.set_query(None);
        url
    }
}

fn query_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| query_value(item).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// Probes the backend health endpoint and returns its JSON unchanged, whatever
/// the status code. Never fails: an unreachable backend or a body that is not
/// JSON degrades to [`unreachable_health`].
pub async fn probe_health(http: &HttpClient, backend: &BackendUrl) -> Value {
    let url = backend.health();
    let response = match http.get(url.clone()).send().await {
        Ok(response) => response,
        Err(err) => {
            warn!(%url, error = %err, "backend health probe failed");
            return unreachable_health();
        }
    };

    let status = response.status();
    match response.json::<Value>().await {
        Ok(body) => {
            debug!(%status, "backend health");
            body
        }
        Err(err) => {
            warn!(%url, error = %err, "backend health body unreadable");
            unreachable_health()
        }
    }
}
