use crate::backend::{BackendUrl, probe_health};
use crate::config::ServeConfig;
use crate::credentials::CredentialStore;
use crate::proxy;
use axum::extract::{DefaultBodyLimit, State};
use axum::Json;
use axum::routing::{any, get};
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::error::Error;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state handed to every request handler.
pub struct AppState {
    pub http: HttpClient,
    pub backend: BackendUrl,
    pub credentials: CredentialStore,
}

type ServerResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

impl AppState {
    pub fn from_config(config: &ServeConfig) -> ServerResult<Self> {
        let backend = BackendUrl::parse(&config.backend_url)?;
        let http = HttpClient::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            http,
            backend,
            credentials: CredentialStore::new(config.secure_cookie),
        })
    }
}

pub fn router(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route("/api/system-health", get(system_health))
        // Uploads are relayed whole, so axum's 2 MiB cap would reject them.
        .route(
            "/api/*path",
            any(proxy::handle).layer(DefaultBodyLimit::disable()),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(config: ServeConfig) -> ServerResult<()> {
    let state = Arc::new(AppState::from_config(&config)?);
    let backend = state.backend.base().clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!(listen = %config.listen, %backend, "cadence relay listening");
    axum::serve(listener, app).await?;

    Ok(())
}

async fn system_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(probe_health(&state.http, &state.backend).await)
}
