use clap::Args;
use std::time::Duration;

#[derive(Debug, Clone, Args)]
pub struct ServeConfig {
    /// Address the relay listens on.
    #[arg(long, env = "CADENCE_LISTEN", default_value = "127.0.0.1:3000")]
    pub listen: String,

    /// Base URL of the backend API.
    #[arg(long, env = "CADENCE_BACKEND_URL", default_value = "http://localhost:8000")]
    pub backend_url: String,

    /// Mark the session cookie `Secure` (set this when served over HTTPS).
    #[arg(long, env = "CADENCE_SECURE_COOKIE")]
    pub secure_cookie: bool,

    /// Timeout for establishing backend connections. Streams are never cut
    /// once connected.
    #[arg(long, env = "CADENCE_CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    pub connect_timeout_secs: u64,
}

impl ServeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Args)]
pub struct ChatConfig {
    /// Base URL of a running relay.
    #[arg(long, env = "CADENCE_PROXY_URL", default_value = "http://127.0.0.1:3000")]
    pub proxy_url: String,

    #[arg(long, env = "CADENCE_USERNAME")]
    pub username: String,

    #[arg(long, env = "CADENCE_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Organization to chat in; defaults to the only one available.
    #[arg(long, env = "CADENCE_ORG")]
    pub org: Option<String>,

    /// Orchestrator instance id; defaults to the first one listed.
    #[arg(long, env = "CADENCE_INSTANCE")]
    pub instance: Option<String>,
}
