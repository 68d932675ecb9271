use cadence_relay::chat::ChatSession;
use cadence_relay::client::ProxyClient;
use cadence_relay::config::{ChatConfig, ServeConfig};
use cadence_relay::protocol::StreamUnit;
use cadence_relay::server;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::error::Error;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

type MainResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

const DEFAULT_FILTER: &str = "cadence_relay=info,tower_http=info";

#[derive(Parser)]
#[command(name = "cadence-relay", version, about = "Session-translating streaming relay")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "CADENCE_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay in front of the backend API.
    Serve(ServeConfig),
    /// Chat with an orchestrator through a running relay.
    Chat(ChatConfig),
}

#[tokio::main]
async fn main() -> MainResult<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Serve(config) => server::run(config).await,
        Command::Chat(config) => run_chat(config).await,
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

async fn run_chat(config: ChatConfig) -> MainResult<()> {
    let client = ProxyClient::new(&config.proxy_url)?;
    if !client.login(&config.username, &config.password).await? {
        return Err("relay did not accept the login".into());
    }
    let me = client.me().await?;
    info!(relay = client.base_url(), user_id = %me.user_id, "logged in");

    let org_id = match config.org {
        Some(org_id) => org_id,
        None => {
            let orgs = client.orgs().await?;
            match orgs.as_slice() {
                [only] => only.org_id.clone(),
                [] => return Err("no organizations available for this user".into()),
                _ => return Err("several organizations available; pass --org".into()),
            }
        }
    };

    let session = Arc::new(ChatSession::new(client.clone()));
    session.set_org(&org_id);

    let instance_id = match config.instance {
        Some(instance_id) => instance_id,
        None => session
            .load_orchestrators()
            .await?
            .first()
            .map(|orchestrator| orchestrator.instance_id.clone())
            .ok_or("no orchestrators in this organization")?,
    };
    session.select_instance(instance_id);
    if let Some(instance_id) = session.selected_instance() {
        eprintln!("chatting with {instance_id} in {org_id} (/clear resets, /quit exits)");
    }

    let printer = tokio::spawn(print_units(BroadcastStream::new(session.subscribe())));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            "/clear" => {
                session.clear();
                eprintln!("conversation cleared");
                continue;
            }
            _ => {}
        }

        let result = session.send(line).await;
        println!();
        if let Err(err) = result {
            eprintln!("error: {}", err.description());
        }
    }

    printer.abort();
    client.logout().await;
    Ok(())
}

async fn print_units(units: BroadcastStream<StreamUnit>) {
    let units = units.filter_map(|item| async move { item.ok() });
    let mut units = std::pin::pin!(units);
    while let Some(unit) = units.next().await {
        match unit {
            StreamUnit::Content(chunk) => {
                print!("{chunk}");
                let _ = std::io::stdout().flush();
            }
            StreamUnit::Event(event) => eprintln!("\n[{}] {}", event.kind, event.data),
            StreamUnit::SessionId(_) => {}
        }
    }
}
