//! hr - hubrpc command line
//!
//! Runs the coordinator hub or acts as a short-lived peer against it.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use serde_json::{Value, json};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hubrpc::broker::{Broker, BrokerHandle, ProcessKind};
use hubrpc::cli::{Cli, Command, ValueCommand, get_log_path, open_log_file};
use hubrpc::config::Config;
use hubrpc::transport::{UnixHub, UnixPeer};
use hubrpc::value::ValueRegistry;

/// How long a peer waits for queued messages to reach the socket before exiting
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

fn setup_logging(verbose: bool) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // log file only; stdout carries command output
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = open_log_file(&log_path).context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(socket) = cli.socket {
        config.transport.socket_path = socket;
    }
    info!(socket_path = ?config.transport.socket_path, "hubrpc loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Hub { values } => cmd_hub(&config, &values).await,
        Command::Call {
            name,
            data,
            timeout_ms,
            retries,
        } => cmd_call(&config, &name, data.as_deref(), timeout_ms, retries).await,
        Command::Emit { name, data } => cmd_emit(&config, &name, data.as_deref()).await,
        Command::Listen { name } => cmd_listen(&config, &name).await,
        Command::Value { command } => match command {
            ValueCommand::Get { name } => cmd_value_get(&config, &name).await,
            ValueCommand::Set { name, value } => cmd_value_set(&config, &name, &value).await,
            ValueCommand::Watch { name } => cmd_value_watch(&config, &name).await,
        },
    }
}

fn parse_json(data: Option<&str>) -> Result<Value> {
    match data {
        Some(text) => serde_json::from_str(text).context(format!("Invalid JSON: {}", text)),
        None => Ok(Value::Null),
    }
}

fn render(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

async fn cmd_hub(config: &Config, values: &[String]) -> Result<()> {
    let (transport, inbound) = UnixHub::bind(&config.transport).context("Failed to bind hub socket")?;
    let socket_path = transport.socket_path().to_path_buf();

    let (broker, task) = Broker::new(config.broker.clone(), ProcessKind::Coordinator, transport, inbound).spawn();

    broker
        .handle("hub-ping", |_data| async move {
            Ok(json!({"pong": true, "version": env!("CARGO_PKG_VERSION")}))
        })
        .await?;

    let registry = ValueRegistry::new(broker.clone());
    for name in values {
        registry.get_or_create::<Value>(name, None).await?;
        info!(%name, "Hosting replicated value");
    }

    println!("{} hub listening on {}", "✓".green(), socket_path.display());
    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down hub");

    registry.clear().await?;
    broker.shutdown().await?;
    task.await?;
    Ok(())
}

/// A connected peer broker plus what is needed to exit cleanly
struct PeerSession {
    broker: BrokerHandle,
    task: JoinHandle<()>,
    flushed: Arc<Notify>,
}

impl PeerSession {
    async fn connect(config: &Config) -> Result<Self> {
        let socket_path = &config.transport.socket_path;
        let (transport, inbound) = UnixPeer::connect(&config.transport)
            .await
            .context(format!("Failed to connect to hub at {}", socket_path.display()))?;
        let flushed = transport.flushed();

        let (broker, task) = Broker::new(config.broker.clone(), ProcessKind::Peer, transport, inbound).spawn();
        Ok(Self { broker, task, flushed })
    }

    /// Stop the broker and wait for queued messages to be written
    async fn close(self) -> Result<()> {
        self.broker.shutdown().await?;
        self.task.await?;
        if tokio::time::timeout(FLUSH_TIMEOUT, self.flushed.notified()).await.is_err() {
            warn!("Timed out flushing messages to hub");
        }
        Ok(())
    }
}

async fn cmd_call(
    config: &Config,
    name: &str,
    data: Option<&str>,
    timeout_ms: Option<u64>,
    retries: Option<u32>,
) -> Result<()> {
    let data = parse_json(data)?;
    let session = PeerSession::connect(config).await?;

    let mut options = session.broker.call_options();
    if let Some(timeout_ms) = timeout_ms {
        options.timeout = Duration::from_millis(timeout_ms);
    }
    if let Some(retries) = retries {
        options.retries = retries;
    }

    let result = session.broker.call_with(name, data, options).await;
    session.close().await?;

    match result {
        Ok(value) => {
            println!("{}", render(&value));
            Ok(())
        }
        Err(e) => match e.handler_error() {
            Some(error) => {
                eprintln!("{} {}", "Error:".red(), render(error));
                Err(eyre::eyre!("Handler for '{}' failed", name))
            }
            None => Err(e.into()),
        },
    }
}

async fn cmd_emit(config: &Config, name: &str, data: Option<&str>) -> Result<()> {
    let data = parse_json(data)?;
    let session = PeerSession::connect(config).await?;

    session.broker.emit(name, data).await?;
    session.close().await?;

    println!("{} emitted {}", "✓".green(), name);
    Ok(())
}

async fn cmd_listen(config: &Config, name: &str) -> Result<()> {
    let session = PeerSession::connect(config).await?;

    let event = name.to_string();
    session
        .broker
        .on(name, move |data| {
            println!("{} {}", event.cyan(), data);
        })
        .await?;

    eprintln!("listening for '{}' (Ctrl-C to stop)", name);
    tokio::signal::ctrl_c().await?;
    session.close().await
}

async fn cmd_value_get(config: &Config, name: &str) -> Result<()> {
    let session = PeerSession::connect(config).await?;
    let registry = ValueRegistry::new(session.broker.clone());

    let value = registry.get_or_create::<Value>(name, None).await?;
    value.ready().await?;
    println!("{}", render(&value.get().unwrap_or(Value::Null)));

    registry.clear().await?;
    session.close().await
}

async fn cmd_value_set(config: &Config, name: &str, text: &str) -> Result<()> {
    let new_value = parse_json(Some(text))?;
    let session = PeerSession::connect(config).await?;
    let registry = ValueRegistry::new(session.broker.clone());

    // seeding publishes the value as the instance is created
    registry.get_or_create(name, Some(new_value)).await?;

    registry.clear().await?;
    session.close().await?;
    println!("{} {} updated", "✓".green(), name);
    Ok(())
}

async fn cmd_value_watch(config: &Config, name: &str) -> Result<()> {
    let session = PeerSession::connect(config).await?;
    let registry = ValueRegistry::new(session.broker.clone());

    let value = registry.get_or_create::<Value>(name, None).await?;
    if let Err(e) = value.ready().await {
        eprintln!("{} {}", "Warning:".yellow(), e);
    }

    let mut changes = value.subscribe();
    println!("{}", render(&changes.borrow_and_update().clone().unwrap_or(Value::Null)));

    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("{}", render(&changes.borrow_and_update().clone().unwrap_or(Value::Null)));
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    registry.clear().await?;
    session.close().await
}
