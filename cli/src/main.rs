use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use envelopes::Channel;
use rpc_client::config::DEFAULT_BASE_URL;
use rpc_client::{Client, ClientConfig, ConfigError, ReconnectPolicy, RpcError, methods};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("failed to listen for ctrl-c: {0}")]
    Signal(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "rpc-cli", about = "Query, command, and watch the key remapping daemon over its RPC socket")]
struct Cli {
    /// Full socket URL; overrides --base-url.
    #[arg(long, env = "RPC_URL")]
    url: Option<String>,

    #[arg(long, env = "RPC_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, env = "RPC_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    /// How long to wait for the daemon's handshake.
    #[arg(long, default_value_t = 5)]
    connect_timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect, wait for the handshake, and print the server version.
    Status,
    /// Issue a read-only call.
    Query(CallArgs),
    /// Issue a state-changing call.
    Command(CallArgs),
    /// Print channel events as JSON lines.
    Watch(WatchArgs),
    /// List the known method names.
    Methods,
}

#[derive(Args, Debug)]
struct CallArgs {
    method: String,

    /// JSON params, e.g. '{"name":"gaming"}'.
    #[arg(long)]
    params: Option<String>,
}

#[derive(Args, Debug)]
struct WatchArgs {
    #[arg(required = true)]
    channels: Vec<Channel>,

    /// Stop after this many events.
    #[arg(long)]
    count: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if matches!(cli.command, Command::Methods) {
        run_methods();
        return Ok(());
    }

    let mut config = match &cli.url {
        Some(url) => ClientConfig::new(url.clone()),
        None => ClientConfig::from_base_url(&cli.base_url)?,
    };
    config.request_timeout = Duration::from_secs(cli.timeout_secs);
    if !matches!(cli.command, Command::Watch(_)) {
        config.reconnect = ReconnectPolicy::never();
    }

    let client = Client::connect(config);
    let outcome = run(&client, &cli).await;
    client.shutdown().await;
    outcome
}

async fn run(client: &Client, cli: &Cli) -> Result<(), CliError> {
    let info = client.wait_ready(Duration::from_secs(cli.connect_timeout_secs)).await?;
    info!(version = %info.version, "connected");

    match &cli.command {
        Command::Status => print_json(&serde_json::to_value(&info)?),
        Command::Query(call) => {
            if !methods::is_query(&call.method) {
                warn!(method = %call.method, "not a known query; sending anyway");
            }
            let result = client.query(&call.method, parse_params(call.params.as_deref())?).await?;
            print_json(&result)
        }
        Command::Command(call) => {
            if !methods::is_command(&call.method) {
                warn!(method = %call.method, "not a known command; sending anyway");
            }
            let result = client.command(&call.method, parse_params(call.params.as_deref())?).await?;
            print_json(&result)
        }
        Command::Watch(args) => run_watch(client, args).await,
        Command::Methods => {
            run_methods();
            Ok(())
        }
    }
}

async fn run_watch(client: &Client, args: &WatchArgs) -> Result<(), CliError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let mut subscriptions = Vec::new();
    for channel in &args.channels {
        let tx = tx.clone();
        let channel = *channel;
        subscriptions.push(client.subscribe(channel, move |data| {
            if tx.send(json!({"channel": channel, "data": data})).is_err() {
                warn!(%channel, "watch output closed");
            }
        }));
    }
    drop(tx);

    let mut seen = 0_usize;
    loop {
        tokio::select! {
            line = rx.recv() => {
                let Some(line) = line else { break };
                println!("{}", serde_json::to_string(&line)?);
                seen += 1;
                if args.count.is_some_and(|max| seen >= max) {
                    break;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!(seen, "interrupted");
                break;
            }
        }
    }

    for subscription in subscriptions {
        subscription.unsubscribe();
    }
    Ok(())
}

fn run_methods() {
    println!("queries:");
    for method in methods::QUERIES {
        println!("  {method}");
    }
    println!("commands:");
    for method in methods::COMMANDS {
        println!("  {method}");
    }
}

fn parse_params(raw: Option<&str>) -> Result<Option<Value>, CliError> {
    raw.map(|s| serde_json::from_str::<Value>(s)).transpose().map_err(CliError::from)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
