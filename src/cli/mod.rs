//! Command-line interface parsing and handling
//!
//! `serve` runs the currency MCP server, `probe` drives it with a fixed
//! script, and `chat` puts the planner-driven agent in front of it.

pub mod chat;
pub mod probe;
pub mod serve;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use crate::agent::BudgetPolicy;
use crate::core::config::Config;
use crate::mcp::client::ClientSession;
use crate::mcp::transport::{client_transport, TransportKind};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ngit: ",
    env!("VERGEN_GIT_DESCRIBE"),
    "\ntarget: ",
    env!("VERGEN_CARGO_TARGET_TRIPLE"),
    "\nbuilt: ",
    env!("VERGEN_BUILD_DATE"),
    "\nrustc: ",
    env!("VERGEN_RUSTC_SEMVER"),
);

#[derive(Parser, Debug)]
#[command(name = "cambista")]
#[command(version, long_version = LONG_VERSION)]
#[command(about = "Currency exchange tools over the Model Context Protocol")]
#[command(
    long_about = "Cambista serves two currency tools over MCP (get_exchange_rate and \
list_supported_currencies), backed by ExchangeRate-API.\n\n\
Environment Variables:\n\
  EXCHANGE_RATE_API_KEY   ExchangeRate-API key (required by `serve`)\n\
  GROQ_API_KEY            Planner key for `chat` (see [planner] in the config file)\n\
  RUST_LOG                Log filter, e.g. cambista=debug\n\n\
Variables may also be placed in a .env file in the working directory."
)]
pub struct Args {
    /// Configuration file (defaults to the per-user config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the currency exchange MCP server
    Serve(ServeArgs),
    /// Connect to a server, list its tools and call each one once
    Probe(ProbeArgs),
    /// Chat with an agent that answers using the server's tools
    Chat(ChatArgs),
}

#[derive(ClapArgs, Debug)]
pub struct ServeArgs {
    /// Transport to serve on: stdio or sse
    #[arg(short, long)]
    pub transport: Option<TransportKind>,
    /// Listen address for the sse transport
    #[arg(long)]
    pub host: Option<String>,
    /// Listen port for the sse transport
    #[arg(short, long)]
    pub port: Option<u16>,
}

/// How a client command reaches the server.
#[derive(ClapArgs, Debug, Default)]
pub struct ConnectArgs {
    /// Transport to connect with: stdio or sse
    #[arg(short, long)]
    pub transport: Option<TransportKind>,
    /// Event stream URL for the sse transport
    #[arg(long)]
    pub url: Option<String>,
    /// Server command for the stdio transport (defaults to this binary)
    #[arg(long)]
    pub command: Option<String>,
    /// Arguments for --command
    #[arg(last = true)]
    pub args: Vec<String>,
}

#[derive(ClapArgs, Debug)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(ClapArgs, Debug)]
pub struct ChatArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Append the conversation to this file
    #[arg(short, long, value_name = "FILE")]
    pub log: Option<PathBuf>,
    /// Tool calls allowed before the agent gives a partial answer
    #[arg(long)]
    pub max_steps: Option<usize>,
    /// Forget earlier turns; every question starts fresh
    #[arg(long)]
    pub no_memory: bool,
    /// When the step budget refills: per-turn or cumulative
    #[arg(long)]
    pub budget: Option<BudgetPolicy>,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    // Before the runtime starts so no other thread reads the environment.
    let _ = dotenvy::dotenv();
    init_tracing();

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(async_main(args));
    // The stdin reader of `serve --transport stdio` never returns on its own.
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {e}");
            std::process::exit(1);
        }
    };

    match args.command {
        Commands::Serve(serve_args) => serve::run(&config, serve_args).await,
        Commands::Probe(probe_args) => {
            probe::run(&config, args.config.as_deref(), probe_args).await
        }
        Commands::Chat(chat_args) => chat::run(&config, args.config.as_deref(), chat_args).await,
    }
}

/// Logs go to stderr so stdout stays free for the stdio transport.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cambista=info"));
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .with_writer(std::io::stderr)
            .init();
    });
}

/// Applies command-line connection overrides on top of `[client]`.
pub fn client_config(
    config: &Config,
    config_path: Option<&Path>,
    connect: &ConnectArgs,
) -> Result<(TransportKind, Config), String> {
    let mut config = config.clone();
    if let Some(url) = &connect.url {
        config.client.url = Some(url.clone());
    }
    if let Some(command) = &connect.command {
        config.client.command = Some(command.clone());
        config.client.args = Some(connect.args.clone());
    }

    let kind = match connect.transport {
        Some(kind) => kind,
        None => TransportKind::from_name(config.client_transport())?,
    };

    // A spawned copy of this binary should read the same config file.
    let spawns_self = config
        .client
        .command
        .as_deref()
        .is_none_or(|command| command.trim().is_empty());
    if kind == TransportKind::Stdio && spawns_self && config.client.args.is_none() {
        if let Some(path) = config_path {
            config.client.args = Some(vec![
                "--config".to_string(),
                path.to_string_lossy().into_owned(),
                "serve".to_string(),
                "--transport".to_string(),
                "stdio".to_string(),
            ]);
        }
    }
    Ok((kind, config))
}

/// Opens the configured transport and completes the MCP handshake.
pub async fn connect(
    config: &Config,
    config_path: Option<&Path>,
    connect: &ConnectArgs,
) -> Result<ClientSession, Box<dyn Error>> {
    let (kind, config) = client_config(config, config_path, connect)?;
    let transport = client_transport(kind, &config)?;
    let session = ClientSession::open(transport.as_ref(), config.client_request_timeout()).await?;
    if let Err(err) = session.initialize().await {
        session.close().await;
        return Err(err.into());
    }
    Ok(session)
}
