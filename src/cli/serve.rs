use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::ServeArgs;
use crate::core::config::Config;
use crate::core::runtime::cancel_on_ctrl_c;
use crate::exchange::{register_tools, ExchangeRateClient, ExchangeSettings};
use crate::mcp::server::sse::serve_sse;
use crate::mcp::server::stdio::serve_stdio;
use crate::mcp::server::ServerIdentity;
use crate::mcp::transport::TransportKind;
use crate::tools::ToolRegistry;

pub async fn run(config: &Config, args: ServeArgs) -> Result<(), Box<dyn Error>> {
    // Without a key no transport is opened at all.
    let settings = match ExchangeSettings::from_config(config) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("❌ {e}");
            std::process::exit(1);
        }
    };

    let kind = match args.transport {
        Some(kind) => kind,
        None => TransportKind::from_name(config.server_transport())?,
    };
    let registry = Arc::new(build_registry(settings)?);
    let identity = ServerIdentity::new(config.server_name());

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    match kind {
        TransportKind::Stdio => {
            let state = serve_stdio(registry, identity, &shutdown).await;
            info!(state = %state, "stdio session ended");
            Ok(())
        }
        TransportKind::Sse => {
            let host = args.host.as_deref().unwrap_or(config.server_host());
            let port = args.port.unwrap_or(config.server_port());
            let addr = resolve_addr(host, port).await?;
            serve_sse(registry, identity, addr, shutdown).await?;
            Ok(())
        }
    }
}

pub fn build_registry(settings: ExchangeSettings) -> Result<ToolRegistry, Box<dyn Error>> {
    let client = Arc::new(ExchangeRateClient::new(settings)?);
    let mut registry = ToolRegistry::new();
    register_tools(&mut registry, client)?;
    Ok(registry)
}

async fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr, Box<dyn Error>> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| format!("No address found for {host}:{port}").into())
}
