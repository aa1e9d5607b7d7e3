use std::error::Error;
use std::path::Path;

use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::cli::{connect, ProbeArgs};
use crate::core::config::Config;
use crate::core::runtime::{cancel_on_ctrl_c, run_cancellable};
use crate::exchange::{GET_EXCHANGE_RATE, LIST_SUPPORTED_CURRENCIES};
use crate::mcp::client::ClientSession;
use crate::mcp::McpError;

const PROBE_FROM: &str = "INR";
const PROBE_TO: &str = "USD";
const CURRENCY_PREVIEW_LINES: usize = 10;

pub async fn run(
    config: &Config,
    config_path: Option<&Path>,
    args: ProbeArgs,
) -> Result<(), Box<dyn Error>> {
    let session = connect(config, config_path, &args.connect).await?;

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());
    let result = run_cancellable(
        Some(&shutdown),
        || McpError::SessionClosed,
        probe(&session),
    )
    .await;

    session.close().await;
    shutdown.cancel();
    result.map_err(Into::into)
}

async fn probe(session: &ClientSession) -> Result<(), McpError> {
    let tools = session.list_tools().await?;
    println!("\nAvailable tools:");
    for tool in &tools {
        println!(
            "  - {}: {}",
            tool.name,
            tool.description.as_deref().unwrap_or_default()
        );
    }

    let rate = session
        .call_tool(GET_EXCHANGE_RATE, pair_arguments(PROBE_FROM, PROBE_TO))
        .await?;
    println!(
        "\nExchange rate {PROBE_FROM} to {PROBE_TO}: {}",
        rate.text_content()
    );

    let currencies = session
        .call_tool(LIST_SUPPORTED_CURRENCIES, Map::new())
        .await?;
    println!("\nSupported currencies (first {CURRENCY_PREVIEW_LINES}):");
    for line in preview_lines(&currencies.text_content(), CURRENCY_PREVIEW_LINES) {
        println!("{line}");
    }
    Ok(())
}

fn pair_arguments(from: &str, to: &str) -> Map<String, Value> {
    match json!({ "from_currency": from, "to_currency": to }) {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub fn preview_lines(text: &str, limit: usize) -> Vec<&str> {
    text.lines().take(limit).collect()
}
