use super::{ExchangeError, ExchangeRateClient};
use crate::tools::{
    string_argument, ContentItem, ParameterKind, ParameterSpec, RegistryError, ToolDescriptor,
    ToolExecutionError, ToolHandler, ToolRegistry,
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

pub const GET_EXCHANGE_RATE: &str = "get_exchange_rate";
pub const LIST_SUPPORTED_CURRENCIES: &str = "list_supported_currencies";

const RATE_UNAVAILABLE: &str = "Exchange rate not available.";
const RATE_FETCH_FAILED: &str =
    "Unable to fetch exchange rate. Please check if your API key is valid.";
const NO_CURRENCIES: &str = "No currency data available.";
const CODES_FETCH_FAILED: &str =
    "Unable to fetch list of supported currencies. Please check if your API key is valid.";

/// Adds both currency tools to `registry`, sharing one HTTP client.
pub fn register_tools(
    registry: &mut ToolRegistry,
    client: Arc<ExchangeRateClient>,
) -> Result<(), RegistryError> {
    registry.register(
        ToolDescriptor::new(
            GET_EXCHANGE_RATE,
            "Get the current exchange rate between two currencies.",
        )
        .with_parameter(ParameterSpec::required(
            "from_currency",
            ParameterKind::String,
            "The currency code to convert from (e.g., 'USD')",
        ))
        .with_parameter(ParameterSpec::required(
            "to_currency",
            ParameterKind::String,
            "The currency code to convert to (e.g., 'EUR')",
        )),
        ExchangeRateTool {
            client: client.clone(),
        },
    )?;
    registry.register(
        ToolDescriptor::new(LIST_SUPPORTED_CURRENCIES, "List all supported currencies."),
        SupportedCurrenciesTool { client },
    )
}

struct ExchangeRateTool {
    client: Arc<ExchangeRateClient>,
}

#[async_trait]
impl ToolHandler for ExchangeRateTool {
    async fn call(
        &self,
        arguments: &Map<String, Value>,
    ) -> Result<Vec<ContentItem>, ToolExecutionError> {
        let from = string_argument(arguments, "from_currency")?.to_uppercase();
        let to = string_argument(arguments, "to_currency")?.to_uppercase();
        let text = match self.client.pair_rate(&from, &to).await {
            Ok(rate) => format!("💱 1 {from} = {rate:.4} {to}"),
            Err(err) => rate_failure_text(&err),
        };
        Ok(vec![ContentItem::Text(text)])
    }
}

fn rate_failure_text(err: &ExchangeError) -> String {
    match err {
        ExchangeError::Api { error_type } => format!("Error: {error_type}"),
        ExchangeError::MissingField(_) => RATE_UNAVAILABLE.to_string(),
        _ => RATE_FETCH_FAILED.to_string(),
    }
}

struct SupportedCurrenciesTool {
    client: Arc<ExchangeRateClient>,
}

#[async_trait]
impl ToolHandler for SupportedCurrenciesTool {
    async fn call(
        &self,
        _arguments: &Map<String, Value>,
    ) -> Result<Vec<ContentItem>, ToolExecutionError> {
        let text = match self.client.supported_codes().await {
            Ok(codes) if codes.is_empty() => NO_CURRENCIES.to_string(),
            Ok(codes) => format_currency_list(codes),
            Err(ExchangeError::Api { error_type }) => format!("Error: {error_type}"),
            Err(_) => CODES_FETCH_FAILED.to_string(),
        };
        Ok(vec![ContentItem::Text(text)])
    }
}

pub(crate) fn format_currency_list(codes: Vec<(String, String)>) -> String {
    let mut lines: Vec<String> = codes
        .into_iter()
        .map(|(code, name)| format!("{code} - {name}"))
        .collect();
    lines.sort();
    lines.join("\n")
}
