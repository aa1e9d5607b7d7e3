//! Client for the ExchangeRate-API v6 service and the tools built on it.
//!
//! [`ExchangeRateClient`] returns structured [`ExchangeError`]s; the tool
//! handlers in [`tools`] turn those into the fixed user-facing strings.

use crate::core::config::{read_secret, Config, ConfigError};
use crate::utils::url::append_path_segments;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error};

pub mod tools;

pub use tools::{register_tools, GET_EXCHANGE_RATE, LIST_SUPPORTED_CURRENCIES};

#[cfg(test)]
mod tests;

/// Everything needed to reach the rate service, resolved once at startup.
#[derive(Clone)]
pub struct ExchangeSettings {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl ExchangeSettings {
    /// Fails with [`ConfigError::MissingEnv`] when the API key is unset.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let api_key = read_secret(config.exchange_api_key_env())?;
        Ok(Self::with_api_key(config, api_key))
    }

    pub fn with_api_key(config: &Config, api_key: String) -> Self {
        Self {
            base_url: config.exchange_base_url().to_string(),
            api_key,
            timeout: config.exchange_timeout(),
            user_agent: config.exchange_user_agent().to_string(),
        }
    }
}

impl fmt::Debug for ExchangeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

#[derive(Debug)]
pub enum ExchangeError {
    /// Connection failure or timeout.
    Network(reqwest::Error),
    /// Non-success HTTP status without a readable API error body.
    Status(reqwest::StatusCode),
    /// Body was not the JSON document the API promises.
    Decode(String),
    /// The API answered with `"result": "error"`.
    Api { error_type: String },
    MissingField(&'static str),
    /// The request URL could not be built from the base URL and path.
    InvalidUrl(String),
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeError::Network(err) => write!(f, "HTTP error: {err}"),
            ExchangeError::Status(status) => write!(f, "unexpected HTTP status {status}"),
            ExchangeError::Decode(message) => write!(f, "malformed response: {message}"),
            ExchangeError::Api { error_type } => write!(f, "API error: {error_type}"),
            ExchangeError::MissingField(field) => write!(f, "response is missing '{field}'"),
            ExchangeError::InvalidUrl(message) => write!(f, "invalid request URL: {message}"),
        }
    }
}

impl std::error::Error for ExchangeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExchangeError::Network(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PairResponse {
    result: Option<String>,
    #[serde(rename = "error-type")]
    error_type: Option<String>,
    conversion_rate: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CodesResponse {
    result: Option<String>,
    #[serde(rename = "error-type")]
    error_type: Option<String>,
    supported_codes: Option<Vec<(String, String)>>,
}

fn check_result(result: Option<&str>, error_type: Option<&str>) -> Result<(), ExchangeError> {
    if result == Some("success") {
        return Ok(());
    }
    Err(ExchangeError::Api {
        error_type: error_type.unwrap_or("unknown").to_string(),
    })
}

pub struct ExchangeRateClient {
    http: reqwest::Client,
    settings: ExchangeSettings,
}

impl ExchangeRateClient {
    pub fn new(settings: ExchangeSettings) -> Result<Self, ExchangeError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|err| ExchangeError::Network(err.without_url()))?;
        Ok(Self { http, settings })
    }

    /// `GET pair/{FROM}/{TO}`. Codes are sent as given, each as one path segment.
    pub async fn pair_rate(&self, from: &str, to: &str) -> Result<f64, ExchangeError> {
        let body = self.get_json(&["pair", from, to]).await?;
        let response: PairResponse = decode(body)?;
        check_result(response.result.as_deref(), response.error_type.as_deref())
            .inspect_err(|err| error!(error = %err, "Exchange rate API error"))?;
        response
            .conversion_rate
            .ok_or(ExchangeError::MissingField("conversion_rate"))
    }

    /// `GET codes`, as `(code, name)` pairs in API order.
    pub async fn supported_codes(&self) -> Result<Vec<(String, String)>, ExchangeError> {
        let body = self.get_json(&["codes"]).await?;
        let response: CodesResponse = decode(body)?;
        check_result(response.result.as_deref(), response.error_type.as_deref())
            .inspect_err(|err| error!(error = %err, "Exchange rate API error"))?;
        Ok(response.supported_codes.unwrap_or_default())
    }

    async fn get_json(&self, path: &[&str]) -> Result<Value, ExchangeError> {
        let mut segments = vec![self.settings.api_key.as_str()];
        segments.extend_from_slice(path);
        let url = append_path_segments(&self.settings.base_url, &segments).map_err(|message| {
            error!(endpoint = %path.join("/"), error = %message, "Invalid exchange rate API URL");
            ExchangeError::InvalidUrl(message)
        })?;
        debug!(endpoint = %path.join("/"), "Requesting exchange rate API");

        let response = self
            .http
            .get(url)
            .header(USER_AGENT, &self.settings.user_agent)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| {
                // The URL carries the API key.
                let err = err.without_url();
                error!(error = %err, "HTTP error calling exchange rate API");
                ExchangeError::Network(err)
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|err| {
            let err = err.without_url();
            error!(error = %err, "Failed to read exchange rate API response");
            ExchangeError::Network(err)
        })?;

        if !status.is_success() {
            // The API reports bad keys and quota problems as 4xx with a JSON body.
            if let Ok(body) = serde_json::from_str::<Value>(&text) {
                if let Some(error_type) = body.get("error-type").and_then(Value::as_str) {
                    error!(status = %status, error_type = %error_type, "Exchange rate API error");
                    return Err(ExchangeError::Api {
                        error_type: error_type.to_string(),
                    });
                }
            }
            error!(status = %status, "Exchange rate API returned an error status");
            return Err(ExchangeError::Status(status));
        }

        serde_json::from_str(&text).map_err(|err| {
            error!(error = %err, "Exchange rate API returned malformed JSON");
            ExchangeError::Decode(err.to_string())
        })
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, ExchangeError> {
    serde_json::from_value(body).map_err(|err| {
        error!(error = %err, "Unexpected exchange rate API response shape");
        ExchangeError::Decode(err.to_string())
    })
}
