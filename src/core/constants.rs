//! Shared constants used across the application

/// Name reported to MCP peers when no `[server].name` is configured.
pub const DEFAULT_SERVER_NAME: &str = "currency-exchange";
pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";
pub const DEFAULT_SERVER_PORT: u16 = 8004;

pub const DEFAULT_EXCHANGE_BASE_URL: &str = "https://v6.exchangerate-api.com/v6";
pub const DEFAULT_EXCHANGE_USER_AGENT: &str = "currency-exchange-app/1.0";
pub const DEFAULT_EXCHANGE_TIMEOUT_SECS: u64 = 30;
pub const EXCHANGE_API_KEY_ENV: &str = "EXCHANGE_RATE_API_KEY";

/// Value shipped in sample `.env` files; treated the same as an unset key.
pub const PLACEHOLDER_API_KEY: &str = "your_api_key_here";

pub const DEFAULT_CLIENT_URL: &str = "http://localhost:8004/sse";
pub const DEFAULT_CLIENT_REQUEST_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_AGENT_MAX_STEPS: usize = 15;

pub const DEFAULT_PLANNER_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_PLANNER_MODEL: &str = "qwen-qwq-32b";
pub const DEFAULT_PLANNER_API_KEY_ENV: &str = "GROQ_API_KEY";
pub const DEFAULT_PLANNER_TIMEOUT_SECS: u64 = 120;
