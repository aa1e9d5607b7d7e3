use crate::core::config::data::Config;
use crate::core::constants::{
    DEFAULT_AGENT_MAX_STEPS, DEFAULT_CLIENT_REQUEST_TIMEOUT_SECS, DEFAULT_CLIENT_URL,
    DEFAULT_EXCHANGE_BASE_URL, DEFAULT_EXCHANGE_TIMEOUT_SECS, DEFAULT_EXCHANGE_USER_AGENT,
    DEFAULT_PLANNER_API_KEY_ENV, DEFAULT_PLANNER_BASE_URL, DEFAULT_PLANNER_MODEL,
    DEFAULT_PLANNER_TIMEOUT_SECS, DEFAULT_SERVER_HOST, DEFAULT_SERVER_NAME, DEFAULT_SERVER_PORT,
    EXCHANGE_API_KEY_ENV,
};
use std::time::Duration;

fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl Config {
    pub fn server_name(&self) -> &str {
        non_blank(self.server.name.as_ref()).unwrap_or(DEFAULT_SERVER_NAME)
    }

    pub fn server_host(&self) -> &str {
        non_blank(self.server.host.as_ref()).unwrap_or(DEFAULT_SERVER_HOST)
    }

    pub fn server_port(&self) -> u16 {
        self.server.port.unwrap_or(DEFAULT_SERVER_PORT)
    }

    pub fn server_transport(&self) -> &str {
        non_blank(self.server.transport.as_ref()).unwrap_or("stdio")
    }

    pub fn exchange_base_url(&self) -> &str {
        non_blank(self.exchange.base_url.as_ref())
            .unwrap_or(DEFAULT_EXCHANGE_BASE_URL)
            .trim_end_matches('/')
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(
            self.exchange
                .timeout_secs
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_EXCHANGE_TIMEOUT_SECS),
        )
    }

    pub fn exchange_user_agent(&self) -> &str {
        non_blank(self.exchange.user_agent.as_ref()).unwrap_or(DEFAULT_EXCHANGE_USER_AGENT)
    }

    pub fn exchange_api_key_env(&self) -> &str {
        non_blank(self.exchange.api_key_env.as_ref()).unwrap_or(EXCHANGE_API_KEY_ENV)
    }

    pub fn client_transport(&self) -> &str {
        non_blank(self.client.transport.as_ref()).unwrap_or("stdio")
    }

    pub fn client_url(&self) -> &str {
        non_blank(self.client.url.as_ref()).unwrap_or(DEFAULT_CLIENT_URL)
    }

    pub fn client_request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.client
                .request_timeout_secs
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_CLIENT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn agent_max_steps(&self) -> usize {
        self.agent.max_steps.unwrap_or(DEFAULT_AGENT_MAX_STEPS)
    }

    pub fn agent_memory_enabled(&self) -> bool {
        self.agent.memory.unwrap_or(true)
    }

    pub fn agent_budget(&self) -> &str {
        non_blank(self.agent.budget.as_ref()).unwrap_or("per-turn")
    }

    pub fn planner_base_url(&self) -> &str {
        non_blank(self.planner.base_url.as_ref())
            .unwrap_or(DEFAULT_PLANNER_BASE_URL)
            .trim_end_matches('/')
    }

    pub fn planner_model(&self) -> &str {
        non_blank(self.planner.model.as_ref()).unwrap_or(DEFAULT_PLANNER_MODEL)
    }

    pub fn planner_api_key_env(&self) -> &str {
        non_blank(self.planner.api_key_env.as_ref()).unwrap_or(DEFAULT_PLANNER_API_KEY_ENV)
    }

    pub fn planner_timeout(&self) -> Duration {
        Duration::from_secs(
            self.planner
                .timeout_secs
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_PLANNER_TIMEOUT_SECS),
        )
    }
}
