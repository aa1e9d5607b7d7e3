use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Where the MCP server listens and what it calls itself.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct ServerSection {
    pub name: Option<String>,
    /// Default transport for `serve` ("stdio" or "sse").
    pub transport: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct ExchangeSection {
    /// API root without the key segment, e.g. `https://v6.exchangerate-api.com/v6`.
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,
}

/// How `probe` and `chat` reach a server.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct ClientSection {
    pub transport: Option<String>,
    /// Executable for the stdio transport. Defaults to the running binary.
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub cwd: Option<PathBuf>,
    pub env: Option<HashMap<String, String>>,
    /// Event stream URL for the sse transport.
    pub url: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct AgentSection {
    pub max_steps: Option<usize>,
    pub memory: Option<bool>,
    /// "per-turn" or "cumulative".
    pub budget: Option<String>,
}

/// OpenAI-compatible chat completion endpoint used to plan tool calls.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct PlannerSection {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key_env: Option<String>,
    pub temperature: Option<f32>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub exchange: ExchangeSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub planner: PlannerSection,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
