//! Pipe binding: newline-delimited JSON over stdin/stdout.

use super::{Connection, Transport, TransportKind};
use crate::core::config::Config;
use crate::mcp::McpError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const STDIO_WRITE_TIMEOUT_SECONDS: u64 = 10;

/// Spawns an MCP server as a child process and speaks to it over its pipes.
#[derive(Debug, Clone)]
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Option<HashMap<String, String>>,
}

impl StdioTransport {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            cwd: None,
            env: None,
        }
    }

    pub fn with_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    pub fn with_env(mut self, env: Option<HashMap<String, String>>) -> Self {
        self.env = env;
        self
    }

    /// Uses `[client]` settings, falling back to this binary's own stdio server.
    pub fn from_config(config: &Config) -> Result<Self, McpError> {
        let (command, default_args) = match config.client.command.as_deref() {
            Some(command) if !command.trim().is_empty() => (command.to_string(), Vec::new()),
            _ => {
                let exe = std::env::current_exe().map_err(|err| {
                    McpError::Transport(format!("Unable to locate the cambista binary: {err}"))
                })?;
                (
                    exe.to_string_lossy().into_owned(),
                    vec![
                        "serve".to_string(),
                        "--transport".to_string(),
                        "stdio".to_string(),
                    ],
                )
            }
        };
        let args = config.client.args.clone().unwrap_or(default_args);
        Ok(Self::new(command, args)
            .with_cwd(config.client.cwd.clone())
            .with_env(config.client.env.clone()))
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn open(&self) -> Result<Connection, McpError> {
        debug!(
            command = %self.command,
            args = ?self.args,
            cwd = ?self.cwd,
            "Starting MCP stdio server"
        );
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        if let Some(env) = &self.env {
            cmd.envs(env);
        }

        let mut child = cmd.spawn().map_err(|err| {
            McpError::Transport(format!("Failed to start '{}': {err}", self.command))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("Unable to retrieve stdin.".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("Unable to retrieve stdout.".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::Transport("Unable to retrieve stderr.".to_string()))?;

        let shutdown = CancellationToken::new();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        spawn_line_reader(BufReader::new(stdout), inbound_tx, shutdown.clone());
        let _writer = spawn_line_writer(stdin, outbound_rx, shutdown.clone());
        spawn_stderr_drain(stderr, self.command.clone());

        let token = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    if let Err(err) = child.kill().await {
                        debug!(error = %err, "MCP stdio server already exited");
                    }
                }
                // The line reader still drains stdout and ends the connection at EOF.
                status = child.wait() => {
                    debug!(status = ?status, "MCP stdio server exited");
                }
            }
        });

        Ok(Connection::new(inbound_rx, outbound_tx, shutdown))
    }
}

/// Binds the current process's own stdin/stdout, for `serve --transport stdio`.
/// The returned handle finishes once every queued frame has been written.
pub fn process_connection(parent: &CancellationToken) -> (Connection, JoinHandle<()>) {
    let shutdown = parent.child_token();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    spawn_line_reader(
        BufReader::new(tokio::io::stdin()),
        inbound_tx,
        shutdown.clone(),
    );
    let writer = spawn_line_writer(tokio::io::stdout(), outbound_rx, shutdown.clone());
    (Connection::new(inbound_rx, outbound_tx, shutdown), writer)
}

/// Forwards each non-blank line as one frame. EOF or a read error ends the
/// connection.
pub(crate) fn spawn_line_reader<R>(
    reader: R,
    inbound: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
) where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if inbound.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("MCP stdio input reached EOF");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "MCP stdio read failed");
                    break;
                }
            }
        }
        shutdown.cancel();
    });
}

/// Writes each outbound frame followed by a newline, flushing per frame.
pub(crate) fn spawn_line_writer<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<String>,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let write_timeout = Duration::from_secs(STDIO_WRITE_TIMEOUT_SECONDS);
        loop {
            // Queued frames go out before shutdown is honoured.
            let frame = tokio::select! {
                biased;
                frame = outbound.recv() => frame,
                _ = shutdown.cancelled() => break,
            };
            let Some(frame) = frame else {
                break;
            };
            let write = async {
                writer.write_all(frame.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
                Ok::<(), std::io::Error>(())
            };
            match tokio::time::timeout(write_timeout, write).await {
                Ok(Ok(())) => debug!(bytes = frame.len(), "MCP stdio frame written"),
                Ok(Err(err)) => {
                    warn!(error = %err, "MCP stdio write failed");
                    shutdown.cancel();
                    break;
                }
                Err(_) => {
                    warn!("Timed out writing MCP stdio frame");
                    shutdown.cancel();
                    break;
                }
            }
        }
    })
}

fn spawn_stderr_drain(stderr: tokio::process::ChildStderr, command: String) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            debug!(command = %command, "{line}");
        }
    });
}
