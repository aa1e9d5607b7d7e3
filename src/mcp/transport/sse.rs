//! Event-stream binding (client side).
//!
//! `GET <url>` opens a `text/event-stream`. The server's first `endpoint`
//! event names the path that accepts client frames via `POST`; every
//! `message` event afterwards carries one server frame.

use super::{Connection, Transport, TransportKind};
use crate::mcp::McpError;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const SSE_CONNECT_TIMEOUT_SECONDS: u64 = 10;
const SSE_POOL_IDLE_TIMEOUT_SECONDS: u64 = 90;
const MCP_JSON_CONTENT_TYPE: &str = "application/json";
const MCP_EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

pub struct SseTransport {
    url: Url,
    http: reqwest::Client,
    request_timeout: Duration,
}

impl SseTransport {
    pub fn new(url: &str, request_timeout: Duration) -> Result<Self, McpError> {
        let url = Url::parse(url).map_err(|err| {
            McpError::Transport(format!("Invalid event stream URL '{url}': {err}"))
        })?;
        // No overall timeout here: the event stream stays open for the whole session.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(SSE_CONNECT_TIMEOUT_SECONDS))
            .pool_idle_timeout(Duration::from_secs(SSE_POOL_IDLE_TIMEOUT_SECONDS))
            .build()
            .map_err(|err| McpError::Transport(format!("Failed to build HTTP client: {err}")))?;
        Ok(Self {
            url,
            http,
            request_timeout,
        })
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn open(&self) -> Result<Connection, McpError> {
        debug!(url = %self.url, "Opening MCP event stream");
        let response = self
            .http
            .get(self.url.clone())
            .header(ACCEPT, MCP_EVENT_STREAM_CONTENT_TYPE)
            .send()
            .await
            .map_err(|err| McpError::Transport(format!("Unable to reach {}: {err}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Transport(format!(
                "Event stream request failed with HTTP {status}"
            )));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if !is_event_stream_content_type(content_type) {
            return Err(McpError::Transport(format!(
                "Expected an event stream, got content type '{content_type}'"
            )));
        }

        let mut stream = response.bytes_stream();
        let mut parser = SseEventParser::default();
        let mut backlog = Vec::new();

        let wait_for_endpoint = async {
            loop {
                match stream.next().await {
                    Some(Ok(chunk)) => {
                        let mut events = parser.push(&chunk).into_iter();
                        while let Some(event) = events.next() {
                            if event.event == "endpoint" {
                                backlog.extend(events);
                                return Ok(event.data);
                            }
                            debug!(event = %event.event, "Ignoring event before endpoint");
                        }
                    }
                    Some(Err(err)) => {
                        return Err(McpError::Transport(format!(
                            "Event stream failed before the endpoint event: {err}"
                        )))
                    }
                    None => {
                        return Err(McpError::Transport(
                            "Event stream ended before the endpoint event.".to_string(),
                        ))
                    }
                }
            }
        };
        let endpoint = tokio::time::timeout(self.request_timeout, wait_for_endpoint)
            .await
            .map_err(|_| {
                McpError::Transport("Timed out waiting for the endpoint event.".to_string())
            })??;
        let endpoint = self.url.join(endpoint.trim()).map_err(|err| {
            McpError::Transport(format!("Invalid endpoint '{endpoint}': {err}"))
        })?;
        debug!(endpoint = %endpoint, "MCP event stream ready");

        let shutdown = CancellationToken::new();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

        let token = shutdown.clone();
        tokio::spawn(async move {
            for event in backlog {
                if event.is_message() && inbound_tx.send(event.data).is_err() {
                    return;
                }
            }
            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => break,
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(chunk)) => {
                        for event in parser.push(&chunk) {
                            if !event.is_message() {
                                debug!(event = %event.event, "Ignoring MCP stream event");
                                continue;
                            }
                            if inbound_tx.send(event.data).is_err() {
                                return;
                            }
                        }
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "MCP event stream failed");
                        break;
                    }
                    None => {
                        debug!("MCP event stream ended");
                        break;
                    }
                }
            }
            token.cancel();
        });

        let token = shutdown.clone();
        let http = self.http.clone();
        let request_timeout = self.request_timeout;
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = token.cancelled() => break,
                    frame = outbound_rx.recv() => frame,
                };
                let Some(frame) = frame else {
                    break;
                };
                let result = http
                    .post(endpoint.clone())
                    .header(CONTENT_TYPE, MCP_JSON_CONTENT_TYPE)
                    .timeout(request_timeout)
                    .body(frame)
                    .send()
                    .await;
                match result {
                    Ok(response) if response.status().is_success() => {}
                    Ok(response) => {
                        warn!(status = %response.status(), "MCP message POST rejected");
                        token.cancel();
                        break;
                    }
                    Err(err) => {
                        warn!(error = %err, "MCP message POST failed");
                        token.cancel();
                        break;
                    }
                }
            }
        });

        Ok(Connection::new(inbound_rx, outbound_tx, shutdown))
    }
}

pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case(MCP_EVENT_STREAM_CONTENT_TYPE))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

impl SseEvent {
    fn is_message(&self) -> bool {
        self.event == "message"
    }
}

/// Splits a byte stream into lines, keeping the blank lines that end events.
#[derive(Default)]
struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut search_index = 0;

        while let Some(relative_pos) = self.buffer[search_index..].iter().position(|b| *b == b'\n')
        {
            let newline_index = search_index + relative_pos;
            let mut line_end = newline_index;
            if line_end > search_index && self.buffer[line_end - 1] == b'\r' {
                line_end -= 1;
            }
            lines.push(String::from_utf8_lossy(&self.buffer[search_index..line_end]).into_owned());
            search_index = newline_index + 1;
        }

        if search_index > 0 {
            self.buffer.drain(..search_index);
        }
        lines
    }
}

/// Incremental `text/event-stream` parser. Only `event` and `data` fields
/// are kept; comments and other fields are dropped.
#[derive(Default)]
pub struct SseEventParser {
    lines: SseLineBuffer,
    event: Option<String>,
    data: Vec<String>,
}

impl SseEventParser {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for line in self.lines.push(chunk) {
            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line.as_str(), ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}
