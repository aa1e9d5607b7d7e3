//! Event-stream server.
//!
//! `GET /sse` starts a session and streams its replies as `message` events,
//! after an initial `endpoint` event naming where the client must `POST` its
//! frames (`/messages/?session_id=<id>`).

use super::{ServerError, ServerIdentity, ServerSession};
use crate::mcp::transport::Connection;
use crate::tools::ToolRegistry;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const SSE_PATH: &str = "/sse";
pub const MESSAGES_PATH: &str = "/messages/";

type SessionSenders = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<String>>>>;

#[derive(Clone)]
pub struct SseServerState {
    registry: Arc<ToolRegistry>,
    identity: ServerIdentity,
    sessions: SessionSenders,
    shutdown: CancellationToken,
}

impl SseServerState {
    pub fn new(
        registry: Arc<ToolRegistry>,
        identity: ServerIdentity,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            identity,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

pub fn router(state: SseServerState) -> Router {
    Router::new()
        .route(SSE_PATH, get(open_stream))
        .route(MESSAGES_PATH, post(post_message))
        .route("/messages", post(post_message))
        .with_state(state)
}

/// Binds `addr` and serves until `shutdown` fires.
pub async fn serve_sse(
    registry: Arc<ToolRegistry>,
    identity: ServerIdentity,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    info!(%addr, "Binding MCP event stream server");
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    serve_listener(listener, registry, identity, shutdown).await
}

pub async fn serve_listener(
    listener: TcpListener,
    registry: Arc<ToolRegistry>,
    identity: ServerIdentity,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let addr = listener.local_addr().map_err(ServerError::Serve)?;
    info!(
        %addr,
        server = %identity.name,
        tools = registry.len(),
        "MCP event stream server ready to accept connections"
    );
    let app = router(SseServerState::new(registry, identity, shutdown.clone()));
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(ServerError::Serve)
}

async fn open_stream(
    State(state): State<SseServerState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = Uuid::new_v4().simple().to_string();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let token = state.shutdown.child_token();

    state
        .sessions
        .lock()
        .await
        .insert(session_id.clone(), inbound_tx);
    debug!(session_id = %session_id, "Opened MCP event stream");

    let session = ServerSession::new(
        state.registry.clone(),
        state.identity.clone(),
        format!("sse:{session_id}"),
    );
    let connection = Connection::new(inbound_rx, outbound_tx, token.clone());
    let sessions = state.sessions.clone();
    let id = session_id.clone();
    tokio::spawn(async move {
        session.run(connection).await;
        sessions.lock().await.remove(&id);
        debug!(session_id = %id, "Removed MCP session");
    });

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{MESSAGES_PATH}?session_id={session_id}"));
    // The session lives exactly as long as the client keeps the stream open.
    let guard = token.clone().drop_guard();
    let messages = stream::unfold(
        (outbound_rx, guard, token),
        |(mut outbound_rx, guard, token)| async move {
            let frame = tokio::select! {
                biased;
                frame = outbound_rx.recv() => frame,
                _ = token.cancelled() => None,
            };
            frame.map(|frame| {
                (
                    Ok(Event::default().event("message").data(frame)),
                    (outbound_rx, guard, token),
                )
            })
        },
    );

    Sse::new(stream::once(async move { Ok(endpoint) }).chain(messages))
        .keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    session_id: Option<String>,
}

async fn post_message(
    State(state): State<SseServerState>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> impl IntoResponse {
    let Some(session_id) = query.session_id.filter(|id| !id.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "session_id is required");
    };
    let sender = state.sessions.lock().await.get(&session_id).cloned();
    match sender {
        Some(sender) if sender.send(body).is_ok() => (StatusCode::ACCEPTED, "Accepted"),
        _ => {
            warn!(session_id = %session_id, "Message for unknown MCP session");
            (StatusCode::NOT_FOUND, "Could not find session")
        }
    }
}
