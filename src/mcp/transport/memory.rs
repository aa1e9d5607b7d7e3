//! In-process binding: two connections wired back to back.

use super::Connection;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Returns `(client_end, server_end)`. Closing either end closes both.
pub fn pair() -> (Connection, Connection) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();
    (
        Connection::new(client_rx, client_tx, shutdown.clone()),
        Connection::new(server_rx, server_tx, shutdown),
    )
}
