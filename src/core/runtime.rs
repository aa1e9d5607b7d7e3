use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Runs `operation` until it finishes or `cancel_token` fires.
pub async fn run_cancellable<F, T, E>(
    cancel_token: Option<&CancellationToken>,
    interrupted: impl FnOnce() -> E,
    operation: F,
) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    if let Some(token) = cancel_token {
        tokio::select! {
            _ = token.cancelled() => Err(interrupted()),
            result = operation => result,
        }
    } else {
        operation.await
    }
}

/// Cancels `token` on the first Ctrl+C.
pub fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => {
                        info!("Interrupt received, shutting down");
                        token.cancel();
                    }
                    Err(err) => warn!(error = %err, "Unable to listen for Ctrl+C"),
                }
            }
        }
    });
}
