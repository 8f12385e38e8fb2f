//! Background dispatch bridge.
//!
//! Runs a blocking call off the calling task so an async caller is never
//! stalled by backend I/O. Inside a tokio runtime the call goes to the
//! runtime's blocking pool; polled from any other executor it gets a
//! dedicated thread. The caller's current `tracing` span is re-entered on
//! the worker, so anything logged there (or any span id looked up there)
//! behaves as if the call had been made inline.
//!
//! There is no retry: the closure runs exactly once.

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{trace, Span};

use crate::error::{Result, TrackError};

/// Run `f` on a blocking worker and wait for it without blocking the
/// calling task.
///
/// Fails only if the worker panicked, could not be started, or the
/// runtime is shutting down.
pub async fn offload<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let span = Span::current();
    match Handle::try_current() {
        Ok(handle) => handle
            .spawn_blocking(move || span.in_scope(f))
            .await
            .map_err(|e| TrackError::Dispatch(e.to_string())),
        Err(_) => {
            trace!("no tokio runtime, dispatching on a dedicated thread");
            let (tx, rx) = oneshot::channel();
            std::thread::Builder::new()
                .name("llmtap-dispatch".to_string())
                .spawn(move || {
                    let _ = tx.send(span.in_scope(f));
                })
                .map_err(|e| TrackError::Dispatch(e.to_string()))?;
            rx.await
                .map_err(|_| TrackError::Dispatch("dispatch thread panicked".to_string()))
        }
    }
}
