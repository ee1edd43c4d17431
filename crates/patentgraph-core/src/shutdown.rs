//! Cooperative cancellation
//!
//! Signal handlers only flip a shared flag. The orchestrator checks it at
//! the top of every fetch cycle, so in-flight calls finish and their
//! results are persisted before the run stops.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shared, monotonic stop flag
///
/// Clones observe the same flag. Once requested, a stop is never cleared.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing token, e.g. a child of an application-wide one
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Ask the run to stop at its next checkpoint
    pub fn request_stop(&self) {
        if !self.token.is_cancelled() {
            self.token.cancel();
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once a stop has been requested
    pub async fn stopped(&self) {
        self.token.cancelled().await
    }
}

/// Route SIGINT and SIGTERM to `signal`
///
/// The spawned task lives for the rest of the process; repeated signals are
/// logged and otherwise ignored.
pub fn install_signal_handlers(signal: ShutdownSignal) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let name = wait_for_signal().await;
            if signal.is_stop_requested() {
                warn!(signal = name, "Stop already requested, finishing current batch");
            } else {
                info!(
                    signal = name,
                    "Interrupt received, stopping after the current batch"
                );
                signal.request_stop();
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = term.recv() => "SIGTERM",
            }
        }
        Err(e) => {
            warn!(error = %e, "Could not install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}
