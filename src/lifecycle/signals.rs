//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to [`SignalEvent`]s for the main loop
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP triggers a config reload, not shutdown
//! - Non-unix targets only see Ctrl-C

/// What the process was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// Stop gracefully; carries the signal name.
    Shutdown(&'static str),
    /// Re-read the configuration file.
    Reload,
}

/// Registered signal streams.
pub struct Signals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl Signals {
    /// Register handlers. Must be called from within a Tokio runtime.
    #[cfg(unix)]
    pub fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    #[cfg(not(unix))]
    pub fn register() -> std::io::Result<Self> {
        Ok(Self {})
    }

    /// Wait for the next signal.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> SignalEvent {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => SignalEvent::Shutdown("SIGINT"),
            _ = self.terminate.recv() => SignalEvent::Shutdown("SIGTERM"),
            _ = self.hangup.recv() => SignalEvent::Reload,
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> SignalEvent {
        let _ = tokio::signal::ctrl_c().await;
        SignalEvent::Shutdown("ctrl-c")
    }
}
