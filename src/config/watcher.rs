//! Configuration file watcher for hot reload.
//!
//! The parent directory is watched rather than the file itself so editors
//! that save by rename are still picked up. Reloads whose file content is
//! byte-identical to the last accepted one are dropped, which also absorbs
//! the bursts of modify events a single save produces.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{parse_config, ConfigError};
use crate::config::schema::MonitorConfig;

/// Result of one reload attempt.
#[derive(Debug)]
pub enum ReloadOutcome {
    /// A new configuration was sent to the receiver.
    Applied,
    /// File content has not changed since the last accepted load.
    Unchanged,
    /// The file could not be read, parsed or validated.
    Rejected(ConfigError),
    /// Nobody is listening for updates any more.
    Closed,
}

/// Handle that re-reads the config file on demand (file events, SIGHUP).
#[derive(Debug, Clone)]
pub struct ConfigReloader {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<MonitorConfig>,
    last_content: Arc<Mutex<Option<String>>>,
}

impl ConfigReloader {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file and forward it if it is valid and changed.
    pub fn reload(&self) -> ReloadOutcome {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => return ReloadOutcome::Rejected(e.into()),
        };

        let mut last = self.last_content.lock().unwrap_or_else(PoisonError::into_inner);
        if last.as_deref() == Some(content.as_str()) {
            return ReloadOutcome::Unchanged;
        }

        let config = match parse_config(&content) {
            Ok(config) => config,
            Err(e) => return ReloadOutcome::Rejected(e),
        };
        if self.update_tx.send(config).is_err() {
            return ReloadOutcome::Closed;
        }
        *last = Some(content);
        ReloadOutcome::Applied
    }

    /// [`reload`](Self::reload), logging the outcome.
    pub fn reload_logged(&self) {
        match self.reload() {
            ReloadOutcome::Applied => tracing::info!(path = ?self.path, "Configuration reloaded"),
            ReloadOutcome::Unchanged => tracing::debug!(path = ?self.path, "Config content unchanged"),
            ReloadOutcome::Rejected(e) => {
                tracing::error!(error = %e, "Failed to reload config, keeping current configuration")
            }
            ReloadOutcome::Closed => tracing::debug!("Config receiver dropped, ignoring reload"),
        }
    }
}

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    reloader: ConfigReloader,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// The current file content is taken as already applied. Returns the
    /// watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<MonitorConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let reloader = ConfigReloader {
            path: path.to_path_buf(),
            update_tx,
            last_content: Arc::new(Mutex::new(fs::read_to_string(path).ok())),
        };
        (Self { reloader }, update_rx)
    }

    /// A handle for triggering reloads by hand.
    pub fn reloader(&self) -> ConfigReloader {
        self.reloader.clone()
    }

    /// Start watching in a background thread.
    ///
    /// The returned watcher must be kept alive for as long as updates are wanted.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let reloader = self.reloader.clone();
        let file_name = reloader.path.file_name().map(|name| name.to_os_string());

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if ours && (event.kind.is_modify() || event.kind.is_create()) {
                        tracing::debug!(path = ?reloader.path, kind = ?event.kind, "Config file event");
                        reloader.reload_logged();
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let dir = match self.reloader.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.reloader.path, "Config watcher started");
        Ok(watcher)
    }
}
