//! Configuration file watcher for hot reload.
//!
//! Each modify/create event on the file reloads and validates it; valid
//! configs go out on the channel, invalid ones are logged and dropped so the
//! owner keeps running on the previous config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GuardConfig;

/// Watches one configuration file.
pub struct ConfigWatcher {
    path: PathBuf,
    updates: mpsc::UnboundedSender<GuardConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end for reloaded configs.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GuardConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            updates,
        };
        (watcher, rx)
    }

    /// Start watching. Events stop when the returned handle is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();
        let updates = self.updates;

        let mut handle = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    reload_on(&path, &event, &updates);
                }
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        handle.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(handle)
    }
}

/// Reload `path` if `event` changed it. Returns whether a config was sent.
fn reload_on(path: &Path, event: &Event, updates: &mpsc::UnboundedSender<GuardConfig>) -> bool {
    if !(event.kind.is_modify() || event.kind.is_create()) {
        return false;
    }

    match load_config(path) {
        Ok(config) => {
            tracing::info!(path = ?path, upstream = %config.upstream.name, "Config file changed, reloaded");
            updates.send(config).is_ok()
        }
        Err(e) => {
            tracing::error!(path = ?path, error = %e, "Config reload rejected, keeping current configuration");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, EventKind, ModifyKind};

    fn modified(path: &Path) -> Event {
        Event::new(EventKind::Modify(ModifyKind::Any)).add_path(path.to_path_buf())
    }

    #[test]
    fn test_valid_change_is_sent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guard.toml");
        std::fs::write(&path, "[upstream]\nname = \"orders\"\n").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(reload_on(&path, &modified(&path), &tx));
        assert_eq!(rx.try_recv().unwrap().upstream.name, "orders");
    }

    #[test]
    fn test_invalid_change_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guard.toml");
        std::fs::write(&path, "[retry]\nmax_attempts = 0\n").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(!reload_on(&path, &modified(&path), &tx));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_run_delivers_reload_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guard.toml");
        std::fs::write(&path, "[upstream]\nname = \"before\"\n").unwrap();

        let (watcher, mut rx) = ConfigWatcher::new(&path);
        let _handle = watcher.run().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(&path, "[upstream]\nname = \"after\"\n").unwrap();

        // A write can surface as several events, some seeing a truncated file.
        let reloaded = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(config) = rx.recv().await {
                if config.upstream.name == "after" {
                    return Some(config);
                }
            }
            None
        })
        .await
        .unwrap();
        assert_eq!(reloaded.unwrap().upstream.name, "after");
    }

    #[test]
    fn test_access_events_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guard.toml");
        std::fs::write(&path, "").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let event = Event::new(EventKind::Access(AccessKind::Any)).add_path(path.clone());
        assert!(!reload_on(&path, &event, &tx));
        assert!(rx.try_recv().is_err());
    }
}
