//! Hot configuration reload.
//!
//! Watches the config file's parent directory (so atomic temp-file + rename
//! writes are seen), debounces the notification burst an editor or rename
//! produces, and rebuilds the catalog. A failed load keeps the previous
//! catalog in force — no job state is lost.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};

use crate::catalog::{build_catalog, CatalogHandle};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::supervisor::wait_for_shutdown;
use crate::timezone::ZoneResolver;

/// Window over which change notifications are coalesced into one reload.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(800);

pub struct ConfigWatcher {
    path: PathBuf,
    catalog: CatalogHandle,
    resolver: ZoneResolver,
}

impl ConfigWatcher {
    pub fn new(path: PathBuf, catalog: CatalogHandle, resolver: ZoneResolver) -> Self {
        Self {
            path,
            catalog,
            resolver,
        }
    }

    /// Watch until shutdown. Returns an error only when the watch itself
    /// cannot be established.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<()>(16);
        let _watcher = create_file_watcher(&self.path, tx)?;
        tracing::info!(path = %self.path.display(), "watching configuration for changes");

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                changed = rx.recv() => {
                    if changed.is_none() {
                        tracing::warn!("config watch channel closed");
                        break;
                    }
                    tokio::time::sleep(DEBOUNCE_WINDOW).await;
                    while rx.try_recv().is_ok() {}
                    self.reload();
                }
            }
        }
        Ok(())
    }

    fn reload(&self) {
        match AppConfig::load(&self.path) {
            Ok(config) => {
                let generation = self.catalog.current().generation + 1;
                let (catalog, report) = build_catalog(&config, &self.resolver, generation);
                self.catalog.swap(catalog);
                tracing::info!(generation, "configuration reloaded");
                report.log();
            }
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "config reload failed, keeping previous catalog"
                );
            }
        }
    }
}

fn create_file_watcher(path: &Path, tx: mpsc::Sender<()>) -> Result<RecommendedWatcher> {
    let file_name = path.file_name().map(|name| name.to_owned());
    let mut watcher = notify::recommended_watcher(
        move |res: std::result::Result<notify::Event, notify::Error>| {
            if let Ok(event) = res {
                let relevant = event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == file_name.as_deref());
                if relevant {
                    let _ = tx.blocking_send(());
                }
            }
        },
    )
    .map_err(|e| Error::Watch(e.to_string()))?;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| Error::Watch(e.to_string()))?;
    Ok(watcher)
}
