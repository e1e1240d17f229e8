// src/engine/services.rs

//! Long-lived services started by `serve` and `watch` tasks.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use tracing::{debug, info};

use crate::config::ServerSection;
use crate::server::{self, DevServerHandle, ReloadHub};
use crate::watch::WatcherHandle;

/// Registry of what is still running after a task completes.
///
/// Each service is started at most once per process, however many tasks
/// ask for it.
#[derive(Debug, Default)]
pub struct Services {
    server: tokio::sync::Mutex<Option<DevServerHandle>>,
    watches: Mutex<WatchRegistry>,
}

#[derive(Debug, Default)]
struct WatchRegistry {
    started: BTreeSet<String>,
    handles: Vec<WatcherHandle>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    fn watches(&self) -> MutexGuard<'_, WatchRegistry> {
        self.watches.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the dev server unless it is already running.
    ///
    /// Returns `true` if this call started it.
    pub async fn start_server(
        &self,
        project_root: &Path,
        cfg: &ServerSection,
        hub: ReloadHub,
    ) -> Result<bool> {
        let mut slot = self.server.lock().await;
        if slot.is_some() {
            debug!("dev server already running");
            return Ok(false);
        }
        *slot = Some(server::serve(project_root, cfg, hub).await?);
        Ok(true)
    }

    /// Names from `names` that have not been started yet; they are marked
    /// started.
    pub fn claim_watches(&self, names: &[String]) -> Vec<String> {
        let mut registry = self.watches();
        names
            .iter()
            .filter(|n| registry.started.insert((*n).clone()))
            .cloned()
            .collect()
    }

    /// Give up on watches that failed to start, so a later task may retry.
    pub fn release_watches(&self, names: &[String]) {
        let mut registry = self.watches();
        for name in names {
            registry.started.remove(name);
        }
    }

    pub fn add_watcher(&self, handle: WatcherHandle) {
        self.watches().handles.push(handle);
    }

    pub fn running_watches(&self) -> Vec<String> {
        self.watches().started.iter().cloned().collect()
    }

    pub async fn server_running(&self) -> bool {
        self.server.lock().await.is_some()
    }

    pub async fn is_active(&self) -> bool {
        self.server_running().await || !self.watches().handles.is_empty()
    }

    /// Stop watches first (so no new runs start), then the dev server.
    pub async fn shutdown(&self) {
        let handles = {
            let mut registry = self.watches();
            registry.started.clear();
            std::mem::take(&mut registry.handles)
        };
        for handle in handles {
            handle.stop();
        }

        let server = self.server.lock().await.take();
        if let Some(server) = server {
            server.shutdown().await;
        }
        info!("services stopped");
    }
}
