// src/server/mod.rs

//! Development server: static files from the output directory plus a
//! Server-Sent Events channel that tells browsers to reload.
//!
//! - [`reload`] owns the broadcast hub stages publish into.
//! - [`routes`] is the axum router.

pub mod reload;
pub mod routes;

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ServerSection;

pub use reload::{ReloadHub, ReloadMessage, ReloadScope};
pub use routes::{create_router, ServerState};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A running dev server.
#[derive(Debug)]
pub struct DevServerHandle {
    addr: SocketAddr,
    https: bool,
    hub: ReloadHub,
    close_clients: bool,
    handle: Handle,
    task: JoinHandle<std::io::Result<()>>,
}

impl DevServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        format!("{scheme}://{}", self.addr)
    }

    pub fn hub(&self) -> &ReloadHub {
        &self.hub
    }

    /// Close client channels (asking browsers to close when configured)
    /// and stop the listener.
    pub async fn shutdown(self) {
        if self.close_clients {
            self.hub.close_clients();
        }
        self.handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        match self.task.await {
            Ok(Ok(())) => info!(addr = %self.addr, "dev server stopped"),
            Ok(Err(err)) => warn!(error = %err, "dev server exited with an error"),
            Err(err) => warn!(error = %err, "dev server task failed"),
        }
    }
}

/// Start serving `[server].root` (resolved against `project_root`).
///
/// Returns once the listener is bound. Port 0 picks a free port.
pub async fn serve(project_root: &Path, cfg: &ServerSection, hub: ReloadHub) -> Result<DevServerHandle> {
    let addr = tokio::net::lookup_host((cfg.host.as_str(), cfg.port))
        .await
        .with_context(|| format!("resolving {}:{}", cfg.host, cfg.port))?
        .next()
        .ok_or_else(|| anyhow!("no address for {}:{}", cfg.host, cfg.port))?;

    let state = ServerState {
        root: project_root.join(&cfg.root),
        index: cfg.index.clone(),
        hub: hub.clone(),
    };
    let app = create_router(state).into_make_service();
    let handle = Handle::new();

    let task = match (cfg.https, cfg.cert.as_deref(), cfg.key.as_deref()) {
        (true, Some(cert), Some(key)) => {
            let tls = RustlsConfig::from_pem_file(project_root.join(cert), project_root.join(key))
                .await
                .with_context(|| format!("loading TLS certificate {cert} / key {key}"))?;
            let server = axum_server::bind_rustls(addr, tls).handle(handle.clone());
            tokio::spawn(async move { server.serve(app).await })
        }
        (true, _, _) => return Err(anyhow!("https requires both cert and key")),
        (false, _, _) => {
            let server = axum_server::bind(addr).handle(handle.clone());
            tokio::spawn(async move { server.serve(app).await })
        }
    };

    let Some(bound) = handle.listening().await else {
        return match task.await {
            Ok(Err(err)) => Err(anyhow!(err).context(format!("binding dev server on {addr}"))),
            _ => Err(anyhow!("dev server failed to start on {addr}")),
        };
    };

    let server = DevServerHandle {
        addr: bound,
        https: cfg.https,
        hub,
        close_clients: cfg.close_clients_on_exit,
        handle,
        task,
    };
    info!(url = %server.url(), root = %cfg.root, "dev server listening");
    Ok(server)
}
