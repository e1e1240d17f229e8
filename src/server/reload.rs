// src/server/reload.rs

//! Reload notifications pushed to connected dev-server clients.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// Wire message, sent as the JSON `data` of a Server-Sent Event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReloadMessage {
    /// Reload the whole page.
    Reload,
    /// Swap matching stylesheets in place.
    Css { paths: Vec<String> },
    /// The server is going away; close the tab where the browser allows it.
    Close,
}

/// What a stage wants clients to refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadScope {
    Full,
    Styles(Vec<String>),
}

impl From<ReloadScope> for ReloadMessage {
    fn from(scope: ReloadScope) -> Self {
        match scope {
            ReloadScope::Full => ReloadMessage::Reload,
            ReloadScope::Styles(paths) => ReloadMessage::Css { paths },
        }
    }
}

/// Fan-out point between stages and connected clients.
///
/// Cheap to clone; every clone publishes into the same channel. Sending
/// with no connected client is not an error.
#[derive(Debug, Clone)]
pub struct ReloadHub {
    tx: broadcast::Sender<ReloadMessage>,
}

impl Default for ReloadHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReloadMessage> {
        self.tx.subscribe()
    }

    /// Push a reload to every connected client. Returns how many received it.
    pub fn notify_reload(&self, scope: ReloadScope) -> usize {
        self.publish(scope.into())
    }

    /// Ask every client to close.
    pub fn close_clients(&self) -> usize {
        self.publish(ReloadMessage::Close)
    }

    fn publish(&self, message: ReloadMessage) -> usize {
        match self.tx.send(message.clone()) {
            Ok(n) => {
                debug!(?message, clients = n, "reload notification sent");
                n
            }
            Err(_) => {
                debug!(?message, "no clients connected; reload notification dropped");
                0
            }
        }
    }
}
