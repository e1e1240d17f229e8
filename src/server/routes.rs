// src/server/routes.rs

//! HTTP surface of the dev server.

use std::path::{Component, Path, PathBuf};

use async_stream::stream;
use axum::extract::{Request, State};
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::{Stream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tracing::debug;

use crate::server::reload::{ReloadHub, ReloadMessage};

pub const EVENTS_PATH: &str = "/__assetdag/events";
pub const CLIENT_PATH: &str = "/__assetdag/client.js";

const CLIENT_JS: &str = include_str!("client.js");

#[derive(Debug, Clone)]
pub struct ServerState {
    pub root: PathBuf,
    pub index: String,
    pub hub: ReloadHub,
}

pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route(EVENTS_PATH, get(events_handler))
        .route(CLIENT_PATH, get(client_handler))
        .fallback(static_handler)
        .with_state(state)
}

/// GET /__assetdag/events
async fn events_handler(
    State(state): State<ServerState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    debug!("reload client connected");
    let events = message_stream(state.hub.subscribe()).map(|msg| Event::default().json_data(&msg));
    Sse::new(events).keep_alive(KeepAlive::default())
}

/// GET /__assetdag/client.js
async fn client_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/javascript")], CLIENT_JS)
}

/// Reload messages for one client.
///
/// Ends after `close`. A client that fell behind gets a full reload instead
/// of the messages it missed.
pub fn message_stream(
    mut rx: broadcast::Receiver<ReloadMessage>,
) -> impl Stream<Item = ReloadMessage> {
    stream! {
        loop {
            match rx.recv().await {
                Ok(ReloadMessage::Close) => {
                    yield ReloadMessage::Close;
                    break;
                }
                Ok(msg) => yield msg,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "reload client lagged; forcing full reload");
                    yield ReloadMessage::Reload;
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

/// Everything else: HTML pages get the client script injected, other files
/// are served as-is.
async fn static_handler(State(state): State<ServerState>, req: Request) -> Response {
    if let Some(page) = html_target(&state.root, req.uri().path(), &state.index) {
        match tokio::fs::read_to_string(&page).await {
            Ok(html) => return Html(inject_client(&html)).into_response(),
            Err(err) => debug!(path = ?page, error = %err, "no html page; falling back to file service"),
        }
    }

    match ServeDir::new(&state.root).oneshot(req).await {
        Ok(res) => res.into_response(),
        Err(never) => match never {},
    }
}

/// File an HTML request maps to, or `None` if the request is not for a page
/// (or tries to leave the root).
pub fn html_target(root: &Path, uri_path: &str, index: &str) -> Option<PathBuf> {
    let rel = uri_path.trim_start_matches('/');
    let rel_path = Path::new(rel);
    if rel_path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }

    if rel.is_empty() || rel.ends_with('/') {
        return Some(root.join(rel_path).join(index));
    }
    let is_html = rel_path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"));
    is_html.then(|| root.join(rel_path))
}

/// Insert the client script tag before the last `</body>` (or append it).
pub fn inject_client(html: &str) -> String {
    let tag = format!("<script src=\"{CLIENT_PATH}\"></script>");
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(idx) => format!("{}{tag}\n{}", &html[..idx], &html[idx..]),
        None => format!("{html}\n{tag}\n"),
    }
}
