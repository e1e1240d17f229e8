use std::fs;
use std::path::Path;

use assetdag::config::ServerSection;
use assetdag::engine::Services;
use assetdag::server::routes::{CLIENT_PATH, EVENTS_PATH};
use assetdag::server::{self, create_router, ReloadHub, ServerState};
use assetdag_test_utils::{init_tracing, with_timeout};
use axum::http::StatusCode;
use axum_test::TestServer;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn site() -> TempDir {
    let tmp = tempfile::tempdir().unwrap();
    let dist = tmp.path().join("dist");
    fs::create_dir_all(dist.join("css")).unwrap();
    fs::create_dir_all(dist.join("docs")).unwrap();
    fs::write(
        dist.join("index.html"),
        "<html><body><h1>home</h1></body></html>",
    )
    .unwrap();
    fs::write(dist.join("docs/index.html"), "<p>docs</p>").unwrap();
    fs::write(dist.join("css/site.css"), "body{}").unwrap();
    tmp
}

fn setup(root: &Path) -> TestServer {
    let state = ServerState {
        root: root.join("dist"),
        index: "index.html".to_string(),
        hub: ReloadHub::new(),
    };
    TestServer::new(create_router(state)).expect("Failed to create test server")
}

fn section(port: u16) -> ServerSection {
    ServerSection {
        root: "dist".to_string(),
        host: "127.0.0.1".to_string(),
        port,
        https: false,
        cert: None,
        key: None,
        index: "index.html".to_string(),
        close_clients_on_exit: true,
    }
}

#[tokio::test]
async fn index_page_gets_reload_client() {
    let tmp = site();
    let server = setup(tmp.path());

    let response = server.get("/").await;

    response.assert_status_ok();
    let body = response.text();
    assert!(body.contains("<h1>home</h1>"));
    assert!(body.contains(&format!("<script src=\"{CLIENT_PATH}\"></script>\n</body>")));
}

#[tokio::test]
async fn nested_index_and_fragments_are_injected() {
    let tmp = site();
    let server = setup(tmp.path());

    let response = server.get("/docs/").await;

    response.assert_status_ok();
    assert!(response.text().starts_with("<p>docs</p>\n<script"));
}

#[tokio::test]
async fn static_files_are_served_untouched() {
    let tmp = site();
    let server = setup(tmp.path());

    let response = server.get("/css/site.css").await;

    response.assert_status_ok();
    assert_eq!(response.text(), "body{}");
}

#[tokio::test]
async fn missing_file_is_not_found() {
    let tmp = site();
    let server = setup(tmp.path());

    server
        .get("/css/missing.css")
        .expect_failure()
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn client_script_is_served() {
    let tmp = site();
    let server = setup(tmp.path());

    let response = server.get(CLIENT_PATH).await;

    response.assert_status_ok();
    assert!(response.text().contains(EVENTS_PATH));
}

async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn serve_binds_and_shuts_down() {
    init_tracing();
    let tmp = site();

    let handle = server::serve(tmp.path(), &section(0), ReloadHub::new())
        .await
        .unwrap();
    let addr = handle.local_addr();
    assert_ne!(addr.port(), 0);
    assert!(handle.url().starts_with("http://127.0.0.1:"));

    let response = with_timeout(http_get(addr, "/css/site.css")).await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.ends_with("body{}"));

    let mut rx = handle.hub().subscribe();
    with_timeout(handle.shutdown()).await;
    assert_eq!(rx.try_recv().unwrap(), server::ReloadMessage::Close);
}

#[tokio::test]
async fn server_starts_once_per_process() {
    let tmp = site();
    let services = Services::new();
    let hub = ReloadHub::new();

    assert!(services.start_server(tmp.path(), &section(0), hub.clone()).await.unwrap());
    assert!(!services.start_server(tmp.path(), &section(0), hub).await.unwrap());
    assert!(services.server_running().await);

    with_timeout(services.shutdown()).await;
    assert!(!services.server_running().await);
}

#[tokio::test]
async fn occupied_port_is_reported() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();
    let tmp = site();

    let result = server::serve(tmp.path(), &section(port), ReloadHub::new()).await;
    assert!(result.is_err());
}
