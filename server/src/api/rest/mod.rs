//! REST API module
//!
//! Organized into domain-specific submodules for maintainability.

mod archive;
pub mod error;
mod files;
mod ops;
mod types;
mod uploads;

use crate::api::AppState;
use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, Method};
use axum::Router;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

pub use archive::archive_routes;
pub use files::file_routes;
pub use ops::ops_routes;
pub use uploads::upload_routes;

const X_REQUEST_ID: &str = "x-request-id";
const X_UPLOAD_ID: &str = "x-upload-id";

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::CONTENT_RANGE,
            header::RANGE,
            HeaderName::from_static(X_UPLOAD_ID),
        ])
        .expose_headers([
            header::CONTENT_RANGE,
            header::ACCEPT_RANGES,
            header::CONTENT_DISPOSITION,
            HeaderName::from_static(X_REQUEST_ID),
        ]);

    // Upload chunks arrive as whole request bodies
    let body_limit = DefaultBodyLimit::max(state.config.max_chunk_bytes);

    let x_request_id = HeaderName::from_static(X_REQUEST_ID);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().include_headers(true).level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let mut app = Router::new()
        .merge(file_routes())
        .merge(upload_routes())
        .merge(ops_routes())
        .merge(archive_routes());

    if let Some(static_dir) = &state.config.static_dir {
        tracing::info!("Serving web assets from {}", static_dir.display());
        app = app
            .route_service("/", ServeFile::new(static_dir.join("index.html")))
            .nest_service("/static", ServeDir::new(static_dir));
    }

    app.layer(cors)
        .layer(body_limit)
        // Request ID: Generate UUID, set on request, propagate to response
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
        .layer(trace_layer)
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    // Graceful shutdown: wait for SIGTERM or SIGINT
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::{ShareRoot, UploadStore};
    use axum::body::{to_bytes, Body};
    use axum::http::{HeaderMap, Request, StatusCode};
    use serde_json::{json, Value};
    use std::fs;
    use std::io::{Cursor, Read};
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;

    struct TestServer {
        share_dir: TempDir,
        _state_dir: TempDir,
        app: Router,
    }

    impl TestServer {
        fn new(read_only: bool) -> Self {
            let share_dir = tempdir().unwrap();
            let state_dir = tempdir().unwrap();
            let config = Config {
                share_root: Some(share_dir.path().to_path_buf()),
                host: "127.0.0.1".into(),
                port: 0,
                state_dir: state_dir.path().to_path_buf(),
                static_dir: None,
                read_only,
                allow_overwrite: false,
                max_chunk_bytes: 64 * 1024 * 1024,
                zip_spool_bytes: 1024 * 1024,
            };
            let share = ShareRoot::new(share_dir.path()).unwrap();
            let uploads = UploadStore::open(share, state_dir.path()).unwrap();
            let app = router(AppState::new(uploads, config));
            Self {
                share_dir,
                _state_dir: state_dir,
                app,
            }
        }

        fn path(&self, relative: &str) -> PathBuf {
            self.share_dir.path().join(relative)
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let headers = response.headers().clone();
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (status, headers, body.to_vec())
        }

        async fn get(&self, uri: &str) -> (StatusCode, HeaderMap, Vec<u8>) {
            self.send(Request::get(uri).body(Body::empty()).unwrap()).await
        }

        async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
            let request = Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap();
            let (status, _, body) = self.send(request).await;
            (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
        }

        async fn put_chunk(&self, id: &str, range: &str, bytes: Vec<u8>) -> (StatusCode, Value) {
            let request = Request::put(format!("/api/upload/{}", id))
                .header(header::CONTENT_RANGE, range)
                .body(Body::from(bytes))
                .unwrap();
            let (status, _, body) = self.send(request).await;
            (status, serde_json::from_slice(&body).unwrap())
        }
    }

    #[tokio::test]
    async fn test_info_and_listing() {
        let server = TestServer::new(true);
        fs::create_dir(server.path("photos")).unwrap();
        fs::write(server.path("readme.md"), b"# hi").unwrap();
        fs::write(server.path(".hidden"), b"x").unwrap();

        let (status, _, body) = server.get("/api/info").await;
        assert_eq!(status, StatusCode::OK);
        let info: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(info["read_only"], true);
        assert_eq!(info["overwrite"], false);

        let (status, _, body) = server.get("/api/list?path=/").await;
        assert_eq!(status, StatusCode::OK);
        let listing: Value = serde_json::from_slice(&body).unwrap();
        let entries = listing["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["name"], "photos");
        assert_eq!(entries[0]["type"], "dir");
        assert_eq!(entries[1]["name"], "readme.md");
        assert_eq!(entries[1]["size"], 4);

        let (status, _, body) = server.get("/api/list?path=readme.md").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let err: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(err["code"], "path_not_found");
    }

    #[tokio::test]
    async fn test_download_ranges() {
        let server = TestServer::new(true);
        fs::write(server.path("data.txt"), b"0123456789").unwrap();

        let (status, headers, body) = server.get("/files/data.txt").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"0123456789");
        assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
        assert_eq!(headers[header::CONTENT_LENGTH], "10");
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain");

        let request = Request::get("/files/data.txt")
            .header(header::RANGE, "bytes=9-")
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = server.send(request).await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(headers[header::CONTENT_RANGE], "bytes 9-9/10");
        assert_eq!(body, b"9");

        let request = Request::get("/files/data.txt")
            .header(header::RANGE, "bytes=10-")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = server.send(request).await;
        assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(headers[header::CONTENT_RANGE], "bytes */10");

        // Suffix ranges are not supported and fall back to the whole file
        let request = Request::get("/files/data.txt")
            .header(header::RANGE, "bytes=-3")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = server.send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.len(), 10);
    }

    #[tokio::test]
    async fn test_download_rejects_escape() {
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("secret.txt"), b"secret").unwrap();
        let server = TestServer::new(true);

        let (status, _, body) = server.get("/files/..%2F..%2Fetc%2Fpasswd").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let err: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(err["code"], "path_escape");

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(outside.path().join("secret.txt"), server.path("link.txt"))
                .unwrap();
            let (status, _, _) = server.get("/files/link.txt").await;
            assert_eq!(status, StatusCode::FORBIDDEN);
        }

        let (status, _, _) = server.get("/files/missing.bin").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_paths_below_a_regular_file_are_not_found() {
        let server = TestServer::new(true);
        fs::write(server.path("a.txt"), b"plain").unwrap();

        let (status, _, body) = server.get("/files/a.txt/x").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let err: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(err["code"], "path_not_found");

        let (status, _, body) = server.get("/api/list?path=a.txt/x").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let err: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(err["code"], "path_not_found");

        let (status, err) = server
            .post_json("/api/zip", json!({ "paths": ["a.txt/x"] }))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["code"], "path_not_found");
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes() {
        let server = TestServer::new(true);

        let (status, body) = server
            .post_json("/api/upload/session", json!({"path": "a.txt", "size": 3}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "forbidden");

        let (status, _) = server.post_json("/api/mkdir", json!({"path": "new"})).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(!server.path("new").exists());

        let request = Request::delete("/api/upload/0123456789abcdef0123456789abcdef")
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = server.send(request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_upload_ten_mebibytes_over_http() {
        let server = TestServer::new(false);
        let chunk = 2 * 1024 * 1024;
        let total = 5 * chunk;
        let data: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();

        let (status, session) = server
            .post_json(
                "/api/upload/session",
                json!({"path": "incoming/video.bin", "size": total, "resume": true}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = session["upload_id"].as_str().unwrap().to_string();
        assert_eq!(session["received"], 0);
        assert!(session.get("staging_file").is_none());

        for i in 0..5 {
            let start = i * chunk;
            let end = start + chunk - 1;
            let (status, view) = server
                .put_chunk(
                    &id,
                    &format!("bytes {}-{}/{}", start, end, total),
                    data[start..=end].to_vec(),
                )
                .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(view["received"], end + 1);
        }

        let (status, _, body) = server.get(&format!("/api/upload/{}/status", id)).await;
        assert_eq!(status, StatusCode::OK);
        let view: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(view["completed"], true);

        assert_eq!(fs::read(server.path("incoming/video.bin")).unwrap(), data);
    }

    #[tokio::test]
    async fn test_upload_conflicts_and_bad_requests() {
        let server = TestServer::new(false);

        let (status, body) = server
            .post_json("/api/upload/session", json!({"path": "notes.txt"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "bad_request");

        let (status, session) = server
            .post_json("/api/upload/session", json!({"path": "notes.txt", "size": 6}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = session["upload_id"].as_str().unwrap().to_string();

        let (status, body) = server.put_chunk(&id, "bytes 3-5/6", b"def".to_vec()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "sequence_mismatch");
        assert_eq!(body["expected"], 0);

        let (status, body) = server.put_chunk(&id, "3 bytes please", b"abc".to_vec()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "bad_request");

        let (status, body) = server.put_chunk("f00d", "bytes 0-2/6", b"abc".to_vec()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "session_not_found");

        // Target appears before the upload finishes
        fs::write(server.path("notes.txt"), b"original").unwrap();
        server.put_chunk(&id, "bytes 0-2/6", b"abc".to_vec()).await;
        let (status, body) = server.put_chunk(&id, "bytes 3-5/6", b"def".to_vec()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "target_exists");
        assert_eq!(fs::read(server.path("notes.txt")).unwrap(), b"original");

        let request = Request::delete(format!("/api/upload/{}", id))
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = server.send(request).await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["deleted"], id);

        let (status, _) = server
            .post_json("/api/upload/session", json!({"path": "../x", "size": 1}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_share_operations() {
        let server = TestServer::new(false);

        let (status, body) = server.post_json("/api/mkdir", json!({"path": "a/b"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["created"], "a/b");

        fs::write(server.path("a/b/file.txt"), b"x").unwrap();
        let (status, body) = server
            .post_json(
                "/api/move",
                json!({"source": "a/b/file.txt", "destination": "c/file.txt"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["moved"], "a/b/file.txt");
        assert_eq!(body["to"], "c/file.txt");
        assert!(server.path("c/file.txt").is_file());

        let (status, body) = server.post_json("/api/delete", json!({"path": "a"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], "a");
        assert!(!server.path("a").exists());

        let (status, body) = server.post_json("/api/delete", json!({"path": "/"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_zip_download() {
        let server = TestServer::new(true);
        fs::create_dir_all(server.path("docs/empty")).unwrap();
        fs::write(server.path("docs/a.txt"), b"alpha").unwrap();

        let request = Request::post("/api/zip")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"paths": ["docs"]}).to_string()))
            .unwrap();
        let (status, headers, body) = server.send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/zip");
        assert_eq!(headers[header::CONTENT_LENGTH], body.len().to_string().as_str());
        let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.starts_with("attachment; filename=\"shareport-"));
        assert!(disposition.ends_with(".zip\""));

        let mut zip = zip::ZipArchive::new(Cursor::new(body)).unwrap();
        assert!(zip.by_name("docs/empty/").unwrap().is_dir());
        let mut content = String::new();
        zip.by_name("docs/a.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "alpha");

        let (status, body) = server
            .post_json("/api/zip", json!({"paths": ["docs", "nope"]}))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "path_not_found");

        let (status, _) = server.post_json("/api/zip", json!({"paths": []})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cors_and_request_id_headers() {
        let server = TestServer::new(true);
        let request = Request::get("/api/info")
            .header(header::ORIGIN, "http://192.168.1.20:3000")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = server.send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(headers.contains_key(X_REQUEST_ID));
    }
}
