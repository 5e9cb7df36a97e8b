use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::task::JoinHandle;

use depot::auth::{CredentialStore, PermissionResolver};
use depot::config::{AdminConfig, ServerConfig};
use depot::index::PackageIndex;
use depot::proxy::ProxyFederator;
use depot::server::{AppState, create_router};
use depot::store::{SqliteStore, Store};

pub const ADMIN_USERNAME: &str = "admin";
pub const ADMIN_PASSWORD: &str = "admin-pass";

pub struct TestServer {
    pub temp_dir: TempDir,
    pub base_url: String,
    server_task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Starts an in-process server on an ephemeral port, with the
    /// config admin account enabled by default.
    pub async fn start_with(configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let mut config = ServerConfig {
            data_dir: temp_dir.path().to_path_buf(),
            admin: AdminConfig {
                enabled: true,
                username: ADMIN_USERNAME.to_string(),
                password: Some(ADMIN_PASSWORD.to_string()),
            },
            ..ServerConfig::default()
        };
        configure(&mut config);
        config.validate().expect("valid config");

        let store = Arc::new(SqliteStore::new(config.db_path()).expect("open store"));
        store.initialize().expect("initialize store");

        let state = Arc::new(AppState {
            credentials: CredentialStore::new(store.clone(), config.admin.clone()),
            resolver: PermissionResolver::new(store.clone()),
            index: PackageIndex::new(&config.data_dir),
            federator: ProxyFederator::new(config.sorted_mirrors()).expect("build federator"),
            store,
            config,
        });

        let app = create_router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let server_task = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        Self {
            temp_dir,
            base_url: format!("http://127.0.0.1:{}", addr.port()),
            server_task,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server_task.abort();
    }
}

/// An in-process upstream registry with canned responses and a hit
/// counter, for exercising mirror federation.
pub struct MockMirror {
    pub base_url: String,
    pub hits: Arc<AtomicUsize>,
    server_task: JoinHandle<()>,
}

impl MockMirror {
    /// Serves `payload` for every project under `/simple/{name}` and
    /// `/pypi/{name}[/{version}]`. A `None` payload answers 500.
    pub async fn start(payload: Option<Value>) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));

        let index_hits = hits.clone();
        let index_payload = payload.clone();
        let package_hits = hits.clone();
        let package_payload = payload.clone();
        let versioned_hits = hits.clone();
        let versioned_payload = payload;

        let app = Router::new()
            .route(
                "/simple/{name}",
                get(move |Path(_name): Path<String>| {
                    let hits = index_hits.clone();
                    let payload = index_payload.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        respond(payload)
                    }
                }),
            )
            .route(
                "/pypi/{name}",
                get(move |Path(_name): Path<String>| {
                    let hits = package_hits.clone();
                    let payload = package_payload.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        respond(payload)
                    }
                }),
            )
            .route(
                "/pypi/{name}/{version}",
                get(move |Path(_parts): Path<(String, String)>| {
                    let hits = versioned_hits.clone();
                    let payload = versioned_payload.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        respond(payload)
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mirror");
        let addr = listener.local_addr().expect("mirror addr");
        let server_task = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve mirror");
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", addr.port()),
            hits,
            server_task,
        }
    }

    pub fn index_url(&self) -> String {
        format!("{}/simple", self.base_url)
    }

    pub fn package_url(&self) -> String {
        format!("{}/pypi", self.base_url)
    }

    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for MockMirror {
    fn drop(&mut self) {
        self.server_task.abort();
    }
}

fn respond(payload: Option<Value>) -> axum::response::Response {
    match payload {
        Some(value) => axum::Json(value).into_response(),
        None => (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(json!({"error": "boom"})))
            .into_response(),
    }
}
