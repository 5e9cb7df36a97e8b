use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Router, routing::get};

use super::files::files_router;
use super::groups::{create_group, groups_router, list_groups};
use super::packages::{list_projects, packages_router};
use super::response::ApiError;
use super::users::{create_user, list_users, users_router};
use crate::auth::{CredentialStore, PermissionResolver};
use crate::config::ServerConfig;
use crate::index::PackageIndex;
use crate::proxy::ProxyFederator;
use crate::store::Store;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub credentials: CredentialStore,
    pub resolver: PermissionResolver,
    pub index: PackageIndex,
    pub federator: ProxyFederator,
    pub config: ServerConfig,
}

async fn health() -> &'static str {
    "OK"
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

/// Account management routes disappear entirely when authentication is
/// disabled.
async fn guard_auth_enabled(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.auth.enabled {
        return ApiError::not_found("Not found.").into_response();
    }
    next.run(request).await.into_response()
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let guarded = middleware::from_fn_with_state(state.clone(), guard_auth_enabled);

    // axum 0.8 maps a nested `/` route to the prefix without a trailing
    // slash, so the collection endpoints need explicit trailing-slash
    // entries. The account roots stay behind the same auth guard.
    let account_roots = Router::new()
        .route("/users/", get(list_users).post(create_user))
        .route("/groups/", get(list_groups).post(create_group))
        .layer(guarded.clone());

    Router::new()
        .route("/health", get(health))
        .route("/packages/", get(list_projects))
        .merge(account_roots)
        .nest("/packages", packages_router())
        .nest("/files", files_router())
        .nest("/users", users_router().layer(guarded.clone()))
        .nest("/groups", groups_router().layer(guarded))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
