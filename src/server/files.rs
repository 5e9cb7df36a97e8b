use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use super::response::ApiError;
use super::router::AppState;
use super::validation::validate_project_name;
use crate::auth::Auth;
use crate::types::PackagePermission;

pub fn files_router() -> Router<Arc<AppState>> {
    Router::new().route("/{name}/{version}/{filename}", get(download))
}

/// Serves a stored artifact, or its core-metadata document when the
/// requested filename carries a `.metadata` suffix.
async fn download(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path((name, version, filename)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    validate_project_name(&name)?;

    if !state.index.project_exists(&name)
        || !state
            .resolver
            .has_access(&principal, &name, PackagePermission::View)?
    {
        return Err(ApiError::not_found("File not found."));
    }

    if let Some(base) = filename.strip_suffix(".metadata") {
        let record = state.index.file_record(&name, &version, base).await?;
        return Ok((
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            record.metadata_document(),
        )
            .into_response());
    }

    let data = state.index.read_file(&name, &version, &filename).await?;
    Ok((
        [
            (
                header::CONTENT_TYPE,
                "application/octet-stream".to_string(),
            ),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        data,
    )
        .into_response())
}
