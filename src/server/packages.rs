use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use super::dto::{
    ApiMeta, LocalParams, Package, PackageInfo, PackageUrl, ProjectDetail, ProjectEntry,
    ProjectFile, ProjectList, SIMPLE_V1_JSON,
};
use super::response::ApiError;
use super::router::AppState;
use super::validation::validate_project_name;
use crate::auth::Auth;
use crate::error::Error;
use crate::types::{FileRecord, PackagePermission, Principal};

pub fn packages_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_projects))
        .route("/upload", post(upload))
        .route("/detail/{name}", get(package_detail_latest))
        .route("/detail/{name}/{version}", get(package_detail_version))
        .route("/{name}", get(project_detail))
}

/// Base for file URLs, derived from the Host the client used.
fn url_base(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}")
}

fn simple_json<T: Serialize>(body: T) -> Response {
    (
        [(header::CONTENT_TYPE, SIMPLE_V1_JSON)],
        Json(body),
    )
        .into_response()
}

/// Listing names every local project is intentional; per-project
/// visibility is enforced on the detail and file routes.
pub(super) async fn list_projects(
    State(state): State<Arc<AppState>>,
    Auth(_principal): Auth,
) -> Result<Response, ApiError> {
    let projects = state
        .index
        .list_projects()
        .await?
        .into_iter()
        .map(|name| ProjectEntry { name })
        .collect();
    Ok(simple_json(ProjectList {
        meta: ApiMeta::default(),
        projects,
    }))
}

async fn project_detail(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(name): Path<String>,
    Query(params): Query<LocalParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    validate_project_name(&name)?;

    match local_project_detail(&state, &principal, &name, &headers).await {
        Ok(detail) => Ok(simple_json(detail)),
        Err(Error::NotFound) if !params.local => {
            let detail = state.federator.resolve_index(&name).await?;
            Ok(simple_json(detail))
        }
        Err(e) => Err(e.into()),
    }
}

async fn local_project_detail(
    state: &AppState,
    principal: &Principal,
    name: &str,
    headers: &HeaderMap,
) -> crate::error::Result<ProjectDetail> {
    if !state.index.project_exists(name)
        || !state
            .resolver
            .has_access(principal, name, PackagePermission::View)?
    {
        return Err(Error::NotFound);
    }

    let base = url_base(headers);
    let files = state.index.all_files(name).await?;
    Ok(ProjectDetail {
        meta: ApiMeta::default(),
        name: name.to_string(),
        files: files
            .iter()
            .map(|record| ProjectFile::from_record(record, &base))
            .collect(),
    })
}

async fn package_detail_latest(
    state: State<Arc<AppState>>,
    auth: Auth,
    Path(name): Path<String>,
    params: Query<LocalParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    package_detail(state, auth, name, None, params, headers).await
}

async fn package_detail_version(
    state: State<Arc<AppState>>,
    auth: Auth,
    Path((name, version)): Path<(String, String)>,
    params: Query<LocalParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    package_detail(state, auth, name, Some(version), params, headers).await
}

async fn package_detail(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    name: String,
    version: Option<String>,
    Query(params): Query<LocalParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    validate_project_name(&name)?;

    match local_package(&state, &principal, &name, version.as_deref(), &headers).await {
        Ok(package) => Ok(Json(package).into_response()),
        Err(Error::NotFound) if !params.local => {
            let package = state
                .federator
                .resolve_package(&name, version.as_deref())
                .await?;
            Ok(Json(package).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

async fn local_package(
    state: &AppState,
    principal: &Principal,
    name: &str,
    requested: Option<&str>,
    headers: &HeaderMap,
) -> crate::error::Result<Package> {
    if !state.index.project_exists(name)
        || !state
            .resolver
            .has_access(principal, name, PackagePermission::View)?
    {
        return Err(Error::NotFound);
    }

    let version = state.index.resolve(name, requested).await?;
    let files = state.index.files(name, &version).await?;
    let record = files.first().ok_or(Error::NotFound)?;

    let base = url_base(headers);
    Ok(Package {
        info: PackageInfo::from_record(record),
        urls: files
            .iter()
            .map(|record| PackageUrl::from_record(record, &base))
            .collect(),
        local: true,
    })
}

const SINGLE_FIELDS: &[&str] = &[
    "metadata_version",
    "summary",
    "description",
    "description_content_type",
    "keywords",
    "home_page",
    "download_url",
    "author",
    "author_email",
    "maintainer",
    "maintainer_email",
    "license",
    "requires_python",
    "comment",
    "filetype",
    "pyversion",
    "md5_digest",
    "sha256_digest",
    "blake2_256_digest",
];

const LIST_FIELDS: &[&str] = &[
    "platform",
    "supported_platform",
    "classifiers",
    "requires_dist",
    "requires_external",
    "project_urls",
    "provides_dist",
    "obsoletes_dist",
];

fn take_one(fields: &mut HashMap<String, Vec<String>>, key: &str) -> Option<String> {
    fields.remove(key).and_then(|mut values| {
        values.retain(|v| !v.is_empty());
        values.pop()
    })
}

fn take_list(fields: &mut HashMap<String, Vec<String>>, key: &str) -> Option<Vec<String>> {
    fields.remove(key).and_then(|mut values| {
        values.retain(|v| !v.is_empty());
        if values.is_empty() { None } else { Some(values) }
    })
}

async fn upload(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut fields: HashMap<String, Vec<String>> = HashMap::new();
    let mut content: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart payload: {e}")))?
    {
        let Some(field_name) = field.name() else {
            continue;
        };
        let field_name = field_name.to_string();

        if field_name == "content" {
            let filename = field
                .file_name()
                .map(str::to_string)
                .ok_or_else(|| ApiError::bad_request("Content field is missing a filename"))?;
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("Invalid multipart payload: {e}")))?;
            content = Some((filename, data.to_vec()));
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| ApiError::bad_request(format!("Invalid multipart payload: {e}")))?;
            fields.entry(field_name).or_default().push(value);
        }
    }

    // Older clients send Project-URL entries under the singular key.
    if let Some(urls) = fields.remove("project_url") {
        fields.entry("project_urls".to_string()).or_default().extend(urls);
    }

    let name = take_one(&mut fields, "name")
        .ok_or_else(|| ApiError::bad_request("Upload is missing the package name"))?;
    let version = take_one(&mut fields, "version")
        .ok_or_else(|| ApiError::bad_request("Upload is missing the package version"))?;
    let (filename, data) =
        content.ok_or_else(|| ApiError::bad_request("Upload is missing the content field"))?;

    validate_project_name(&name)?;

    let mut meta = serde_json::Map::new();
    meta.insert("name".to_string(), Value::String(name.clone()));
    meta.insert("version".to_string(), Value::String(version));
    meta.insert("filename".to_string(), Value::String(filename));
    meta.insert(
        "upload_time".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    for key in SINGLE_FIELDS {
        if let Some(value) = take_one(&mut fields, key) {
            meta.insert((*key).to_string(), Value::String(value));
        }
    }
    for key in LIST_FIELDS {
        if let Some(values) = take_list(&mut fields, key) {
            meta.insert((*key).to_string(), serde_json::json!(values));
        }
    }

    let record: FileRecord = serde_json::from_value(Value::Object(meta))
        .map_err(|e| ApiError::bad_request(format!("Invalid upload metadata: {e}")))?;

    if state.index.project_exists(&name) {
        match state.resolver.access_level(&principal, &name)? {
            Some(level) if level.satisfies(PackagePermission::Edit) => {}
            Some(_) => return Err(ApiError::forbidden("Insufficient permissions.")),
            None => return Err(ApiError::not_found("Project not found.")),
        }
    } else if !state.resolver.can_create(&principal)? {
        return Err(ApiError::forbidden("Insufficient permissions."));
    }

    match state.index.publish(&record, &data).await {
        Ok(()) => Ok((StatusCode::CREATED, Json(record)).into_response()),
        Err(Error::Conflict(_)) => Err(ApiError::method_not_allowed(
            "Cannot overwrite an existing version of a package.",
        )),
        Err(e) => Err(e.into()),
    }
}
