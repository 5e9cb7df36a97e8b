use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::dto::{CreateGroupRequest, GroupMemberParams, PermissionSpec, RedactedPrincipal};
use super::response::{ApiError, ApiResponse, StoreOptionExt};
use super::router::AppState;
use super::users::{
    add_grant, authorize_grant_change, grant_list, remove_grant, require_identified,
};
use super::validation::validate_group_name;
use crate::auth::{Auth, RequireAdmin};
use crate::types::{GrantTarget, Group, Principal};

pub fn groups_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_groups))
        .route("/", post(create_group))
        .route("/{id}", get(get_group))
        .route("/{id}", delete(delete_group))
        .route("/{id}/members", get(list_members))
        .route("/{id}/members", post(add_member))
        .route("/{id}/members", delete(remove_member))
        .route("/{id}/permissions", get(list_group_grants))
        .route("/{id}/permissions", post(add_group_grant))
        .route("/{id}/permissions/delete", post(remove_group_grant))
        .route("/{id}/permissions/{project}", get(list_group_project_grants))
}

#[derive(Debug, Serialize)]
struct GroupMembers {
    users: Vec<RedactedPrincipal>,
    tokens: Vec<RedactedPrincipal>,
}

/// Groups answer to their id first, then to their name.
fn lookup_group(state: &AppState, key: &str) -> Result<Group, ApiError> {
    match state.store.get_group(key)? {
        Some(group) => Ok(group),
        None => state
            .store
            .get_group_by_name(key)?
            .or_not_found("Group not found."),
    }
}

pub(super) async fn list_groups(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
) -> Result<Json<ApiResponse<Vec<Group>>>, ApiError> {
    require_identified(&principal)?;
    Ok(Json(ApiResponse::success(state.store.list_groups()?)))
}

pub(super) async fn create_group(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_admin): RequireAdmin,
    Json(request): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Group>>), ApiError> {
    validate_group_name(&request.name).map_err(ApiError::unprocessable)?;
    if state.store.get_group_by_name(&request.name)?.is_some() {
        return Err(ApiError::conflict("Group already exists."));
    }

    let group = Group {
        id: Uuid::new_v4().to_string(),
        name: request.name,
        display_name: request.display_name,
        created_at: Utc::now(),
    };
    state.store.create_group(&group)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(group))))
}

async fn get_group(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Group>>, ApiError> {
    require_identified(&principal)?;
    Ok(Json(ApiResponse::success(lookup_group(&state, &id)?)))
}

async fn delete_group(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let group = lookup_group(&state, &id)?;
    if !state.store.delete_group(&group.id)? {
        return Err(ApiError::not_found("Group not found."));
    }
    Ok(Json(ApiResponse::success(())))
}

async fn list_members(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<GroupMembers>>, ApiError> {
    require_identified(&principal)?;
    let group = lookup_group(&state, &id)?;

    let mut users = Vec::new();
    for user in state.store.list_group_users(&group.id)? {
        users.push(RedactedPrincipal::build(
            &Principal::User(user),
            state.store.as_ref(),
        )?);
    }
    let mut tokens = Vec::new();
    for token in state.store.list_group_tokens(&group.id)? {
        tokens.push(RedactedPrincipal::build(
            &Principal::Token(token),
            state.store.as_ref(),
        )?);
    }
    Ok(Json(ApiResponse::success(GroupMembers { users, tokens })))
}

async fn add_member(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<String>,
    Query(params): Query<GroupMemberParams>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let group = lookup_group(&state, &id)?;
    let auth_id = params
        .auth_id
        .as_deref()
        .ok_or_else(|| ApiError::unprocessable("auth_id is required"))?;

    match params.auth_type.as_str() {
        "user" => {
            state.store.get_user(auth_id)?.or_not_found("User not found.")?;
            state.store.add_user_to_group(auth_id, &group.id)?;
        }
        "token" => {
            state
                .store
                .get_token(auth_id)?
                .or_not_found("Token not found.")?;
            state.store.add_token_to_group(auth_id, &group.id)?;
        }
        _ => {
            return Err(ApiError::unprocessable(
                "auth_type must be 'user' or 'token'",
            ));
        }
    }
    Ok(Json(ApiResponse::success(())))
}

async fn remove_member(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<String>,
    Query(params): Query<GroupMemberParams>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let group = lookup_group(&state, &id)?;
    let auth_id = params
        .auth_id
        .as_deref()
        .ok_or_else(|| ApiError::unprocessable("auth_id is required"))?;

    let removed = match params.auth_type.as_str() {
        "user" => state.store.remove_user_from_group(auth_id, &group.id)?,
        "token" => state.store.remove_token_from_group(auth_id, &group.id)?,
        _ => {
            return Err(ApiError::unprocessable(
                "auth_type must be 'user' or 'token'",
            ));
        }
    };
    if !removed {
        return Err(ApiError::not_found("Membership not found."));
    }
    Ok(Json(ApiResponse::success(())))
}

async fn list_group_grants(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<PermissionSpec>>>, ApiError> {
    require_identified(&principal)?;
    let group = lookup_group(&state, &id)?;
    let target = GrantTarget::Group(group.id);
    Ok(Json(ApiResponse::success(grant_list(&state, &target)?)))
}

async fn list_group_project_grants(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path((id, project)): Path<(String, String)>,
) -> Result<Json<ApiResponse<Vec<PermissionSpec>>>, ApiError> {
    require_identified(&principal)?;
    let group = lookup_group(&state, &id)?;
    let target = GrantTarget::Group(group.id);
    let grants = grant_list(&state, &target)?
        .into_iter()
        .filter(|spec| spec.project.as_deref() == Some(project.as_str()))
        .collect();
    Ok(Json(ApiResponse::success(grants)))
}

async fn add_group_grant(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
    Json(spec): Json<PermissionSpec>,
) -> Result<(StatusCode, Json<ApiResponse<Vec<PermissionSpec>>>), ApiError> {
    require_identified(&principal)?;
    let group = lookup_group(&state, &id)?;
    let target = GrantTarget::Group(group.id);
    authorize_grant_change(&state, &principal, &spec)?;
    add_grant(&state, target.clone(), &spec)?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(grant_list(&state, &target)?)),
    ))
}

async fn remove_group_grant(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
    Json(spec): Json<PermissionSpec>,
) -> Result<Json<ApiResponse<Vec<PermissionSpec>>>, ApiError> {
    require_identified(&principal)?;
    let group = lookup_group(&state, &id)?;
    let target = GrantTarget::Group(group.id);
    authorize_grant_change(&state, &principal, &spec)?;
    remove_grant(&state, &target, &spec)?;
    Ok(Json(ApiResponse::success(grant_list(&state, &target)?)))
}
