use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use uuid::Uuid;

use super::dto::{
    CreateTokenRequest, CreateUserRequest, PasswordChangeRequest, PermissionSpec,
    RedactedPrincipal, TokenCreated,
};
use super::response::{ApiError, ApiResponse, StoreOptionExt};
use super::router::AppState;
use super::validation::{LookupMethod, validate_username};
use crate::auth::{Auth, RequireAdmin, generate_secret, hash_password};
use crate::types::{
    ApiToken, AuthUser, GrantTarget, PackagePermission, PermissionGrant, Principal,
};

pub fn users_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_users))
        .route("/", post(create_user))
        .route("/self", get(current_user))
        .route("/self", delete(delete_self))
        .route("/self/password", post(change_password))
        .route("/self/tokens", get(list_tokens))
        .route("/self/tokens", post(create_token))
        .route("/self/tokens/{id}", delete(delete_token))
        .route("/{method}/{value}", get(get_user))
        .route("/{method}/{value}", delete(delete_user))
        .route("/{method}/{value}/permissions", get(list_user_grants))
        .route("/{method}/{value}/permissions", post(add_user_grant))
        .route("/{method}/{value}/permissions/delete", post(remove_user_grant))
        .route(
            "/{method}/{value}/permissions/{project}",
            get(list_user_project_grants),
        )
}

/// Account reads are for authenticated callers only, even when the
/// deployment allows anonymous package access.
pub(super) fn require_identified(principal: &Principal) -> Result<(), ApiError> {
    if matches!(principal, Principal::Anonymous) {
        return Err(ApiError::unauthorized("Authentication required"));
    }
    Ok(())
}

fn require_user(principal: &Principal) -> Result<&AuthUser, ApiError> {
    match principal {
        Principal::User(user) => Ok(user),
        _ => Err(ApiError::forbidden("Only user accounts can do this.")),
    }
}

/// Resolves a `{method}/{value}` pair to a principal. The configured
/// admin account answers to its username and to the `_admin` id.
fn lookup_principal(state: &AppState, method: &str, value: &str) -> Result<Principal, ApiError> {
    let admin = &state.config.admin;
    match LookupMethod::parse(method)? {
        LookupMethod::Name => {
            if admin.enabled && value == admin.username {
                return Ok(Principal::Admin {
                    username: value.to_string(),
                });
            }
            let user = state
                .store
                .get_user_by_username(value)?
                .or_not_found("User not found.")?;
            Ok(Principal::User(user))
        }
        LookupMethod::Id => {
            if value == "_admin" {
                if admin.enabled {
                    return Ok(Principal::Admin {
                        username: admin.username.clone(),
                    });
                }
                return Err(ApiError::not_found("User not found."));
            }
            let user = state
                .store
                .get_user(value)?
                .or_not_found("User not found.")?;
            Ok(Principal::User(user))
        }
    }
}

/// The admin account never carries stored grants.
pub(super) fn principal_target(principal: &Principal) -> Result<GrantTarget, ApiError> {
    principal
        .id()
        .map(|id| GrantTarget::Principal(id.to_string()))
        .ok_or_else(|| ApiError::unprocessable("The admin account has implicit permissions"))
}

/// Server grants are admin-only; package grants require manage rights
/// on the named project.
pub(super) fn authorize_grant_change(
    state: &AppState,
    principal: &Principal,
    spec: &PermissionSpec,
) -> Result<(), ApiError> {
    if spec.permission.is_server() {
        if spec.project.is_some() {
            return Err(ApiError::unprocessable(
                "Server permissions do not take a project",
            ));
        }
        if !state.resolver.is_admin(principal)? {
            return Err(ApiError::forbidden("Insufficient permissions."));
        }
    } else {
        let Some(project) = spec.project.as_deref() else {
            return Err(ApiError::unprocessable(
                "Package permissions require a project",
            ));
        };
        if !state
            .resolver
            .has_access(principal, project, PackagePermission::Manage)?
        {
            return Err(ApiError::forbidden("Insufficient permissions."));
        }
    }
    Ok(())
}

pub(super) fn grant_list(
    state: &AppState,
    target: &GrantTarget,
) -> Result<Vec<PermissionSpec>, ApiError> {
    Ok(state
        .store
        .list_grants_for_target(target)?
        .into_iter()
        .map(|grant| PermissionSpec {
            permission: grant.permission,
            project: grant.project,
        })
        .collect())
}

pub(super) fn add_grant(
    state: &AppState,
    target: GrantTarget,
    spec: &PermissionSpec,
) -> Result<(), ApiError> {
    state.store.create_grant(&PermissionGrant {
        id: Uuid::new_v4().to_string(),
        permission: spec.permission,
        target,
        project: spec.project.clone(),
        created_at: Utc::now(),
    })?;
    Ok(())
}

pub(super) fn remove_grant(
    state: &AppState,
    target: &GrantTarget,
    spec: &PermissionSpec,
) -> Result<(), ApiError> {
    let removed = state
        .store
        .delete_matching_grant(spec.permission, target, spec.project.as_deref())?;
    if !removed {
        return Err(ApiError::not_found("Grant not found."));
    }
    Ok(())
}

pub(super) async fn list_users(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<ApiResponse<Vec<RedactedPrincipal>>>, ApiError> {
    let mut out = Vec::new();
    for user in state.store.list_users()? {
        out.push(RedactedPrincipal::build(
            &Principal::User(user),
            state.store.as_ref(),
        )?);
    }
    Ok(Json(ApiResponse::success(out)))
}

pub(super) async fn create_user(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_admin): RequireAdmin,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RedactedPrincipal>>), ApiError> {
    validate_username(&request.username).map_err(ApiError::unprocessable)?;
    if request.username == state.config.admin.username {
        return Err(ApiError::conflict("Username is reserved."));
    }
    if state
        .store
        .get_user_by_username(&request.username)?
        .is_some()
    {
        return Err(ApiError::conflict("Username already exists."));
    }

    let (salt, hash) = match request.password.as_deref().filter(|p| !p.is_empty()) {
        Some(password) => {
            let (salt, hash) = hash_password(password);
            (Some(salt), Some(hash))
        }
        None => (None, None),
    };
    let user = AuthUser {
        id: Uuid::new_v4().to_string(),
        username: request.username,
        password_hash: hash,
        password_salt: salt,
        groups: Vec::new(),
        created_at: Utc::now(),
    };
    state.store.create_user(&user)?;

    let view = RedactedPrincipal::build(&Principal::User(user), state.store.as_ref())?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(view))))
}

async fn current_user(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
) -> Result<Json<ApiResponse<RedactedPrincipal>>, ApiError> {
    let view = RedactedPrincipal::build(&principal, state.store.as_ref())?;
    Ok(Json(ApiResponse::success(view)))
}

async fn change_password(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Json(request): Json<PasswordChangeRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let user = require_user(&principal)?;
    state
        .credentials
        .verify(&user.username, &request.current_password)
        .map_err(|_| ApiError::unauthorized("Current password is incorrect."))?;

    match request.new_password.as_deref().filter(|p| !p.is_empty()) {
        Some(password) => {
            let (salt, hash) = hash_password(password);
            state
                .store
                .update_user_password(&user.id, Some(&hash), Some(&salt))?;
        }
        None => state.store.update_user_password(&user.id, None, None)?,
    }
    Ok(Json(ApiResponse::success(())))
}

async fn delete_self(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let user = require_user(&principal)?;
    if !state.store.delete_user(&user.id)? {
        return Err(ApiError::not_found("User not found."));
    }
    Ok(Json(ApiResponse::success(())))
}

async fn list_tokens(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
) -> Result<Json<ApiResponse<Vec<ApiToken>>>, ApiError> {
    let user = require_user(&principal)?;
    Ok(Json(ApiResponse::success(
        state.store.list_user_tokens(&user.id)?,
    )))
}

async fn create_token(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    request: Option<Json<CreateTokenRequest>>,
) -> Result<(StatusCode, Json<ApiResponse<TokenCreated>>), ApiError> {
    let user = require_user(&principal)?;
    let Json(request) = request.unwrap_or_default();

    let secret = generate_secret();
    let token = ApiToken {
        id: Uuid::new_v4().to_string(),
        secret: secret.clone(),
        linked_user: Some(user.id.clone()),
        description: request.description,
        groups: Vec::new(),
        created_at: Utc::now(),
    };
    state.store.create_token(&token)?;

    let created = TokenCreated {
        id: token.id,
        token: secret,
        description: token.description,
        created_at: token.created_at,
    };
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

async fn delete_token(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let user = require_user(&principal)?;
    let token = state.store.get_token(&id)?.or_not_found("Token not found.")?;
    if token.linked_user.as_deref() != Some(user.id.as_str()) {
        return Err(ApiError::not_found("Token not found."));
    }
    state.store.delete_token(&id)?;
    Ok(Json(ApiResponse::success(())))
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path((method, value)): Path<(String, String)>,
) -> Result<Json<ApiResponse<RedactedPrincipal>>, ApiError> {
    require_identified(&principal)?;
    let target = lookup_principal(&state, &method, &value)?;
    let view = RedactedPrincipal::build(&target, state.store.as_ref())?;
    Ok(Json(ApiResponse::success(view)))
}

async fn delete_user(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_admin): RequireAdmin,
    Path((method, value)): Path<(String, String)>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let target = lookup_principal(&state, &method, &value)?;
    let Principal::User(user) = target else {
        return Err(ApiError::forbidden("The admin account cannot be deleted."));
    };
    if !state.store.delete_user(&user.id)? {
        return Err(ApiError::not_found("User not found."));
    }
    Ok(Json(ApiResponse::success(())))
}

async fn list_user_grants(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path((method, value)): Path<(String, String)>,
) -> Result<Json<ApiResponse<Vec<PermissionSpec>>>, ApiError> {
    require_identified(&principal)?;
    let target = lookup_principal(&state, &method, &value)?;
    let target = principal_target(&target)?;
    Ok(Json(ApiResponse::success(grant_list(&state, &target)?)))
}

async fn list_user_project_grants(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path((method, value, project)): Path<(String, String, String)>,
) -> Result<Json<ApiResponse<Vec<PermissionSpec>>>, ApiError> {
    require_identified(&principal)?;
    let target = lookup_principal(&state, &method, &value)?;
    let target = principal_target(&target)?;
    let grants = grant_list(&state, &target)?
        .into_iter()
        .filter(|spec| spec.project.as_deref() == Some(project.as_str()))
        .collect();
    Ok(Json(ApiResponse::success(grants)))
}

async fn add_user_grant(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path((method, value)): Path<(String, String)>,
    Json(spec): Json<PermissionSpec>,
) -> Result<(StatusCode, Json<ApiResponse<Vec<PermissionSpec>>>), ApiError> {
    require_identified(&principal)?;
    let subject = lookup_principal(&state, &method, &value)?;
    let target = principal_target(&subject)?;
    authorize_grant_change(&state, &principal, &spec)?;
    add_grant(&state, target.clone(), &spec)?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(grant_list(&state, &target)?)),
    ))
}

async fn remove_user_grant(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path((method, value)): Path<(String, String)>,
    Json(spec): Json<PermissionSpec>,
) -> Result<Json<ApiResponse<Vec<PermissionSpec>>>, ApiError> {
    require_identified(&principal)?;
    let subject = lookup_principal(&state, &method, &value)?;
    let target = principal_target(&subject)?;
    authorize_grant_change(&state, &principal, &spec)?;
    remove_grant(&state, &target, &spec)?;
    Ok(Json(ApiResponse::success(grant_list(&state, &target)?)))
}
