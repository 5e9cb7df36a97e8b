use std::sync::Arc;

use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;

use crate::error::Error;
use crate::server::AppState;
use crate::types::Principal;

/// Username that routes the Basic auth password to token lookup.
pub const TOKEN_USERNAME: &str = "__token__";

/// Extractor for any authenticated caller. Yields Anonymous when the
/// deployment allows unauthenticated access.
pub struct Auth(pub Principal);

/// Extractor that requires admin rights (config admin or meta.admin grant).
pub struct RequireAdmin(pub Principal);

#[derive(Debug)]
pub enum AuthError {
    MissingAuth,
    InvalidScheme,
    InvalidCredentials,
    NotAdmin,
    InternalError,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::InvalidScheme => (StatusCode::UNAUTHORIZED, "Invalid authorization scheme"),
            AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "Invalid credentials"),
            AuthError::NotAdmin => (StatusCode::FORBIDDEN, "Admin access required"),
            AuthError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = json!({ "data": null, "error": message });

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert("WWW-Authenticate", "Basic realm=\"depot\"".parse().unwrap());
        }

        response
    }
}

impl FromRequestParts<Arc<AppState>> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let principal = authenticate(parts, state)?;
        Ok(Auth(principal))
    }
}

impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let principal = authenticate(parts, state)?;

        if !state
            .resolver
            .is_admin(&principal)
            .map_err(|_| AuthError::InternalError)?
        {
            return Err(AuthError::NotAdmin);
        }

        Ok(RequireAdmin(principal))
    }
}

fn authenticate(parts: &Parts, state: &Arc<AppState>) -> Result<Principal, AuthError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let Some(header) = header else {
        if state.config.auth.allow_anonymous {
            return Ok(Principal::Anonymous);
        }
        return Err(AuthError::MissingAuth);
    };

    let (username, password) = decode_basic(header)?;

    let result = if username == TOKEN_USERNAME {
        state.credentials.verify_token(&password)
    } else {
        state.credentials.verify(&username, &password)
    };

    result.map_err(|e| match e {
        Error::InvalidCredentials => AuthError::InvalidCredentials,
        _ => AuthError::InternalError,
    })
}

fn decode_basic(header: &str) -> Result<(String, String), AuthError> {
    let encoded = header
        .strip_prefix("Basic ")
        .ok_or(AuthError::InvalidScheme)?;
    let decoded = STANDARD
        .decode(encoded)
        .map_err(|_| AuthError::InvalidScheme)?;
    let credentials = String::from_utf8(decoded).map_err(|_| AuthError::InvalidScheme)?;

    let (username, password) = credentials
        .split_once(':')
        .ok_or(AuthError::InvalidScheme)?;

    Ok((username.to_string(), password.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_basic() {
        let header = format!("Basic {}", STANDARD.encode("alice:swordfish"));
        let (username, password) = decode_basic(&header).unwrap();
        assert_eq!(username, "alice");
        assert_eq!(password, "swordfish");
    }

    #[test]
    fn test_decode_basic_rejects_other_schemes() {
        assert!(matches!(
            decode_basic("Bearer abc"),
            Err(AuthError::InvalidScheme)
        ));
        assert!(matches!(
            decode_basic("Basic not-base64!"),
            Err(AuthError::InvalidScheme)
        ));
    }

    #[test]
    fn test_decode_basic_password_may_contain_colon() {
        let header = format!("Basic {}", STANDARD.encode("__token__:se:cr:et"));
        let (username, password) = decode_basic(&header).unwrap();
        assert_eq!(username, TOKEN_USERNAME);
        assert_eq!(password, "se:cr:et");
    }
}
