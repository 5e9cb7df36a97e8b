use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use crate::config::AdminConfig;
use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::Principal;

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 32;
const SECRET_LEN: usize = 32;

fn derive(password: &str, salt_hex: &str) -> String {
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        salt_hex.as_bytes(),
        PBKDF2_ITERATIONS,
        &mut out,
    );
    hex::encode(out)
}

/// Hashes a password with a fresh random salt.
/// Returns (salt_hex, hash_hex) for storage.
#[must_use]
pub fn hash_password(password: &str) -> (String, String) {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt_hex = hex::encode(salt);
    let hash_hex = derive(password, &salt_hex);
    (salt_hex, hash_hex)
}

#[must_use]
pub fn verify_password(password: &str, salt_hex: &str, hash_hex: &str) -> bool {
    derive(password, salt_hex) == hash_hex
}

/// Generates a URL-safe token secret.
#[must_use]
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Resolves submitted credentials to a principal.
pub struct CredentialStore {
    store: Arc<dyn Store>,
    admin: AdminConfig,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn Store>, admin: AdminConfig) -> Self {
        Self { store, admin }
    }

    /// Verifies a username/password pair. Unknown users and wrong
    /// passwords are indistinguishable to the caller.
    pub fn verify(&self, username: &str, password: &str) -> Result<Principal> {
        if self.admin.enabled && username == self.admin.username {
            let expected = self.admin.password.as_deref().unwrap_or("");
            if !expected.is_empty() && password == expected {
                return Ok(Principal::Admin {
                    username: username.to_string(),
                });
            }
            return Err(Error::InvalidCredentials);
        }

        let user = self
            .store
            .get_user_by_username(username)?
            .ok_or(Error::InvalidCredentials)?;

        match (&user.password_hash, &user.password_salt) {
            (Some(hash), Some(salt)) => {
                if verify_password(password, salt, hash) {
                    Ok(Principal::User(user))
                } else {
                    Err(Error::InvalidCredentials)
                }
            }
            // Passwordless accounts verify only against an empty password.
            _ => {
                if password.is_empty() {
                    Ok(Principal::User(user))
                } else {
                    Err(Error::InvalidCredentials)
                }
            }
        }
    }

    /// Verifies a raw token secret by exact lookup.
    pub fn verify_token(&self, secret: &str) -> Result<Principal> {
        let token = self
            .store
            .get_token_by_secret(secret)?
            .ok_or(Error::InvalidCredentials)?;
        Ok(Principal::Token(token))
    }
}
