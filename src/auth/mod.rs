mod credentials;
mod middleware;
mod resolver;

pub use credentials::{CredentialStore, generate_secret, hash_password, verify_password};
pub use middleware::{Auth, AuthError, RequireAdmin, TOKEN_USERNAME};
pub use resolver::PermissionResolver;
