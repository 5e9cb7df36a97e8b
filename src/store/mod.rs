mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::*;

/// Store defines the database interface.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // User operations
    fn create_user(&self, user: &AuthUser) -> Result<()>;
    fn get_user(&self, id: &str) -> Result<Option<AuthUser>>;
    fn get_user_by_username(&self, username: &str) -> Result<Option<AuthUser>>;
    fn list_users(&self) -> Result<Vec<AuthUser>>;
    fn update_user_password(
        &self,
        id: &str,
        hash: Option<&str>,
        salt: Option<&str>,
    ) -> Result<()>;
    fn delete_user(&self, id: &str) -> Result<bool>;

    // Token operations
    fn create_token(&self, token: &ApiToken) -> Result<()>;
    fn get_token(&self, id: &str) -> Result<Option<ApiToken>>;
    fn get_token_by_secret(&self, secret: &str) -> Result<Option<ApiToken>>;
    fn list_tokens(&self) -> Result<Vec<ApiToken>>;
    fn list_user_tokens(&self, user_id: &str) -> Result<Vec<ApiToken>>;
    fn delete_token(&self, id: &str) -> Result<bool>;

    // Group operations
    fn create_group(&self, group: &Group) -> Result<()>;
    fn get_group(&self, id: &str) -> Result<Option<Group>>;
    fn get_group_by_name(&self, name: &str) -> Result<Option<Group>>;
    fn list_groups(&self) -> Result<Vec<Group>>;
    fn delete_group(&self, id: &str) -> Result<bool>;

    // Group membership (stored on the member's group list)
    fn add_user_to_group(&self, user_id: &str, group_id: &str) -> Result<()>;
    fn remove_user_from_group(&self, user_id: &str, group_id: &str) -> Result<bool>;
    fn add_token_to_group(&self, token_id: &str, group_id: &str) -> Result<()>;
    fn remove_token_from_group(&self, token_id: &str, group_id: &str) -> Result<bool>;
    fn list_group_users(&self, group_id: &str) -> Result<Vec<AuthUser>>;
    fn list_group_tokens(&self, group_id: &str) -> Result<Vec<ApiToken>>;

    // Grant operations
    fn create_grant(&self, grant: &PermissionGrant) -> Result<()>;
    fn get_grant(&self, id: &str) -> Result<Option<PermissionGrant>>;
    fn list_grants_for_target(&self, target: &GrantTarget) -> Result<Vec<PermissionGrant>>;
    fn delete_grant(&self, id: &str) -> Result<bool>;
    fn delete_matching_grant(
        &self,
        permission: Permission,
        target: &GrantTarget,
        project: Option<&str>,
    ) -> Result<bool>;

    fn close(&self) -> Result<()>;
}
