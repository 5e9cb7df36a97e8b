use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::Store;
use super::schema::SCHEMA;
use crate::error::{Error, Result};
use crate::types::*;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_groups(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_else(|e| {
        tracing::error!("Invalid group list in database: '{}' - {}", s, e);
        Vec::new()
    })
}

fn format_groups(groups: &[String]) -> String {
    serde_json::to_string(groups).unwrap_or_else(|_| "[]".to_string())
}

/// Maps UNIQUE constraint violations to AlreadyExists.
fn insert_err(e: rusqlite::Error) -> Error {
    if let rusqlite::Error::SqliteFailure(ref err, _) = e {
        if err.code == rusqlite::ErrorCode::ConstraintViolation {
            return Error::AlreadyExists;
        }
    }
    Error::Database(e)
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<AuthUser> {
    Ok(AuthUser {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        password_salt: row.get(3)?,
        groups: parse_groups(&row.get::<_, String>(4)?),
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn row_to_token(row: &Row<'_>) -> rusqlite::Result<ApiToken> {
    Ok(ApiToken {
        id: row.get(0)?,
        secret: row.get(1)?,
        linked_user: row.get(2)?,
        description: row.get(3)?,
        groups: parse_groups(&row.get::<_, String>(4)?),
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn row_to_group(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        name: row.get(1)?,
        display_name: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
    })
}

fn row_to_grant(row: &Row<'_>) -> rusqlite::Result<PermissionGrant> {
    let permission_str: String = row.get(1)?;
    let permission = Permission::parse(&permission_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("invalid permission: {permission_str}").into(),
        )
    })?;

    let target_kind: String = row.get(2)?;
    let target_id: String = row.get(3)?;
    let target = match target_kind.as_str() {
        "group" => GrantTarget::Group(target_id),
        _ => GrantTarget::Principal(target_id),
    };

    Ok(PermissionGrant {
        id: row.get(0)?,
        permission,
        target,
        project: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

const USER_COLS: &str = "id, username, password_hash, password_salt, groups_json, created_at";
const TOKEN_COLS: &str = "id, secret, linked_user, description, groups_json, created_at";
const GROUP_COLS: &str = "id, name, display_name, created_at";
const GRANT_COLS: &str = "id, permission, target_kind, target_id, project, created_at";

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // User operations

    fn create_user(&self, user: &AuthUser) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO users (id, username, password_hash, password_salt, groups_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user.id,
                    user.username,
                    user.password_hash,
                    user.password_salt,
                    format_groups(&user.groups),
                    format_datetime(&user.created_at),
                ],
            )
            .map_err(insert_err)?;
        Ok(())
    }

    fn get_user(&self, id: &str) -> Result<Option<AuthUser>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLS} FROM users WHERE id = ?1"),
            params![id],
            row_to_user,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<AuthUser>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLS} FROM users WHERE username = ?1"),
            params![username],
            row_to_user,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_users(&self) -> Result<Vec<AuthUser>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("SELECT {USER_COLS} FROM users ORDER BY username"))?;
        let rows = stmt.query_map([], row_to_user)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_user_password(
        &self,
        id: &str,
        hash: Option<&str>,
        salt: Option<&str>,
    ) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE users SET password_hash = ?1, password_salt = ?2 WHERE id = ?3",
            params![hash, salt, id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_user(&self, id: &str) -> Result<bool> {
        let conn = self.conn();

        // Grants targeting the user's tokens go first; the token rows
        // themselves are removed by the linked_user cascade.
        let token_ids: Vec<String> = {
            let mut stmt = conn.prepare("SELECT id FROM tokens WHERE linked_user = ?1")?;
            let rows = stmt.query_map(params![id], |row| row.get(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        for token_id in &token_ids {
            conn.execute(
                "DELETE FROM grants WHERE target_kind = 'principal' AND target_id = ?1",
                params![token_id],
            )?;
        }

        conn.execute(
            "DELETE FROM grants WHERE target_kind = 'principal' AND target_id = ?1",
            params![id],
        )?;

        let rows = conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Token operations

    fn create_token(&self, token: &ApiToken) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO tokens (id, secret, linked_user, description, groups_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    token.id,
                    token.secret,
                    token.linked_user,
                    token.description,
                    format_groups(&token.groups),
                    format_datetime(&token.created_at),
                ],
            )
            .map_err(insert_err)?;
        Ok(())
    }

    fn get_token(&self, id: &str) -> Result<Option<ApiToken>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TOKEN_COLS} FROM tokens WHERE id = ?1"),
            params![id],
            row_to_token,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_token_by_secret(&self, secret: &str) -> Result<Option<ApiToken>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TOKEN_COLS} FROM tokens WHERE secret = ?1"),
            params![secret],
            row_to_token,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_tokens(&self) -> Result<Vec<ApiToken>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("SELECT {TOKEN_COLS} FROM tokens ORDER BY created_at"))?;
        let rows = stmt.query_map([], row_to_token)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_user_tokens(&self, user_id: &str) -> Result<Vec<ApiToken>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TOKEN_COLS} FROM tokens WHERE linked_user = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![user_id], row_to_token)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_token(&self, id: &str) -> Result<bool> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM grants WHERE target_kind = 'principal' AND target_id = ?1",
            params![id],
        )?;
        let rows = conn.execute("DELETE FROM tokens WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Group operations

    fn create_group(&self, group: &Group) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO groups (id, name, display_name, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    group.id,
                    group.name,
                    group.display_name,
                    format_datetime(&group.created_at),
                ],
            )
            .map_err(insert_err)?;
        Ok(())
    }

    fn get_group(&self, id: &str) -> Result<Option<Group>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {GROUP_COLS} FROM groups WHERE id = ?1"),
            params![id],
            row_to_group,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_group_by_name(&self, name: &str) -> Result<Option<Group>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {GROUP_COLS} FROM groups WHERE name = ?1"),
            params![name],
            row_to_group,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_groups(&self) -> Result<Vec<Group>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {GROUP_COLS} FROM groups ORDER BY name"))?;
        let rows = stmt.query_map([], row_to_group)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_group(&self, id: &str) -> Result<bool> {
        let conn = self.conn();

        conn.execute(
            "DELETE FROM grants WHERE target_kind = 'group' AND target_id = ?1",
            params![id],
        )?;

        strip_group_membership(&conn, "users", id)?;
        strip_group_membership(&conn, "tokens", id)?;

        let rows = conn.execute("DELETE FROM groups WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Group membership

    fn add_user_to_group(&self, user_id: &str, group_id: &str) -> Result<()> {
        add_member(&self.conn(), "users", user_id, group_id)
    }

    fn remove_user_from_group(&self, user_id: &str, group_id: &str) -> Result<bool> {
        remove_member(&self.conn(), "users", user_id, group_id)
    }

    fn add_token_to_group(&self, token_id: &str, group_id: &str) -> Result<()> {
        add_member(&self.conn(), "tokens", token_id, group_id)
    }

    fn remove_token_from_group(&self, token_id: &str, group_id: &str) -> Result<bool> {
        remove_member(&self.conn(), "tokens", token_id, group_id)
    }

    fn list_group_users(&self, group_id: &str) -> Result<Vec<AuthUser>> {
        Ok(self
            .list_users()?
            .into_iter()
            .filter(|u| u.groups.iter().any(|g| g == group_id))
            .collect())
    }

    fn list_group_tokens(&self, group_id: &str) -> Result<Vec<ApiToken>> {
        Ok(self
            .list_tokens()?
            .into_iter()
            .filter(|t| t.groups.iter().any(|g| g == group_id))
            .collect())
    }

    // Grant operations

    fn create_grant(&self, grant: &PermissionGrant) -> Result<()> {
        let conn = self.conn();

        // Granting the same permission twice is a no-op.
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM grants
                 WHERE permission = ?1 AND target_kind = ?2 AND target_id = ?3 AND project IS ?4",
                params![
                    grant.permission.as_str(),
                    grant.target.kind(),
                    grant.target.id(),
                    grant.project,
                ],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(());
        }

        conn.execute(
            "INSERT INTO grants (id, permission, target_kind, target_id, project, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                grant.id,
                grant.permission.as_str(),
                grant.target.kind(),
                grant.target.id(),
                grant.project,
                format_datetime(&grant.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_grant(&self, id: &str) -> Result<Option<PermissionGrant>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {GRANT_COLS} FROM grants WHERE id = ?1"),
            params![id],
            row_to_grant,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_grants_for_target(&self, target: &GrantTarget) -> Result<Vec<PermissionGrant>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {GRANT_COLS} FROM grants WHERE target_kind = ?1 AND target_id = ?2"
        ))?;
        let rows = stmt.query_map(params![target.kind(), target.id()], row_to_grant)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_grant(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM grants WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn delete_matching_grant(
        &self,
        permission: Permission,
        target: &GrantTarget,
        project: Option<&str>,
    ) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM grants
             WHERE permission = ?1 AND target_kind = ?2 AND target_id = ?3 AND project IS ?4",
            params![permission.as_str(), target.kind(), target.id(), project],
        )?;
        Ok(rows > 0)
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn member_groups(conn: &Connection, table: &str, member_id: &str) -> Result<Vec<String>> {
    let groups_json: String = conn
        .query_row(
            &format!("SELECT groups_json FROM {table} WHERE id = ?1"),
            params![member_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(Error::NotFound)?;
    Ok(parse_groups(&groups_json))
}

fn write_member_groups(
    conn: &Connection,
    table: &str,
    member_id: &str,
    groups: &[String],
) -> Result<()> {
    conn.execute(
        &format!("UPDATE {table} SET groups_json = ?1 WHERE id = ?2"),
        params![format_groups(groups), member_id],
    )?;
    Ok(())
}

fn add_member(conn: &Connection, table: &str, member_id: &str, group_id: &str) -> Result<()> {
    let mut groups = member_groups(conn, table, member_id)?;
    if !groups.iter().any(|g| g == group_id) {
        groups.push(group_id.to_string());
        write_member_groups(conn, table, member_id, &groups)?;
    }
    Ok(())
}

fn remove_member(
    conn: &Connection,
    table: &str,
    member_id: &str,
    group_id: &str,
) -> Result<bool> {
    let mut groups = member_groups(conn, table, member_id)?;
    let before = groups.len();
    groups.retain(|g| g != group_id);
    if groups.len() == before {
        return Ok(false);
    }
    write_member_groups(conn, table, member_id, &groups)?;
    Ok(true)
}

fn strip_group_membership(conn: &Connection, table: &str, group_id: &str) -> Result<()> {
    let members: Vec<(String, String)> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT id, groups_json FROM {table} WHERE groups_json LIKE '%' || ?1 || '%'"
        ))?;
        let rows = stmt.query_map(params![group_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()?
    };

    for (member_id, groups_json) in members {
        let mut groups = parse_groups(&groups_json);
        groups.retain(|g| g != group_id);
        write_member_groups(conn, table, &member_id, &groups)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("depot.db")).unwrap();
        store.initialize().unwrap();
        (dir, store)
    }

    fn user(id: &str, username: &str) -> AuthUser {
        AuthUser {
            id: id.to_string(),
            username: username.to_string(),
            password_hash: None,
            password_salt: None,
            groups: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn token(id: &str, secret: &str, linked_user: Option<&str>) -> ApiToken {
        ApiToken {
            id: id.to_string(),
            secret: secret.to_string(),
            linked_user: linked_user.map(str::to_string),
            description: None,
            groups: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn grant(id: &str, permission: Permission, target: GrantTarget, project: Option<&str>) -> PermissionGrant {
        PermissionGrant {
            id: id.to_string(),
            permission,
            target,
            project: project.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_user_roundtrip_and_duplicate() {
        let (_dir, store) = open_store();
        store.create_user(&user("u1", "alice")).unwrap();

        let found = store.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(found.id, "u1");
        assert!(found.is_passwordless());

        let err = store.create_user(&user("u2", "alice")).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists));
    }

    #[test]
    fn test_group_membership() {
        let (_dir, store) = open_store();
        store.create_user(&user("u1", "alice")).unwrap();

        store.add_user_to_group("u1", "g1").unwrap();
        store.add_user_to_group("u1", "g1").unwrap();

        let found = store.get_user("u1").unwrap().unwrap();
        assert_eq!(found.groups, vec!["g1".to_string()]);

        assert!(store.remove_user_from_group("u1", "g1").unwrap());
        assert!(!store.remove_user_from_group("u1", "g1").unwrap());
    }

    #[test]
    fn test_grant_idempotent() {
        let (_dir, store) = open_store();
        let target = GrantTarget::Principal("u1".to_string());

        store
            .create_grant(&grant("gr1", Permission::PKG_VIEW, target.clone(), Some("demo")))
            .unwrap();
        store
            .create_grant(&grant("gr2", Permission::PKG_VIEW, target.clone(), Some("demo")))
            .unwrap();

        let grants = store.list_grants_for_target(&target).unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].id, "gr1");
    }

    #[test]
    fn test_server_grant_idempotent_without_project() {
        let (_dir, store) = open_store();
        let target = GrantTarget::Principal("u1".to_string());

        store
            .create_grant(&grant("gr1", Permission::META_CREATE, target.clone(), None))
            .unwrap();
        store
            .create_grant(&grant("gr2", Permission::META_CREATE, target.clone(), None))
            .unwrap();

        assert_eq!(store.list_grants_for_target(&target).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_user_cascades() {
        let (_dir, store) = open_store();
        store.create_user(&user("u1", "alice")).unwrap();
        store.create_token(&token("t1", "secret1", Some("u1"))).unwrap();

        let user_target = GrantTarget::Principal("u1".to_string());
        let token_target = GrantTarget::Principal("t1".to_string());
        store
            .create_grant(&grant("gr1", Permission::PKG_EDIT, user_target.clone(), Some("demo")))
            .unwrap();
        store
            .create_grant(&grant("gr2", Permission::PKG_VIEW, token_target.clone(), Some("demo")))
            .unwrap();

        assert!(store.delete_user("u1").unwrap());
        assert!(store.get_token("t1").unwrap().is_none());
        assert!(store.list_grants_for_target(&user_target).unwrap().is_empty());
        assert!(store.list_grants_for_target(&token_target).unwrap().is_empty());
    }

    #[test]
    fn test_delete_group_strips_members_and_grants() {
        let (_dir, store) = open_store();
        store.create_user(&user("u1", "alice")).unwrap();
        store.create_token(&token("t1", "secret1", None)).unwrap();
        store
            .create_group(&Group {
                id: "g1".to_string(),
                name: "devs".to_string(),
                display_name: None,
                created_at: Utc::now(),
            })
            .unwrap();

        store.add_user_to_group("u1", "g1").unwrap();
        store.add_token_to_group("t1", "g1").unwrap();

        let target = GrantTarget::Group("g1".to_string());
        store
            .create_grant(&grant("gr1", Permission::PKG_MANAGE, target.clone(), Some("demo")))
            .unwrap();

        assert_eq!(store.list_group_users("g1").unwrap().len(), 1);

        assert!(store.delete_group("g1").unwrap());
        assert!(store.get_user("u1").unwrap().unwrap().groups.is_empty());
        assert!(store.get_token("t1").unwrap().unwrap().groups.is_empty());
        assert!(store.list_grants_for_target(&target).unwrap().is_empty());
    }

    #[test]
    fn test_delete_matching_grant() {
        let (_dir, store) = open_store();
        let target = GrantTarget::Principal("u1".to_string());
        store
            .create_grant(&grant("gr1", Permission::PKG_VIEW, target.clone(), Some("demo")))
            .unwrap();

        assert!(
            store
                .delete_matching_grant(Permission::PKG_VIEW, &target, Some("demo"))
                .unwrap()
        );
        assert!(
            !store
                .delete_matching_grant(Permission::PKG_VIEW, &target, Some("demo"))
                .unwrap()
        );
    }
}
