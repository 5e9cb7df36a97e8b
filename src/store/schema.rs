pub const SCHEMA: &str = r#"
-- Users authenticate with username + password; passwordless accounts
-- have NULL hash and salt
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT,           -- hex PBKDF2-HMAC-SHA256 digest
    password_salt TEXT,           -- hex salt
    groups_json TEXT NOT NULL DEFAULT '[]',  -- group ids, membership lives on the member
    created_at TEXT DEFAULT (datetime('now'))
);

-- Tokens are standalone principals, optionally linked to a user
CREATE TABLE IF NOT EXISTS tokens (
    id TEXT PRIMARY KEY,
    secret TEXT NOT NULL UNIQUE,
    linked_user TEXT REFERENCES users(id) ON DELETE CASCADE,
    description TEXT,
    groups_json TEXT NOT NULL DEFAULT '[]',
    created_at TEXT DEFAULT (datetime('now'))
);

-- Groups bundle principals so grants can be shared
CREATE TABLE IF NOT EXISTS groups (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    display_name TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

-- Permission grants, targeting either a principal or a group.
-- project is NULL for server-scoped (meta.*) permissions.
CREATE TABLE IF NOT EXISTS grants (
    id TEXT PRIMARY KEY,
    permission TEXT NOT NULL,
    target_kind TEXT NOT NULL,    -- 'principal' or 'group'
    target_id TEXT NOT NULL,
    project TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

-- Create indexes
CREATE INDEX IF NOT EXISTS idx_tokens_secret ON tokens(secret);
CREATE INDEX IF NOT EXISTS idx_tokens_linked_user ON tokens(linked_user);
CREATE INDEX IF NOT EXISTS idx_grants_target ON grants(target_kind, target_id);
CREATE INDEX IF NOT EXISTS idx_grants_project ON grants(project);
"#;
