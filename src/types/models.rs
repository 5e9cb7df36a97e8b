use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Permission;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub username: String,
    /// Hex PBKDF2 hash. None means the account is passwordless.
    #[serde(skip)]
    pub password_hash: Option<String>,
    #[serde(skip)]
    pub password_salt: Option<String>,
    /// Group ids this user belongs to.
    pub groups: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl AuthUser {
    #[must_use]
    pub fn is_passwordless(&self) -> bool {
        self.password_hash.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiToken {
    pub id: String,
    #[serde(skip)]
    pub secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Group ids this token belongs to.
    pub groups: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Who a grant applies to. Users and tokens share the principal id space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target_kind", content = "target_id", rename_all = "snake_case")]
pub enum GrantTarget {
    Principal(String),
    Group(String),
}

impl GrantTarget {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            GrantTarget::Principal(_) => "principal",
            GrantTarget::Group(_) => "group",
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            GrantTarget::Principal(id) | GrantTarget::Group(id) => id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub id: String,
    pub permission: Permission,
    #[serde(flatten)]
    pub target: GrantTarget,
    /// Required for package permissions, absent for server permissions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub enum Principal {
    User(AuthUser),
    Token(ApiToken),
    /// The admin account configured in the server config. Never stored.
    Admin { username: String },
    Anonymous,
}

impl Principal {
    /// Stored principal id, if any. Admin and anonymous callers have none.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Principal::User(u) => Some(&u.id),
            Principal::Token(t) => Some(&t.id),
            Principal::Admin { .. } | Principal::Anonymous => None,
        }
    }

    #[must_use]
    pub fn group_ids(&self) -> &[String] {
        match self {
            Principal::User(u) => &u.groups,
            Principal::Token(t) => &t.groups,
            Principal::Admin { .. } | Principal::Anonymous => &[],
        }
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        match self {
            Principal::User(u) => &u.username,
            Principal::Token(t) => t.description.as_deref().unwrap_or(&t.id),
            Principal::Admin { username } => username,
            Principal::Anonymous => "anonymous",
        }
    }

    /// True only for the configured admin account. Grant-based admin
    /// status is resolved by the PermissionResolver.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self, Principal::Admin { .. })
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Principal::User(_) => "user",
            Principal::Token(_) => "token",
            Principal::Admin { .. } => "admin",
            Principal::Anonymous => "anonymous",
        }
    }
}

/// Upload metadata for one distribution file, persisted as the
/// `{filename}.json` sidecar next to the artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(default)]
    pub metadata_version: Option<String>,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub platform: Option<Vec<String>>,
    #[serde(default)]
    pub supported_platform: Option<Vec<String>>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub description_content_type: Option<String>,
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default)]
    pub home_page: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_email: Option<String>,
    #[serde(default)]
    pub maintainer: Option<String>,
    #[serde(default)]
    pub maintainer_email: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub classifiers: Option<Vec<String>>,
    #[serde(default)]
    pub requires_dist: Option<Vec<String>>,
    #[serde(default)]
    pub requires_python: Option<String>,
    #[serde(default)]
    pub requires_external: Option<Vec<String>>,
    #[serde(default)]
    pub project_urls: Option<Vec<String>>,
    #[serde(default)]
    pub provides_dist: Option<Vec<String>>,
    #[serde(default)]
    pub obsoletes_dist: Option<Vec<String>>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub filetype: Option<String>,
    #[serde(default)]
    pub pyversion: Option<String>,
    #[serde(default)]
    pub md5_digest: Option<String>,
    #[serde(default)]
    pub sha256_digest: Option<String>,
    #[serde(default)]
    pub blake2_256_digest: Option<String>,
    pub filename: String,
    pub upload_time: DateTime<Utc>,
}

impl FileRecord {
    /// Renders the core-metadata document served for `{filename}.metadata`:
    /// one `Key: value` line per populated field, list fields repeating
    /// the key.
    #[must_use]
    pub fn metadata_document(&self) -> String {
        let mut out = String::new();

        push_field(&mut out, "Metadata-Version", self.metadata_version.as_deref());
        push_field(&mut out, "Name", Some(&self.name));
        push_field(&mut out, "Version", Some(&self.version));
        push_list(&mut out, "Platform", self.platform.as_deref());
        push_list(&mut out, "Supported-Platform", self.supported_platform.as_deref());
        push_field(&mut out, "Summary", self.summary.as_deref());
        push_field(&mut out, "Description", self.description.as_deref());
        push_field(
            &mut out,
            "Description-Content-Type",
            self.description_content_type.as_deref(),
        );
        push_field(&mut out, "Keywords", self.keywords.as_deref());
        push_field(&mut out, "Home-Page", self.home_page.as_deref());
        push_field(&mut out, "Download-Url", self.download_url.as_deref());
        push_field(&mut out, "Author", self.author.as_deref());
        push_field(&mut out, "Author-Email", self.author_email.as_deref());
        push_field(&mut out, "Maintainer", self.maintainer.as_deref());
        push_field(&mut out, "Maintainer-Email", self.maintainer_email.as_deref());
        push_field(&mut out, "License", self.license.as_deref());
        push_list(&mut out, "Classifier", self.classifiers.as_deref());
        push_list(&mut out, "Requires-Dist", self.requires_dist.as_deref());
        push_field(&mut out, "Requires-Python", self.requires_python.as_deref());
        push_list(&mut out, "Requires-External", self.requires_external.as_deref());
        push_list(&mut out, "Project-URL", self.project_urls.as_deref());
        push_list(&mut out, "Provides-Dist", self.provides_dist.as_deref());
        push_list(&mut out, "Obsoletes-Dist", self.obsoletes_dist.as_deref());
        push_field(&mut out, "Comment", self.comment.as_deref());

        out
    }
}

fn push_field(out: &mut String, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        if !value.is_empty() {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        }
    }
}

fn push_list(out: &mut String, key: &str, values: Option<&[String]>) {
    if let Some(values) = values {
        for value in values {
            push_field(out, key, Some(value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> FileRecord {
        FileRecord {
            metadata_version: Some("2.1".into()),
            name: "demo".into(),
            version: "1.0".into(),
            platform: None,
            supported_platform: None,
            summary: Some("A demo package".into()),
            description: None,
            description_content_type: None,
            keywords: None,
            home_page: None,
            download_url: None,
            author: Some("Jane".into()),
            author_email: None,
            maintainer: None,
            maintainer_email: None,
            license: None,
            classifiers: Some(vec![
                "Programming Language :: Python :: 3".into(),
                "License :: OSI Approved :: MIT License".into(),
            ]),
            requires_dist: None,
            requires_python: Some(">=3.10".into()),
            requires_external: None,
            project_urls: None,
            provides_dist: None,
            obsoletes_dist: None,
            comment: None,
            filetype: Some("sdist".into()),
            pyversion: Some("source".into()),
            md5_digest: None,
            sha256_digest: None,
            blake2_256_digest: None,
            filename: "demo-1.0.tar.gz".into(),
            upload_time: Utc::now(),
        }
    }

    #[test]
    fn test_metadata_document_repeats_list_keys() {
        let doc = record().metadata_document();
        assert!(doc.contains("Metadata-Version: 2.1\n"));
        assert!(doc.contains("Name: demo\n"));
        assert_eq!(doc.matches("Classifier: ").count(), 2);
        assert!(doc.contains("Requires-Python: >=3.10\n"));
        assert!(!doc.contains("Maintainer"));
    }

    #[test]
    fn test_principal_surface() {
        let anon = Principal::Anonymous;
        assert_eq!(anon.id(), None);
        assert!(anon.group_ids().is_empty());
        assert!(!anon.is_admin());

        let admin = Principal::Admin { username: "admin".into() };
        assert!(admin.is_admin());
        assert_eq!(admin.display_name(), "admin");
        assert_eq!(admin.kind(), "admin");
    }

    #[test]
    fn test_grant_target_serde() {
        let grant = PermissionGrant {
            id: "g1".into(),
            permission: Permission::PKG_VIEW,
            target: GrantTarget::Group("grp".into()),
            project: Some("demo".into()),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&grant).unwrap();
        assert_eq!(json["target_kind"], "group");
        assert_eq!(json["target_id"], "grp");
        assert_eq!(json["permission"], "pkg.view");
    }
}
