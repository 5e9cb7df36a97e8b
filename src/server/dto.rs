use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::Store;
use crate::types::{FileRecord, Group, Permission, Principal};

/// Media type for simple-API responses and mirror index requests.
pub const SIMPLE_V1_JSON: &str = "application/vnd.pypi.simple.v1+json";

fn default_api_version() -> String {
    "1.1".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMeta {
    #[serde(rename = "api-version", default = "default_api_version")]
    pub api_version: String,
}

impl Default for ApiMeta {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub name: String,
}

/// Simple-API project list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectList {
    #[serde(default)]
    pub meta: ApiMeta,
    pub projects: Vec<ProjectEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileHashes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFile {
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub hashes: FileHashes,
    #[serde(
        rename = "requires-python",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub requires_python: Option<String>,
    #[serde(
        rename = "dist-info-metadata",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub dist_info_metadata: Option<bool>,
}

impl ProjectFile {
    #[must_use]
    pub fn from_record(record: &FileRecord, url_base: &str) -> Self {
        Self {
            filename: record.filename.clone(),
            url: format!(
                "{url_base}/files/{}/{}/{}",
                record.name, record.version, record.filename
            ),
            hashes: FileHashes {
                md5: record.md5_digest.clone(),
                sha256: record.sha256_digest.clone(),
            },
            requires_python: record.requires_python.clone(),
            dist_info_metadata: Some(true),
        }
    }
}

/// Simple-API project detail: file listing across all versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDetail {
    #[serde(default)]
    pub meta: ApiMeta,
    pub name: String,
    pub files: Vec<ProjectFile>,
}

/// JSON-API package info block, shaped after the resolved version's
/// upload metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageInfo {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_email: Option<String>,
    #[serde(default)]
    pub classifiers: Option<Vec<String>>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub description_content_type: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub home_page: Option<String>,
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub maintainer: Option<String>,
    #[serde(default)]
    pub maintainer_email: Option<String>,
    pub name: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub project_urls: Option<Vec<String>>,
    #[serde(default)]
    pub requires_dist: Option<Vec<String>>,
    #[serde(default)]
    pub requires_python: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    pub version: String,
    #[serde(default)]
    pub yanked: bool,
}

impl PackageInfo {
    #[must_use]
    pub fn from_record(record: &FileRecord) -> Self {
        Self {
            author: record.author.clone(),
            author_email: record.author_email.clone(),
            classifiers: record.classifiers.clone(),
            description: record.description.clone(),
            description_content_type: record.description_content_type.clone(),
            download_url: record.download_url.clone(),
            home_page: record.home_page.clone(),
            keywords: record.keywords.clone(),
            license: record.license.clone(),
            maintainer: record.maintainer.clone(),
            maintainer_email: record.maintainer_email.clone(),
            name: record.name.clone(),
            platform: record.platform.as_ref().map(|p| p.join(", ")),
            project_urls: record.project_urls.clone(),
            requires_dist: record.requires_dist.clone(),
            requires_python: record.requires_python.clone(),
            summary: record.summary.clone(),
            version: record.version.clone(),
            yanked: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageUrl {
    #[serde(default)]
    pub comment_text: Option<String>,
    #[serde(default)]
    pub digests: FileHashes,
    pub filename: String,
    #[serde(default)]
    pub packagetype: Option<String>,
    #[serde(default)]
    pub python_version: Option<String>,
    #[serde(default)]
    pub requires_python: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub upload_time: Option<DateTime<Utc>>,
    pub url: String,
    #[serde(default)]
    pub yanked: bool,
}

impl PackageUrl {
    #[must_use]
    pub fn from_record(record: &FileRecord, url_base: &str) -> Self {
        Self {
            comment_text: record.comment.clone(),
            digests: FileHashes {
                md5: record.md5_digest.clone(),
                sha256: record.sha256_digest.clone(),
            },
            filename: record.filename.clone(),
            packagetype: record.filetype.clone(),
            python_version: record.pyversion.clone(),
            requires_python: record.requires_python.clone(),
            size: None,
            upload_time: Some(record.upload_time),
            url: format!(
                "{url_base}/files/{}/{}/{}",
                record.name, record.version, record.filename
            ),
            yanked: false,
        }
    }
}

/// JSON-API package detail. `local` is false for results served from
/// an upstream mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub info: PackageInfo,
    #[serde(default)]
    pub urls: Vec<PackageUrl>,
    #[serde(default = "default_true")]
    pub local: bool,
}

/// Principal view with secrets and hashes stripped.
#[derive(Debug, Clone, Serialize)]
pub struct RedactedPrincipal {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: Option<String>,
    pub groups: Vec<Group>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked: Option<Box<RedactedPrincipal>>,
}

impl RedactedPrincipal {
    pub fn build(principal: &Principal, store: &dyn Store) -> Result<Self> {
        match principal {
            Principal::Anonymous => Ok(Self {
                id: None,
                kind: "anonymous".to_string(),
                name: None,
                groups: Vec::new(),
                linked: None,
            }),
            Principal::Admin { username } => Ok(Self {
                id: Some("_admin".to_string()),
                kind: "admin".to_string(),
                name: Some(username.clone()),
                groups: Vec::new(),
                linked: None,
            }),
            Principal::User(user) => Ok(Self {
                id: Some(user.id.clone()),
                kind: "user".to_string(),
                name: Some(user.username.clone()),
                groups: load_groups(store, &user.groups)?,
                linked: None,
            }),
            Principal::Token(token) => {
                let linked = match &token.linked_user {
                    Some(user_id) => store
                        .get_user(user_id)?
                        .map(|user| Self::build(&Principal::User(user), store))
                        .transpose()?
                        .map(Box::new),
                    None => None,
                };
                Ok(Self {
                    id: Some(token.id.clone()),
                    kind: "token".to_string(),
                    name: token.description.clone(),
                    groups: load_groups(store, &token.groups)?,
                    linked,
                })
            }
        }
    }
}

/// Groups that no longer exist are dropped from the view.
fn load_groups(store: &dyn Store, ids: &[String]) -> Result<Vec<Group>> {
    let mut groups = Vec::new();
    for id in ids {
        if let Some(group) = store.get_group(id)? {
            groups.push(group);
        }
    }
    Ok(groups)
}

/// A grant as exchanged over the API: the permission plus its project
/// scope, without storage ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionSpec {
    pub permission: Permission,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PasswordChangeRequest {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GroupMemberParams {
    pub auth_type: String,
    #[serde(default)]
    pub auth_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateTokenRequest {
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenCreated {
    pub id: String,
    /// Returned exactly once, at creation.
    pub token: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LocalParams {
    #[serde(default)]
    pub local: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> FileRecord {
        serde_json::from_value(serde_json::json!({
            "name": "demo",
            "version": "1.0",
            "filename": "demo-1.0.tar.gz",
            "summary": "A demo",
            "requires_python": ">=3.8",
            "md5_digest": "abc",
            "sha256_digest": "def",
            "upload_time": "2024-01-01T00:00:00Z",
        }))
        .unwrap()
    }

    #[test]
    fn test_project_file_from_record() {
        let file = ProjectFile::from_record(&record(), "http://localhost:8080");
        assert_eq!(
            file.url,
            "http://localhost:8080/files/demo/1.0/demo-1.0.tar.gz"
        );
        assert_eq!(file.hashes.sha256.as_deref(), Some("def"));
        assert_eq!(file.requires_python.as_deref(), Some(">=3.8"));
    }

    #[test]
    fn test_simple_api_field_names() {
        let detail = ProjectDetail {
            meta: ApiMeta::default(),
            name: "demo".to_string(),
            files: vec![ProjectFile::from_record(&record(), "http://h")],
        };
        let value = serde_json::to_value(&detail).unwrap();
        assert_eq!(value["meta"]["api-version"], "1.1");
        assert_eq!(value["files"][0]["requires-python"], ">=3.8");
        assert_eq!(value["files"][0]["dist-info-metadata"], true);
    }

    #[test]
    fn test_package_parses_remote_payload() {
        // A mirror response carries no `local` field; the default marks
        // it local until the caller overrides.
        let package: Package = serde_json::from_value(serde_json::json!({
            "info": {"name": "demo", "version": "2.0"},
            "urls": [],
        }))
        .unwrap();
        assert!(package.local);
        assert_eq!(package.info.version, "2.0");
    }
}
