use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub admin: AdminConfig,
    pub auth: AuthConfig,
    /// Upstream registries to consult on local misses, lowest priority first.
    #[serde(rename = "mirror")]
    pub mirrors: Vec<MirrorConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdminConfig {
    pub enabled: bool,
    pub username: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// When false, user and group management routes are not exposed.
    pub enabled: bool,
    /// When true, requests without credentials act as an anonymous caller.
    pub allow_anonymous: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MirrorConfig {
    pub name: String,
    #[serde(default)]
    pub priority: i64,
    pub index_url: String,
    #[serde(default)]
    pub package_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: ServerConfig =
            toml::from_str(&raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.admin.enabled && self.admin.password.as_deref().unwrap_or("").is_empty() {
            return Err(Error::Config(
                "admin.password is required when the admin account is enabled".to_string(),
            ));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid bind address: {e}")))
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("depot.db")
    }

    #[must_use]
    pub fn index_root(&self) -> PathBuf {
        self.data_dir.join("index")
    }

    /// Mirrors in query order.
    #[must_use]
    pub fn sorted_mirrors(&self) -> Vec<MirrorConfig> {
        let mut mirrors = self.mirrors.clone();
        mirrors.sort_by_key(|m| m.priority);
        mirrors
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            admin: AdminConfig::default(),
            auth: AuthConfig::default(),
            mirrors: Vec::new(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            username: "admin".to_string(),
            password: None,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_anonymous: false,
        }
    }
}
