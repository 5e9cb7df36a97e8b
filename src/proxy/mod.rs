use std::time::Duration;

use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;

use crate::config::MirrorConfig;
use crate::error::{Error, Result};
use crate::server::dto::{Package, ProjectDetail, SIMPLE_V1_JSON};

const MIRROR_TIMEOUT: Duration = Duration::from_secs(10);

/// Queries upstream mirrors on local misses. Mirrors are consulted in
/// ascending priority; the first success wins and later mirrors are
/// never contacted. Results are not cached.
pub struct ProxyFederator {
    client: Client,
    mirrors: Vec<MirrorConfig>,
}

impl ProxyFederator {
    pub fn new(mut mirrors: Vec<MirrorConfig>) -> Result<Self> {
        mirrors.sort_by_key(|m| m.priority);
        let client = Client::builder().timeout(MIRROR_TIMEOUT).build()?;
        Ok(Self { client, mirrors })
    }

    /// Simple-API project detail from the first mirror that has the
    /// project. `NotFound` once every mirror has been exhausted.
    pub async fn resolve_index(&self, name: &str) -> Result<ProjectDetail> {
        for mirror in &self.mirrors {
            let url = format!("{}/{}", mirror.index_url.trim_end_matches('/'), name);
            match self.fetch::<ProjectDetail>(&url, mirror, true).await {
                Ok(detail) => {
                    tracing::debug!("Mirror '{}' answered index for '{}'", mirror.name, name);
                    return Ok(detail);
                }
                Err(e) => {
                    tracing::debug!("Mirror '{}' skipped for '{}': {}", mirror.name, name, e);
                }
            }
        }
        Err(Error::NotFound)
    }

    /// Package detail from the first mirror that has it. Mirrors
    /// without a configured package URL are skipped. The result is
    /// marked non-local.
    pub async fn resolve_package(&self, name: &str, version: Option<&str>) -> Result<Package> {
        for mirror in &self.mirrors {
            let Some(package_url) = &mirror.package_url else {
                continue;
            };
            let base = package_url.trim_end_matches('/');
            let url = match version {
                Some(v) => format!("{base}/{name}/{v}"),
                None => format!("{base}/{name}"),
            };
            match self.fetch::<Package>(&url, mirror, false).await {
                Ok(mut package) => {
                    tracing::debug!("Mirror '{}' answered detail for '{}'", mirror.name, name);
                    package.local = false;
                    return Ok(package);
                }
                Err(e) => {
                    tracing::debug!("Mirror '{}' skipped for '{}': {}", mirror.name, name, e);
                }
            }
        }
        Err(Error::NotFound)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        url: &str,
        mirror: &MirrorConfig,
        simple: bool,
    ) -> Result<T> {
        let mut request = self.client.get(url);
        if simple {
            request = request.header(ACCEPT, SIMPLE_V1_JSON);
        }
        if let Some(username) = &mirror.username {
            request = request.basic_auth(username, mirror.password.as_deref());
        }
        let response = request.send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirror(name: &str, priority: i64) -> MirrorConfig {
        MirrorConfig {
            name: name.to_string(),
            priority,
            index_url: format!("http://{name}.invalid/simple"),
            package_url: None,
            username: None,
            password: None,
        }
    }

    #[test]
    fn test_mirrors_ordered_by_priority() {
        let federator =
            ProxyFederator::new(vec![mirror("b", 20), mirror("a", 1), mirror("m", 10)]).unwrap();
        let order: Vec<&str> = federator.mirrors.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(order, vec!["a", "m", "b"]);
    }

    #[tokio::test]
    async fn test_no_mirrors_is_not_found() {
        let federator = ProxyFederator::new(Vec::new()).unwrap();
        assert!(matches!(
            federator.resolve_index("demo").await,
            Err(Error::NotFound)
        ));
        assert!(matches!(
            federator.resolve_package("demo", None).await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_mirrors_without_package_url_skipped() {
        // The only mirror has no package endpoint, so the package
        // lookup exhausts without a network call.
        let federator = ProxyFederator::new(vec![mirror("a", 1)]).unwrap();
        assert!(matches!(
            federator.resolve_package("demo", Some("1.0")).await,
            Err(Error::NotFound)
        ));
    }
}
