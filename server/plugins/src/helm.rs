//! The package-plane adapter. Helm stores one secret per release revision,
//! labelled `owner=helm`, whose `release` field holds a base64-encoded
//! gzip-compressed JSON document. Releases are read straight from those
//! secrets, no Helm binary involved.

use std::io::Read;
use std::sync::Arc;

use base64::Engine;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use kobs_core::{Error, Permissions, User};
use kobs_k8s_clusters::Registry;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions_enabled: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub name: String,
    #[serde(default)]
    pub info: Value,
    #[serde(default)]
    pub chart: Value,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub cluster: String,
}

/// One entry of the permission blob attached to a Helm plugin permission.
#[derive(Clone, Debug, Deserialize)]
pub struct ReleasePermission {
    pub clusters: Vec<String>,
    pub namespaces: Vec<String>,
    pub names: Vec<String>,
}

pub struct Instance {
    config: Config,
    registry: Arc<Registry>,
}

impl Instance {
    pub fn new(config: Config, registry: Arc<Registry>) -> Self {
        Self { config, registry }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn description(&self) -> &str {
        &self.config.description
    }

    /// Lists the latest revision of every release in the given clusters and
    /// namespaces.
    #[instrument(skip(self, user), fields(instance = %self.config.name))]
    pub async fn list_releases(
        &self,
        user: &User,
        clusters: &[String],
        namespaces: &[String],
    ) -> Result<Vec<Release>, Error> {
        let mut releases: Vec<Release> = Vec::new();

        for cluster_name in clusters {
            let cluster = self.registry.cluster(cluster_name)?;
            for namespace in namespaces {
                let secrets = cluster.get_secrets(namespace, "owner=helm").await?;
                for secret in secrets {
                    let release = decode_secret(cluster_name, &secret)?;
                    match releases
                        .iter_mut()
                        .find(|r| r.namespace == release.namespace && r.name == release.name)
                    {
                        Some(existing) if existing.version < release.version => {
                            *existing = release
                        }
                        Some(_) => {}
                        None => releases.push(release),
                    }
                }
            }
        }

        releases.retain(|release| self.is_allowed(user, release));
        releases.sort_by(|a, b| {
            (&a.cluster, &a.namespace, &a.name).cmp(&(&b.cluster, &b.namespace, &b.name))
        });
        Ok(releases)
    }

    /// Returns a single release revision.
    #[instrument(skip(self, user), fields(instance = %self.config.name))]
    pub async fn get_release(
        &self,
        user: &User,
        cluster_name: &str,
        namespace: &str,
        name: &str,
        version: i64,
    ) -> Result<Release, Error> {
        let cluster = self.registry.cluster(cluster_name)?;
        let selector = format!("owner=helm,name={name},version={version}");
        let secrets = cluster.get_secrets(namespace, &selector).await?;
        let secret = match secrets.as_slice() {
            [secret] => secret,
            [] => {
                return Err(Error::validation(format!(
                    "release {name} with version {version} was not found"
                )))
            }
            _ => {
                return Err(Error::upstream(format!(
                    "release {name} with version {version} is ambiguous"
                )))
            }
        };

        let release = decode_secret(cluster_name, secret)?;
        if !self.is_allowed(user, &release) {
            return Err(Error::Authorization(format!(
                "it is not allowed to access the release {name}"
            )));
        }
        Ok(release)
    }

    /// Returns all revisions of a release, latest first.
    #[instrument(skip(self, user), fields(instance = %self.config.name))]
    pub async fn get_release_history(
        &self,
        user: &User,
        cluster_name: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Vec<Release>, Error> {
        let cluster = self.registry.cluster(cluster_name)?;
        let selector = format!("owner=helm,name={name}");
        let secrets = cluster.get_secrets(namespace, &selector).await?;

        let mut releases = Vec::with_capacity(secrets.len());
        for secret in &secrets {
            let release = decode_secret(cluster_name, secret)?;
            if !self.is_allowed(user, &release) {
                return Err(Error::Authorization(format!(
                    "it is not allowed to access the release {name}"
                )));
            }
            releases.push(release);
        }
        releases.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(releases)
    }

    fn is_allowed(&self, user: &User, release: &Release) -> bool {
        if !self.config.permissions_enabled {
            return true;
        }
        has_release_access(&user.permissions, &self.config.name, release)
    }
}

fn has_release_access(permissions: &Permissions, instance: &str, release: &Release) -> bool {
    for blob in permissions.plugin_permissions(instance, "helm") {
        let entries: Vec<ReleasePermission> = match serde_json::from_value(blob.clone()) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries {
            let cluster_ok = entry
                .clusters
                .iter()
                .any(|c| c == "*" || c == &release.cluster);
            let namespace_ok = entry
                .namespaces
                .iter()
                .any(|n| n == "*" || n == &release.namespace);
            let name_ok = entry.names.iter().any(|n| n == "*" || n == &release.name);
            if cluster_ok && namespace_ok && name_ok {
                return true;
            }
        }
    }
    false
}

fn decode_secret(cluster: &str, secret: &kobs_k8s_api::Secret) -> Result<Release, Error> {
    let data = secret
        .data
        .as_ref()
        .and_then(|data| data.get("release"))
        .ok_or_else(|| Error::upstream("helm secret is missing the release field"))?;
    let mut release = decode_release(&data.0)?;
    release.cluster = cluster.to_string();
    if release.namespace.is_empty() {
        release.namespace = secret
            .metadata
            .namespace
            .clone()
            .unwrap_or_default();
    }
    Ok(release)
}

fn decode_release(data: &[u8]) -> Result<Release, Error> {
    let compressed = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(Error::upstream)?;
    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut json = Vec::new();
    decoder.read_to_end(&mut json).map_err(Error::upstream)?;
    serde_json::from_slice(&json).map_err(Error::upstream)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde_json::json;

    use super::*;

    fn encode_release(release: &Value) -> Vec<u8> {
        let json = serde_json::to_vec(release).unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json).unwrap();
        let compressed = encoder.finish().unwrap();
        base64::engine::general_purpose::STANDARD
            .encode(compressed)
            .into_bytes()
    }

    #[test]
    fn releases_are_decoded_from_secret_data() {
        let data = encode_release(&json!({
            "name": "prometheus",
            "version": 3,
            "namespace": "monitoring",
            "info": {"status": "deployed"},
            "chart": {"metadata": {"name": "prometheus", "version": "15.0.0"}},
        }));

        let release = decode_release(&data).unwrap();
        assert_eq!(release.name, "prometheus");
        assert_eq!(release.version, 3);
        assert_eq!(release.namespace, "monitoring");
        assert_eq!(release.info["status"], "deployed");
    }

    #[test]
    fn garbage_data_is_an_upstream_error() {
        assert!(matches!(
            decode_release(b"not base64!!"),
            Err(Error::Upstream(_))
        ));
    }

    #[test]
    fn release_access_matches_all_three_fields() {
        let permissions: Permissions = serde_json::from_value(json!({
            "plugins": [{
                "name": "helm",
                "plugin": "helm",
                "permissions": [[{
                    "clusters": ["prod"],
                    "namespaces": ["*"],
                    "names": ["prometheus"],
                }]],
            }],
            "resources": [],
        }))
        .unwrap();

        let release = Release {
            name: "prometheus".to_string(),
            info: Value::Null,
            chart: Value::Null,
            version: 1,
            namespace: "monitoring".to_string(),
            cluster: "prod".to_string(),
        };
        assert!(has_release_access(&permissions, "helm", &release));

        let other = Release {
            cluster: "staging".to_string(),
            ..release
        };
        assert!(!has_release_access(&permissions, "helm", &other));
    }

    #[test]
    fn release_access_is_matched_by_instance_name() {
        // The grant names the instance, not the plugin family.
        let permissions: Permissions = serde_json::from_value(json!({
            "plugins": [{
                "name": "helm-prod",
                "plugin": "helm",
                "permissions": [[{
                    "clusters": ["*"],
                    "namespaces": ["*"],
                    "names": ["*"],
                }]],
            }],
            "resources": [],
        }))
        .unwrap();

        let release = Release {
            name: "prometheus".to_string(),
            info: Value::Null,
            chart: Value::Null,
            version: 1,
            namespace: "monitoring".to_string(),
            cluster: "prod".to_string(),
        };
        assert!(has_release_access(&permissions, "helm-prod", &release));
        assert!(!has_release_access(&permissions, "helm-staging", &release));
    }
}
