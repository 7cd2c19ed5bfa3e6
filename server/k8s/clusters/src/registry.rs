use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
    time::Duration,
};

use serde::Serialize;
use tracing::{instrument, warn};

use kobs_core::Error;
use kobs_k8s_api::{ApplicationSpec, TeamSpec, TemplateSpec, UserSpec};

use crate::{client::Cluster, crds::Crd, provider::ProviderConfig};

/// Owns all cluster clients. Built once at startup; cluster names are
/// unique across the registry.
pub struct Registry {
    clusters: Vec<Arc<Cluster>>,
}

/// The result of a resource fan-out for one (cluster, namespace) pair. The
/// resource list is the API server's raw response.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceList {
    pub cluster: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub resources: serde_json::Value,
}

impl Registry {
    /// Loads all clusters from the configured providers and spawns one CRD
    /// discovery task per cluster.
    pub async fn load(
        providers: &[ProviderConfig],
        cache_duration: Duration,
    ) -> Result<Arc<Self>, Error> {
        let mut clusters: Vec<Arc<Cluster>> = Vec::new();
        for provider in providers {
            for cluster in provider.clusters(cache_duration).await? {
                if clusters.iter().any(|c| c.name() == cluster.name()) {
                    return Err(Error::configuration(format!(
                        "duplicated cluster name: {}",
                        cluster.name()
                    )));
                }
                clusters.push(cluster);
            }
        }

        clusters.sort_by(|a, b| a.name().cmp(b.name()));
        for cluster in &clusters {
            tokio::spawn(cluster.clone().load_crds());
        }

        Ok(Arc::new(Self { clusters }))
    }

    /// Builds a registry from already constructed clusters. Used by tests
    /// which never talk to a real API server.
    pub fn with_clusters(mut clusters: Vec<Arc<Cluster>>) -> Arc<Self> {
        clusters.sort_by(|a, b| a.name().cmp(b.name()));
        Arc::new(Self { clusters })
    }

    /// The sorted cluster names.
    pub fn get_clusters(&self) -> Vec<String> {
        self.clusters.iter().map(|c| c.name().to_string()).collect()
    }

    /// Looks up a cluster by name. An unknown name is a client error, not a
    /// silent skip.
    pub fn cluster(&self, name: &str) -> Result<&Arc<Cluster>, Error> {
        self.clusters
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| Error::validation(format!("invalid cluster name: {name}")))
    }

    /// The union of the namespace sets of the given clusters, de-duplicated
    /// and sorted. A failing cluster is logged and skipped.
    #[instrument(skip(self))]
    pub async fn get_namespaces(&self, clusters: &[String]) -> Result<Vec<String>, Error> {
        let mut namespaces = BTreeSet::new();
        for name in clusters {
            let cluster = self.cluster(name)?;
            match cluster.get_namespaces().await {
                Ok(names) => namespaces.extend(names),
                Err(error) => {
                    warn!(cluster = %name, %error, "could not get namespaces");
                }
            }
        }
        Ok(namespaces.into_iter().collect())
    }

    /// The union of all clusters' CRDs, de-duplicated by
    /// `resource + "." + path`.
    pub fn get_crds(&self) -> Vec<Crd> {
        let mut seen = HashSet::new();
        let mut crds = Vec::new();
        for cluster in &self.clusters {
            for crd in cluster.crds() {
                if seen.insert(crd.key()) {
                    crds.push(crd);
                }
            }
        }
        crds
    }

    /// Fans a raw resource query out over the Cartesian product of clusters
    /// and namespaces. An empty namespace list means a cluster-scoped
    /// query. Unlike the other fan-outs, any failure aborts the request.
    #[instrument(skip(self))]
    pub async fn get_resources(
        &self,
        clusters: &[String],
        namespaces: &[String],
        api_path: &str,
        resource: &str,
        param_name: &str,
        param: &str,
    ) -> Result<Vec<ResourceList>, Error> {
        let cluster_scoped = [String::new()];
        let namespaces: &[String] = if namespaces.is_empty() {
            &cluster_scoped
        } else {
            namespaces
        };

        let mut lists = Vec::new();
        for name in clusters {
            let cluster = self.cluster(name)?;
            for namespace in namespaces {
                let body = cluster
                    .get_resources(namespace, api_path, resource, param_name, param)
                    .await?;
                let resources = serde_json::from_str(&body).map_err(Error::upstream)?;
                lists.push(ResourceList {
                    cluster: name.clone(),
                    namespace: namespace.clone(),
                    resources,
                });
            }
        }
        Ok(lists)
    }

    /// All applications of the given clusters and namespaces. An empty
    /// namespace list means all namespaces. Per-cluster failures are logged
    /// and the remaining clusters still contribute.
    #[instrument(skip(self))]
    pub async fn get_applications(
        &self,
        clusters: &[String],
        namespaces: &[String],
    ) -> Result<Vec<ApplicationSpec>, Error> {
        let all_namespaces = [String::new()];
        let namespaces: &[String] = if namespaces.is_empty() {
            &all_namespaces
        } else {
            namespaces
        };

        let mut applications = Vec::new();
        for name in clusters {
            let cluster = self.cluster(name)?;
            for namespace in namespaces {
                match cluster.get_applications(namespace).await {
                    Ok(apps) => applications.extend(apps),
                    Err(error) => {
                        warn!(cluster = %name, %namespace, %error, "could not get applications");
                    }
                }
            }
        }
        Ok(applications)
    }

    pub async fn get_application(
        &self,
        cluster: &str,
        namespace: &str,
        name: &str,
    ) -> Result<ApplicationSpec, Error> {
        self.cluster(cluster)?.get_application(namespace, name).await
    }

    /// All teams across all clusters. Partial on per-cluster failure.
    pub async fn get_teams(&self) -> Vec<TeamSpec> {
        let mut teams = Vec::new();
        for cluster in &self.clusters {
            match cluster.get_teams().await {
                Ok(list) => teams.extend(list),
                Err(error) => {
                    warn!(cluster = %cluster.name(), %error, "could not get teams");
                }
            }
        }
        teams
    }

    /// All users across all clusters. Partial on per-cluster failure.
    pub async fn get_users(&self) -> Vec<UserSpec> {
        let mut users = Vec::new();
        for cluster in &self.clusters {
            match cluster.get_users().await {
                Ok(list) => users.extend(list),
                Err(error) => {
                    warn!(cluster = %cluster.name(), %error, "could not get users");
                }
            }
        }
        users
    }

    /// All templates across all clusters. Partial on per-cluster failure.
    pub async fn get_templates(&self) -> Vec<TemplateSpec> {
        let mut templates = Vec::new();
        for cluster in &self.clusters {
            match cluster.get_templates().await {
                Ok(list) => templates.extend(list),
                Err(error) => {
                    warn!(cluster = %cluster.name(), %error, "could not get templates");
                }
            }
        }
        templates
    }
}
