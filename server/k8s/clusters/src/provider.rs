use std::{sync::Arc, time::Duration};

use kube::config::{KubeConfigOptions, Kubeconfig};
use tracing::info;

use kobs_core::{slug::slugify, Error};

use crate::client::Cluster;

/// One entry of the `clusters.providers` configuration list.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub provider: String,
    #[serde(default)]
    pub incluster: Option<InClusterConfig>,
    #[serde(default)]
    pub kubeconfig: Option<KubeconfigConfig>,
}

/// A single cluster from the ambient service-account credentials.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InClusterConfig {
    pub name: String,
}

/// Zero or more clusters, one per context of a kubeconfig file.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeconfigConfig {
    pub path: String,
}

impl ProviderConfig {
    /// Returns the cluster clients of this provider entry.
    pub async fn clusters(&self, cache_duration: Duration) -> Result<Vec<Arc<Cluster>>, Error> {
        match self.provider.as_str() {
            "incluster" => {
                let config = self
                    .incluster
                    .as_ref()
                    .ok_or_else(|| Error::configuration("missing incluster configuration"))?;
                incluster(&config.name, cache_duration).await.map(|c| vec![c])
            }
            "kubeconfig" => {
                let config = self
                    .kubeconfig
                    .as_ref()
                    .ok_or_else(|| Error::configuration("missing kubeconfig configuration"))?;
                kubeconfig(&config.path, cache_duration).await
            }
            provider => Err(Error::configuration(format!(
                "invalid provider: {provider}"
            ))),
        }
    }
}

async fn incluster(name: &str, cache_duration: Duration) -> Result<Arc<Cluster>, Error> {
    let config = kube::Config::incluster().map_err(Error::configuration)?;
    let client = kube::Client::try_from(config).map_err(Error::configuration)?;

    let name = slugify(name);
    info!(cluster = %name, "loaded in-cluster client");
    Ok(Cluster::new(name, client, cache_duration))
}

async fn kubeconfig(path: &str, cache_duration: Duration) -> Result<Vec<Arc<Cluster>>, Error> {
    let kubeconfig = Kubeconfig::read_from(path).map_err(Error::configuration)?;

    let mut clusters = Vec::new();
    for context in &kubeconfig.contexts {
        let options = KubeConfigOptions {
            context: Some(context.name.clone()),
            ..KubeConfigOptions::default()
        };
        let config = kube::Config::from_custom_kubeconfig(kubeconfig.clone(), &options)
            .await
            .map_err(Error::configuration)?;
        let client = kube::Client::try_from(config).map_err(Error::configuration)?;

        let name = slugify(&context.name);
        info!(cluster = %name, context = %context.name, "loaded kubeconfig context");
        clusters.push(Cluster::new(name, client, cache_duration));
    }

    Ok(clusters)
}
