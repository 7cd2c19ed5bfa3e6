#![forbid(unsafe_code)]

//! Aggregation of Application, Team and Template custom resources across
//! all clusters, and the topology graph assembled from application
//! dependencies. Each view is refreshed on demand; there is no background
//! task.

mod teams;
pub mod topology;

use std::sync::Arc;

use kobs_core::Error;
use kobs_k8s_api::TemplateSpec;
use kobs_k8s_clusters::Registry;

pub use self::{
    teams::TeamView,
    topology::{Edge, Node, Topology},
};

pub struct Index {
    registry: Arc<Registry>,
}

impl Index {
    pub fn new(registry: Arc<Registry>) -> Arc<Self> {
        Arc::new(Self { registry })
    }

    /// The teams view: every team across all clusters, de-duplicated by
    /// name (first occurrence wins), with the applications owned by each
    /// team attached.
    pub async fn teams(&self) -> Result<Vec<TeamView>, Error> {
        let teams = self.registry.get_teams().await;
        let clusters = self.registry.get_clusters();
        let applications = self.registry.get_applications(&clusters, &[]).await?;
        Ok(teams::build(teams, &applications))
    }

    /// The templates view: the union of templates across clusters,
    /// de-duplicated by name.
    pub async fn templates(&self) -> Result<Vec<TemplateSpec>, Error> {
        let mut seen = ahash::AHashSet::new();
        let templates = self
            .registry
            .get_templates()
            .await
            .into_iter()
            .filter(|template| seen.insert(template.name.clone()))
            .collect();
        Ok(templates)
    }

    /// The topology for the requested clusters and namespaces. The global
    /// graph is assembled from all applications across all clusters and
    /// filtered per request.
    pub async fn topology(
        &self,
        clusters: &[String],
        namespaces: &[String],
    ) -> Result<Topology, Error> {
        for cluster in clusters {
            self.registry.cluster(cluster)?;
        }

        let all = self.registry.get_clusters();
        let applications = self.registry.get_applications(&all, &[]).await?;
        let topology = Topology::build(&applications);
        Ok(topology.generate(clusters, namespaces))
    }
}
