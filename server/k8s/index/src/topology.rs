//! The directed graph of applications and their dependencies, augmented
//! with cluster and namespace grouping nodes.

use ahash::{AHashMap, AHashSet};
use serde::Serialize;

use kobs_k8s_api::ApplicationSpec;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// `<cluster>-<namespace>-<name>` for applications,
    /// `<cluster>-<namespace>` for namespaces, `<cluster>` for clusters.
    pub id: String,
    pub label: String,
    /// The id of the enclosing grouping node; empty for cluster nodes.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub parent: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cluster: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip)]
    source_cluster: String,
    #[serde(skip)]
    source_namespace: String,
    #[serde(skip)]
    target_cluster: String,
    #[serde(skip)]
    target_namespace: String,
}

fn application_id(cluster: &str, namespace: &str, name: &str) -> String {
    format!("{cluster}-{namespace}-{name}")
}

impl Topology {
    /// Assembles the global topology from all applications. Dependencies
    /// missing a cluster or namespace inherit them from the declaring
    /// application. Edges whose source or target does not resolve to an
    /// application node are dropped.
    pub fn build(applications: &[ApplicationSpec]) -> Self {
        let mut nodes = Vec::new();
        let mut ids = AHashSet::new();
        for application in applications {
            let id = application_id(
                &application.cluster,
                &application.namespace,
                &application.name,
            );
            ids.insert(id.clone());
            nodes.push(Node {
                id,
                label: application.name.clone(),
                parent: format!("{}-{}", application.cluster, application.namespace),
                cluster: application.cluster.clone(),
                namespace: application.namespace.clone(),
            });
        }

        let mut edges = Vec::new();
        for application in applications {
            let source = application_id(
                &application.cluster,
                &application.namespace,
                &application.name,
            );
            for dependency in &application.dependencies {
                let cluster = if dependency.cluster.is_empty() {
                    &application.cluster
                } else {
                    &dependency.cluster
                };
                let namespace = if dependency.namespace.is_empty() {
                    &application.namespace
                } else {
                    &dependency.namespace
                };
                let target = application_id(cluster, namespace, &dependency.name);

                edges.push(Edge {
                    id: format!("{source}-{target}"),
                    source: source.clone(),
                    target,
                    description: dependency.description.clone(),
                    source_cluster: application.cluster.clone(),
                    source_namespace: application.namespace.clone(),
                    target_cluster: cluster.clone(),
                    target_namespace: namespace.clone(),
                });
            }
        }

        // Dangling-edge filter: applied once all nodes are known.
        edges.retain(|edge| ids.contains(&edge.source) && ids.contains(&edge.target));

        Self { nodes, edges }
    }

    /// The per-request topology: the edges touching the requested
    /// (cluster, namespace) pairs on either endpoint, the application nodes
    /// of the requested pairs plus those the surviving edges reference, and
    /// the synthesised cluster and namespace grouping nodes.
    pub fn generate(&self, clusters: &[String], namespaces: &[String]) -> Self {
        let requested = |cluster: &str, namespace: &str| {
            clusters.iter().any(|c| c == cluster)
                && (namespaces.is_empty() || namespaces.iter().any(|n| n == namespace))
        };

        let edges: Vec<Edge> = self
            .edges
            .iter()
            .filter(|edge| {
                requested(&edge.source_cluster, &edge.source_namespace)
                    || requested(&edge.target_cluster, &edge.target_namespace)
            })
            .cloned()
            .collect();

        let referenced: AHashSet<&str> = edges
            .iter()
            .flat_map(|edge| [edge.source.as_str(), edge.target.as_str()])
            .collect();

        let mut nodes: Vec<Node> = self
            .nodes
            .iter()
            .filter(|node| {
                requested(&node.cluster, &node.namespace) || referenced.contains(node.id.as_str())
            })
            .cloned()
            .collect();

        // Synthesise the enclosing grouping nodes, each id once.
        let mut groups: AHashMap<String, Node> = AHashMap::new();
        for node in &nodes {
            groups
                .entry(node.cluster.clone())
                .or_insert_with(|| Node {
                    id: node.cluster.clone(),
                    label: node.cluster.clone(),
                    parent: String::new(),
                    cluster: node.cluster.clone(),
                    namespace: String::new(),
                });
            groups
                .entry(format!("{}-{}", node.cluster, node.namespace))
                .or_insert_with(|| Node {
                    id: format!("{}-{}", node.cluster, node.namespace),
                    label: node.namespace.clone(),
                    parent: node.cluster.clone(),
                    cluster: node.cluster.clone(),
                    namespace: String::new(),
                });
        }

        let mut groups: Vec<Node> = groups.into_values().collect();
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        nodes.extend(groups);

        Self { nodes, edges }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kobs_k8s_api::Dependency;

    fn application(
        cluster: &str,
        namespace: &str,
        name: &str,
        dependencies: Vec<Dependency>,
    ) -> ApplicationSpec {
        ApplicationSpec {
            cluster: cluster.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            dependencies,
            ..ApplicationSpec::default()
        }
    }

    fn dependency(cluster: &str, namespace: &str, name: &str) -> Dependency {
        Dependency {
            cluster: cluster.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn dependencies_inherit_cluster_and_namespace() {
        let applications = vec![
            application("c1", "n1", "a", vec![dependency("", "", "b")]),
            application("c1", "n1", "b", vec![]),
        ];
        let topology = Topology::build(&applications);

        assert_eq!(topology.edges.len(), 1);
        assert_eq!(topology.edges[0].source, "c1-n1-a");
        assert_eq!(topology.edges[0].target, "c1-n1-b");
    }

    #[test]
    fn dangling_edges_are_filtered() {
        let applications = vec![application("c1", "n1", "a", vec![dependency("", "", "b")])];
        let topology = Topology::build(&applications);

        assert_eq!(topology.nodes.len(), 1);
        assert!(topology.edges.is_empty());
    }

    #[test]
    fn generated_topology_has_no_dangling_edges() {
        let applications = vec![
            application("c1", "n1", "a", vec![dependency("", "", "missing")]),
            application("c2", "n2", "b", vec![dependency("c1", "n1", "a")]),
        ];
        let topology = Topology::build(&applications);
        let generated = topology.generate(&["c1".to_string()], &["n1".to_string()]);

        let ids: AHashSet<&str> = generated.nodes.iter().map(|n| n.id.as_str()).collect();
        for edge in &generated.edges {
            assert!(ids.contains(edge.source.as_str()));
            assert!(ids.contains(edge.target.as_str()));
        }
        // The cross-cluster edge touches (c1, n1) on its target side.
        assert_eq!(generated.edges.len(), 1);
    }

    #[test]
    fn isolated_application_yields_one_node_and_no_edges() {
        let applications = vec![application("c1", "n1", "a", vec![dependency("", "", "b")])];
        let topology = Topology::build(&applications);
        let generated = topology.generate(&["c1".to_string()], &["n1".to_string()]);

        let applications: Vec<_> = generated
            .nodes
            .iter()
            .filter(|n| n.id == "c1-n1-a")
            .collect();
        assert_eq!(applications.len(), 1);
        assert!(generated.edges.is_empty());
    }

    #[test]
    fn grouping_nodes_are_deduplicated() {
        let applications = vec![
            application("c1", "n1", "a", vec![]),
            application("c1", "n1", "b", vec![]),
            application("c1", "n2", "c", vec![]),
        ];
        let topology = Topology::build(&applications);
        let generated = topology.generate(&["c1".to_string()], &[]);

        let clusters: Vec<_> = generated.nodes.iter().filter(|n| n.id == "c1").collect();
        assert_eq!(clusters.len(), 1);
        let namespaces: Vec<_> = generated.nodes.iter().filter(|n| n.id == "c1-n1").collect();
        assert_eq!(namespaces.len(), 1);
    }
}
