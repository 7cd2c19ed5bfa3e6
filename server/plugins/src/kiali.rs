//! The service-mesh graph adapter. The graph is fetched from Kiali and
//! enriched in place: edges get a human-readable traffic label and a health
//! classification, nodes get a display label and an image.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use kobs_core::Error;

use crate::{http_client, validate_address, Credentials};

const DEFAULT_DEGRADED: f64 = 1.0;
const DEFAULT_FAILURE: f64 = 5.0;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub address: String,
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(default)]
    pub traffic: Traffic,
}

/// The per-instance error-rate thresholds for edge health.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Traffic {
    pub degraded: f64,
    pub failure: f64,
}

impl Default for Traffic {
    fn default() -> Self {
        Self {
            degraded: DEFAULT_DEGRADED,
            failure: DEFAULT_FAILURE,
        }
    }
}

impl Traffic {
    /// The thresholds must satisfy 0 < degraded < failure < 100; anything
    /// else falls back to the defaults.
    fn clamped(self) -> Self {
        if self.degraded > 0.0 && self.degraded < self.failure && self.failure < 100.0 {
            self
        } else {
            Self::default()
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Graph {
    pub elements: Elements,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Elements {
    #[serde(default)]
    pub nodes: Vec<NodeWrapper>,
    #[serde(default)]
    pub edges: Vec<EdgeWrapper>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NodeWrapper {
    pub data: NodeData,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workload: String,
    /// The enclosing box node, when the node is boxed.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent: String,
    #[serde(default)]
    pub is_outside: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_service_entry: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node_label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node_image: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EdgeWrapper {
    pub data: EdgeData,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeData {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic: Option<EdgeTraffic>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub edge_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub edge_label: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EdgeTraffic {
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub rates: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub struct Instance {
    config: Config,
    traffic: Traffic,
    client: reqwest::Client,
}

impl Instance {
    pub fn new(config: Config) -> Result<Self, Error> {
        validate_address(&config.name, &config.address)?;
        Ok(Self {
            traffic: config.traffic.clamped(),
            client: http_client()?,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn description(&self) -> &str {
        &self.config.description
    }

    /// Fetches the versioned-app graph for the given namespaces and
    /// enriches it in place.
    #[instrument(skip(self), fields(instance = %self.config.name))]
    pub async fn get_graph(&self, duration: i64, namespaces: &[String]) -> Result<Graph, Error> {
        let url = format!(
            "{}/api/namespaces/graph",
            self.config.address.trim_end_matches('/')
        );
        let params = [
            ("duration", format!("{duration}s")),
            ("graphType", "versionedApp".to_string()),
            ("injectServiceNodes", "true".to_string()),
            ("groupBy", "app".to_string()),
            (
                "appenders",
                "deadNode,sidecarsCheck,serviceEntry,istio".to_string(),
            ),
            ("namespaces", namespaces.join(",")),
        ];

        let request = self.config.credentials.apply(self.client.get(url).query(&params));
        let response = request.send().await.map_err(Error::upstream)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(format!("{status}: {body}")));
        }

        let mut graph: Graph = response.json().await.map_err(Error::upstream)?;
        enrich(&mut graph, self.traffic);
        Ok(graph)
    }
}

fn enrich(graph: &mut Graph, traffic: Traffic) {
    for edge in &mut graph.elements.edges {
        decorate_edge(&mut edge.data, traffic);
    }
    for node in &mut graph.elements.nodes {
        decorate_node(&mut node.data);
    }
}

fn decorate_edge(data: &mut EdgeData, thresholds: Traffic) {
    let Some(traffic) = &data.traffic else {
        return;
    };
    let Some(rates) = &traffic.rates else {
        return;
    };

    match traffic.protocol.as_str() {
        "http" => {
            if let Some(rate) = rates.get("http") {
                let mut label = format!("{rate}req/s");
                if let Some(err) = rates.get("httpPercentErr") {
                    label.push_str(&format!("\n{err}% err"));
                }
                data.edge_label = label;

                let err = rates
                    .get("httpPercentErr")
                    .and_then(|err| err.parse::<f64>().ok())
                    .unwrap_or(0.0);
                data.edge_type = if err < thresholds.degraded {
                    "healthy".to_string()
                } else if err < thresholds.failure {
                    "degraded".to_string()
                } else {
                    "failure".to_string()
                };
            }
        }
        "grpc" => {
            if let Some(rate) = rates.get("grpc") {
                let mut label = format!("{rate}req/s");
                if let Some(err) = rates.get("grpcPercentErr") {
                    label.push_str(&format!("\n{err}% err"));
                }
                data.edge_label = label;
            }
        }
        "tcp" => {
            if let Some(rate) = rates.get("tcp") {
                data.edge_label = format!("{rate}B/s");
            }
        }
        _ => {}
    }
}

fn decorate_node(data: &mut NodeData) {
    data.node_label = if !data.service.is_empty() {
        data.service.clone()
    } else if !data.parent.is_empty() && !data.version.is_empty() {
        data.version.clone()
    } else {
        data.app.clone()
    };

    data.node_image = if data.app == "unknown" || data.service == "PassthroughCluster" {
        "/img/kiali/unknown.svg".to_string()
    } else if data.is_outside {
        "/img/kiali/outside.svg".to_string()
    } else {
        "/img/kiali/istio.svg".to_string()
    };

    let is_service_entry = data
        .is_service_entry
        .as_ref()
        .map(|v| !v.is_null())
        .unwrap_or(false);
    if data.node_type == "service" && is_service_entry {
        data.node_type = "serviceentry".to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(protocol: &str, rates: &[(&str, &str)]) -> EdgeData {
        EdgeData {
            traffic: Some(EdgeTraffic {
                protocol: protocol.to_string(),
                rates: Some(
                    rates
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                extra: serde_json::Map::new(),
            }),
            ..EdgeData::default()
        }
    }

    #[test]
    fn http_edges_are_classified() {
        let thresholds = Traffic::default();

        let mut healthy = edge("http", &[("http", "1.50"), ("httpPercentErr", "0.4")]);
        decorate_edge(&mut healthy, thresholds);
        assert_eq!(healthy.edge_type, "healthy");
        assert_eq!(healthy.edge_label, "1.50req/s\n0.4% err");

        let mut degraded = edge("http", &[("http", "1.50"), ("httpPercentErr", "2.0")]);
        decorate_edge(&mut degraded, thresholds);
        assert_eq!(degraded.edge_type, "degraded");

        let mut failure = edge("http", &[("http", "1.50"), ("httpPercentErr", "11.1")]);
        decorate_edge(&mut failure, thresholds);
        assert_eq!(failure.edge_type, "failure");
    }

    #[test]
    fn invalid_thresholds_fall_back_to_defaults() {
        let traffic = Traffic {
            degraded: 9.0,
            failure: 2.0,
        }
        .clamped();
        assert_eq!(traffic.degraded, DEFAULT_DEGRADED);
        assert_eq!(traffic.failure, DEFAULT_FAILURE);

        let traffic = Traffic {
            degraded: 0.5,
            failure: 10.0,
        }
        .clamped();
        assert_eq!(traffic.degraded, 0.5);
        assert_eq!(traffic.failure, 10.0);
    }

    #[test]
    fn node_label_precedence() {
        let mut service = NodeData {
            service: "reviews".into(),
            app: "reviews-app".into(),
            ..NodeData::default()
        };
        decorate_node(&mut service);
        assert_eq!(service.node_label, "reviews");

        let mut boxed = NodeData {
            parent: "box-1".into(),
            version: "v2".into(),
            app: "reviews-app".into(),
            ..NodeData::default()
        };
        decorate_node(&mut boxed);
        assert_eq!(boxed.node_label, "v2");

        let mut plain = NodeData {
            app: "reviews-app".into(),
            ..NodeData::default()
        };
        decorate_node(&mut plain);
        assert_eq!(plain.node_label, "reviews-app");
    }

    #[test]
    fn service_entry_nodes_are_retyped() {
        let mut node = NodeData {
            node_type: "service".into(),
            service: "external-api".into(),
            is_service_entry: Some(serde_json::json!({"hosts": ["api.github.com"]})),
            ..NodeData::default()
        };
        decorate_node(&mut node);
        assert_eq!(node.node_type, "serviceentry");

        let mut node = NodeData {
            node_type: "service".into(),
            is_service_entry: Some(serde_json::Value::Null),
            ..NodeData::default()
        };
        decorate_node(&mut node);
        assert_eq!(node.node_type, "service");
    }

    #[test]
    fn unknown_nodes_get_the_unknown_image() {
        let mut node = NodeData {
            app: "unknown".into(),
            ..NodeData::default()
        };
        decorate_node(&mut node);
        assert_eq!(node.node_image, "/img/kiali/unknown.svg");

        let mut node = NodeData {
            app: "frontend".into(),
            is_outside: true,
            ..NodeData::default()
        };
        decorate_node(&mut node);
        assert_eq!(node.node_image, "/img/kiali/outside.svg");
    }
}
