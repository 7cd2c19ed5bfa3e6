use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Models an application on top of raw workloads: dependencies, owning
/// teams, associated resources and plugin bindings.
///
/// `cluster`, `namespace` and `name` are filled in by the reader from the
/// object's location; authors never set them.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kobs.io",
    version = "v1beta1",
    kind = "Application",
    plural = "applications",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teams: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceSelector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginBinding>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub title: String,
    pub link: String,
}

/// Selects the Kubernetes resources belonging to an application.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSelector {
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub kinds: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selector: String,
}

/// A dependency on another application. When `cluster` or `namespace` is
/// omitted it is inherited from the declaring application.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Binds a plugin instance to an application, with adapter-specific options.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PluginBinding {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_author_manifest() {
        let spec: ApplicationSpec = serde_yaml::from_str(
            r#"
description: the kobs hub
teams:
  - team-diablo
dependencies:
  - name: events
  - cluster: c2
    namespace: tracing
    name: jaeger
    description: traces
plugins:
  - name: prometheus
    options:
      queries:
        - query: up
"#,
        )
        .unwrap();

        // Location fields are reader-filled, never authored.
        assert!(spec.cluster.is_empty());
        assert!(spec.namespace.is_empty());
        assert!(spec.name.is_empty());
        assert_eq!(spec.dependencies.len(), 2);
        assert!(spec.dependencies[0].cluster.is_empty());
        assert_eq!(spec.dependencies[1].cluster, "c2");
    }
}
