//! The permission engine evaluated by the dispatcher and the adapters.
//!
//! Authorization is monotonic-additive: the union across all entries grants
//! access and no entry denies. A component glob is either `*` (matches any
//! value) or an exact string.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The permission set attached to a user session. Plugin permissions and
/// resource permissions are orthogonal axes.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginPermission>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourcePermission>,
}

/// Grants access to plugin instances. `permissions` is an opaque blob which
/// is interpreted by the matching adapter only.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PluginPermission {
    /// Instance-name glob.
    pub name: String,
    /// Plugin-name glob.
    #[serde(default = "wildcard")]
    pub plugin: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<serde_json::Value>,
}

/// Grants access to Kubernetes resources.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePermission {
    #[serde(default)]
    pub clusters: Vec<String>,
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub verbs: Vec<String>,
}

fn wildcard() -> String {
    "*".to_string()
}

/// Matches a single permission component: `*` matches anything, everything
/// else is an exact comparison.
pub fn matches(pattern: &str, value: &str) -> bool {
    pattern == "*" || pattern == value
}

impl Permissions {
    /// A permission set granting everything. Used when authentication is
    /// disabled.
    pub fn wildcard() -> Self {
        Self {
            plugins: vec![PluginPermission {
                name: wildcard(),
                plugin: wildcard(),
                permissions: vec![serde_json::Value::String(wildcard())],
            }],
            resources: vec![ResourcePermission {
                clusters: vec![wildcard()],
                namespaces: vec![wildcard()],
                resources: vec![wildcard()],
                verbs: vec![wildcard()],
            }],
        }
    }

    pub fn has_plugin_access(&self, instance: &str, plugin: &str) -> bool {
        self.plugins
            .iter()
            .any(|p| matches(&p.name, instance) && matches(&p.plugin, plugin))
    }

    pub fn has_resource_access(
        &self,
        cluster: &str,
        namespace: &str,
        resource: &str,
        verb: &str,
    ) -> bool {
        self.resources.iter().any(|r| {
            r.clusters.iter().any(|c| matches(c, cluster))
                && r.namespaces.iter().any(|n| matches(n, namespace))
                && r.resources.iter().any(|re| matches(re, resource))
                && r.verbs.iter().any(|v| matches(v, verb))
        })
    }

    /// Collects the adapter-specific permission blobs of all entries
    /// matching the given instance and plugin name.
    pub fn plugin_permissions(&self, instance: &str, plugin: &str) -> Vec<serde_json::Value> {
        self.plugins
            .iter()
            .filter(|p| matches(&p.name, instance) && matches(&p.plugin, plugin))
            .flat_map(|p| p.permissions.iter().cloned())
            .collect()
    }

    /// Adds all entries of `other`. The engine never subtracts, so a union
    /// of entry lists is a union of grants.
    pub fn extend(&mut self, other: &Permissions) {
        self.plugins.extend(other.plugins.iter().cloned());
        self.resources.extend(other.resources.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permissions(resources: Vec<ResourcePermission>) -> Permissions {
        Permissions {
            plugins: Vec::new(),
            resources,
        }
    }

    #[test]
    fn resource_access_is_additive() {
        let perms = permissions(vec![
            ResourcePermission {
                clusters: vec!["*".into()],
                namespaces: vec!["kobs".into()],
                resources: vec!["*".into()],
                verbs: vec!["get".into()],
            },
            ResourcePermission {
                clusters: vec!["c2".into()],
                namespaces: vec!["monitoring".into()],
                resources: vec!["pods".into()],
                verbs: vec!["*".into()],
            },
        ]);

        assert!(perms.has_resource_access("c1", "kobs", "release1", "get"));
        assert!(!perms.has_resource_access("c1", "monitoring", "release1", "get"));
        assert!(perms.has_resource_access("c2", "monitoring", "pods", "watch"));
    }

    #[test]
    fn no_entries_is_denied() {
        let perms = Permissions::default();
        assert!(!perms.has_resource_access("c1", "default", "pods", "get"));
        assert!(!perms.has_plugin_access("prod", "prometheus"));
    }

    #[test]
    fn plugin_access_matches_both_globs() {
        let perms = Permissions {
            plugins: vec![PluginPermission {
                name: "prod-*-not-a-glob".into(),
                plugin: "prometheus".into(),
                permissions: Vec::new(),
            }],
            resources: Vec::new(),
        };

        // Only the single `*` component is a wildcard; partial patterns are
        // exact strings.
        assert!(!perms.has_plugin_access("prod-prometheus", "prometheus"));
        assert!(perms.has_plugin_access("prod-*-not-a-glob", "prometheus"));
        assert!(!perms.has_plugin_access("prod-*-not-a-glob", "elasticsearch"));
    }

    #[test]
    fn wildcard_grants_everything() {
        let perms = Permissions::wildcard();
        assert!(perms.has_plugin_access("any", "helm"));
        assert!(perms.has_resource_access("c", "n", "r", "v"));
    }

    #[test]
    fn blobs_are_collected_from_matching_entries() {
        let perms = Permissions {
            plugins: vec![
                PluginPermission {
                    name: "ops".into(),
                    plugin: "opsgenie".into(),
                    permissions: vec![serde_json::json!("closeAlert")],
                },
                PluginPermission {
                    name: "*".into(),
                    plugin: "opsgenie".into(),
                    permissions: vec![serde_json::json!("acknowledgeAlert")],
                },
                PluginPermission {
                    name: "ops".into(),
                    plugin: "helm".into(),
                    permissions: vec![serde_json::json!({"clusters": ["*"]})],
                },
            ],
            resources: Vec::new(),
        };

        let blobs = perms.plugin_permissions("ops", "opsgenie");
        assert_eq!(
            blobs,
            vec![
                serde_json::json!("closeAlert"),
                serde_json::json!("acknowledgeAlert")
            ]
        );
    }
}
