use kobs_core::Permissions;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::application::Link;

/// Models ownership: which group of people owns applications, and which
/// permissions members of the team are granted.
///
/// A team name must be globally unique across clusters and namespaces; the
/// aggregator drops any duplicate after the first occurrence.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kobs.io",
    version = "v1beta1",
    kind = "Team",
    plural = "teams",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TeamSpec {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
    #[serde(default)]
    pub permissions: Permissions,
}
