use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1 as apiextensions;
use kube::api::{Api, ListParams};
use serde::{Deserialize, Serialize};

use kobs_core::Error;

/// One discovered custom resource, per served version.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Crd {
    /// The API path, `apis/<group>/<version>`.
    pub path: String,
    /// The plural resource name.
    pub resource: String,
    /// The kind.
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<CrdColumn>>,
}

impl Crd {
    /// The composite key used for de-duplication across clusters.
    pub fn key(&self) -> String {
        format!("{}.{}", self.resource, self.path)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdColumn {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub json_path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

/// Fetches all CustomResourceDefinitions and materialises one [`Crd`] per
/// served version.
pub(crate) async fn fetch(client: &kube::Client) -> Result<Vec<Crd>, Error> {
    let api: Api<apiextensions::CustomResourceDefinition> = Api::all(client.clone());
    let list = api
        .list(&ListParams::default())
        .await
        .map_err(Error::upstream)?;

    let mut crds = Vec::new();
    for crd in list.items {
        let spec = crd.spec;
        for version in &spec.versions {
            let description = version
                .schema
                .as_ref()
                .and_then(|s| s.open_api_v3_schema.as_ref())
                .and_then(|s| s.description.clone())
                .unwrap_or_default();

            let columns = version.additional_printer_columns.as_ref().map(|columns| {
                columns
                    .iter()
                    .map(|c| CrdColumn {
                        description: c.description.clone().unwrap_or_default(),
                        json_path: c.json_path.clone(),
                        name: c.name.clone(),
                        column_type: c.type_.clone(),
                    })
                    .collect()
            });

            crds.push(Crd {
                path: format!("apis/{}/{}", spec.group, version.name),
                resource: spec.names.plural.clone(),
                title: spec.names.kind.clone(),
                description,
                scope: spec.scope.clone(),
                columns,
            });
        }
    }

    Ok(crds)
}
