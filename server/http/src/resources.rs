//! The raw resource pass-through and the log endpoint. Both check the
//! user's resource permissions for every requested (cluster, namespace)
//! pair before any request leaves the aggregator.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::{Extension, Json};
use serde::Deserialize;

use kobs_core::{Error, User};
use kobs_k8s_clusters::ResourceList;

use crate::error::ApiError;
use crate::{split_list, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct ResourcesParams {
    cluster: String,
    namespace: String,
    path: String,
    resource: String,
    param_name: String,
    param: String,
}

impl Default for ResourcesParams {
    fn default() -> Self {
        Self {
            cluster: String::new(),
            namespace: String::new(),
            path: String::new(),
            resource: String::new(),
            param_name: String::new(),
            param: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LogsParams {
    cluster: String,
    namespace: String,
    name: String,
    #[serde(default)]
    container: String,
    #[serde(default)]
    regex: String,
    #[serde(default)]
    since: i64,
    #[serde(default)]
    previous: bool,
}

fn check_resource_access(
    user: &User,
    clusters: &[String],
    namespaces: &[String],
    resource: &str,
    verb: &str,
) -> Result<(), Error> {
    let cluster_scoped = [String::new()];
    let namespaces: &[String] = if namespaces.is_empty() {
        &cluster_scoped
    } else {
        namespaces
    };

    for cluster in clusters {
        for namespace in namespaces {
            if !user
                .permissions
                .has_resource_access(cluster, namespace, resource, verb)
            {
                return Err(Error::Authorization(format!(
                    "it is not allowed to {verb} the resource {resource} in the cluster {cluster}"
                )));
            }
        }
    }
    Ok(())
}

/// GET /api/resources
pub(crate) async fn get_resources(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(params): Query<ResourcesParams>,
) -> Result<Json<Vec<ResourceList>>, ApiError> {
    let clusters = split_list(&params.cluster);
    let namespaces = split_list(&params.namespace);
    if params.resource.is_empty() {
        return Err(Error::validation("resource is required").into());
    }

    check_resource_access(&user, &clusters, &namespaces, &params.resource, "get")?;

    let lists = state
        .registry
        .get_resources(
            &clusters,
            &namespaces,
            &params.path,
            &params.resource,
            &params.param_name,
            &params.param,
        )
        .await?;
    Ok(Json(lists))
}

/// GET /api/resources/logs
pub(crate) async fn get_logs(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(params): Query<LogsParams>,
) -> Result<Json<Vec<String>>, ApiError> {
    if !user.permissions.has_resource_access(
        &params.cluster,
        &params.namespace,
        "pods",
        "logs",
    ) {
        return Err(Error::Authorization(format!(
            "it is not allowed to get the logs of pods in the cluster {}",
            params.cluster
        ))
        .into());
    }

    let cluster = state.registry.cluster(&params.cluster)?;
    let lines = cluster
        .get_logs(
            &params.namespace,
            &params.name,
            &params.container,
            &params.regex,
            params.since,
            params.previous,
        )
        .await?;
    Ok(Json(lines))
}

#[cfg(test)]
mod tests {
    use kobs_core::{Permissions, ResourcePermission};

    use super::*;

    fn user(resources: Vec<ResourcePermission>) -> User {
        User {
            email: "jane@kobs.io".to_string(),
            teams: Vec::new(),
            permissions: Permissions {
                plugins: Vec::new(),
                resources,
            },
        }
    }

    #[test]
    fn every_requested_pair_must_be_granted() {
        let user = user(vec![ResourcePermission {
            clusters: vec!["prod".to_string()],
            namespaces: vec!["monitoring".to_string()],
            resources: vec!["*".to_string()],
            verbs: vec!["get".to_string()],
        }]);

        assert!(check_resource_access(
            &user,
            &["prod".to_string()],
            &["monitoring".to_string()],
            "pods",
            "get",
        )
        .is_ok());

        let result = check_resource_access(
            &user,
            &["prod".to_string()],
            &["monitoring".to_string(), "kube-system".to_string()],
            "pods",
            "get",
        );
        assert!(matches!(result, Err(Error::Authorization(_))));
    }

    #[test]
    fn cluster_scoped_requests_need_a_namespace_wildcard() {
        let granted = user(vec![ResourcePermission {
            clusters: vec!["prod".to_string()],
            namespaces: vec!["*".to_string()],
            resources: vec!["nodes".to_string()],
            verbs: vec!["get".to_string()],
        }]);
        assert!(check_resource_access(&granted, &["prod".to_string()], &[], "nodes", "get").is_ok());

        let denied = user(vec![ResourcePermission {
            clusters: vec!["prod".to_string()],
            namespaces: vec!["monitoring".to_string()],
            resources: vec!["nodes".to_string()],
            verbs: vec!["get".to_string()],
        }]);
        assert!(matches!(
            check_resource_access(&denied, &["prod".to_string()], &[], "nodes", "get"),
            Err(Error::Authorization(_))
        ));
    }
}
