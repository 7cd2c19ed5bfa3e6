use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use kobs_k8s_api::ApplicationSpec;
use kobs_k8s_index::Topology;

use crate::error::ApiError;
use crate::{split_list, AppState};

#[derive(Debug, Deserialize)]
pub(crate) struct ListParams {
    #[serde(default)]
    cluster: String,
    #[serde(default)]
    namespace: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GetParams {
    cluster: String,
    namespace: String,
    name: String,
}

/// GET /api/applications
pub(crate) async fn get_applications(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ApplicationSpec>>, ApiError> {
    let clusters = split_list(&params.cluster);
    let namespaces = split_list(&params.namespace);
    let applications = state.registry.get_applications(&clusters, &namespaces).await?;
    Ok(Json(applications))
}

/// GET /api/applications/application
pub(crate) async fn get_application(
    State(state): State<Arc<AppState>>,
    Query(params): Query<GetParams>,
) -> Result<Json<ApplicationSpec>, ApiError> {
    let application = state
        .registry
        .get_application(&params.cluster, &params.namespace, &params.name)
        .await?;
    Ok(Json(application))
}

/// GET /api/applications/topology
pub(crate) async fn get_topology(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Topology>, ApiError> {
    let clusters = split_list(&params.cluster);
    let namespaces = split_list(&params.namespace);
    let topology = state.index.topology(&clusters, &namespaces).await?;
    Ok(Json(topology))
}
