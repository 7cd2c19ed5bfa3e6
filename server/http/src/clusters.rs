use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use kobs_k8s_clusters::Crd;

use crate::error::ApiError;
use crate::{split_list, AppState};

#[derive(Debug, Deserialize)]
pub(crate) struct ClusterParams {
    #[serde(default)]
    cluster: String,
}

/// GET /api/clusters
pub(crate) async fn get_clusters(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.registry.get_clusters())
}

/// GET /api/clusters/namespaces
pub(crate) async fn get_namespaces(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ClusterParams>,
) -> Result<Json<Vec<String>>, ApiError> {
    let clusters = split_list(&params.cluster);
    let namespaces = state.registry.get_namespaces(&clusters).await?;
    Ok(Json(namespaces))
}

/// GET /api/clusters/crds
pub(crate) async fn get_crds(State(state): State<Arc<AppState>>) -> Json<Vec<Crd>> {
    Json(state.registry.get_crds())
}
