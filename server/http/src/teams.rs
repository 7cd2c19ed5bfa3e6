use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use kobs_k8s_api::TemplateSpec;
use kobs_k8s_index::TeamView;

use crate::error::ApiError;
use crate::AppState;

/// GET /api/teams
pub(crate) async fn get_teams(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TeamView>>, ApiError> {
    Ok(Json(state.index.teams().await?))
}

/// GET /api/templates
pub(crate) async fn get_templates(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TemplateSpec>>, ApiError> {
    Ok(Json(state.index.templates().await?))
}
