//! The plugin endpoints. Every route resolves its instance through the
//! dispatcher: the target instance is named by the `x-kobs-plugin` header
//! and defaults to `default`, plugin access and capability are checked
//! before the adapter runs.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::Value;

use kobs_core::{Error, TimeRange, User, Variable};
use kobs_plugins::{elasticsearch, helm, kiali, opsgenie, prometheus, Capability, Instance, PluginDescriptor};

use crate::error::ApiError;
use crate::{split_list, AppState};

const INSTANCE_HEADER: &str = "x-kobs-plugin";

fn instance_name(headers: &HeaderMap) -> &str {
    headers
        .get(INSTANCE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("default")
}

/// Responds with a backend's raw JSON body without re-encoding it.
fn raw_json(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

/// GET /api/plugins
pub(crate) async fn get_plugins(State(state): State<Arc<AppState>>) -> Json<Vec<PluginDescriptor>> {
    Json(state.dispatcher.descriptors())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VariablesRequest {
    #[serde(default)]
    variables: Vec<Variable>,
    start: i64,
    end: i64,
}

/// POST /api/plugins/prometheus/variables
pub(crate) async fn prometheus_variables(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Json(mut body): Json<VariablesRequest>,
) -> Result<Json<Vec<Variable>>, ApiError> {
    let instance =
        state
            .dispatcher
            .instance("prometheus", instance_name(&headers), &user, Capability::Variables)?;
    let Instance::Prometheus(prometheus) = instance.as_ref() else {
        return Err(Error::Unsupported("variables".to_string()).into());
    };

    let time = TimeRange::new(body.start, body.end);
    prometheus.get_variables(&time, &mut body.variables).await?;
    Ok(Json(body.variables))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MetricsRequest {
    #[serde(default)]
    variables: Vec<Variable>,
    queries: Vec<prometheus::Query>,
    start: i64,
    end: i64,
    #[serde(default)]
    resolution: Option<String>,
}

/// POST /api/plugins/prometheus/metrics
pub(crate) async fn prometheus_metrics(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Json(body): Json<MetricsRequest>,
) -> Result<Json<Vec<prometheus::Metric>>, ApiError> {
    let instance =
        state
            .dispatcher
            .instance("prometheus", instance_name(&headers), &user, Capability::Metrics)?;
    let Instance::Prometheus(prometheus) = instance.as_ref() else {
        return Err(Error::Unsupported("metrics".to_string()).into());
    };

    let time = TimeRange::new(body.start, body.end);
    let metrics = prometheus
        .get_metrics(
            &time,
            body.resolution.as_deref(),
            &body.variables,
            &body.queries,
        )
        .await?;
    Ok(Json(metrics))
}

#[derive(Debug, Deserialize)]
pub(crate) struct LogsParams {
    query: String,
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    start: i64,
    #[serde(default)]
    end: i64,
}

/// GET /api/plugins/elasticsearch/logs
pub(crate) async fn elasticsearch_logs(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<LogsParams>,
) -> Result<Json<elasticsearch::Data>, ApiError> {
    let instance =
        state
            .dispatcher
            .instance("elasticsearch", instance_name(&headers), &user, Capability::Logs)?;
    let Instance::Elasticsearch(elasticsearch) = instance.as_ref() else {
        return Err(Error::Unsupported("logs".to_string()).into());
    };

    let time = TimeRange::new(params.start, params.end);
    let data = elasticsearch
        .get_logs(&params.query, params.cursor.as_deref(), &time)
        .await?;
    Ok(Json(data))
}

/// GET /api/plugins/jaeger/services
pub(crate) async fn jaeger_services(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let instance =
        state
            .dispatcher
            .instance("jaeger", instance_name(&headers), &user, Capability::Traces)?;
    let Instance::Jaeger(jaeger) = instance.as_ref() else {
        return Err(Error::Unsupported("services".to_string()).into());
    };
    Ok(Json(jaeger.get_services().await?))
}

#[derive(Debug, Deserialize)]
pub(crate) struct OperationsParams {
    service: String,
}

/// GET /api/plugins/jaeger/operations
pub(crate) async fn jaeger_operations(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<OperationsParams>,
) -> Result<Json<Value>, ApiError> {
    let instance =
        state
            .dispatcher
            .instance("jaeger", instance_name(&headers), &user, Capability::Traces)?;
    let Instance::Jaeger(jaeger) = instance.as_ref() else {
        return Err(Error::Unsupported("operations".to_string()).into());
    };
    Ok(Json(jaeger.get_operations(&params.service).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TracesParams {
    #[serde(default)]
    limit: String,
    #[serde(default)]
    max_duration: String,
    #[serde(default)]
    min_duration: String,
    #[serde(default)]
    operation: String,
    service: String,
    #[serde(default)]
    tags: String,
    start: i64,
    end: i64,
}

/// GET /api/plugins/jaeger/traces
pub(crate) async fn jaeger_traces(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<TracesParams>,
) -> Result<Response, ApiError> {
    let instance =
        state
            .dispatcher
            .instance("jaeger", instance_name(&headers), &user, Capability::Traces)?;
    let Instance::Jaeger(jaeger) = instance.as_ref() else {
        return Err(Error::Unsupported("traces".to_string()).into());
    };

    let time = TimeRange::new(params.start, params.end);
    let body = jaeger
        .get_traces(
            &params.limit,
            &params.max_duration,
            &params.min_duration,
            &params.operation,
            &params.service,
            &params.tags,
            &time,
        )
        .await?;
    Ok(raw_json(body))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TraceParams {
    trace_id: String,
}

/// GET /api/plugins/jaeger/trace
pub(crate) async fn jaeger_trace(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<TraceParams>,
) -> Result<Response, ApiError> {
    let instance =
        state
            .dispatcher
            .instance("jaeger", instance_name(&headers), &user, Capability::Traces)?;
    let Instance::Jaeger(jaeger) = instance.as_ref() else {
        return Err(Error::Unsupported("trace".to_string()).into());
    };
    Ok(raw_json(jaeger.get_trace(&params.trace_id).await?))
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphParams {
    duration: i64,
    #[serde(default)]
    namespace: String,
}

/// GET /api/plugins/kiali/graph
pub(crate) async fn kiali_graph(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<GraphParams>,
) -> Result<Json<kiali::Graph>, ApiError> {
    let instance =
        state
            .dispatcher
            .instance("kiali", instance_name(&headers), &user, Capability::Graph)?;
    let Instance::Kiali(kiali) = instance.as_ref() else {
        return Err(Error::Unsupported("graph".to_string()).into());
    };

    let namespaces = split_list(&params.namespace);
    let graph = kiali.get_graph(params.duration, &namespaces).await?;
    Ok(Json(graph))
}

#[derive(Debug, Deserialize)]
pub(crate) struct AlertsParams {
    #[serde(default)]
    query: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IdParams {
    id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SnoozeParams {
    id: String,
    snooze: String,
}

fn opsgenie_instance(
    state: &AppState,
    headers: &HeaderMap,
    user: &User,
) -> Result<Arc<Instance>, Error> {
    state
        .dispatcher
        .instance("opsgenie", instance_name(headers), user, Capability::Incidents)
}

/// GET /api/plugins/opsgenie/alerts
pub(crate) async fn opsgenie_alerts(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<AlertsParams>,
) -> Result<Json<Vec<opsgenie::Alert>>, ApiError> {
    let instance = opsgenie_instance(&state, &headers, &user)?;
    let Instance::Opsgenie(opsgenie) = instance.as_ref() else {
        return Err(Error::Unsupported("alerts".to_string()).into());
    };
    Ok(Json(opsgenie.get_alerts(&params.query).await?))
}

/// GET /api/plugins/opsgenie/alert
pub(crate) async fn opsgenie_alert(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<IdParams>,
) -> Result<Json<opsgenie::Alert>, ApiError> {
    let instance = opsgenie_instance(&state, &headers, &user)?;
    let Instance::Opsgenie(opsgenie) = instance.as_ref() else {
        return Err(Error::Unsupported("alert".to_string()).into());
    };
    Ok(Json(opsgenie.get_alert(&params.id).await?))
}

/// GET /api/plugins/opsgenie/alert/logs
pub(crate) async fn opsgenie_alert_logs(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<IdParams>,
) -> Result<Json<Value>, ApiError> {
    let instance = opsgenie_instance(&state, &headers, &user)?;
    let Instance::Opsgenie(opsgenie) = instance.as_ref() else {
        return Err(Error::Unsupported("alert logs".to_string()).into());
    };
    Ok(Json(opsgenie.get_alert_logs(&params.id).await?))
}

/// GET /api/plugins/opsgenie/alert/notes
pub(crate) async fn opsgenie_alert_notes(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<IdParams>,
) -> Result<Json<Value>, ApiError> {
    let instance = opsgenie_instance(&state, &headers, &user)?;
    let Instance::Opsgenie(opsgenie) = instance.as_ref() else {
        return Err(Error::Unsupported("alert notes".to_string()).into());
    };
    Ok(Json(opsgenie.get_alert_notes(&params.id).await?))
}

/// POST /api/plugins/opsgenie/alert/acknowledge
pub(crate) async fn opsgenie_acknowledge_alert(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<IdParams>,
) -> Result<StatusCode, ApiError> {
    let instance = opsgenie_instance(&state, &headers, &user)?;
    let Instance::Opsgenie(opsgenie) = instance.as_ref() else {
        return Err(Error::Unsupported("acknowledge alert".to_string()).into());
    };
    opsgenie.acknowledge_alert(&user, &params.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/plugins/opsgenie/alert/snooze
pub(crate) async fn opsgenie_snooze_alert(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<SnoozeParams>,
) -> Result<StatusCode, ApiError> {
    let instance = opsgenie_instance(&state, &headers, &user)?;
    let Instance::Opsgenie(opsgenie) = instance.as_ref() else {
        return Err(Error::Unsupported("snooze alert".to_string()).into());
    };
    opsgenie.snooze_alert(&user, &params.id, &params.snooze).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/plugins/opsgenie/alert/close
pub(crate) async fn opsgenie_close_alert(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<IdParams>,
) -> Result<StatusCode, ApiError> {
    let instance = opsgenie_instance(&state, &headers, &user)?;
    let Instance::Opsgenie(opsgenie) = instance.as_ref() else {
        return Err(Error::Unsupported("close alert".to_string()).into());
    };
    opsgenie.close_alert(&user, &params.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/plugins/opsgenie/incidents
pub(crate) async fn opsgenie_incidents(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<AlertsParams>,
) -> Result<Json<Vec<opsgenie::Incident>>, ApiError> {
    let instance = opsgenie_instance(&state, &headers, &user)?;
    let Instance::Opsgenie(opsgenie) = instance.as_ref() else {
        return Err(Error::Unsupported("incidents".to_string()).into());
    };
    Ok(Json(opsgenie.get_incidents(&params.query).await?))
}

/// GET /api/plugins/opsgenie/incident/logs
pub(crate) async fn opsgenie_incident_logs(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<IdParams>,
) -> Result<Json<Value>, ApiError> {
    let instance = opsgenie_instance(&state, &headers, &user)?;
    let Instance::Opsgenie(opsgenie) = instance.as_ref() else {
        return Err(Error::Unsupported("incident logs".to_string()).into());
    };
    Ok(Json(opsgenie.get_incident_logs(&params.id).await?))
}

/// GET /api/plugins/opsgenie/incident/notes
pub(crate) async fn opsgenie_incident_notes(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<IdParams>,
) -> Result<Json<Value>, ApiError> {
    let instance = opsgenie_instance(&state, &headers, &user)?;
    let Instance::Opsgenie(opsgenie) = instance.as_ref() else {
        return Err(Error::Unsupported("incident notes".to_string()).into());
    };
    Ok(Json(opsgenie.get_incident_notes(&params.id).await?))
}

/// GET /api/plugins/opsgenie/incident/timeline
pub(crate) async fn opsgenie_incident_timeline(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<IdParams>,
) -> Result<Json<Value>, ApiError> {
    let instance = opsgenie_instance(&state, &headers, &user)?;
    let Instance::Opsgenie(opsgenie) = instance.as_ref() else {
        return Err(Error::Unsupported("incident timeline".to_string()).into());
    };
    Ok(Json(opsgenie.get_incident_timeline(&params.id).await?))
}

/// POST /api/plugins/opsgenie/incident/resolve
pub(crate) async fn opsgenie_resolve_incident(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<IdParams>,
) -> Result<StatusCode, ApiError> {
    let instance = opsgenie_instance(&state, &headers, &user)?;
    let Instance::Opsgenie(opsgenie) = instance.as_ref() else {
        return Err(Error::Unsupported("resolve incident".to_string()).into());
    };
    opsgenie.resolve_incident(&user, &params.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/plugins/opsgenie/incident/close
pub(crate) async fn opsgenie_close_incident(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<IdParams>,
) -> Result<StatusCode, ApiError> {
    let instance = opsgenie_instance(&state, &headers, &user)?;
    let Instance::Opsgenie(opsgenie) = instance.as_ref() else {
        return Err(Error::Unsupported("close incident".to_string()).into());
    };
    opsgenie.close_incident(&user, &params.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReleasesParams {
    #[serde(default)]
    cluster: String,
    #[serde(default)]
    namespace: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReleaseParams {
    cluster: String,
    namespace: String,
    name: String,
    version: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryParams {
    cluster: String,
    namespace: String,
    name: String,
}

/// GET /api/plugins/helm/releases
pub(crate) async fn helm_releases(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<ReleasesParams>,
) -> Result<Json<Vec<helm::Release>>, ApiError> {
    let instance =
        state
            .dispatcher
            .instance("helm", instance_name(&headers), &user, Capability::Packages)?;
    let Instance::Helm(helm) = instance.as_ref() else {
        return Err(Error::Unsupported("releases".to_string()).into());
    };

    let clusters = split_list(&params.cluster);
    let namespaces = split_list(&params.namespace);
    Ok(Json(helm.list_releases(&user, &clusters, &namespaces).await?))
}

/// GET /api/plugins/helm/release
pub(crate) async fn helm_release(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<ReleaseParams>,
) -> Result<Json<helm::Release>, ApiError> {
    let instance =
        state
            .dispatcher
            .instance("helm", instance_name(&headers), &user, Capability::Packages)?;
    let Instance::Helm(helm) = instance.as_ref() else {
        return Err(Error::Unsupported("release".to_string()).into());
    };

    let release = helm
        .get_release(&user, &params.cluster, &params.namespace, &params.name, params.version)
        .await?;
    Ok(Json(release))
}

/// GET /api/plugins/helm/release/history
pub(crate) async fn helm_release_history(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<helm::Release>>, ApiError> {
    let instance =
        state
            .dispatcher
            .instance("helm", instance_name(&headers), &user, Capability::Packages)?;
    let Instance::Helm(helm) = instance.as_ref() else {
        return Err(Error::Unsupported("release history".to_string()).into());
    };

    let releases = helm
        .get_release_history(&user, &params.cluster, &params.namespace, &params.name)
        .await?;
    Ok(Json(releases))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ContainerGroupsParams {
    resource_group: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ContainerGroupParams {
    resource_group: String,
    container_group: String,
}

/// GET /api/plugins/azure/containerinstances/containergroups
pub(crate) async fn azure_container_groups(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<ContainerGroupsParams>,
) -> Result<Json<Value>, ApiError> {
    let instance =
        state
            .dispatcher
            .instance("azure", instance_name(&headers), &user, Capability::CloudOps)?;
    let Instance::Azure(azure) = instance.as_ref() else {
        return Err(Error::Unsupported("container groups".to_string()).into());
    };
    Ok(Json(
        azure.get_container_groups(&user, &params.resource_group).await?,
    ))
}

/// GET /api/plugins/azure/containerinstances/containergroup
pub(crate) async fn azure_container_group(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<ContainerGroupParams>,
) -> Result<Json<Value>, ApiError> {
    let instance =
        state
            .dispatcher
            .instance("azure", instance_name(&headers), &user, Capability::CloudOps)?;
    let Instance::Azure(azure) = instance.as_ref() else {
        return Err(Error::Unsupported("container group".to_string()).into());
    };
    Ok(Json(
        azure
            .get_container_group(&user, &params.resource_group, &params.container_group)
            .await?,
    ))
}

/// POST /api/plugins/azure/containerinstances/containergroup/restart
pub(crate) async fn azure_restart_container_group(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Query(params): Query<ContainerGroupParams>,
) -> Result<StatusCode, ApiError> {
    let instance =
        state
            .dispatcher
            .instance("azure", instance_name(&headers), &user, Capability::CloudOps)?;
    let Instance::Azure(azure) = instance.as_ref() else {
        return Err(Error::Unsupported("restart container group".to_string()).into());
    };
    azure
        .restart_container_group(&user, &params.resource_group, &params.container_group)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
