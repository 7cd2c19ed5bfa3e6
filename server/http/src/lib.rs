#![forbid(unsafe_code)]

//! The HTTP surface of the aggregator. One axum router serves the cluster,
//! application, team and plugin endpoints; the session middleware runs in
//! front of every route except the health probe.

pub mod auth;

mod applications;
mod clusters;
mod error;
mod plugins;
mod resources;
mod teams;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{middleware, Router};
use axum_cookie::prelude::CookieLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use kobs_k8s_clusters::Registry;
use kobs_k8s_index::Index;
use kobs_plugins::Dispatcher;

pub use self::auth::{Auth, AuthConfig};
pub use self::error::ApiError;

pub struct AppState {
    pub registry: Arc<Registry>,
    pub index: Arc<Index>,
    pub dispatcher: Dispatcher,
    pub auth: Auth,
}

/// Splits a comma-separated query parameter into its items. Most list
/// parameters of the API are passed this way.
pub(crate) fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

async fn health() -> StatusCode {
    StatusCode::OK
}

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/auth", get(auth::me))
        .route("/auth/logout", get(auth::logout))
        .route("/clusters", get(clusters::get_clusters))
        .route("/clusters/namespaces", get(clusters::get_namespaces))
        .route("/clusters/crds", get(clusters::get_crds))
        .route("/resources", get(resources::get_resources))
        .route("/resources/logs", get(resources::get_logs))
        .route("/applications", get(applications::get_applications))
        .route("/applications/application", get(applications::get_application))
        .route("/applications/topology", get(applications::get_topology))
        .route("/teams", get(teams::get_teams))
        .route("/templates", get(teams::get_templates))
        .route("/plugins", get(plugins::get_plugins))
        .route("/plugins/prometheus/variables", post(plugins::prometheus_variables))
        .route("/plugins/prometheus/metrics", post(plugins::prometheus_metrics))
        .route("/plugins/elasticsearch/logs", get(plugins::elasticsearch_logs))
        .route("/plugins/jaeger/services", get(plugins::jaeger_services))
        .route("/plugins/jaeger/operations", get(plugins::jaeger_operations))
        .route("/plugins/jaeger/traces", get(plugins::jaeger_traces))
        .route("/plugins/jaeger/trace", get(plugins::jaeger_trace))
        .route("/plugins/kiali/graph", get(plugins::kiali_graph))
        .route("/plugins/opsgenie/alerts", get(plugins::opsgenie_alerts))
        .route("/plugins/opsgenie/alert", get(plugins::opsgenie_alert))
        .route("/plugins/opsgenie/alert/logs", get(plugins::opsgenie_alert_logs))
        .route("/plugins/opsgenie/alert/notes", get(plugins::opsgenie_alert_notes))
        .route(
            "/plugins/opsgenie/alert/acknowledge",
            post(plugins::opsgenie_acknowledge_alert),
        )
        .route("/plugins/opsgenie/alert/snooze", post(plugins::opsgenie_snooze_alert))
        .route("/plugins/opsgenie/alert/close", post(plugins::opsgenie_close_alert))
        .route("/plugins/opsgenie/incidents", get(plugins::opsgenie_incidents))
        .route("/plugins/opsgenie/incident/logs", get(plugins::opsgenie_incident_logs))
        .route("/plugins/opsgenie/incident/notes", get(plugins::opsgenie_incident_notes))
        .route(
            "/plugins/opsgenie/incident/timeline",
            get(plugins::opsgenie_incident_timeline),
        )
        .route(
            "/plugins/opsgenie/incident/resolve",
            post(plugins::opsgenie_resolve_incident),
        )
        .route("/plugins/opsgenie/incident/close", post(plugins::opsgenie_close_incident))
        .route("/plugins/helm/releases", get(plugins::helm_releases))
        .route("/plugins/helm/release", get(plugins::helm_release))
        .route("/plugins/helm/release/history", get(plugins::helm_release_history))
        .route(
            "/plugins/azure/containerinstances/containergroups",
            get(plugins::azure_container_groups),
        )
        .route(
            "/plugins/azure/containerinstances/containergroup",
            get(plugins::azure_container_group),
        )
        .route(
            "/plugins/azure/containerinstances/containergroup/restart",
            post(plugins::azure_restart_container_group),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth::session));

    Router::new()
        .route("/api/health", get(health))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(CookieLayer::default())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use kobs_plugins::Config;

    use super::*;

    fn state() -> Arc<AppState> {
        let registry = Registry::with_clusters(Vec::new());
        let index = Index::new(registry.clone());
        let dispatcher = Dispatcher::new(Config::default(), registry.clone()).unwrap();
        let auth = Auth::new(AuthConfig::default()).unwrap();
        Arc::new(AppState {
            registry,
            index,
            dispatcher,
            auth,
        })
    }

    #[test]
    fn list_parameters_are_comma_separated() {
        assert_eq!(split_list("a,b , c"), vec!["a", "b", "c"]);
        assert_eq!(split_list(""), Vec::<String>::new());
        assert_eq!(split_list(",,"), Vec::<String>::new());
    }

    #[tokio::test]
    async fn health_needs_no_session() {
        let response = router(state())
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn clusters_are_served() {
        let response = router(state())
            .oneshot(Request::get("/api/clusters").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"[]");
    }

    #[tokio::test]
    async fn unknown_plugin_instances_are_rejected() {
        let response = router(state())
            .oneshot(
                Request::get("/api/plugins/jaeger/services")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "invalid instance name");
    }

    #[tokio::test]
    async fn the_session_user_is_returned() {
        let response = router(state())
            .oneshot(
                Request::get("/api/auth")
                    .header("x-auth-request-email", "jane@kobs.io")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let user: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(user["email"], "jane@kobs.io");
    }
}
