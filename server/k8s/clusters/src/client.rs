use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use kube::api::{Api, ApiResource, DynamicObject, ListParams, LogParams};
use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, instrument, warn};

use kobs_core::Error;
use kobs_k8s_api::{
    Application, ApplicationSpec, Namespace, Pod, ResourceExt, Secret, Team, TeamSpec, Template,
    TemplateSpec, User, UserSpec,
};

use crate::crds::{self, Crd};

/// How long to wait between CRD discovery attempts.
const CRD_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// A client for a single Kubernetes cluster.
///
/// The namespace list is cached and refreshed with an atomic swap; readers
/// see either the previous or the new list, never a torn state. The CRD
/// list is loaded by a background task and is write-once: readers observe
/// the empty list during the startup window and the complete list
/// afterwards.
pub struct Cluster {
    name: String,
    client: kube::Client,
    cache_duration: Duration,
    namespaces: RwLock<NamespaceCache>,
    crds: RwLock<Vec<Crd>>,
}

#[derive(Default)]
struct NamespaceCache {
    namespaces: Vec<String>,
    last_fetch: Option<Instant>,
}

impl NamespaceCache {
    /// Returns the cached list when the last fetch is within the window.
    fn fresh(&self, cache_duration: Duration, now: Instant) -> Option<Vec<String>> {
        let last_fetch = self.last_fetch?;
        if now.duration_since(last_fetch) < cache_duration {
            return Some(self.namespaces.clone());
        }
        None
    }

    fn store(&mut self, namespaces: Vec<String>, now: Instant) {
        self.namespaces = namespaces;
        self.last_fetch = Some(now);
    }
}

impl Cluster {
    pub fn new(name: String, client: kube::Client, cache_duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            client,
            cache_duration,
            namespaces: RwLock::new(NamespaceCache::default()),
            crds: RwLock::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The namespaces of the cluster. Served from the cache within the
    /// cache window; otherwise refreshed from the API. The cache is kept
    /// on failure (stale-on-error).
    #[instrument(skip(self), fields(cluster = %self.name))]
    pub async fn get_namespaces(&self) -> Result<Vec<String>, Error> {
        if let Some(namespaces) = self
            .namespaces
            .read()
            .fresh(self.cache_duration, Instant::now())
        {
            debug!("namespaces served from cache");
            return Ok(namespaces);
        }

        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(Error::upstream)?;

        let namespaces: Vec<String> = list.items.iter().map(|ns| ns.name_any()).collect();
        self.namespaces
            .write()
            .store(namespaces.clone(), Instant::now());
        Ok(namespaces)
    }

    /// Raw pass-through returning the API server's response body. An empty
    /// namespace means a cluster-scoped query.
    #[instrument(skip(self), fields(cluster = %self.name))]
    pub async fn get_resources(
        &self,
        namespace: &str,
        api_path: &str,
        resource: &str,
        param_name: &str,
        param: &str,
    ) -> Result<String, Error> {
        let url = resource_url(namespace, api_path, resource, param_name, param);
        let request = http::Request::get(url)
            .body(Vec::new())
            .map_err(Error::validation)?;
        self.client
            .request_text(request)
            .await
            .map_err(Error::upstream)
    }

    /// The log lines of a container. When a regex is given only matching
    /// lines are retained.
    #[instrument(skip(self), fields(cluster = %self.name))]
    pub async fn get_logs(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
        regex: &str,
        since_seconds: i64,
        previous: bool,
    ) -> Result<Vec<String>, Error> {
        let filter = if regex.is_empty() {
            None
        } else {
            Some(Regex::new(regex).map_err(Error::validation)?)
        };

        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: (!container.is_empty()).then(|| container.to_string()),
            previous,
            since_seconds: Some(since_seconds),
            timestamps: true,
            ..LogParams::default()
        };
        let logs = api.logs(name, &params).await.map_err(Error::upstream)?;

        let lines = logs
            .lines()
            .filter(|line| filter.as_ref().map_or(true, |re| re.is_match(line)))
            .map(str::to_string)
            .collect();
        Ok(lines)
    }

    /// Lists a kobs custom resource as dynamic objects and deserializes
    /// each spec on its own, so one spec-less or malformed item does not
    /// fail the whole list. Returns `(namespace, name, spec)` triples.
    async fn list_specs<K, S>(&self, namespace: &str) -> Result<Vec<(String, String, S)>, Error>
    where
        K: kube::Resource<DynamicType = ()>,
        S: serde::de::DeserializeOwned,
    {
        let resource = ApiResource::erase::<K>(&());
        let api: Api<DynamicObject> = if namespace.is_empty() {
            Api::all_with(self.client.clone(), &resource)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, &resource)
        };
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(Error::upstream)?;
        Ok(collect_specs(&self.name, list.items))
    }

    /// All applications of a namespace, or of every namespace when the
    /// namespace is empty. Each returned record carries the cluster,
    /// namespace and name of the object it was read from.
    #[instrument(skip(self), fields(cluster = %self.name))]
    pub async fn get_applications(&self, namespace: &str) -> Result<Vec<ApplicationSpec>, Error> {
        let specs = self
            .list_specs::<Application, ApplicationSpec>(namespace)
            .await?;

        let applications = specs
            .into_iter()
            .map(|(namespace, name, mut spec)| {
                spec.cluster = self.name.clone();
                spec.namespace = namespace;
                spec.name = name;
                spec
            })
            .collect();
        Ok(applications)
    }

    #[instrument(skip(self), fields(cluster = %self.name))]
    pub async fn get_application(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ApplicationSpec, Error> {
        let api: Api<Application> = Api::namespaced(self.client.clone(), namespace);
        let application = api.get(name).await.map_err(Error::upstream)?;
        Ok(self.fill_application(application))
    }

    fn fill_application(&self, application: Application) -> ApplicationSpec {
        let namespace = application.namespace().unwrap_or_default();
        let name = application.name_any();
        let mut spec = application.spec;
        spec.cluster = self.name.clone();
        spec.namespace = namespace;
        spec.name = name;
        spec
    }

    /// All teams of the cluster, across namespaces.
    #[instrument(skip(self), fields(cluster = %self.name))]
    pub async fn get_teams(&self) -> Result<Vec<TeamSpec>, Error> {
        let specs = self.list_specs::<Team, TeamSpec>("").await?;

        let teams = specs
            .into_iter()
            .map(|(namespace, name, mut spec)| {
                spec.cluster = self.name.clone();
                spec.namespace = namespace;
                spec.name = name;
                spec
            })
            .collect();
        Ok(teams)
    }

    /// All users of the cluster, across namespaces.
    #[instrument(skip(self), fields(cluster = %self.name))]
    pub async fn get_users(&self) -> Result<Vec<UserSpec>, Error> {
        let specs = self.list_specs::<User, UserSpec>("").await?;

        let users = specs
            .into_iter()
            .map(|(namespace, name, mut spec)| {
                spec.cluster = self.name.clone();
                spec.namespace = namespace;
                spec.name = name;
                spec
            })
            .collect();
        Ok(users)
    }

    /// All templates of the cluster, across namespaces.
    #[instrument(skip(self), fields(cluster = %self.name))]
    pub async fn get_templates(&self) -> Result<Vec<TemplateSpec>, Error> {
        let specs = self.list_specs::<Template, TemplateSpec>("").await?;

        let templates = specs
            .into_iter()
            .map(|(namespace, name, mut spec)| {
                spec.cluster = self.name.clone();
                spec.namespace = namespace;
                spec.name = name;
                spec
            })
            .collect();
        Ok(templates)
    }

    /// The secrets of a namespace matching a label selector. Used by the
    /// Helm adapter to read release state.
    #[instrument(skip(self), fields(cluster = %self.name))]
    pub async fn get_secrets(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(Error::upstream)?;
        Ok(list.items)
    }

    /// The discovered CRDs. Empty until the background loader succeeds.
    pub fn crds(&self) -> Vec<Crd> {
        self.crds.read().clone()
    }

    /// Loads the cluster's CRDs, retrying every minute until a fetch
    /// succeeds. Failures are logged and never propagated; the result is
    /// published atomically once.
    pub async fn load_crds(self: Arc<Self>) {
        loop {
            match crds::fetch(&self.client).await {
                Ok(crds) => {
                    debug!(cluster = %self.name, count = crds.len(), "loaded CRDs");
                    *self.crds.write() = crds;
                    return;
                }
                Err(error) => {
                    warn!(cluster = %self.name, %error, "failed to load CRDs, retrying");
                    tokio::time::sleep(CRD_RETRY_INTERVAL).await;
                }
            }
        }
    }
}

/// Builds the API server path of a raw resource query. The parameter value
/// is percent-encoded so selectors with spaces or `&` survive.
fn resource_url(
    namespace: &str,
    api_path: &str,
    resource: &str,
    param_name: &str,
    param: &str,
) -> String {
    let path = api_path.trim_start_matches('/').trim_end_matches('/');
    let mut url = if namespace.is_empty() {
        format!("/{path}/{resource}")
    } else {
        format!("/{path}/namespaces/{namespace}/{resource}")
    };
    if !param_name.is_empty() {
        let encoded: String = url::form_urlencoded::byte_serialize(param.as_bytes()).collect();
        url.push_str(&format!("?{param_name}={encoded}"));
    }
    url
}

/// Deserializes each object's spec on its own. Objects without a spec are
/// skipped silently; objects with a spec that does not deserialize are
/// skipped with a warning.
fn collect_specs<S>(cluster: &str, items: Vec<DynamicObject>) -> Vec<(String, String, S)>
where
    S: serde::de::DeserializeOwned,
{
    let mut specs = Vec::with_capacity(items.len());
    for object in items {
        let namespace = object.namespace().unwrap_or_default();
        let name = object.name_any();
        let Some(spec) = object.data.get("spec") else {
            debug!(%cluster, %namespace, %name, "skipping object without a spec");
            continue;
        };
        match serde_json::from_value(spec.clone()) {
            Ok(spec) => specs.push((namespace, name, spec)),
            Err(error) => {
                warn!(%cluster, %namespace, %name, %error, "skipping object with a malformed spec");
            }
        }
    }
    specs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_is_fresh_within_the_window() {
        let mut cache = NamespaceCache::default();
        let t0 = Instant::now();
        cache.store(vec!["a".into(), "b".into()], t0);

        let window = Duration::from_secs(300);
        assert_eq!(
            cache.fresh(window, t0 + Duration::from_secs(60)),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(cache.fresh(window, t0 + Duration::from_secs(301)), None);
    }

    #[test]
    fn cache_is_stale_before_the_first_fetch() {
        let cache = NamespaceCache::default();
        assert_eq!(cache.fresh(Duration::from_secs(300), Instant::now()), None);
    }

    #[test]
    fn resource_url_encodes_the_parameter() {
        assert_eq!(
            resource_url("", "/apis/apps/v1", "deployments", "", ""),
            "/apis/apps/v1/deployments"
        );
        assert_eq!(
            resource_url(
                "default",
                "api/v1",
                "pods",
                "labelSelector",
                "app in (a, b)&x=y"
            ),
            "/api/v1/namespaces/default/pods?labelSelector=app+in+%28a%2C+b%29%26x%3Dy"
        );
    }

    #[test]
    fn objects_without_a_spec_are_skipped() {
        let object = |value: serde_json::Value| -> DynamicObject {
            serde_json::from_value(value).unwrap()
        };
        let items = vec![
            object(serde_json::json!({
                "apiVersion": "kobs.io/v1beta1",
                "kind": "Application",
                "metadata": {"name": "good", "namespace": "default"},
                "spec": {"description": "survives"},
            })),
            object(serde_json::json!({
                "apiVersion": "kobs.io/v1beta1",
                "kind": "Application",
                "metadata": {"name": "empty", "namespace": "default"},
            })),
            object(serde_json::json!({
                "apiVersion": "kobs.io/v1beta1",
                "kind": "Application",
                "metadata": {"name": "broken", "namespace": "default"},
                "spec": {"dependencies": "not-a-list"},
            })),
        ];

        let specs: Vec<(String, String, ApplicationSpec)> = collect_specs("dev", items);
        assert_eq!(specs.len(), 1);
        let (namespace, name, spec) = &specs[0];
        assert_eq!(namespace, "default");
        assert_eq!(name, "good");
        assert_eq!(spec.description.as_deref(), Some("survives"));
    }

    #[test]
    fn store_swaps_value_and_timestamp_together() {
        let mut cache = NamespaceCache::default();
        let t0 = Instant::now();
        cache.store(vec!["a".into()], t0);
        let t1 = t0 + Duration::from_secs(400);
        cache.store(vec!["b".into()], t1);

        assert_eq!(
            cache.fresh(Duration::from_secs(300), t1),
            Some(vec!["b".to_string()])
        );
    }
}
