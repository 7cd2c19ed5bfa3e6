use std::sync::Arc;

use serde::{Deserialize, Serialize};

use kobs_core::{Error, User};
use kobs_k8s_clusters::Registry;

use crate::{azure, elasticsearch, helm, jaeger, kiali, opsgenie, prometheus};

/// The operations an adapter family can serve. Dispatching an operation an
/// instance does not support fails before any I/O.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    Variables,
    Metrics,
    Logs,
    Traces,
    Graph,
    Incidents,
    Packages,
    CloudOps,
}

/// One named instance of an adapter family.
pub enum Instance {
    Prometheus(prometheus::Instance),
    Elasticsearch(elasticsearch::Instance),
    Jaeger(jaeger::Instance),
    Kiali(kiali::Instance),
    Opsgenie(opsgenie::Instance),
    Helm(helm::Instance),
    Azure(azure::Instance),
}

/// What the UI needs to render the plugin catalogue.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub plugin: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Instance {
    pub fn name(&self) -> &str {
        match self {
            Instance::Prometheus(i) => i.name(),
            Instance::Elasticsearch(i) => i.name(),
            Instance::Jaeger(i) => i.name(),
            Instance::Kiali(i) => i.name(),
            Instance::Opsgenie(i) => i.name(),
            Instance::Helm(i) => i.name(),
            Instance::Azure(i) => i.name(),
        }
    }

    /// The plugin-family type tag.
    pub fn plugin(&self) -> &'static str {
        match self {
            Instance::Prometheus(_) => "prometheus",
            Instance::Elasticsearch(_) => "elasticsearch",
            Instance::Jaeger(_) => "jaeger",
            Instance::Kiali(_) => "kiali",
            Instance::Opsgenie(_) => "opsgenie",
            Instance::Helm(_) => "helm",
            Instance::Azure(_) => "azure",
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Instance::Prometheus(i) => i.description(),
            Instance::Elasticsearch(i) => i.description(),
            Instance::Jaeger(i) => i.description(),
            Instance::Kiali(i) => i.description(),
            Instance::Opsgenie(i) => i.description(),
            Instance::Helm(i) => i.description(),
            Instance::Azure(i) => i.description(),
        }
    }

    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            Instance::Prometheus(_) => &[Capability::Variables, Capability::Metrics],
            Instance::Elasticsearch(_) => &[Capability::Logs],
            Instance::Jaeger(_) => &[Capability::Traces],
            Instance::Kiali(_) => &[Capability::Graph],
            Instance::Opsgenie(_) => &[Capability::Incidents],
            Instance::Helm(_) => &[Capability::Packages],
            Instance::Azure(_) => &[Capability::CloudOps],
        }
    }

    pub fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor {
            name: self.name().to_string(),
            plugin: self.plugin().to_string(),
            description: self.description().to_string(),
        }
    }
}

/// The instance configuration lists, one per backend family. This is the
/// plugin part of the configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub prometheus: Vec<prometheus::Config>,
    pub elasticsearch: Vec<elasticsearch::Config>,
    pub jaeger: Vec<jaeger::Config>,
    pub kiali: Vec<kiali::Config>,
    pub opsgenie: Vec<opsgenie::Config>,
    pub helm: Vec<helm::Config>,
    pub azure: Vec<azure::Config>,
}

/// Routes (plugin, instance, operation) triples to adapter instances.
pub struct Dispatcher {
    instances: Vec<Arc<Instance>>,
}

impl Dispatcher {
    /// Registers all configured instances. Invalid instance configuration
    /// is fatal.
    pub fn new(config: Config, registry: Arc<Registry>) -> Result<Self, Error> {
        let mut instances = Vec::new();
        for c in config.prometheus {
            instances.push(Instance::Prometheus(prometheus::Instance::new(c)?));
        }
        for c in config.elasticsearch {
            instances.push(Instance::Elasticsearch(elasticsearch::Instance::new(c)?));
        }
        for c in config.jaeger {
            instances.push(Instance::Jaeger(jaeger::Instance::new(c)?));
        }
        for c in config.kiali {
            instances.push(Instance::Kiali(kiali::Instance::new(c)?));
        }
        for c in config.opsgenie {
            instances.push(Instance::Opsgenie(opsgenie::Instance::new(c)?));
        }
        for c in config.helm {
            instances.push(Instance::Helm(helm::Instance::new(c, registry.clone())));
        }
        for c in config.azure {
            instances.push(Instance::Azure(azure::Instance::new(c)?));
        }

        Ok(Self {
            instances: instances.into_iter().map(Arc::new).collect(),
        })
    }

    /// The catalogue of all registered instances.
    pub fn descriptors(&self) -> Vec<PluginDescriptor> {
        self.instances.iter().map(|i| i.descriptor()).collect()
    }

    /// Resolves an instance of a plugin family:
    ///
    /// 1. linear scan by exact name,
    /// 2. `"default"` resolves to the first configured instance of the
    ///    family,
    /// 3. anything else is an invalid instance name.
    ///
    /// The user must have plugin access to the resolved instance and the
    /// instance must support the requested capability.
    pub fn instance(
        &self,
        plugin: &str,
        name: &str,
        user: &User,
        capability: Capability,
    ) -> Result<Arc<Instance>, Error> {
        let family = || self.instances.iter().filter(|i| i.plugin() == plugin);

        let instance = match family().find(|i| i.name() == name) {
            Some(instance) => instance.clone(),
            None if name == "default" => family()
                .next()
                .cloned()
                .ok_or_else(|| Error::validation("invalid instance name"))?,
            None => return Err(Error::validation("invalid instance name")),
        };

        if !user
            .permissions
            .has_plugin_access(instance.name(), instance.plugin())
        {
            return Err(Error::Authorization(format!(
                "it is not allowed to access the {} plugin {}",
                instance.plugin(),
                instance.name()
            )));
        }

        if !instance.capabilities().contains(&capability) {
            return Err(Error::Unsupported(format!(
                "{} does not support {capability:?}",
                instance.plugin()
            )));
        }

        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> Dispatcher {
        let configs = ["dev-prometheus", "prod-prometheus"]
            .into_iter()
            .map(|name| {
                serde_yaml::from_str::<prometheus::Config>(&format!(
                    "name: {name}\naddress: http://localhost:9090"
                ))
                .unwrap()
            });

        let instances = configs
            .map(|c| Arc::new(Instance::Prometheus(prometheus::Instance::new(c).unwrap())))
            .collect();
        Dispatcher { instances }
    }

    #[test]
    fn resolves_exact_name() {
        let dispatcher = dispatcher();
        let user = User::wildcard("");
        let instance = dispatcher
            .instance("prometheus", "prod-prometheus", &user, Capability::Metrics)
            .unwrap();
        assert_eq!(instance.name(), "prod-prometheus");
    }

    #[test]
    fn default_resolves_to_first_instance() {
        let dispatcher = dispatcher();
        let user = User::wildcard("");
        let instance = dispatcher
            .instance("prometheus", "default", &user, Capability::Metrics)
            .unwrap();
        assert_eq!(instance.name(), "dev-prometheus");
    }

    #[test]
    fn unknown_instance_is_a_validation_error() {
        let dispatcher = dispatcher();
        let user = User::wildcard("");
        match dispatcher.instance("prometheus", "nope", &user, Capability::Metrics) {
            Err(Error::Validation(message)) => assert_eq!(message, "invalid instance name"),
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn unsupported_capability_fails_before_io() {
        let dispatcher = dispatcher();
        let user = User::wildcard("");
        match dispatcher.instance("prometheus", "default", &user, Capability::Logs) {
            Err(Error::Unsupported(_)) => {}
            other => panic!("expected unsupported error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn access_is_checked_against_the_resolved_instance() {
        let dispatcher = dispatcher();
        let user = User {
            email: "user@kobs.io".into(),
            teams: Vec::new(),
            permissions: kobs_core::Permissions {
                plugins: vec![kobs_core::PluginPermission {
                    name: "prod-prometheus".into(),
                    plugin: "prometheus".into(),
                    permissions: Vec::new(),
                }],
                resources: Vec::new(),
            },
        };

        assert!(dispatcher
            .instance("prometheus", "prod-prometheus", &user, Capability::Metrics)
            .is_ok());
        match dispatcher.instance("prometheus", "default", &user, Capability::Metrics) {
            Err(Error::Authorization(_)) => {}
            other => panic!("expected authorization error, got {:?}", other.map(|_| ())),
        }
    }
}
