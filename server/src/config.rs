use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use kobs_http::AuthConfig;
use kobs_k8s_clusters::ProviderConfig;

/// The aggregator configuration file. Plugin instance lists live at the
/// top level next to the cluster and auth sections.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub clusters: ClustersConfig,
    pub auth: AuthConfig,
    #[serde(flatten)]
    pub plugins: kobs_plugins::Config,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClustersConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Config {
    /// Reads and parses the configuration file. `${NAME}` references are
    /// replaced with the value of the environment variable before parsing;
    /// an unset variable is an error.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let expanded = expand_env(&raw, |name| std::env::var(name).ok())?;
        let config = serde_yaml::from_str(&expanded)?;
        Ok(config)
    }
}

fn expand_env(
    raw: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<String> {
    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();

    let mut expanded = String::with_capacity(raw.len());
    let mut last = 0;
    for capture in pattern.captures_iter(raw) {
        let whole = capture.get(0).unwrap();
        let name = &capture[1];
        let value = lookup(name)
            .ok_or_else(|| anyhow::anyhow!("environment variable {name} is not set"))?;
        expanded.push_str(&raw[last..whole.start()]);
        expanded.push_str(&value);
        last = whole.end();
    }
    expanded.push_str(&raw[last..]);
    Ok(expanded)
}
