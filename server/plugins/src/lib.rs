#![forbid(unsafe_code)]

//! The backend adapters and the dispatcher routing requests to them.
//!
//! Every adapter family implements the same operational contract: it is
//! registered from a list of configuration entries, hosts many named
//! instances, and declares the capabilities it supports. The dispatcher
//! resolves (plugin, instance, operation) triples and enforces plugin
//! permissions before any adapter code runs.

pub mod azure;
pub mod elasticsearch;
pub mod helm;
pub mod jaeger;
pub mod kiali;
pub mod opsgenie;
pub mod prometheus;

mod dispatcher;

use std::time::Duration;

use serde::Deserialize;

use kobs_core::Error;

pub use self::dispatcher::{Capability, Config, Dispatcher, Instance, PluginDescriptor};

/// Optional credentials shared by the HTTP-based adapters. Either basic
/// auth or a bearer token.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

impl Credentials {
    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.token {
            return request.bearer_auth(token);
        }
        if let Some(username) = &self.username {
            return request.basic_auth(username, self.password.as_ref());
        }
        request
    }
}

/// The shared reqwest client for an adapter instance.
fn http_client() -> Result<reqwest::Client, Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(Error::configuration)
}

/// Validates an instance address at registration time.
fn validate_address(name: &str, address: &str) -> Result<(), Error> {
    reqwest::Url::parse(address)
        .map_err(|err| Error::configuration(format!("invalid address for {name}: {err}")))?;
    Ok(())
}
