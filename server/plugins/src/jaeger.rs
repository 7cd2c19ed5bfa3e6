//! The trace-plane adapter for Jaeger-compatible backends. Services and
//! operations are parsed; trace responses are passed through as opaque
//! strings. Time parameters are converted to microseconds at the boundary.

use tracing::instrument;

use kobs_core::{Error, TimeRange};

use crate::{http_client, validate_address, Credentials};

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub address: String,
    #[serde(flatten)]
    pub credentials: Credentials,
}

pub struct Instance {
    config: Config,
    client: reqwest::Client,
}

impl Instance {
    pub fn new(config: Config) -> Result<Self, Error> {
        validate_address(&config.name, &config.address)?;
        Ok(Self {
            client: http_client()?,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn description(&self) -> &str {
        &self.config.description
    }

    async fn request(&self, path: &str, params: &[(&str, String)]) -> Result<String, Error> {
        let url = format!("{}{}", self.config.address.trim_end_matches('/'), path);
        let request = self.config.credentials.apply(self.client.get(url).query(params));
        let response = request.send().await.map_err(Error::upstream)?;

        let status = response.status();
        let body = response.text().await.map_err(Error::upstream)?;
        if !status.is_success() {
            return Err(Error::upstream(body));
        }
        Ok(body)
    }

    #[instrument(skip(self), fields(instance = %self.config.name))]
    pub async fn get_services(&self) -> Result<serde_json::Value, Error> {
        let body = self.request("/api/services", &[]).await?;
        serde_json::from_str(&body).map_err(Error::upstream)
    }

    #[instrument(skip(self), fields(instance = %self.config.name))]
    pub async fn get_operations(&self, service: &str) -> Result<serde_json::Value, Error> {
        let body = self
            .request("/api/operations", &[("service", service.to_string())])
            .await?;
        serde_json::from_str(&body).map_err(Error::upstream)
    }

    /// The traces matching the given filters, as the backend's raw
    /// response.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self), fields(instance = %self.config.name))]
    pub async fn get_traces(
        &self,
        limit: &str,
        max_duration: &str,
        min_duration: &str,
        operation: &str,
        service: &str,
        tags: &str,
        time: &TimeRange,
    ) -> Result<String, Error> {
        let mut params = vec![
            ("start", (time.start * 1_000_000).to_string()),
            ("end", (time.end * 1_000_000).to_string()),
            ("limit", limit.to_string()),
            ("service", service.to_string()),
        ];
        if !max_duration.is_empty() {
            params.push(("maxDuration", max_duration.to_string()));
        }
        if !min_duration.is_empty() {
            params.push(("minDuration", min_duration.to_string()));
        }
        if !operation.is_empty() {
            params.push(("operation", operation.to_string()));
        }
        if !tags.is_empty() {
            params.push(("tags", tags.to_string()));
        }

        self.request("/api/traces", &params).await
    }

    /// A single trace by id, as the backend's raw response.
    #[instrument(skip(self), fields(instance = %self.config.name))]
    pub async fn get_trace(&self, trace_id: &str) -> Result<String, Error> {
        self.request(&format!("/api/traces/{trace_id}"), &[]).await
    }
}
