//! The metric-plane adapter for Prometheus-compatible backends.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use kobs_core::{
    variable::{interpolate, interpolate_labels},
    Error, TimeRange, Variable,
};

use crate::{http_client, validate_address, Credentials};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub address: String,
    #[serde(flatten)]
    pub credentials: Credentials,
}

/// One metric query. The label template is interpolated with each series'
/// label set.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub query: String,
    #[serde(default)]
    pub label: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub label: String,
    pub min: f64,
    pub max: f64,
    pub data: Vec<Point>,
}

/// A single sample; `x` is a millisecond timestamp.
#[derive(Clone, Debug, Serialize)]
pub struct Point {
    pub x: i64,
    pub y: f64,
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

    async fn request(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value, Error> {
        let url = format!("{}{}", self.config.address.trim_end_matches('/'), path);
        let request = self.config.credentials.apply(self.client.get(url).query(params));
        let response = request.send().await.map_err(Error::upstream)?;
        let body: serde_json::Value = response.json().await.map_err(Error::upstream)?;

        if body["status"] == "error" {
            let error_type = body["errorType"].as_str().unwrap_or("error");
            let reason = body["error"].as_str().unwrap_or("unknown error");
            return Err(Error::upstream(format!("{error_type}: {reason}")));
        }

        Ok(body)
    }

    /// Resolves the values of the given variables in order. Variable `i`
    /// only sees the values of variables `0..i`.
    #[instrument(skip(self, variables), fields(instance = %self.config.name))]
    pub async fn get_variables(
        &self,
        time: &TimeRange,
        variables: &mut [Variable],
    ) -> Result<(), Error> {
        for i in 0..variables.len() {
            let (resolved, rest) = variables.split_at_mut(i);
            let variable = &mut rest[0];

            let query = interpolate(&variable.query, resolved);
            let body = self
                .request(
                    "/api/v1/series",
                    &[
                        ("match[]", query),
                        ("start", time.start.to_string()),
                        ("end", time.end.to_string()),
                    ],
                )
                .await?;

            let mut values: Vec<String> = body["data"]
                .as_array()
                .map(|series| {
                    series
                        .iter()
                        .filter_map(|s| s.get(&variable.label))
                        .filter_map(|v| v.as_str())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            values.sort();
            values.dedup();

            variable.set_values(values);
        }

        Ok(())
    }

    /// Runs each query as a range query at the derived resolution and
    /// returns one metric per series.
    #[instrument(skip(self, variables, queries), fields(instance = %self.config.name))]
    pub async fn get_metrics(
        &self,
        time: &TimeRange,
        resolution: Option<&str>,
        variables: &[Variable],
        queries: &[Query],
    ) -> Result<Vec<Metric>, Error> {
        let step = time.resolution_or(resolution);

        let mut metrics = Vec::new();
        for query in queries {
            let promql = interpolate(&query.query, variables);
            let body = self
                .request(
                    "/api/v1/query_range",
                    &[
                        ("query", promql),
                        ("start", time.start.to_string()),
                        ("end", time.end.to_string()),
                        ("step", step.to_string()),
                    ],
                )
                .await?;

            let data = &body["data"];
            if data["resultType"] != "matrix" {
                return Err(Error::upstream(format!(
                    "unexpected result type: {}",
                    data["resultType"]
                )));
            }

            let empty = Vec::new();
            for series in data["result"].as_array().unwrap_or(&empty) {
                let labels: BTreeMap<String, String> = series["metric"]
                    .as_object()
                    .map(|labels| {
                        labels
                            .iter()
                            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                            .collect()
                    })
                    .unwrap_or_default();

                let mut min = f64::INFINITY;
                let mut max = f64::NEG_INFINITY;
                let mut points = Vec::new();
                for value in series["values"].as_array().unwrap_or(&empty) {
                    let Some(timestamp) = value.get(0).and_then(|v| v.as_f64()) else {
                        continue;
                    };
                    let Some(y) = value
                        .get(1)
                        .and_then(|v| v.as_str())
                        .and_then(|v| v.parse::<f64>().ok())
                    else {
                        continue;
                    };

                    min = min.min(y);
                    max = max.max(y);
                    points.push(Point {
                        x: (timestamp * 1000.0) as i64,
                        y,
                    });
                }
                if points.is_empty() {
                    min = 0.0;
                    max = 0.0;
                }

                metrics.push(Metric {
                    label: series_label(&query.label, &labels),
                    min,
                    max,
                    data: points,
                });
            }
        }

        Ok(metrics)
    }
}

/// Interpolates the label template with a series' label set. When the
/// interpolation fails the raw template is used; when the result is empty
/// the stringified label set is used.
fn series_label(template: &str, labels: &BTreeMap<String, String>) -> String {
    match interpolate_labels(template, labels) {
        Some(label) if !label.is_empty() => label,
        Some(_) => stringify_labels(labels),
        None => template.to_string(),
    }
}

fn stringify_labels(labels: &BTreeMap<String, String>) -> String {
    let inner = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{v}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{inner}}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn label_interpolation_with_fallbacks() {
        let labels = labels(&[("instance", "i1"), ("job", "node")]);

        assert_eq!(series_label("{{.instance}}", &labels), "i1");
        // Unknown label: the raw template is kept.
        assert_eq!(series_label("{{.pod}}", &labels), "{{.pod}}");
        // Empty result: the stringified label set is used.
        assert_eq!(
            series_label("", &labels),
            "{instance=\"i1\", job=\"node\"}"
        );
    }
}
