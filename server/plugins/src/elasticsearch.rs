//! The log-plane adapter for Elasticsearch-compatible backends. Pagination
//! is cursor based: the scroll id returned by the backend is treated as an
//! opaque token and handed back to the caller.

use serde::Serialize;
use serde_json::json;
use tracing::instrument;

use kobs_core::{Error, TimeRange};

use crate::{http_client, validate_address, Credentials};

/// The fixed hit budget of a single page.
const PAGE_SIZE: u64 = 100;

/// The number of buckets of the histogram aggregation.
const HISTOGRAM_BUCKETS: u64 = 30;

/// How long the backend keeps the scroll context alive.
const SCROLL_KEEPALIVE: &str = "15m";

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

/// One page of log documents plus the distribution histogram.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Data {
    pub took: i64,
    pub hits: i64,
    pub documents: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub buckets: Vec<Bucket>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub time: i64,
    pub doc_count: i64,
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

    /// Runs a query-string search bounded by the time range, or continues a
    /// previous search when a cursor is given.
    #[instrument(skip(self), fields(instance = %self.config.name))]
    pub async fn get_logs(
        &self,
        query: &str,
        cursor: Option<&str>,
        time: &TimeRange,
    ) -> Result<Data, Error> {
        let address = self.config.address.trim_end_matches('/');
        let request = match cursor {
            Some(scroll_id) => self
                .client
                .post(format!("{address}/_search/scroll"))
                .json(&json!({
                    "scroll": SCROLL_KEEPALIVE,
                    "scroll_id": scroll_id,
                })),
            None => self
                .client
                .post(format!("{address}/_search?scroll={SCROLL_KEEPALIVE}"))
                .json(&json!({
                    "size": PAGE_SIZE,
                    "sort": [{"@timestamp": {"order": "desc"}}],
                    "query": {
                        "bool": {
                            "must": [
                                {"range": {"@timestamp": {
                                    "gte": time.start * 1000,
                                    "lte": time.end * 1000,
                                }}},
                                {"query_string": {"query": query}},
                            ],
                        },
                    },
                    "aggs": {
                        "logcount": {
                            "auto_date_histogram": {
                                "field": "@timestamp",
                                "buckets": HISTOGRAM_BUCKETS,
                            },
                        },
                    },
                })),
        };

        let response = self
            .config
            .credentials
            .apply(request)
            .send()
            .await
            .map_err(Error::upstream)?;
        let body: serde_json::Value = response.json().await.map_err(Error::upstream)?;

        parse_response(body)
    }
}

/// Parses the search response, surfacing the backend's typed error envelope
/// as `<type>: <reason>`.
fn parse_response(body: serde_json::Value) -> Result<Data, Error> {
    if let Some(error) = body.get("error").filter(|e| e.is_object()) {
        let error_type = error["type"].as_str().unwrap_or("error");
        let reason = error["reason"].as_str().unwrap_or("unknown error");
        return Err(Error::upstream(format!("{error_type}: {reason}")));
    }

    let empty = Vec::new();
    let documents = body["hits"]["hits"].as_array().unwrap_or(&empty).clone();
    let buckets = body["aggregations"]["logcount"]["buckets"]
        .as_array()
        .unwrap_or(&empty)
        .iter()
        .filter_map(|bucket| {
            Some(Bucket {
                time: bucket["key"].as_i64()?,
                doc_count: bucket["doc_count"].as_i64().unwrap_or(0),
            })
        })
        .collect();

    Ok(Data {
        took: body["took"].as_i64().unwrap_or(0),
        hits: body["hits"]["total"]["value"].as_i64().unwrap_or(0),
        documents,
        cursor: body["_scroll_id"].as_str().map(str::to_string),
        buckets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_search_response() {
        let data = parse_response(json!({
            "took": 12,
            "_scroll_id": "c2Nyb2xs",
            "hits": {
                "total": {"value": 420},
                "hits": [{"_source": {"message": "a log line"}}],
            },
            "aggregations": {
                "logcount": {
                    "buckets": [
                        {"key": 1,  "doc_count": 10},
                        {"key": 2, "doc_count": 20},
                    ],
                },
            },
        }))
        .unwrap();

        assert_eq!(data.took, 12);
        assert_eq!(data.hits, 420);
        assert_eq!(data.cursor.as_deref(), Some("c2Nyb2xs"));
        assert_eq!(data.documents.len(), 1);
        assert_eq!(
            data.buckets,
            vec![
                Bucket { time: 1, doc_count: 10 },
                Bucket { time: 2, doc_count: 20 }
            ]
        );
    }

    #[test]
    fn surfaces_the_typed_error_envelope() {
        let result = parse_response(json!({
            "error": {
                "type": "search_phase_execution_exception",
                "reason": "all shards failed",
            },
        }));

        match result {
            Err(Error::Upstream(message)) => {
                assert_eq!(
                    message,
                    "search_phase_execution_exception: all shards failed"
                );
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }
}
