//! The incident-plane adapter. Reads go against the Opsgenie alert and
//! incident APIs; writes (acknowledge, snooze, close, resolve) are gated by
//! per-user plugin permissions when `permissionsEnabled` is set.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::instrument;

use kobs_core::{Error, User};

use crate::{http_client, validate_address};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub address: String,
    pub api_key: String,
    #[serde(default)]
    pub permissions_enabled: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub tiny_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default)]
    pub snoozed: bool,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "zero_time_as_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "zero_time_as_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub responders: Vec<Responder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Responder {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "type")]
    pub responder_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub tiny_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "zero_time_as_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "zero_time_as_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub responders: Vec<Responder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_properties: Option<Value>,
}

/// Opsgenie serializes the absence of a timestamp as the zero time, which we
/// surface as `None`.
fn zero_time_as_none<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<DateTime<Utc>>::deserialize(deserializer)?;
    Ok(value.filter(|ts| ts.timestamp() > 0))
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
        method: reqwest::Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value, Error> {
        let url = format!("{}{}", self.config.address.trim_end_matches('/'), path);
        let mut request = self
            .client
            .request(method, url)
            .header("Authorization", format!("GenieKey {}", self.config.api_key));
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(Error::upstream)?;
        let status = response.status();
        let body: Value = response.json().await.map_err(Error::upstream)?;
        if !status.is_success() {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("request failed");
            return Err(Error::upstream(format!("{status}: {message}")));
        }
        Ok(body)
    }

    async fn get(&self, path: &str) -> Result<Value, Error> {
        self.request(reqwest::Method::GET, path, &[], None).await
    }

    #[instrument(skip(self), fields(instance = %self.config.name))]
    pub async fn get_alerts(&self, query: &str) -> Result<Vec<Alert>, Error> {
        let body = self
            .request(
                reqwest::Method::GET,
                "/v2/alerts",
                &[
                    ("limit", "100"),
                    ("sort", "createdAt"),
                    ("order", "desc"),
                    ("query", query),
                ],
                None,
            )
            .await?;
        parse_list(body)
    }

    #[instrument(skip(self), fields(instance = %self.config.name))]
    pub async fn get_alert(&self, id: &str) -> Result<Alert, Error> {
        let body = self.get(&format!("/v2/alerts/{id}")).await?;
        let mut alert: Alert = parse_data(body)?;
        // Team responders only carry an id; resolve the name for display.
        for responder in &mut alert.responders {
            if responder.responder_type == "team" && responder.name.is_empty() {
                if let Ok(team) = self.get(&format!("/v2/teams/{}", responder.id)).await {
                    if let Some(name) = team
                        .get("data")
                        .and_then(|data| data.get("name"))
                        .and_then(Value::as_str)
                    {
                        responder.name = name.to_string();
                    }
                }
            }
        }
        Ok(alert)
    }

    #[instrument(skip(self), fields(instance = %self.config.name))]
    pub async fn get_alert_logs(&self, id: &str) -> Result<Value, Error> {
        let body = self.get(&format!("/v2/alerts/{id}/logs")).await?;
        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }

    #[instrument(skip(self), fields(instance = %self.config.name))]
    pub async fn get_alert_notes(&self, id: &str) -> Result<Value, Error> {
        let body = self.get(&format!("/v2/alerts/{id}/notes")).await?;
        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }

    #[instrument(skip(self), fields(instance = %self.config.name))]
    pub async fn get_incidents(&self, query: &str) -> Result<Vec<Incident>, Error> {
        let body = self
            .request(
                reqwest::Method::GET,
                "/v1/incidents",
                &[
                    ("limit", "100"),
                    ("sort", "createdAt"),
                    ("order", "desc"),
                    ("query", query),
                ],
                None,
            )
            .await?;
        parse_list(body)
    }

    #[instrument(skip(self), fields(instance = %self.config.name))]
    pub async fn get_incident_logs(&self, id: &str) -> Result<Value, Error> {
        let body = self.get(&format!("/v1/incidents/{id}/logs")).await?;
        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }

    #[instrument(skip(self), fields(instance = %self.config.name))]
    pub async fn get_incident_notes(&self, id: &str) -> Result<Value, Error> {
        let body = self.get(&format!("/v1/incidents/{id}/notes")).await?;
        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }

    #[instrument(skip(self), fields(instance = %self.config.name))]
    pub async fn get_incident_timeline(&self, id: &str) -> Result<Value, Error> {
        let body = self
            .get(&format!("/v1/incident-timelines/{id}/entries"))
            .await?;
        Ok(body
            .get("data")
            .and_then(|data| data.get("entries"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    #[instrument(skip(self, user), fields(instance = %self.config.name, user = %user.email))]
    pub async fn acknowledge_alert(&self, user: &User, id: &str) -> Result<(), Error> {
        self.check_permissions(user, "acknowledgeAlert")?;
        self.request(
            reqwest::Method::POST,
            &format!("/v2/alerts/{id}/acknowledge"),
            &[],
            Some(json!({"user": user.email})),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, user), fields(instance = %self.config.name, user = %user.email))]
    pub async fn snooze_alert(&self, user: &User, id: &str, snooze: &str) -> Result<(), Error> {
        self.check_permissions(user, "snoozeAlert")?;
        let duration: Duration = humantime::parse_duration(snooze)
            .map_err(|err| Error::validation(format!("invalid snooze duration: {err}")))?;
        let end_time = Utc::now() + chrono::Duration::from_std(duration).map_err(Error::validation)?;
        self.request(
            reqwest::Method::POST,
            &format!("/v2/alerts/{id}/snooze"),
            &[],
            Some(json!({"user": user.email, "endTime": end_time.to_rfc3339()})),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, user), fields(instance = %self.config.name, user = %user.email))]
    pub async fn close_alert(&self, user: &User, id: &str) -> Result<(), Error> {
        self.check_permissions(user, "closeAlert")?;
        self.request(
            reqwest::Method::POST,
            &format!("/v2/alerts/{id}/close"),
            &[],
            Some(json!({"user": user.email})),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, user), fields(instance = %self.config.name, user = %user.email))]
    pub async fn resolve_incident(&self, user: &User, id: &str) -> Result<(), Error> {
        self.check_permissions(user, "resolveIncident")?;
        self.request(
            reqwest::Method::POST,
            &format!("/v1/incidents/{id}/resolve"),
            &[],
            Some(json!({"user": user.email})),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, user), fields(instance = %self.config.name, user = %user.email))]
    pub async fn close_incident(&self, user: &User, id: &str) -> Result<(), Error> {
        self.check_permissions(user, "closeIncident")?;
        self.request(
            reqwest::Method::POST,
            &format!("/v1/incidents/{id}/close"),
            &[],
            Some(json!({"user": user.email})),
        )
        .await?;
        Ok(())
    }

    /// When permissions are enforced the user's plugin permission blobs must
    /// contain the action name or the wildcard.
    fn check_permissions(&self, user: &User, action: &str) -> Result<(), Error> {
        if !self.config.permissions_enabled {
            return Ok(());
        }

        let blobs = user
            .permissions
            .plugin_permissions(&self.config.name, "opsgenie");
        for blob in blobs {
            let actions: Vec<String> = match serde_json::from_value(blob.clone()) {
                Ok(actions) => actions,
                Err(_) => continue,
            };
            if actions.iter().any(|a| a == action || a == "*") {
                return Ok(());
            }
        }

        Err(Error::Authorization(format!(
            "it is not allowed to {action} on the opsgenie plugin {}",
            self.config.name
        )))
    }
}

fn parse_list<T: serde::de::DeserializeOwned>(body: Value) -> Result<Vec<T>, Error> {
    let data = body.get("data").cloned().unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(data).map_err(Error::upstream)
}

fn parse_data<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, Error> {
    let data = body
        .get("data")
        .cloned()
        .ok_or_else(|| Error::upstream("missing data field in response"))?;
    serde_json::from_value(data).map_err(Error::upstream)
}

#[cfg(test)]
mod tests {
    use kobs_core::Permissions;

    use super::*;

    fn instance(name: &str, permissions_enabled: bool) -> Instance {
        Instance::new(Config {
            name: name.to_string(),
            description: String::new(),
            address: "https://api.opsgenie.com".to_string(),
            api_key: "key".to_string(),
            permissions_enabled,
        })
        .unwrap()
    }

    fn user(name: &str, actions: &[&str]) -> User {
        let permissions: Permissions = serde_json::from_value(json!({
            "plugins": [{
                "name": name,
                "plugin": "opsgenie",
                "permissions": [actions],
            }],
            "resources": [],
        }))
        .unwrap();
        User {
            email: "jane@kobs.io".to_string(),
            teams: Vec::new(),
            permissions,
        }
    }

    #[test]
    fn actions_are_open_when_permissions_are_disabled() {
        let instance = instance("opsgenie", false);
        assert!(instance
            .check_permissions(&user("opsgenie", &[]), "closeAlert")
            .is_ok());
    }

    #[test]
    fn actions_require_a_matching_blob() {
        let instance = instance("opsgenie", true);
        assert!(instance
            .check_permissions(&user("opsgenie", &["acknowledgeAlert"]), "acknowledgeAlert")
            .is_ok());
        assert!(instance
            .check_permissions(&user("opsgenie", &["*"]), "closeIncident")
            .is_ok());
        assert!(matches!(
            instance.check_permissions(&user("opsgenie", &["acknowledgeAlert"]), "closeAlert"),
            Err(Error::Authorization(_))
        ));
    }

    #[test]
    fn blobs_are_matched_by_instance_name() {
        // The grant names the instance, not the plugin family.
        let instance = instance("ops", true);
        assert!(instance
            .check_permissions(&user("ops", &["closeAlert"]), "closeAlert")
            .is_ok());
        assert!(matches!(
            instance.check_permissions(&user("ops-eu", &["closeAlert"]), "closeAlert"),
            Err(Error::Authorization(_))
        ));
    }

    #[test]
    fn zero_timestamps_become_none() {
        let alert: Alert = serde_json::from_value(json!({
            "id": "a-1",
            "message": "test",
            "createdAt": "0001-01-01T00:00:00Z",
            "updatedAt": "2026-01-02T03:04:05Z",
        }))
        .unwrap();
        assert!(alert.created_at.is_none());
        assert!(alert.updated_at.is_some());
    }
}
