//! The cloud-ops adapter for Azure Container Instances. Authenticates via
//! the client-credentials flow and caches the access token until shortly
//! before it expires.

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

use kobs_core::{Error, User};

use crate::http_client;

const MANAGEMENT_URL: &str = "https://management.azure.com";
const LOGIN_URL: &str = "https://login.microsoftonline.com";
const CONTAINER_INSTANCES_API_VERSION: &str = "2023-05-01";

/// Tokens are refreshed this long before their reported expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub credentials: AzureCredentials,
    #[serde(default)]
    pub permissions_enabled: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureCredentials {
    pub subscription_id: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

/// One entry of the permission blob attached to an Azure plugin permission.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzurePermission {
    pub resources: Vec<String>,
    pub resource_groups: Vec<String>,
    pub verbs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

pub struct Instance {
    config: Config,
    client: reqwest::Client,
    token: RwLock<Option<CachedToken>>,
}

impl Instance {
    pub fn new(config: Config) -> Result<Self, Error> {
        if config.credentials.subscription_id.is_empty()
            || config.credentials.tenant_id.is_empty()
            || config.credentials.client_id.is_empty()
            || config.credentials.client_secret.is_empty()
        {
            return Err(Error::configuration(format!(
                "incomplete azure credentials for plugin {}",
                config.name
            )));
        }
        Ok(Self {
            client: http_client()?,
            token: RwLock::new(None),
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn description(&self) -> &str {
        &self.config.description
    }

    async fn access_token(&self) -> Result<String, Error> {
        {
            let token = self.token.read();
            if let Some(token) = token.as_ref() {
                if token.expires_at > Instant::now() {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let url = format!(
            "{LOGIN_URL}/{}/oauth2/v2.0/token",
            self.config.credentials.tenant_id
        );
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.credentials.client_id.as_str()),
            ("client_secret", self.config.credentials.client_secret.as_str()),
            ("scope", "https://management.azure.com/.default"),
        ];
        let response = self
            .client
            .post(url)
            .form(&params)
            .send()
            .await
            .map_err(Error::upstream)?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Authentication);
        }
        let token: TokenResponse = response.json().await.map_err(Error::upstream)?;

        let expires_at = Instant::now()
            + Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        let access_token = token.access_token.clone();
        *self.token.write() = Some(CachedToken {
            access_token: token.access_token,
            expires_at,
        });
        Ok(access_token)
    }

    async fn request(&self, method: reqwest::Method, path: &str) -> Result<Value, Error> {
        let token = self.access_token().await?;
        let url = format!("{MANAGEMENT_URL}{path}");
        let response = self
            .client
            .request(method, url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(Error::upstream)?;
        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let message = body
                .get("error")
                .and_then(|err| err.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("request failed");
            return Err(Error::upstream(format!("{status}: {message}")));
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        response.json().await.or(Ok(Value::Null))
    }

    /// Lists all container groups in a resource group.
    #[instrument(skip(self, user), fields(instance = %self.config.name))]
    pub async fn get_container_groups(
        &self,
        user: &User,
        resource_group: &str,
    ) -> Result<Value, Error> {
        self.check_permissions(user, "containerinstances", resource_group, "get")?;
        let path = format!(
            "/subscriptions/{}/resourceGroups/{resource_group}/providers/Microsoft.ContainerInstance/containerGroups?api-version={CONTAINER_INSTANCES_API_VERSION}",
            self.config.credentials.subscription_id
        );
        let body = self.request(reqwest::Method::GET, &path).await?;
        Ok(body.get("value").cloned().unwrap_or(Value::Array(Vec::new())))
    }

    /// Returns the details of a single container group.
    #[instrument(skip(self, user), fields(instance = %self.config.name))]
    pub async fn get_container_group(
        &self,
        user: &User,
        resource_group: &str,
        container_group: &str,
    ) -> Result<Value, Error> {
        self.check_permissions(user, "containerinstances", resource_group, "get")?;
        let path = format!(
            "/subscriptions/{}/resourceGroups/{resource_group}/providers/Microsoft.ContainerInstance/containerGroups/{container_group}?api-version={CONTAINER_INSTANCES_API_VERSION}",
            self.config.credentials.subscription_id
        );
        self.request(reqwest::Method::GET, &path).await
    }

    /// Restarts all containers in a container group.
    #[instrument(skip(self, user), fields(instance = %self.config.name, user = %user.email))]
    pub async fn restart_container_group(
        &self,
        user: &User,
        resource_group: &str,
        container_group: &str,
    ) -> Result<(), Error> {
        self.check_permissions(user, "containerinstances", resource_group, "restart")?;
        let path = format!(
            "/subscriptions/{}/resourceGroups/{resource_group}/providers/Microsoft.ContainerInstance/containerGroups/{container_group}/restart?api-version={CONTAINER_INSTANCES_API_VERSION}",
            self.config.credentials.subscription_id
        );
        self.request(reqwest::Method::POST, &path).await?;
        Ok(())
    }

    fn check_permissions(
        &self,
        user: &User,
        resource: &str,
        resource_group: &str,
        verb: &str,
    ) -> Result<(), Error> {
        if !self.config.permissions_enabled {
            return Ok(());
        }

        for blob in user
            .permissions
            .plugin_permissions(&self.config.name, "azure")
        {
            let entries: Vec<AzurePermission> = match serde_json::from_value(blob.clone()) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries {
                let resource_ok = entry.resources.iter().any(|r| r == "*" || r == resource);
                let group_ok = entry
                    .resource_groups
                    .iter()
                    .any(|g| g == "*" || g == resource_group);
                let verb_ok = entry.verbs.iter().any(|v| v == "*" || v == verb);
                if resource_ok && group_ok && verb_ok {
                    return Ok(());
                }
            }
        }

        Err(Error::Authorization(format!(
            "it is not allowed to {verb} {resource} in the resource group {resource_group}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use kobs_core::Permissions;
    use serde_json::json;

    use super::*;

    fn instance(name: &str, permissions_enabled: bool) -> Instance {
        Instance::new(Config {
            name: name.to_string(),
            description: String::new(),
            credentials: AzureCredentials {
                subscription_id: "sub".to_string(),
                tenant_id: "tenant".to_string(),
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
            },
            permissions_enabled,
        })
        .unwrap()
    }

    fn user(permissions: Value) -> User {
        User {
            email: "jane@kobs.io".to_string(),
            teams: Vec::new(),
            permissions: serde_json::from_value(permissions).unwrap(),
        }
    }

    #[test]
    fn missing_credentials_are_a_configuration_error() {
        let result = Instance::new(Config {
            name: "azure".to_string(),
            description: String::new(),
            credentials: AzureCredentials {
                subscription_id: String::new(),
                tenant_id: "tenant".to_string(),
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
            },
            permissions_enabled: false,
        });
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn permission_check_requires_all_three_fields() {
        let instance = instance("azure", true);
        let user = user(json!({
            "plugins": [{
                "name": "azure",
                "plugin": "azure",
                "permissions": [[{
                    "resources": ["containerinstances"],
                    "resourceGroups": ["dev"],
                    "verbs": ["get"],
                }]],
            }],
            "resources": [],
        }));

        assert!(instance
            .check_permissions(&user, "containerinstances", "dev", "get")
            .is_ok());
        assert!(matches!(
            instance.check_permissions(&user, "containerinstances", "dev", "restart"),
            Err(Error::Authorization(_))
        ));
        assert!(matches!(
            instance.check_permissions(&user, "containerinstances", "prod", "get"),
            Err(Error::Authorization(_))
        ));
    }

    #[test]
    fn permission_check_is_open_when_disabled() {
        let instance = instance("azure", false);
        let user = user(json!({"plugins": [], "resources": []}));
        assert!(instance
            .check_permissions(&user, "containerinstances", "prod", "restart")
            .is_ok());
    }

    #[test]
    fn blobs_are_matched_by_instance_name() {
        // The grant names the instance, not the plugin family.
        let instance = instance("aci-prod", true);
        let user = user(json!({
            "plugins": [{
                "name": "aci-prod",
                "plugin": "azure",
                "permissions": [[{
                    "resources": ["*"],
                    "resourceGroups": ["*"],
                    "verbs": ["restart"],
                }]],
            }],
            "resources": [],
        }));

        assert!(instance
            .check_permissions(&user, "containerinstances", "dev", "restart")
            .is_ok());
    }
}
