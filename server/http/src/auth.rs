//! Session handling in front of every API route.
//!
//! An OIDC-aware reverse proxy terminates the actual login flow and
//! forwards the identity via request headers. The first request of a user
//! materialises a session: the permissions of all matching User and Team
//! objects are unioned and stored in a signed cookie, so later requests
//! skip the cluster round-trips.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{Redirect, Response};
use axum::{Extension, Json};
use axum_cookie::cookie::Cookie;
use axum_cookie::CookieManager;
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use kobs_core::{Error, Permissions, User};
use kobs_k8s_clusters::Registry;

use crate::error::ApiError;
use crate::AppState;

pub const SESSION_COOKIE: &str = "kobs-auth";

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    pub enabled: bool,
    /// The header carrying the user's email, set by the reverse proxy.
    pub header_email: String,
    /// The header carrying the user's comma-separated team names.
    pub header_teams: String,
    /// The secret used to sign session cookies.
    pub session_token: String,
    /// How long a session cookie is valid, e.g. `48h`.
    pub session_interval: String,
    /// Where the logout endpoint redirects to.
    pub logout_redirect: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            header_email: "x-auth-request-email".to_string(),
            header_teams: "x-auth-request-groups".to_string(),
            session_token: String::new(),
            session_interval: "48h".to_string(),
            logout_redirect: "/oauth2/sign_out".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct Claims {
    user: User,
    exp: i64,
}

/// The outcome of authenticating a request. A token is only minted when a
/// new session was materialised.
pub struct Session {
    pub user: User,
    pub token: Option<String>,
}

pub struct Auth {
    config: AuthConfig,
    interval: Duration,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl Auth {
    pub fn new(config: AuthConfig) -> Result<Self, Error> {
        if config.enabled && config.session_token.is_empty() {
            return Err(Error::configuration(
                "authentication is enabled but no session token is set",
            ));
        }
        let interval = humantime::parse_duration(&config.session_interval)
            .map_err(|err| Error::configuration(format!("invalid session interval: {err}")))?;

        Ok(Self {
            interval,
            encoding_key: EncodingKey::from_secret(config.session_token.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.session_token.as_bytes()),
            config,
        })
    }

    pub fn logout_redirect(&self) -> &str {
        &self.config.logout_redirect
    }

    /// Resolves the user of a request, materialising a new session when
    /// no valid cookie is present.
    pub async fn authenticate(
        &self,
        registry: &Registry,
        headers: &HeaderMap,
        session_cookie: Option<&str>,
    ) -> Result<Session, Error> {
        let email = header_value(headers, &self.config.header_email);

        if !self.config.enabled {
            return Ok(Session {
                user: User::wildcard(email.unwrap_or_default()),
                token: None,
            });
        }

        if let Some(token) = session_cookie {
            match self.validate(token) {
                Ok(user) => return Ok(Session { user, token: None }),
                Err(_) => debug!("invalid session cookie"),
            }
        }

        let Some(email) = email else {
            return Err(Error::Authentication);
        };
        let teams = header_value(headers, &self.config.header_teams)
            .map(|teams| crate::split_list(&teams))
            .unwrap_or_default();

        let user = materialize(registry, email, teams).await;
        let token = self.mint(&user)?;
        Ok(Session {
            user,
            token: Some(token),
        })
    }

    fn mint(&self, user: &User) -> Result<String, Error> {
        let exp = (Utc::now()
            + chrono::Duration::from_std(self.interval).map_err(Error::configuration)?)
        .timestamp();
        let claims = Claims {
            user: user.clone(),
            exp,
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(Error::configuration)
    }

    fn validate(&self, token: &str) -> Result<User, Error> {
        let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|_| Error::Authentication)?;
        Ok(data.claims.user)
    }
}

/// Unions the permissions of every User object matching the email and
/// every Team object the user is a member of. A user nobody declared still
/// gets a session, just without any grants.
async fn materialize(registry: &Registry, email: String, teams: Vec<String>) -> User {
    let mut permissions = Permissions::default();

    for user in registry.get_users().await {
        if user.email == email {
            permissions.extend(&user.permissions);
        }
    }
    if !teams.is_empty() {
        for team in registry.get_teams().await {
            if teams.contains(&team.name) {
                permissions.extend(&team.permissions);
            }
        }
    }

    User {
        email,
        teams,
        permissions,
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub(crate) async fn session(
    State(state): State<Arc<AppState>>,
    cookie: CookieManager,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let session_cookie = cookie.get(SESSION_COOKIE);
    let session = state
        .auth
        .authenticate(
            &state.registry,
            request.headers(),
            session_cookie.as_ref().map(|c| c.value()),
        )
        .await?;

    if let Some(token) = session.token {
        cookie.add(
            Cookie::builder(SESSION_COOKIE, token)
                .path("/")
                .http_only(true)
                .secure(true)
                .build(),
        );
    }

    request.extensions_mut().insert(session.user);
    Ok(next.run(request).await)
}

/// GET /api/auth
pub(crate) async fn me(Extension(user): Extension<User>) -> Json<User> {
    Json(user)
}

/// GET /api/auth/logout
pub(crate) async fn logout(State(state): State<Arc<AppState>>, cookie: CookieManager) -> Redirect {
    cookie.remove(SESSION_COOKIE);
    Redirect::to(state.auth.logout_redirect())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn auth(enabled: bool) -> Auth {
        Auth::new(AuthConfig {
            enabled,
            session_token: "0123456789abcdef".to_string(),
            ..AuthConfig::default()
        })
        .unwrap()
    }

    fn registry() -> Arc<Registry> {
        Registry::with_clusters(Vec::new())
    }

    #[test]
    fn enabled_auth_requires_a_session_token() {
        let result = Auth::new(AuthConfig {
            enabled: true,
            ..AuthConfig::default()
        });
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn sessions_round_trip() {
        let auth = auth(true);
        let user = User::wildcard("jane@kobs.io");
        let token = auth.mint(&user).unwrap();
        let restored = auth.validate(&token).unwrap();
        assert_eq!(restored, user);
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let auth = auth(true);
        let token = auth.mint(&User::wildcard("jane@kobs.io")).unwrap();
        let other = Auth::new(AuthConfig {
            enabled: true,
            session_token: "another-secret-token".to_string(),
            ..AuthConfig::default()
        })
        .unwrap();
        assert!(matches!(other.validate(&token), Err(Error::Authentication)));
    }

    #[tokio::test]
    async fn disabled_auth_preserves_the_email_header() {
        let auth = auth(false);

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-auth-request-email",
            HeaderValue::from_static("jane@kobs.io"),
        );

        let session = auth
            .authenticate(&registry(), &headers, None)
            .await
            .unwrap();
        assert_eq!(session.user.email, "jane@kobs.io");
        assert_eq!(session.user.permissions, Permissions::wildcard());
        assert!(session.token.is_none());
    }

    #[tokio::test]
    async fn missing_identity_is_an_authentication_error() {
        let auth = auth(true);
        let result = auth.authenticate(&registry(), &HeaderMap::new(), None).await;
        assert!(matches!(result, Err(Error::Authentication)));
    }

    #[tokio::test]
    async fn a_valid_cookie_skips_materialisation() {
        let auth = auth(true);
        let user = User::wildcard("jane@kobs.io");
        let token = auth.mint(&user).unwrap();

        let session = auth
            .authenticate(&registry(), &HeaderMap::new(), Some(&token))
            .await
            .unwrap();
        assert_eq!(session.user, user);
        assert!(session.token.is_none());
    }

    #[tokio::test]
    async fn a_new_session_mints_a_token() {
        let auth = auth(true);
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-auth-request-email",
            HeaderValue::from_static("jane@kobs.io"),
        );
        headers.insert(
            "x-auth-request-groups",
            HeaderValue::from_static("team-a, team-b"),
        );

        let session = auth
            .authenticate(&registry(), &headers, Some("garbage"))
            .await
            .unwrap();
        assert_eq!(session.user.email, "jane@kobs.io");
        assert_eq!(session.user.teams, vec!["team-a", "team-b"]);
        assert!(session.token.is_some());
    }
}
