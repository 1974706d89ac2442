//! OAuth web-server flow used to connect new accounts.

use reqwest::Url;
use serde::Deserialize;

use crate::config::OAuthConfig;
use crate::error::AppError;

/// Which login host an account authenticates against.
///
/// Carried through the authorization round-trip in the OAuth `state`
/// parameter so concurrent connections never share mutable login state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginEnvironment {
    /// Production and developer orgs.
    Production,
    /// Sandbox orgs.
    Sandbox,
}

impl LoginEnvironment {
    /// Maps the `/add/{kind}` path segment; anything but `sandbox` is production.
    #[must_use]
    pub fn from_kind(kind: &str) -> Self {
        if kind.eq_ignore_ascii_case("sandbox") {
            Self::Sandbox
        } else {
            Self::Production
        }
    }

    /// Value stored in the OAuth `state` parameter.
    #[must_use]
    pub const fn as_state(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Sandbox => "sandbox",
        }
    }

    /// Reads the environment back from the `state` parameter.
    #[must_use]
    pub fn from_state(state: Option<&str>) -> Self {
        state.map_or(Self::Production, Self::from_kind)
    }
}

/// Tokens returned by the authorization-code exchange.
#[derive(Clone, Deserialize)]
pub struct TokenGrant {
    /// Short-lived access token.
    pub access_token: String,
    /// Long-lived refresh token; stored encrypted.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Base URL of the account's API.
    pub instance_url: String,
    /// Identity service URL for the authenticated user.
    pub id: String,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("instance_url", &self.instance_url)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Identity of the user who authorized the connection.
#[derive(Debug, Clone, Deserialize)]
pub struct Identity {
    /// Account (organization) id.
    pub organization_id: String,
    /// Username of the authorizing user.
    pub username: String,
}

/// Client for the authorization URL, code exchange and identity lookup.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    config: OAuthConfig,
}

impl OAuthClient {
    /// Creates a client over a shared HTTP client.
    #[must_use]
    pub fn new(http: reqwest::Client, config: OAuthConfig) -> Self {
        Self { http, config }
    }

    /// Login host for `env`.
    #[must_use]
    pub fn login_url(&self, env: LoginEnvironment) -> &str {
        match env {
            LoginEnvironment::Production => &self.config.login_url,
            LoginEnvironment::Sandbox => &self.config.sandbox_login_url,
        }
    }

    /// Builds the URL the operator is redirected to.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] if the configured login URL is invalid.
    pub fn authorization_url(&self, env: LoginEnvironment) -> Result<String, AppError> {
        let base = format!(
            "{}/services/oauth2/authorize",
            self.login_url(env).trim_end_matches('/')
        );
        let url = Url::parse_with_params(
            &base,
            &[
                ("response_type", "code"),
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", "api refresh_token"),
                ("state", env.as_state()),
            ],
        )
        .map_err(|e| AppError::Internal(format!("invalid login url: {e}")))?;
        Ok(url.into())
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Upstream`] if the exchange is rejected (for
    /// example an expired or reused code).
    pub async fn exchange_code(
        &self,
        code: &str,
        env: LoginEnvironment,
    ) -> Result<TokenGrant, AppError> {
        let url = format!(
            "{}/services/oauth2/token",
            self.login_url(env).trim_end_matches('/')
        );
        let response = self
            .http
            .post(url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("token exchange failed: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "token exchange rejected ({status}): {body}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("malformed token response: {e}")))
    }

    /// Looks up the identity behind a grant.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Upstream`] on request failure.
    pub async fn identity(&self, grant: &TokenGrant) -> Result<Identity, AppError> {
        let response = self
            .http
            .get(&grant.id)
            .bearer_auth(&grant.access_token)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("identity lookup failed: {e}")))?;
        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "identity lookup rejected ({})",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("malformed identity response: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn client() -> OAuthClient {
        OAuthClient::new(
            reqwest::Client::new(),
            OAuthConfig {
                client_id: "3MVG9client".into(),
                ..OAuthConfig::default()
            },
        )
    }

    #[test]
    fn sandbox_kind_selects_sandbox_host() {
        let Ok(url) = client().authorization_url(LoginEnvironment::from_kind("sandbox")) else {
            panic!("url failed");
        };
        assert!(url.starts_with("https://test.salesforce.com/services/oauth2/authorize?"));
        assert!(url.contains("state=sandbox"));
        assert!(url.contains("client_id=3MVG9client"));
        assert!(url.contains("scope=api+refresh_token"));
    }

    #[test]
    fn other_kinds_use_production_host() {
        let Ok(url) = client().authorization_url(LoginEnvironment::from_kind("production")) else {
            panic!("url failed");
        };
        assert!(url.starts_with("https://login.salesforce.com/"));
        assert_eq!(LoginEnvironment::from_kind("anything"), LoginEnvironment::Production);
    }

    #[test]
    fn state_round_trips() {
        for env in [LoginEnvironment::Production, LoginEnvironment::Sandbox] {
            assert_eq!(LoginEnvironment::from_state(Some(env.as_state())), env);
        }
        assert_eq!(LoginEnvironment::from_state(None), LoginEnvironment::Production);
    }
}
