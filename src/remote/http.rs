//! HTTP implementation of the remote client over the REST query API.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tokio::sync::RwLock;

use super::{RemoteClient, RemoteConnector, RemoteError};
use crate::config::OAuthConfig;
use crate::crypto::TokenCipher;
use crate::domain::{AccountCredential, ApiUsage, QueryEngine, QueryResult};
use crate::error::AppError;

/// Response header carrying quota usage, e.g. `api-usage=18/15000`.
pub const LIMIT_INFO_HEADER: &str = "Sforce-Limit-Info";

#[derive(Debug, Deserialize)]
struct RefreshGrant {
    access_token: String,
}

/// Parses `api-usage=<used>/<limit>` out of a limit-info header value.
#[must_use]
pub fn parse_limit_info(value: &str) -> Option<ApiUsage> {
    value.split(',').find_map(|part| {
        let (key, usage) = part.trim().split_once('=')?;
        if key.trim() != "api-usage" {
            return None;
        }
        let (used, limit) = usage.split_once('/')?;
        Some(ApiUsage {
            used: used.trim().parse().ok()?,
            limit: limit.trim().parse().ok()?,
        })
    })
}

fn transport_error(e: &reqwest::Error) -> RemoteError {
    let name = if e.is_timeout() {
        "TimeoutError"
    } else if e.is_decode() {
        "DecodeError"
    } else {
        "HttpError"
    };
    RemoteError::named(name, e.to_string())
}

/// Maps a non-success response body to a [`RemoteError`].
fn upstream_error(status: StatusCode, body: &str) -> RemoteError {
    let parsed = serde_json::from_str::<Vec<RemoteError>>(body)
        .ok()
        .and_then(|errors| errors.into_iter().next())
        .or_else(|| serde_json::from_str::<RemoteError>(body).ok())
        .filter(|e| e.code.is_some());
    parsed.unwrap_or_else(|| RemoteError {
        code: None,
        name: Some(format!("HTTP{}", status.as_u16())),
        message: body.chars().take(512).collect(),
    })
}

/// Query client for one account, authenticated by refresh token.
///
/// The access token is obtained lazily and re-obtained once when a request
/// comes back `401 Unauthorized`.
pub struct SalesforceClient {
    http: reqwest::Client,
    instance_url: String,
    token_url: String,
    api_version: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    access_token: RwLock<Option<String>>,
    api_used: AtomicU64,
    api_limit: AtomicU64,
}

impl std::fmt::Debug for SalesforceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesforceClient")
            .field("instance_url", &self.instance_url)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl SalesforceClient {
    fn new(
        http: reqwest::Client,
        oauth: &OAuthConfig,
        credential: &AccountCredential,
        refresh_token: String,
    ) -> Self {
        Self {
            http,
            instance_url: credential.instance_url.trim_end_matches('/').to_string(),
            token_url: format!(
                "{}/services/oauth2/token",
                credential.login_url.trim_end_matches('/')
            ),
            api_version: oauth.api_version.clone(),
            client_id: oauth.client_id.clone(),
            client_secret: oauth.client_secret.clone(),
            refresh_token,
            access_token: RwLock::new(None),
            api_used: AtomicU64::new(0),
            api_limit: AtomicU64::new(0),
        }
    }

    fn query_url(&self, engine: QueryEngine) -> String {
        match engine {
            QueryEngine::Default => {
                format!("{}/services/data/v{}/query", self.instance_url, self.api_version)
            }
            QueryEngine::Tooling => format!(
                "{}/services/data/v{}/tooling/query",
                self.instance_url, self.api_version
            ),
        }
    }

    async fn refresh_access_token(&self) -> Result<String, RemoteError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.refresh_token.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let mut err = upstream_error(status, &body);
            if let Ok(oauth) = serde_json::from_str::<serde_json::Value>(&body) {
                if let Some(code) = oauth.get("error").and_then(serde_json::Value::as_str) {
                    err.code = Some(code.to_string());
                }
            }
            return Err(err);
        }
        let grant: RefreshGrant = response.json().await.map_err(|e| transport_error(&e))?;
        tracing::debug!(instance = %self.instance_url, "refreshed access token");
        *self.access_token.write().await = Some(grant.access_token.clone());
        Ok(grant.access_token)
    }

    async fn current_token(&self) -> Result<String, RemoteError> {
        if let Some(token) = self.access_token.read().await.clone() {
            return Ok(token);
        }
        self.refresh_access_token().await
    }

    fn record_usage(&self, headers: &HeaderMap) {
        let usage = headers
            .get(LIMIT_INFO_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_limit_info);
        if let Some(usage) = usage {
            self.api_used.store(usage.used, Ordering::Relaxed);
            self.api_limit.store(usage.limit, Ordering::Relaxed);
        }
    }

    async fn fetch(&self, url: &str, soql: Option<&str>) -> Result<QueryResult, RemoteError> {
        let send = |token: String| {
            let mut request = self.http.get(url).bearer_auth(token);
            if let Some(soql) = soql {
                request = request.query(&[("q", soql)]);
            }
            request.send()
        };

        let token = self.current_token().await?;
        let mut response = send(token).await.map_err(|e| transport_error(&e))?;
        if response.status() == StatusCode::UNAUTHORIZED {
            let token = self.refresh_access_token().await?;
            response = send(token).await.map_err(|e| transport_error(&e))?;
        }

        self.record_usage(response.headers());
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(upstream_error(status, &body));
        }
        response.json().await.map_err(|e| transport_error(&e))
    }
}

#[async_trait]
impl RemoteClient for SalesforceClient {
    async fn query(&self, engine: QueryEngine, soql: &str) -> Result<QueryResult, RemoteError> {
        self.fetch(&self.query_url(engine), Some(soql)).await
    }

    async fn query_more(
        &self,
        _engine: QueryEngine,
        next_records_url: &str,
    ) -> Result<QueryResult, RemoteError> {
        // nextRecordsUrl already names the engine's endpoint.
        let url = if next_records_url.starts_with("http") {
            next_records_url.to_string()
        } else {
            format!("{}{next_records_url}", self.instance_url)
        };
        self.fetch(&url, None).await
    }

    fn api_usage(&self) -> Option<ApiUsage> {
        let used = self.api_used.load(Ordering::Relaxed);
        let limit = self.api_limit.load(Ordering::Relaxed);
        (used > 0 && limit > 0).then_some(ApiUsage { used, limit })
    }
}

/// Opens [`SalesforceClient`]s, decrypting the stored refresh token.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    http: reqwest::Client,
    oauth: OAuthConfig,
    cipher: Arc<TokenCipher>,
}

impl HttpConnector {
    /// Creates a connector sharing one HTTP client across accounts.
    #[must_use]
    pub fn new(http: reqwest::Client, oauth: OAuthConfig, cipher: Arc<TokenCipher>) -> Self {
        Self { http, oauth, cipher }
    }
}

#[async_trait]
impl RemoteConnector for HttpConnector {
    async fn connect(
        &self,
        credential: &AccountCredential,
    ) -> Result<Arc<dyn RemoteClient>, AppError> {
        let refresh_token = self.cipher.decrypt_str(&credential.refresh_token)?;
        Ok(Arc::new(SalesforceClient::new(
            self.http.clone(),
            &self.oauth,
            credential,
            refresh_token,
        )))
    }
}
