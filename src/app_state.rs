//! Shared application state injected into all Axum handlers, and the
//! wiring that builds it from configuration.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

use crate::config::AppConfig;
use crate::crypto::TokenCipher;
use crate::domain::default_battery;
use crate::error::AppError;
use crate::jobs::register_job_kinds;
use crate::persistence::{
    AccountRepository, DocumentStore, MemoryDocumentStore, PostgresDocumentStore, PostgresJobStore,
};
use crate::remote::{HttpConnector, OAuthClient, RemoteConnector};
use crate::scheduler::{JobStore, MemoryJobStore, Scheduler};
use crate::service::{AccountRefresh, AccountService, FanOutExecutor};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Account operations and job scheduling.
    pub accounts: AccountService,
    /// OAuth web-server flow for connecting accounts.
    pub oauth: Arc<OAuthClient>,
    /// Expected `Admin-Token` header; admin routes are closed when unset.
    pub admin_token: Option<Arc<str>>,
}

impl AppState {
    /// The job scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        self.accounts.scheduler()
    }

    /// Builds stores, clients, services and job handlers from `config`.
    ///
    /// Uses PostgreSQL when persistence is enabled and in-memory stores
    /// otherwise. The scheduler is returned stopped.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] if the database is unreachable,
    /// [`AppError::Crypto`] for a malformed or missing encryption key, or
    /// [`AppError::Internal`] if the HTTP client cannot be built.
    pub async fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let cipher = Arc::new(token_cipher(config)?);

        let (documents, job_store): (Arc<dyn DocumentStore>, Arc<dyn JobStore>) =
            if config.persistence_enabled {
                let pool = PgPoolOptions::new()
                    .max_connections(config.database_max_connections)
                    .min_connections(config.database_min_connections)
                    .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
                    .connect(&config.database_url)
                    .await
                    .map_err(|e| AppError::Persistence(format!("database connection failed: {e}")))?;
                tracing::info!("connected to PostgreSQL");
                (
                    Arc::new(PostgresDocumentStore::new(pool.clone())),
                    Arc::new(PostgresJobStore::new(pool)),
                )
            } else {
                tracing::warn!("persistence disabled, using in-memory stores");
                (
                    Arc::new(MemoryDocumentStore::new()),
                    Arc::new(MemoryJobStore::new()),
                )
            };

        let http = reqwest::Client::builder()
            .timeout(config.refresh.request_timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("http client: {e}")))?;

        let repository = AccountRepository::new(documents);
        let scheduler = Scheduler::new(
            job_store,
            config.scheduler.clone(),
            config.jobs.lock_lifetime,
        );
        let accounts = AccountService::new(
            repository.clone(),
            scheduler.clone(),
            Arc::clone(&cipher),
            config.jobs.clone(),
        );

        let connector: Arc<dyn RemoteConnector> = Arc::new(HttpConnector::new(
            http.clone(),
            config.oauth.clone(),
            cipher,
        ));
        let refresh = AccountRefresh::new(
            repository,
            connector,
            default_battery(&config.refresh.corp_domain).into(),
            FanOutExecutor::new(
                config.refresh.fanout_concurrency,
                config.refresh.large_result_threshold,
            ),
        );
        register_job_kinds(&scheduler, &config.jobs, refresh, &accounts).await;

        if config.admin_token.is_none() {
            tracing::warn!("ADMIN_TOKEN not set, admin endpoints are disabled");
        }

        Ok(Self {
            accounts,
            oauth: Arc::new(OAuthClient::new(http, config.oauth.clone())),
            admin_token: config.admin_token.as_deref().map(Arc::from),
        })
    }
}

/// Builds the token cipher. A random key is only allowed for in-memory
/// stores, where nothing sealed outlives the process.
fn token_cipher(config: &AppConfig) -> Result<TokenCipher, AppError> {
    match &config.encryption_key {
        Some(key) => TokenCipher::from_hex_key(key),
        None if config.persistence_enabled => Err(AppError::Crypto(
            "ENCRYPTION_KEY is required when persistence is enabled".into(),
        )),
        None => {
            tracing::warn!("ENCRYPTION_KEY not set, using a random key for in-memory stores");
            Ok(TokenCipher::ephemeral())
        }
    }
}
