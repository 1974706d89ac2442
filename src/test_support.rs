//! Shared fixtures for unit tests: a scripted remote client and sample data.

#![allow(clippy::panic)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::crypto::TokenCipher;
use crate::domain::{AccountCredential, AccountId, ApiUsage, QueryEngine, QueryResult};
use crate::error::AppError;
use crate::remote::{RemoteClient, RemoteConnector, RemoteError};

/// `n` records numbered from `start`.
pub fn records(start: i64, n: i64) -> Vec<Value> {
    (start..start + n)
        .map(|i| json!({"attributes": {"type": "User"}, "n": i}))
        .collect()
}

/// A cipher with a fixed key.
pub fn cipher() -> TokenCipher {
    let Ok(cipher) = TokenCipher::from_hex_key(&"11".repeat(32)) else {
        panic!("fixture key rejected");
    };
    cipher
}

/// A freshly connected credential for `id`.
pub fn credential(id: &str) -> AccountCredential {
    let Ok(account_id) = AccountId::parse(id) else {
        panic!("fixture account id rejected: {id}");
    };
    AccountCredential::connected(
        account_id,
        format!("admin@{}.example.com", id.to_lowercase()),
        "https://acme.my.salesforce.com".into(),
        "https://login.salesforce.com".into(),
        "sealed".into(),
    )
}

/// Remote client answering from scripted pages.
///
/// Continuation locators have the form `{soql}#page={index}`. A query
/// with no script returns an empty, finished page.
#[derive(Debug, Default)]
pub struct FakeRemoteClient {
    pages: HashMap<String, Vec<Vec<Value>>>,
    failures: HashMap<(String, usize), RemoteError>,
    fail_all: Option<RemoteError>,
    latency: Duration,
    query_latency: HashMap<String, Duration>,
    usage: Option<ApiUsage>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    query_more_calls: AtomicUsize,
}

impl FakeRemoteClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pages(mut self, soql: &str, pages: Vec<Vec<Value>>) -> Self {
        self.pages.insert(soql.to_string(), pages);
        self
    }

    pub fn failing_page(mut self, soql: &str, page: usize, error: RemoteError) -> Self {
        self.failures.insert((soql.to_string(), page), error);
        self
    }

    pub fn failing_all(mut self, error: RemoteError) -> Self {
        self.fail_all = Some(error);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_query_latency(mut self, soql: &str, latency: Duration) -> Self {
        self.query_latency.insert(soql.to_string(), latency);
        self
    }

    pub fn with_usage(mut self, used: u64, limit: u64) -> Self {
        self.usage = Some(ApiUsage { used, limit });
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn query_more_calls(&self) -> usize {
        self.query_more_calls.load(Ordering::SeqCst)
    }

    async fn page(&self, soql: &str, index: usize) -> Result<QueryResult, RemoteError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let latency = self.query_latency.get(soql).copied().unwrap_or(self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = &self.fail_all {
            return Err(error.clone());
        }
        if let Some(error) = self.failures.get(&(soql.to_string(), index)) {
            return Err(error.clone());
        }
        let Some(pages) = self.pages.get(soql) else {
            return Ok(QueryResult::page(Vec::new(), 0, None));
        };
        let total = pages.iter().map(Vec::len).sum::<usize>() as u64;
        let records = pages.get(index).cloned().unwrap_or_default();
        let next = (index + 1 < pages.len()).then(|| format!("{soql}#page={}", index + 1));
        Ok(QueryResult::page(records, total, next))
    }
}

#[async_trait]
impl RemoteClient for FakeRemoteClient {
    async fn query(&self, _engine: QueryEngine, soql: &str) -> Result<QueryResult, RemoteError> {
        self.page(soql, 0).await
    }

    async fn query_more(
        &self,
        _engine: QueryEngine,
        next_records_url: &str,
    ) -> Result<QueryResult, RemoteError> {
        self.query_more_calls.fetch_add(1, Ordering::SeqCst);
        let Some((soql, index)) = next_records_url.rsplit_once("#page=") else {
            return Err(RemoteError::named("HttpError", "bad locator"));
        };
        let index = index
            .parse()
            .map_err(|_| RemoteError::named("HttpError", "bad locator"))?;
        self.page(soql, index).await
    }

    fn api_usage(&self) -> Option<ApiUsage> {
        self.usage
    }
}

/// Connector handing out one shared [`FakeRemoteClient`].
#[derive(Debug, Clone)]
pub struct FakeConnector {
    client: Arc<FakeRemoteClient>,
    connects: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn new(client: FakeRemoteClient) -> Self {
        Self {
            client: Arc::new(client),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteConnector for FakeConnector {
    async fn connect(
        &self,
        _credential: &AccountCredential,
    ) -> Result<Arc<dyn RemoteClient>, AppError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.client) as Arc<dyn RemoteClient>)
    }
}
