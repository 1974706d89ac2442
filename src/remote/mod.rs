//! Remote query layer: client traits, pagination, HTTP and OAuth clients.

pub mod client;
pub mod http;
pub mod oauth;
pub mod query;

pub use client::{RemoteClient, RemoteConnector, RemoteError};
pub use http::{HttpConnector, SalesforceClient};
pub use oauth::{Identity, LoginEnvironment, OAuthClient, TokenGrant};
pub use query::run_query;
