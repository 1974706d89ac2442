//! HTTP endpoint handlers organized by resource.

pub mod accounts;
pub mod admin;
pub mod connect;
pub mod system;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(accounts::routes())
        .merge(connect::routes())
        .merge(admin::routes())
        .merge(system::routes())
}
