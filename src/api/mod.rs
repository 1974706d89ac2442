//! HTTP API layer: route handlers, DTOs, admin auth and router composition.

pub mod auth;
pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document of every endpoint.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "orgwatch", description = "Connected-account health dashboard"),
    paths(
        handlers::accounts::list_accounts,
        handlers::accounts::get_account,
        handlers::accounts::account_json,
        handlers::accounts::rank,
        handlers::connect::add_account,
        handlers::connect::oauth_callback,
        handlers::admin::wipe_account,
        handlers::admin::edit_account,
        handlers::admin::refresh_all,
        handlers::admin::reschedule,
        handlers::admin::list_jobs,
        handlers::system::health_handler,
        handlers::system::setup_handler,
    ),
    components(schemas(
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
        dto::CountResponse,
        dto::WipeResponse,
        dto::SetupResponse,
        dto::JobSummaryDto,
        handlers::system::HealthResponse,
    )),
    tags(
        (name = "Accounts", description = "Connected accounts and their snapshots"),
        (name = "Admin", description = "Maintenance actions, require the Admin-Token header"),
        (name = "System", description = "Health and storage setup"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router.
pub fn build_router() -> Router<AppState> {
    #[cfg(feature = "swagger-ui")]
    {
        handlers::routes().merge(
            utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", ApiDoc::openapi()),
        )
    }
    #[cfg(not(feature = "swagger-ui"))]
    {
        handlers::routes()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::test_support::credential;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn state(admin_token: Option<&str>) -> AppState {
        let config = AppConfig {
            persistence_enabled: false,
            admin_token: admin_token.map(str::to_string),
            ..AppConfig::default()
        };
        let Ok(state) = AppState::from_config(&config).await else {
            panic!("state failed to build");
        };
        state
    }

    async fn call(
        state: &AppState,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Body,
    ) -> (StatusCode, axum::http::HeaderMap, Value) {
        let app = build_router().with_state(state.clone());
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Admin-Token", token);
        }
        let Ok(request) = builder.body(body) else {
            panic!("bad request");
        };
        let Ok(response) = app.oneshot(request).await;
        let status = response.status();
        let headers = response.headers().clone();
        let Ok(bytes) = axum::body::to_bytes(response.into_body(), usize::MAX).await else {
            panic!("body failed");
        };
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, json)
    }

    #[tokio::test]
    async fn health_is_public() {
        let state = state(None).await;
        let (status, _, body) = call(&state, Method::GET, "/health", None, Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.get("status"), Some(&json!("healthy")));
    }

    #[tokio::test]
    async fn add_redirects_to_sandbox_login() {
        let state = state(None).await;
        let (status, headers, _) =
            call(&state, Method::GET, "/add/sandbox", None, Body::empty()).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        let location = headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(location.starts_with("https://test.salesforce.com/services/oauth2/authorize"));
        assert!(location.contains("state=sandbox"));
    }

    #[tokio::test]
    async fn callback_without_code_is_rejected() {
        let state = state(None).await;
        let (status, _, body) = call(&state, Method::GET, "/callback", None, Body::empty()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.pointer("/success"), Some(&json!(false)));
        assert_eq!(body.pointer("/error/code"), Some(&json!(1001)));
    }

    #[tokio::test]
    async fn admin_routes_require_the_token() {
        let state = state(Some("s3cret")).await;
        for token in [None, Some("wrong")] {
            let (status, _, body) =
                call(&state, Method::POST, "/refresh", token, Body::empty()).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body.pointer("/error/code"), Some(&json!(1002)));
        }
        let (status, _, body) =
            call(&state, Method::POST, "/refresh", Some("s3cret"), Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true, "count": 0}));
    }

    #[tokio::test]
    async fn admin_routes_are_closed_without_configured_token() {
        let state = state(None).await;
        let (status, _, _) = call(&state, Method::GET, "/jobs", Some(""), Body::empty()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn setup_schedules_purge_and_wipe_queues_deletion() {
        let state = state(Some("s3cret")).await;
        let (status, _, body) = call(&state, Method::GET, "/setup", None, Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.get("collections"), Some(&json!(["credentials", "snapshots"])));

        let (status, _, body) =
            call(&state, Method::POST, "/wipe/00D1", Some("s3cret"), Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.get("job_id").is_some());

        let (status, _, body) =
            call(&state, Method::GET, "/jobs", Some("s3cret"), Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        let kinds: Vec<&str> = body
            .as_array()
            .map(|jobs| jobs.iter().filter_map(|j| j.get("kind")?.as_str()).collect())
            .unwrap_or_default();
        assert_eq!(kinds.len(), 2);
        assert!(kinds.contains(&"purgeOldSnapshots"));
        assert!(kinds.contains(&"deleteAccount"));
    }

    #[tokio::test]
    async fn accounts_are_listed_without_secrets() {
        let state = state(None).await;
        let cred = credential("00D1");
        let _ = state.accounts.repository().upsert_credential(&cred).await;

        let (status, _, body) = call(&state, Method::GET, "/", None, Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        let Some(first) = body.get(0) else {
            panic!("no accounts listed");
        };
        assert_eq!(first.get("accountId"), Some(&json!("00D1")));
        assert!(first.get("refreshToken").is_none());

        let (status, _, body) = call(&state, Method::GET, "/get/00D1", None, Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.get("snapshot"), Some(&Value::Null));

        let (status, _, _) = call(&state, Method::GET, "/json/00D1", None, Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, _) = call(&state, Method::GET, "/get/00D9", None, Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn edit_validates_body() {
        let state = state(Some("s3cret")).await;
        let cred = credential("00D1");
        let _ = state.accounts.repository().upsert_credential(&cred).await;

        let (status, _, _) = call(
            &state,
            Method::POST,
            "/edit/00D1",
            Some("s3cret"),
            Body::from("not json"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, body) = call(
            &state,
            Method::POST,
            "/edit/00D1",
            Some("s3cret"),
            Body::from(r#"{"attributes": [{"name": "Tier 1", "color": "blue"}]}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.pointer("/attributes/0/color"), Some(&json!("blue")));
    }

    #[test]
    fn openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in ["/", "/get/{account_id}", "/json/{account_id}", "/rank", "/add/{kind}", "/callback", "/wipe/{account_id}", "/edit/{account_id}", "/refresh", "/reschedule", "/jobs", "/health", "/setup"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
