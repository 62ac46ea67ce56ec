//! HTTP binding of the authorization state service
//!
//! Endpoints:
//! - GET    /oauth/state           issue an attempt (`platform`, `pkce`, `redirect_uri` query)
//! - POST   /oauth/state/validate  consume an attempt, 401 on rejection
//! - DELETE /oauth/state           clear a platform's pending attempts
//! - GET    /health                liveness and pending attempt count
//! - GET    /metrics               Prometheus exposition

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use connect_auth::{AuthorizationStateService, BeginOptions, Validation};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tracing::warn;

use crate::error::ApiError;
use crate::metrics::record_response;

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AuthorizationStateService>,
    pub started_at: Instant,
    pub prometheus: PrometheusHandle,
}

/// Build the router with all routes and shared state.
///
/// `max_connections` bounds concurrently handled requests.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/oauth/state", get(begin_handler).delete(clear_handler))
        .route("/oauth/state/validate", post(validate_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

type JsonResponse = (StatusCode, [(HeaderName, &'static str); 1], String);

fn json_response(status: StatusCode, body: serde_json::Value) -> JsonResponse {
    (status, [(CONTENT_TYPE, "application/json")], body.to_string())
}

#[derive(Deserialize)]
struct BeginQuery {
    platform: Option<String>,
    pkce: Option<String>,
    redirect_uri: Option<String>,
}

/// GET /oauth/state
async fn begin_handler(
    State(state): State<AppState>,
    Query(query): Query<BeginQuery>,
) -> Result<JsonResponse, ApiError> {
    let result = begin(&state, query).await;
    record_response("begin", status_of(&result));
    result
}

async fn begin(state: &AppState, query: BeginQuery) -> Result<JsonResponse, ApiError> {
    let platform = query
        .platform
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("platform is required"))?;
    let use_pkce = matches!(query.pkce.as_deref(), Some("true" | "1"));
    let options = BeginOptions {
        use_pkce,
        redirect_uri: query.redirect_uri.filter(|u| !u.is_empty()),
    };

    let response = state
        .service
        .begin_authorization(&platform, options)
        .await
        .map_err(log_failure("begin"))?;

    Ok(json_response(StatusCode::OK, serde_json::json!(response)))
}

#[derive(Deserialize)]
struct ValidateBody {
    state: Option<String>,
    platform: Option<String>,
}

/// POST /oauth/state/validate
async fn validate_handler(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<ValidateBody>,
) -> Result<JsonResponse, ApiError> {
    let result = validate(&state, body).await;
    record_response("validate", status_of(&result));
    result
}

async fn validate(state: &AppState, body: ValidateBody) -> Result<JsonResponse, ApiError> {
    let (Some(state_token), Some(platform)) = (body.state, body.platform) else {
        return Err(ApiError::bad_request("state and platform are required"));
    };

    let validation = state
        .service
        .validate_authorization(&state_token, &platform)
        .await
        .map_err(log_failure("validate"))?;

    let (status, body) = match validation {
        Validation::Valid(attempt) => {
            let mut body = serde_json::json!({ "valid": true });
            if let Some(verifier) = &attempt.code_verifier {
                body["codeVerifier"] = verifier.expose_str().into();
            }
            if let Some(redirect_uri) = attempt.redirect_uri {
                body["redirectUri"] = redirect_uri.into();
            }
            (StatusCode::OK, body)
        }
        Validation::Rejected(reason) => (
            StatusCode::UNAUTHORIZED,
            serde_json::json!({ "valid": false, "error": reason.code() }),
        ),
    };
    Ok(json_response(status, body))
}

#[derive(Deserialize)]
struct ClearBody {
    platform: Option<String>,
}

/// DELETE /oauth/state
async fn clear_handler(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<ClearBody>,
) -> Result<JsonResponse, ApiError> {
    let result = clear(&state, body).await;
    record_response("clear", status_of(&result));
    result
}

async fn clear(state: &AppState, body: ClearBody) -> Result<JsonResponse, ApiError> {
    let platform = body
        .platform
        .ok_or_else(|| ApiError::bad_request("platform is required"))?;
    let cleared = state
        .service
        .clear_authorization(&platform)
        .await
        .map_err(log_failure("clear"))?;
    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({ "success": true, "cleared": cleared }),
    ))
}

fn status_of(result: &Result<JsonResponse, ApiError>) -> u16 {
    match result {
        Ok((status, _, _)) => status.as_u16(),
        Err(e) => e.status.as_u16(),
    }
}

fn log_failure(operation: &'static str) -> impl Fn(connect_auth::Error) -> ApiError {
    move |e| {
        let err = ApiError::from(e);
        if err.status.is_server_error() {
            warn!(operation, error = %err.message, "authorization state operation failed");
        }
        err
    }
}

/// GET /health: pending attempt count and uptime. 503 if the store is unreachable.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();
    match state.service.pending().await {
        Ok(pending) => json_response(
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "pendingAttempts": pending,
                "uptimeSeconds": uptime,
            }),
        ),
        Err(e) => json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "degraded",
                "error": e.to_string(),
                "uptimeSeconds": uptime,
            }),
        ),
    }
}

/// GET /metrics: Prometheus text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Method, Request};
    use common::Platform;
    use connect_auth::{AuthorizationAttempt, MemoryStateStore, compute_challenge};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    /// PrometheusHandle without installing a global recorder.
    fn test_prometheus_handle() -> PrometheusHandle {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle()
    }

    fn test_state(platforms: &[Platform]) -> AppState {
        let store = Arc::new(MemoryStateStore::<AuthorizationAttempt>::new());
        AppState {
            service: Arc::new(AuthorizationStateService::new(
                store,
                platforms.iter().copied(),
                Duration::from_secs(600),
            )),
            started_at: Instant::now(),
            prometheus: test_prometheus_handle(),
        }
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn validate(app: &Router, state: &str, platform: &str) -> (StatusCode, Value) {
        send(
            app,
            Method::POST,
            "/oauth/state/validate",
            Some(json!({ "state": state, "platform": platform })),
        )
        .await
    }

    #[tokio::test]
    async fn issue_then_validate_with_pkce() {
        let app = build_router(test_state(&Platform::ALL), 1000);

        let (status, issued) = send(
            &app,
            Method::GET,
            "/oauth/state?platform=QUICKBOOKS&pkce=true&redirect_uri=https%3A%2F%2Fdash.example.com%2Fcb",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let state = issued["state"].as_str().unwrap().to_string();
        assert_eq!(state.len(), 43);
        assert_eq!(issued["codeChallengeMethod"], "S256");

        let (status, body) = validate(&app, &state, "QUICKBOOKS").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], true);
        assert_eq!(body["redirectUri"], "https://dash.example.com/cb");
        let verifier = body["codeVerifier"].as_str().unwrap();
        assert_eq!(compute_challenge(verifier), issued["codeChallenge"]);

        // One-time use
        let (status, body) = validate(&app, &state, "QUICKBOOKS").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "valid": false, "error": "invalid_or_expired" }));
    }

    #[tokio::test]
    async fn issue_without_pkce_omits_challenge() {
        let app = build_router(test_state(&Platform::ALL), 1000);
        let (status, issued) = send(&app, Method::GET, "/oauth/state?platform=stripe", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(issued.get("codeChallenge").is_none());
        assert!(issued.get("codeChallengeMethod").is_none());

        let (_, body) = validate(&app, issued["state"].as_str().unwrap(), "STRIPE").await;
        assert_eq!(body, json!({ "valid": true }));
    }

    #[tokio::test]
    async fn missing_or_unknown_platform_is_400() {
        let app = build_router(test_state(&[Platform::Xero]), 1000);

        let (status, body) = send(&app, Method::GET, "/oauth/state", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "platform is required");

        let (status, body) = send(&app, Method::GET, "/oauth/state?platform=SALESFORCE", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unknown platform: SALESFORCE");

        // Known platform, but not enabled on this gateway
        let (status, _) = send(&app, Method::GET, "/oauth/state?platform=HUBSPOT", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn platform_mismatch_is_401_and_consumes() {
        let app = build_router(test_state(&Platform::ALL), 1000);
        let (_, issued) = send(&app, Method::GET, "/oauth/state?platform=HUBSPOT", None).await;
        let state = issued["state"].as_str().unwrap();

        let (status, body) = validate(&app, state, "STRIPE").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "valid": false, "error": "platform_mismatch" }));

        let (_, body) = validate(&app, state, "HUBSPOT").await;
        assert_eq!(body["error"], "invalid_or_expired");
    }

    #[tokio::test]
    async fn validate_requires_state_and_platform() {
        let app = build_router(test_state(&Platform::ALL), 1000);
        let (status, body) = send(
            &app,
            Method::POST,
            "/oauth/state/validate",
            Some(json!({ "state": "abc" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "state and platform are required");
    }

    #[tokio::test]
    async fn clear_removes_only_that_platform() {
        let app = build_router(test_state(&Platform::ALL), 1000);
        let (_, xero_a) = send(&app, Method::GET, "/oauth/state?platform=XERO", None).await;
        send(&app, Method::GET, "/oauth/state?platform=XERO", None).await;
        let (_, hubspot) = send(&app, Method::GET, "/oauth/state?platform=HUBSPOT", None).await;

        let (status, body) = send(
            &app,
            Method::DELETE,
            "/oauth/state",
            Some(json!({ "platform": "XERO" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true, "cleared": 2 }));

        let (_, body) = validate(&app, xero_a["state"].as_str().unwrap(), "XERO").await;
        assert_eq!(body["error"], "invalid_or_expired");
        let (_, body) = validate(&app, hubspot["state"].as_str().unwrap(), "HUBSPOT").await;
        assert_eq!(body["valid"], true);

        let (status, _) = send(&app, Method::DELETE, "/oauth/state", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_state_is_rejected() {
        let app = build_router(test_state(&Platform::ALL), 1000);
        let (_, issued) = send(&app, Method::GET, "/oauth/state?platform=XERO", None).await;

        tokio::time::advance(Duration::from_secs(601)).await;
        let (status, body) = validate(&app, issued["state"].as_str().unwrap(), "XERO").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid_or_expired");
    }

    #[tokio::test]
    async fn health_reports_pending_attempts() {
        let app = build_router(test_state(&Platform::ALL), 1000);
        send(&app, Method::GET, "/oauth/state?platform=XERO", None).await;

        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["pendingAttempts"], 1);
        assert!(body["uptimeSeconds"].is_u64());
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text() {
        let app = build_router(test_state(&Platform::ALL), 1000);
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "text/plain; version=0.0.4; charset=utf-8"
        );
    }
}
