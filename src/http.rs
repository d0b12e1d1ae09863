// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! HTTP Server for Health and Metrics Endpoints
//!
//! Provides REST endpoints for monitoring and health checks.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::hub::Hub;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub hub: Arc<Hub>,
    pub metrics_token: Option<String>,
    pub start_time: Instant,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub connections: usize,
    pub messages: usize,
}

/// Middleware to check bearer token for metrics endpoint.
async fn metrics_auth_middleware(
    State(state): State<HttpState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if request.uri().path() == "/metrics" {
        if let Some(ref expected_token) = state.metrics_token {
            let is_authorized = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
                .is_some_and(|token| token == expected_token);

            if !is_authorized {
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Bearer")],
                    "Unauthorized",
                )
                    .into_response();
            }
        }
    }

    next.run(request).await
}

/// Creates the HTTP router with health and metrics endpoints.
pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/", get(root_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            metrics_auth_middleware,
        ))
        .with_state(state)
}

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "chat-hub",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/chat", "/health", "/metrics"]
    }))
}

/// Health check endpoint - always returns 200 if server is running.
async fn health_handler(State(state): State<HttpState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        connections: state.hub.registry.connected_count(),
        messages: state.hub.store.message_count(),
    })
}

async fn metrics_handler(State(state): State<HttpState>) -> impl IntoResponse {
    state.hub.refresh_store_gauges();
    let metrics_text = state.hub.metrics.encode();

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        metrics_text,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::tests::hub_with_users;
    use axum::body::Body;
    use tower::ServiceExt;

    fn create_test_state(metrics_token: Option<&str>) -> HttpState {
        HttpState {
            hub: Arc::new(hub_with_users(&[])),
            metrics_token: metrics_token.map(str::to_string),
            start_time: Instant::now(),
        }
    }

    async fn get(app: Router, uri: &str, token: Option<&str>) -> Response {
        let mut request = Request::builder().uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        app.oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = create_router(create_test_state(None));
        let response = get(app, "/metrics", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_requires_token_when_configured() {
        let state = create_test_state(Some("s3cret"));

        let response = get(create_router(state.clone()), "/metrics", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = get(create_router(state.clone()), "/metrics", Some("wrong")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = get(create_router(state.clone()), "/metrics", Some("s3cret")).await;
        assert_eq!(response.status(), StatusCode::OK);

        // Health stays open
        let response = get(create_router(state), "/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let state = create_test_state(None);
        let (_caller, _reg) = state.hub.connect("a@x");

        let response = get(create_router(state), "/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["connections"], 1);
        assert_eq!(json["messages"], 0);
    }
}
