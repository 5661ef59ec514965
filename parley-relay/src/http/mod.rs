//! HTTP endpoints: QR pairing, health, and metrics.
//!
//! The HTTP listener is a sidecar to the QUIC relay. Pairing verbs live
//! here because the device being paired has no relay credential yet and
//! so cannot open an authenticated connection.

mod health;
mod metrics;
mod qr;

pub use health::init_start_time;

use crate::server::ParleyRelay;
use axum::routing::{get, post};
use axum::{Extension, Router};
use std::sync::Arc;

/// Build the HTTP router over the shared server state.
pub fn build_router(relay: Arc<ParleyRelay>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(metrics::metrics))
        .route("/api/qr/generate", post(qr::generate))
        .route("/api/qr/login", post(qr::login))
        .route("/api/qr/scan", post(qr::scan))
        .layer(Extension(relay))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credentials, DevCredentials};
    use crate::config::Config;
    use crate::storage::{NewUser, SqliteStorage, Storage};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use parley_types::UserId;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn test_router() -> (Router, Arc<ParleyRelay>, Arc<DevCredentials>) {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::in_memory().await.unwrap());
        let credentials = Arc::new(DevCredentials::new());
        let relay = Arc::new(ParleyRelay::new(
            Config::default(),
            storage,
            Arc::clone(&credentials) as Arc<dyn Credentials>,
        ));
        (build_router(Arc::clone(&relay)), relay, credentials)
    }

    async fn make_user(relay: &ParleyRelay, email: &str) -> UserId {
        relay
            .storage()
            .create_user(NewUser {
                email: email.to_string(),
                display_name: "User".to_string(),
                username: "user".to_string(),
                avatar_url: None,
            })
            .await
            .unwrap()
            .id
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (router, _, _) = test_router().await;
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn metrics_exposes_relay_counters() {
        let (router, _, _) = test_router().await;
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("parley_relay_connections_total"));
        assert!(text.contains("parley_relay_messages_suppressed_total"));
        assert!(text.contains("parley_relay_pairing_codes_active"));
    }

    #[tokio::test]
    async fn generate_returns_code_and_expiry() {
        let (router, _, _) = test_router().await;
        let response = router
            .oneshot(json_post("/api/qr/generate", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["code"].as_str().unwrap().len(), 64);
        assert!(json["expires_at"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn login_unknown_code_is_invalid() {
        let (router, _, _) = test_router().await;
        let response = router
            .oneshot(json_post(
                "/api/qr/login",
                serde_json::json!({"code": "deadbeef"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "invalid");
    }

    #[tokio::test]
    async fn scan_without_bearer_is_unauthorized() {
        let (router, _, _) = test_router().await;
        let response = router
            .oneshot(json_post(
                "/api/qr/scan",
                serde_json::json!({"code": "deadbeef"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn full_pairing_flow_over_http() {
        let (router, relay, credentials) = test_router().await;
        let alice = make_user(&relay, "alice@example.com").await;
        credentials.issue("alice-token", alice);

        // new device generates a code
        let response = router
            .clone()
            .oneshot(json_post("/api/qr/generate", serde_json::json!({})))
            .await
            .unwrap();
        let code = body_json(response).await["code"].as_str().unwrap().to_string();

        // polling before approval: pending
        let response = router
            .clone()
            .oneshot(json_post("/api/qr/login", serde_json::json!({"code": code})))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["status"], "pending");

        // logged-in device scans and approves
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/qr/scan")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::AUTHORIZATION, "Bearer alice-token")
                    .body(Body::from(serde_json::json!({"code": code}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "success");

        // new device polls again: confirmed, with token and profile
        let response = router
            .clone()
            .oneshot(json_post("/api/qr/login", serde_json::json!({"code": code})))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["status"], "confirmed");
        assert_eq!(json["user"]["email"], "alice@example.com");
        let token = json["credential"].as_str().unwrap();

        // the minted token works
        assert_eq!(relay.authenticate(token).await.unwrap().id, alice);

        // consumed exactly once
        let response = router
            .oneshot(json_post("/api/qr/login", serde_json::json!({"code": code})))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["status"], "invalid");
    }

    #[tokio::test]
    async fn scan_with_bad_bearer_is_unauthorized() {
        let (router, _, _) = test_router().await;
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/qr/scan")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::AUTHORIZATION, "Bearer nope")
                    .body(Body::from(serde_json::json!({"code": "x"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
