// src/handlers/mod.rs
pub mod health_handler;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_handler::root))
        .route("/health", get(health_handler::health))
        .route("/init-firebase", post(health_handler::init_firebase))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        services::{messaging_service::MockNotificationService, trip_store::MemoryTripStore},
        state::{ComponentLoader, Components, StaticComponentLoader},
        errors::{SparrowError, SparrowResult},
    };
    use async_trait::async_trait;
    use axum::{body::Body, http::{Request, StatusCode}};
    use tower::ServiceExt;

    struct MissingConfig;

    #[async_trait]
    impl ComponentLoader for MissingConfig {
        async fn load(&self) -> SparrowResult<Components> {
            Err(SparrowError::configuration_missing("FIREBASE_SERVICE_ACCOUNT"))
        }
    }

    fn memory_state() -> Arc<AppState> {
        let components = Components {
            store: Arc::new(MemoryTripStore::new()),
            notification_service: Arc::new(MockNotificationService::new()),
        };
        Arc::new(AppState::new(Box::new(StaticComponentLoader(components))))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_root_before_init() {
        let app = router(memory_state());
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "running");
        assert_eq!(body["firebase"], "waiting for credentials");
    }

    #[tokio::test]
    async fn test_init_then_health() {
        let state = memory_state();

        let response = router(state.clone())
            .oneshot(Request::builder().method("POST").uri("/init-firebase").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["firebase"], true);

        let response = router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["firebase"], true);
        assert_eq!(body["listeners"], true);
    }

    #[tokio::test]
    async fn test_init_without_configuration() {
        let state = Arc::new(AppState::new(Box::new(MissingConfig)));

        let response = router(state.clone())
            .oneshot(Request::builder().method("POST").uri("/init-firebase").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "configuration_missing");
        assert!(body["message"].as_str().unwrap().contains("FIREBASE_SERVICE_ACCOUNT"));
        assert!(!state.lifecycle.is_ready());
    }
}
