//! Management API Routes

use super::{
    auth::{auth_middleware, ApiAuth},
    handlers::*,
    types::ApiAuthConfig,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Management API router
pub struct ManagementApi;

impl ManagementApi {
    /// Create the management API router
    pub fn create_router(state: AppState, auth_config: ApiAuthConfig) -> Router {
        let auth = Arc::new(ApiAuth::new(auth_config));

        // Public routes (no authentication required)
        let public_routes = Router::new()
            .route("/health", get(health_check))
            .with_state(state.clone());

        // Protected routes (authentication required)
        let protected_routes = Router::new()
            .route("/stats", get(get_stats))
            .route("/events", get(get_events))
            .route("/banned-ips", get(get_banned_ips))
            .route("/suspicious-ips", get(get_suspicious_ips))
            .route("/check/:client_id", get(check_client))
            .route("/ban", post(ban_client))
            .route("/unban/:client_id", post(unban_client))
            .route("/metrics", get(export_metrics))
            .layer(middleware::from_fn_with_state(auth.clone(), auth_middleware))
            .with_state(state);

        Router::new()
            .nest("/api/v1", public_routes.merge(protected_routes))
            .layer(CorsLayer::permissive())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{AnalyticsConfig, AnalyticsRecorder};
    use crate::security::store::RecordStoreConfig;
    use crate::security::{BanManager, IpRecordStore};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::sync::Arc;
    use std::time::SystemTime;
    use tower::ServiceExt;

    fn create_test_state() -> AppState {
        let store = Arc::new(IpRecordStore::new(RecordStoreConfig::default()));
        let ban_manager = Arc::new(BanManager::new(store.clone()));
        AppState {
            store,
            ban_manager,
            analytics: Arc::new(AnalyticsRecorder::new(AnalyticsConfig::default())),
            start_time: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn test_public_health_endpoint() {
        let state = create_test_state();
        let auth_config = ApiAuthConfig {
            enabled: false,
            ..Default::default()
        };

        let app = ManagementApi::create_router(state, auth_config);

        let request = Request::builder()
            .uri("/api/v1/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_protected_endpoint_without_auth() {
        let state = create_test_state();
        let auth_config = ApiAuthConfig {
            enabled: true,
            api_key: Some("test-key".to_string()),
            ..Default::default()
        };

        let app = ManagementApi::create_router(state, auth_config);

        let request = Request::builder()
            .uri("/api/v1/stats")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_protected_endpoint_with_auth() {
        let state = create_test_state();
        let auth_config = ApiAuthConfig {
            enabled: true,
            api_key: Some("test-key".to_string()),
            ..Default::default()
        };

        let app = ManagementApi::create_router(state, auth_config);

        let request = Request::builder()
            .uri("/api/v1/stats")
            .header("x-api-key", "test-key")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
