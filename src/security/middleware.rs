//! Security Middleware
//!
//! Axum layer that feeds each incoming request through the security
//! pipeline before the data handlers see it. Rejections are rendered as the
//! JSON error bodies clients rely on; allowed requests are timed and fed
//! back into analytics with the final upstream status.

use super::pipeline::{Rejection, RequestMeta, SecurityPipeline, Verdict};
use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Largest request body the middleware will buffer for inspection.
const MAX_INSPECTED_BODY: usize = 64 * 1024;

/// Resolve the client identity: proxy header first, then the socket peer.
fn client_id(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }
    }
    match connect_info {
        Some(ConnectInfo(addr)) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

/// Pull top-level string/number/bool fields out of a JSON object body.
fn json_fields(bytes: &[u8]) -> Vec<(String, String)> {
    let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(bytes) else {
        return Vec::new();
    };
    map.into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(s) => Some((key, s)),
            Value::Number(n) => Some((key, n.to_string())),
            Value::Bool(b) => Some((key, b.to_string())),
            _ => None,
        })
        .collect()
}

fn render_rejection(rejection: &Rejection) -> Response {
    let mut body = json!({
        "error": rejection.error,
        "message": rejection.message,
    });
    if let Some(retry_after) = rejection.retry_after {
        body["retryAfter"] = json!(retry_after.as_secs().max(1));
    }
    if let Some(banned_for) = &rejection.banned_for {
        body["bannedFor"] = json!(banned_for);
    }

    let status = StatusCode::from_u16(rejection.status).unwrap_or(StatusCode::FORBIDDEN);
    let mut response = (status, Json(body)).into_response();
    if let Some(retry_after) = rejection.retry_after {
        if let Ok(value) = retry_after.as_secs().max(1).to_string().parse() {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

/// The guard itself. Installed with `middleware::from_fn_with_state` around
/// the data routes.
pub async fn guard_middleware(
    State(pipeline): State<Arc<SecurityPipeline>>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();

    let connect_info = request.extensions().get::<ConnectInfo<SocketAddr>>().cloned();
    let id = client_id(request.headers(), connect_info.as_ref());
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let query: Vec<(String, String)> = Query::<Vec<(String, String)>>::try_from_uri(request.uri())
        .map(|Query(pairs)| pairs)
        .unwrap_or_default();

    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);

    // Buffer the body for inspection, then hand an identical one downstream
    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_INSPECTED_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => {
            debug!("Rejecting oversized or unreadable body from {}", id);
            return render_rejection(&Rejection {
                status: 400,
                error: "Bad Request",
                message: "Request body too large or unreadable".to_string(),
                retry_after: None,
                banned_for: None,
            });
        }
    };
    let body_fields = if is_json && !bytes.is_empty() {
        json_fields(&bytes)
    } else {
        Vec::new()
    };
    let request = Request::from_parts(parts, Body::from(bytes));

    let meta = RequestMeta {
        client_id: id.clone(),
        method: method.clone(),
        path: path.clone(),
        query,
        body_fields,
        user_agent,
    };

    let suspicious = match pipeline.inspect(&meta) {
        Verdict::Reject(rejection) => return render_rejection(&rejection),
        Verdict::Allow { suspicious } => suspicious,
    };

    let response = next.run(request).await;

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    let analytics = pipeline.analytics();
    analytics.record_response_time(elapsed_ms);
    analytics.record_request(
        &id,
        &path,
        &method,
        response.status().as_u16(),
        false,
        suspicious,
        None,
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{AnalyticsConfig, AnalyticsRecorder};
    use crate::security::ban_manager::BanManager;
    use crate::security::detector::ThreatDetector;
    use crate::security::pipeline::PipelineConfig;
    use crate::security::rate_limiter::{RateLimitConfig, RateLimiter};
    use crate::security::store::{IpRecordStore, RecordStoreConfig};
    use axum::http::HeaderValue;
    use axum::{middleware, routing::get, Router};
    use tower::ServiceExt;

    fn build_pipeline() -> (Arc<SecurityPipeline>, Arc<IpRecordStore>) {
        let store = Arc::new(IpRecordStore::new(RecordStoreConfig::default()));
        let ban_manager = Arc::new(BanManager::new(store.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(
            RateLimitConfig::default(),
            ban_manager.clone(),
        ));
        let analytics = Arc::new(AnalyticsRecorder::new(AnalyticsConfig::default()));
        let pipeline = Arc::new(SecurityPipeline::new(
            PipelineConfig::default(),
            ThreatDetector::new(),
            ban_manager,
            rate_limiter,
            analytics,
        ));
        (pipeline, store)
    }

    fn app(pipeline: Arc<SecurityPipeline>) -> Router {
        Router::new()
            .route("/api/data", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(pipeline, guard_middleware))
    }

    fn request(path: &str, client: &str) -> Request {
        let mut request = Request::builder()
            .uri(path)
            .body(Body::empty())
            .unwrap();
        request.headers_mut().insert(
            "x-forwarded-for",
            HeaderValue::from_str(client).unwrap(),
        );
        request
            .headers_mut()
            .insert(header::USER_AGENT, HeaderValue::from_static("test/1.0"));
        request
    }

    #[tokio::test]
    async fn test_clean_request_passes_through() {
        let (pipeline, _) = build_pipeline();
        let app = app(pipeline);

        let response = app
            .oneshot(request("/api/data?lat=43.5&lon=5.2", "198.51.100.1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_injection_in_query_gets_400_json() {
        let (pipeline, _) = build_pipeline();
        let app = app(pipeline);

        let response = app
            .oneshot(request(
                "/api/data?id=1%27%20OR%20%271%27%3D%271",
                "198.51.100.2",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Bad Request");
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn test_banned_client_gets_403_with_banned_for() {
        let (pipeline, store) = build_pipeline();
        store.ban("198.51.100.3", "manual", 0);
        let app = app(pipeline);

        let response = app
            .oneshot(request("/api/data", "198.51.100.3"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Forbidden");
        assert_eq!(body["bannedFor"], "permanent");
    }

    #[tokio::test]
    async fn test_rate_limited_client_gets_429_with_retry_after() {
        let store = Arc::new(IpRecordStore::new(RecordStoreConfig::default()));
        let ban_manager = Arc::new(BanManager::new(store.clone()));
        let mut config = RateLimitConfig::default();
        config.moderate.max_requests = 1;
        let rate_limiter = Arc::new(RateLimiter::new(config, ban_manager.clone()));
        let analytics = Arc::new(AnalyticsRecorder::new(AnalyticsConfig::default()));
        let pipeline = Arc::new(SecurityPipeline::new(
            PipelineConfig::default(),
            ThreatDetector::new(),
            ban_manager,
            rate_limiter,
            analytics,
        ));
        let app = app(pipeline);

        let response = app
            .clone()
            .oneshot(request("/api/data", "198.51.100.4"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request("/api/data", "198.51.100.4"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["retryAfter"].is_u64());
    }

    #[tokio::test]
    async fn test_json_body_fields_are_inspected() {
        let (pipeline, store) = build_pipeline();
        let app = Router::new()
            .route("/api/data", axum::routing::post(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(pipeline, guard_middleware));

        let request = Request::builder()
            .method("POST")
            .uri("/api/data")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, "test/1.0")
            .header("x-forwarded-for", "198.51.100.5")
            .body(Body::from(r#"{"name": "<script>alert(1)</script>"}"#))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.get_suspicion("198.51.100.5").is_some());
    }

    #[tokio::test]
    async fn test_forwarded_header_takes_first_hop() {
        let headers = {
            let mut h = HeaderMap::new();
            h.insert(
                "x-forwarded-for",
                HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
            );
            h
        };
        assert_eq!(client_id(&headers, None), "203.0.113.7");
    }

    #[tokio::test]
    async fn test_unknown_client_without_peer_info() {
        assert_eq!(client_id(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn test_json_fields_extraction() {
        let fields = json_fields(br#"{"a": "x", "b": 7, "c": true, "d": [1]}"#);
        assert_eq!(fields.len(), 3);
        assert!(fields.contains(&("a".to_string(), "x".to_string())));
        assert!(fields.contains(&("b".to_string(), "7".to_string())));
    }
}
