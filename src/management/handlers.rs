//! Management API Handlers

use super::types::*;
use crate::analytics::{AnalyticsRecorder, TimelineEntry};
use crate::security::{BanManager, IpRecordStore};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::info;

/// Shared application state for handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<IpRecordStore>,
    pub ban_manager: Arc<BanManager>,
    pub analytics: Arc<AnalyticsRecorder>,
    pub start_time: SystemTime,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

/// Longest accepted timed ban, one year. Anything longer should be a
/// permanent ban (duration 0) instead.
pub const MAX_BAN_DURATION_MINUTES: i64 = 60 * 24 * 365;

/// Health check handler
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    let uptime = SystemTime::now()
        .duration_since(state.start_time)
        .unwrap_or_default()
        .as_secs();

    Json(ApiResponse::success(HealthStatus {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        timestamp: SystemTime::now(),
    }))
}

/// Combined security and traffic statistics
pub async fn get_stats(State(state): State<AppState>) -> Json<ApiResponse<SecurityStats>> {
    let (banned_ips, suspicious_ips) = state.store.counts();

    Json(ApiResponse::success(SecurityStats {
        banned_ips,
        suspicious_ips,
        analytics: state.analytics.get_stats(),
    }))
}

/// Recent timeline events, most recent first
pub async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Json<ApiResponse<Vec<TimelineEntry>>> {
    let limit = query.limit.unwrap_or(50).min(500);
    Json(ApiResponse::success(state.analytics.get_recent_events(limit)))
}

/// List active bans
pub async fn get_banned_ips(State(state): State<AppState>) -> Json<ApiResponse<Vec<BannedIpInfo>>> {
    let banned = state
        .store
        .get_all_banned()
        .into_iter()
        .map(|(id, record)| BannedIpInfo::from_record(id, record))
        .collect();
    Json(ApiResponse::success(banned))
}

/// List clients with open suspicion records
pub async fn get_suspicious_ips(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<SuspiciousIpInfo>>> {
    let suspicious = state
        .store
        .get_all_suspicious()
        .into_iter()
        .map(|(id, record)| SuspiciousIpInfo::from_record(id, record))
        .collect();
    Json(ApiResponse::success(suspicious))
}

/// Full standing of one client
pub async fn check_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Json<ApiResponse<ClientStanding>> {
    Json(ApiResponse::success(ClientStanding {
        banned: state.store.is_banned(&client_id),
        ban: state.store.get_ban_info(&client_id),
        suspicion: state.store.get_suspicion(&client_id),
        client_id,
    }))
}

/// Manually ban a client
pub async fn ban_client(
    State(state): State<AppState>,
    Json(request): Json<BanRequest>,
) -> Result<Json<ApiResponse<BannedIpInfo>>, (StatusCode, Json<ApiResponse<()>>)> {
    let client_id = request.client_id.trim();
    if client_id.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("client_id must not be empty".to_string())),
        ));
    }

    let duration_minutes = request.duration_minutes.unwrap_or(0);
    if !(0..=MAX_BAN_DURATION_MINUTES).contains(&duration_minutes) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!(
                "duration_minutes must be between 0 and {}",
                MAX_BAN_DURATION_MINUTES
            ))),
        ));
    }

    let reason = request.reason.unwrap_or_else(|| "manual ban".to_string());

    info!("Manual ban of {} via management API", client_id);
    let record = state
        .ban_manager
        .ban(client_id, &reason, duration_minutes as u64);

    Ok(Json(ApiResponse::success(BannedIpInfo::from_record(
        client_id.to_string(),
        record,
    ))))
}

/// Lift a ban
pub async fn unban_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Json<ApiResponse<String>>, (StatusCode, Json<ApiResponse<()>>)> {
    if state.ban_manager.unban(&client_id) {
        info!("Manual unban of {} via management API", client_id);
        Ok(Json(ApiResponse::success(format!("{} unbanned", client_id))))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("no active ban for {}", client_id))),
        ))
    }
}

/// Prometheus metrics in text exposition format
pub async fn export_metrics(State(state): State<AppState>) -> String {
    state.analytics.export_prometheus()
}
