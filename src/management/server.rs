//! Management API Server

use super::{api::ManagementApi, handlers::AppState, types::ApiAuthConfig};
use crate::analytics::AnalyticsRecorder;
use crate::security::{BanManager, IpRecordStore};
use crate::Result;
use anyhow::Context;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Management API server
pub struct ManagementServer {
    bind_addr: SocketAddr,
    app_state: AppState,
    auth_config: ApiAuthConfig,
}

impl ManagementServer {
    pub fn new(
        bind_addr: SocketAddr,
        store: Arc<IpRecordStore>,
        ban_manager: Arc<BanManager>,
        analytics: Arc<AnalyticsRecorder>,
        auth_config: ApiAuthConfig,
    ) -> Self {
        let app_state = AppState {
            store,
            ban_manager,
            analytics,
            start_time: SystemTime::now(),
        };

        Self {
            bind_addr,
            app_state,
            auth_config,
        }
    }

    /// Start the management API server
    pub async fn start(self) -> Result<()> {
        info!("Starting management API server on {}", self.bind_addr);

        let app = ManagementApi::create_router(self.app_state, self.auth_config);

        let listener = TcpListener::bind(self.bind_addr)
            .await
            .with_context(|| format!("Failed to bind management API server to {}", self.bind_addr))?;

        info!("Management API server listening on {}", self.bind_addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("Management API server error: {}", e);
            return Err(e.into());
        }

        Ok(())
    }

    /// Create a router for testing
    pub fn create_test_router(&self) -> Router {
        ManagementApi::create_router(self.app_state.clone(), self.auth_config.clone())
    }
}
