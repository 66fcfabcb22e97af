//! Management Module
//!
//! Administrative REST surface: ban inspection and manipulation, analytics
//! snapshots, and Prometheus export. Served on its own listener, separate
//! from the guarded data API.

pub mod api;
pub mod auth;
pub mod handlers;
pub mod server;
pub mod types;

pub use api::ManagementApi;
pub use auth::{ApiAuth, auth_middleware};
pub use handlers::AppState;
pub use server::ManagementServer;
pub use types::{ApiAuthConfig, ApiResponse, BasicAuthConfig};
