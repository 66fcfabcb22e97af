//! Management API Authentication
//!
//! Credential gate for the administrative surface. A request may present an
//! `x-api-key` header or HTTP Basic credentials; whichever it carries is
//! parsed first and then checked against the static configuration. With
//! authentication disabled the gate waves everything through, which is only
//! sensible for local development.

use super::types::ApiAuthConfig;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;
use tracing::warn;

/// A credential presented by a request.
#[derive(Debug, PartialEq, Eq)]
enum Credential {
    ApiKey(String),
    Basic { username: String, password: String },
}

/// Checks presented credentials against the configured ones.
pub struct ApiAuth {
    config: ApiAuthConfig,
}

impl ApiAuth {
    pub fn new(config: ApiAuthConfig) -> Self {
        Self { config }
    }

    /// True when the request may use the protected routes.
    pub fn authenticate(&self, headers: &HeaderMap) -> bool {
        if !self.config.enabled {
            return true;
        }

        match presented_credential(headers) {
            Some(credential) if self.accepts(&credential) => true,
            Some(_) => {
                warn!("Management API credential rejected");
                false
            }
            None => {
                warn!("Management API request without usable credentials");
                false
            }
        }
    }

    fn accepts(&self, credential: &Credential) -> bool {
        match credential {
            Credential::ApiKey(key) => self.config.api_key.as_deref() == Some(key.as_str()),
            Credential::Basic { username, password } => {
                self.config.basic_auth.as_ref().is_some_and(|expected| {
                    expected.username == *username && expected.password == *password
                })
            }
        }
    }
}

/// Extract whichever credential the request carries. The API key header
/// wins when both are present.
fn presented_credential(headers: &HeaderMap) -> Option<Credential> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(Credential::ApiKey(key.to_string()));
    }

    let header = headers.get("authorization")?.to_str().ok()?;
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = general_purpose::STANDARD.decode(encoded).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (username, password) = text.split_once(':')?;
    Some(Credential::Basic {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Authentication middleware for the protected route group.
pub async fn auth_middleware(
    State(auth): State<Arc<ApiAuth>>,
    request: Request,
    next: Next,
) -> Response {
    if auth.authenticate(request.headers()) {
        next.run(request).await
    } else {
        StatusCode::UNAUTHORIZED.into_response()
    }
}
