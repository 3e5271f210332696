//! Session authentication — axum `FromRequestParts` extractor.
//!
//! Protected routes take `AuthSession` as a handler argument; it resolves
//! the `Authorization: Bearer <token>` header against the session store,
//! refreshing the session's activity timestamp as a side effect.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::AppState;
use fv_common::AppError;

/// Authenticated session extractor.
///
/// Use as a handler parameter to require a valid session:
/// ```ignore
/// async fn protected(auth: AuthSession) -> impl IntoResponse { ... }
/// ```
pub struct AuthSession {
    pub user_id: String,
}

impl AuthSession {
    /// 403 unless the session belongs to `user_id`. Every handler that
    /// takes a `:userId` path segment goes through this.
    pub fn require_user(&self, user_id: &str) -> Result<(), AppError> {
        if self.user_id == user_id {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "Session does not own this resource".into(),
            ))
        }
    }
}

impl FromRequestParts<Arc<AppState>> for AuthSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?;

        let user_id = state
            .sessions
            .validate(token)
            .ok_or_else(|| AppError::Unauthorized("Invalid or expired session".into()))?;

        Ok(AuthSession { user_id })
    }
}

/// Pull the bearer token out of the `Authorization` header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Best-effort client source address, used to key the rate limiters. Never
/// rejects: the first `X-Forwarded-For` hop wins (the front proxy
/// terminates TLS for us), then the transport peer, then a fixed bucket.
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let connect_info = parts.extensions.get::<ConnectInfo<SocketAddr>>();
        Ok(ClientIp(client_ip(&parts.headers, connect_info)))
    }
}

fn client_ip(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> String {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    connect_info
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_strips_the_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123"));
    }

    #[test]
    fn bearer_token_rejects_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc123"));
        assert_eq!(bearer_token(&headers), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn client_ip_prefers_the_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.50, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, None), "203.0.113.50");
    }

    #[test]
    fn client_ip_uses_the_transport_peer_without_a_proxy() {
        let addr: SocketAddr = "198.51.100.7:55000".parse().unwrap();
        let info = ConnectInfo(addr);
        assert_eq!(client_ip(&HeaderMap::new(), Some(&info)), "198.51.100.7");
    }

    #[test]
    fn client_ip_falls_back_to_a_fixed_bucket() {
        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");
    }
}
