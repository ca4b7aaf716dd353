//! Authentication middleware for protected endpoints.
//!
//! The middleware extracts the JWT access token from the `Authorization`
//! header, authenticates it (signature, token type, live session, unlocked
//! account) and injects the resulting [`Principal`] into request extensions.
//!
//! ```rust,no_run
//! use axum::extract::Extension;
//! use trustgate::auth::Principal;
//!
//! async fn protected_handler(Extension(principal): Extension<Principal>) -> String {
//!     format!("Authenticated as account {}", principal.actor.account_id)
//! }
//! # let _ = protected_handler;
//! ```

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use std::{convert::Infallible, net::IpAddr, net::SocketAddr};
use trustgate::auth::LoginContext;

use super::{AppState, error::ApiError};

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Authentication middleware that validates JWT tokens and injects the principal.
///
/// - **Missing or malformed header**: `401 unauthorized`
/// - **Invalid/expired token, closed session**: `401 unauthorized`
/// - **Locked account**: `403 forbidden`
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?;

    let principal = state.gate.auth.authenticate(token).await?;
    request.extensions_mut().insert(principal);

    Ok(next.run(request).await)
}

/// Peer address of the connection, when the server was started with connect info
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub Option<IpAddr>);

impl ClientIp {
    /// Rate limiter key
    pub fn key(&self) -> String {
        self.0
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn login_context(&self) -> LoginContext {
        match self.0 {
            Some(ip) => LoginContext::from_ip(ip),
            None => LoginContext {
                ip: None,
                ip_address: "unknown".to_string(),
            },
        }
    }
}

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }

    #[test]
    fn test_client_ip_without_connect_info() {
        let client = ClientIp(None);
        assert_eq!(client.key(), "unknown");
        let context = client.login_context();
        assert!(context.ip.is_none());
        assert_eq!(context.ip_address, "unknown");
    }

    #[test]
    fn test_client_ip_context() {
        let client = ClientIp(Some("203.0.113.10".parse().unwrap()));
        assert_eq!(client.key(), "203.0.113.10");
        assert_eq!(client.login_context().ip_address, "203.0.113.10");
    }
}
