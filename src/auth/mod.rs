//! Authentication Gate
//!
//! Guards the `/api` routes before any handler runs, so a relay session is
//! never created for an unauthorized client.
//!
//! A request is allowed when either:
//! - `Authorization: Basic` carries a configured user and password, or
//! - a configured token arrives in the `X-Token` header or the `token`
//!   query parameter (browsers cannot set headers on WebSocket upgrades).
//!
//! A `Basic` header that cannot be decoded is rejected outright rather than
//! treated as absent.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use thiserror::Error;

use crate::api::ApiError;
use crate::config::{AuthConfig, UserCredentials};

/// Header carrying an access token
pub const TOKEN_HEADER: &str = "x-token";

/// Query parameter carrying an access token
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Who a request was admitted as
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// The gate is disabled
    Anonymous,
    User(String),
    Token,
}

/// Authentication failures
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Malformed Basic credentials: {0}")]
    MalformedCredentials(String),
}

/// Checks requests against the configured users and tokens
#[derive(Debug, Clone)]
pub struct AuthGate {
    enabled: bool,
    realm: String,
    users: Vec<UserCredentials>,
    tokens: Vec<String>,
}

impl AuthGate {
    pub fn new(config: &AuthConfig) -> Self {
        tracing::info!(
            enabled = config.enabled,
            users = config.users.len(),
            tokens = config.tokens.len(),
            "Loaded credentials"
        );
        Self {
            enabled: config.enabled,
            realm: config.realm.clone(),
            users: config.users.clone(),
            tokens: config.tokens.clone(),
        }
    }

    /// A gate that admits everything
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            realm: "restricted".to_string(),
            users: Vec::new(),
            tokens: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Decide whether a request may proceed.
    ///
    /// Basic credentials are tried first; a well-formed but wrong pair falls
    /// through to the token check.
    pub fn authorize(&self, headers: &HeaderMap, query: Option<&str>) -> Result<Principal, AuthError> {
        if !self.enabled {
            return Ok(Principal::Anonymous);
        }

        if let Some(value) = headers.get(header::AUTHORIZATION) {
            let value = value.to_str().map_err(|_| {
                AuthError::MalformedCredentials("header is not visible ASCII".to_string())
            })?;
            if let Some((name, password)) = parse_basic(value)? {
                if self.check_user(&name, &password) {
                    return Ok(Principal::User(name));
                }
            }
        }

        let token = headers
            .get(TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| query.and_then(token_from_query));

        if let Some(token) = token {
            if self.check_token(&token) {
                return Ok(Principal::Token);
            }
        }

        Err(AuthError::Unauthorized)
    }

    fn check_user(&self, name: &str, password: &str) -> bool {
        let mut matched = false;
        for user in &self.users {
            let name_ok = constant_time_eq(user.name.as_bytes(), name.as_bytes());
            let password_ok = constant_time_eq(user.password.as_bytes(), password.as_bytes());
            matched |= name_ok & password_ok;
        }
        matched
    }

    fn check_token(&self, token: &str) -> bool {
        let mut matched = false;
        for candidate in &self.tokens {
            matched |= constant_time_eq(candidate.as_bytes(), token.as_bytes());
        }
        matched
    }
}

/// Parse an `Authorization` header value.
///
/// Returns `Ok(None)` for non-Basic schemes. The decoded pair is split at
/// the first `:`, so passwords may contain colons.
pub fn parse_basic(value: &str) -> Result<Option<(String, String)>, AuthError> {
    let Some((scheme, encoded)) = value.trim().split_once(' ') else {
        return Ok(None);
    };
    if !scheme.eq_ignore_ascii_case("basic") {
        return Ok(None);
    }

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|e| AuthError::MalformedCredentials(format!("invalid base64: {}", e)))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| AuthError::MalformedCredentials("credentials are not UTF-8".to_string()))?;

    match decoded.split_once(':') {
        Some((name, password)) => Ok(Some((name.to_string(), password.to_string()))),
        None => Err(AuthError::MalformedCredentials(
            "expected user:password".to_string(),
        )),
    }
}

/// Value of the `token` query parameter, percent-decoded
fn token_from_query(query: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == TOKEN_QUERY_PARAM)
        .and_then(|(_, value)| urlencoding::decode(value).ok())
        .map(|value| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Compare without short-circuiting on the first differing byte
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Middleware applying the gate to every request it wraps
pub async fn require_auth(
    State(gate): State<Arc<AuthGate>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match gate.authorize(request.headers(), request.uri().query()) {
        Ok(principal) => {
            tracing::trace!(principal = ?principal, "Request authorized");
            Ok(next.run(request).await)
        }
        Err(AuthError::Unauthorized) => {
            tracing::warn!(path = %request.uri().path(), "Rejected unauthenticated request");
            Err(ApiError::Unauthorized {
                realm: gate.realm().to_string(),
            })
        }
        Err(AuthError::MalformedCredentials(reason)) => {
            tracing::warn!(path = %request.uri().path(), reason = %reason, "Rejected malformed credentials");
            Err(ApiError::MalformedCredentials(reason))
        }
    }
}
