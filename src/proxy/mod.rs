//! Reverse Proxy
//!
//! Forwards HTTP requests to a single upstream (the time-series database)
//! and adds the CORS headers browsers need to call it from the dashboard.
//!
//! ## Behaviour
//!
//! - `OPTIONS` is answered locally, upstream is never contacted
//! - Method, path, query, body and end-to-end headers are forwarded
//! - An optional token is sent upstream as `Authorization: Token <token>`
//! - Upstream status and headers are relayed back, and the body is
//!   streamed through as it arrives

pub mod cors;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, Uri},
    response::Response,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::trace::TraceLayer;

use crate::api::ApiError;
use crate::config::InfluxConfig;

/// Headers that describe a single connection and are never forwarded
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Reverse proxy errors
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("No upstream configured")]
    NotConfigured,

    #[error("Invalid upstream URL '{url}': {reason}")]
    InvalidTarget { url: String, reason: String },

    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Request body error: {0}")]
    Body(String),
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::NotConfigured => ApiError::ServiceUnavailable(err.to_string()),
            ProxyError::Upstream(_) => ApiError::BadGateway(err.to_string()),
            ProxyError::Body(_) => ApiError::Validation(err.to_string()),
            ProxyError::InvalidTarget { .. } | ProxyError::Client(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

/// Reverse proxy settings
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    /// Upstream base URL; requests are refused with 503 when unset
    pub target: Option<String>,
    /// Replaces the client's `Authorization` header when set
    pub token: Option<String>,
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            target: None,
            token: None,
            request_timeout: Duration::from_secs(30),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

impl From<&InfluxConfig> for ProxyOptions {
    fn from(config: &InfluxConfig) -> Self {
        Self {
            target: config.url.clone(),
            token: config.token.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            max_body_bytes: config.max_body_bytes,
        }
    }
}

/// Single-upstream reverse proxy
pub struct ReverseProxy {
    client: reqwest::Client,
    target: Option<reqwest::Url>,
    token: Option<HeaderValue>,
    max_body_bytes: usize,
}

impl ReverseProxy {
    pub fn new(options: ProxyOptions) -> Result<Self, ProxyError> {
        let target = options
            .target
            .as_deref()
            .map(parse_target)
            .transpose()?;

        let token = options
            .token
            .as_deref()
            .map(|token| {
                HeaderValue::from_str(&format!("Token {}", token))
                    .map_err(|e| ProxyError::Client(format!("invalid token: {}", e)))
            })
            .transpose()?;

        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| ProxyError::Client(e.to_string()))?;

        Ok(Self {
            client,
            target,
            token,
            max_body_bytes: options.max_body_bytes,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.target.is_some()
    }

    pub fn target(&self) -> Option<&reqwest::Url> {
        self.target.as_ref()
    }

    /// Forward one request and relay the upstream answer.
    pub async fn forward(&self, request: Request) -> Result<Response, ProxyError> {
        if *request.method() == Method::OPTIONS {
            return Ok(cors::preflight());
        }

        let target = self.target.as_ref().ok_or(ProxyError::NotConfigured)?;
        let (parts, body) = request.into_parts();
        let url = upstream_url(target, &parts.uri);

        let mut headers = strip_hop_by_hop(&parts.headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);
        if let Some(token) = &self.token {
            headers.insert(header::AUTHORIZATION, token.clone());
        }

        let body = axum::body::to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|e| ProxyError::Body(e.to_string()))?;

        tracing::debug!(method = %parts.method, url = %url, "Proxying request");

        let upstream = self
            .client
            .request(parts.method.clone(), url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        let status = upstream.status();
        let mut response_headers = strip_hop_by_hop(upstream.headers());
        response_headers.remove(header::CONTENT_LENGTH);

        cors::apply(&parts.method, &mut response_headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

fn parse_target(url: &str) -> Result<reqwest::Url, ProxyError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| ProxyError::InvalidTarget {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(ProxyError::InvalidTarget {
            url: url.to_string(),
            reason: "expected an http(s) URL with a host".to_string(),
        }),
    }
}

/// Join the target's base path with the request path and keep the query.
fn upstream_url(target: &reqwest::Url, uri: &Uri) -> reqwest::Url {
    let mut url = target.clone();
    let base = target.path().trim_end_matches('/');
    let path = uri.path();
    let joined = if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    };
    url.set_path(&joined);
    url.set_query(uri.query());
    url
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    // Headers named in `Connection` are hop-by-hop too.
    let named: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    for name in named {
        out.remove(name.as_str());
    }
    for name in HOP_BY_HOP {
        out.remove(name);
    }
    out
}

/// Handler forwarding every request it receives
pub async fn proxy_handler(
    State(proxy): State<Arc<ReverseProxy>>,
    request: Request,
) -> Result<Response, ApiError> {
    Ok(proxy.forward(request).await?)
}

/// Router that proxies every path, used by the standalone CORS proxy
pub fn router(proxy: Arc<ReverseProxy>) -> Router {
    Router::new()
        .fallback(proxy_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(proxy)
}
