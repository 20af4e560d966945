//! HTTP fetcher implementation
//!
//! This module performs a single request per call:
//! - Building the HTTP client for a scan (user agent, timeout)
//! - Bounding the whole exchange, body included, by the scan timeout
//! - Streaming the body and truncating it at the configured size
//! - Classifying transport failures
//!
//! HTTP error statuses are not failures here. A 404 or 500 is a fetched page
//! carrying that status; `PageOutcome::from_status` classifies it.
//!
//! Redirects are never followed by the client. A 3xx comes back as a page so
//! the orchestrator can apply scope, robots.txt and rate limits to every hop.

use crate::config::{EngineConfig, RetryConfig, ScanConfiguration};
use reqwest::header::CONTENT_TYPE;
use reqwest::{redirect::Policy, Client, Response};
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// A response captured by the fetcher
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// HTTP status code
    pub status: u16,
    /// Response headers, names lowercased, in arrival order
    pub headers: Vec<(String, String)>,
    /// Body decoded as UTF-8 (lossy)
    pub body: String,
    /// URL that produced this response
    pub final_url: Url,
    /// Whether the body was cut at the size limit
    pub truncated: bool,
}

impl FetchedPage {
    /// Returns the first value of a header
    pub fn header<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.headers_named(name).next()
    }

    /// Returns every value of a header
    pub fn headers_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

/// Transport-level failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    Timeout,
    ConnectionRefused,
    DnsFailure,
    TooManyRedirects,
    /// The response is not text; the page is skipped, not failed
    NonTextContent,
    ProtocolError,
}

impl FetchErrorKind {
    /// Whether another attempt might succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::ProtocolError)
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::ConnectionRefused => "connection-refused",
            Self::DnsFailure => "dns-failure",
            Self::TooManyRedirects => "too-many-redirects",
            Self::NonTextContent => "non-text-content",
            Self::ProtocolError => "protocol-error",
        };
        write!(f, "{}", s)
    }
}

/// A failed fetch
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    /// Status code, when a response arrived before the failure
    pub status: Option<u16>,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    fn from_reqwest(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            FetchErrorKind::Timeout
        } else if err.is_connect() {
            if mentions_dns(err) {
                FetchErrorKind::DnsFailure
            } else {
                FetchErrorKind::ConnectionRefused
            }
        } else {
            FetchErrorKind::ProtocolError
        };

        Self {
            kind,
            status: err.status().map(|s| s.as_u16()),
            message: error_chain(err),
        }
    }
}

fn mentions_dns(err: &reqwest::Error) -> bool {
    let chain = error_chain(err).to_ascii_lowercase();
    chain.contains("dns") || chain.contains("lookup") || chain.contains("resolve")
}

fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

/// Bounded retry with exponential backoff for transient failures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            attempts: 0,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry as i32);
        self.base_delay.mul_f64(factor.min(1_000.0))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            attempts: config.attempts,
            base_delay: Duration::from_millis(config.base_delay),
            multiplier: config.multiplier,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// Builds the HTTP client used for every page of a scan
///
/// # Arguments
///
/// * `scan` - The per-scan parameters (user agent, timeout)
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(scan: &ScanConfiguration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(scan.user_agent.clone())
        .timeout(scan.timeout())
        .connect_timeout(scan.timeout())
        .redirect(Policy::none())
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches pages for one scan
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    timeout: Duration,
    max_body_bytes: usize,
}

impl Fetcher {
    pub fn new(scan: &ScanConfiguration, engine: &EngineConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(scan)?,
            timeout: scan.timeout(),
            max_body_bytes: engine.max_body_bytes,
        })
    }

    /// Fetches `url` once
    ///
    /// The timeout covers connecting, headers and the body.
    pub async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        match tokio::time::timeout(self.timeout, self.exchange(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::new(
                FetchErrorKind::Timeout,
                format!("no complete response within {:?}", self.timeout),
            )),
        }
    }

    async fn exchange(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&e))?;

        let status = response.status().as_u16();

        if let Some(content_type) = content_type(&response) {
            if !is_text_content(&content_type) {
                return Err(FetchError {
                    kind: FetchErrorKind::NonTextContent,
                    status: Some(status),
                    message: format!("content type {}", content_type),
                });
            }
        }

        let final_url = response.url().clone();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let mut body = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            let mut err = FetchError::from_reqwest(&e);
            err.status = Some(status);
            err
        })? {
            let room = self.max_body_bytes.saturating_sub(body.len());
            if chunk.len() > room {
                body.extend_from_slice(&chunk[..room]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchedPage {
            status,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
            final_url,
            truncated,
        })
    }
}

fn content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase())
}

/// Checks whether a Content-Type carries text worth reading
fn is_text_content(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or("").trim();
    mime.is_empty()
        || mime.starts_with("text/")
        || mime.ends_with("+xml")
        || mime.ends_with("+json")
        || matches!(
            mime,
            "application/xml" | "application/json" | "application/javascript"
        )
}
