/// Outcome classes recorded for every discovered URL
///
/// This module defines how a single page fetch ended, as stored next to each
/// discovered URL.
use crate::crawler::FetchErrorKind;
use std::fmt;

/// How the fetch of a single URL ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageOutcome {
    // ===== Responses =====
    /// 2xx response
    Ok,

    /// 3xx response recorded without following it
    Redirect,

    /// 4xx response (permanent for this URL)
    ClientError,

    /// 5xx response that survived the retry budget
    ServerError,

    /// Any other status code (1xx or out of range)
    Unexpected,

    // ===== Skips =====
    /// Response was not textual and was not processed
    Skipped,

    // ===== Failures without a response =====
    /// The request exceeded the configured timeout
    Timeout,

    /// DNS failure, refused connection, redirect overflow or protocol error
    NetworkFailure,

    /// The page task failed inside the engine
    Failed,
}

impl PageOutcome {
    /// Classifies an HTTP status code
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Self::Ok,
            300..=399 => Self::Redirect,
            400..=499 => Self::ClientError,
            500..=599 => Self::ServerError,
            _ => Self::Unexpected,
        }
    }

    /// Classifies a fetch error
    pub fn from_fetch_error(kind: FetchErrorKind) -> Self {
        match kind {
            FetchErrorKind::Timeout => Self::Timeout,
            FetchErrorKind::NonTextContent => Self::Skipped,
            FetchErrorKind::ConnectionRefused
            | FetchErrorKind::DnsFailure
            | FetchErrorKind::TooManyRedirects
            | FetchErrorKind::ProtocolError => Self::NetworkFailure,
        }
    }

    /// Returns true if a response was received
    pub fn has_response(&self) -> bool {
        matches!(
            self,
            Self::Ok
                | Self::Redirect
                | Self::ClientError
                | Self::ServerError
                | Self::Unexpected
                | Self::Skipped
        )
    }

    /// Returns true if this represents an error for the URL
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::ClientError
                | Self::ServerError
                | Self::Unexpected
                | Self::Timeout
                | Self::NetworkFailure
                | Self::Failed
        )
    }

    /// Converts the outcome to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Redirect => "redirect",
            Self::ClientError => "client_error",
            Self::ServerError => "server_error",
            Self::Unexpected => "unexpected",
            Self::Skipped => "skipped",
            Self::Timeout => "timeout",
            Self::NetworkFailure => "network_failure",
            Self::Failed => "failed",
        }
    }

    /// Parses an outcome from its database string representation
    ///
    /// Returns None if the string doesn't match any known outcome.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(Self::Ok),
            "redirect" => Some(Self::Redirect),
            "client_error" => Some(Self::ClientError),
            "server_error" => Some(Self::ServerError),
            "unexpected" => Some(Self::Unexpected),
            "skipped" => Some(Self::Skipped),
            "timeout" => Some(Self::Timeout),
            "network_failure" => Some(Self::NetworkFailure),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all outcomes
    pub fn all() -> [Self; 9] {
        [
            Self::Ok,
            Self::Redirect,
            Self::ClientError,
            Self::ServerError,
            Self::Unexpected,
            Self::Skipped,
            Self::Timeout,
            Self::NetworkFailure,
            Self::Failed,
        ]
    }
}

impl fmt::Display for PageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
