//! Error types for altsync.
//!
//! Taxonomy:
//! - Run-fatal: the credential was rejected, or the checkpoint cannot be trusted
//! - Per-item: the API refused or kept failing for one identifier
//! - Internal: invariant violations (bugs)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for altsync.
#[derive(Debug, Error)]
pub enum AltSyncError {
    // ═══════════════════════════════════════════════════════════════════
    // STARTUP: bad configuration or untrustworthy local state
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Checkpoint {path} is unreadable: {reason}")]
    CorruptCheckpoint { path: PathBuf, reason: String },

    // ═══════════════════════════════════════════════════════════════════
    // RUNTIME: remote API or local filesystem failed
    // ═══════════════════════════════════════════════════════════════════
    #[error("Catalog API error: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // INTERNAL: invariant broken (bug, should not happen)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a single catalog API call after the retry policy was applied.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Unauthorized: credential rejected by the catalog API")]
    Unauthorized,

    #[error("Rate limited (429){}", fmt_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("Server error (status {status}): {body}")]
    ServerError { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Client error (status {status}): {body}")]
    ClientError { status: u16, body: String },

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Cancelled before the request was sent")]
    Cancelled,
}

fn fmt_hint(hint: &Option<Duration>) -> String {
    match hint {
        Some(d) => format!(", retry after {:.1}s", d.as_secs_f64()),
        None => String::new(),
    }
}

/// Coarse classification of a failure, persisted with failed checkpoint entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Unauthorized,
    RateLimited,
    Server,
    Network,
    Timeout,
    Client,
    Decode,
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unauthorized => "unauthorized",
            Self::RateLimited => "rate_limited",
            Self::Server => "server",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Client => "client",
            Self::Decode => "decode",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl TransportError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ServerError { .. } | Self::Network(_) | Self::Timeout(_)
        )
    }

    /// Failures that invalidate every remaining call of the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Server-provided delay hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Unauthorized => FailureKind::Unauthorized,
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::ServerError { .. } => FailureKind::Server,
            Self::Network(_) => FailureKind::Network,
            Self::Timeout(_) => FailureKind::Timeout,
            Self::ClientError { .. } => FailureKind::Client,
            Self::Decode(_) => FailureKind::Decode,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }

    /// HTTP status carried by the error, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::RateLimited { .. } => Some(429),
            Self::ServerError { status, .. } | Self::ClientError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl AltSyncError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptCheckpoint {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for altsync.
pub type Result<T> = std::result::Result<T, AltSyncError>;
