//! WC-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Top-level error type for the windowed cache engine.
///
/// Only [`CacheError::InvalidArgument`] is produced by the cache engines at
/// runtime; short fetches, unchanged reloads, and stale batches are absorbed
/// into the normal flow and never surface here.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("[WC-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[WC-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[WC-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[WC-2001] invalid argument to {operation}: {details}")]
    InvalidArgument {
        operation: &'static str,
        details: String,
    },

    #[error("[WC-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[WC-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[WC-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[WC-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl CacheError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "WC-1001",
            Self::MissingConfig { .. } => "WC-1002",
            Self::ConfigParse { .. } => "WC-1003",
            Self::InvalidArgument { .. } => "WC-2001",
            Self::Serialization { .. } => "WC-2101",
            Self::Io { .. } => "WC-3002",
            Self::ChannelClosed { .. } => "WC-3003",
            Self::Runtime { .. } => "WC-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::ChannelClosed { .. } | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for precondition violations.
    #[must_use]
    pub fn invalid_argument(operation: &'static str, details: impl Into<String>) -> Self {
        Self::InvalidArgument {
            operation,
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for CacheError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
