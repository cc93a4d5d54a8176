//! Unified error types
//!
//! This module defines error types that:
//! - Are serializable so they can be returned inside provisioning results
//! - Separate provider failures by how the sync engine must react to them
//! - Map internal errors to caller-facing variants

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Application error type for services and the CLI
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum TaxonomyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Composition error: {0}")]
    Composition(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Provider not supported: {0}")]
    UnsupportedProvider(String),

    #[error("Provider detection failed: {0}")]
    Detection(String),

    #[error("Authentication expired: {0}")]
    AuthExpired(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

/// A node name or position the provider cannot represent
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapabilityViolation {
    #[error("Empty node name")]
    EmptyName,

    #[error("'{name}' is a reserved name")]
    ReservedName { name: String },

    #[error("'{name}' would be nested {depth} levels deep (max {max_depth})")]
    DepthExceeded {
        name: String,
        depth: usize,
        max_depth: usize,
    },

    #[error("'{name}' contains the path separator '{separator}'")]
    IllegalSeparator { name: String, separator: char },

    #[error("'{name}' is longer than {max_len} characters")]
    NameTooLong { name: String, max_len: usize },
}

/// Failure returned by a provider adapter call
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail")]
pub enum ProviderError {
    /// Token invalid or expired; the caller must re-authenticate
    #[error("Authentication expired: {0}")]
    AuthExpired(String),

    /// Provider requires additional consent
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Provider throttled the request; optional hint in milliseconds
    #[error("Rate limited by provider")]
    RateLimited(Option<u64>),

    #[error("Capability violation: {0}")]
    CapabilityViolation(CapabilityViolation),

    /// Target (usually the parent) no longer exists remotely
    #[error("Not found: {0}")]
    NotFound(String),

    /// A node with the same name already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Timeouts, connection resets, 5xx
    #[error("Transient provider failure: {0}")]
    Transient(String),

    #[error("Provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Errors the sync engine retries locally with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Transient(_))
    }

    /// Errors that abort the whole run rather than a single subtree
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, Self::AuthExpired(_) | Self::PermissionDenied(_))
    }

    /// Provider-supplied wait hint for rate limiting
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited(Some(ms)) => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

impl From<CapabilityViolation> for ProviderError {
    fn from(err: CapabilityViolation) -> Self {
        ProviderError::CapabilityViolation(err)
    }
}

impl From<ProviderError> for TaxonomyError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::AuthExpired(msg) => TaxonomyError::AuthExpired(msg),
            ProviderError::PermissionDenied(msg) => TaxonomyError::PermissionDenied(msg),
            other => TaxonomyError::Provider(other.to_string()),
        }
    }
}

// Implement From for common error types

impl From<std::io::Error> for TaxonomyError {
    fn from(err: std::io::Error) -> Self {
        TaxonomyError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for TaxonomyError {
    fn from(err: toml::de::Error) -> Self {
        TaxonomyError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for TaxonomyError {
    fn from(err: serde_json::Error) -> Self {
        TaxonomyError::Parse(err.to_string())
    }
}

impl From<rusqlite::Error> for TaxonomyError {
    fn from(err: rusqlite::Error) -> Self {
        TaxonomyError::Database(err.to_string())
    }
}

impl From<r2d2::Error> for TaxonomyError {
    fn from(err: r2d2::Error) -> Self {
        TaxonomyError::Database(format!("Connection pool: {}", err))
    }
}

impl From<label_templates::TemplateError> for TaxonomyError {
    fn from(err: label_templates::TemplateError) -> Self {
        TaxonomyError::Template(err.to_string())
    }
}

impl From<String> for TaxonomyError {
    fn from(err: String) -> Self {
        TaxonomyError::Other(err)
    }
}

impl From<&str> for TaxonomyError {
    fn from(err: &str) -> Self {
        TaxonomyError::Other(err.to_string())
    }
}

/// Result type alias using TaxonomyError
pub type Result<T> = std::result::Result<T, TaxonomyError>;
