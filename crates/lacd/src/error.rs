//! Error types for LACP engine operations.
//!
//! Malformed network input never shows up here: the control parser drops it
//! and counts it. These errors are returned to administrative callers only.

use std::io;
use thiserror::Error;

/// Result type alias for engine operations.
pub type LacResult<T> = Result<T, LacError>;

/// Coarse classification of a [`LacError`], one class per kind of caller
/// reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// No free port or aggregator number; nothing was changed.
    Exhausted,
    /// The named port, link or aggregator does not exist.
    NotFound,
    /// The request conflicts with current state (already set, bound, exists).
    Conflict,
    /// The target may not be changed in its current administrative state.
    Permission,
    /// Bad input or configuration.
    Invalid,
}

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum LacError {
    #[error("No free {resource} number available")]
    Exhausted {
        /// "port" or "aggregator".
        resource: &'static str,
    },

    #[error("Port '{port}' not found")]
    PortNotFound { port: String },

    #[error("Link '{link}' not found")]
    LinkNotFound { link: String },

    #[error("Aggregator '{name}' not found")]
    AggregatorNotFound { name: String },

    /// Requested state already in effect.
    #[error("Port '{port}': {what} already set")]
    AlreadySet { port: String, what: &'static str },

    /// Link is already bound to the aggregation subsystem.
    #[error("Link '{link}' is busy: {reason}")]
    Busy { link: String, reason: &'static str },

    #[error("Aggregator '{name}' already exists")]
    AggregatorExists { name: String },

    #[error("Aggregator '{name}' is administratively up")]
    AggregatorUp { name: String },

    #[error("Address {mac} does not belong to a member of '{name}'")]
    ForeignAddress { name: String, mac: String },

    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig { field: String, message: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The daemon task serving commands has stopped.
    #[error("Daemon is shut down")]
    Shutdown,
}

impl LacError {
    pub fn port_not_found(port: impl ToString) -> Self {
        Self::PortNotFound {
            port: port.to_string(),
        }
    }

    pub fn aggregator_not_found(name: impl Into<String>) -> Self {
        Self::AggregatorNotFound { name: name.into() }
    }

    pub fn link_not_found(link: impl Into<String>) -> Self {
        Self::LinkNotFound { link: link.into() }
    }

    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            LacError::Exhausted { .. } => ErrorClass::Exhausted,
            LacError::PortNotFound { .. }
            | LacError::LinkNotFound { .. }
            | LacError::AggregatorNotFound { .. } => ErrorClass::NotFound,
            LacError::AlreadySet { .. }
            | LacError::Busy { .. }
            | LacError::AggregatorExists { .. } => ErrorClass::Conflict,
            LacError::AggregatorUp { .. } | LacError::ForeignAddress { .. } => {
                ErrorClass::Permission
            }
            LacError::InvalidConfig { .. }
            | LacError::Io { .. }
            | LacError::ConfigParse(_)
            | LacError::Shutdown => ErrorClass::Invalid,
        }
    }
}
