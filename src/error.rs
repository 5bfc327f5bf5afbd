//! Error types for the routing core
//!
//! Most peer-level problems are not errors at all: the peer map answers with
//! a boolean and the routing driver counts RPC failures. The types here cover
//! what is left, namely invalid caller input, bad configuration, and the
//! failure reason an RPC collaborator attaches to a failed exchange.

use crate::dht::listener::FailReason;
use std::fmt;

/// Error type for routing operations
#[derive(Debug, Clone)]
pub enum RoutingError {
    /// Structurally invalid input from a caller
    ValidationError {
        message: String,
        field: Option<String>,
    },

    /// Configuration errors
    ConfigError {
        message: String,
        field: Option<String>,
    },

    /// A neighbor RPC could not be completed
    RpcError {
        message: String,
        source: Option<String>,
    },
}

impl RoutingError {
    /// Create a new ValidationError
    pub fn validation_error(message: impl Into<String>) -> Self {
        RoutingError::ValidationError {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new ValidationError with field
    pub fn validation_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        RoutingError::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new ConfigError
    pub fn config_error(message: impl Into<String>) -> Self {
        RoutingError::ConfigError {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new ConfigError with field
    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        RoutingError::ConfigError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new RpcError
    pub fn rpc_error(message: impl Into<String>) -> Self {
        RoutingError::RpcError {
            message: message.into(),
            source: None,
        }
    }


    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let ctx = context.into();
        match &mut self {
            RoutingError::RpcError { source, .. } => {
                *source = Some(source.as_ref().map_or_else(|| ctx.clone(), |s| format!("{}: {}", s, ctx)));
            }
            RoutingError::ValidationError { message, .. } | RoutingError::ConfigError { message, .. } => {
                *message = format!("{} ({})", message, ctx);
            }
        }
        self
    }
}

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingError::ValidationError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Validation error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Validation error: {}", message)
                }
            }
            RoutingError::ConfigError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Config error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Config error: {}", message)
                }
            }
            RoutingError::RpcError { message, source } => {
                if let Some(source_val) = source {
                    write!(f, "RPC error: {} (source: {})", message, source_val)
                } else {
                    write!(f, "RPC error: {}", message)
                }
            }
        }
    }
}

impl std::error::Error for RoutingError {}

impl From<std::io::Error> for RoutingError {
    fn from(err: std::io::Error) -> Self {
        RoutingError::config_error(format!("Failed to read configuration: {}", err))
    }
}

impl From<serde_json::Error> for RoutingError {
    fn from(err: serde_json::Error) -> Self {
        RoutingError::config_error(format!("Failed to parse JSON configuration: {}", err))
    }
}

/// Failure of an exchange with a specific peer.
///
/// RPC collaborators return this inside an `anyhow::Error` so the routing
/// driver can tell the peer map why the peer failed.
#[derive(Debug, Clone)]
pub struct PeerException {
    pub reason: FailReason,
    pub message: String,
}

impl PeerException {
    /// Create a new PeerException
    pub fn new(reason: FailReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    /// Find the failure reason carried by an error, if any
    pub fn reason_of(err: &anyhow::Error) -> Option<FailReason> {
        err.downcast_ref::<PeerException>().map(|e| e.reason)
    }
}

impl fmt::Display for PeerException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Peer failed ({}): {}", self.reason, self.message)
    }
}

impl std::error::Error for PeerException {}
