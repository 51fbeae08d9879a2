use crate::resilience::circuit_breaker::CircuitOpenError;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "circuit_breaker.failure_threshold")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., element id, search term)
    pub details: Option<String>,
    /// Source of the error (e.g., "in_memory_service", "config_loader")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the resilience layer.
///
/// Failures from the wrapped service travel through the circuit breaker and the
/// retry policy untouched; only [`Error::CircuitOpen`] is produced by the layer itself.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("Service error: {message}{}", format_context(.context))]
    Service {
        message: String,
        context: ErrorContext,
    },

    #[error("Background queue is closed; rejected task in category '{category}'")]
    QueueClosed { category: String },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a wrapped-service failure with structured context
    pub fn service_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Service {
            message: msg.into(),
            context,
        }
    }

    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// True when the circuit breaker rejected the call without running it.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Error::CircuitOpen(_))
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Service { context, .. }
            | Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_display_includes_context() {
        let err = Error::service_with_context(
            "backend unreachable",
            ErrorContext::new()
                .with_details("element 7")
                .with_source("in_memory_service"),
        );
        assert_eq!(
            err.to_string(),
            "Service error: backend unreachable (details: element 7, source: in_memory_service)"
        );
    }

    #[test]
    fn test_display_without_context() {
        let err = Error::configuration_with_context("bad", ErrorContext::new());
        assert_eq!(err.to_string(), "Configuration error: bad");
    }

    #[test]
    fn test_circuit_open_conversion() {
        let err: Error = CircuitOpenError::new("element_3", Duration::from_secs(2)).into();
        assert!(err.is_circuit_open());
        assert!(err.context().is_none());
        assert!(err.to_string().contains("element_3"));
    }
}
