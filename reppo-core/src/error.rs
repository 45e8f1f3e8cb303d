//! Error types for the core domain

use thiserror::Error;

/// Core error type for domain operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A name or descriptor is malformed
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// The manifest or registry setup is unusable
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Illegal worker status transition: {message}")]
    StateTransition { message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl Error {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn state_transition<S: Into<String>>(message: S) -> Self {
        Self::StateTransition {
            message: message.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration { .. })
    }

    /// Short category name for structured logs
    pub fn category(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "validation",
            Error::Configuration { .. } => "configuration",
            Error::StateTransition { .. } => "state_transition",
            Error::Serialization(_) => "serialization",
        }
    }
}

/// Convenience result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = Error::validation("operation name contains '::'");
        assert!(err.is_validation());
        assert!(!err.is_configuration());
        assert_eq!(err.category(), "validation");

        let err = Error::configuration("duplicate identity 'adder'");
        assert!(err.is_configuration());
        assert!(err.to_string().contains("adder"));

        let err = Error::state_transition("Terminated -> Ready");
        assert_eq!(err.category(), "state_transition");
    }

    #[test]
    fn test_serde_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = json_err.into();
        assert_eq!(err.category(), "serialization");
    }
}
