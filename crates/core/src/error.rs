//! Error types for reagg.

use thiserror::Error;

/// Result type alias for reagg operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error types for reactive aggregation operations.
///
/// `Configuration` is reported synchronously at subscribe time. `Execution`
/// and `Watch` are fatal to a running session; the session is torn down and
/// the subscriber is expected to resubscribe if it wants to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed pipeline, invalid options or ambiguous document identities.
    #[error("Configuration error: {message}")]
    Configuration { message: String },
    /// The query engine failed to run the pipeline.
    #[error("Execution error: {message}")]
    Execution { message: String },
    /// A change stream reported a failure.
    #[error("Watch error on collection {collection}: {message}")]
    Watch { collection: String, message: String },
    /// Operation attempted on a session that has already stopped.
    #[error("Session stopped")]
    SessionStopped,
}

impl Error {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Creates an execution error.
    pub fn execution(message: impl Into<String>) -> Self {
        Error::Execution {
            message: message.into(),
        }
    }

    /// Creates a watch error.
    pub fn watch(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Watch {
            collection: collection.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::configuration("duplicate identity 1");
        assert!(err.to_string().contains("Configuration"));
        assert!(err.to_string().contains("duplicate identity 1"));

        let err = Error::watch("orders", "stream closed");
        assert!(err.to_string().contains("orders"));
        assert!(err.to_string().contains("stream closed"));
    }

    #[test]
    fn test_error_constructors() {
        let err = Error::execution("boom");
        match err {
            Error::Execution { message } => assert_eq!(message, "boom"),
            _ => panic!("Wrong error type"),
        }
    }
}
