use std::path::PathBuf;

/// Result type alias for kiln operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error produced by a unit of work's body or another collaborator
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Core error type for kiln operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration errors
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// File system operations
    #[error("file system {operation} operation failed for '{path}': {source}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    /// Binary serialization errors
    #[error("serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A unit of work's body failed
    #[error("Execution failed for {display_name}.")]
    Execution {
        display_name: String,
        #[source]
        source: BoxError,
    },

    /// A body produced a path outside both the output root and the input artifact
    #[error("invalid result path: {}", .path.display())]
    InvalidResultPath { path: PathBuf },

    /// The results file of a workspace cannot be parsed
    #[error("corrupt results file '{}' at line {line}: {reason}", .path.display())]
    CorruptResults {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Exclusive access to a workspace could not be obtained
    #[error("failed to acquire workspace '{}': {source}", .path.display())]
    WorkspaceAcquisition {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Execution history store errors
    #[error("execution history error for '{key}': {message}")]
    History { key: String, message: String },
}

// Conversion implementations
impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::FileSystem {
            path: PathBuf::new(),
            operation: "unknown".to_string(),
            source: error,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Json {
            message: error.to_string(),
            source: error,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(error: bincode::Error) -> Self {
        Error::Serialization {
            message: error.to_string(),
            source: Some(error.into()),
        }
    }
}

// Helper methods for creating errors with context
impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Create a file system error with context
    #[must_use]
    pub fn file_system(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Error::FileSystem {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }

    /// Create a serialization error without an underlying source
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Error::Serialization {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a body failure with the display name of the work that produced it
    #[must_use]
    pub fn execution(display_name: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Execution {
            display_name: display_name.into(),
            source: source.into(),
        }
    }

    /// Create an invalid result path error
    #[must_use]
    pub fn invalid_result_path(path: impl Into<PathBuf>) -> Self {
        Error::InvalidResultPath { path: path.into() }
    }

    /// Create a corrupt results file error
    #[must_use]
    pub fn corrupt_results(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        Error::CorruptResults {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }

    /// Create a workspace acquisition error
    #[must_use]
    pub fn workspace_acquisition(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::WorkspaceAcquisition {
            path: path.into(),
            source,
        }
    }

    /// Create an execution history error
    #[must_use]
    pub fn history(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::History {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Whether this error reports a broken internal invariant rather than an
    /// environmental or user failure
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Error::InvalidResultPath { .. } | Error::CorruptResults { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_execution_error_names_the_work() {
        let err = Error::execution(
            "MinifyTransform: /src/app.js",
            anyhow::anyhow!("syntax error on line 3"),
        );
        assert_eq!(
            err.to_string(),
            "Execution failed for MinifyTransform: /src/app.js."
        );
        let source = err.source().expect("execution errors keep their cause");
        assert!(source.to_string().contains("syntax error"));
    }

    #[test]
    fn test_file_system_error_display() {
        let err = Error::file_system(
            "/tmp/ws/results.bin",
            "read results file",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        let msg = err.to_string();
        assert!(msg.contains("read results file"));
        assert!(msg.contains("results.bin"));
    }

    #[test]
    fn test_invariant_violation_classification() {
        assert!(Error::invalid_result_path("/elsewhere/out.txt").is_invariant_violation());
        assert!(Error::corrupt_results("/ws/results.bin", 2, "unknown prefix").is_invariant_violation());
        assert!(!Error::configuration("bad").is_invariant_violation());
        assert!(!Error::history("abc", "unreadable").is_invariant_violation());
    }

    #[test]
    fn test_corrupt_results_display() {
        let err = Error::corrupt_results("/ws/results.bin", 3, "unknown prefix 'x/'");
        let msg = err.to_string();
        assert!(msg.contains("line 3"));
        assert!(msg.contains("unknown prefix"));
    }
}
