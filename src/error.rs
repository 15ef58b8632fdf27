//! Library error types

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the runtime's fallible seams.
///
/// Nothing here ever propagates into the instrumented host program: callers
/// inside the runtime log these and degrade to a no-op or default value.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to write report to {path}")]
    ReportWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("report serialization failed")]
    ReportSerialize(#[from] serde_json::Error),

    #[error("unknown counter strategy `{0}`")]
    UnknownStrategy(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_subject() {
        let err = RuntimeError::UnknownStrategy("reflective".to_string());
        assert!(err.to_string().contains("reflective"));

        let err = RuntimeError::ReportWrite {
            path: PathBuf::from("/tmp/counts.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("/tmp/counts.json"));
    }
}
