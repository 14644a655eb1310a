use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::RpcCode;

/// Errors raised by the deploy engine and its backends.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Socket, DNS or timeout failure before a response arrived.
    #[error("request failed: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The backend answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// A long-running operation completed with an error.
    #[error("operation failed ({code}): {message}")]
    Operation { code: RpcCode, message: String },

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Config(String),
}

impl DeployError {
    pub fn transport(message: impl Into<String>) -> Self {
        DeployError::Transport(message.into().into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DeployError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a queue may run the failed task again.
    ///
    /// Transport failures, 5xx and 429 are transient. Any other 4xx, local I/O
    /// and decoding problems will fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeployError::Transport(_) => true,
            DeployError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            DeployError::Operation { code, .. } => code.is_retryable(),
            DeployError::Queue(_)
            | DeployError::Io { .. }
            | DeployError::Decode(_)
            | DeployError::Config(_) => false,
        }
    }
}

impl From<reqwest::Error> for DeployError {
    fn from(err: reqwest::Error) -> Self {
        DeployError::Transport(Box::new(err))
    }
}

/// Queue-level failures. Cloned into every waiter, so the task error is shared.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error("queue {queue} does not accept new tasks")]
    Closed { queue: String },

    #[error("queue {queue}: task #{index} failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        queue: String,
        index: usize,
        attempts: u32,
        #[source]
        source: Arc<DeployError>,
    },
}

impl QueueError {
    /// The handler error that finished the queue, if any.
    pub fn task_error(&self) -> Option<&DeployError> {
        match self {
            QueueError::Closed { .. } => None,
            QueueError::RetriesExhausted { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::server_error(500, true)]
    #[case::unavailable(503, true)]
    #[case::throttled(429, true)]
    #[case::not_found(404, false)]
    #[case::forbidden(403, false)]
    fn http_status_retry_classification(#[case] status: u16, #[case] retryable: bool) {
        let err = DeployError::HttpStatus {
            status,
            body: String::new(),
        };
        assert_eq!(err.is_retryable(), retryable);
    }

    #[test]
    fn operation_errors_follow_their_code() {
        let unavailable = DeployError::Operation {
            code: RpcCode::Unavailable,
            message: "try again".to_string(),
        };
        let invalid = DeployError::Operation {
            code: RpcCode::InvalidArgument,
            message: "bad entry point".to_string(),
        };
        assert!(unavailable.is_retryable());
        assert!(!invalid.is_retryable());
        assert_eq!(invalid.to_string(), "operation failed (INVALID_ARGUMENT (3)): bad entry point");
    }

    #[test]
    fn transport_errors_are_retryable() {
        assert!(DeployError::transport("connection reset").is_retryable());
    }

    #[test]
    fn queue_error_exposes_task_error() {
        let err = QueueError::RetriesExhausted {
            queue: "upload".to_string(),
            index: 3,
            attempts: 6,
            source: Arc::new(DeployError::HttpStatus {
                status: 400,
                body: "bad content hash".to_string(),
            }),
        };
        assert!(err.to_string().contains("task #3"));
        assert!(matches!(
            err.task_error(),
            Some(DeployError::HttpStatus { status: 400, .. })
        ));
    }
}
