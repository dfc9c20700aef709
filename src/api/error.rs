use crate::utils::validation::ValidationReason;
use std::fmt;
use thiserror::Error;

/// Error categories reported to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Network,
    Timeout,
    Server,
    MalformedResponse,
    Gating,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Network => "NETWORK_ERROR",
            ErrorKind::Timeout => "TIMEOUT_ERROR",
            ErrorKind::Server => "SERVER_ERROR",
            ErrorKind::MalformedResponse => "MALFORMED_RESPONSE",
            ErrorKind::Gating => "GATING_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Validation error: {0}")]
    Validation(ValidationReason),

    #[error("Gating error: {0}")]
    Gating(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Upload cancelled")]
    Aborted,

    #[error("Timeout: no response within {0} ms")]
    Timeout(u64),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Validation(_) => ErrorKind::Validation,
            WorkflowError::Gating(_) => ErrorKind::Gating,
            WorkflowError::Network(_) | WorkflowError::Aborted => ErrorKind::Network,
            WorkflowError::Timeout(_) => ErrorKind::Timeout,
            WorkflowError::Server { .. } => ErrorKind::Server,
            WorkflowError::MalformedResponse(_) => ErrorKind::MalformedResponse,
        }
    }

    /// Gating error for an action whose prerequisite step is missing
    pub fn step_required(step_number: u8) -> Self {
        WorkflowError::Gating(format!("Please complete step {} first", step_number))
    }

    /// Validation and gating errors are resolved before any request is made
    pub fn is_local(&self) -> bool {
        matches!(self.kind(), ErrorKind::Validation | ErrorKind::Gating)
    }

    /// Single message shown next to the form that failed
    pub fn user_message(&self) -> String {
        match self {
            WorkflowError::Validation(reason) => reason.to_string(),
            WorkflowError::Gating(msg) => msg.clone(),
            WorkflowError::Network(_) => {
                "Unable to connect to the server. Please check your internet connection."
                    .to_string()
            }
            WorkflowError::Aborted => "Upload cancelled. Please try again.".to_string(),
            WorkflowError::Timeout(0) => {
                "The server did not respond in time. Please try again.".to_string()
            }
            WorkflowError::Timeout(ms) => format!(
                "The server did not respond within {} seconds. Please try again.",
                ms / 1000
            ),
            WorkflowError::Server { message, .. } => message.clone(),
            WorkflowError::MalformedResponse(_) => {
                "Received an unexpected response from the server. Please try again.".to_string()
            }
        }
    }
}

impl From<reqwest::Error> for WorkflowError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            // The client-side limit is not carried by the error
            tracing::warn!("Transport timeout: {}", e);
            WorkflowError::Timeout(0)
        } else if e.is_decode() {
            WorkflowError::MalformedResponse(e.to_string())
        } else {
            WorkflowError::Network(e.to_string())
        }
    }
}
