use thiserror::Error;

/// Error a custom sanitizer may return to reject an input.
pub type SanitizeError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Input rejected by sanitizer: {0}")]
    Sanitization(#[source] SanitizeError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Failed to run interpreter: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Operation timed out")]
    Timeout,
}
