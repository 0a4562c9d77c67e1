/// Domain failures that callers need to tell apart. Everything else
/// (database, zip, serialization) travels as `anyhow::Error`.
#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("email already exists: {0}")]
    DuplicateEmail(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("no active session")]
    Unauthenticated,
}

impl PortalError {
    pub fn validation(message: impl Into<String>) -> Self {
        PortalError::Validation(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        PortalError::Unauthorized(message.into())
    }

    /// Stable protocol code used in IPC error responses.
    pub fn code(&self) -> &'static str {
        match self {
            PortalError::NotFound(_) => "not_found",
            PortalError::Validation(_) => "validation_failed",
            PortalError::DuplicateEmail(_) => "duplicate_email",
            PortalError::Unauthorized(_) => "unauthorized",
            PortalError::Unauthenticated => "unauthenticated",
        }
    }
}
