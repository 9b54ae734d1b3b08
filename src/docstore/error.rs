use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DocstoreErrorCode {
    Usage,
    InvalidArgument,
    CapacityExceeded,
    NotFound,
    EnvironmentMismatch,
    RetryExhausted,
    Aborted,
    Internal,
    PermissionDenied,
    Unauthenticated,
    Unavailable,
    DeadlineExceeded,
}

impl DocstoreErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocstoreErrorCode::Usage => "docstore/usage",
            DocstoreErrorCode::InvalidArgument => "docstore/invalid-argument",
            DocstoreErrorCode::CapacityExceeded => "docstore/capacity-exceeded",
            DocstoreErrorCode::NotFound => "docstore/not-found",
            DocstoreErrorCode::EnvironmentMismatch => "docstore/environment-mismatch",
            DocstoreErrorCode::RetryExhausted => "docstore/transaction-retry-exhausted",
            DocstoreErrorCode::Aborted => "docstore/aborted",
            DocstoreErrorCode::Internal => "docstore/internal",
            DocstoreErrorCode::PermissionDenied => "docstore/permission-denied",
            DocstoreErrorCode::Unauthenticated => "docstore/unauthenticated",
            DocstoreErrorCode::Unavailable => "docstore/unavailable",
            DocstoreErrorCode::DeadlineExceeded => "docstore/deadline-exceeded",
        }
    }

    /// Groups the code into the error family callers usually branch on.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DocstoreErrorCode::Usage => ErrorKind::Usage,
            DocstoreErrorCode::InvalidArgument | DocstoreErrorCode::CapacityExceeded => {
                ErrorKind::Validation
            }
            DocstoreErrorCode::NotFound => ErrorKind::NotFound,
            DocstoreErrorCode::EnvironmentMismatch => ErrorKind::EnvironmentMismatch,
            DocstoreErrorCode::RetryExhausted => ErrorKind::TransactionRetryExhausted,
            DocstoreErrorCode::Aborted
            | DocstoreErrorCode::Internal
            | DocstoreErrorCode::PermissionDenied
            | DocstoreErrorCode::Unauthenticated
            | DocstoreErrorCode::Unavailable
            | DocstoreErrorCode::DeadlineExceeded => ErrorKind::Backend,
        }
    }
}

/// Error families exposed by the data-access layer.
///
/// `Usage`, `Validation` and `EnvironmentMismatch` are always raised locally
/// before any backend call is issued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Usage,
    Validation,
    NotFound,
    EnvironmentMismatch,
    TransactionRetryExhausted,
    Backend,
}

#[derive(Clone, Debug)]
pub struct DocstoreError {
    pub code: DocstoreErrorCode,
    message: String,
}

impl DocstoreError {
    pub fn new(code: DocstoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns `true` for conflicts a transaction retry may resolve.
    pub fn is_retryable_conflict(&self) -> bool {
        self.code == DocstoreErrorCode::Aborted
    }
}

impl Display for DocstoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl Error for DocstoreError {}

pub type DocstoreResult<T> = Result<T, DocstoreError>;

pub fn usage_error(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::Usage, message)
}

pub fn invalid_argument(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::InvalidArgument, message)
}

pub fn capacity_exceeded(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::CapacityExceeded, message)
}

pub fn not_found(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::NotFound, message)
}

pub fn environment_mismatch(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::EnvironmentMismatch, message)
}

pub fn retry_exhausted(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::RetryExhausted, message)
}

pub fn aborted(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::Aborted, message)
}

pub fn internal_error(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::Internal, message)
}

pub fn permission_denied(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::PermissionDenied, message)
}

pub fn unavailable(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::Unavailable, message)
}
