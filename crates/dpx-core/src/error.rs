use thiserror::Error;

/// Failure categories consumed by the harvesting pipeline.
///
/// Every [`AppError`] maps onto exactly one kind. The pipeline only cares
/// about the kind: remote, connection and parse failures are isolated to the
/// work unit that produced them, contract violations are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The catalog API answered but signaled failure or malformed content.
    RemoteApi,
    /// Transport-level failure (DNS, reset, timeout).
    Connection,
    /// A tabular payload could not be interpreted.
    Parse,
    /// A caller broke a precondition. Not recoverable locally.
    ContractViolation,
    /// Configuration, local I/O and anything else.
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::RemoteApi => "remote API error",
            ErrorKind::Connection => "connection error",
            ErrorKind::Parse => "parse error",
            ErrorKind::ContractViolation => "contract violation",
            ErrorKind::Other => "error",
        };
        f.write_str(name)
    }
}

/// Application-wide error types.
///
/// This enum represents all possible errors that can occur while harvesting.
/// It uses the `thiserror` crate for ergonomic error handling and automatic
/// conversion from underlying library errors.
///
/// # Examples
///
/// ```
/// use dpx_core::error::{AppError, ErrorKind};
///
/// let err = AppError::Connection("connection reset by peer".to_string());
/// assert_eq!(err.kind(), ErrorKind::Connection);
/// assert!(err.is_retryable());
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// The catalog API responded but signaled failure.
    ///
    /// Covers non-2xx statuses, `success: false` envelopes and bodies that
    /// do not match the expected shape.
    #[error("Remote API error: {0}")]
    RemoteApi(String),

    /// Network or connection error.
    ///
    /// This error occurs when a network request fails due to connectivity issues,
    /// DNS resolution failures, or the remote server being unreachable.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Request timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded. Please wait and try again.")]
    RateLimitExceeded,

    /// API response contained no data.
    #[error("Empty response from API")]
    EmptyResponse,

    /// A downloaded resource could not be read as a table.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A precondition of a pipeline operation was broken by the caller.
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// URL parsing failed.
    ///
    /// This error occurs when a resource URL cannot be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid CKAN portal URL provided.
    #[error("Invalid CKAN portal URL: {0}")]
    InvalidPortalUrl(String),

    /// Configuration values are present but unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configuration file could not be read.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Local filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic application error for cases not covered by specific variants.
    #[error("Error: {0}")]
    Generic(String),
}

impl AppError {
    /// Classifies this error for isolation decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::RemoteApi(_) | AppError::EmptyResponse | AppError::RateLimitExceeded => {
                ErrorKind::RemoteApi
            }
            AppError::Connection(_) | AppError::Timeout(_) => ErrorKind::Connection,
            AppError::Parse(_) | AppError::InvalidUrl(_) => ErrorKind::Parse,
            AppError::ContractViolation(_) => ErrorKind::ContractViolation,
            _ => ErrorKind::Other,
        }
    }

    /// Returns true if this error is retryable.
    ///
    /// # Examples
    ///
    /// ```
    /// use dpx_core::error::AppError;
    ///
    /// assert!(AppError::Connection("connection reset".to_string()).is_retryable());
    /// assert!(AppError::RateLimitExceeded.is_retryable());
    /// assert!(!AppError::RemoteApi("HTTP 404".to_string()).is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Connection(_) | AppError::Timeout(_) | AppError::RateLimitExceeded
        )
    }

    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Connection(msg) => {
                format!("Cannot reach portal: {}\n   Check your internet connection and the portal URL.", msg)
            }
            AppError::Timeout(secs) => {
                format!("Request timed out after {} seconds.\n   The portal may be overloaded. Try again later.", secs)
            }
            AppError::RateLimitExceeded => {
                "Too many requests. Lower `workers` in the configuration and try again."
                    .to_string()
            }
            AppError::InvalidPortalUrl(url) => {
                format!(
                    "Invalid portal URL: {}\n   Example: https://ckan.publishing.service.gov.uk/",
                    url
                )
            }
            AppError::InvalidConfig(msg) | AppError::ConfigError(msg) => {
                format!("Failed to parse config file: {}", msg)
            }
            AppError::EmptyResponse => {
                "The API returned no data. The portal may be temporarily unavailable.".to_string()
            }
            _ => self.to_string(),
        }
    }
}
