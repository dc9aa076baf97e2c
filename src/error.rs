use thiserror::Error;

/// Type alias for Result with BatchError
pub type Result<T> = std::result::Result<T, BatchError>;

/// Error types for the batch runner and its Gmail plumbing
#[derive(Error, Debug)]
pub enum BatchError {
    /// Gmail API returned an error
    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// No user is registered under the supplied API key
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Identity was verified but no user record exists for it
    #[error("User not registered: {0}")]
    UserNotRegistered(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// A store call did not complete within the configured timeout
    #[error("{operation} timed out after {seconds} seconds")]
    Timeout { operation: String, seconds: u64 },

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Resource not found (404)
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Store response was missing required fields
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// Label resolution or creation failed
    #[error("Label error: {0}")]
    LabelError(String),

    /// Configuration error (bad config file, malformed filter, bad batch definition)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An operation names a process with no registered handler
    #[error("Unknown operation process '{process}' (operation '{operation}')")]
    UnknownOperation { operation: String, process: String },

    /// Raised by a processing function
    #[error("Process failed: {0}")]
    ProcessFailed(String),

    /// A processing function failed for one message
    #[error("Failed to run process for message {message_id}: {source}")]
    MessageProcessingFailed {
        message_id: String,
        #[source]
        source: Box<BatchError>,
    },

    /// Processing succeeded but the processed label could not be applied
    #[error("Failed to label message {message_id} as processed: {source}")]
    LabelingFailed {
        message_id: String,
        #[source]
        source: Box<BatchError>,
    },

    /// An operation failed and the batch was aborted
    #[error("Operation '{operation}' failed: {source}")]
    OperationFailed {
        operation: String,
        #[source]
        source: Box<BatchError>,
    },

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl BatchError {
    /// The innermost error beneath any message, labeling or operation wrapper
    pub fn root_cause(&self) -> &BatchError {
        match self {
            BatchError::MessageProcessingFailed { source, .. }
            | BatchError::LabelingFailed { source, .. }
            | BatchError::OperationFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Check if the error came from a transient store condition
    ///
    /// Nothing retries within a run; this only informs operator messaging.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.root_cause(),
            BatchError::RateLimitExceeded { .. }
                | BatchError::ServerError { .. }
                | BatchError::NetworkError(_)
                | BatchError::Timeout { .. }
        )
    }

    /// Check if the error should be raised before any batch work starts
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.root_cause(),
            BatchError::ConfigError(_)
                | BatchError::UnknownOperation { .. }
                | BatchError::InvalidApiKey
                | BatchError::UserNotRegistered(_)
                | BatchError::AuthError(_)
        )
    }

    /// Operator hint for the command line, chosen from the root cause
    pub fn hint(&self) -> Option<&'static str> {
        match self.root_cause() {
            BatchError::RateLimitExceeded { .. } => Some(
                "You've hit Gmail API rate limits.\n      \
                 Consider reducing max_concurrent_requests in config.",
            ),
            BatchError::AuthError(_) => Some(
                "Make sure your credentials.json file is valid.\n      \
                 Try running: gmail-batch auth --force",
            ),
            BatchError::InvalidApiKey | BatchError::UserNotRegistered(_) => Some(
                "Check the users file named by LOCAL_USERS_PATH\n      \
                 (default: secrets/users.json).",
            ),
            root if root.is_transient() => Some(
                "This may be a temporary Gmail API problem.\n      \
                 Try running the command again.",
            ),
            root if root.is_configuration() => Some(
                "Check your configuration and batch files for errors.\n      \
                 Run: gmail-batch init-config --force",
            ),
            _ => None,
        }
    }
}

/// Read an integer `Retry-After` header, defaulting to 5 seconds
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

impl From<google_gmail1::Error> for BatchError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let status_code = status.as_u16();
                let message = format!(
                    "HTTP {}: {}",
                    status_code,
                    status.canonical_reason().unwrap_or("Unknown")
                );

                match status_code {
                    429 => BatchError::RateLimitExceeded {
                        retry_after: parse_retry_after_header(response),
                    },
                    404 => BatchError::MessageNotFound("Resource not found".to_string()),
                    400 => BatchError::BadRequest(message),
                    401 => BatchError::AuthError(message),
                    403 => BatchError::Forbidden(message),
                    500..=599 => BatchError::ServerError {
                        status: status_code,
                        message,
                    },
                    _ => BatchError::ApiError(message),
                }
            }
            google_gmail1::Error::BadRequest(ref err) => BatchError::BadRequest(format!("{}", err)),
            google_gmail1::Error::HttpError(ref err) => {
                BatchError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => BatchError::NetworkError(err.to_string()),
            _ => BatchError::ApiError(error.to_string()),
        }
    }
}
