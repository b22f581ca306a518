use thiserror::Error;

/// Main error type for the tester-side client.
///
/// `Clone` is required so a single transport failure can be fanned out to
/// every request that was in flight when it happened.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("failed to connect to {server}: {reason}")]
    Connection { server: String, reason: String },

    #[error("cannot send {request_type}: socket is closed")]
    ClosedSocket { request_type: String },

    #[error("transport failed: {0}")]
    Transport(String),

    #[error("application error: {message}")]
    Server { message: String },

    #[error("unexpected response {received} (expected one of: {expected})")]
    UnexpectedResponse { received: String, expected: String },

    #[error("failed to capture view hierarchy: {0}")]
    ViewHierarchy(String),

    #[error("application terminated unexpectedly: {message}")]
    AppCrash { message: String },

    #[error("not connected to the application")]
    NotConnected,

    #[error("malformed frame: {0}")]
    Codec(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ClientError>;
