use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("session server must not be empty")]
    MissingServer,

    #[error("session id must not be empty")]
    MissingSessionId,
}

/// Immutable session configuration handed to the client at construction.
///
/// The serde field names match the wire-level session document, so an
/// embedding harness can deserialize its `validSession` object directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Relay server endpoint, e.g. `ws://localhost:8099`.
    pub server: String,

    /// Opaque token pairing this tester with one instrumented application.
    #[serde(rename = "sessionId")]
    pub session_id: String,

    /// Liveness-probe interval in milliseconds. `0` disables the probe.
    #[serde(rename = "debugSynchronization", default)]
    pub debug_synchronization_ms: u64,
}

impl SessionConfig {
    /// Validate the configuration before opening a connection.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.server.trim().is_empty() {
            return Err(ConfigError::MissingServer);
        }
        if self.session_id.trim().is_empty() {
            return Err(ConfigError::MissingSessionId);
        }
        Ok(())
    }
}
