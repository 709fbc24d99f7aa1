//! Error types for broadcast and observe sessions

use thiserror::Error;

use crate::transport::TransportError;

/// Errors that can occur in a session
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    /// Advertisement is already broadcasting (or being registered)
    #[error("advertisement already registered: {0}")]
    AlreadyRegistered(String),

    /// Advertisement was created for another broadcaster
    #[error("advertisement local name {actual:?} does not match broadcaster {expected:?}")]
    NameMismatch {
        /// Name of the broadcaster
        expected: String,
        /// Local name of the advertisement
        actual: String,
    },

    /// Failure reported by the transport
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Message encoding error
    #[error("protocol error: {0}")]
    Protocol(#[from] pb_protocol::ProtocolError),

    /// Background unregistration task panicked or was cancelled
    #[error("background task failed: {0}")]
    TaskFailed(String),
}
