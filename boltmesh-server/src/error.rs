//! Server error types.

use crate::config::ConfigError;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] boltmesh_protocol::ProtocolError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("listener not found: {0}")]
    ListenerNotFound(String),

    #[error("failed to bind listener {name} on {addr}: {source}")]
    Bind {
        name: String,
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("upstream {addr} unavailable: {reason}")]
    Upstream {
        addr: std::net::SocketAddr,
        reason: String,
    },

    #[error("server shutting down")]
    ShuttingDown,

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),
}

impl ServerError {
    /// Returns whether the error ends only the current connection rather
    /// than the listener.
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self,
            ServerError::Io(_)
                | ServerError::Protocol(_)
                | ServerError::Upstream { .. }
                | ServerError::TlsHandshake(_)
        )
    }
}
