//! Transport layer for SIMSERV exchanges
//!
//! One exchange is one request frame and one reply frame. The TCP transport
//! opens a fresh connection for every exchange and closes it afterwards.

mod tcp;

#[cfg(test)]
pub(crate) mod scripted;

pub use tcp::{TcpConfig, TcpTransport, DEFAULT_PORT, MAX_REPLY_LEN};

use crate::core::protocol::{CommandFrame, ProtocolError, ResponseFrame};
use async_trait::async_trait;
use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timeout
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// No reply within the read timeout
    #[error("No reply within {0} seconds")]
    ReadTimeout(u64),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Malformed frame
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// Whether the chamber could not be reached at all
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_) | Self::Timeout(_))
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Completed exchanges
    pub exchanges: u64,
    /// Failed exchanges
    pub errors: u64,
}

/// Request/reply transport
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one frame and wait for its reply
    async fn exchange(&self, frame: &CommandFrame) -> Result<ResponseFrame, TransportError>;

    /// Get connection info string
    fn connection_info(&self) -> String;

    /// Get statistics
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}
