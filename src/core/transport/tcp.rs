//! TCP transport implementation

use super::{Transport, TransportError, TransportStats};
use crate::core::protocol::{simserv, CommandFrame, ResponseFrame};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default SIMSERV port
pub const DEFAULT_PORT: u16 = 2049;

/// Upper bound of a single reply read
pub const MAX_REPLY_LEN: usize = 512;

/// TCP connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Connection timeout in seconds
    pub timeout_secs: u64,
    /// Reply timeout in seconds
    pub read_timeout_secs: u64,
}

impl TcpConfig {
    /// Create a new TCP configuration
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout_secs: 10,
            read_timeout_secs: 10,
        }
    }

    /// Set connection timeout
    #[must_use]
    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set reply timeout
    #[must_use]
    pub fn read_timeout(mut self, secs: u64) -> Self {
        self.read_timeout_secs = secs;
        self
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

/// TCP transport, one connection per exchange
pub struct TcpTransport {
    config: TcpConfig,
    stats: Arc<RwLock<TransportStats>>,
}

impl TcpTransport {
    /// Create a new TCP transport
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            stats: Arc::new(RwLock::new(TransportStats::default())),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    async fn open(&self) -> Result<TcpStream, TransportError> {
        let addr = self.config.address();

        let stream = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.config.timeout_secs))?
        .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", addr, e)))?;

        stream.set_nodelay(true).map_err(TransportError::IoError)?;

        Ok(stream)
    }

    async fn round_trip(&self, stream: &mut TcpStream, request: &[u8]) -> Result<Bytes, TransportError> {
        stream.write_all(request).await?;
        stream.flush().await?;

        // The controller answers with a single short frame; one read is the whole reply
        let mut buffer = vec![0u8; MAX_REPLY_LEN];
        let n = tokio::time::timeout(
            Duration::from_secs(self.config.read_timeout_secs),
            stream.read(&mut buffer),
        )
        .await
        .map_err(|_| TransportError::ReadTimeout(self.config.read_timeout_secs))??;

        buffer.truncate(n);
        Ok(Bytes::from(buffer))
    }

    async fn exchange_once(&self, frame: &CommandFrame) -> Result<(usize, usize, ResponseFrame), TransportError> {
        let request = frame.encode()?;
        let mut stream = self.open().await?;

        tracing::debug!(
            peer = %self.config.address(),
            raw = %hex::encode(&request),
            "sending: {}",
            simserv::display(&request)
        );

        let result = self.round_trip(&mut stream, &request).await;
        stream.shutdown().await.ok();

        let data = result?;
        tracing::debug!(raw = %hex::encode(&data), "received: {}", simserv::display(&data));

        Ok((request.len(), data.len(), ResponseFrame::decode(&data)?))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn exchange(&self, frame: &CommandFrame) -> Result<ResponseFrame, TransportError> {
        let result = self.exchange_once(frame).await;

        let mut stats = self.stats.write();
        match result {
            Ok((sent, received, reply)) => {
                stats.bytes_sent += sent as u64;
                stats.bytes_received += received as u64;
                stats.exchanges += 1;
                Ok(reply)
            }
            Err(e) => {
                stats.errors += 1;
                Err(e)
            }
        }
    }

    fn connection_info(&self) -> String {
        self.config.address()
    }

    fn stats(&self) -> TransportStats {
        self.stats.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = TcpConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.address(), "localhost:2049");

        let config = TcpConfig::new("10.0.0.5", 7777).timeout(3).read_timeout(5);
        assert_eq!(config.address(), "10.0.0.5:7777");
        assert_eq!(config.timeout_secs, 3);
        assert_eq!(config.read_timeout_secs, 5);
    }

    #[tokio::test]
    async fn test_connection_refused_is_unreachable() {
        // Bind then drop to get a port with nothing listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = TcpTransport::new(TcpConfig::new("127.0.0.1", port).timeout(2));
        let frame = CommandFrame::raw(["10012", "1"]);
        let err = transport.exchange(&frame).await.unwrap_err();

        assert!(err.is_unreachable(), "unexpected error: {err}");
        assert_eq!(transport.stats().errors, 1);
        assert_eq!(transport.stats().exchanges, 0);
    }
}
