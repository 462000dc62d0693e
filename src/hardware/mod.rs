// src/hardware/mod.rs - Serial transport for the CloudWatcher link
use async_trait::async_trait;
use serial2_tokio::SerialPort;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Serial port error: {0}")]
    Serial(#[from] std::io::Error),
    #[error("Not connected to device")]
    NotConnected,
    #[error("Timeout waiting for response")]
    Timeout,
    #[error("Connection closed by device")]
    Closed,
}

/// Byte-stream connection to the weather station.
///
/// The link is half-duplex: callers must hold the transport exclusively for
/// the whole of one command/response exchange. All device-specific framing
/// lives in the protocol codec; the transport only moves bytes.
#[async_trait]
pub trait Transport: Send {
    /// Open (or reopen) the underlying connection.
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Write the full buffer and flush it to the device.
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read until `terminator` appears in the stream or `limit` elapses.
    /// Returns everything received including the terminator. A timed-out
    /// exchange is abandoned, never resumed.
    async fn read_until(&mut self, terminator: &[u8], limit: Duration)
        -> Result<Vec<u8>, TransportError>;

    /// Drop the underlying connection.
    fn close(&mut self);
}

/// Serial port transport for a physically attached CloudWatcher.
pub struct SerialTransport {
    path: String,
    baud: u32,
    port: Option<SerialPort>,
}

impl SerialTransport {
    pub fn new(path: &str, baud: u32) -> Self {
        Self {
            path: path.to_string(),
            baud,
            port: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        tracing::info!("Opening serial port {} at {} baud", self.path, self.baud);
        let port = SerialPort::open(&self.path, self.baud)?;
        self.port = Some(port);
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotConnected)?;
        port.write_all(bytes).await?;
        port.flush().await?;
        Ok(())
    }

    async fn read_until(
        &mut self,
        terminator: &[u8],
        limit: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotConnected)?;
        let deadline = tokio::time::Instant::now() + limit;
        let mut buffer: Vec<u8> = Vec::with_capacity(256);
        let mut chunk = [0u8; 256];

        loop {
            if ends_with_terminator(&buffer, terminator) {
                return Ok(buffer);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout);
            }
            let n = timeout(remaining, port.read(&mut chunk))
                .await
                .map_err(|_| TransportError::Timeout)??;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            buffer.extend_from_slice(&chunk[..n]);
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tracing::info!("Closed serial port {}", self.path);
        }
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("path", &self.path)
            .field("baud", &self.baud)
            .field("open", &self.is_open())
            .finish()
    }
}

fn ends_with_terminator(buffer: &[u8], terminator: &[u8]) -> bool {
    !terminator.is_empty() && buffer.ends_with(terminator)
}
