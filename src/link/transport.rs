//! Byte transport abstraction for the detector link.
//!
//! The protocol state machine is written against [`Transport`] so it can be
//! exercised with scripted byte streams in tests; the real instrument speaks
//! over a serial port at 230400 baud, 8 data bits, no parity, one stop bit,
//! no flow control.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::info;

use crate::{AcquisitionError, Result};

/// Serial parameters for the detector head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial port path (e.g. `/dev/ttyUSB0`, `COM3`).
    pub port: String,
    /// Baud rate; the detector head runs at 230400.
    pub baud_rate: u32,
}

impl SerialConfig {
    /// Baud rate the detector head is fixed to.
    pub const DEFAULT_BAUD: u32 = 230_400;

    /// Config for `port` at the detector's fixed baud rate.
    pub fn new(port: impl Into<String>) -> Self {
        Self { port: port.into(), baud_rate: Self::DEFAULT_BAUD }
    }
}

/// Bidirectional byte stream to the detector.
#[async_trait::async_trait]
pub trait Transport: Send + 'static {
    /// Read available bytes into `buf`, waiting until at least one arrives.
    ///
    /// Returns the number of bytes read; `0` means the transport closed.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `bytes`.
    async fn write_all(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Serial-port transport for real hardware.
pub struct SerialTransport {
    stream: SerialStream,
}

impl SerialTransport {
    /// Open the detector's serial port with its fixed framing (8N1, no flow
    /// control).
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let stream = tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                AcquisitionError::transport(
                    format!("open {}", config.port),
                    std::io::Error::other(e),
                )
            })?;
        info!(port = %config.port, baud = config.baud_rate, "serial port opened");
        Ok(Self { stream })
    }
}

#[async_trait::async_trait]
impl Transport for SerialTransport {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream
            .read(buf)
            .await
            .map_err(|e| AcquisitionError::transport("read", e))
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream
            .write_all(bytes)
            .await
            .map_err(|e| AcquisitionError::transport("write", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_config_defaults_to_detector_baud() {
        let config = SerialConfig::new("/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 230_400);
        assert_eq!(config.port, "/dev/ttyUSB0");
    }
}
