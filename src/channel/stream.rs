//! Byte-stream channel (serial port)
//!
//! [`StreamChannel`] turns any async byte stream into a [`MeasurementChannel`] by
//! buffering reads and splitting on `\n`. With the `tokio_serial` feature,
//! [`open_serial`] opens a physical fixture port.
//!
//! Fixture serial settings:
//! - Baud: configurable (fixtures ship at 9600), 8N1, no flow control
//! - Terminator: LF (`\n`); a trailing CR is tolerated on receive
//! - Data lines: `"<voltage> <current>\n"`

use super::{trim_terminator, MeasurementChannel, LINE_TERMINATOR};
use crate::error::ChannelError;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

/// Line channel over an async byte stream.
pub struct StreamChannel<T> {
    stream: BufReader<T>,
    closed: bool,
}

impl<T> StreamChannel<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a connected stream.
    pub fn new(stream: T) -> Self {
        Self {
            stream: BufReader::new(stream),
            closed: false,
        }
    }

    /// Recover the underlying stream.
    pub fn into_inner(self) -> T {
        self.stream.into_inner()
    }
}

#[async_trait]
impl<T> MeasurementChannel for StreamChannel<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_line(&mut self, line: &str) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }

        let payload = format!("{}{}", trim_terminator(line), LINE_TERMINATOR);
        let port = self.stream.get_mut();
        port.write_all(payload.as_bytes()).await?;
        port.flush().await?;
        debug!(line = %trim_terminator(line), "Sent fixture line");
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Option<String>, ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }

        let mut buffer = String::new();
        let bytes_read = self.stream.read_line(&mut buffer).await?;
        if bytes_read == 0 {
            return Ok(None);
        }

        let line = trim_terminator(&buffer).to_string();
        debug!(line = %line, "Received fixture line");
        Ok(Some(line))
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        if !self.closed {
            self.closed = true;
            self.stream.get_mut().shutdown().await?;
        }
        Ok(())
    }
}

/// Line channel over a physical serial port.
#[cfg(feature = "tokio_serial")]
pub type SerialChannel = StreamChannel<tokio_serial::SerialStream>;

/// Open a fixture serial port (8N1, no flow control).
///
/// # Errors
/// Returns [`ChannelError::Open`] if the port cannot be opened.
#[cfg(feature = "tokio_serial")]
pub fn open_serial(
    port_path: &str,
    baud_rate: u32,
) -> Result<SerialChannel, ChannelError> {
    use tokio_serial::SerialPortBuilderExt;

    let port = tokio_serial::new(port_path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| ChannelError::Open {
            port: port_path.to_string(),
            reason: e.to_string(),
        })?;

    debug!(port = port_path, baud_rate, "Serial port opened");
    Ok(StreamChannel::new(port))
}

/// Serial support is compiled out; always fails.
#[cfg(not(feature = "tokio_serial"))]
pub fn open_serial(
    _port_path: &str,
    _baud_rate: u32,
) -> Result<StreamChannel<tokio::io::DuplexStream>, ChannelError> {
    Err(ChannelError::SerialFeatureDisabled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_reads_lines_and_strips_terminators() {
        let (host_side, mut fixture_side) = tokio::io::duplex(256);
        let mut channel = StreamChannel::new(host_side);

        fixture_side
            .write_all(b"File BatDat/Bat1.txt exists.\r\n8.8 0.4\n")
            .await
            .unwrap();
        drop(fixture_side);

        assert_eq!(
            channel.read_line().await.unwrap(),
            Some("File BatDat/Bat1.txt exists.".to_string())
        );
        assert_eq!(channel.read_line().await.unwrap(), Some("8.8 0.4".to_string()));
        assert_eq!(channel.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_appends_single_terminator() {
        let (host_side, mut fixture_side) = tokio::io::duplex(256);
        let mut channel = StreamChannel::new(host_side);

        channel.write_line("START Bat1").await.unwrap();
        channel.write_line("7 120\n").await.unwrap();
        channel.close().await.unwrap();

        let mut received = String::new();
        fixture_side.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "START Bat1\n7 120\n");
    }

    #[tokio::test]
    async fn test_closed_channel_rejects_io() {
        let (host_side, _fixture_side) = tokio::io::duplex(64);
        let mut channel = StreamChannel::new(host_side);
        channel.close().await.unwrap();

        assert!(matches!(channel.read_line().await, Err(ChannelError::Closed)));
        assert!(matches!(
            channel.write_line("x").await,
            Err(ChannelError::Closed)
        ));
    }

    #[cfg(feature = "tokio_serial")]
    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let result = open_serial("/dev/this-port-does-not-exist", 9600);
        assert!(matches!(result, Err(ChannelError::Open { .. })));
    }
}
