//! Measurement channel abstraction
//!
//! A [`MeasurementChannel`] is a duplex, line-oriented transport between the host and
//! the test fixture. The framer only ever talks to this trait, so the same protocol
//! logic runs against a physical serial port ([`StreamChannel`] over
//! `tokio_serial::SerialStream`) and against the in-memory [`LoopbackChannel`] used by
//! the fixture emulator and by tests.
//!
//! # Contract
//! - `write_line` sends one line; implementations append the `\n` terminator
//! - `read_line` waits for the next line and returns it without its terminator, or
//!   `Ok(None)` once the peer has nothing more to send (end of stream)
//! - `close` releases the transport; later calls fail with `ChannelError::Closed`
//!
//! Reads may block for as long as the hardware takes. Callers that need a deadline
//! wrap `read_line` in `tokio::time::timeout`.

use crate::error::ChannelError;
use async_trait::async_trait;

pub mod loopback;
pub mod stream;

pub use loopback::LoopbackChannel;
#[cfg(feature = "tokio_serial")]
pub use stream::SerialChannel;
pub use stream::{open_serial, StreamChannel};

/// Line terminator used on the wire.
pub const LINE_TERMINATOR: char = '\n';

/// Capability: line-oriented duplex transport to a test fixture.
#[async_trait]
pub trait MeasurementChannel: Send {
    /// Send one line. The terminator is appended by the channel.
    async fn write_line(&mut self, line: &str) -> Result<(), ChannelError>;

    /// Receive the next line without its terminator, `None` at end of stream.
    async fn read_line(&mut self) -> Result<Option<String>, ChannelError>;

    /// Close the channel.
    async fn close(&mut self) -> Result<(), ChannelError>;
}

#[async_trait]
impl<C: MeasurementChannel + ?Sized> MeasurementChannel for Box<C> {
    async fn write_line(&mut self, line: &str) -> Result<(), ChannelError> {
        (**self).write_line(line).await
    }

    async fn read_line(&mut self) -> Result<Option<String>, ChannelError> {
        (**self).read_line().await
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        (**self).close().await
    }
}

/// Strip a trailing `\n` or `\r\n` from a received line.
pub(crate) fn trim_terminator(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}
