//! In-memory loopback channel
//!
//! Two [`LoopbackChannel`] ends connected back to back: whatever one end writes,
//! the other reads, with no timing delay. Used by the fixture emulator in place of
//! a serial cable and by tests that need a deterministic line stream.
//!
//! # Example
//!
//! ```rust
//! # async fn example() -> Result<(), battery_acceptance::error::ChannelError> {
//! use battery_acceptance::channel::{LoopbackChannel, MeasurementChannel};
//!
//! let (mut host, mut fixture) = LoopbackChannel::pair();
//! fixture.write_line("Voltage Test").await?;
//! assert_eq!(host.read_line().await?, Some("Voltage Test".to_string()));
//! # Ok(())
//! # }
//! ```

use super::{trim_terminator, MeasurementChannel};
use crate::error::ChannelError;
use async_trait::async_trait;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// One end of an in-memory duplex line channel.
#[derive(Debug)]
pub struct LoopbackChannel {
    outbound: Option<UnboundedSender<String>>,
    inbound: UnboundedReceiver<String>,
    transcript: Vec<String>,
    closed: bool,
}

impl LoopbackChannel {
    /// Create two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = unbounded_channel();
        let (b_tx, b_rx) = unbounded_channel();
        (Self::new(Some(a_tx), b_rx), Self::new(Some(b_tx), a_rx))
    }

    /// Create an end that yields exactly `lines` and then end of stream.
    ///
    /// Writes are accepted and kept in the [`transcript`](Self::transcript) only.
    pub fn seeded<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (tx, rx) = unbounded_channel();
        for line in lines {
            let line: String = line.into();
            // receiver is alive until the end of this function
            let _ = tx.send(trim_terminator(&line).to_string());
        }
        Self::new(None, rx)
    }

    fn new(outbound: Option<UnboundedSender<String>>, inbound: UnboundedReceiver<String>) -> Self {
        Self {
            outbound,
            inbound,
            transcript: Vec::new(),
            closed: false,
        }
    }

    /// Lines written through this end, in order.
    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    /// Whether [`close`](MeasurementChannel::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl MeasurementChannel for LoopbackChannel {
    async fn write_line(&mut self, line: &str) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }

        let line = trim_terminator(line).to_string();
        self.transcript.push(line.clone());
        if let Some(outbound) = &self.outbound {
            outbound.send(line).map_err(|_| ChannelError::Closed)?;
        }
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Option<String>, ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        Ok(self.inbound.recv().await)
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.closed = true;
        // dropping the sender signals end of stream to the peer
        self.outbound = None;
        self.inbound.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_is_duplex() {
        let (mut host, mut fixture) = LoopbackChannel::pair();

        host.write_line("START Bat1").await.unwrap();
        fixture.write_line("Voltage Test\n").await.unwrap();

        assert_eq!(fixture.read_line().await.unwrap(), Some("START Bat1".to_string()));
        assert_eq!(host.read_line().await.unwrap(), Some("Voltage Test".to_string()));
        assert_eq!(host.transcript(), ["START Bat1".to_string()]);
    }

    #[tokio::test]
    async fn test_drop_signals_end_of_stream() {
        let (mut host, mut fixture) = LoopbackChannel::pair();
        fixture.write_line("8.8 0.4").await.unwrap();
        drop(fixture);

        assert_eq!(host.read_line().await.unwrap(), Some("8.8 0.4".to_string()));
        assert_eq!(host.read_line().await.unwrap(), None);
        assert!(matches!(
            host.write_line("late").await,
            Err(ChannelError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_close_signals_end_of_stream() {
        let (mut host, mut fixture) = LoopbackChannel::pair();
        fixture.close().await.unwrap();

        assert!(fixture.is_closed());
        assert_eq!(host.read_line().await.unwrap(), None);
        assert!(matches!(fixture.read_line().await, Err(ChannelError::Closed)));
        assert!(matches!(
            fixture.write_line("x").await,
            Err(ChannelError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_seeded_replays_lines_then_ends() {
        let mut channel = LoopbackChannel::seeded(["Voltage Test", "8.8 0.4\n"]);

        channel.write_line("START Bat1").await.unwrap();
        assert_eq!(channel.read_line().await.unwrap(), Some("Voltage Test".to_string()));
        assert_eq!(channel.read_line().await.unwrap(), Some("8.8 0.4".to_string()));
        assert_eq!(channel.read_line().await.unwrap(), None);
        assert_eq!(channel.read_line().await.unwrap(), None);
        assert_eq!(channel.transcript(), ["START Bat1".to_string()]);
    }
}
