/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Bounded-channel transport.
//!
//! The engine side holds a [`ChannelTransport`]; a socket writer task owns
//! the matching [`WriterHalf`]. A full channel is the backpressure signal.

use crate::{SendOutcome, Transport};
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Notify, mpsc};
use tracing::trace;

/// Engine-side sink backed by a bounded `mpsc` channel.
#[derive(Debug)]
pub struct ChannelTransport {
    sender: Option<mpsc::Sender<Bytes>>,
    shutdown: Arc<Notify>,
    peer: String,
}

/// Socket-side receiver paired with a [`ChannelTransport`].
#[derive(Debug)]
pub struct WriterHalf {
    receiver: mpsc::Receiver<Bytes>,
    shutdown: Arc<Notify>,
}

impl ChannelTransport {
    /// Creates a transport holding at most `capacity` unwritten frames.
    #[must_use]
    pub fn new(capacity: usize, peer: impl Into<String>) -> (Self, WriterHalf) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let shutdown = Arc::new(Notify::new());
        (
            Self {
                sender: Some(sender),
                shutdown: Arc::clone(&shutdown),
                peer: peer.into(),
            },
            WriterHalf { receiver, shutdown },
        )
    }
}

impl Transport for ChannelTransport {
    fn try_send(&mut self, frame: &Bytes) -> SendOutcome {
        let Some(sender) = &self.sender else {
            return SendOutcome::Closed;
        };
        match sender.try_send(frame.clone()) {
            Ok(()) => SendOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!(peer = %self.peer, "outbound channel full");
                SendOutcome::Backpressured
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    fn disconnect(&mut self) {
        if self.sender.take().is_some() {
            self.shutdown.notify_one();
        }
    }

    fn is_connected(&self) -> bool {
        self.sender.as_ref().is_some_and(|s| !s.is_closed())
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

impl WriterHalf {
    /// Receives the next frame; `None` once the engine disconnected and every
    /// queued frame was drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    /// Returns the signal fired when the engine disconnects.
    #[must_use]
    pub fn shutdown_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Writes every frame to `writer` until the engine disconnects, then
    /// shuts the writer down.
    pub async fn write_all_to<W>(mut self, mut writer: W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(frame) = self.receiver.recv().await {
            writer.write_all(&frame).await?;
        }
        writer.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_channel_backpressures() {
        let (mut transport, mut writer) = ChannelTransport::new(2, "test");
        let frame = Bytes::from_static(b"frame");
        assert_eq!(transport.try_send(&frame), SendOutcome::Sent);
        assert_eq!(transport.try_send(&frame), SendOutcome::Sent);
        assert_eq!(transport.try_send(&frame), SendOutcome::Backpressured);

        assert_eq!(writer.recv().await, Some(frame.clone()));
        assert_eq!(transport.try_send(&frame), SendOutcome::Sent);
    }

    #[tokio::test]
    async fn test_disconnect_drains_then_ends() {
        let (mut transport, writer) = ChannelTransport::new(4, "test");
        transport.try_send(&Bytes::from_static(b"ab"));
        transport.try_send(&Bytes::from_static(b"cd"));
        transport.disconnect();
        transport.disconnect();
        assert!(!transport.is_connected());
        assert_eq!(
            transport.try_send(&Bytes::from_static(b"ef")),
            SendOutcome::Closed
        );

        let mut out: Vec<u8> = Vec::new();
        writer.write_all_to(&mut out).await.unwrap();
        assert_eq!(out, b"abcd");
    }

    #[tokio::test]
    async fn test_closed_writer_reports_closed() {
        let (mut transport, writer) = ChannelTransport::new(1, "test");
        drop(writer);
        assert!(!transport.is_connected());
        assert_eq!(
            transport.try_send(&Bytes::from_static(b"x")),
            SendOutcome::Closed
        );
    }

    #[tokio::test]
    async fn test_shutdown_signal_fires() {
        let (mut transport, writer) = ChannelTransport::new(1, "test");
        let signal = writer.shutdown_signal();
        transport.disconnect();
        signal.notified().await;
    }
}
