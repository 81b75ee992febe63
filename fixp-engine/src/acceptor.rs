/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! TCP acceptor feeding an engine task.
//!
//! Each accepted socket is split: a writer task drains the connection's
//! bounded [`ChannelTransport`] into the socket, while the read loop frames
//! incoming bytes with the SOFH codec and forwards complete frames to the
//! engine. A framing error ends the connection with no reply.

use crate::handle::EngineHandle;
use bytes::BytesMut;
use fixp_core::error::Result;
use fixp_core::types::ConnectionId;
use fixp_transport::{ChannelTransport, FixpCodec};
use std::net::SocketAddr;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::codec::Decoder;
use tracing::{debug, error, info, warn};

const READ_BUFFER_SIZE: usize = 4096;

/// Listens for initiators and attaches each socket to the engine.
#[derive(Debug)]
pub struct Acceptor {
    listener: TcpListener,
    handle: EngineHandle,
    codec: FixpCodec,
    channel_capacity: usize,
}

impl Acceptor {
    /// Binds a listener.
    ///
    /// # Errors
    /// Returns an I/O error if the address cannot be bound.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        handle: EngineHandle,
        codec: FixpCodec,
        channel_capacity: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "acceptor listening");
        Ok(Self {
            listener,
            handle,
            codec,
            channel_capacity,
        })
    }

    /// Returns the bound address.
    ///
    /// # Errors
    /// Returns an I/O error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the listener fails.
    ///
    /// # Errors
    /// Returns the accept error.
    pub async fn run(self) -> Result<()> {
        loop {
            let (socket, peer) = self.listener.accept().await?;
            info!(%peer, "connection accepted");
            let handle = self.handle.clone();
            let codec = self.codec.clone();
            let capacity = self.channel_capacity;
            tokio::spawn(async move {
                if let Err(err) = serve_connection(socket, peer, handle, codec, capacity).await {
                    error!(%peer, error = %err, "connection failed");
                }
            });
        }
    }
}

/// Runs one socket until either side closes it.
///
/// # Errors
/// Returns an engine or socket error.
pub async fn serve_connection(
    socket: TcpStream,
    peer: SocketAddr,
    handle: EngineHandle,
    codec: FixpCodec,
    channel_capacity: usize,
) -> Result<()> {
    let (reader, writer) = socket.into_split();
    let (transport, writer_half) = ChannelTransport::new(channel_capacity, peer.to_string());
    let shutdown = writer_half.shutdown_signal();
    let connection_id = handle.connect(Box::new(transport)).await?;

    let writer_task = tokio::spawn(async move {
        if let Err(err) = writer_half.write_all_to(writer).await {
            debug!(%peer, error = %err, "socket write failed");
        }
    });

    let result = tokio::select! {
        read = read_frames(reader, connection_id, &handle, codec) => read,
        () = shutdown.notified() => {
            debug!(connection_id = connection_id.0, "engine closed the connection");
            Ok(())
        }
    };
    if let Err(err) = handle.disconnected(connection_id).await {
        debug!(connection_id = connection_id.0, error = %err, "engine gone before disconnect");
    }
    if let Err(err) = writer_task.await {
        warn!(connection_id = connection_id.0, error = %err, "writer task failed");
    }
    info!(connection_id = connection_id.0, %peer, "connection finished");
    result
}

async fn read_frames(
    mut reader: OwnedReadHalf,
    connection_id: ConnectionId,
    handle: &EngineHandle,
    mut codec: FixpCodec,
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    loop {
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(frame)) => handle.inbound(connection_id, frame).await?,
                Ok(None) => break,
                Err(err) => {
                    warn!(connection_id = connection_id.0, error = %err, "framing error");
                    return Ok(());
                }
            }
        }
        if reader.read_buf(&mut buf).await? == 0 {
            debug!(connection_id = connection_id.0, "peer closed the socket");
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::testing::{ScriptedAuth, negotiate};
    use fixp_core::frame::Frame;
    use fixp_core::types::SessionIdentity;
    use fixp_session::config::SessionConfig;
    use fixp_store::memory::{MemoryLedger, MemoryMessageLog};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    async fn start() -> (SocketAddr, EngineHandle) {
        let engine = Engine::new(
            SessionConfig::new(),
            Arc::new(MemoryMessageLog::new()),
            Arc::new(MemoryLedger::new()),
            Box::new(ScriptedAuth::accept_all()),
        )
        .unwrap();
        let (handle, _task) = EngineHandle::spawn(engine, 64, Duration::from_millis(5));
        let acceptor = Acceptor::bind("127.0.0.1:0", handle.clone(), FixpCodec::new(), 16)
            .await
            .unwrap();
        let addr = acceptor.local_addr().unwrap();
        tokio::spawn(acceptor.run());
        (addr, handle)
    }

    async fn read_frame(socket: &mut TcpStream, buf: &mut BytesMut) -> Option<Frame> {
        let mut codec = FixpCodec::new();
        loop {
            if let Some(frame) = codec.decode(buf).unwrap() {
                return Some(Frame::decode(&frame).unwrap());
            }
            if socket.read_buf(buf).await.unwrap() == 0 {
                return None;
            }
        }
    }

    #[tokio::test]
    async fn test_negotiate_over_tcp() {
        let (addr, handle) = start().await;
        let mut socket = TcpStream::connect(addr).await.unwrap();
        let identity = SessionIdentity::new(77, 1);
        let bytes = negotiate(identity).to_bytes().unwrap();
        // split across two writes to exercise reassembly
        socket.write_all(&bytes[..5]).await.unwrap();
        socket.write_all(&bytes[5..]).await.unwrap();

        let mut buf = BytesMut::new();
        let frame = read_frame(&mut socket, &mut buf).await;
        assert!(matches!(
            frame,
            Some(Frame::NegotiateResponse { identity: id, .. }) if id == identity
        ));
        assert_eq!(handle.sessions().await.unwrap()[0].identity, identity);
    }

    #[tokio::test]
    async fn test_framing_error_disconnects_silently() {
        let (addr, _handle) = start().await;
        let mut socket = TcpStream::connect(addr).await.unwrap();
        socket.write_all(&[0, 10, 0x12, 0x34, 0, 0, 0, 0, 0, 0]).await.unwrap();
        let mut buf = BytesMut::new();
        assert!(read_frame(&mut socket, &mut buf).await.is_none());
        assert!(buf.is_empty());
    }
}
