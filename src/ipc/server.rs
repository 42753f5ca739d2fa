//! TCP remoting server — accept loop and per-connection reader/writer tasks.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use super::actor::BrokerHandle;
use super::link::ChannelLink;
use crate::types::{ConnectionId, TransportConfig};

/// TCP front end feeding a broker task.
#[derive(Debug)]
pub struct RemotingServer {
    broker: BrokerHandle,
    listen_addr: String,
    cancel: CancellationToken,
    transport: TransportConfig,
    next_id: AtomicU64,
}

impl RemotingServer {
    pub fn new(broker: BrokerHandle, listen_addr: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            broker,
            listen_addr: listen_addr.into(),
            cancel: CancellationToken::new(),
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    /// Use `cancel` instead of a private token, so one token can stop the
    /// server and the broker together.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Bind and run until cancelled. A bind failure is returned without
    /// touching the broker, which stays usable for in-process work.
    pub async fn serve(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.listen_addr.as_str()).await.map_err(|e| {
            tracing::error!("Cannot listen on {}: {}", self.listen_addr, e);
            e
        })?;
        self.serve_on(listener).await
    }

    /// Run the accept loop on an already bound listener.
    pub async fn serve_on(&self, listener: TcpListener) -> std::io::Result<()> {
        let conn_semaphore = Arc::new(Semaphore::new(self.transport.max_connections));
        tracing::info!(
            "Remoting server listening on {} (max_connections={})",
            listener.local_addr()?,
            self.transport.max_connections,
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Remoting server shutting down");
                    break;
                }
                accept = listener.accept() => {
                    let (stream, peer) = match accept {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("Accept failed: {}", e);
                            continue;
                        }
                    };

                    let permit = match conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            tracing::warn!(
                                "Connection from {} rejected: at max_connections ({})",
                                peer,
                                self.transport.max_connections,
                            );
                            drop(stream);
                            continue;
                        }
                    };

                    let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
                    tracing::debug!("{} from {} (active={})",
                        id,
                        peer,
                        self.transport.max_connections - conn_semaphore.available_permits(),
                    );
                    let broker = self.broker.clone();
                    let cancel = self.cancel.child_token();
                    let transport = self.transport.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, id, broker, cancel, transport, permit).await {
                            tracing::warn!("{} from {} error: {}", id, peer, e);
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Pump one socket: reads go to the broker as they arrive, frames the broker
/// queues are written by a separate task.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    id: ConnectionId,
    broker: BrokerHandle,
    cancel: CancellationToken,
    transport: TransportConfig,
    _permit: OwnedSemaphorePermit, // held for connection lifetime
) -> std::io::Result<()> {
    let (mut reader, writer) = stream.into_split();
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();

    let link = ChannelLink::new(frame_tx, cancel.clone(), Some(peer));
    if !broker.accepted(id, Box::new(link)) {
        return Ok(());
    }

    let writer_task = tokio::spawn(write_frames(
        writer,
        frame_rx,
        cancel.clone(),
        transport.write_timeout,
    ));

    let mut chunk = vec![0u8; transport.read_chunk_bytes];
    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            read = reader.read(&mut chunk) => match read {
                Ok(0) => break Ok(()), // clean EOF
                Ok(n) => {
                    if !broker.readable(id, Bytes::copy_from_slice(&chunk[..n])) {
                        break Ok(());
                    }
                }
                Err(e) => break Err(e),
            },
        }
    };

    cancel.cancel();
    broker.disconnected(id);
    let _ = writer_task.await;
    result
}

async fn write_frames(
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<Bytes>,
    cancel: CancellationToken,
    write_timeout: Duration,
) {
    loop {
        let frame = tokio::select! {
            biased;
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };
        if timed_write(&mut writer, &frame, write_timeout).await.is_err() {
            cancel.cancel();
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Write one frame with a timeout, so a slow peer cannot hold its queue
/// forever.
async fn timed_write<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    frame: &[u8],
    timeout: Duration,
) -> std::io::Result<()> {
    tokio::time::timeout(timeout, async {
        writer.write_all(frame).await?;
        writer.flush().await
    })
    .await
    .map_err(|_| {
        tracing::warn!("Write timeout ({:?}), dropping connection", timeout);
        std::io::Error::new(std::io::ErrorKind::TimedOut, "write timeout")
    })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timed_write_gives_up_on_stalled_peer() {
        // The peer never reads, so the 8-byte pipe fills and the write stalls.
        let (mut ours, _peer) = tokio::io::duplex(8);
        let started = tokio::time::Instant::now();
        let err = timed_write(&mut ours, &[0u8; 64], Duration::from_secs(10))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_write_completes_within_window() {
        let (mut ours, mut peer) = tokio::io::duplex(64);
        timed_write(&mut ours, b"frame", Duration::from_millis(50)).await.unwrap();
        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"frame");
    }
}
