//! `PeerLink` over a channel to a connection's writer task.

use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::broker::PeerLink;

/// Queues frames for a writer task; closing cancels the connection's tasks.
#[derive(Debug)]
pub struct ChannelLink {
    tx: mpsc::UnboundedSender<Bytes>,
    cancel: CancellationToken,
    peer: Option<SocketAddr>,
}

impl ChannelLink {
    pub fn new(tx: mpsc::UnboundedSender<Bytes>, cancel: CancellationToken, peer: Option<SocketAddr>) -> Self {
        Self { tx, cancel, peer }
    }
}

impl PeerLink for ChannelLink {
    fn write(&mut self, frame: Bytes) -> io::Result<()> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "connection closing"));
        }
        self.tx
            .send(frame)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "writer task has exited"))
    }

    fn close(&mut self) {
        self.cancel.cancel();
    }

    fn peer_address(&self) -> Option<String> {
        self.peer.map(|p| p.to_string())
    }
}
