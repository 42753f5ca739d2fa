//! Broker-side connection state.

use bytes::{Bytes, BytesMut};
use std::fmt;
use std::io;

use crate::types::ConnectionId;

/// Write side of one transport connection, as the broker sees it.
pub trait PeerLink: Send + fmt::Debug {
    /// Queue one complete frame. Must not block.
    fn write(&mut self, frame: Bytes) -> io::Result<()>;

    /// Ask the transport to close the connection.
    fn close(&mut self);

    /// Remote address, when the transport knows it.
    fn peer_address(&self) -> Option<String> {
        None
    }
}

/// One live peer connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    link: Box<dyn PeerLink>,
    /// Bytes received but not yet decoded.
    pub(crate) read_buf: BytesMut,
    /// Address the peer reported through the Registry object.
    pub(crate) registry_location: Option<String>,
}

impl Connection {
    pub fn new(id: ConnectionId, link: Box<dyn PeerLink>) -> Self {
        Self {
            id,
            link,
            read_buf: BytesMut::new(),
            registry_location: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn write(&mut self, frame: Bytes) -> io::Result<()> {
        self.link.write(frame)
    }

    pub fn close(&mut self) {
        self.link.close();
    }

    pub fn peer_address(&self) -> Option<String> {
        self.link.peer_address()
    }

    pub fn bytes_available(&self) -> usize {
        self.read_buf.len()
    }

    pub fn registry_location(&self) -> Option<&str> {
        self.registry_location.as_deref()
    }
}
