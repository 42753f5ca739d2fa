//! Broker actor — one task owns the `SourceIoBroker`.
//!
//! Transport tasks and host code talk to it through [`BrokerHandle`], which
//! turns each call into a [`BrokerCommand`] on an unbounded channel. Commands
//! that produce a result carry a oneshot sender for it.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerEvent, BrokerStats, PeerLink, SourceIoBroker};
use crate::object::{ApiMap, ObjectHandle};
use crate::protocol::Variant;
use crate::types::{ConnectionId, Error, Result};

/// Messages processed by the broker task, in arrival order.
#[derive(Debug)]
pub enum BrokerCommand {
    Accepted {
        id: ConnectionId,
        link: Box<dyn PeerLink>,
    },
    Readable {
        id: ConnectionId,
        bytes: Bytes,
    },
    Disconnected {
        id: ConnectionId,
    },
    EnableRemoting {
        object: ObjectHandle,
        api: ApiMap,
        adapter: Option<ObjectHandle>,
        reply: oneshot::Sender<bool>,
    },
    EnableRemotingWithName {
        object: ObjectHandle,
        name: String,
        reply: oneshot::Sender<bool>,
    },
    DisableRemoting {
        object: ObjectHandle,
        reply: oneshot::Sender<bool>,
    },
    NotifyPropertyChanged {
        name: String,
        index: i32,
        value: Variant,
        reply: oneshot::Sender<Result<usize>>,
    },
    ReadProperty {
        name: String,
        index: i32,
        reply: oneshot::Sender<Result<Variant>>,
    },
    SubscribeEvents {
        reply: oneshot::Sender<mpsc::UnboundedReceiver<BrokerEvent>>,
    },
    ExposedNames {
        reply: oneshot::Sender<Vec<String>>,
    },
    Stats {
        reply: oneshot::Sender<BrokerStats>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running broker task.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    tx: mpsc::UnboundedSender<BrokerCommand>,
    address: String,
}

/// Start the broker task. It runs until [`BrokerHandle::shutdown`], until
/// `cancel` fires, or until every handle is dropped.
pub fn spawn_broker(broker: SourceIoBroker, cancel: CancellationToken) -> (BrokerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = BrokerHandle {
        tx,
        address: broker.server_address().to_string(),
    };
    let task = tokio::spawn(run_broker(broker, rx, cancel));
    (handle, task)
}

async fn run_broker(
    mut broker: SourceIoBroker,
    mut rx: mpsc::UnboundedReceiver<BrokerCommand>,
    cancel: CancellationToken,
) {
    tracing::info!("Broker started at {}", broker.server_address());
    loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => break,
            command = rx.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };
        if let BrokerCommand::Shutdown { reply } = command {
            broker.shutdown();
            let _ = reply.send(());
            break;
        }
        handle_command(&mut broker, command);
    }
    broker.shutdown();
    tracing::info!("Broker stopped ({:?})", broker.stats());
}

fn handle_command(broker: &mut SourceIoBroker, command: BrokerCommand) {
    // A dropped reply receiver just means the caller stopped waiting
    match command {
        BrokerCommand::Accepted { id, link } => broker.on_connection_accepted(id, link),
        BrokerCommand::Readable { id, bytes } => broker.on_connection_readable(id, &bytes),
        BrokerCommand::Disconnected { id } => broker.on_connection_disconnected(id),
        BrokerCommand::EnableRemoting {
            object,
            api,
            adapter,
            reply,
        } => {
            let _ = reply.send(broker.enable_remoting(object, api, adapter));
        }
        BrokerCommand::EnableRemotingWithName {
            object,
            name,
            reply,
        } => {
            let _ = reply.send(broker.enable_remoting_with_name(object, &name));
        }
        BrokerCommand::DisableRemoting { object, reply } => {
            let _ = reply.send(broker.disable_remoting(&object));
        }
        BrokerCommand::NotifyPropertyChanged {
            name,
            index,
            value,
            reply,
        } => {
            let _ = reply.send(broker.notify_property_changed(&name, index, value));
        }
        BrokerCommand::ReadProperty { name, index, reply } => {
            let _ = reply.send(broker.read_property(&name, index));
        }
        BrokerCommand::SubscribeEvents { reply } => {
            let _ = reply.send(broker.subscribe_events());
        }
        BrokerCommand::ExposedNames { reply } => {
            let _ = reply.send(broker.exposed_names());
        }
        BrokerCommand::Stats { reply } => {
            let _ = reply.send(broker.stats().clone());
        }
        BrokerCommand::Shutdown { reply } => {
            broker.shutdown();
            let _ = reply.send(());
        }
    }
}

impl BrokerHandle {
    /// Address advertised in registry events.
    pub fn server_address(&self) -> &str {
        &self.address
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    // =========================================================================
    // Transport side (fire and forget)
    // =========================================================================

    pub fn accepted(&self, id: ConnectionId, link: Box<dyn PeerLink>) -> bool {
        self.tx.send(BrokerCommand::Accepted { id, link }).is_ok()
    }

    pub fn readable(&self, id: ConnectionId, bytes: Bytes) -> bool {
        self.tx.send(BrokerCommand::Readable { id, bytes }).is_ok()
    }

    pub fn disconnected(&self, id: ConnectionId) -> bool {
        self.tx.send(BrokerCommand::Disconnected { id }).is_ok()
    }

    // =========================================================================
    // Host side
    // =========================================================================

    pub async fn enable_remoting(
        &self,
        object: ObjectHandle,
        api: ApiMap,
        adapter: Option<ObjectHandle>,
    ) -> Result<bool> {
        self.request(|reply| BrokerCommand::EnableRemoting {
            object,
            api,
            adapter,
            reply,
        })
        .await
    }

    pub async fn enable_remoting_with_name(&self, object: ObjectHandle, name: impl Into<String>) -> Result<bool> {
        let name = name.into();
        self.request(|reply| BrokerCommand::EnableRemotingWithName {
            object,
            name,
            reply,
        })
        .await
    }

    pub async fn disable_remoting(&self, object: ObjectHandle) -> Result<bool> {
        self.request(|reply| BrokerCommand::DisableRemoting { object, reply })
            .await
    }

    /// Publish a property change; returns how many listeners received it.
    pub async fn notify_property_changed(
        &self,
        name: impl Into<String>,
        index: i32,
        value: Variant,
    ) -> Result<usize> {
        let name = name.into();
        self.request(|reply| BrokerCommand::NotifyPropertyChanged {
            name,
            index,
            value,
            reply,
        })
        .await?
    }

    pub async fn read_property(&self, name: impl Into<String>, index: i32) -> Result<Variant> {
        let name = name.into();
        self.request(|reply| BrokerCommand::ReadProperty { name, index, reply })
            .await?
    }

    pub async fn subscribe_events(&self) -> Result<mpsc::UnboundedReceiver<BrokerEvent>> {
        self.request(|reply| BrokerCommand::SubscribeEvents { reply })
            .await
    }

    pub async fn exposed_names(&self) -> Result<Vec<String>> {
        self.request(|reply| BrokerCommand::ExposedNames { reply }).await
    }

    pub async fn stats(&self) -> Result<BrokerStats> {
        self.request(|reply| BrokerCommand::Stats { reply }).await
    }

    /// Drop every Source, close every connection and stop the task.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| BrokerCommand::Shutdown { reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> BrokerCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .map_err(|_| Error::internal("Broker task has stopped"))?;
        reply_rx
            .await
            .map_err(|_| Error::internal("Broker dropped the request"))
    }
}
