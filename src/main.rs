//! Remoting broker - main entry point.
//!
//! Starts the broker actor and the TCP server, then exposes a demo `Switch`
//! object whose `currState` property flips on a timer:
//! - Peers attach with AddObject("Switch") and receive every change
//! - `server_slot(bool)` logs what a peer reports
//! - Writing `currState` remotely is published to every listener

use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use remoting_core::broker::SourceIoBroker;
use remoting_core::ipc::{spawn_broker, RemotingServer};
use remoting_core::object::{
    MethodDescriptor, ObjectDescription, ObjectHandle, PropertyDescriptor, PropertyWrite,
    RemoteObject,
};
use remoting_core::protocol::{PacketCodec, TypeDesc, Variant};
use remoting_core::{Config, Error, Result};

#[derive(Debug, Parser)]
#[command(name = "remoting-broker", about = "Expose local objects to remote peers")]
struct Args {
    /// JSON configuration file.
    #[arg(long, env = "REMOTING_CONFIG")]
    config: Option<PathBuf>,

    /// Override `server.listen_addr`.
    #[arg(long)]
    listen: Option<String>,

    /// Seconds between demo switch toggles; 0 disables the timer.
    #[arg(long, default_value_t = 2)]
    toggle_secs: u64,
}

/// Demo object: one bool property, one slot.
#[derive(Debug, Default)]
struct Switch {
    state: Mutex<bool>,
}

impl Switch {
    fn toggle(&self) -> Result<bool> {
        let mut state = self.state.lock().map_err(|_| Error::internal("switch lock poisoned"))?;
        *state = !*state;
        Ok(*state)
    }
}

impl RemoteObject for Switch {
    fn call(&self, method: usize, args: &[Variant]) -> Result<Variant> {
        match method {
            0 => {
                let reported = args.first().and_then(Variant::as_bool);
                tracing::info!("Replica reports state {:?}", reported);
                Ok(Variant::Invalid)
            }
            _ => Err(Error::invalid_index(format!("Switch has no method {}", method))),
        }
    }

    fn read_property(&self, property: usize) -> Result<Variant> {
        match property {
            0 => {
                let state = self.state.lock().map_err(|_| Error::internal("switch lock poisoned"))?;
                Ok(Variant::Bool(*state))
            }
            _ => Err(Error::invalid_index(format!("Switch has no property {}", property))),
        }
    }

    fn write_property(&self, property: usize, value: Variant) -> Result<PropertyWrite> {
        if property != 0 {
            return Err(Error::invalid_index(format!("Switch has no property {}", property)));
        }
        let next = value
            .as_bool()
            .ok_or_else(|| Error::invocation("currState expects a bool"))?;
        let mut state = self.state.lock().map_err(|_| Error::internal("switch lock poisoned"))?;
        if *state == next {
            return Ok(PropertyWrite::Unchanged);
        }
        *state = next;
        Ok(PropertyWrite::Changed(Variant::Bool(next)))
    }

    fn describe(&self) -> Option<ObjectDescription> {
        Some(ObjectDescription {
            methods: vec![MethodDescriptor {
                name: "server_slot".to_string(),
                params: vec![TypeDesc::Bool],
                returns: TypeDesc::Void,
            }],
            properties: vec![PropertyDescriptor {
                name: "currState".to_string(),
                ty: TypeDesc::Bool,
            }],
        })
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };
    config.apply_env();
    if let Some(listen) = &args.listen {
        config.server.listen_addr = listen.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config = load_config(&args)?;

    // Initialize observability
    remoting_core::observability::init_tracing_from_config(&config.observability);

    let cancel = CancellationToken::new();
    let broker = SourceIoBroker::new(
        config.server.advertised_address(),
        PacketCodec::msgpack(config.transport.max_frame_bytes),
    );
    let (handle, broker_task) = spawn_broker(broker, cancel.clone());

    let mut events = handle.subscribe_events().await?;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => tracing::info!(event = %json, "broker event"),
                Err(e) => tracing::warn!("Unserializable broker event: {}", e),
            }
        }
    });

    let switch = Arc::new(Switch::default());
    let object: ObjectHandle = switch.clone();
    if !handle.enable_remoting_with_name(object, "Switch").await? {
        return Err("Switch could not be exposed".into());
    }

    if args.toggle_secs > 0 {
        let handle = handle.clone();
        let cancel = cancel.clone();
        let period = Duration::from_secs(args.toggle_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let result = match switch.toggle() {
                            Ok(state) => handle.notify_property_changed("Switch", 0, Variant::Bool(state)).await,
                            Err(e) => Err(e),
                        };
                        if let Err(e) = result {
                            tracing::warn!(code = e.diagnostic_code(), "Switch toggle failed: {}", e);
                        }
                    }
                }
            }
        });
    }

    let server = Arc::new(
        RemotingServer::new(handle.clone(), config.server.listen_addr.clone(), config.transport.clone())
            .with_cancel(cancel.clone()),
    );
    tracing::info!("Remoting broker starting on {}", handle.server_address());
    let server_task = {
        let server = server.clone();
        tokio::spawn(async move { server.serve().await })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted, shutting down"),
        served = server_task => match served {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Server stopped: {}", e),
            Err(e) => tracing::error!("Server task failed: {}", e),
        },
    }

    if let Err(e) = handle.shutdown().await {
        tracing::debug!("Broker already stopped: {}", e);
    }
    cancel.cancel();
    broker_task.await?;
    Ok(())
}
