//! Broker scenarios — packets in, packets out, no sockets.
//!
//! Each peer is an in-memory `PeerLink` that records the frames the broker
//! writes to it.

use bytes::{Bytes, BytesMut};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use remoting_core::broker::{BrokerEvent, Diagnostic, DiagnosticSink, PeerLink, SourceIoBroker};
use remoting_core::object::{ApiMap, ObjectHandle, PropertyWrite, RemoteObject};
use remoting_core::protocol::{
    CallKind, Decoded, Packet, PacketCodec, SourceLocation, TypeDesc, Variant, NO_REPLY,
};
use remoting_core::types::ConnectionId;
use remoting_core::Result;
use std::collections::BTreeSet;
use std::io;
use std::sync::{Arc, Mutex};

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Debug, Default, Clone)]
struct Peer {
    frames: Arc<Mutex<Vec<Bytes>>>,
    closed: Arc<Mutex<bool>>,
}

impl PeerLink for Peer {
    fn write(&mut self, frame: Bytes) -> io::Result<()> {
        if *self.closed.lock().unwrap() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
        }
        self.frames.lock().unwrap().push(frame);
        Ok(())
    }

    fn close(&mut self) {
        *self.closed.lock().unwrap() = true;
    }
}

impl Peer {
    /// Decode and forget everything written so far.
    fn take_packets(&self) -> Vec<Packet> {
        let codec = codec();
        let mut buf = BytesMut::new();
        for frame in self.frames.lock().unwrap().drain(..) {
            buf.extend_from_slice(&frame);
        }
        let mut packets = Vec::new();
        while let Some(decoded) = codec.decode(&mut buf).unwrap() {
            match decoded {
                Decoded::Packet(packet) => packets.push(packet),
                other => panic!("broker wrote an undecodable frame: {:?}", other),
            }
        }
        packets
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

#[derive(Debug, Default)]
struct Recorder(Mutex<Vec<Diagnostic>>);

impl DiagnosticSink for Recorder {
    fn record(&self, diagnostic: &Diagnostic) {
        self.0.lock().unwrap().push(diagnostic.clone());
    }
}

impl Recorder {
    fn codes(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().iter().map(|d| d.code()).collect()
    }

    fn error_codes(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().iter().filter_map(|d| d.error_code()).collect()
    }
}

/// `currState: bool` property and `server_slot(bool) -> bool` method
/// returning the previous state.
#[derive(Debug, Default)]
struct Switch {
    state: Mutex<bool>,
}

impl RemoteObject for Switch {
    fn call(&self, method: usize, args: &[Variant]) -> Result<Variant> {
        match method {
            0 => {
                let previous = *self.state.lock().unwrap();
                if let Some(next) = args.first().and_then(Variant::as_bool) {
                    *self.state.lock().unwrap() = next;
                }
                Ok(Variant::Bool(previous))
            }
            1 => Ok(Variant::from("not a bool")),
            2 => Err(remoting_core::Error::invocation("switch jammed")),
            _ => Err(remoting_core::Error::invalid_index(method.to_string())),
        }
    }

    fn read_property(&self, _property: usize) -> Result<Variant> {
        Ok(Variant::Bool(*self.state.lock().unwrap()))
    }

    fn write_property(&self, _property: usize, value: Variant) -> Result<PropertyWrite> {
        let next = value
            .as_bool()
            .ok_or_else(|| remoting_core::Error::invocation("bool expected"))?;
        let mut state = self.state.lock().unwrap();
        if *state == next {
            return Ok(PropertyWrite::Unchanged);
        }
        *state = next;
        Ok(PropertyWrite::Changed(Variant::Bool(next)))
    }
}

fn codec() -> PacketCodec {
    PacketCodec::msgpack(1024 * 1024)
}

fn switch_api(name: &str) -> ApiMap {
    ApiMap::builder(name)
        .property("currState", TypeDesc::Bool, 0)
        .method("server_slot", &[TypeDesc::Bool], TypeDesc::Bool, 0)
        .method("broken_slot", &[], TypeDesc::Bool, 1)
        .method("jammed_slot", &[], TypeDesc::Bool, 2)
        .method("void_slot", &[], TypeDesc::Void, 0)
        .build()
        .unwrap()
}

fn broker() -> (SourceIoBroker, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let broker = SourceIoBroker::new("tcp://127.0.0.1:65213", codec()).with_diagnostics(recorder.clone());
    (broker, recorder)
}

fn connect(broker: &mut SourceIoBroker, id: u64) -> Peer {
    let peer = Peer::default();
    broker.on_connection_accepted(ConnectionId::new(id), Box::new(peer.clone()));
    peer
}

fn send(broker: &mut SourceIoBroker, id: u64, packet: Packet) {
    let frame = codec().encode(&packet).unwrap();
    broker.on_connection_readable(ConnectionId::new(id), &frame);
}

fn add_object(name: &str) -> Packet {
    Packet::AddObject {
        name: name.to_string(),
        dynamic: false,
    }
}

fn invoke(name: &str, call: CallKind, index: i32, args: Vec<Variant>, reply_id: i32) -> Packet {
    Packet::Invoke {
        name: name.to_string(),
        call,
        index,
        args,
        reply_id,
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_host_change_reaches_attached_peer() {
    let (mut broker, _) = broker();
    let switch: ObjectHandle = Arc::new(Switch::default());
    assert!(broker.enable_remoting(switch, switch_api("Switch"), None));

    let peer = connect(&mut broker, 1);
    send(&mut broker, 1, add_object("Switch"));
    assert_eq!(
        peer.take_packets(),
        vec![Packet::ObjectList {
            names: vec!["Switch".to_string()]
        }]
    );

    let delivered = broker
        .notify_property_changed("Switch", 0, Variant::Bool(true))
        .unwrap();
    assert_eq!(delivered, 1);
    assert_eq!(
        peer.take_packets(),
        vec![invoke(
            "Switch",
            CallKind::WriteProperty,
            0,
            vec![Variant::Bool(true)],
            NO_REPLY
        )]
    );
}

#[test]
fn test_remote_write_updates_object_without_reply() {
    let (mut broker, _) = broker();
    let switch = Arc::new(Switch::default());
    let handle: ObjectHandle = switch.clone();
    assert!(broker.enable_remoting(handle, switch_api("Switch"), None));

    let writer = connect(&mut broker, 1);
    let observer = connect(&mut broker, 2);
    send(&mut broker, 2, add_object("Switch"));
    writer.take_packets();
    observer.take_packets();

    send(
        &mut broker,
        1,
        invoke("Switch", CallKind::WriteProperty, 0, vec![Variant::Bool(true)], NO_REPLY),
    );
    assert!(*switch.state.lock().unwrap());
    assert!(writer.take_packets().is_empty());
    // The change is published to listeners, not to the writer
    assert_eq!(
        observer.take_packets(),
        vec![Packet::property_notification("Switch", 0, Variant::Bool(true))]
    );

    // Writing the same value again changes nothing and publishes nothing
    send(
        &mut broker,
        1,
        invoke("Switch", CallKind::WriteProperty, 0, vec![Variant::Bool(true)], 5),
    );
    assert!(writer.take_packets().is_empty());
    assert!(observer.take_packets().is_empty());
}

#[test]
fn test_new_object_broadcast_once_per_connection() {
    let (mut broker, _) = broker();
    let first = connect(&mut broker, 1);
    let second = connect(&mut broker, 2);
    let empty = vec![Packet::ObjectList { names: vec![] }];
    assert_eq!(first.take_packets(), empty);
    assert_eq!(second.take_packets(), empty);

    assert!(broker.enable_remoting(Arc::new(Switch::default()), switch_api("Light"), None));
    let delta = vec![Packet::ObjectList {
        names: vec!["Light".to_string()],
    }];
    assert_eq!(first.take_packets(), delta);
    assert_eq!(second.take_packets(), delta);
    assert_eq!(broker.stats().broadcasts_written, 2);
}

#[test]
fn test_late_peer_gets_full_list_first() {
    let (mut broker, _) = broker();
    assert!(broker.enable_remoting(Arc::new(Switch::default()), switch_api("Switch"), None));
    assert!(broker.enable_remoting(Arc::new(Switch::default()), switch_api("Light"), None));

    let peer = connect(&mut broker, 7);
    send(&mut broker, 7, add_object("Light"));
    send(
        &mut broker,
        7,
        invoke("Light", CallKind::InvokeMethod, 0, vec![Variant::Bool(true)], 1),
    );
    let packets = peer.take_packets();
    assert_eq!(
        packets[0],
        Packet::ObjectList {
            names: vec!["Light".to_string(), "Switch".to_string()]
        }
    );
    assert_eq!(packets.len(), 2);
}

#[test]
fn test_reply_only_when_reply_id_non_negative() {
    let (mut broker, _) = broker();
    assert!(broker.enable_remoting(Arc::new(Switch::default()), switch_api("Switch"), None));
    let peer = connect(&mut broker, 1);
    peer.take_packets();

    send(
        &mut broker,
        1,
        invoke("Switch", CallKind::InvokeMethod, 0, vec![Variant::Bool(true)], NO_REPLY),
    );
    assert!(peer.take_packets().is_empty());

    send(
        &mut broker,
        1,
        invoke("Switch", CallKind::InvokeMethod, 0, vec![Variant::Bool(false)], 42),
    );
    assert_eq!(
        peer.take_packets(),
        vec![Packet::InvokeReply {
            name: "Switch".to_string(),
            reply_id: 42,
            value: Variant::Bool(true),
        }]
    );
    assert_eq!(broker.stats().replies_sent, 1);
}

#[test]
fn test_void_mismatched_and_failed_calls_reply_invalid() {
    let (mut broker, recorder) = broker();
    assert!(broker.enable_remoting(Arc::new(Switch::default()), switch_api("Switch"), None));
    let peer = connect(&mut broker, 1);
    peer.take_packets();

    for (index, reply_id) in [(3, 10), (1, 11), (2, 12)] {
        send(&mut broker, 1, invoke("Switch", CallKind::InvokeMethod, index, vec![], reply_id));
    }
    let replies: Vec<(i32, Variant)> = peer
        .take_packets()
        .into_iter()
        .map(|p| match p {
            Packet::InvokeReply {
                reply_id, value, ..
            } => (reply_id, value),
            other => panic!("unexpected packet {:?}", other),
        })
        .collect();
    assert_eq!(
        replies,
        vec![
            (10, Variant::Invalid),
            (11, Variant::Invalid),
            (12, Variant::Invalid),
        ]
    );
    assert_eq!(recorder.codes(), vec!["return_type_mismatch", "invocation_failed"]);
    assert_eq!(recorder.error_codes(), vec!["ABORTED"]);
}

#[test]
fn test_invalid_index_keeps_connection_usable() {
    let (mut broker, recorder) = broker();
    assert!(broker.enable_remoting(Arc::new(Switch::default()), switch_api("Switch"), None));
    let peer = connect(&mut broker, 1);
    peer.take_packets();

    send(&mut broker, 1, invoke("Switch", CallKind::InvokeMethod, 99, vec![], 3));
    send(&mut broker, 1, invoke("Switch", CallKind::WriteProperty, -4, vec![Variant::Bool(true)], NO_REPLY));
    assert!(peer.take_packets().is_empty());
    assert_eq!(recorder.codes(), vec!["invalid_index", "invalid_index"]);

    send(&mut broker, 1, invoke("Switch", CallKind::InvokeMethod, 0, vec![], 4));
    assert_eq!(peer.take_packets().len(), 1);
    assert_eq!(broker.connection_count(), 1);
}

#[test]
fn test_unknown_names_and_packet_types_are_survivable() {
    let (mut broker, recorder) = broker();
    let peer = connect(&mut broker, 1);
    peer.take_packets();

    send(&mut broker, 1, add_object("Ghost"));
    send(&mut broker, 1, Packet::RemoveObject { name: "Ghost".to_string() });
    send(&mut broker, 1, invoke("Ghost", CallKind::InvokeMethod, 0, vec![], 1));
    send(&mut broker, 1, Packet::ObjectList { names: vec![] });

    // Well-framed but unknown type code 77
    broker.on_connection_readable(ConnectionId::new(1), &[0, 0, 0, 2, 0, 77]);

    assert!(peer.take_packets().is_empty());
    assert_eq!(
        recorder.codes(),
        vec![
            "non_existent_object",
            "non_existent_object",
            "invalid_packet_type",
            "invalid_packet_type",
        ]
    );
    assert_eq!(broker.connection_count(), 1);
}

#[test]
fn test_add_then_remove_restores_listener_count() {
    let (mut broker, recorder) = broker();
    assert!(broker.enable_remoting(Arc::new(Switch::default()), switch_api("Switch"), None));
    connect(&mut broker, 1);
    connect(&mut broker, 2);
    send(&mut broker, 2, add_object("Switch"));
    assert_eq!(broker.listener_count("Switch"), Some(1));

    send(&mut broker, 1, add_object("Switch"));
    send(&mut broker, 1, add_object("Switch"));
    assert_eq!(broker.listener_count("Switch"), Some(2));
    send(&mut broker, 1, Packet::RemoveObject { name: "Switch".to_string() });
    assert_eq!(broker.listener_count("Switch"), Some(1));

    send(&mut broker, 1, Packet::RemoveObject { name: "Switch".to_string() });
    assert_eq!(broker.listener_count("Switch"), Some(1));
    assert_eq!(recorder.codes(), vec!["listener_not_present"]);
}

#[test]
fn test_disconnect_detaches_everywhere() {
    let (mut broker, _) = broker();
    assert!(broker.enable_remoting(Arc::new(Switch::default()), switch_api("Switch"), None));
    assert!(broker.enable_remoting(Arc::new(Switch::default()), switch_api("Light"), None));
    let gone = connect(&mut broker, 1);
    let stays = connect(&mut broker, 2);
    for name in ["Switch", "Light"] {
        send(&mut broker, 1, add_object(name));
    }
    send(&mut broker, 2, add_object("Light"));
    gone.take_packets();
    stays.take_packets();

    broker.on_connection_disconnected(ConnectionId::new(1));
    assert!(gone.is_closed());
    assert_eq!(broker.listener_count("Switch"), Some(0));
    assert_eq!(broker.listener_count("Light"), Some(1));
    assert_eq!(broker.connection_ids(), vec![ConnectionId::new(2)]);

    assert!(broker.enable_remoting(Arc::new(Switch::default()), switch_api("Fan"), None));
    assert!(gone.take_packets().is_empty());
    assert_eq!(stays.take_packets().len(), 1);
    assert_eq!(broker.stats().write_failures, 0);
}

#[test]
fn test_registry_location_reported_and_removed() {
    let (mut broker, _) = broker();
    let mut events = broker.subscribe_events();
    let registry: ObjectHandle = Arc::new(Switch::default());
    let api = ApiMap::builder("Registry")
        .method("addSource", &[TypeDesc::Any], TypeDesc::Void, 0)
        .build()
        .unwrap();
    assert!(broker.enable_remoting(registry, api, None));
    connect(&mut broker, 1);

    let location = SourceLocation {
        name: "Switch".to_string(),
        address: "tcp://10.0.0.5:65213".to_string(),
    };
    send(
        &mut broker,
        1,
        invoke("Registry", CallKind::InvokeMethod, 0, vec![location.to_variant()], NO_REPLY),
    );
    assert_eq!(
        broker.connection(ConnectionId::new(1)).unwrap().registry_location(),
        Some("tcp://10.0.0.5:65213")
    );

    broker.on_connection_disconnected(ConnectionId::new(1));
    let received: Vec<BrokerEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert_eq!(
        received,
        vec![
            BrokerEvent::RemoteObjectAdded {
                name: "Registry".to_string(),
                address: "tcp://127.0.0.1:65213".to_string(),
            },
            BrokerEvent::ServerRemoved {
                address: "tcp://10.0.0.5:65213".to_string(),
            },
        ]
    );
}

#[test]
fn test_malformed_registry_location_is_retried() {
    let (mut broker, recorder) = broker();
    let mut events = broker.subscribe_events();
    let api = ApiMap::builder("Registry")
        .method("addSource", &[TypeDesc::Any], TypeDesc::Void, 0)
        .build()
        .unwrap();
    assert!(broker.enable_remoting(Arc::new(Switch::default()), api, None));
    connect(&mut broker, 1);

    send(&mut broker, 1, invoke("Registry", CallKind::InvokeMethod, 0, vec![], NO_REPLY));
    assert_eq!(recorder.codes(), vec!["bad_registry_location"]);
    assert_eq!(broker.connection(ConnectionId::new(1)).unwrap().registry_location(), None);

    let location = SourceLocation {
        name: "Switch".to_string(),
        address: "tcp://x:1".to_string(),
    };
    send(
        &mut broker,
        1,
        invoke("Registry", CallKind::InvokeMethod, 0, vec![location.to_variant()], NO_REPLY),
    );
    broker.on_connection_disconnected(ConnectionId::new(1));
    let received: Vec<BrokerEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert_eq!(
        received.last(),
        Some(&BrokerEvent::ServerRemoved {
            address: "tcp://x:1".to_string(),
        })
    );
}

#[test]
fn test_adapter_members_dispatch_to_adapter() {
    let (mut broker, recorder) = broker();
    let primary = Arc::new(Switch::default());
    let adapter = Arc::new(Switch {
        state: Mutex::new(true),
    });
    let api = ApiMap::builder("Switch")
        .property("currState", TypeDesc::Bool, 0)
        .adapter_property("adapterState", TypeDesc::Bool, 0)
        .method("server_slot", &[TypeDesc::Bool], TypeDesc::Bool, 0)
        .adapter_method("adapter_slot", &[TypeDesc::Bool], TypeDesc::Bool, 0)
        .build()
        .unwrap();
    let primary_handle: ObjectHandle = primary.clone();
    let adapter_handle: ObjectHandle = adapter.clone();
    assert!(broker.enable_remoting(primary_handle, api, Some(adapter_handle)));
    let peer = connect(&mut broker, 1);
    peer.take_packets();

    send(
        &mut broker,
        1,
        invoke("Switch", CallKind::InvokeMethod, 1, vec![Variant::Bool(false)], 7),
    );
    send(&mut broker, 1, invoke("Switch", CallKind::InvokeMethod, 0, vec![], 8));
    assert_eq!(
        peer.take_packets(),
        vec![
            Packet::InvokeReply {
                name: "Switch".to_string(),
                reply_id: 7,
                value: Variant::Bool(true),
            },
            Packet::InvokeReply {
                name: "Switch".to_string(),
                reply_id: 8,
                value: Variant::Bool(false),
            },
        ]
    );
    assert!(!*adapter.state.lock().unwrap());

    send(
        &mut broker,
        1,
        invoke("Switch", CallKind::WriteProperty, 1, vec![Variant::Bool(true)], NO_REPLY),
    );
    assert!(*adapter.state.lock().unwrap());
    assert!(!*primary.state.lock().unwrap());
    assert!(recorder.codes().is_empty());
}

#[test]
fn test_packets_split_across_reads() {
    let (mut broker, _) = broker();
    assert!(broker.enable_remoting(Arc::new(Switch::default()), switch_api("Switch"), None));
    let peer = connect(&mut broker, 1);
    peer.take_packets();

    let mut wire = codec().encode(&add_object("Switch")).unwrap().to_vec();
    wire.extend_from_slice(
        &codec()
            .encode(&invoke("Switch", CallKind::InvokeMethod, 0, vec![Variant::Bool(true)], 9))
            .unwrap(),
    );
    for byte in &wire {
        broker.on_connection_readable(ConnectionId::new(1), std::slice::from_ref(byte));
    }
    assert_eq!(broker.listener_count("Switch"), Some(1));
    assert_eq!(peer.take_packets().len(), 1);
    assert_eq!(broker.connection(ConnectionId::new(1)).unwrap().bytes_available(), 0);
}

#[test]
fn test_enable_by_name_requires_description() {
    let (mut broker, recorder) = broker();
    assert!(!broker.enable_remoting_with_name(Arc::new(Switch::default()), "Switch"));
    assert_eq!(recorder.codes(), vec!["registration_rejected"]);
    assert_eq!(recorder.error_codes(), vec!["INVALID_ARGUMENT"]);
    assert!(broker.exposed_names().is_empty());
}

// =============================================================================
// Properties
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Enable(usize),
    Disable(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![(0usize..4).prop_map(Op::Enable), (0usize..4).prop_map(Op::Disable)]
}

proptest! {
    #[test]
    fn registry_tracks_enabled_names(ops in proptest::collection::vec(op(), 0..40)) {
        let mut broker = SourceIoBroker::new("tcp://test", codec());
        let objects: Vec<ObjectHandle> = (0..4).map(|_| Arc::new(Switch::default()) as ObjectHandle).collect();
        let mut expected = BTreeSet::new();

        for op in ops {
            match op {
                Op::Enable(i) => {
                    let name = format!("Object{}", i);
                    let added = broker.enable_remoting(objects[i].clone(), switch_api(&name), None);
                    prop_assert_eq!(added, expected.insert(name));
                }
                Op::Disable(i) => {
                    let removed = broker.disable_remoting(&objects[i]);
                    prop_assert_eq!(removed, expected.remove(&format!("Object{}", i)));
                }
            }
            prop_assert_eq!(
                broker.exposed_names(),
                expected.iter().cloned().collect::<Vec<_>>()
            );
        }
    }
}
