//! Packet codec throughput benchmark.
//!
//! Measures encode, decode and split-read decode cost for Invoke packets
//! of growing argument size using Criterion.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use remoting_core::protocol::{CallKind, Packet, PacketCodec, Variant, NO_REPLY};

const MAX_FRAME: u32 = 5 * 1024 * 1024;

fn invoke_with_payload(size: usize) -> Packet {
    Packet::Invoke {
        name: "Switch".to_string(),
        call: CallKind::InvokeMethod,
        index: 0,
        args: vec![Variant::Bytes(vec![0xAB; size]), Variant::Bool(true)],
        reply_id: NO_REPLY,
    }
}

fn bench_encode(c: &mut Criterion) {
    let codec = PacketCodec::msgpack(MAX_FRAME);
    let payload_sizes: &[usize] = &[0, 64, 1024, 4096, 65536];

    let mut group = c.benchmark_group("encode");
    for &size in payload_sizes {
        let packet = invoke_with_payload(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &packet, |b, p| {
            b.iter(|| codec.encode(black_box(p)).unwrap());
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let codec = PacketCodec::msgpack(MAX_FRAME);
    let payload_sizes: &[usize] = &[0, 64, 1024, 4096, 65536];

    let mut group = c.benchmark_group("decode");
    for &size in payload_sizes {
        // Pre-build the wire frame
        let wire = codec.encode(&invoke_with_payload(size)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &wire, |b, w| {
            b.iter(|| {
                let mut buf = BytesMut::from(black_box(w.as_ref()));
                codec.decode(&mut buf).unwrap()
            });
        });
    }
    group.finish();
}

fn bench_split_reads(c: &mut Criterion) {
    let codec = PacketCodec::msgpack(MAX_FRAME);
    let wire = codec.encode(&invoke_with_payload(4096)).unwrap();

    let mut group = c.benchmark_group("split_reads");
    for &chunk in &[64usize, 1024, 16 * 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let mut buf = BytesMut::new();
                let mut decoded = None;
                for piece in wire.chunks(chunk) {
                    buf.extend_from_slice(piece);
                    if let Some(d) = codec.decode(&mut buf).unwrap() {
                        decoded = Some(d);
                    }
                }
                decoded
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_split_reads);
criterion_main!(benches);
