//! # Envelope Codec Benchmarks
//!
//! | Operation | Target |
//! |-----------|--------|
//! | Materialize + encode | < 10µs |
//! | Decode valid payload | < 10µs |
//! | Reject malformed payload | < 1µs |

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use event_bus::domain::{codec, decode, EnvelopeMetadata, EventDraft};
use serde_json::{json, Value};

fn payload(fields: usize) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("postId".into(), json!("p1"));
    map.insert("userId".into(), json!("u1"));
    for i in 0..fields {
        map.insert(format!("field{}", i), json!(format!("value-{}", i)));
    }
    Value::Object(map)
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec-encode");
    group.measurement_time(Duration::from_secs(5));

    for fields in [0, 10, 100] {
        let body = payload(fields);
        group.bench_with_input(BenchmarkId::new("materialize_encode", fields), &body, |b, body| {
            b.iter(|| {
                let envelope = EventDraft::new("post.liked", body.clone()).materialize("bench-svc");
                let encoded = codec::encode_parts(envelope, EnvelopeMetadata::generate());
                black_box(encoded.is_ok())
            })
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec-decode");
    group.measurement_time(Duration::from_secs(5));

    for fields in [0, 10, 100] {
        let envelope = EventDraft::new("post.liked", payload(fields)).materialize("bench-svc");
        let bytes = match codec::encode_parts(envelope, EnvelopeMetadata::generate()) {
            Ok((_, encoded)) => encoded.data,
            Err(e) => panic!("encode failed: {}", e),
        };

        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("valid", fields), &bytes, |b, bytes| {
            b.iter(|| black_box(decode(bytes).is_valid()))
        });
    }

    let garbage = b"\x00\x01 not a wire message".to_vec();
    group.bench_function("not_structured", |b| {
        b.iter(|| black_box(decode(&garbage).is_valid()))
    });

    let missing_type = json!({"data": {"payload": {}}}).to_string().into_bytes();
    group.bench_function("missing_event_type", |b| {
        b.iter(|| black_box(decode(&missing_type).is_valid()))
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
