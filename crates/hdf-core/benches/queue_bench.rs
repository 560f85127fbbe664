//! Criterion benchmarks for the message primitives and the frame codec.
//!
//! Run with:
//! ```bash
//! cargo bench --package hdf-core --bench queue_bench
//! ```

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hdf_core::protocol::{decode_frame, encode_frame, Frame, IpcRequest};
use hdf_core::{DeviceDescriptor, DeviceId, DevicePolicy, MessageQueue};

// ── Queue ─────────────────────────────────────────────────────────────────────

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");

    for depth in [16usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::new("enqueue_drain", depth), &depth, |b, &depth| {
            b.iter(|| {
                let queue = MessageQueue::new();
                for i in 0..depth {
                    queue.enqueue(black_box(i), Duration::ZERO);
                }
                while let Some(item) = queue.try_next() {
                    black_box(item);
                }
            })
        });
    }

    // Alternating delays force insertions into the middle of the queue.
    group.bench_function("enqueue_mixed_delays_256", |b| {
        b.iter(|| {
            let queue = MessageQueue::new();
            for i in 0..256u64 {
                let delay = Duration::from_millis(if i % 2 == 0 { 50 } else { 10 });
                queue.enqueue(black_box(i), delay);
            }
            black_box(queue.len())
        })
    });

    group.finish();
}

// ── Codec ─────────────────────────────────────────────────────────────────────

fn bench_add_device_frame(c: &mut Criterion) {
    let descriptor = DeviceDescriptor::new(DeviceId::new(7, 1, 0), "sensor_accel_drv", "sensor_accel_service")
        .with_policy(DevicePolicy::Capacity)
        .with_match_attribute("accel_bmi160_config");
    let payload = IpcRequest::AddDevice(descriptor).encode_payload().unwrap();
    let frame = Frame::request(0x0101, 1, payload);

    c.bench_function("add_device_frame_roundtrip", |b| {
        b.iter(|| {
            let bytes = encode_frame(black_box(&frame)).unwrap();
            let (decoded, _) = decode_frame(black_box(&bytes)).unwrap();
            IpcRequest::decode(decoded.code, &decoded.payload).unwrap()
        })
    });
}

criterion_group!(benches, bench_queue, bench_add_device_frame);
criterion_main!(benches);
