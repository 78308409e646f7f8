//! Benchmarks for the relay delivery path
//!
//! Run with: cargo bench

use dashbridge::broker::{topic_matches, BrokerClient, Delivery, MemoryBroker, MessageHandler};
use dashbridge::relay::{spawn_forwarder, ControlMessage, DeliverySink};
use dashbridge::transport::{ChannelTransport, TransportSession};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

fn bench_topic_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("topics");

    let cases = [
        ("exact", "home/kitchen/temp", "home/kitchen/temp"),
        ("single_level", "home/+/temp", "home/kitchen/temp"),
        ("multi_level", "home/#", "home/kitchen/sensors/temp"),
        ("miss", "home/+/humidity", "home/kitchen/temp"),
    ];

    for (name, filter, topic) in cases {
        group.bench_function(format!("match_{}", name), |b| {
            b.iter(|| topic_matches(black_box(filter), black_box(topic)))
        });
    }

    group.bench_function("parse_control", |b| {
        b.iter(|| ControlMessage::parse(black_box(b"unsubscribe:home/+/temp")).unwrap())
    });

    group.finish();
}

fn bench_enqueue(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("delivery");

    for capacity in [64, 1024] {
        group.throughput(Throughput::Elements(capacity as u64));

        // Fill an undrained channel, then keep offering to the full one.
        group.bench_function(format!("enqueue_until_full_{}", capacity), |b| {
            b.to_async(&rt).iter(|| async move {
                let (sink, _rx, stats) = DeliverySink::channel(
                    "bench",
                    capacity,
                    Duration::ZERO,
                    CancellationToken::new(),
                );
                for i in 0..capacity * 2 {
                    sink.on_message(Delivery::new("home/temp", i.to_string())).await;
                }
                black_box(stats.dropped())
            })
        });
    }

    group.finish();
}

fn bench_publish_to_client(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("relay");

    const BATCH: usize = 1000;
    group.throughput(Throughput::Elements(BATCH as u64));

    group.bench_function("publish_forward_receive", |b| {
        b.to_async(&rt).iter(|| async {
            let broker = MemoryBroker::new();
            let client = broker.client();
            client.connect().await.unwrap();

            let cancel = CancellationToken::new();
            let (sink, rx, stats) =
                DeliverySink::channel("bench", BATCH, Duration::ZERO, cancel.clone());
            client.subscribe("home/+/temp", Arc::new(sink)).await.unwrap();

            let (transport, mut end) = ChannelTransport::with_capacity(BATCH);
            let (_source, transport_sink) = transport.split();
            let forwarder =
                spawn_forwarder("bench".into(), rx, transport_sink, cancel.clone(), stats);

            for i in 0..BATCH {
                broker.publish("home/kitchen/temp", i.to_string()).await;
            }
            for _ in 0..BATCH {
                black_box(end.recv().await);
            }

            cancel.cancel();
            forwarder.await.unwrap();
        })
    });

    group.finish();
}

criterion_group!(benches, bench_topic_matching, bench_enqueue, bench_publish_to_client);
criterion_main!(benches);
