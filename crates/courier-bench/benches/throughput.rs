//! Throughput benchmarks for Courier.
//!
//! These benchmarks measure the raw publish and registry throughput.

use courier_bench::{connect_same_user, connect_users, runtime};
use courier_core::{Channel, Notifier, Registry};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// Benchmark registry operations.
fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    group.bench_function("get_or_create_new", |b| {
        let registry = Registry::new();
        let mut i = 0u64;
        b.iter(|| {
            let user = format!("user-{}", i);
            i += 1;
            registry.get_or_create(black_box(&user))
        });
    });

    group.bench_function("get_or_create_existing", |b| {
        let registry = Registry::new();
        registry.get_or_create("user-1");
        b.iter(|| registry.get_or_create(black_box("user-1")));
    });

    group.bench_function("connect_disconnect", |b| {
        let rt = runtime();
        let _guard = rt.enter();
        let notifier = Notifier::new();
        b.iter(|| drop(notifier.connect(black_box("user-1"))));
    });

    group.finish();
}

/// Benchmark channel operations.
fn bench_channel(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel");

    group.bench_function("publish_no_subscriber", |b| {
        let channel = Channel::new("user-1");
        b.iter(|| channel.publish(black_box("time=2024-05-01T12:00:00.000+02:00")));
    });

    group.bench_function("publish_1_sub", |b| {
        let channel = Channel::new("user-1");
        let _stream = channel.subscribe();
        b.iter(|| channel.publish(black_box("time=2024-05-01T12:00:00.000+02:00")));
    });

    group.bench_function("emit_to_user_100_sub", |b| {
        let rt = runtime();
        let _guard = rt.enter();
        let notifier = Notifier::new();
        let _subs = connect_same_user(&notifier, "user-1", 100);
        b.iter(|| notifier.emit_to_user(black_box("user-1"), black_box("hello")));
    });

    group.finish();
}

/// Benchmark broadcast fan-out across users.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");

    for size in [10, 100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let rt = runtime();
            let _guard = rt.enter();
            let notifier = Notifier::new();
            let _subs = connect_users(&notifier, size);

            b.iter(|| notifier.emit_to_all(black_box("time=2024-05-01T12:00:00.000+02:00")));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_registry, bench_channel, bench_fanout);
criterion_main!(benches);
