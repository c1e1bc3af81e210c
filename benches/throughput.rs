use command_guard::{
    BoxError, CircuitBreaker, CommandConfig, CommandExecutor, EventKind, HookRegistry,
    RollingWindow, Settings,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn bench_admission_closed(c: &mut Criterion) {
    let circuit = CircuitBreaker::new("bench", &Settings::default(), Arc::new(HookRegistry::new()));

    c.bench_function("admission_closed_success", |b| {
        b.iter(|| {
            if black_box(circuit.allow_request()) {
                circuit.report_event(EventKind::Success, Instant::now(), Duration::ZERO);
            }
        });
    });
}

fn bench_admission_open(c: &mut Criterion) {
    let circuit = CircuitBreaker::new("bench", &Settings::default(), Arc::new(HookRegistry::new()));
    circuit.force_open();

    c.bench_function("admission_open_rejection", |b| {
        b.iter(|| black_box(circuit.allow_request()));
    });
}

fn bench_window_record(c: &mut Criterion) {
    let window = RollingWindow::new(Duration::from_secs(10), 10);

    c.bench_function("window_record_and_snapshot", |b| {
        b.iter(|| {
            window.record(EventKind::Failure);
            black_box(window.snapshot())
        });
    });
}

fn bench_execute(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();
    let executor = CommandExecutor::builder()
        .configure("bench", CommandConfig::new().max_concurrent(1024))
        .build();

    c.bench_function("execute_sync_success", |b| {
        b.iter(|| {
            runtime.block_on(async {
                black_box(
                    executor
                        .execute_sync("bench", async { Ok::<(), BoxError>(()) }, None)
                        .await,
                )
            })
        });
    });
}

criterion_group!(
    benches,
    bench_admission_closed,
    bench_admission_open,
    bench_window_record,
    bench_execute
);
criterion_main!(benches);
