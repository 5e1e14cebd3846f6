use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use span_collector::{
    AdaptiveQueue, ExporterChain, NullExporter, QueueConfig, Span, SpanBatch, SpanKind, WorkerPool,
};
use std::sync::Arc;
use std::time::Duration;

const BATCHES: u64 = 10_000;
const SPANS_PER_BATCH: u64 = 8;

fn make_batch(seq: u64) -> SpanBatch {
    SpanBatch::with_spans(
        (0..SPANS_PER_BATCH)
            .map(|i| Span::new(u128::from(seq), i, 0, "GET /api/orders", SpanKind::Server))
            .collect(),
    )
}

fn bench_enqueue_dequeue(c: &mut Criterion) {
    let mut group = c.benchmark_group("enqueue_dequeue");
    group.throughput(Throughput::Elements(BATCHES));

    let modes = [
        ("fixed", QueueConfig::fixed(BATCHES as usize)),
        ("memory_budget", QueueConfig::memory_budget(64 * 1024 * 1024)),
    ];
    for (name, config) in modes {
        let batches: Vec<SpanBatch> = (0..BATCHES).map(make_batch).collect();
        group.bench_with_input(BenchmarkId::from_parameter(name), &config, |b, config| {
            b.iter(|| {
                let queue = AdaptiveQueue::new(*config);
                for batch in &batches {
                    queue.enqueue(batch.clone()).unwrap();
                }
                while let Some(item) = queue.try_dequeue() {
                    black_box(item);
                }
            });
        });
    }

    group.finish();
}

fn bench_worker_pool(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    let mut group = c.benchmark_group("worker_pool");
    group.throughput(Throughput::Elements(BATCHES));

    for workers in [1usize, 4, 16] {
        group.bench_with_input(BenchmarkId::new("drain", workers), &workers, |b, &workers| {
            b.to_async(&rt).iter(|| async move {
                let queue = Arc::new(AdaptiveQueue::new(QueueConfig::fixed(BATCHES as usize)));
                for seq in 0..BATCHES {
                    queue.enqueue(make_batch(seq)).unwrap();
                }
                let chain = Arc::new(ExporterChain::new(vec![Arc::new(NullExporter)]));
                let pool = WorkerPool::start(queue, chain, workers);
                black_box(pool.shutdown(Duration::from_secs(60)).await);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_enqueue_dequeue, bench_worker_pool);
criterion_main!(benches);
