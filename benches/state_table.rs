//! 去抖状态表基准测试
//!
//! 测试大规模集群下每个tick的对账和状态更新开销

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use peer_vitals::health::{CheckResult, StateTable, TargetName};
use std::hint::black_box;
use std::time::Duration;
use tokio::time::Instant;

const GRACE: Duration = Duration::from_secs(30);

fn fleet(size: usize) -> Vec<TargetName> {
    (0..size).map(|i| TargetName::new(format!("tm-{i:04}"))).collect()
}

/// 每个tick: 对账后对所有目标更新状态，约十分之一的目标不健康
fn tick_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("state_table_tick");

    for size in [16usize, 256, 4096] {
        let names = fleet(size);
        let now = Instant::now();
        let healthy = CheckResult::healthy(now);
        let unhealthy = CheckResult::unhealthy(now, "对等轮询已过期");

        group.bench_with_input(BenchmarkId::from_parameter(size), &names, |b, names| {
            let mut table = StateTable::new();
            b.iter(|| {
                black_box(table.reconcile(names));
                for (i, name) in names.iter().enumerate() {
                    let result = if i % 10 == 0 { &unhealthy } else { &healthy };
                    black_box(table.evaluate(name, result, GRACE));
                }
            });
        });
    }

    group.finish();
}

/// 目标集合每个tick都在变化时的对账开销
fn churn_benchmark(c: &mut Criterion) {
    let full = fleet(1024);
    let half: Vec<TargetName> = full.iter().step_by(2).cloned().collect();

    c.bench_function("state_table_reconcile_churn", |b| {
        let mut table = StateTable::new();
        let mut flip = false;
        b.iter(|| {
            flip = !flip;
            let current = if flip { &full } else { &half };
            black_box(table.reconcile(current))
        });
    });
}

criterion_group!(benches, tick_benchmark, churn_benchmark);
criterion_main!(benches);
