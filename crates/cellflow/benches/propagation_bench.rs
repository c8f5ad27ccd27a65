//! Benchmarks for invalidation passes and lazy recompute.
//!
//! Scenarios:
//! - Fan-out: one source, N mapped dependents, put + read all.
//! - Chain: one source, N nested maps, put + read the tail.
//! - Property tree: write one field of a wide object, read a sibling.
//!
//! Run with: cargo bench -p cellflow --bench propagation_bench

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

use cellflow::{Cell, Object};

const WIDTHS: &[usize] = &[10, 100, 1000];

// =============================================================================
// Fan-out
// =============================================================================

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("cellflow/fan_out");
    for &width in WIDTHS {
        group.throughput(Throughput::Elements(width as u64));
        group.bench_with_input(BenchmarkId::new("put_then_read", width), &width, |b, &width| {
            let source = Cell::new(0);
            let dependents: Vec<Cell> = (0..width)
                .map(|offset| source.map(move |v| v.as_f64().map(|n| n + offset as f64)))
                .collect();
            let mut tick = 0i64;
            b.iter(|| {
                tick += 1;
                source.put(tick).ok();
                for dependent in &dependents {
                    black_box(dependent.get().ok());
                }
            });
        });
    }
    group.finish();
}

// =============================================================================
// Chain
// =============================================================================

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("cellflow/chain");
    for &depth in &[10usize, 100, 200] {
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::new("put_then_read_tail", depth), &depth, |b, &depth| {
            let source = Cell::new(0);
            let mut tail = source.clone();
            for _ in 0..depth {
                tail = tail.map(|v| v.as_f64().map(|n| n + 1.0));
            }
            let mut tick = 0i64;
            b.iter(|| {
                tick += 1;
                source.put(tick).ok();
                black_box(tail.get().ok());
            });
        });
    }
    group.finish();
}

// =============================================================================
// Property tree
// =============================================================================

fn bench_property_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("cellflow/property");
    for &width in WIDTHS {
        group.bench_with_input(BenchmarkId::new("write_one_field", width), &width, |b, &width| {
            let object: Object = (0..width).map(|index| (format!("k{index}"), 0)).collect();
            let root = Cell::new(object);
            let fields: Vec<Cell> = (0..width).map(|index| root.property(format!("k{index}"))).collect();
            for field in &fields {
                black_box(field.get().ok());
            }
            let mut tick = 0i64;
            b.iter(|| {
                tick += 1;
                fields[0].put(tick).ok();
                black_box(fields[width - 1].get().ok());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_fan_out, bench_chain, bench_property_write);
criterion_main!(benches);
