//! Bulk partition I/O benchmarks.
//!
//! Run with:
//! ```
//! cargo bench --bench bulk_io
//! ```

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use psmatrix::config::{ATTR_LOAD_PATH, ATTR_LOAD_THREADS, ATTR_SAVE_THREADS};
use psmatrix::test_support::{fill_random, generate_assignment};
use psmatrix::{ServerMatrix, TaskId};
use std::hint::black_box;
use std::io::Cursor;
use std::time::Duration;
use tempfile::TempDir;

const PARTITIONS: usize = 32;
const ROWS_PER_PARTITION: i64 = 256;
const ROW_BYTES: usize = 512;

// =============================================================================
// SAVE / RESTORE
// =============================================================================

fn bench_save_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk/save");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(3));

    for threads in [1usize, 2, 4, 8] {
        let assignment = generate_assignment(1, "bench", PARTITIONS, ROWS_PER_PARTITION, 64)
            .with_attribute(ATTR_SAVE_THREADS, threads.to_string());
        let mut matrix = ServerMatrix::new(&assignment).unwrap();
        let rows = fill_random(&mut matrix, 0.8, ROW_BYTES, 42);

        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::new("threads", threads), &matrix, |b, matrix| {
            b.iter(|| {
                let mut stream = Vec::new();
                black_box(matrix.save_all(&mut stream).unwrap());
                stream
            })
        });
    }
    group.finish();
}

fn bench_restore_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk/restore");
    group.sample_size(10);

    let assignment = generate_assignment(1, "bench", PARTITIONS, ROWS_PER_PARTITION, 64);
    let mut source = ServerMatrix::new(&assignment).unwrap();
    fill_random(&mut source, 0.8, ROW_BYTES, 7);
    let mut stream = Vec::new();
    source.save_all(&mut stream).unwrap();

    group.throughput(Throughput::Bytes(stream.len() as u64));
    group.bench_function("checkpoint", |b| {
        let mut target = ServerMatrix::new(&assignment).unwrap();
        b.iter(|| black_box(target.restore_from(&mut Cursor::new(&stream)).unwrap()))
    });
    group.finish();
}

// =============================================================================
// PARTITION FILES
// =============================================================================

fn bench_load_files(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk/load");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(3));

    let dir = TempDir::new().unwrap();
    let assignment = generate_assignment(1, "bench", PARTITIONS, ROWS_PER_PARTITION, 64);
    let mut source = ServerMatrix::new(&assignment).unwrap();
    fill_random(&mut source, 0.8, ROW_BYTES, 9);
    source.export_all(dir.path()).unwrap();

    for threads in [1usize, 4, 16] {
        let with_path = assignment
            .clone()
            .with_attribute(ATTR_LOAD_PATH, dir.path().to_string_lossy())
            .with_attribute(ATTR_LOAD_THREADS, threads.to_string());
        group.bench_with_input(BenchmarkId::new("threads", threads), &with_path, |b, with_path| {
            let mut matrix = ServerMatrix::new(with_path).unwrap();
            b.iter(|| black_box(matrix.load_all().unwrap()))
        });
    }
    group.finish();
}

// =============================================================================
// CLOCKS
// =============================================================================

fn bench_clock_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("clock/broadcast");
    for partitions in [16usize, 256, 4096] {
        let assignment = generate_assignment(1, "bench", partitions, 1, 1);
        group.throughput(Throughput::Elements(partitions as u64));
        group.bench_with_input(BenchmarkId::from_parameter(partitions), &assignment, |b, assignment| {
            let mut matrix = ServerMatrix::new(assignment).unwrap();
            let mut clock = 0u32;
            b.iter(|| {
                clock += 1;
                matrix.set_clock(TaskId(0), clock).unwrap();
                black_box(matrix.min_clock())
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_save_stream,
    bench_restore_stream,
    bench_load_files,
    bench_clock_broadcast
);
criterion_main!(benches);
