use criterion::{black_box, criterion_group, criterion_main, Criterion};
use damds_loader::partition::codec::{decode_entries, encode_entries};
use damds_loader::{ByteOrder, EntryKind, MatrixBlock};
use rand::Rng;

fn criterion_benchmark(c: &mut Criterion) {
    let points = 1024;
    let rows = 64;
    let mut rng = rand::rng();
    let values: Vec<i32> = (0..rows * points).map(|_| rng.random_range(0..i16::MAX as i32)).collect();
    let big = encode_entries(&values, ByteOrder::Big, EntryKind::Signed).unwrap();
    let little = encode_entries(&values, ByteOrder::Little, EntryKind::Signed).unwrap();

    c.bench_function("decode_tile_big_endian", |b| {
        b.iter(|| black_box(decode_entries(black_box(&big), ByteOrder::Big, EntryKind::Signed).unwrap()))
    });
    c.bench_function("decode_tile_little_endian", |b| {
        b.iter(|| black_box(decode_entries(black_box(&little), ByteOrder::Little, EntryKind::Signed).unwrap()))
    });
    c.bench_function("block_distance_sum", |b| {
        let block = MatrixBlock::new(0, 0..rows, points, ByteOrder::Big, EntryKind::Signed, &big).unwrap();
        b.iter(|| {
            let mut sum = 0.0;
            for row in 0..block.rows() {
                for col in 0..block.columns() {
                    sum += block.distance(row, col);
                }
            }
            black_box(sum)
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
