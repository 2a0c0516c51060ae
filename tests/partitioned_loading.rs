use damds_loader::partition::codec::encode_entries;
use damds_loader::partition::{Distribution, PartitionedInput};
use damds_loader::runner::sweep;
use damds_loader::{ByteOrder, ClusterTopology, EntryKind, Error, MatrixGeometry};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Entry stored at (row, col) in every fixture
fn entry(row: usize, col: usize) -> i32 {
    ((row * 31 + col * 7) % 3000) as i32 - 1000
}

fn write_matrix(dir: &Path, points: usize, order: ByteOrder) -> PathBuf {
    let values: Vec<i32> = (0..points)
        .flat_map(|r| (0..points).map(move |c| entry(r, c)))
        .collect();
    let bytes = encode_entries(&values, order, EntryKind::Signed).unwrap();
    let path = dir.join("distances.bin");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(&bytes).unwrap();
    file.sync_all().unwrap();
    path
}

struct Fixture {
    _dir: TempDir,
    topology: ClusterTopology,
    path: PathBuf,
}

fn fixture(points: usize, order: ByteOrder, nodes: usize, threads: usize, mmaps: usize) -> Fixture {
    let dir = TempDir::new().unwrap();
    let path = write_matrix(dir.path(), points, order);
    let scratch = dir.path().join("scratch");
    std::fs::create_dir(&scratch).unwrap();
    let topology = ClusterTopology::new(nodes, threads, mmaps, &scratch).unwrap();
    Fixture { _dir: dir, topology, path }
}

fn open(f: &Fixture, points: usize, order: ByteOrder, block: usize, node: usize, dist: Distribution) -> PartitionedInput {
    let geometry = MatrixGeometry::describe(&f.path, points, order, EntryKind::Signed, block).unwrap();
    PartitionedInput::open(&f.topology, geometry, node, dist.policy()).unwrap()
}

#[test]
fn two_tiles_split_between_two_threads() {
    let f = fixture(4, ByteOrder::Little, 1, 2, 2);
    let input = open(&f, 4, ByteOrder::Little, 2, 0, Distribution::RoundRobin);

    assert_eq!(input.plan().tile_count(), 2);
    assert_eq!(input.owned_tiles(0, 0).unwrap().collect::<Vec<_>>(), vec![0]);
    assert_eq!(input.owned_tiles(0, 1).unwrap().collect::<Vec<_>>(), vec![1]);

    let guard = input.request_block(0, 0, 0).unwrap();
    let block = guard.block().unwrap();
    assert_eq!(block.row_range(), 0..2);
    for r in 0..2 {
        for c in 0..4 {
            assert_eq!(block.get(r, c), entry(r, c));
        }
    }
    drop(guard);

    let guard = input.request_block(0, 1, 1).unwrap();
    let block = guard.block().unwrap();
    assert_eq!(block.row_range(), 2..4);
    assert_eq!(block.get_global(3, 1), Some(entry(3, 1)));
}

#[test]
fn big_endian_matrix_decodes() {
    let f = fixture(9, ByteOrder::Big, 1, 1, 1);
    let input = open(&f, 9, ByteOrder::Big, 4, 0, Distribution::Contiguous);

    let last = input.owned_tiles(0, 0).unwrap().last().unwrap();
    let guard = input.request_block(0, 0, last).unwrap();
    let block = guard.block().unwrap();
    assert_eq!(block.row_range(), 8..9);
    assert_eq!(block.row(0).collect::<Vec<_>>(), (0..9).map(|c| entry(8, c)).collect::<Vec<_>>());
}

#[test]
fn wrong_byte_order_reads_different_values() {
    let f = fixture(4, ByteOrder::Big, 1, 1, 1);
    let input = open(&f, 4, ByteOrder::Little, 4, 0, Distribution::RoundRobin);
    let guard = input.request_block(0, 0, 0).unwrap();
    let values = guard.block().unwrap().to_vec();
    let expected: Vec<i32> = (0..4).flat_map(|r| (0..4).map(move |c| entry(r, c))).collect();
    assert_ne!(values, expected);
}

#[test]
fn size_mismatch_fails_before_any_read() {
    let dir = TempDir::new().unwrap();
    let path = write_matrix(dir.path(), 5, ByteOrder::Little);
    let result = MatrixGeometry::describe(&path, 6, ByteOrder::Little, EntryKind::Signed, 2);
    assert!(matches!(result, Err(Error::Geometry(_))));
}

#[test]
fn foreign_tile_is_rejected_without_io() {
    let f = fixture(8, ByteOrder::Little, 1, 2, 1);
    let input = open(&f, 8, ByteOrder::Little, 2, 0, Distribution::RoundRobin);

    let result = input.request_block(0, 1, 0);
    assert!(matches!(result, Err(Error::OutOfRange(_))));
    let result = input.request_block(0, 0, 99);
    assert!(matches!(result, Err(Error::OutOfRange(_))));

    let stats = input.scratch_stats();
    assert_eq!(stats.stages, 0);
    assert_eq!(stats.free, 1);
    assert_eq!(std::fs::read_dir(f.topology.scratch_dir()).unwrap().count(), 0);
}

#[test]
fn other_nodes_tiles_are_rejected() {
    let f = fixture(8, ByteOrder::Little, 2, 1, 1);
    let input = open(&f, 8, ByteOrder::Little, 2, 0, Distribution::RoundRobin);

    assert_eq!(input.owned_tiles(1, 0).unwrap().collect::<Vec<_>>(), vec![1, 3]);
    assert!(matches!(input.request_block(1, 0, 1), Err(Error::OutOfRange(_))));
}

#[test]
fn block_guard_double_release() {
    let f = fixture(4, ByteOrder::Little, 1, 1, 1);
    let geometry = MatrixGeometry::describe(&f.path, 4, ByteOrder::Little, EntryKind::Signed, 2).unwrap();
    let scratch = damds_loader::ScratchManager::new(&f.topology, 0).unwrap();
    let source = damds_loader::scratch::SourceFile::open(&f.path).unwrap();

    let mut lease = scratch.acquire(&source, geometry.byte_range_of(0, 2).unwrap()).unwrap();
    lease.release().unwrap();
    assert!(matches!(lease.release(), Err(Error::DoubleRelease { .. })));
    drop(lease);

    let stats = scratch.stats();
    assert_eq!(stats.free, 1);
    assert_eq!(stats.in_use, 0);

    let held = scratch.acquire(&source, 0..4).unwrap();
    assert_eq!(scratch.stats().free, 0);
    drop(held);
}

#[test]
fn single_region_serializes_acquires() {
    let f = fixture(4, ByteOrder::Little, 1, 2, 1);
    let input = open(&f, 4, ByteOrder::Little, 2, 0, Distribution::RoundRobin);
    let second_staged = AtomicBool::new(false);

    std::thread::scope(|scope| {
        let first = input.request_block(0, 0, 0).unwrap();

        let waiter = scope.spawn(|| {
            let guard = input.request_block(0, 1, 1).unwrap();
            second_staged.store(true, Ordering::SeqCst);
            guard.block().unwrap().get(0, 0)
        });

        std::thread::sleep(Duration::from_millis(100));
        assert!(!second_staged.load(Ordering::SeqCst));
        assert_eq!(first.block().unwrap().get(1, 3), entry(1, 3));
        first.release().unwrap();

        assert_eq!(waiter.join().unwrap(), entry(2, 0));
        assert!(second_staged.load(Ordering::SeqCst));
    });

    assert_eq!(input.scratch_stats().free, 1);
}

#[test]
fn shutdown_wakes_blocked_request() {
    let f = fixture(4, ByteOrder::Little, 1, 2, 1);
    let input = open(&f, 4, ByteOrder::Little, 2, 0, Distribution::RoundRobin);

    std::thread::scope(|scope| {
        let held = input.request_block(0, 0, 0).unwrap();
        let waiter = scope.spawn(|| input.request_block(0, 1, 1).map(|g| g.slot()));

        std::thread::sleep(Duration::from_millis(50));
        input.shutdown();
        assert!(matches!(waiter.join().unwrap(), Err(Error::Io(_))));
        drop(held);
    });
}

#[test]
fn failing_consumer_still_releases() {
    let f = fixture(6, ByteOrder::Little, 1, 1, 1);
    let input = open(&f, 6, ByteOrder::Little, 3, 0, Distribution::RoundRobin);

    let result: damds_loader::Result<()> =
        input.with_block(0, 0, 0, |_| Err(Error::decode("optimizer rejected block")));
    assert!(result.is_err());
    assert_eq!(input.scratch_stats().free, 1);

    let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _guard = input.request_block(0, 0, 1).unwrap();
        panic!("consumer crashed");
    }));
    assert!(panicked.is_err());
    assert_eq!(input.scratch_stats().free, 1);

    input.request_block(0, 0, 0).unwrap();
}

#[test]
fn every_node_sweep_covers_matrix_once() {
    for dist in [Distribution::RoundRobin, Distribution::Contiguous] {
        let points = 23;
        let f = fixture(points, ByteOrder::Little, 3, 2, 2);
        let mut rows = BTreeSet::new();
        let mut entries = 0;

        for node in 0..3 {
            let input = open(&f, points, ByteOrder::Little, 4, node, dist);
            let summary = sweep(&input).unwrap();
            for tile in &summary.tiles {
                for row in tile.rows.clone() {
                    assert!(rows.insert(row), "row {} seen twice", row);
                }
                let (owner_node, owner_thread) = input.plan().owner(tile.tile).unwrap();
                assert_eq!((owner_node, owner_thread), (node, tile.thread));
            }
            entries += summary.entries();

            let stats = input.scratch_stats();
            assert_eq!(stats.free, 2);
            assert_eq!(stats.in_use, 0);
        }

        assert_eq!(rows, (0..points).collect::<BTreeSet<_>>());
        assert_eq!(entries, (points * points) as u64);
    }
}

#[test]
fn sweep_summary_matches_fixture() {
    let points = 10;
    let f = fixture(points, ByteOrder::Big, 1, 3, 1);
    let input = open(&f, points, ByteOrder::Big, 3, 0, Distribution::RoundRobin);
    let summary = sweep(&input).unwrap();

    let all: Vec<i32> = (0..points).flat_map(|r| (0..points).map(move |c| entry(r, c))).collect();
    assert_eq!(summary.tiles.len(), 4);
    assert_eq!(summary.rows(), points);
    assert_eq!(summary.min(), all.iter().copied().min());
    assert_eq!(summary.max(), all.iter().copied().max());
    let mean = all.iter().map(|&v| v as f64 / i16::MAX as f64).sum::<f64>() / all.len() as f64;
    assert!((summary.mean_distance() - mean).abs() < 1e-9);
}

#[test]
fn repeated_pass_reuses_staged_tiles() {
    let f = fixture(8, ByteOrder::Little, 1, 1, 2);
    let input = open(&f, 8, ByteOrder::Little, 4, 0, Distribution::RoundRobin);

    sweep(&input).unwrap();
    sweep(&input).unwrap();
    let stats = input.scratch_stats();
    assert_eq!(stats.stages, 2);
    assert_eq!(stats.stage_hits, 2);
}

#[test]
fn free_regions_stay_within_pool_under_contention() {
    let f = fixture(32, ByteOrder::Little, 1, 8, 3);
    let input = open(&f, 32, ByteOrder::Little, 1, 0, Distribution::RoundRobin);

    std::thread::scope(|scope| {
        for thread in 0..8 {
            let input = &input;
            scope.spawn(move || {
                for _ in 0..5 {
                    for tile in input.owned_tiles(0, thread).unwrap() {
                        let guard = input.request_block(0, thread, tile).unwrap();
                        let stats = input.scratch_stats();
                        assert!(stats.free <= 3);
                        assert!(stats.in_use >= 1 && stats.in_use <= 3);
                        assert_eq!(guard.block().unwrap().get(0, 5), entry(tile, 5));
                    }
                }
            });
        }
    });

    let stats = input.scratch_stats();
    assert_eq!(stats.free, 3);
    assert_eq!(stats.stages + stats.stage_hits, 32 * 5);
}

#[test]
fn sweep_reports_the_failing_read_not_the_shutdown() {
    for _ in 0..50 {
        let f = fixture(4, ByteOrder::Little, 1, 2, 1);
        let input = open(&f, 4, ByteOrder::Little, 1, 0, Distribution::Contiguous);
        assert_eq!(input.owned_tiles(0, 1).unwrap().collect::<Vec<_>>(), vec![2, 3]);

        let file = std::fs::OpenOptions::new().write(true).open(&f.path).unwrap();
        file.set_len(2 * 4 * 2).unwrap();

        match sweep(&input) {
            Err(Error::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof, "{}", e),
            other => panic!("expected end-of-file error, got {:?}", other.map(|s| s.rows())),
        }
        assert_eq!(input.scratch_stats().in_use, 0);
    }
}
