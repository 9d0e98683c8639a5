//! Loom-based concurrency tests for spantree.
//!
//! These tests use loom to systematically explore all possible thread
//! interleavings of snapshot teardown: node reference counts and the shared
//! pool's free lists are the only state clones on different threads touch.
//!
//! # Running Loom Tests
//!
//! Loom tests must be run with the `loom` cfg flag:
//!
//! ```bash
//! RUSTFLAGS="--cfg loom" cargo test -p spantree --test loom_tests --release -- --test-threads=1
//! ```
//!
//! # Test Design
//!
//! Loom tests should be kept small (2 threads, a single-leaf tree) because
//! the number of possible interleavings grows exponentially with every
//! reference count touched.

#![cfg(loom)]

mod common;

use common::{ids, rec, Rec};
use loom::thread;
use spantree::Tree;

fn small() -> Tree<Rec> {
	let mut tree = Tree::new();
	for i in 0..3 {
		tree.set(rec(i, i + 2, i));
	}
	tree
}

/// Two clones written and dropped on separate threads leave the original
/// untouched, and every copied node ends up in the shared pool or reused.
#[test]
fn loom_clones_written_and_dropped() {
	loom::model(|| {
		let tree = small();

		let handles: Vec<_> = (0..2u64)
			.map(|t| {
				let mut mine = tree.clone();
				thread::spawn(move || {
					mine.set(rec(10 + t, 11 + t, 10 + t));
					assert_eq!(mine.len(), 4);
					drop(mine);
				})
			})
			.collect();
		for h in handles {
			h.join().unwrap();
		}

		assert_eq!(ids(tree.iter()), vec![0, 1, 2]);
		let stats = tree.pool_stats();
		// One leaf for the original plus one copy per thread.
		assert_eq!(stats.allocated + stats.reused, 3);
		assert_eq!(stats.pooled_leaves, stats.allocated - 1);
	});
}

/// Snapshots dropped concurrently never release nodes the original still
/// reaches.
#[test]
fn loom_concurrent_snapshot_drops() {
	loom::model(|| {
		let tree = small();
		let a = tree.clone();
		let b = tree.clone();

		let t1 = thread::spawn(move || drop(a));
		let t2 = thread::spawn(move || drop(b));
		t1.join().unwrap();
		t2.join().unwrap();

		assert_eq!(tree.pool_stats().pooled_leaves, 0);
		assert_eq!(ids(tree.iter()), vec![0, 1, 2]);
		tree.assert_invariants();
	});
}

/// A reader on a snapshot sees a stable view while the original is written
/// and then dropped.
#[test]
fn loom_reader_outlives_writer() {
	loom::model(|| {
		let mut tree = small();
		let snapshot = tree.clone();

		let reader = thread::spawn(move || ids(snapshot.iter()));

		tree.delete(&rec(1, 3, 1));
		drop(tree);

		assert_eq!(reader.join().unwrap(), vec![0, 1, 2]);
	});
}
