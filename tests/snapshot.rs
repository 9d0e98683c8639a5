//! # Snapshot and Copy-on-Write Tests
//!
//! Clones share every node until one side writes. These tests check that a
//! write through one handle never leaks into another, whichever handle writes
//! first, however many handles exist, and whichever handle is dropped first.

mod common;

use common::{ids, rec, Query, Rec};
use spantree::Tree;

fn filled(n: u64) -> Tree<Rec> {
	let mut tree = Tree::new();
	for i in 0..n {
		tree.set(rec(i * 2, i * 2 + 3, i));
	}
	tree
}

fn contents(tree: &Tree<Rec>) -> Vec<u64> {
	ids(tree.iter())
}

#[test]
fn clone_of_empty_tree() {
	let mut tree: Tree<Rec> = Tree::new();
	let snapshot = tree.clone();
	tree.set(rec(1, 2, 1));

	assert!(snapshot.is_empty());
	assert_eq!(snapshot.to_string(), ";");
	assert_eq!(tree.len(), 1);
}

#[test]
fn writes_to_original_are_invisible_to_clone() {
	let mut tree = filled(1_000);
	let snapshot = tree.clone();

	for i in 0..500 {
		tree.delete(&rec(i * 2, i * 2 + 3, i));
	}
	tree.set(rec(5_000, 5_001, 5_000));

	assert_eq!(snapshot.len(), 1_000);
	assert_eq!(contents(&snapshot), (0..1_000).collect::<Vec<_>>());
	assert_eq!(tree.len(), 501);
	snapshot.assert_invariants();
	tree.assert_invariants();
}

#[test]
fn writes_to_clone_are_invisible_to_original() {
	let tree = filled(1_000);
	let mut snapshot = tree.clone();

	for i in 0..1_000 {
		snapshot.set(rec(i * 2, i * 2 + 100, i));
	}

	assert_eq!(ids(tree.overlaps(&Query::point(1_050))), vec![524, 525]);
	assert_eq!(ids(snapshot.overlaps(&Query::point(1_050))).len(), 50);
	tree.assert_invariants();
	snapshot.assert_invariants();
}

#[test]
fn many_generations() {
	let mut tree = Tree::new();
	let mut generations = Vec::new();

	for g in 0..20u64 {
		for i in 0..100 {
			let id = g * 100 + i;
			tree.set(rec(id, id + 1, id));
		}
		generations.push(tree.clone());
	}

	for (g, snapshot) in generations.iter().enumerate() {
		assert_eq!(snapshot.len(), (g + 1) * 100);
		snapshot.assert_invariants();
	}

	// Writing into an old generation leaves the newer ones alone.
	generations[3].reset();
	assert!(generations[3].is_empty());
	assert_eq!(generations[4].len(), 500);
	assert_eq!(tree.len(), 2_000);
}

#[test]
fn dropping_original_keeps_clone_intact() {
	let tree = filled(2_000);
	let snapshot = tree.clone();
	drop(tree);

	assert_eq!(snapshot.len(), 2_000);
	assert_eq!(contents(&snapshot), (0..2_000).collect::<Vec<_>>());
	snapshot.assert_invariants();
}

#[test]
fn reset_clone_keeps_original_intact() {
	let tree = filled(2_000);
	let mut snapshot = tree.clone();
	snapshot.reset();

	assert!(snapshot.is_empty());
	assert_eq!(tree.len(), 2_000);
	tree.assert_invariants();
}

#[test]
fn both_sides_diverge() {
	let mut left = filled(800);
	let mut right = left.clone();

	for i in (0..800).step_by(2) {
		left.delete(&rec(i * 2, i * 2 + 3, i));
	}
	for i in (1..800).step_by(2) {
		right.delete(&rec(i * 2, i * 2 + 3, i));
	}

	assert_eq!(contents(&left), (1..800).step_by(2).collect::<Vec<_>>());
	assert_eq!(contents(&right), (0..800).step_by(2).collect::<Vec<_>>());
	left.assert_invariants();
	right.assert_invariants();
}

#[test]
fn clone_of_clone_shares_pool() {
	let tree = filled(100);
	let a = tree.clone();
	let b = a.clone();
	assert_eq!(tree.pool_stats(), b.pool_stats());
	assert_eq!(tree.pool_config(), b.pool_config());
}
