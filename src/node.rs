//! # Nodes and the Copy-on-Write Protocol
//!
//! A node is either a leaf (no children) or an interior node with exactly
//! `count + 1` children. Items are kept sorted by the compound record order
//! and every node caches the largest upper bound found anywhere in its
//! subtree.
//!
//! Nodes are shared between tree snapshots through reference counting. A node
//! may only be written through [`make_mut`], which hands out the node in place
//! when the caller holds the only reference and otherwise swaps in a private
//! copy first. Copying an interior node adds the copy as an owner of each
//! child, so the write barrier propagates lazily down whatever path is
//! modified next.
//!
//! ```text
//!   snapshot A      snapshot B                snapshot A      snapshot B
//!        \            /                            |               |
//!         [ root (2) ]          make_mut(B)   [ root (1) ]    [ root' (1) ]
//!          /        \          ==========>      /      \       /       \
//!        [x (1)]  [y (1)]                    [x (2)]        [y (2)]
//! ```

use std::cmp::Ordering;
use std::fmt;

use smallvec::SmallVec;

use crate::item::{compare, upper_bound, BoundRef, Interval, KeyBound};
use crate::pool::NodePool;
use crate::sync::Arc;
use crate::{MAX_ITEMS, MIN_ITEMS};

pub(crate) struct Node<T> {
	/// Leaves never hold children; interior nodes always hold `items + 1`.
	leaf: bool,
	pub(crate) items: SmallVec<[T; MAX_ITEMS]>,
	pub(crate) children: Vec<Arc<Node<T>>>,
	/// Largest upper bound in this subtree, `None` while the subtree is empty.
	pub(crate) max: Option<KeyBound>,
}

impl<T: fmt::Debug> fmt::Debug for Node<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Node")
			.field("leaf", &self.leaf)
			.field("items", &self.items)
			.field("children", &self.children)
			.field("max", &self.max)
			.finish()
	}
}

/// Returns the node behind a reference the caller knows to be unique.
///
/// # Panics
///
/// Panics if the node is shared. Fresh pool nodes and nodes that just passed
/// through [`make_mut`] are always unique.
#[inline]
pub(crate) fn unique_mut<T>(node: &mut Arc<Node<T>>) -> &mut Node<T> {
	match Arc::get_mut(node) {
		Some(node) => node,
		None => unreachable!("unique_mut() called on a shared node - this indicates a COW bug"),
	}
}

/// Acquires a node for writing.
///
/// With exclusive ownership the node is returned as is. Otherwise a copy is
/// taken from the pool, the caller's reference is redirected to it and the
/// reference to the shared original is released.
pub(crate) fn make_mut<'a, T: Interval + Clone>(
	node: &'a mut Arc<Node<T>>,
	pool: &NodePool<T>,
) -> &'a mut Node<T> {
	if Arc::get_mut(node).is_none() {
		let copy = pool.clone_node(node);
		let shared = std::mem::replace(node, copy);
		// Recursive, because the other owners may have let go in the meantime.
		pool.release(shared, true);
	}
	unique_mut(node)
}

/// Raises `max` to `up` if it is larger. Returns `true` on change.
#[inline]
fn extend_bound(max: &mut Option<KeyBound>, up: BoundRef<'_>) -> bool {
	match max {
		Some(current) if current.as_bound_ref() >= up => false,
		_ => {
			*max = Some(up.into_owned());
			true
		}
	}
}

/// Upper bound of an item together with the subtree it carries, if any.
#[inline]
fn subtree_bound<'a, T: Interval>(item: &'a T, child: Option<&'a Node<T>>) -> BoundRef<'a> {
	let up = upper_bound(item);
	match child.and_then(Node::bound) {
		Some(child_max) if up < child_max => child_max,
		_ => up,
	}
}

impl<T> Node<T> {
	pub(crate) fn new_leaf() -> Node<T> {
		Node {
			leaf: true,
			items: SmallVec::new(),
			children: Vec::new(),
			max: None,
		}
	}

	pub(crate) fn new_interior() -> Node<T> {
		Node {
			leaf: false,
			items: SmallVec::new(),
			children: Vec::with_capacity(MAX_ITEMS + 1),
			max: None,
		}
	}

	#[inline]
	pub(crate) fn is_leaf(&self) -> bool {
		self.leaf
	}

	#[inline]
	pub(crate) fn count(&self) -> usize {
		self.items.len()
	}

	#[inline]
	pub(crate) fn bound(&self) -> Option<BoundRef<'_>> {
		self.max.as_ref().map(KeyBound::as_bound_ref)
	}

	/// Empties the node while keeping its shape and allocations.
	pub(crate) fn clear(&mut self) {
		self.items.clear();
		self.children.clear();
		self.max = None;
	}

	/// Inserts `item` at `index` with `child` to its right.
	fn insert_at(&mut self, index: usize, item: T, child: Option<Arc<Node<T>>>) {
		self.items.insert(index, item);
		if let Some(child) = child {
			debug_assert!(!self.leaf);
			self.children.insert(index + 1, child);
		}
	}

	fn push_back(&mut self, item: T, child: Option<Arc<Node<T>>>) {
		self.items.push(item);
		if let Some(child) = child {
			self.children.push(child);
		}
	}

	fn push_front(&mut self, item: T, child: Option<Arc<Node<T>>>) {
		self.items.insert(0, item);
		if let Some(child) = child {
			self.children.insert(0, child);
		}
	}

	/// Removes the item at `index` and the child to its right.
	fn remove_at(&mut self, index: usize) -> (T, Option<Arc<Node<T>>>) {
		let child = (!self.leaf).then(|| self.children.remove(index + 1));
		(self.items.remove(index), child)
	}

	fn pop_back(&mut self) -> (T, Option<Arc<Node<T>>>) {
		let Some(item) = self.items.pop() else {
			unreachable!("pop_back() called on an empty node");
		};
		let child = if self.leaf {
			None
		} else {
			self.children.pop()
		};
		(item, child)
	}

	fn pop_front(&mut self) -> (T, Option<Arc<Node<T>>>) {
		let child = (!self.leaf).then(|| self.children.remove(0));
		(self.items.remove(0), child)
	}
}

impl<T: Interval> Node<T> {
	/// Binary search for `item`, returning its position or insertion point
	/// and whether it is present.
	#[inline]
	pub(crate) fn find(&self, item: &T) -> (usize, bool) {
		match self.items.binary_search_by(|probe| compare(probe, item)) {
			Ok(index) => (index, true),
			Err(index) => (index, false),
		}
	}

	/// Computes the subtree's upper bound from this node's items and the
	/// cached bounds of its children.
	pub(crate) fn find_upper_bound(&self) -> Option<KeyBound> {
		self.items
			.iter()
			.map(upper_bound)
			.chain(self.children.iter().filter_map(|child| child.bound()))
			.max()
			.map(BoundRef::into_owned)
	}

	/// Folds in the bound of the item at `item` and, optionally, the child at
	/// `child`, both already stored in this node. Returns `true` on change.
	fn adjust_upper_bound_on_insertion(&mut self, item: usize, child: Option<usize>) -> bool {
		let up = subtree_bound(&self.items[item], child.map(|c| &*self.children[c]));
		extend_bound(&mut self.max, up)
	}

	/// Accounts for the removal of a subtree whose bound was `up`. The bound is
	/// only recomputed if `up` was the maximum. Returns `true` on change.
	fn adjust_upper_bound_on_removal(&mut self, up: BoundRef<'_>) -> bool {
		if self.bound() != Some(up) {
			return false;
		}
		let max = self.find_upper_bound();
		let changed = max.as_ref().map(KeyBound::as_bound_ref) != Some(up);
		self.max = max;
		changed
	}
}

impl<T: Interval + Clone> Node<T> {
	/// Splits the node at `index`.
	///
	/// The node keeps everything before `index`; the item at `index` and a new
	/// sibling holding everything after it are returned for the parent.
	///
	/// ```text
	///   +-----------+                   +-----------+
	///   |   x y z   |                   |     y     |
	///   +--/-/-\-\--+       ====>       +----/-\----+
	///                                       /   \
	///                              +-------+     +-------+
	///                              |     x |     | z     |
	///                              +-------+     +-------+
	/// ```
	pub(crate) fn split(&mut self, index: usize, pool: &NodePool<T>) -> (T, Arc<Node<T>>) {
		let mut next = pool.same_shape(self);
		let sibling = unique_mut(&mut next);
		sibling.items.extend(self.items.drain(index + 1..));
		if !self.leaf {
			sibling.children.extend(self.children.drain(index + 1..));
		}
		let Some(out) = self.items.pop() else {
			unreachable!("split() index beyond node contents");
		};
		sibling.max = sibling.find_upper_bound();

		// If the bound came from the median or the sibling, it moved away.
		let stale = match self.bound() {
			Some(max) => sibling.bound() == Some(max) || upper_bound(&out) == max,
			None => false,
		};
		if stale {
			self.max = self.find_upper_bound();
		}
		(out, next)
	}

	/// Inserts `item` into this subtree, splitting full children on the way
	/// down so that no node exceeds `MAX_ITEMS`.
	///
	/// Returns whether an equal item was replaced, and whether this node's
	/// upper bound changed.
	pub(crate) fn insert(&mut self, item: T, pool: &NodePool<T>) -> (bool, bool) {
		let (mut i, found) = self.find(&item);
		if found {
			self.items[i] = item;
			return (true, false);
		}
		if self.leaf {
			self.insert_at(i, item, None);
			return (false, self.adjust_upper_bound_on_insertion(i, None));
		}
		if self.children[i].count() >= MAX_ITEMS {
			let (median, next) = make_mut(&mut self.children[i], pool).split(MAX_ITEMS / 2, pool);
			self.insert_at(i, median, Some(next));

			match compare(&item, &self.items[i]) {
				// Stay with the left half.
				Ordering::Less => {}
				Ordering::Greater => i += 1,
				Ordering::Equal => {
					self.items[i] = item;
					return (true, false);
				}
			}
		}
		let (replaced, changed) = make_mut(&mut self.children[i], pool).insert(item, pool);
		if !changed {
			return (replaced, false);
		}
		// The child's bound is now exactly the inserted item's bound.
		let changed = match self.children[i].bound() {
			Some(up) => extend_bound(&mut self.max, up),
			None => false,
		};
		(replaced, changed)
	}

	/// Removes and returns the largest item of this subtree.
	fn remove_max(&mut self, pool: &NodePool<T>) -> T {
		if self.leaf {
			let Some(out) = self.items.pop() else {
				unreachable!("remove_max() called on an empty leaf");
			};
			self.adjust_upper_bound_on_removal(upper_bound(&out));
			return out;
		}
		let i = self.count();
		if self.children[i].count() <= MIN_ITEMS {
			// Child not large enough to remove from.
			self.rebalance_or_merge(i, pool);
			return self.remove_max(pool);
		}
		let out = make_mut(&mut self.children[i], pool).remove_max(pool);
		self.adjust_upper_bound_on_removal(upper_bound(&out));
		out
	}

	/// Removes the item equal to `item` from this subtree.
	///
	/// Returns the removed item, if any, and whether this node's upper bound
	/// changed.
	pub(crate) fn remove(&mut self, item: &T, pool: &NodePool<T>) -> (Option<T>, bool) {
		let (i, found) = self.find(item);
		if self.leaf {
			if !found {
				return (None, false);
			}
			let (out, _) = self.remove_at(i);
			let changed = self.adjust_upper_bound_on_removal(upper_bound(&out));
			return (Some(out), changed);
		}
		if self.children[i].count() <= MIN_ITEMS {
			// Child not large enough to remove from.
			self.rebalance_or_merge(i, pool);
			return self.remove(item, pool);
		}
		let child = make_mut(&mut self.children[i], pool);
		if found {
			// Replace the item with the largest item of its left subtree.
			let max = child.remove_max(pool);
			let out = std::mem::replace(&mut self.items[i], max);
			let changed = self.adjust_upper_bound_on_removal(upper_bound(&out));
			return (Some(out), changed);
		}
		match child.remove(item, pool) {
			(Some(out), true) => {
				let changed = self.adjust_upper_bound_on_removal(upper_bound(&out));
				(Some(out), changed)
			}
			(out, _) => (out, false),
		}
	}

	/// Grows child `i` so that an item can be removed from it without taking
	/// it below `MIN_ITEMS`.
	fn rebalance_or_merge(&mut self, i: usize, pool: &NodePool<T>) {
		if i > 0 && self.children[i - 1].count() > MIN_ITEMS {
			// Rotate from the left sibling.
			//
			//          +-----------+                     +-----------+
			//          |     y     |                     |     x     |
			//          +----/-\----+                     +----/-\----+
			//              /   \           ====>             /   \
			// +-----------+     +-------+       +-----------+     +-------+
			// |         x |     |       |       |           |     | y     |
			// +----------\+     +-------+       +-----------+     +/------+
			//             a                                        a
			let left = make_mut(&mut self.children[i - 1], pool);
			let (x, grandchild) = left.pop_back();
			left.adjust_upper_bound_on_removal(subtree_bound(&x, grandchild.as_deref()));

			let y = std::mem::replace(&mut self.items[i - 1], x);
			let child = make_mut(&mut self.children[i], pool);
			let carries_child = grandchild.is_some();
			child.push_front(y, grandchild);
			child.adjust_upper_bound_on_insertion(0, carries_child.then_some(0));
		} else if i < self.count() && self.children[i + 1].count() > MIN_ITEMS {
			// Rotate from the right sibling.
			//
			//          +-----------+                     +-----------+
			//          |     y     |                     |     x     |
			//          +----/-\----+                     +----/-\----+
			//              /   \           ====>             /   \
			//     +-------+     +-----------+       +-------+     +-----------+
			//     |       |     | x         |       |     y |     |           |
			//     +-------+     +/----------+       +------\+     +-----------+
			//                    a                          a
			let right = make_mut(&mut self.children[i + 1], pool);
			let (x, grandchild) = right.pop_front();
			right.adjust_upper_bound_on_removal(subtree_bound(&x, grandchild.as_deref()));

			let y = std::mem::replace(&mut self.items[i], x);
			let child = make_mut(&mut self.children[i], pool);
			let carries_child = grandchild.is_some();
			child.push_back(y, grandchild);
			let last = child.count() - 1;
			child.adjust_upper_bound_on_insertion(last, carries_child.then_some(last + 1));
		} else {
			// Merge with a sibling, pulling the separator down.
			//
			//          +-----------+                     +-----------+
			//          |   u y v   |                     |    u v    |
			//          +----/-\----+                     +-----|-----+
			//              /   \           ====>               |
			// +-----------+     +-----------+              +-----------+
			// |         x |     | z         |              |   x y z   |
			// +-----------+     +-----------+              +-----------+
			let i = if i >= self.count() {
				self.count() - 1
			} else {
				i
			};
			// The sibling's contents move out, so it must not be shared.
			make_mut(&mut self.children[i + 1], pool);
			let (separator, sibling) = self.remove_at(i);
			let Some(mut sibling) = sibling else {
				unreachable!("interior node without a right child");
			};
			let merged = unique_mut(&mut sibling);

			let child = make_mut(&mut self.children[i], pool);
			let at = child.count();
			child.items.push(separator);
			child.items.extend(merged.items.drain(..));
			child.children.extend(merged.children.drain(..));
			child.adjust_upper_bound_on_insertion(at, None);
			if let Some(up) = merged.bound() {
				extend_bound(&mut child.max, up);
			}
			pool.release(sibling, false);
		}
	}

	/// Writes the subtree in a parenthesized, Newick-like form.
	pub(crate) fn write_newick(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.leaf {
			for (i, item) in self.items.iter().enumerate() {
				if i != 0 {
					f.write_str(",")?;
				}
				write!(f, "{}", item)?;
			}
			return Ok(());
		}
		for (i, child) in self.children.iter().enumerate() {
			f.write_str("(")?;
			child.write_newick(f)?;
			f.write_str(")")?;
			if let Some(item) = self.items.get(i) {
				write!(f, "{}", item)?;
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::pool::PoolConfig;
	use crate::tests::{iv, Iv};

	fn leaf_with(pool: &NodePool<Iv>, items: &[Iv]) -> Arc<Node<Iv>> {
		let mut node = pool.leaf();
		let n = unique_mut(&mut node);
		n.items.extend(items.iter().cloned());
		n.max = n.find_upper_bound();
		node
	}

	#[test]
	fn find_reports_position_and_presence() {
		let pool = NodePool::new(PoolConfig::default());
		let node = leaf_with(&pool, &[iv(b"b", b"c", 1), iv(b"d", b"e", 2), iv(b"f", b"g", 3)]);
		assert_eq!(node.find(&iv(b"d", b"e", 2)), (1, true));
		assert_eq!(node.find(&iv(b"a", b"z", 9)), (0, false));
		assert_eq!(node.find(&iv(b"d", b"e", 3)), (2, false));
		assert_eq!(node.find(&iv(b"z", b"", 1)), (3, false));
	}

	#[test]
	fn make_mut_returns_unique_node_in_place() {
		let pool = NodePool::new(PoolConfig::default());
		let mut node = leaf_with(&pool, &[iv(b"a", b"b", 1)]);
		let before = Arc::as_ptr(&node);
		make_mut(&mut node, &pool).items.push(iv(b"c", b"d", 2));
		assert_eq!(Arc::as_ptr(&node), before);
		assert_eq!(node.count(), 2);
	}

	#[test]
	fn make_mut_copies_shared_node() {
		let pool = NodePool::new(PoolConfig::default());
		let mut node = leaf_with(&pool, &[iv(b"a", b"b", 1)]);
		let snapshot = Arc::clone(&node);

		make_mut(&mut node, &pool).items.push(iv(b"c", b"d", 2));
		assert!(!Arc::ptr_eq(&node, &snapshot));
		assert_eq!(snapshot.count(), 1);
		assert_eq!(node.count(), 2);
		assert_eq!(Arc::strong_count(&snapshot), 1);
	}

	#[test]
	fn copying_interior_node_shares_children() {
		let pool = NodePool::new(PoolConfig::default());
		let mut root = pool.interior();
		{
			let r = unique_mut(&mut root);
			r.items.push(iv(b"m", b"n", 1));
			r.children.push(leaf_with(&pool, &[iv(b"a", b"b", 2)]));
			r.children.push(leaf_with(&pool, &[iv(b"x", b"y", 3)]));
			r.max = r.find_upper_bound();
		}
		let snapshot = Arc::clone(&root);
		make_mut(&mut root, &pool);

		assert!(!Arc::ptr_eq(&root, &snapshot));
		for (mine, theirs) in root.children.iter().zip(snapshot.children.iter()) {
			assert!(Arc::ptr_eq(mine, theirs));
			assert_eq!(Arc::strong_count(mine), 2);
		}
	}

	#[test]
	fn split_moves_upper_half_and_recomputes_bounds() {
		let pool = NodePool::new(PoolConfig::default());
		let mut node = leaf_with(
			&pool,
			&[iv(b"a", b"b", 1), iv(b"c", b"d", 2), iv(b"e", b"z", 3), iv(b"g", b"h", 4)],
		);
		let (median, next) = make_mut(&mut node, &pool).split(1, &pool);
		assert_eq!(median.id, 2);
		assert_eq!(node.count(), 1);
		assert_eq!(next.count(), 2);
		assert_eq!(node.bound(), Some(upper_bound(&iv(b"a", b"b", 1))));
		assert_eq!(next.bound(), Some(upper_bound(&iv(b"e", b"z", 3))));
	}

	#[test]
	fn split_keeps_bound_held_by_left_half() {
		let pool = NodePool::new(PoolConfig::default());
		let mut node = leaf_with(
			&pool,
			&[iv(b"a", b"z", 1), iv(b"c", b"d", 2), iv(b"e", b"f", 3), iv(b"g", b"h", 4)],
		);
		let (_, next) = make_mut(&mut node, &pool).split(2, &pool);
		assert_eq!(node.bound(), Some(upper_bound(&iv(b"a", b"z", 1))));
		assert_eq!(next.bound(), Some(upper_bound(&iv(b"g", b"h", 4))));
	}

	#[test]
	fn removal_recomputes_only_when_maximum_leaves() {
		let pool = NodePool::new(PoolConfig::default());
		let mut node = leaf_with(&pool, &[iv(b"a", b"z", 1), iv(b"c", b"d", 2)]);
		let n = make_mut(&mut node, &pool);

		let (out, changed) = n.remove(&iv(b"c", b"d", 2), &pool);
		assert_eq!(out.map(|o| o.id), Some(2));
		assert!(!changed);

		n.insert(iv(b"c", b"d", 2), &pool);
		let (_, changed) = n.remove(&iv(b"a", b"z", 1), &pool);
		assert!(changed);
		assert_eq!(n.bound(), Some(upper_bound(&iv(b"c", b"d", 2))));
	}

	#[test]
	fn insert_signals_bound_growth() {
		let pool = NodePool::new(PoolConfig::default());
		let mut node = pool.leaf();
		let n = make_mut(&mut node, &pool);
		assert_eq!(n.insert(iv(b"a", b"c", 1), &pool), (false, true));
		assert_eq!(n.insert(iv(b"b", b"c", 2), &pool), (false, false));
		assert_eq!(n.insert(iv(b"b", b"c", 2), &pool), (true, false));
		assert_eq!(n.insert(iv(b"b", b"q", 3), &pool), (false, true));
	}
}
