//! # Spantree: A Copy-on-Write Interval B-Tree
//!
//! This crate provides an in-memory B-tree of interval records that supports
//! ordered iteration, fast "which records overlap this span?" queries, and
//! **constant-time snapshots**.
//!
//! ## Design Overview
//!
//! ### Key Concepts
//!
//! **Augmented Nodes**: Every node caches the largest end bound found anywhere
//! in its subtree. An overlap scan skips any child whose bound ends before the
//! query starts, and stops as soon as items start past the query's end.
//!
//! **Copy-on-Write Sharing**: Nodes are reference counted. [`Tree::clone`]
//! only bumps the root's count; the first write through either handle copies
//! the nodes along the modified path and leaves the other handle's view
//! untouched.
//!
//! **Node Pools**: Discarded nodes are cleared and recycled through a pool
//! shared by a tree and all of its clones (see [`PoolConfig`]).
//!
//! ### Tree Structure
//!
//! ```text
//!      tree A          tree B (clone of A, then written)
//!        │               │
//!        ▼               ▼
//!   ┌─────────┐     ┌─────────┐
//!   │  root   │     │  root'  │   <- copied on first write
//!   │ max: z) │     │ max: z] │
//!   └──┬───┬──┘     └──┬───┬──┘
//!      │   └─────┐┌────┘   │
//!      ▼         ▼▼        ▼
//!   ┌──────┐  ┌──────┐  ┌──────┐
//!   │ leaf │  │ leaf │  │ leaf'│   <- shared leaf, copied leaf
//!   └──────┘  └──────┘  └──────┘
//! ```
//!
//! ## Basic Usage
//!
//! ```
//! use spantree::{Interval, Span, SpanRef, Tree};
//! use std::fmt;
//!
//! #[derive(Clone)]
//! struct Lease {
//!     start: Vec<u8>,
//!     end: Vec<u8>,
//!     id: u64,
//! }
//!
//! impl Span for Lease {
//!     fn key(&self) -> &[u8] {
//!         &self.start
//!     }
//!     fn end_key(&self) -> Option<&[u8]> {
//!         Some(&self.end)
//!     }
//! }
//!
//! impl Interval for Lease {
//!     type Id = u64;
//!     fn id(&self) -> u64 {
//!         self.id
//!     }
//! }
//!
//! impl fmt::Display for Lease {
//!     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
//!         write!(f, "{}", self.id)
//!     }
//! }
//!
//! let lease = |start: &str, end: &str, id| Lease {
//!     start: start.into(),
//!     end: end.into(),
//!     id,
//! };
//!
//! let mut tree = Tree::new();
//! tree.set(lease("a", "f", 1));
//! tree.set(lease("c", "k", 2));
//! tree.set(lease("m", "p", 3));
//!
//! // Snapshots are O(1) and unaffected by later writes.
//! let snapshot = tree.clone();
//! tree.delete(&lease("c", "k", 2));
//!
//! let hits: Vec<u64> = snapshot.overlaps(&SpanRef::new(b"e", b"n")).map(|l| l.id).collect();
//! assert_eq!(hits, vec![1, 2, 3]);
//! let hits: Vec<u64> = tree.overlaps(&SpanRef::new(b"e", b"n")).map(|l| l.id).collect();
//! assert_eq!(hits, vec![1, 3]);
//! ```
//!
//! ## Thread Safety
//!
//! A `Tree<T>` is `Send + Sync` whenever `T` is. Mutation takes `&mut self`,
//! so one handle never has a writer and readers at the same time. To share a
//! stable view with another thread, hand it a clone: node reference counts
//! and the pool's free lists are safe to update from several threads tearing
//! down their snapshots independently.

#[cfg(debug_assertions)]
use std::collections::BTreeSet;
use std::fmt;

pub mod error;
pub mod item;
pub mod iter;
mod node;
mod pool;
mod sync;

pub use error::{Error, Result};
pub use item::{Interval, Span, SpanRef};
pub use iter::{Items, Overlaps, OverlapsRev, RawIter};
pub use pool::{PoolConfig, PoolStats};

use item::{compare, same_span, KeyBound};
use node::{make_mut, unique_mut, Node};
use pool::NodePool;
use sync::Arc;

// ---------------------------------------------------------------------------
// Configuration Constants
// ---------------------------------------------------------------------------

/// Minimum degree of the tree.
pub const DEGREE: usize = 16;

/// Maximum number of items in a node.
pub const MAX_ITEMS: usize = 2 * DEGREE - 1;

/// Minimum number of items in any node but the root.
pub const MIN_ITEMS: usize = DEGREE - 1;

// ---------------------------------------------------------------------------
// Core Tree Structure
// ---------------------------------------------------------------------------

/// A copy-on-write B-tree of interval records.
///
/// Records are kept in `(key, end_key, id)` order. Each record's identifier
/// must be unique among the records present in one tree. Debug builds panic
/// when [`set`](Tree::set) would store a second record under an identifier
/// that is already present with another start key.
pub struct Tree<T: Interval> {
	/// The root node, `None` while the tree is empty.
	root: Option<Arc<Node<T>>>,

	/// Number of records stored.
	length: usize,

	/// Node recycling, shared with every clone of this tree.
	pool: Arc<NodePool<T>>,

	/// Identifiers present, rebuilt on the first write after a clone.
	#[cfg(debug_assertions)]
	ids: std::sync::Arc<BTreeSet<T::Id>>,
}

impl<T: Interval> Default for Tree<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T: Interval> Tree<T> {
	/// Creates an empty tree with the default pool configuration.
	///
	/// No node is allocated until the first record is inserted.
	pub fn new() -> Self {
		Self::with_config(PoolConfig::default())
	}

	/// Creates an empty tree whose node pool follows `config`.
	pub fn with_config(config: PoolConfig) -> Self {
		Tree {
			root: None,
			length: 0,
			pool: Arc::new(NodePool::new(config)),
			#[cfg(debug_assertions)]
			ids: std::sync::Arc::default(),
		}
	}

	/// Returns the number of records in the tree.
	pub fn len(&self) -> usize {
		self.length
	}

	/// Returns `true` if the tree holds no records.
	pub fn is_empty(&self) -> bool {
		self.length == 0
	}

	/// Returns the number of levels in the tree, `0` when it is empty.
	pub fn height(&self) -> usize {
		let mut height = 0;
		let mut node = self.root.as_deref();
		while let Some(n) = node {
			height += 1;
			node = n.children.first().map(|child| &**child);
		}
		height
	}

	/// Removes every record.
	///
	/// Nodes that no other clone still reaches are returned to the pool.
	pub fn reset(&mut self) {
		if let Some(root) = self.root.take() {
			self.pool.release(root, true);
		}
		tracing::trace!(len = self.length, "tree reset");
		#[cfg(debug_assertions)]
		match std::sync::Arc::get_mut(&mut self.ids) {
			Some(ids) => ids.clear(),
			None => self.ids = std::sync::Arc::default(),
		}
		self.length = 0;
	}

	/// Returns the pool configuration this tree was created with.
	pub fn pool_config(&self) -> PoolConfig {
		self.pool.config()
	}

	/// Returns the current counters of the node pool shared by this tree and
	/// its clones.
	pub fn pool_stats(&self) -> PoolStats {
		self.pool.stats()
	}
}

impl<T: Interval + Clone> Tree<T> {
	// -----------------------------------------------------------------------
	// Mutation
	// -----------------------------------------------------------------------

	/// Inserts `item`, replacing the record it is equal to.
	///
	/// A stored record with the same start key and identifier but a different
	/// end key is replaced as well, so re-setting a record with a moved end
	/// keeps [`len`](Self::len) unchanged.
	///
	/// # Example
	///
	/// ```
	/// # use spantree::{Interval, Span, Tree};
	/// # use std::fmt;
	/// # #[derive(Clone)]
	/// # struct R(&'static [u8], &'static [u8], u8);
	/// # impl Span for R {
	/// #     fn key(&self) -> &[u8] { self.0 }
	/// #     fn end_key(&self) -> Option<&[u8]> { Some(self.1) }
	/// # }
	/// # impl Interval for R {
	/// #     type Id = u8;
	/// #     fn id(&self) -> u8 { self.2 }
	/// # }
	/// # impl fmt::Display for R {
	/// #     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.2) }
	/// # }
	/// let mut tree = Tree::new();
	/// tree.set(R(b"a", b"c", 7));
	/// tree.set(R(b"a", b"x", 7));
	/// assert_eq!(tree.len(), 1);
	/// assert_eq!(tree.iter().next().map(|r| r.1), Some(&b"x"[..]));
	/// ```
	///
	/// # Panics
	///
	/// In debug builds, panics if another stored record with a different start
	/// key already carries `item`'s identifier.
	pub fn set(&mut self, item: T) {
		if let Some(moved) = self.find_moved(&item) {
			self.delete(&moved);
		}
		#[cfg(debug_assertions)]
		let (id, known) = {
			let id = item.id();
			let known = self.ids_mut().contains(&id);
			(id, known)
		};

		let pool = &*self.pool;
		let root = self.root.get_or_insert_with(|| pool.leaf());
		if root.count() >= MAX_ITEMS {
			let (median, next) = make_mut(root, pool).split(MAX_ITEMS / 2, pool);
			let left = std::mem::replace(root, pool.interior());
			let new_root = unique_mut(root);
			new_root.items.push(median);
			new_root.children.push(left);
			new_root.children.push(next);
			new_root.max = new_root.find_upper_bound();
			tracing::debug!(len = self.length, "root split");
		}

		let (replaced, _) = make_mut(root, pool).insert(item, pool);

		#[cfg(debug_assertions)]
		{
			assert!(
				replaced || !known,
				"set() called with an identifier already stored under another start key"
			);
			if !known {
				self.ids_mut().insert(id);
			}
		}
		if !replaced {
			self.length += 1;
		}
	}

	/// Removes the record equal to `item` and returns it.
	pub fn delete(&mut self, item: &T) -> Option<T> {
		let pool = &*self.pool;
		let root = self.root.as_mut()?;
		let (out, _) = make_mut(root, pool).remove(item, pool);
		if out.is_some() {
			self.length -= 1;
		}

		if root.count() == 0 {
			if let Some(mut old) = self.root.take() {
				// An emptied interior root keeps exactly one child.
				self.root = unique_mut(&mut old).children.pop();
				if self.root.is_some() {
					tracing::debug!(len = self.length, "root collapsed");
				}
				self.pool.release(old, false);
			}
		}
		#[cfg(debug_assertions)]
		if let Some(out) = &out {
			self.ids_mut().remove(&out.id());
		}
		out
	}

	/// Returns the identifier set, rebuilding a private copy if a clone
	/// still shares it.
	#[cfg(debug_assertions)]
	fn ids_mut(&mut self) -> &mut BTreeSet<T::Id> {
		if std::sync::Arc::get_mut(&mut self.ids).is_none() {
			let rebuilt: BTreeSet<T::Id> = self.iter().map(|item| item.id()).collect();
			self.ids = std::sync::Arc::new(rebuilt);
		}
		match std::sync::Arc::get_mut(&mut self.ids) {
			Some(ids) => ids,
			None => unreachable!("identifier set shared right after being rebuilt"),
		}
	}

	/// Finds a stored record carrying `item`'s start key and identifier under
	/// a different end key.
	fn find_moved(&self, item: &T) -> Option<T> {
		let mut iter = self.raw_iter();
		iter.seek_key_ge(item.key());
		let id = item.id();
		while iter.valid() && iter.cur().key() == item.key() {
			let cur = iter.cur();
			if cur.id() == id && !same_span(cur, item) {
				return Some(cur.clone());
			}
			iter.next();
		}
		None
	}

	// -----------------------------------------------------------------------
	// Lookup and Iteration
	// -----------------------------------------------------------------------

	/// Returns the stored record equal to `item`.
	pub fn get(&self, item: &T) -> Option<&T> {
		let mut node = self.root.as_deref()?;
		loop {
			let (i, found) = node.find(item);
			if found {
				return Some(&node.items[i]);
			}
			if node.is_leaf() {
				return None;
			}
			node = &*node.children[i];
		}
	}

	/// Returns an unpositioned cursor over this tree.
	pub fn raw_iter(&self) -> RawIter<'_, T> {
		RawIter::new(self.root.as_deref())
	}

	/// Returns an iterator over every record in ascending order.
	pub fn iter(&self) -> Items<'_, T> {
		Items::new(self.raw_iter(), self.length)
	}

	/// Returns an iterator over the records overlapping `query`, in ascending
	/// order.
	///
	/// A range record `[s, e)` overlaps a range query `[qs, qe)` when
	/// `s < qe && qs < e`. A zero-width query `[k, k)` therefore still matches
	/// records that start before `k` and end after it, while records starting
	/// at `k` are not matched.
	pub fn overlaps<'t, 'q, Q: Span + ?Sized>(&'t self, query: &'q Q) -> Overlaps<'t, 'q, T, Q> {
		Overlaps::new(self.raw_iter(), query)
	}

	/// Returns an iterator over the records overlapping `query`, in descending
	/// order.
	pub fn overlaps_rev<'t, 'q, Q: Span + ?Sized>(
		&'t self,
		query: &'q Q,
	) -> OverlapsRev<'t, 'q, T, Q> {
		OverlapsRev::new(self.raw_iter(), query)
	}
}

impl<'t, T: Interval + Clone> IntoIterator for &'t Tree<T> {
	type Item = &'t T;
	type IntoIter = Items<'t, T>;

	fn into_iter(self) -> Items<'t, T> {
		self.iter()
	}
}

impl<T: Interval> Clone for Tree<T> {
	/// Returns a snapshot sharing every node with `self`.
	fn clone(&self) -> Self {
		Tree {
			root: self.root.clone(),
			length: self.length,
			pool: Arc::clone(&self.pool),
			#[cfg(debug_assertions)]
			ids: std::sync::Arc::clone(&self.ids),
		}
	}
}

impl<T: Interval> Drop for Tree<T> {
	fn drop(&mut self) {
		// The last handle drops the pool anyway.
		if Arc::strong_count(&self.pool) > 1 {
			self.reset();
		}
	}
}

impl<T: Interval + Clone> fmt::Display for Tree<T> {
	/// Renders the tree in a parenthesized form: leaf records comma-joined,
	/// every child of an interior node wrapped in parentheses between the
	/// node's own records. An empty tree renders as `;`.
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.root {
			Some(root) if self.length > 0 => root.write_newick(f),
			_ => f.write_str(";"),
		}
	}
}

// ---------------------------------------------------------------------------
// Invariant Checking
// ---------------------------------------------------------------------------

/// Walk state for [`Tree::check_invariants`].
struct Checker {
	path: Vec<usize>,
	leaf_depth: Option<usize>,
	items: usize,
}

fn render(bound: Option<&KeyBound>) -> String {
	match bound {
		Some(bound) => bound.to_string(),
		None => "none".to_string(),
	}
}

impl Checker {
	fn check<T: Interval>(
		&mut self,
		node: &Node<T>,
		lower: Option<&T>,
		upper: Option<&T>,
	) -> Result<()> {
		let count = node.count();
		let is_root = self.path.is_empty();
		self.items += count;

		if count > MAX_ITEMS || (!is_root && count < MIN_ITEMS) {
			return Err(Error::Occupancy {
				path: self.path.clone(),
				count,
			});
		}
		let expected_children = if node.is_leaf() {
			0
		} else {
			count + 1
		};
		if node.children.len() != expected_children {
			return Err(Error::ChildCount {
				path: self.path.clone(),
				count,
				children: node.children.len(),
			});
		}

		for (index, pair) in node.items.windows(2).enumerate() {
			if compare(&pair[0], &pair[1]).is_ge() {
				return Err(Error::Unordered {
					path: self.path.clone(),
					index,
				});
			}
		}
		for (index, item) in node.items.iter().enumerate() {
			let above = lower.map_or(true, |l| compare(l, item).is_lt());
			let below = upper.map_or(true, |u| compare(item, u).is_lt());
			if !(above && below) {
				return Err(Error::Misrouted {
					path: self.path.clone(),
					index,
				});
			}
		}

		let actual = node.find_upper_bound();
		if node.max != actual {
			return Err(Error::StaleBound {
				path: self.path.clone(),
				cached: render(node.max.as_ref()),
				actual: render(actual.as_ref()),
			});
		}

		if node.is_leaf() {
			let depth = self.path.len();
			match self.leaf_depth {
				Some(expected) if expected != depth => {
					return Err(Error::UnevenDepth {
						path: self.path.clone(),
						depth,
						expected,
					})
				}
				_ => self.leaf_depth = Some(depth),
			}
			return Ok(());
		}

		for (i, child) in node.children.iter().enumerate() {
			let lower = if i > 0 {
				Some(&node.items[i - 1])
			} else {
				lower
			};
			let upper = node.items.get(i).or(upper);
			self.path.push(i);
			self.check(child, lower, upper)?;
			self.path.pop();
		}
		Ok(())
	}
}

impl<T: Interval + Clone> Tree<T> {
	/// Verifies every structural invariant of the tree.
	///
	/// # Invariants Checked
	///
	/// 1. Records strictly increase within each node
	/// 2. Node occupancy: `MIN_ITEMS..=MAX_ITEMS` below the root
	/// 3. Interior nodes hold one more child than records, leaves none
	/// 4. All leaves at the same depth
	/// 5. Every record lies between the separators routing to its node
	/// 6. Each cached upper bound equals the subtree maximum
	/// 7. The recorded length matches the number of stored records
	/// 8. No two records share an identifier
	pub fn check_invariants(&self) -> Result<()> {
		let mut checker = Checker {
			path: Vec::new(),
			leaf_depth: None,
			items: 0,
		};
		if let Some(root) = &self.root {
			checker.check(root, None, None)?;
		}
		if checker.items != self.length {
			return Err(Error::Length {
				recorded: self.length,
				actual: checker.items,
			});
		}

		let mut ids: Vec<(T::Id, usize)> =
			self.iter().enumerate().map(|(pos, item)| (item.id(), pos)).collect();
		ids.sort();
		if let Some(pair) = ids.windows(2).find(|pair| pair[0].0 == pair[1].0) {
			return Err(Error::DuplicateId {
				first: pair[0].1,
				second: pair[1].1,
			});
		}
		Ok(())
	}

	/// Validates all tree invariants.
	///
	/// # Panics
	///
	/// Panics with the violation found by
	/// [`check_invariants`](Self::check_invariants), if any.
	pub fn assert_invariants(&self) {
		if let Err(err) = self.check_invariants() {
			panic!("tree invariant violated: {err}");
		}
	}
}
