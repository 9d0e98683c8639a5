//! # Node Pools
//!
//! Nodes are recycled instead of being returned to the allocator every time a
//! subtree is discarded. Leaves and interior nodes live on separate free lists
//! because an interior node keeps its child array allocation across reuse.
//!
//! A pool belongs to one tree and is shared by every clone of it, so a clone
//! dropped on another thread still feeds the same free lists. Pooling only
//! saves allocations: a tree configured with [`PoolConfig::disabled`] behaves
//! identically.

use crate::item::Interval;
use crate::node::{unique_mut, Node};
use crate::sync::{Arc, AtomicUsize, Mutex, Ordering};

/// Retention limits for a tree's node pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolConfig {
	/// Maximum number of cleared leaf nodes kept for reuse.
	pub max_leaves: usize,
	/// Maximum number of cleared interior nodes kept for reuse.
	pub max_interiors: usize,
}

impl PoolConfig {
	/// A configuration that retains nothing; every node is freshly allocated.
	pub const fn disabled() -> Self {
		PoolConfig {
			max_leaves: 0,
			max_interiors: 0,
		}
	}
}

impl Default for PoolConfig {
	fn default() -> Self {
		PoolConfig {
			max_leaves: 64,
			max_interiors: 16,
		}
	}
}

/// Point-in-time counters for a node pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
	/// Nodes allocated fresh because the matching free list was empty.
	pub allocated: usize,
	/// Nodes handed out from a free list.
	pub reused: usize,
	/// Leaves currently waiting on the free list.
	pub pooled_leaves: usize,
	/// Interior nodes currently waiting on the free list.
	pub pooled_interiors: usize,
}

/// Free lists of cleared, exclusively owned nodes.
pub(crate) struct NodePool<T> {
	config: PoolConfig,
	leaves: Mutex<Vec<Arc<Node<T>>>>,
	interiors: Mutex<Vec<Arc<Node<T>>>>,
	allocated: AtomicUsize,
	reused: AtomicUsize,
}

impl<T> NodePool<T> {
	pub(crate) fn new(config: PoolConfig) -> Self {
		NodePool {
			config,
			leaves: Mutex::new(Vec::new()),
			interiors: Mutex::new(Vec::new()),
			allocated: AtomicUsize::new(0),
			reused: AtomicUsize::new(0),
		}
	}

	pub(crate) fn config(&self) -> PoolConfig {
		self.config
	}

	/// Returns an empty leaf with a single reference.
	pub(crate) fn leaf(&self) -> Arc<Node<T>> {
		let recycled = self.leaves.lock().pop();
		self.take_or_allocate(recycled, Node::new_leaf)
	}

	/// Returns an empty interior node with a single reference.
	pub(crate) fn interior(&self) -> Arc<Node<T>> {
		let recycled = self.interiors.lock().pop();
		self.take_or_allocate(recycled, Node::new_interior)
	}

	/// Returns an empty node of the same shape as `like`.
	pub(crate) fn same_shape(&self, like: &Node<T>) -> Arc<Node<T>> {
		if like.is_leaf() {
			self.leaf()
		} else {
			self.interior()
		}
	}

	fn take_or_allocate(
		&self,
		recycled: Option<Arc<Node<T>>>,
		allocate: fn() -> Node<T>,
	) -> Arc<Node<T>> {
		match recycled {
			Some(node) => {
				self.reused.fetch_add(1, Ordering::Relaxed);
				node
			}
			None => {
				self.allocated.fetch_add(1, Ordering::Relaxed);
				Arc::new(allocate())
			}
		}
	}

	/// Drops one reference to `node`.
	///
	/// If it was the last reference the node is cleared and put on its free
	/// list. With `recursive` set, an interior node's children are released
	/// the same way first, otherwise their handles are simply dropped.
	pub(crate) fn release(&self, mut node: Arc<Node<T>>, recursive: bool) {
		let Some(inner) = Arc::get_mut(&mut node) else {
			// Other snapshots still reach this node.
			return;
		};
		if recursive {
			for child in inner.children.drain(..) {
				self.release(child, true);
			}
		}
		inner.clear();

		let (list, limit) = if inner.is_leaf() {
			(&self.leaves, self.config.max_leaves)
		} else {
			(&self.interiors, self.config.max_interiors)
		};
		let mut list = list.lock();
		if list.len() < limit {
			list.push(node);
		}
	}

	pub(crate) fn stats(&self) -> PoolStats {
		PoolStats {
			allocated: self.allocated.load(Ordering::Relaxed),
			reused: self.reused.load(Ordering::Relaxed),
			pooled_leaves: self.leaves.lock().len(),
			pooled_interiors: self.interiors.lock().len(),
		}
	}
}

impl<T: Interval + Clone> NodePool<T> {
	/// Copies `node` into a fresh node with a single reference.
	///
	/// Every child of an interior node gains the copy as an additional owner.
	pub(crate) fn clone_node(&self, node: &Node<T>) -> Arc<Node<T>> {
		let mut copy = self.same_shape(node);
		let c = unique_mut(&mut copy);
		c.items.extend(node.items.iter().cloned());
		c.children.extend(node.children.iter().cloned());
		c.max = node.max.clone();
		copy
	}
}
