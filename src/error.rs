//! # Structural Invariant Violations
//!
//! No tree operation fails at runtime: every mutation is in-memory pointer
//! and array manipulation on caller-validated items. The only errors in this
//! crate describe a tree whose structure is broken, as found by
//! [`Tree::check_invariants`](crate::Tree::check_invariants).
//!
//! ## Checked Invariants
//!
//! ```text
//! root
//!  │  items strictly increasing ─────────────► Unordered
//!  │  MIN_ITEMS <= count <= MAX_ITEMS ───────► Occupancy
//!  │  children == count + 1 ─────────────────► ChildCount
//!  ▼
//! children
//!  │  every leaf at the same depth ──────────► UnevenDepth
//!  │  subtree items between separators ──────► Misrouted
//!  │  cached bound == true subtree maximum ──► StaleBound
//!  ▼
//! tree length == number of stored items ─────► Length
//! identifiers distinct across the tree ─────► DuplicateId
//! ```
//!
//! Positions are reported as the sequence of child indexes taken from the
//! root, so `[]` is the root and `[2, 0]` is the first child of the root's
//! third child.

use thiserror::Error;

/// A structural invariant violation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
	/// Two adjacent items in one node are not strictly increasing.
	#[error("items out of order in node {path:?} at position {index}")]
	Unordered {
		/// Path from the root to the node.
		path: Vec<usize>,
		/// Index of the first item of the offending pair.
		index: usize,
	},

	/// A non-root node holds fewer than `MIN_ITEMS` or any node more than
	/// `MAX_ITEMS` items.
	#[error("node {path:?} holds {count} items")]
	Occupancy {
		/// Path from the root to the node.
		path: Vec<usize>,
		/// Number of items found.
		count: usize,
	},

	/// Leaves were found at different depths.
	#[error("leaf {path:?} at depth {depth}, expected {expected}")]
	UnevenDepth {
		/// Path from the root to the leaf.
		path: Vec<usize>,
		/// Depth of this leaf.
		depth: usize,
		/// Depth of the first leaf visited.
		expected: usize,
	},

	/// An interior node does not have exactly one more child than items, or a
	/// leaf has children.
	#[error("node {path:?} has {children} children for {count} items")]
	ChildCount {
		/// Path from the root to the node.
		path: Vec<usize>,
		/// Number of items.
		count: usize,
		/// Number of children.
		children: usize,
	},

	/// An item is not strictly between the separators that route to its node.
	#[error("item at position {index} of node {path:?} lies outside its separators")]
	Misrouted {
		/// Path from the root to the node.
		path: Vec<usize>,
		/// Position of the item.
		index: usize,
	},

	/// A cached upper bound differs from the true subtree maximum.
	#[error("node {path:?} caches bound {cached}, subtree maximum is {actual}")]
	StaleBound {
		/// Path from the root to the node.
		path: Vec<usize>,
		/// Cached bound, rendered.
		cached: String,
		/// Recomputed bound, rendered.
		actual: String,
	},

	/// The tree's element count disagrees with the number of stored items.
	#[error("tree length is {recorded} but {actual} items are stored")]
	Length {
		/// Count kept by the tree handle.
		recorded: usize,
		/// Items found by walking the tree.
		actual: usize,
	},

	#[error("items at positions {first} and {second} share an identifier")]
	DuplicateId {
		/// Position of the first item in record order.
		first: usize,
		/// Position of the second item in record order.
		second: usize,
	},
}

/// A Result type alias using our custom Error type.
pub type Result<T> = std::result::Result<T, Error>;
