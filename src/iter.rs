//! Iterators for the [`Tree`](crate::Tree) data structure
//!
//! [`RawIter`] is a positioned cursor over one frozen root. It walks the tree
//! with a stack of ancestor frames and supports ordered seeks as well as
//! forward and reverse overlap scans. [`Items`], [`Overlaps`] and
//! [`OverlapsRev`] wrap it as std iterators.
//!
//! ## Overlap Scans
//!
//! Items are sorted by start key, so a query `[start, end)` gives every node
//! two positions worth remembering:
//!
//! ```text
//!   query:                   [--------------)
//!   items:      [----) [----) [----) [----) [----) [----)
//!                             ^                    ^
//!                             |                    +-- hard maximum: first item
//!                             |                        starting at or past `end`
//!                             +-- soft minimum: first item starting at or
//!                                 after `start`
//! ```
//!
//! Nothing at or past the hard maximum can overlap, so a forward scan stops
//! there and a reverse scan starts just before it. Every item from the soft
//! minimum onwards overlaps without further comparison. Before it, an item
//! (or a whole child subtree, via its cached bound) only overlaps when it ends
//! after `start`. Both positions are refined whenever the scan descends
//! through them, and the node they refer to is compared by identity.

use std::iter::FusedIterator;
use std::ptr;

use smallvec::SmallVec;

use crate::item::{upper_bound, Interval, Span};
use crate::node::Node;

/// An ancestor of the current node and the child index taken from it.
struct Frame<'t, T> {
	node: &'t Node<T>,
	pos: isize,
}

impl<T> Clone for Frame<'_, T> {
	fn clone(&self) -> Self {
		*self
	}
}

impl<T> Copy for Frame<'_, T> {}

/// Constraint positions of an overlap scan.
struct OverlapScan<'t, T> {
	// Soft lower bound.
	min_node: Option<&'t Node<T>>,
	min_pos: isize,
	in_constr_min: bool,

	// Hard upper bound.
	max_node: Option<&'t Node<T>>,
	max_pos: isize,
}

impl<T> Default for OverlapScan<'_, T> {
	fn default() -> Self {
		OverlapScan {
			min_node: None,
			min_pos: 0,
			in_constr_min: false,
			max_node: None,
			max_pos: 0,
		}
	}
}

impl<T> OverlapScan<'_, T> {
	#[inline]
	fn is_min(&self, node: &Node<T>, pos: isize) -> bool {
		self.min_pos == pos && self.min_node.is_some_and(|n| ptr::eq(n, node))
	}

	#[inline]
	fn is_max_node(&self, node: &Node<T>) -> bool {
		self.max_node.is_some_and(|n| ptr::eq(n, node))
	}
}

/// Position of a cursor inside a non-empty tree.
struct Cursor<'t, T> {
	node: &'t Node<T>,
	pos: isize,
	stack: SmallVec<[Frame<'t, T>; 3]>,
	scan: OverlapScan<'t, T>,
}

impl<'t, T: Interval> Cursor<'t, T> {
	fn new(root: &'t Node<T>) -> Self {
		Cursor {
			node: root,
			pos: -1,
			stack: SmallVec::new(),
			scan: OverlapScan::default(),
		}
	}

	#[inline]
	fn count(&self) -> isize {
		self.node.count() as isize
	}

	#[inline]
	fn valid(&self) -> bool {
		self.pos >= 0 && self.pos < self.count()
	}

	/// Moves into child `pos` of the current node.
	fn descend(&mut self, pos: isize) {
		let parent = self.node;
		self.stack.push(Frame {
			node: parent,
			pos,
		});
		self.node = &*parent.children[pos as usize];
		self.pos = 0;
	}

	/// Returns to the parent at the child index the cursor came from.
	/// Returns `false` at the root.
	fn ascend(&mut self) -> bool {
		match self.stack.pop() {
			Some(frame) => {
				self.node = frame.node;
				self.pos = frame.pos;
				true
			}
			None => false,
		}
	}

	fn seek_ge(&mut self, item: &T) {
		loop {
			let (pos, found) = self.node.find(item);
			self.pos = pos as isize;
			if found {
				return;
			}
			if self.node.is_leaf() {
				if self.pos == self.count() {
					self.next();
				}
				return;
			}
			self.descend(self.pos);
		}
	}

	fn seek_lt(&mut self, item: &T) {
		loop {
			let (pos, found) = self.node.find(item);
			self.pos = pos as isize;
			if found || self.node.is_leaf() {
				self.prev();
				return;
			}
			self.descend(self.pos);
		}
	}

	/// Positions on the first item whose start key is not below `key`.
	fn seek_key_ge(&mut self, key: &[u8]) {
		loop {
			self.pos = self.node.items.partition_point(|it| it.key() < key) as isize;
			if self.node.is_leaf() {
				if self.pos == self.count() {
					self.next();
				}
				return;
			}
			self.descend(self.pos);
		}
	}

	fn first(&mut self) {
		while !self.node.is_leaf() {
			self.descend(0);
		}
		self.pos = 0;
	}

	fn last(&mut self) {
		while !self.node.is_leaf() {
			self.descend(self.count());
		}
		self.pos = self.count() - 1;
	}

	fn next(&mut self) {
		if self.node.is_leaf() {
			self.pos += 1;
			if self.pos < self.count() {
				return;
			}
			while self.pos >= self.count() && self.ascend() {}
			return;
		}
		if self.pos >= self.count() {
			return;
		}
		self.descend(self.pos + 1);
		while !self.node.is_leaf() {
			self.descend(0);
		}
		self.pos = 0;
	}

	fn prev(&mut self) {
		if self.node.is_leaf() {
			self.pos -= 1;
			if self.pos >= 0 {
				return;
			}
			while self.pos < 0 && self.ascend() {
				self.pos -= 1;
			}
			return;
		}
		if self.pos < 0 {
			return;
		}
		self.descend(self.pos);
		while !self.node.is_leaf() {
			self.descend(self.count());
		}
		self.pos = self.count() - 1;
	}

	fn constrain_min<Q: Span + ?Sized>(&mut self, query: &Q) {
		let key = query.key();
		self.scan.min_node = Some(self.node);
		self.scan.min_pos = self.node.items.partition_point(|it| it.key() < key) as isize;
	}

	fn constrain_max<Q: Span + ?Sized>(&mut self, query: &Q) {
		let up = upper_bound(query);
		self.scan.max_node = Some(self.node);
		self.scan.max_pos = self.node.items.partition_point(|it| up.contains(it.key())) as isize;
	}

	/// Descends into child `pos`, carrying any constraint that pointed at it
	/// down into the child.
	fn descend_constrained<Q: Span + ?Sized>(&mut self, pos: isize, query: &Q) {
		let parent = self.node;
		self.descend(pos);
		if self.scan.is_min(parent, pos) {
			self.constrain_min(query);
		}
		if self.scan.is_max_node(parent) && self.scan.max_pos == pos {
			self.constrain_max(query);
		}
	}

	/// Returns `true` if child `pos` may hold an item ending after `key`.
	#[inline]
	fn child_reaches(&self, pos: isize, key: &[u8]) -> bool {
		self.scan.in_constr_min
			|| self.node.children[pos as usize].bound().is_some_and(|b| b.contains(key))
	}

	#[inline]
	fn item_reaches(&self, key: &[u8]) -> bool {
		upper_bound(&self.node.items[self.pos as usize]).contains(key)
	}

	fn find_next_overlap<Q: Span + ?Sized>(&mut self, query: &Q) {
		let key = query.key();
		loop {
			if self.pos > self.count() {
				if !self.ascend() {
					return;
				}
			} else if !self.node.is_leaf() && self.child_reaches(self.pos, key) {
				self.descend_constrained(self.pos, query);
				continue;
			}

			if self.scan.is_max_node(self.node) && self.pos == self.scan.max_pos {
				// Past every possible overlap.
				self.pos = self.count();
				return;
			}
			if self.scan.is_min(self.node, self.pos) {
				self.scan.in_constr_min = true;
			}

			if self.pos < self.count() && (self.scan.in_constr_min || self.item_reaches(key)) {
				return;
			}
			self.pos += 1;
		}
	}

	fn find_prev_overlap<Q: Span + ?Sized>(&mut self, query: &Q) {
		let key = query.key();
		loop {
			if self.scan.is_max_node(self.node) && self.pos > self.scan.max_pos {
				// Jump to the child left of the hard maximum; the item there
				// is checked after it.
				self.pos = self.scan.max_pos;
			}

			if self.pos < 0 {
				if !self.ascend() {
					return;
				}
			} else if !self.node.is_leaf() && self.child_reaches(self.pos, key) {
				self.descend_constrained(self.pos, query);
				self.pos = self.count();
				continue;
			}

			if self.scan.is_min(self.node, self.pos) {
				// Items left of here start before the query.
				self.scan.in_constr_min = false;
			}

			// Child and item indexes differ by one in this direction.
			self.pos -= 1;
			if self.pos >= 0 && (self.scan.in_constr_min || self.item_reaches(key)) {
				return;
			}
		}
	}
}

/// A cursor over one snapshot of a [`Tree`](crate::Tree).
///
/// A fresh cursor is not positioned; call one of the seek or overlap methods
/// first. Every item reference it hands out lives as long as the tree borrow,
/// so the tree cannot be mutated while the cursor exists.
pub struct RawIter<'t, T> {
	root: Option<&'t Node<T>>,
	cursor: Option<Cursor<'t, T>>,
}

impl<'t, T: Interval> RawIter<'t, T> {
	pub(crate) fn new(root: Option<&'t Node<T>>) -> RawIter<'t, T> {
		RawIter {
			root,
			cursor: None,
		}
	}

	/// Restarts from the root, returning the cursor unless the tree is empty.
	fn reset(&mut self) -> Option<&mut Cursor<'t, T>> {
		self.cursor = self.root.map(Cursor::new);
		self.cursor.as_mut()
	}

	/// Positions on the first item.
	pub fn seek_to_first(&mut self) {
		if let Some(cursor) = self.reset() {
			cursor.first();
		}
	}

	/// Positions on the last item.
	pub fn seek_to_last(&mut self) {
		if let Some(cursor) = self.reset() {
			cursor.last();
		}
	}

	/// Positions on the first item at or after `item` in record order.
	pub fn seek_ge(&mut self, item: &T) {
		if let Some(cursor) = self.reset() {
			cursor.seek_ge(item);
		}
	}

	/// Positions on the last item strictly before `item` in record order.
	pub fn seek_lt(&mut self, item: &T) {
		if let Some(cursor) = self.reset() {
			cursor.seek_lt(item);
		}
	}

	pub(crate) fn seek_key_ge(&mut self, key: &[u8]) {
		if let Some(cursor) = self.reset() {
			cursor.seek_key_ge(key);
		}
	}

	/// Moves to the next item in record order.
	pub fn next(&mut self) {
		if let Some(cursor) = self.cursor.as_mut() {
			cursor.next();
		}
	}

	/// Moves to the previous item in record order.
	pub fn prev(&mut self) {
		if let Some(cursor) = self.cursor.as_mut() {
			cursor.prev();
		}
	}

	/// Returns `true` if the cursor is positioned on an item.
	pub fn valid(&self) -> bool {
		self.cursor.as_ref().is_some_and(Cursor::valid)
	}

	/// Returns the item under the cursor.
	///
	/// # Panics
	///
	/// Panics if the cursor is not [`valid`](Self::valid).
	pub fn cur(&self) -> &'t T {
		debug_assert!(self.valid(), "cur() called on an invalid iterator");
		match &self.cursor {
			Some(cursor) => {
				let node: &'t Node<T> = cursor.node;
				&node.items[cursor.pos as usize]
			}
			None => panic!("cur() called on an unpositioned iterator"),
		}
	}

	/// Positions on the first item overlapping `query`, by start key.
	pub fn first_overlap<Q: Span + ?Sized>(&mut self, query: &Q) {
		if let Some(cursor) = self.reset() {
			cursor.pos = 0;
			cursor.constrain_min(query);
			cursor.constrain_max(query);
			cursor.find_next_overlap(query);
		}
	}

	/// Positions on the last item overlapping `query`, by start key.
	pub fn last_overlap<Q: Span + ?Sized>(&mut self, query: &Q) {
		if let Some(cursor) = self.reset() {
			cursor.pos = cursor.count();
			// Reverse scans start inside the soft minimum.
			cursor.scan.in_constr_min = true;
			cursor.constrain_min(query);
			cursor.constrain_max(query);
			cursor.find_prev_overlap(query);
		}
	}

	/// Moves to the next item overlapping `query`.
	///
	/// The cursor must have been positioned by
	/// [`first_overlap`](Self::first_overlap) with the same query.
	pub fn next_overlap<Q: Span + ?Sized>(&mut self, query: &Q) {
		if let Some(cursor) = self.cursor.as_mut() {
			cursor.pos += 1;
			cursor.find_next_overlap(query);
		}
	}

	/// Moves to the previous item overlapping `query`.
	///
	/// The cursor must have been positioned by
	/// [`last_overlap`](Self::last_overlap) with the same query.
	pub fn prev_overlap<Q: Span + ?Sized>(&mut self, query: &Q) {
		if let Some(cursor) = self.cursor.as_mut() {
			cursor.find_prev_overlap(query);
		}
	}
}

// ===========================================================================
// Iterator Adapters
// ===========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
	Start,
	Running,
	Done,
}

/// Ascending iterator over every item of a tree.
pub struct Items<'t, T> {
	raw: RawIter<'t, T>,
	state: State,
	remaining: usize,
}

impl<'t, T: Interval> Items<'t, T> {
	pub(crate) fn new(raw: RawIter<'t, T>, len: usize) -> Self {
		Items {
			raw,
			state: State::Start,
			remaining: len,
		}
	}
}

impl<'t, T: Interval> Iterator for Items<'t, T> {
	type Item = &'t T;

	fn next(&mut self) -> Option<&'t T> {
		match self.state {
			State::Start => self.raw.seek_to_first(),
			State::Running => self.raw.next(),
			State::Done => return None,
		}
		if !self.raw.valid() {
			self.state = State::Done;
			return None;
		}
		self.state = State::Running;
		self.remaining = self.remaining.saturating_sub(1);
		Some(self.raw.cur())
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		(self.remaining, Some(self.remaining))
	}
}

impl<T: Interval> ExactSizeIterator for Items<'_, T> {}

impl<T: Interval> FusedIterator for Items<'_, T> {}

/// Ascending iterator over the items overlapping a query.
pub struct Overlaps<'t, 'q, T, Q: ?Sized> {
	raw: RawIter<'t, T>,
	query: &'q Q,
	state: State,
}

impl<'t, 'q, T: Interval, Q: Span + ?Sized> Overlaps<'t, 'q, T, Q> {
	pub(crate) fn new(raw: RawIter<'t, T>, query: &'q Q) -> Self {
		Overlaps {
			raw,
			query,
			state: State::Start,
		}
	}
}

impl<'t, T: Interval, Q: Span + ?Sized> Iterator for Overlaps<'t, '_, T, Q> {
	type Item = &'t T;

	fn next(&mut self) -> Option<&'t T> {
		match self.state {
			State::Start => self.raw.first_overlap(self.query),
			State::Running => self.raw.next_overlap(self.query),
			State::Done => return None,
		}
		if !self.raw.valid() {
			self.state = State::Done;
			return None;
		}
		self.state = State::Running;
		Some(self.raw.cur())
	}
}

impl<T: Interval, Q: Span + ?Sized> FusedIterator for Overlaps<'_, '_, T, Q> {}

/// Descending iterator over the items overlapping a query.
pub struct OverlapsRev<'t, 'q, T, Q: ?Sized> {
	raw: RawIter<'t, T>,
	query: &'q Q,
	state: State,
}

impl<'t, 'q, T: Interval, Q: Span + ?Sized> OverlapsRev<'t, 'q, T, Q> {
	pub(crate) fn new(raw: RawIter<'t, T>, query: &'q Q) -> Self {
		OverlapsRev {
			raw,
			query,
			state: State::Start,
		}
	}
}

impl<'t, T: Interval, Q: Span + ?Sized> Iterator for OverlapsRev<'t, '_, T, Q> {
	type Item = &'t T;

	fn next(&mut self) -> Option<&'t T> {
		match self.state {
			State::Start => self.raw.last_overlap(self.query),
			State::Running => self.raw.prev_overlap(self.query),
			State::Done => return None,
		}
		if !self.raw.valid() {
			self.state = State::Done;
			return None;
		}
		self.state = State::Running;
		Some(self.raw.cur())
	}
}

impl<T: Interval, Q: Span + ?Sized> FusedIterator for OverlapsRev<'_, '_, T, Q> {}
