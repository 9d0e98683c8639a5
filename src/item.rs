//! # Item Capability Contract
//!
//! The tree stores any record that can describe itself as a span of byte
//! keys. A span starts at an inclusive [`Span::key`] and ends at an exclusive
//! [`Span::end_key`]. A span without an end key (or with an empty one) is a
//! point and covers exactly its start key.
//!
//! Records are ordered lexicographically on
//!
//! ```text
//! (key, end_key, id)
//! ```
//!
//! where a missing end key sorts like an empty byte string. The identifier
//! only breaks ties between records covering the same span, so identifiers
//! must be unique among the records held by one tree.
//!
//! ## Upper Bounds
//!
//! Every node caches the largest end bound found in its subtree. Because
//! point records end inclusively at their start key while ranged records end
//! exclusively, a bound is a key plus an inclusive flag. For equal keys the
//! inclusive bound is the larger one.

use std::cmp::Ordering;
use std::fmt;

/// A span of byte keys: `[key, end_key)`, or the single key `key` when there
/// is no end key.
pub trait Span {
	/// Inclusive start key.
	fn key(&self) -> &[u8];

	/// Exclusive end key. `None` or an empty slice marks a point.
	fn end_key(&self) -> Option<&[u8]>;
}

/// A record that can be stored in a [`Tree`](crate::Tree).
///
/// # Example
///
/// ```
/// use spantree::{Interval, Span};
/// use std::fmt;
///
/// #[derive(Clone)]
/// struct Lease {
///     start: Vec<u8>,
///     end: Vec<u8>,
///     id: u64,
/// }
///
/// impl Span for Lease {
///     fn key(&self) -> &[u8] {
///         &self.start
///     }
///     fn end_key(&self) -> Option<&[u8]> {
///         Some(&self.end)
///     }
/// }
///
/// impl Interval for Lease {
///     type Id = u64;
///     fn id(&self) -> u64 {
///         self.id
///     }
/// }
///
/// impl fmt::Display for Lease {
///     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
///         write!(f, "{}", self.id)
///     }
/// }
/// ```
pub trait Interval: Span + fmt::Display {
	/// Tie-breaking identifier, unique within one tree.
	type Id: Ord;

	/// Returns the identifier of this record.
	fn id(&self) -> Self::Id;
}

/// A borrowed span, mostly useful as an overlap query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanRef<'a> {
	key: &'a [u8],
	end_key: Option<&'a [u8]>,
}

impl<'a> SpanRef<'a> {
	/// The half-open span `[key, end_key)`.
	pub fn new(key: &'a [u8], end_key: &'a [u8]) -> Self {
		SpanRef {
			key,
			end_key: Some(end_key),
		}
	}

	/// The single key `key`.
	pub fn point(key: &'a [u8]) -> Self {
		SpanRef {
			key,
			end_key: None,
		}
	}
}

impl Span for SpanRef<'_> {
	fn key(&self) -> &[u8] {
		self.key
	}

	fn end_key(&self) -> Option<&[u8]> {
		self.end_key
	}
}

/// End key with absent and empty collapsed together.
#[inline]
fn end_of<S: Span + ?Sized>(span: &S) -> &[u8] {
	span.end_key().unwrap_or(&[])
}

/// Compares two records on `(key, end_key, id)`.
#[inline]
pub(crate) fn compare<T: Interval>(a: &T, b: &T) -> Ordering {
	a.key().cmp(b.key()).then_with(|| end_of(a).cmp(end_of(b))).then_with(|| a.id().cmp(&b.id()))
}

/// Returns `true` if the two spans cover the same keys.
#[inline]
pub(crate) fn same_span<A: Span + ?Sized, B: Span + ?Sized>(a: &A, b: &B) -> bool {
	a.key() == b.key() && end_of(a) == end_of(b)
}

/// Returns the upper bound of a span.
#[inline]
pub(crate) fn upper_bound<S: Span + ?Sized>(span: &S) -> BoundRef<'_> {
	match span.end_key() {
		Some(end) if !end.is_empty() => BoundRef {
			key: end,
			inclusive: false,
		},
		_ => BoundRef {
			key: span.key(),
			inclusive: true,
		},
	}
}

/// A borrowed upper bound.
///
/// Field order matters: the derived ordering compares keys first and then
/// ranks an inclusive bound above an exclusive one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct BoundRef<'a> {
	pub(crate) key: &'a [u8],
	pub(crate) inclusive: bool,
}

impl BoundRef<'_> {
	/// Returns `true` if `key` lies below this bound.
	#[inline]
	pub(crate) fn contains(&self, key: &[u8]) -> bool {
		match key.cmp(self.key) {
			Ordering::Less => true,
			Ordering::Equal => self.inclusive,
			Ordering::Greater => false,
		}
	}

	pub(crate) fn into_owned(self) -> KeyBound {
		KeyBound {
			key: self.key.to_vec(),
			inclusive: self.inclusive,
		}
	}
}

/// An owned upper bound, cached on every node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct KeyBound {
	key: Vec<u8>,
	inclusive: bool,
}

impl KeyBound {
	#[inline]
	pub(crate) fn as_bound_ref(&self) -> BoundRef<'_> {
		BoundRef {
			key: &self.key,
			inclusive: self.inclusive,
		}
	}
}

impl fmt::Display for KeyBound {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}{}", self.key, if self.inclusive { "]" } else { ")" })
	}
}
