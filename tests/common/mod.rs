//! Shared test records and brute-force oracles.
//!
//! Keys are big-endian encoded `u64`s, so byte order equals numeric order
//! and expectations can be written with plain numbers.

#![allow(dead_code)]

use spantree::{Interval, Span};
use std::fmt;

/// A test record: `[start, end)`, or the point `start` when `end` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rec {
	pub start: u64,
	pub end: Option<u64>,
	pub id: u64,
	start_key: [u8; 8],
	end_key: Option<[u8; 8]>,
}

impl Rec {
	/// Sort key matching the tree's record order.
	pub fn order(&self) -> (u64, Option<u64>, u64) {
		(self.start, self.end, self.id)
	}
}

impl Span for Rec {
	fn key(&self) -> &[u8] {
		&self.start_key
	}

	fn end_key(&self) -> Option<&[u8]> {
		self.end_key.as_ref().map(|k| &k[..])
	}
}

impl Interval for Rec {
	type Id = u64;

	fn id(&self) -> u64 {
		self.id
	}
}

impl fmt::Display for Rec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.end {
			Some(end) => write!(f, "[{},{})#{}", self.start, end, self.id),
			None => write!(f, "{}#{}", self.start, self.id),
		}
	}
}

/// The record `[start, end)` with identifier `id`.
pub fn rec(start: u64, end: u64, id: u64) -> Rec {
	Rec {
		start,
		end: Some(end),
		id,
		start_key: start.to_be_bytes(),
		end_key: Some(end.to_be_bytes()),
	}
}

/// The point record `start` with identifier `id`.
pub fn point(start: u64, id: u64) -> Rec {
	Rec {
		start,
		end: None,
		id,
		start_key: start.to_be_bytes(),
		end_key: None,
	}
}

/// An overlap query over numeric keys.
#[derive(Debug, Clone, Copy)]
pub struct Query {
	pub start: u64,
	pub end: Option<u64>,
	start_key: [u8; 8],
	end_key: Option<[u8; 8]>,
}

impl Query {
	pub fn range(start: u64, end: u64) -> Self {
		Query {
			start,
			end: Some(end),
			start_key: start.to_be_bytes(),
			end_key: Some(end.to_be_bytes()),
		}
	}

	pub fn point(start: u64) -> Self {
		Query {
			start,
			end: None,
			start_key: start.to_be_bytes(),
			end_key: None,
		}
	}
}

impl Span for Query {
	fn key(&self) -> &[u8] {
		&self.start_key
	}

	fn end_key(&self) -> Option<&[u8]> {
		self.end_key.as_ref().map(|k| &k[..])
	}
}

/// Returns `true` if a span starting at `start` and ending at `end` (a point
/// when `None`) still covers `key`.
fn reaches(start: u64, end: Option<u64>, key: u64) -> bool {
	match end {
		Some(end) => key < end,
		None => key <= start,
	}
}

/// Brute-force overlap test.
pub fn overlaps(rec: &Rec, query: &Query) -> bool {
	reaches(query.start, query.end, rec.start) && reaches(rec.start, rec.end, query.start)
}

/// Every record in `records` overlapping `query`, in tree order.
pub fn brute_overlaps<'a>(records: impl IntoIterator<Item = &'a Rec>, query: &Query) -> Vec<u64> {
	let mut hits: Vec<&Rec> = records.into_iter().filter(|r| overlaps(r, query)).collect();
	hits.sort_by_key(|r| r.order());
	hits.into_iter().map(|r| r.id).collect()
}

/// Identifiers of the records yielded by `iter`.
pub fn ids<'a>(iter: impl Iterator<Item = &'a Rec>) -> Vec<u64> {
	iter.map(|r| r.id).collect()
}
