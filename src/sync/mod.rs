//! Synchronization primitives with loom support.
//!
//! Under normal compilation, re-exports from std/parking_lot.
//! Under `cfg(loom)`, uses loom's equivalents for deterministic testing.
//!
//! # Usage
//!
//! Instead of importing directly from `std::sync` or `parking_lot`,
//! import from this module:
//!
//! ```ignore
//! use crate::sync::{Arc, AtomicUsize, Mutex, Ordering};
//! ```
//!
//! # Loom Integration
//!
//! When compiled with `--cfg loom`, node reference counts and the pool's
//! free lists are tracked by loom, so concurrent snapshot teardown can be
//! explored across all interleavings.

// ===========================================================================
// Reference Counting
// ===========================================================================

#[cfg(not(loom))]
pub(crate) use std::sync::Arc;

#[cfg(loom)]
pub(crate) use loom::sync::Arc;

// ===========================================================================
// Atomic Primitives
// ===========================================================================

#[cfg(not(loom))]
pub(crate) use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicUsize, Ordering};

// ===========================================================================
// Mutex
// ===========================================================================

// Note: parking_lot::Mutex and loom::sync::Mutex have different APIs.
// parking_lot hands out guards directly, while loom wraps them in a
// poisoning `Result`. The wrapper below unifies them.

#[cfg(not(loom))]
pub(crate) use parking_lot::Mutex;

#[cfg(loom)]
mod loom_mutex {
	//! Wrapper type for loom's Mutex to match parking_lot's API.

	use loom::sync::{Mutex as LoomMutex, MutexGuard};

	/// A wrapper around loom's Mutex that provides a parking_lot-compatible API.
	#[derive(Debug)]
	pub(crate) struct Mutex<T>(LoomMutex<T>);

	impl<T> Mutex<T> {
		/// Creates a new Mutex.
		pub(crate) fn new(value: T) -> Self {
			Mutex(LoomMutex::new(value))
		}

		/// Acquires the lock, blocking until available.
		pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
			self.0.lock().unwrap()
		}
	}
}

#[cfg(loom)]
pub(crate) use loom_mutex::Mutex;
