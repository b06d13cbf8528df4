//! Thread-safe counter for the reserved message id of sequenced frames.
//!
//! # Why a message id at all?
//!
//! Frames written in [`FrameFormat::Sequenced`](crate::protocol::FrameFormat)
//! carry a monotonically increasing 4-byte id after the length prefix.  The
//! id is intended for correlating requests with responses; readers skip it
//! today, so the only requirement on the writer side is that ids increase.
//!
//! # Thread safety
//!
//! The counter uses `AtomicU32` internally, so a writer task and any other
//! producer can both call [`SequenceCounter::next`] without a lock.

use std::sync::atomic::{AtomicU32, Ordering};

/// A monotonically increasing counter for frame message ids.
///
/// Starts at 0 and wraps at `u32::MAX` back to 0 without panicking.
///
/// # Examples
///
/// ```rust
/// use depot_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
#[derive(Debug, Default)]
pub struct SequenceCounter {
    inner: AtomicU32,
}

impl SequenceCounter {
    /// Creates a new counter starting at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a counter whose first [`next`](Self::next) returns `start`.
    pub fn starting_at(start: u32) -> Self {
        Self {
            inner: AtomicU32::new(start),
        }
    }

    /// Returns the next id and atomically increments the counter.
    ///
    /// `Ordering::Relaxed` is enough: ids order frames, they do not publish
    /// memory to other threads.
    pub fn next(&self) -> u32 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the value the next call to [`next`](Self::next) will produce.
    pub fn peek(&self) -> u32 {
        self.inner.load(Ordering::Relaxed)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
