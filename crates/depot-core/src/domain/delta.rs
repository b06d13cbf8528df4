//! Byte-wise delta with run-length compression.
//!
//! Used to ship only the change in an object's serialized state.  The delta
//! of two buffers is `delta[i] = base[i] - updated[i]` (wrapping), which is
//! all zeros wherever the buffers agree, so it run-length encodes well.
//!
//! Encoded form: a sequence of `(value:u8, run:u16-LE)` triples.  A run never
//! exceeds `u16::MAX`; longer runs of the same value start a new triple.
//!
//! When the buffers differ in length the delta always has `updated.len()`
//! entries.  Positions past the end of `base` carry the `updated` byte
//! verbatim, so `decompress` can rebuild a longer state from a shorter one.

use thiserror::Error;

/// Bytes per run-length triple.
const TRIPLE_SIZE: usize = 3;

/// Longest run a single triple can describe.
const MAX_RUN: usize = u16::MAX as usize;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeltaError {
    /// The encoded buffer is not a whole number of triples.
    #[error("truncated delta: {len} bytes is not a multiple of {TRIPLE_SIZE}")]
    Truncated { len: usize },

    /// A triple declared a run of zero bytes.
    #[error("zero-length run at triple {index}")]
    EmptyRun { index: usize },
}

/// Computes the run-length-encoded delta that turns `base` into `updated`.
///
/// # Examples
///
/// ```rust
/// use depot_core::domain::delta::{compress, decompress};
///
/// let base = b"hello world".to_vec();
/// let updated = b"hello there".to_vec();
/// let encoded = compress(&base, &updated);
/// assert_eq!(decompress(&base, &encoded).unwrap(), updated);
/// ```
pub fn compress(base: &[u8], updated: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut run: Option<(u8, usize)> = None;

    for (i, &new) in updated.iter().enumerate() {
        let d = match base.get(i) {
            Some(&old) => old.wrapping_sub(new),
            None => new,
        };
        run = match run {
            Some((value, len)) if value == d && len < MAX_RUN => Some((value, len + 1)),
            Some((value, len)) => {
                push_triple(&mut out, value, len);
                Some((d, 1))
            }
            None => Some((d, 1)),
        };
    }
    if let Some((value, len)) = run {
        push_triple(&mut out, value, len);
    }
    out
}

/// Rebuilds the updated buffer from `base` and an encoded delta.
///
/// # Errors
///
/// Returns [`DeltaError`] if `encoded` is not a well-formed triple stream.
pub fn decompress(base: &[u8], encoded: &[u8]) -> Result<Vec<u8>, DeltaError> {
    if encoded.len() % TRIPLE_SIZE != 0 {
        return Err(DeltaError::Truncated { len: encoded.len() });
    }

    let mut out = Vec::with_capacity(base.len());
    for (index, triple) in encoded.chunks_exact(TRIPLE_SIZE).enumerate() {
        let value = triple[0];
        let run = u16::from_le_bytes([triple[1], triple[2]]) as usize;
        if run == 0 {
            return Err(DeltaError::EmptyRun { index });
        }
        for _ in 0..run {
            let i = out.len();
            let byte = match base.get(i) {
                Some(&old) => old.wrapping_sub(value),
                None => value,
            };
            out.push(byte);
        }
    }
    Ok(out)
}

fn push_triple(out: &mut Vec<u8>, value: u8, run: usize) {
    debug_assert!(run > 0 && run <= MAX_RUN);
    out.push(value);
    out.extend_from_slice(&(run as u16).to_le_bytes());
}

// ── Tests ─────────────────────────────────────────────────────────────────────
