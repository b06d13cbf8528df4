//! The [`Message`] envelope and its sequential field cursors.
//!
//! A message names a logical service (`target`) and an operation (`kind`),
//! followed by an ordered run of typed fields.  Fields carry no type tags on
//! the wire: both ends agree on the field sequence for every
//! `(target, kind)` pair, so the reader must consume fields in exactly the
//! order the writer appended them.
//!
//! Field encodings (all little-endian):
//!
//! ```text
//! int32   [value:4]
//! int64   [value:8]
//! float64 [ieee754:8]
//! string  [len:int32][utf8:len]
//! bytes   [len:int32][raw:len]
//! ```

use crate::protocol::codec::ProtocolError;

/// A decoded or under-construction protocol message.
///
/// Built append-only with the `push_*` / `with_*` methods; read back with
/// [`Message::fields`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    target: String,
    kind: String,
    body: Vec<u8>,
}

impl Message {
    /// Starts a new message with no fields.
    pub fn new(target: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            kind: kind.into(),
            body: Vec::new(),
        }
    }

    /// Reassembles a message from an already-encoded field body.
    pub fn from_parts(target: impl Into<String>, kind: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            target: target.into(),
            kind: kind.into(),
            body,
        }
    }

    /// Logical service name this message is addressed to.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Operation name within the target service.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The raw encoded fields following target and kind.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns `true` when this message is a `(target, kind)` match.
    pub fn is(&self, target: &str, kind: &str) -> bool {
        self.target == target && self.kind == kind
    }

    /// Returns a cursor positioned at the first field.
    pub fn fields(&self) -> FieldReader<'_> {
        FieldReader::new(&self.body)
    }

    // ── Append-only building ────────────────────────────────────────────────

    pub fn push_i32(&mut self, value: i32) -> &mut Self {
        self.body.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn push_i64(&mut self, value: i64) -> &mut Self {
        self.body.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn push_f64(&mut self, value: f64) -> &mut Self {
        self.body.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn push_str(&mut self, value: &str) -> &mut Self {
        write_blob(&mut self.body, value.as_bytes());
        self
    }

    pub fn push_bytes(&mut self, value: &[u8]) -> &mut Self {
        write_blob(&mut self.body, value);
        self
    }

    pub fn with_i32(mut self, value: i32) -> Self {
        self.push_i32(value);
        self
    }

    pub fn with_i64(mut self, value: i64) -> Self {
        self.push_i64(value);
        self
    }

    pub fn with_f64(mut self, value: f64) -> Self {
        self.push_f64(value);
        self
    }

    pub fn with_str(mut self, value: &str) -> Self {
        self.push_str(value);
        self
    }

    pub fn with_bytes(mut self, value: &[u8]) -> Self {
        self.push_bytes(value);
        self
    }
}

/// Writes an int32 length prefix followed by `bytes`.
pub(crate) fn write_blob(buf: &mut Vec<u8>, bytes: &[u8]) {
    debug_assert!(bytes.len() <= i32::MAX as usize, "field longer than i32::MAX");
    buf.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

/// Sequential read cursor over a message body.
///
/// Every read advances the cursor.  Reading past the end yields
/// [`ProtocolError::FieldOverrun`]: the caller asked for a field the sender
/// never wrote, which means the two ends disagree on the field sequence.
#[derive(Debug, Clone)]
pub struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// The unread tail of the buffer, without advancing.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        let raw = self.take(4)?;
        Ok(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        let raw = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(raw);
        Ok(i64::from_le_bytes(arr))
    }

    pub fn read_f64(&mut self) -> Result<f64, ProtocolError> {
        let raw = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(raw);
        Ok(f64::from_le_bytes(arr))
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8], ProtocolError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(ProtocolError::MalformedFrame(format!(
                "negative field length {len} at offset {}",
                self.pos - 4
            )));
        }
        self.take(len as usize)
    }

    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let start = self.pos;
        let raw = self.read_bytes()?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|e| ProtocolError::InvalidUtf8 {
                offset: start,
                reason: e.to_string(),
            })
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::FieldOverrun {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
