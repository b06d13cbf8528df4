//! Binary framing for Depot protocol messages.
//!
//! Wire format:
//! ```text
//! plain:     [length:4][payload:length]
//! sequenced: [length:4][message_id:4][payload:length]
//!
//! payload:   [target_len:4][target][kind_len:4][kind][fields...]
//! ```
//! All integers are little-endian.  `length` counts payload bytes only; the
//! optional message id of the sequenced variant is written for future
//! request correlation and skipped on read.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::message::{write_blob, FieldReader, Message};

/// Size of the `length` prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the reserved message id carried by [`FrameFormat::Sequenced`].
pub const MESSAGE_ID_SIZE: usize = 4;

/// Largest payload accepted unless the caller configures otherwise.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Errors that can occur while decoding frames or reading fields.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// The frame header or envelope strings do not fit the available bytes,
    /// or a declared length is out of range.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A field read asked for more bytes than the message body holds.
    #[error("field overrun: need {needed} bytes, {remaining} remaining")]
    FieldOverrun { needed: usize, remaining: usize },

    /// A string field was not valid UTF-8.
    #[error("invalid UTF-8 in string field at offset {offset}: {reason}")]
    InvalidUtf8 { offset: usize, reason: String },

    /// A stream control message carried a tag outside the vocabulary.
    #[error("unknown stream tag: {0}")]
    UnknownStreamTag(i32),
}

/// Which frame header layout a connection uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    /// `[length][payload]`
    #[default]
    Plain,
    /// `[length][message_id][payload]`
    Sequenced,
}

impl FrameFormat {
    /// Number of bytes preceding the payload.
    pub fn header_size(self) -> usize {
        match self {
            FrameFormat::Plain => LENGTH_PREFIX_SIZE,
            FrameFormat::Sequenced => LENGTH_PREFIX_SIZE + MESSAGE_ID_SIZE,
        }
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encodes the payload portion (target, kind, fields) of `msg`.
pub fn encode_payload(msg: &Message) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + msg.target().len() + msg.kind().len() + msg.body().len());
    write_blob(&mut buf, msg.target().as_bytes());
    write_blob(&mut buf, msg.kind().as_bytes());
    buf.extend_from_slice(msg.body());
    buf
}

/// Encodes `msg` as one complete frame.
///
/// `message_id` is only written for [`FrameFormat::Sequenced`].  Encoding
/// never fails.
///
/// # Examples
///
/// ```rust
/// use depot_core::protocol::{decode_frame, encode_frame, FrameFormat, Message};
///
/// let msg = Message::new("T", "K").with_i32(42).with_str("hello");
/// let bytes = encode_frame(&msg, FrameFormat::Plain, 0);
/// let (decoded, consumed) = decode_frame(&bytes, FrameFormat::Plain).unwrap();
/// assert_eq!(decoded, msg);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_frame(msg: &Message, format: FrameFormat, message_id: u32) -> Vec<u8> {
    let payload = encode_payload(msg);
    let mut buf = Vec::with_capacity(format.header_size() + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    if format == FrameFormat::Sequenced {
        buf.extend_from_slice(&message_id.to_le_bytes());
    }
    buf.extend_from_slice(&payload);
    buf
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Interprets a 4-byte length prefix, rejecting lengths above `max_frame_bytes`.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedFrame`] when the declared length is
/// larger than the configured maximum.
pub fn parse_length_prefix(prefix: [u8; 4], max_frame_bytes: usize) -> Result<usize, ProtocolError> {
    let len = u32::from_le_bytes(prefix) as usize;
    if len > max_frame_bytes {
        return Err(ProtocolError::MalformedFrame(format!(
            "declared length {len} exceeds maximum {max_frame_bytes}"
        )));
    }
    Ok(len)
}

/// Decodes a payload that has already been separated from its frame header.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedFrame`] if the target or kind strings
/// overrun the payload, and [`ProtocolError::InvalidUtf8`] if either is not
/// valid UTF-8.
pub fn decode_payload(payload: &[u8]) -> Result<Message, ProtocolError> {
    let mut reader = FieldReader::new(payload);
    let target = read_envelope_string(&mut reader, "target")?;
    let kind = read_envelope_string(&mut reader, "kind")?;
    Ok(Message::from_parts(target, kind, reader.rest().to_vec()))
}

/// Decodes one frame from the beginning of `bytes`.
///
/// Returns the message and the number of bytes consumed so the caller can
/// advance past it.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedFrame`] when the header is incomplete,
/// the declared length exceeds the bytes available, or the envelope strings
/// overrun the payload.
pub fn decode_frame(bytes: &[u8], format: FrameFormat) -> Result<(Message, usize), ProtocolError> {
    let header_size = format.header_size();
    if bytes.len() < header_size {
        return Err(ProtocolError::MalformedFrame(format!(
            "need {header_size} header bytes, got {}",
            bytes.len()
        )));
    }
    let declared = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let available = bytes.len() - header_size;
    if declared > available {
        return Err(ProtocolError::MalformedFrame(format!(
            "declared length {declared} exceeds available {available}"
        )));
    }
    // bytes[4..8] hold the message id for sequenced frames; not consulted.
    let payload = &bytes[header_size..header_size + declared];
    let msg = decode_payload(payload)?;
    Ok((msg, header_size + declared))
}

fn read_envelope_string(reader: &mut FieldReader<'_>, what: &str) -> Result<String, ProtocolError> {
    reader.read_string().map_err(|e| match e {
        ProtocolError::FieldOverrun { needed, remaining } => ProtocolError::MalformedFrame(format!(
            "{what}: need {needed} bytes, {remaining} remaining"
        )),
        other => other,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
