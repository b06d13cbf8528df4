//! Control vocabulary of the chunked streaming-transfer sub-protocol.
//!
//! Every stream message is an ordinary [`Message`] addressed to the owning
//! service, whose first field is an int32 [`StreamTag`]:
//!
//! | Tag              | Value | Fields after the tag                    |
//! |------------------|-------|-----------------------------------------|
//! | `METADATA`       | 0     | `bytes`                                 |
//! | `TRANSFER`       | 1     | `name:string total:int64 chunk:int32`   |
//! | `DATA`           | 2     | `bytes`                                 |
//! | `PROTOCOL_ERROR` | 3     | `code:int32 message:string`             |
//! | `OPEN`           | 4     | `name:string checksum:string`           |
//! | `STATUS`         | 254   | `code:int32 message:string` (0 = ok)    |
//! | `END`            | 255   | (none)                                  |
//!
//! An empty checksum in `OPEN` means the caller has no previous copy.
//!
//! # Example exchange (download, cache miss)
//!
//! ```text
//! client                       server
//! OPEN("foo.png","OLD")  ───►
//!                        ◄───  STATUS(ok)
//!                        ◄───  METADATA("ABC")
//!                        ◄───  TRANSFER("foo.png", 150000, 65536)
//!                        ◄───  DATA × 3
//!                        ◄───  END
//! ```

use thiserror::Error;

use crate::protocol::codec::ProtocolError;
use crate::protocol::message::Message;

/// Status code carried by a successful `STATUS`.
pub const STATUS_OK: i32 = 0;

/// Default DATA chunk size.
pub const DEFAULT_CHUNK_SIZE: u32 = 64 * 1024;

/// Leading int32 of every stream control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StreamTag {
    Metadata = 0,
    Transfer = 1,
    Data = 2,
    ProtocolError = 3,
    Open = 4,
    Status = 254,
    End = 255,
}

impl TryFrom<i32> for StreamTag {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(StreamTag::Metadata),
            1 => Ok(StreamTag::Transfer),
            2 => Ok(StreamTag::Data),
            3 => Ok(StreamTag::ProtocolError),
            4 => Ok(StreamTag::Open),
            254 => Ok(StreamTag::Status),
            255 => Ok(StreamTag::End),
            other => Err(ProtocolError::UnknownStreamTag(other)),
        }
    }
}

/// A typed stream control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Open {
        name: String,
        checksum: Option<String>,
    },
    Metadata(Vec<u8>),
    Transfer {
        name: String,
        total_size: u64,
        chunk_size: u32,
    },
    Data(Vec<u8>),
    Status {
        code: i32,
        message: String,
    },
    ProtocolError {
        code: i32,
        message: String,
    },
    End,
}

impl StreamFrame {
    /// `STATUS(ok)`.
    pub fn ok() -> Self {
        StreamFrame::Status {
            code: STATUS_OK,
            message: String::new(),
        }
    }

    /// `STATUS(error)` with the given code.
    pub fn error(code: i32, message: impl Into<String>) -> Self {
        debug_assert_ne!(code, STATUS_OK, "an error status needs a non-zero code");
        StreamFrame::Status {
            code,
            message: message.into(),
        }
    }

    /// `METADATA` carrying a UTF-8 string such as a checksum.
    pub fn metadata_str(value: &str) -> Self {
        StreamFrame::Metadata(value.as_bytes().to_vec())
    }

    pub fn tag(&self) -> StreamTag {
        match self {
            StreamFrame::Open { .. } => StreamTag::Open,
            StreamFrame::Metadata(_) => StreamTag::Metadata,
            StreamFrame::Transfer { .. } => StreamTag::Transfer,
            StreamFrame::Data(_) => StreamTag::Data,
            StreamFrame::Status { .. } => StreamTag::Status,
            StreamFrame::ProtocolError { .. } => StreamTag::ProtocolError,
            StreamFrame::End => StreamTag::End,
        }
    }

    /// Returns `true` for `STATUS(ok)`.
    pub fn is_ok_status(&self) -> bool {
        matches!(self, StreamFrame::Status { code, .. } if *code == STATUS_OK)
    }

    /// Encodes this frame as a message addressed to `(target, kind)`.
    pub fn to_message(&self, target: &str, kind: &str) -> Message {
        let mut msg = Message::new(target, kind);
        msg.push_i32(self.tag() as i32);
        match self {
            StreamFrame::Open { name, checksum } => {
                msg.push_str(name).push_str(checksum.as_deref().unwrap_or(""));
            }
            StreamFrame::Metadata(bytes) | StreamFrame::Data(bytes) => {
                msg.push_bytes(bytes);
            }
            StreamFrame::Transfer {
                name,
                total_size,
                chunk_size,
            } => {
                msg.push_str(name)
                    .push_i64(*total_size as i64)
                    .push_i32(*chunk_size as i32);
            }
            StreamFrame::Status { code, message } | StreamFrame::ProtocolError { code, message } => {
                msg.push_i32(*code).push_str(message);
            }
            StreamFrame::End => {}
        }
        msg
    }

    /// Decodes a stream control message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownStreamTag`] for a tag outside the
    /// vocabulary, [`ProtocolError::MalformedFrame`] for out-of-range sizes,
    /// and field errors when the message is shorter than its tag requires.
    pub fn from_message(msg: &Message) -> Result<Self, ProtocolError> {
        let mut r = msg.fields();
        let tag = StreamTag::try_from(r.read_i32()?)?;
        let frame = match tag {
            StreamTag::Open => {
                let name = r.read_string()?;
                let checksum = r.read_string()?;
                StreamFrame::Open {
                    name,
                    checksum: (!checksum.is_empty()).then_some(checksum),
                }
            }
            StreamTag::Metadata => StreamFrame::Metadata(r.read_bytes()?.to_vec()),
            StreamTag::Transfer => {
                let name = r.read_string()?;
                let total = r.read_i64()?;
                let chunk = r.read_i32()?;
                if total < 0 {
                    return Err(ProtocolError::MalformedFrame(format!(
                        "negative transfer size {total}"
                    )));
                }
                if chunk <= 0 {
                    return Err(ProtocolError::MalformedFrame(format!(
                        "chunk size must be positive, got {chunk}"
                    )));
                }
                StreamFrame::Transfer {
                    name,
                    total_size: total as u64,
                    chunk_size: chunk as u32,
                }
            }
            StreamTag::Data => StreamFrame::Data(r.read_bytes()?.to_vec()),
            StreamTag::Status => StreamFrame::Status {
                code: r.read_i32()?,
                message: r.read_string()?,
            },
            StreamTag::ProtocolError => StreamFrame::ProtocolError {
                code: r.read_i32()?,
                message: r.read_string()?,
            },
            StreamTag::End => StreamFrame::End,
        };
        Ok(frame)
    }
}

// ── Progress accounting ───────────────────────────────────────────────────────

/// A DATA chunk would carry the transfer past its declared size.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("chunk of {chunk} bytes overflows transfer: {received} of {total} already received")]
pub struct ProgressOverflow {
    pub total: u64,
    pub received: u64,
    pub chunk: usize,
}

/// Byte accounting shared by both ends of a transfer.
///
/// A transfer is complete exactly when the bytes moved equal the declared
/// total size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    total: u64,
    moved: u64,
    chunk_size: u32,
}

impl TransferProgress {
    pub fn new(total: u64, chunk_size: u32) -> Self {
        Self {
            total,
            moved: 0,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn moved(&self) -> u64 {
        self.moved
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn remaining(&self) -> u64 {
        self.total - self.moved
    }

    pub fn is_complete(&self) -> bool {
        self.moved == self.total
    }

    /// Size of the next chunk a sender should emit; the last one may be short.
    pub fn next_chunk_len(&self) -> usize {
        self.remaining().min(u64::from(self.chunk_size)) as usize
    }

    /// Records `len` more bytes and returns whether the transfer is now complete.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressOverflow`] if `len` would exceed the declared total;
    /// the recorded count is left unchanged.
    pub fn record(&mut self, len: usize) -> Result<bool, ProgressOverflow> {
        if len as u64 > self.remaining() {
            return Err(ProgressOverflow {
                total: self.total,
                received: self.moved,
                chunk: len,
            });
        }
        self.moved += len as u64;
        Ok(self.is_complete())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
