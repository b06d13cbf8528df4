//! ACK/NACK response envelope used by every non-streaming reply.
//!
//! ```text
//! success: ["ACK"][reply fields...]
//! failure: ["NACK"][code:int32][message:string]
//! ```
//!
//! A reply keeps the `(target, kind)` of the request it answers, so the
//! calling side can match replies to requests without a correlation id.

use crate::protocol::codec::ProtocolError;
use crate::protocol::message::{FieldReader, Message};

pub const ACK: &str = "ACK";
pub const NACK: &str = "NACK";

/// Well-known NACK codes.
///
/// Handlers may use any other value for application-specific failures.
pub mod codes {
    /// Malformed request or a sequence violation.
    pub const BAD_REQUEST: i32 = 400;
    /// Not logged in, or the user lacks the permission.
    pub const AUTHORIZATION_DENIED: i32 = 401;
    /// Login rejected.
    pub const INVALID_CREDENTIALS: i32 = 403;
    /// The named resource does not exist.
    pub const NOT_FOUND: i32 = 404;
    /// Unexpected server-side failure.
    pub const INTERNAL: i32 = 500;
}

/// A decoded NACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nack {
    pub code: i32,
    pub message: String,
}

/// Starts an `ACK` reply to `request`; append reply fields to the result.
pub fn ack(request: &Message) -> Message {
    Message::new(request.target(), request.kind()).with_str(ACK)
}

/// Builds a complete `NACK` reply to `request`.
pub fn nack(request: &Message, code: i32, message: &str) -> Message {
    Message::new(request.target(), request.kind())
        .with_str(NACK)
        .with_i32(code)
        .with_str(message)
}

/// Reads the envelope head of a reply.
///
/// On `Ok(Ok(reader))` the reader is positioned at the first reply field.
///
/// # Errors
///
/// Returns a [`ProtocolError`] when the reply does not start with a valid
/// envelope.
pub fn read_reply(reply: &Message) -> Result<Result<FieldReader<'_>, Nack>, ProtocolError> {
    let mut reader = reply.fields();
    let status = reader.read_string()?;
    match status.as_str() {
        ACK => Ok(Ok(reader)),
        NACK => {
            let code = reader.read_i32()?;
            let message = reader.read_string()?;
            Ok(Err(Nack { code, message }))
        }
        other => Err(ProtocolError::MalformedFrame(format!(
            "reply status must be ACK or NACK, got {other:?}"
        ))),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
