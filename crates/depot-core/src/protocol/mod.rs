//! Protocol module containing the message envelope, the binary frame codec,
//! the ACK/NACK reply envelope, and the streaming-transfer vocabulary.

pub mod codec;
pub mod envelope;
pub mod message;
pub mod sequence;
pub mod services;
pub mod stream;

pub use codec::{
    decode_frame, decode_payload, encode_frame, encode_payload, parse_length_prefix, FrameFormat,
    ProtocolError, DEFAULT_MAX_FRAME_BYTES,
};
pub use envelope::{ack, codes, nack, read_reply, Nack};
pub use message::{FieldReader, Message};
pub use sequence::SequenceCounter;
pub use stream::{ProgressOverflow, StreamFrame, StreamTag, TransferProgress, STATUS_OK};
