//! Integration tests for the depot-core public API.
//!
//! These exercise the frame codec, the stream vocabulary, the reply envelope,
//! the delta codec, and the permission resolver together, the way the server
//! and client crates use them.

use depot_core::domain::delta::{compress, decompress};
use depot_core::protocol::{
    ack, codes, decode_frame, encode_frame, nack, read_reply, FrameFormat, Message,
    SequenceCounter, StreamFrame, TransferProgress,
};
use depot_core::{Attribute, Catalog, PermissionResolver, PermissionSource};

fn roundtrip(msg: &Message, format: FrameFormat) -> Message {
    let counter = SequenceCounter::new();
    let bytes = encode_frame(msg, format, counter.next());
    let (decoded, consumed) = decode_frame(&bytes, format).expect("decode must succeed");
    assert_eq!(consumed, bytes.len(), "all bytes must be consumed");
    decoded
}

// ── Frames ────────────────────────────────────────────────────────────────────

#[test]
fn test_frame_roundtrip_int_and_string() {
    let original = Message::new("T", "K").with_i32(42).with_str("hello");

    let decoded = roundtrip(&original, FrameFormat::Plain);

    assert_eq!(decoded.target(), "T");
    assert_eq!(decoded.kind(), "K");
    let mut fields = decoded.fields();
    assert_eq!(fields.read_i32().unwrap(), 42);
    assert_eq!(fields.read_string().unwrap(), "hello");
    assert!(fields.is_exhausted());
}

#[test]
fn test_frame_roundtrip_empty_string_and_blob_in_both_formats() {
    let original = Message::new("T", "K").with_str("").with_bytes(&[]).with_i32(0);
    for format in [FrameFormat::Plain, FrameFormat::Sequenced] {
        assert_eq!(roundtrip(&original, format), original);
    }
}

#[test]
fn test_stream_of_frames_decodes_in_order() {
    let frames = [
        StreamFrame::ok(),
        StreamFrame::metadata_str("ABC"),
        StreamFrame::Transfer {
            name: "foo.png".to_string(),
            total_size: 5,
            chunk_size: 4,
        },
        StreamFrame::Data(vec![1, 2, 3, 4]),
        StreamFrame::Data(vec![5]),
        StreamFrame::End,
    ];
    let mut wire = Vec::new();
    for frame in &frames {
        wire.extend(encode_frame(&frame.to_message("ASSET_SVR", "DOWNLOAD"), FrameFormat::Plain, 0));
    }

    let mut offset = 0;
    let mut decoded = Vec::new();
    while offset < wire.len() {
        let (msg, n) = decode_frame(&wire[offset..], FrameFormat::Plain).unwrap();
        decoded.push(StreamFrame::from_message(&msg).unwrap());
        offset += n;
    }

    assert_eq!(decoded, frames);
}

#[test]
fn test_data_payloads_complete_transfer_exactly() {
    let mut progress = TransferProgress::new(150_000, 65_536);
    let mut chunks = 0;
    while !progress.is_complete() {
        let len = progress.next_chunk_len();
        progress.record(len).unwrap();
        chunks += 1;
    }
    assert_eq!(chunks, 3);
    assert_eq!(progress.moved(), 150_000);
}

#[test]
fn test_reply_envelope_through_frames() {
    let request = Message::new("ASSET_SVR", "LIST");
    let ok = roundtrip(&ack(&request).with_i32(0), FrameFormat::Plain);
    assert_eq!(read_reply(&ok).unwrap().unwrap().read_i32().unwrap(), 0);

    let denied = roundtrip(&nack(&request, codes::AUTHORIZATION_DENIED, "no"), FrameFormat::Plain);
    assert_eq!(read_reply(&denied).unwrap().unwrap_err().code, codes::AUTHORIZATION_DENIED);
}

// ── Delta ─────────────────────────────────────────────────────────────────────

#[test]
fn test_delta_roundtrip_equal_length_buffers() {
    let cases: [(&[u8], &[u8]); 4] = [
        (b"", b""),
        (b"a", b"b"),
        (&[0u8; 70_000], &[255u8; 70_000]),
        (b"the quick brown fox", b"the quick brown cat"),
    ];
    for (base, updated) in cases {
        assert_eq!(decompress(base, &compress(base, updated)).unwrap(), updated);
    }
}

// ── Permissions ───────────────────────────────────────────────────────────────

#[test]
fn test_deny_overrides_allow_and_fail_closed() {
    let mut catalog = Catalog::new();
    catalog.insert("ASSET_SVR", "DOWNLOAD", Attribute::Allow);
    let mut resolver = PermissionResolver::new(catalog);
    resolver.add_membership("bob", "A");
    resolver.add_membership("bob", "B");
    resolver.set_group_override("A", "ASSET_SVR", "DOWNLOAD", Attribute::Allow);
    resolver.set_group_override("B", "ASSET_SVR", "DOWNLOAD", Attribute::Deny);
    resolver.set_user_override("bob", "BUILD_SVR", "LIST", Attribute::Allow);

    assert!(!resolver.is_allowed("bob", "ASSET_SVR", "DOWNLOAD"));
    assert!(!resolver.is_allowed("bob", "BUILD_SVR", "LIST"));

    let listing = resolver.effective_permissions("bob");
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].source, PermissionSource::Group);
}
