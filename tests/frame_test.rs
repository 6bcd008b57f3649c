use bytes::BytesMut;
use rstest::rstest;
use stonechat::protocol::{Frame, FrameReader, Opcode, ProcessStatus, Reader, MAX_STRING_SIZE};

fn all_frames() -> Vec<Frame> {
    vec![
        Frame::login("alice").unwrap(),
        Frame::LoginAccepted,
        Frame::LoginRefused,
        Frame::message("alice", "hello, world").unwrap(),
        Frame::message_private("alice", "bob", "héllo ünïcode ✓").unwrap(),
        Frame::request_private("alice", "bob").unwrap(),
        Frame::ok_private("alice", "bob").unwrap(),
        Frame::ko_private("alice", "bob").unwrap(),
        Frame::id_private("alice", "bob", u64::MAX - 7).unwrap(),
        Frame::login_private(0x0102_0304_0506_0708),
        Frame::Established,
        Frame::message("alice", &"x".repeat(MAX_STRING_SIZE)).unwrap(),
    ]
}

/// Feeds `stream` to a fresh reader `chunk` bytes at a time.
fn decode_in_chunks(stream: &[u8], chunk: usize) -> Vec<Frame> {
    let mut reader = FrameReader::new();
    let mut frames = Vec::new();
    for piece in stream.chunks(chunk) {
        let mut buffer = BytesMut::from(piece);
        loop {
            match reader.process(&mut buffer) {
                ProcessStatus::Done => {
                    frames.push(reader.take().unwrap());
                    reader.reset();
                }
                ProcessStatus::Refill => break,
                ProcessStatus::Error => panic!("valid stream rejected"),
            }
        }
        assert!(buffer.is_empty());
    }
    frames
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
#[case(7)]
#[case(64)]
#[case(4096)]
fn test_all_frames_any_chunking(#[case] chunk: usize) {
    let frames = all_frames();
    let mut stream = BytesMut::new();
    for frame in &frames {
        frame.encode(&mut stream);
    }
    assert_eq!(decode_in_chunks(&stream, chunk), frames);
}

#[test]
fn test_wire_layout() {
    let frame = Frame::id_private("a", "bc", 258).unwrap();
    let bytes = frame.to_bytes();
    assert_eq!(
        &bytes[..],
        &[
            Opcode::IdPrivate as u8,
            0, 0, 0, 1, b'a',
            0, 0, 0, 2, b'b', b'c',
            0, 0, 0, 0, 0, 0, 1, 2
        ][..]
    );
    assert_eq!(frame.wire_format_size(), bytes.len());
}

#[test]
fn test_unknown_opcode_is_an_error() {
    let mut reader = FrameReader::new();
    let mut buffer = BytesMut::from(&[42u8, 0, 0][..]);
    assert_eq!(reader.process(&mut buffer), ProcessStatus::Error);
    assert_eq!(reader.process(&mut buffer), ProcessStatus::Error);
    reader.reset();
    let mut buffer = Frame::LoginAccepted.to_bytes();
    assert_eq!(reader.process(&mut buffer), ProcessStatus::Done);
}

#[test]
fn test_oversized_string_is_an_error() {
    let mut buffer = BytesMut::new();
    buffer.extend_from_slice(&[Opcode::Login as u8]);
    buffer.extend_from_slice(&((MAX_STRING_SIZE as u32) + 1).to_be_bytes());
    let mut reader = FrameReader::new();
    assert_eq!(reader.process(&mut buffer), ProcessStatus::Error);
}

#[test]
fn test_invalid_strings_are_refused() {
    assert!(Frame::login("").is_err());
    assert!(Frame::login("   ").is_err());
    assert!(Frame::message("alice", &"x".repeat(MAX_STRING_SIZE + 1)).is_err());
}
