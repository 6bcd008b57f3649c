//! Wire protocol.
//!
//! Every frame is `[opcode:1][field...]`, with no outer length prefix: the
//! opcode alone decides how many fields follow. Strings are
//! `[length:4 BE][UTF-8 bytes]`, the session id is 8 bytes big-endian.
//!
//! - [`frame`] holds the frame variants, their validated constructors and the encoder.
//! - [`reader`] holds the resumable primitive readers.
//! - [`frame_reader`] composes them into [`FrameReader`].

pub use frame::{
    FieldLayout, Frame, FrameString, Opcode, MAX_FRAME_SIZE, MAX_STRING_SIZE, SESSION_ID_SIZE,
    STRING_LENGTH_SIZE,
};
pub use frame_reader::{FrameBodyReader, FrameReader};
pub use reader::{IntegerReader, ProcessStatus, Reader, StringReader};

mod frame;
mod frame_reader;
mod reader;
