// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bytes::{Buf, BytesMut};

use super::frame::STRING_LENGTH_SIZE;

/// Outcome of one [`Reader::process`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// A complete value is available through [`Reader::take`].
    Done,
    /// Every available byte has been consumed and more are needed.
    Refill,
    /// The bytes violate the format. The reader stays in this state until reset.
    Error,
}

/// A resumable parser.
///
/// `process` consumes bytes from the front of `buffer` and keeps whatever it
/// needs internally, so a value may arrive split across any number of calls.
/// It never waits: missing bytes always yield `Refill`, never `Error`.
pub trait Reader {
    type Output;

    fn process(&mut self, buffer: &mut BytesMut) -> ProcessStatus;

    /// Hands out the value once `process` returned `Done`.
    fn take(&mut self) -> Option<Self::Output>;

    /// Back to the initial state, keeping allocated storage for the next value.
    fn reset(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntegerState {
    Waiting,
    Done,
}

/// Reads an `N` byte big-endian unsigned integer, `N` in `1..=8`.
#[derive(Debug)]
pub struct IntegerReader<const N: usize> {
    bytes: [u8; N],
    filled: usize,
    state: IntegerState,
}

impl<const N: usize> Default for IntegerReader<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> IntegerReader<N> {
    pub fn new() -> Self {
        debug_assert!((1..=8).contains(&N), "integer width {} out of range", N);
        IntegerReader {
            bytes: [0; N],
            filled: 0,
            state: IntegerState::Waiting,
        }
    }

    fn value(&self) -> u64 {
        self.bytes
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
    }
}

impl<const N: usize> Reader for IntegerReader<N> {
    type Output = u64;

    fn process(&mut self, buffer: &mut BytesMut) -> ProcessStatus {
        if self.state == IntegerState::Done {
            return ProcessStatus::Done;
        }
        let wanted = (N - self.filled).min(buffer.remaining());
        buffer.copy_to_slice(&mut self.bytes[self.filled..self.filled + wanted]);
        self.filled += wanted;
        if self.filled < N {
            return ProcessStatus::Refill;
        }
        self.state = IntegerState::Done;
        ProcessStatus::Done
    }

    fn take(&mut self) -> Option<u64> {
        match self.state {
            IntegerState::Done => Some(self.value()),
            IntegerState::Waiting => None,
        }
    }

    fn reset(&mut self) {
        self.filled = 0;
        self.state = IntegerState::Waiting;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StringState {
    WaitingLength,
    WaitingBody,
    Done,
    Error,
}

/// Reads a `[length:4 BE][UTF-8 bytes]` string.
///
/// A declared length above `max_size` is rejected before any body byte is read,
/// so a peer can not make the reader buffer an arbitrary amount of data.
#[derive(Debug)]
pub struct StringReader {
    max_size: usize,
    length: IntegerReader<STRING_LENGTH_SIZE>,
    size: usize,
    body: BytesMut,
    value: Option<String>,
    state: StringState,
}

impl StringReader {
    pub fn new(max_size: usize) -> Self {
        StringReader {
            max_size,
            length: IntegerReader::new(),
            size: 0,
            body: BytesMut::new(),
            value: None,
            state: StringState::WaitingLength,
        }
    }

    fn fail(&mut self) -> ProcessStatus {
        self.state = StringState::Error;
        ProcessStatus::Error
    }
}

impl Reader for StringReader {
    type Output = String;

    fn process(&mut self, buffer: &mut BytesMut) -> ProcessStatus {
        loop {
            match self.state {
                StringState::WaitingLength => match self.length.process(buffer) {
                    ProcessStatus::Done => {
                        let size = self.length.take().unwrap_or_default() as usize;
                        if size > self.max_size {
                            tracing::debug!(size, max = self.max_size, "string length rejected");
                            return self.fail();
                        }
                        self.size = size;
                        self.body.reserve(size);
                        self.state = StringState::WaitingBody;
                    }
                    ProcessStatus::Refill => return ProcessStatus::Refill,
                    ProcessStatus::Error => return self.fail(),
                },
                StringState::WaitingBody => {
                    let wanted = (self.size - self.body.len()).min(buffer.remaining());
                    self.body.extend_from_slice(&buffer[..wanted]);
                    buffer.advance(wanted);
                    if self.body.len() < self.size {
                        return ProcessStatus::Refill;
                    }
                    match std::str::from_utf8(&self.body) {
                        Ok(value) => {
                            self.value = Some(value.to_string());
                            self.state = StringState::Done;
                        }
                        Err(err) => {
                            tracing::debug!(error = %err, "string body is not utf-8");
                            return self.fail();
                        }
                    }
                }
                StringState::Done => return ProcessStatus::Done,
                StringState::Error => return ProcessStatus::Error,
            }
        }
    }

    fn take(&mut self) -> Option<String> {
        self.value.take()
    }

    fn reset(&mut self) {
        self.length.reset();
        self.size = 0;
        self.body.clear();
        self.value = None;
        self.state = StringState::WaitingLength;
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;

    use super::*;

    fn encoded_string(value: &str) -> BytesMut {
        let mut buffer = BytesMut::new();
        buffer.put_u32(value.len() as u32);
        buffer.put_slice(value.as_bytes());
        buffer
    }

    #[test]
    fn test_integer_reader_resumes() {
        let mut reader = IntegerReader::<8>::new();
        let mut buffer = BytesMut::from(&[0u8, 0, 0, 0][..]);
        assert_eq!(reader.process(&mut buffer), ProcessStatus::Refill);
        assert!(buffer.is_empty());
        assert_eq!(reader.take(), None);

        buffer.put_slice(&[0, 0, 1, 2, 0xff]);
        assert_eq!(reader.process(&mut buffer), ProcessStatus::Done);
        assert_eq!(reader.take(), Some(0x0102));
        // the extra byte belongs to whatever comes next
        assert_eq!(&buffer[..], &[0xff]);

        reader.reset();
        assert_eq!(reader.process(&mut buffer), ProcessStatus::Refill);
    }

    #[test]
    fn test_integer_reader_single_byte() {
        let mut reader = IntegerReader::<1>::new();
        let mut buffer = BytesMut::from(&[7u8][..]);
        assert_eq!(reader.process(&mut buffer), ProcessStatus::Done);
        assert_eq!(reader.take(), Some(7));
    }

    #[test]
    fn test_string_reader_whole_buffer() {
        let mut reader = StringReader::new(1024);
        let mut buffer = encoded_string("coline");
        buffer.put_slice(b"rest");
        assert_eq!(reader.process(&mut buffer), ProcessStatus::Done);
        assert_eq!(reader.take().as_deref(), Some("coline"));
        assert_eq!(&buffer[..], b"rest");
    }

    #[test]
    fn test_string_reader_byte_by_byte() {
        let mut reader = StringReader::new(1024);
        let encoded = encoded_string("héllo wörld");
        let mut buffer = BytesMut::new();
        for (index, byte) in encoded.iter().enumerate() {
            buffer.put_u8(*byte);
            let status = reader.process(&mut buffer);
            if index + 1 < encoded.len() {
                assert_eq!(status, ProcessStatus::Refill);
            } else {
                assert_eq!(status, ProcessStatus::Done);
            }
            // everything offered is consumed
            assert!(buffer.is_empty());
        }
        assert_eq!(reader.take().as_deref(), Some("héllo wörld"));
    }

    #[test]
    fn test_string_reader_rejects_oversized_length() {
        let mut reader = StringReader::new(16);
        let mut buffer = BytesMut::new();
        buffer.put_u32(17);
        assert_eq!(reader.process(&mut buffer), ProcessStatus::Error);
        // stays in error until reset
        buffer.put_slice(&encoded_string("ok"));
        assert_eq!(reader.process(&mut buffer), ProcessStatus::Error);

        reader.reset();
        assert_eq!(reader.process(&mut buffer), ProcessStatus::Done);
        assert_eq!(reader.take().as_deref(), Some("ok"));
    }

    #[test]
    fn test_string_reader_rejects_invalid_utf8() {
        let mut reader = StringReader::new(16);
        let mut buffer = BytesMut::new();
        buffer.put_u32(2);
        buffer.put_slice(&[0xc3, 0x28]);
        assert_eq!(reader.process(&mut buffer), ProcessStatus::Error);
    }

    #[test]
    fn test_string_reader_empty_string() {
        let mut reader = StringReader::new(16);
        let mut buffer = encoded_string("");
        assert_eq!(reader.process(&mut buffer), ProcessStatus::Done);
        assert_eq!(reader.take().as_deref(), Some(""));
    }

    #[test]
    fn test_string_reader_reset_keeps_capacity() {
        let mut reader = StringReader::new(1024);
        let mut buffer = encoded_string(&"x".repeat(512));
        assert_eq!(reader.process(&mut buffer), ProcessStatus::Done);
        let capacity = reader.body.capacity();
        reader.reset();
        assert!(reader.body.is_empty());
        assert_eq!(reader.body.capacity(), capacity);
    }
}
