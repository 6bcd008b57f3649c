use std::mem;

use bytes::{Buf, BytesMut};
use tracing::debug;

use super::frame::{FieldLayout, Frame, Opcode, MAX_STRING_SIZE, SESSION_ID_SIZE};
use super::reader::{IntegerReader, ProcessStatus, Reader, StringReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyState {
    Idle,
    Waiting,
    Done,
    Error,
}

/// Reads the fields that follow an opcode: up to three strings, then an
/// optional session id, and turns them into a [`Frame`].
#[derive(Debug)]
pub struct FrameBodyReader {
    opcode: Option<Opcode>,
    layout: FieldLayout,
    string_reader: StringReader,
    integer_reader: IntegerReader<SESSION_ID_SIZE>,
    strings: Vec<String>,
    integer: Option<u64>,
    frame: Option<Frame>,
    state: BodyState,
}

impl Default for FrameBodyReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBodyReader {
    pub fn new() -> Self {
        FrameBodyReader {
            opcode: None,
            layout: FieldLayout {
                strings: 0,
                integer: false,
            },
            string_reader: StringReader::new(MAX_STRING_SIZE),
            integer_reader: IntegerReader::new(),
            strings: Vec::with_capacity(3),
            integer: None,
            frame: None,
            state: BodyState::Idle,
        }
    }

    pub fn for_opcode(opcode: Opcode) -> Self {
        let mut reader = Self::new();
        reader.select(opcode);
        reader
    }

    /// Prepares the reader for the body of `opcode`.
    pub fn select(&mut self, opcode: Opcode) {
        self.reset();
        self.opcode = Some(opcode);
        self.layout = opcode.layout();
        self.state = BodyState::Waiting;
    }

    fn fail(&mut self) -> ProcessStatus {
        self.state = BodyState::Error;
        ProcessStatus::Error
    }
}

impl Reader for FrameBodyReader {
    type Output = Frame;

    fn process(&mut self, buffer: &mut BytesMut) -> ProcessStatus {
        let opcode = match (self.state, self.opcode) {
            (BodyState::Done, _) => return ProcessStatus::Done,
            (BodyState::Error, _) | (BodyState::Idle, _) | (_, None) => return self.fail(),
            (BodyState::Waiting, Some(opcode)) => opcode,
        };

        while self.strings.len() < self.layout.strings {
            match self.string_reader.process(buffer) {
                ProcessStatus::Done => {
                    let value = self.string_reader.take().unwrap_or_default();
                    self.strings.push(value);
                    self.string_reader.reset();
                }
                ProcessStatus::Refill => return ProcessStatus::Refill,
                ProcessStatus::Error => return self.fail(),
            }
        }

        if self.layout.integer && self.integer.is_none() {
            match self.integer_reader.process(buffer) {
                ProcessStatus::Done => self.integer = self.integer_reader.take(),
                ProcessStatus::Refill => return ProcessStatus::Refill,
                ProcessStatus::Error => return self.fail(),
            }
        }

        match Frame::from_parts(opcode, mem::take(&mut self.strings), self.integer) {
            Ok(frame) => {
                self.frame = Some(frame);
                self.state = BodyState::Done;
                ProcessStatus::Done
            }
            Err(err) => {
                debug!(?opcode, error = %err, "frame body rejected");
                self.fail()
            }
        }
    }

    fn take(&mut self) -> Option<Frame> {
        self.frame.take()
    }

    fn reset(&mut self) {
        self.opcode = None;
        self.string_reader.reset();
        self.integer_reader.reset();
        self.strings.clear();
        self.integer = None;
        self.frame = None;
        self.state = BodyState::Idle;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    WaitingOpcode,
    WaitingBody,
    Done,
    Error,
}

/// Reads one complete frame: the opcode byte, then the body it announces.
///
/// `LoginAccepted`, `LoginRefused` and `Established` have no body and are done
/// as soon as their opcode has been read.
#[derive(Debug)]
pub struct FrameReader {
    state: FrameState,
    body: FrameBodyReader,
    frame: Option<Frame>,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader {
    pub fn new() -> Self {
        FrameReader {
            state: FrameState::WaitingOpcode,
            body: FrameBodyReader::new(),
            frame: None,
        }
    }

    fn fail(&mut self) -> ProcessStatus {
        self.state = FrameState::Error;
        ProcessStatus::Error
    }
}

impl Reader for FrameReader {
    type Output = Frame;

    fn process(&mut self, buffer: &mut BytesMut) -> ProcessStatus {
        loop {
            match self.state {
                FrameState::WaitingOpcode => {
                    if !buffer.has_remaining() {
                        return ProcessStatus::Refill;
                    }
                    let opcode = match Opcode::try_from(buffer.get_u8()) {
                        Ok(opcode) => opcode,
                        Err(err) => {
                            debug!(error = %err, "frame rejected");
                            return self.fail();
                        }
                    };
                    if opcode.layout().is_empty() {
                        return match Frame::from_parts(opcode, Vec::new(), None) {
                            Ok(frame) => {
                                self.frame = Some(frame);
                                self.state = FrameState::Done;
                                ProcessStatus::Done
                            }
                            Err(_) => self.fail(),
                        };
                    }
                    self.body.select(opcode);
                    self.state = FrameState::WaitingBody;
                }
                FrameState::WaitingBody => {
                    return match self.body.process(buffer) {
                        ProcessStatus::Done => {
                            self.frame = self.body.take();
                            self.state = FrameState::Done;
                            ProcessStatus::Done
                        }
                        ProcessStatus::Refill => ProcessStatus::Refill,
                        ProcessStatus::Error => self.fail(),
                    };
                }
                FrameState::Done => return ProcessStatus::Done,
                FrameState::Error => return ProcessStatus::Error,
            }
        }
    }

    fn take(&mut self) -> Option<Frame> {
        self.frame.take()
    }

    fn reset(&mut self) {
        self.state = FrameState::WaitingOpcode;
        self.body.reset();
        self.frame = None;
    }
}
