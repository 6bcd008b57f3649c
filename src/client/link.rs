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

use std::collections::VecDeque;
use std::net::SocketAddr;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, info};

use super::transfer::{FileRequest, FileResponse};
use crate::network::{Endpoints, Mode, Token, Transport};
use crate::protocol::{Frame, IntegerReader, Opcode, ProcessStatus, Reader, StringReader};
use crate::{AppError, AppResult};

const KIND_TEXT: u8 = 0;
const KIND_FILE_REQUEST: u8 = 1;
const KIND_FILE_RESPONSE: u8 = 2;

/// One unit exchanged over an established private link:
/// `[kind:1][length:4 BE][UTF-8 bytes]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkPayload {
    Text(String),
    FileRequest(FileRequest),
    FileResponse(FileResponse),
}

impl LinkPayload {
    pub fn kind(&self) -> u8 {
        match self {
            LinkPayload::Text(_) => KIND_TEXT,
            LinkPayload::FileRequest(_) => KIND_FILE_REQUEST,
            LinkPayload::FileResponse(_) => KIND_FILE_RESPONSE,
        }
    }

    fn text(&self) -> String {
        match self {
            LinkPayload::Text(text) => text.clone(),
            LinkPayload::FileRequest(request) => request.to_text(),
            LinkPayload::FileResponse(response) => response.to_text(),
        }
    }

    /// Whether a peer reading with a `max_size` limit accepts this payload.
    pub fn fits(&self, max_size: usize) -> bool {
        self.text().len() <= max_size
    }

    pub fn encode(&self) -> Bytes {
        let text = self.text();
        let mut buffer = BytesMut::with_capacity(1 + 4 + text.len());
        buffer.put_u8(self.kind());
        buffer.put_u32(text.len() as u32);
        buffer.put_slice(text.as_bytes());
        buffer.freeze()
    }

    fn from_parts(kind: u8, text: String) -> AppResult<LinkPayload> {
        match kind {
            KIND_TEXT => Ok(LinkPayload::Text(text)),
            KIND_FILE_REQUEST => Ok(LinkPayload::FileRequest(FileRequest::parse(&text)?)),
            KIND_FILE_RESPONSE => Ok(LinkPayload::FileResponse(FileResponse::parse(&text)?)),
            other => Err(AppError::InvalidValue(format!("link payload kind {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadState {
    WaitingKind,
    WaitingText,
    Done,
    Error,
}

/// Reads [`LinkPayload`]s, at most `max_size` bytes of text each.
#[derive(Debug)]
pub struct PayloadReader {
    state: PayloadState,
    kind: IntegerReader<1>,
    kind_value: u8,
    text: StringReader,
    payload: Option<LinkPayload>,
}

impl PayloadReader {
    pub fn new(max_size: usize) -> Self {
        PayloadReader {
            state: PayloadState::WaitingKind,
            kind: IntegerReader::new(),
            kind_value: 0,
            text: StringReader::new(max_size),
            payload: None,
        }
    }

    fn fail(&mut self) -> ProcessStatus {
        self.state = PayloadState::Error;
        ProcessStatus::Error
    }
}

impl Reader for PayloadReader {
    type Output = LinkPayload;

    fn process(&mut self, buffer: &mut BytesMut) -> ProcessStatus {
        loop {
            match self.state {
                PayloadState::WaitingKind => match self.kind.process(buffer) {
                    ProcessStatus::Done => {
                        self.kind_value = self.kind.take().unwrap_or_default() as u8;
                        self.state = PayloadState::WaitingText;
                    }
                    status => return status,
                },
                PayloadState::WaitingText => match self.text.process(buffer) {
                    ProcessStatus::Done => {
                        let text = self.text.take().unwrap_or_default();
                        match LinkPayload::from_parts(self.kind_value, text) {
                            Ok(payload) => {
                                self.payload = Some(payload);
                                self.state = PayloadState::Done;
                            }
                            Err(err) => {
                                debug!("{}", err);
                                return self.fail();
                            }
                        }
                    }
                    ProcessStatus::Refill => return ProcessStatus::Refill,
                    ProcessStatus::Error => return self.fail(),
                },
                PayloadState::Done => return ProcessStatus::Done,
                PayloadState::Error => return ProcessStatus::Error,
            }
        }
    }

    fn take(&mut self) -> Option<LinkPayload> {
        self.payload.take()
    }

    fn reset(&mut self) {
        self.state = PayloadState::WaitingKind;
        self.kind.reset();
        self.text.reset();
        self.payload = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    /// `LoginPrivate` sent, waiting for `Established`.
    Handshaking,
    Established,
}

/// Client side of a private session: a connection to the server's relay
/// listener that carries [`LinkPayload`]s once both peers are attached.
#[derive(Debug)]
pub struct PrivateLink {
    peer: String,
    session_id: u64,
    token: Token,
    state: LinkState,
    outbox: VecDeque<LinkPayload>,
    requested: VecDeque<String>,
    reader: PayloadReader,
}

impl PrivateLink {
    /// Starts connecting to the relay listener at `relay`.
    pub fn open<T: Transport>(
        endpoints: &mut Endpoints<T>,
        relay: SocketAddr,
        peer: &str,
        session_id: u64,
        max_payload_size: usize,
    ) -> Self {
        let token = endpoints.connect(relay, Mode::raw_after(Opcode::Established));
        debug!(peer, session_id, %token, "opening private link");
        PrivateLink {
            peer: peer.to_string(),
            session_id,
            token,
            state: LinkState::Connecting,
            outbox: VecDeque::new(),
            requested: VecDeque::new(),
            reader: PayloadReader::new(max_payload_size),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == LinkState::Established
    }

    pub fn on_connect<T: Transport>(&mut self, endpoints: &mut Endpoints<T>) {
        endpoints.enqueue(self.token, Frame::login_private(self.session_id));
        self.state = LinkState::Handshaking;
    }

    /// Only `Established` is expected, after which the link is raw.
    pub fn on_frame<T: Transport>(
        &mut self,
        endpoints: &mut Endpoints<T>,
        frame: Frame,
    ) -> AppResult<()> {
        match (self.state, frame) {
            (LinkState::Handshaking, Frame::Established) => {
                info!(peer = %self.peer, session_id = self.session_id, "private link established");
                self.state = LinkState::Established;
                while let Some(payload) = self.outbox.pop_front() {
                    endpoints.enqueue_bytes(self.token, payload.encode());
                }
                Ok(())
            }
            (_, frame) => Err(AppError::InvalidFrame(format!(
                "{:?} on private link with {}",
                frame.opcode(),
                self.peer
            ))),
        }
    }

    /// Sends `payload` now if the link is established, otherwise once it is.
    pub fn send<T: Transport>(&mut self, endpoints: &mut Endpoints<T>, payload: LinkPayload) {
        if let LinkPayload::FileRequest(request) = &payload {
            self.requested.push_back(request.path().to_string());
        }
        if self.is_established() {
            endpoints.enqueue_bytes(self.token, payload.encode());
        } else {
            self.outbox.push_back(payload);
        }
    }

    /// Path of the oldest file request still waiting for its response.
    pub fn take_requested(&mut self) -> Option<String> {
        self.requested.pop_front()
    }

    /// Decodes the payloads received so far.
    pub fn receive<T: Transport>(
        &mut self,
        endpoints: &mut Endpoints<T>,
    ) -> AppResult<Vec<LinkPayload>> {
        let mut payloads = Vec::new();
        if !self.is_established() {
            return Ok(payloads);
        }
        let Some(connection) = endpoints.get_mut(self.token) else {
            return Ok(payloads);
        };
        loop {
            match self.reader.process(connection.input_mut()) {
                ProcessStatus::Done => {
                    if let Some(payload) = self.reader.take() {
                        payloads.push(payload);
                    }
                    self.reader.reset();
                }
                ProcessStatus::Refill => return Ok(payloads),
                ProcessStatus::Error => {
                    return Err(AppError::InvalidValue(format!(
                        "undecodable payload from {}",
                        self.peer
                    )))
                }
            }
        }
    }
}
