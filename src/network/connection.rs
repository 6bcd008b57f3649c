use std::collections::VecDeque;
use std::io::ErrorKind;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use super::interest::{compute_interest, BufferState, Interest};
use super::transport::Transport;
use crate::protocol::{Frame, FrameReader, Opcode, ProcessStatus, Reader};
use crate::{AppError, AppResult};

/// Something waiting in a connection's outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Copied into the output buffer only once it fits as a whole.
    Frame(Frame),
    /// Opaque bytes, copied piecewise as room frees up.
    Bytes(Bytes),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Input is decoded into frames. Once a frame with the `raw_after` opcode
    /// has been decoded, the connection turns [`Mode::Raw`] and the bytes
    /// after it stay in the input buffer.
    Framed { raw_after: Option<Opcode> },
    /// Input bytes are left for the owner of the connection to consume.
    Raw,
}

impl Mode {
    pub fn framed() -> Mode {
        Mode::Framed { raw_after: None }
    }

    pub fn raw_after(opcode: Opcode) -> Mode {
        Mode::Framed {
            raw_after: Some(opcode),
        }
    }
}

/// One non-blocking endpoint: bounded input and output buffers, a frame
/// decoder and a queue of outbound items waiting for room in the output
/// buffer.
///
/// The connection never blocks. The reactor calls [`Connection::on_readable`]
/// and [`Connection::on_writable`] when the transport is ready and asks
/// [`Connection::interest`] what to wait for next.
#[derive(Debug)]
pub struct Connection<T> {
    transport: T,
    capacity: usize,
    input: BytesMut,
    output: BytesMut,
    reader: FrameReader,
    queue: VecDeque<Outbound>,
    mode: Mode,
    peer_closed: bool,
    corrupted: bool,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T, capacity: usize) -> Self {
        Self::with_mode(transport, capacity, Mode::framed())
    }

    /// `capacity` bounds each buffer. It must hold the largest frame.
    pub fn with_mode(transport: T, capacity: usize, mode: Mode) -> Self {
        Connection {
            transport,
            capacity,
            input: BytesMut::with_capacity(capacity),
            output: BytesMut::with_capacity(capacity),
            reader: FrameReader::new(),
            queue: VecDeque::new(),
            mode,
            peer_closed: false,
            corrupted: false,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_peer_closed(&self) -> bool {
        self.peer_closed
    }

    /// Bytes received but not consumed yet. In raw mode the caller consumes
    /// them straight from this buffer.
    pub fn input_mut(&mut self) -> &mut BytesMut {
        &mut self.input
    }

    /// Bytes accepted for sending but not written to the transport yet.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn input_free(&self) -> usize {
        self.capacity.saturating_sub(self.input.len())
    }

    fn output_free(&self) -> usize {
        self.capacity.saturating_sub(self.output.len())
    }

    /// Reads what the transport has, bounded by the free input space, and
    /// returns every frame that became complete.
    ///
    /// A transport error is returned and the connection should be closed.
    /// Undecodable input does not fail the call: the frames decoded before it
    /// are returned and the connection reports [`Interest::None`] from then on.
    pub fn on_readable(&mut self) -> AppResult<Vec<Frame>> {
        let free = self.input_free();
        if free > 0 && !self.peer_closed {
            match self.transport.try_read_buf(&mut self.input, free) {
                Ok(0) => {
                    debug!("peer closed its side of the connection");
                    self.peer_closed = true;
                }
                Ok(count) => trace!(count, "bytes read"),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(self.decode())
    }

    fn decode(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Mode::Framed { raw_after } = self.mode {
            if self.corrupted {
                break;
            }
            match self.reader.process(&mut self.input) {
                ProcessStatus::Done => {
                    let Some(frame) = self.reader.take() else {
                        break;
                    };
                    self.reader.reset();
                    if raw_after == Some(frame.opcode()) {
                        self.mode = Mode::Raw;
                    }
                    frames.push(frame);
                }
                ProcessStatus::Refill => break,
                ProcessStatus::Error => {
                    warn!("undecodable input, dropping connection");
                    self.corrupted = true;
                }
            }
        }
        frames
    }

    /// Writes as much of the output buffer as the transport takes, then
    /// refills it from the queue.
    pub fn on_writable(&mut self) -> AppResult<()> {
        if !self.output.is_empty() {
            match self.transport.try_write(&self.output) {
                Ok(0) => return Err(AppError::TransportClosed),
                Ok(count) => {
                    trace!(count, "bytes written");
                    self.output.advance(count);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                Err(err) => return Err(err.into()),
            }
        }
        self.drain_queue();
        Ok(())
    }

    pub fn enqueue(&mut self, frame: Frame) {
        self.queue.push_back(Outbound::Frame(frame));
        self.drain_queue();
    }

    pub fn enqueue_bytes(&mut self, bytes: Bytes) {
        if bytes.is_empty() {
            return;
        }
        self.queue.push_back(Outbound::Bytes(bytes));
        self.drain_queue();
    }

    /// Moves queued items into the output buffer in order and returns the
    /// number of bytes copied. A frame that does not fit as a whole stays
    /// at the head of the queue and blocks everything behind it.
    pub fn drain_queue(&mut self) -> usize {
        let mut copied = 0;
        while let Some(head) = self.queue.front_mut() {
            let free = self.capacity.saturating_sub(self.output.len());
            match head {
                Outbound::Frame(frame) => {
                    let size = frame.wire_format_size();
                    if size > free {
                        break;
                    }
                    frame.encode(&mut self.output);
                    copied += size;
                }
                Outbound::Bytes(bytes) => {
                    let count = free.min(bytes.len());
                    if count == 0 {
                        break;
                    }
                    self.output.extend_from_slice(&bytes[..count]);
                    bytes.advance(count);
                    copied += count;
                    if !bytes.is_empty() {
                        break;
                    }
                }
            }
            self.queue.pop_front();
        }
        copied
    }

    /// Moves input bytes of this connection straight into the output buffer
    /// of `other`, as many as fit. Nothing moves while `other` still has
    /// queued items, which keeps them ahead of the relayed bytes.
    pub fn splice_into<U: Transport>(&mut self, other: &mut Connection<U>) -> usize {
        if !other.queue.is_empty() {
            other.drain_queue();
            if !other.queue.is_empty() {
                return 0;
            }
        }
        let count = self.input.len().min(other.output_free());
        if count > 0 {
            other.output.extend_from_slice(&self.input[..count]);
            self.input.advance(count);
        }
        count
    }

    /// Input is full and nothing is left to write: only someone consuming the
    /// input, such as a relay splicing it away, lets the connection go on.
    pub fn is_stalled(&self) -> bool {
        !self.corrupted && !self.peer_closed && self.input_free() == 0 && self.output.is_empty()
    }

    pub fn interest(&self) -> Interest {
        if self.corrupted {
            return Interest::None;
        }
        compute_interest(BufferState {
            peer_closed: self.peer_closed,
            input_free: self.input_free(),
            output_pending: self.output.len(),
        })
    }
}
