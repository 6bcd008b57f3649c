use std::io::{self, ErrorKind};
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tokio::net::TcpStream;

/// Non-blocking byte transport under a [`Connection`](super::Connection).
///
/// Both calls return immediately: `WouldBlock` when the transport is not
/// ready, `Ok(0)` from `try_read_buf` once the peer closed its side.
pub trait Transport {
    /// Appends at most `limit` bytes to `buffer`.
    fn try_read_buf(&mut self, buffer: &mut BytesMut, limit: usize) -> io::Result<usize>;

    fn try_write(&mut self, bytes: &[u8]) -> io::Result<usize>;
}

/// The reactor shares the stream with the task waiting for its readiness.
impl Transport for Arc<TcpStream> {
    fn try_read_buf(&mut self, buffer: &mut BytesMut, limit: usize) -> io::Result<usize> {
        let mut limited = (&mut *buffer).limit(limit);
        (**self).try_read_buf(&mut limited)
    }

    fn try_write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        (**self).try_write(bytes)
    }
}

/// In-memory transport: bytes fed by the caller are read back by the
/// connection, bytes written by the connection are collected.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    inbound: BytesMut,
    inbound_closed: bool,
    written: BytesMut,
    write_budget: Option<usize>,
    failure: Option<ErrorKind>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.inbound.extend_from_slice(bytes);
    }

    /// The peer closed its side: reads return `Ok(0)` once `inbound` is consumed.
    pub fn close_inbound(&mut self) {
        self.inbound_closed = true;
    }

    /// Caps how many more bytes writes accept; `None` removes the cap.
    pub fn set_write_budget(&mut self, budget: Option<usize>) {
        self.write_budget = budget;
    }

    /// Makes every following read and write fail with `kind`.
    pub fn fail_with(&mut self, kind: ErrorKind) {
        self.failure = Some(kind);
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }

    pub fn take_written(&mut self) -> BytesMut {
        self.written.split()
    }

    fn check(&self) -> io::Result<()> {
        match self.failure {
            Some(kind) => Err(io::Error::new(kind, "memory transport failure")),
            None => Ok(()),
        }
    }
}

impl Transport for MemoryTransport {
    fn try_read_buf(&mut self, buffer: &mut BytesMut, limit: usize) -> io::Result<usize> {
        self.check()?;
        if self.inbound.is_empty() {
            return if self.inbound_closed {
                Ok(0)
            } else {
                Err(ErrorKind::WouldBlock.into())
            };
        }
        let count = limit.min(self.inbound.len());
        buffer.extend_from_slice(&self.inbound.split_to(count));
        Ok(count)
    }

    fn try_write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.check()?;
        let count = bytes.len().min(self.write_budget.unwrap_or(usize::MAX));
        if count == 0 && !bytes.is_empty() {
            return Err(ErrorKind::WouldBlock.into());
        }
        self.written.extend_from_slice(&bytes[..count]);
        if let Some(budget) = self.write_budget.as_mut() {
            *budget -= count;
        }
        Ok(count)
    }
}
