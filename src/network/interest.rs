/// What a connection currently needs from the readiness multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Nothing left to do: the connection is finished and gets closed.
    None,
    Read,
    Write,
    ReadWrite,
}

impl Interest {
    pub fn is_readable(self) -> bool {
        matches!(self, Interest::Read | Interest::ReadWrite)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, Interest::Write | Interest::ReadWrite)
    }

    pub fn to_tokio(self) -> Option<tokio::io::Interest> {
        match self {
            Interest::None => None,
            Interest::Read => Some(tokio::io::Interest::READABLE),
            Interest::Write => Some(tokio::io::Interest::WRITABLE),
            Interest::ReadWrite => {
                Some(tokio::io::Interest::READABLE.add(tokio::io::Interest::WRITABLE))
            }
        }
    }
}

/// Snapshot of a connection's buffers, the only input of [`compute_interest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferState {
    pub peer_closed: bool,
    pub input_free: usize,
    pub output_pending: usize,
}

/// Read while the peer may still send and there is room to receive,
/// write while unwritten bytes are waiting.
pub fn compute_interest(state: BufferState) -> Interest {
    let read = !state.peer_closed && state.input_free > 0;
    let write = state.output_pending > 0;
    match (read, write) {
        (true, true) => Interest::ReadWrite,
        (true, false) => Interest::Read,
        (false, true) => Interest::Write,
        (false, false) => Interest::None,
    }
}
