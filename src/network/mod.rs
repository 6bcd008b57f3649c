//! Non-blocking connection handling.
//!
//! A [`Connection`] owns the buffers and frame decoding of one socket, the
//! [`Reactor`] multiplexes all of them on a single thread and hands frames to
//! a [`Protocol`].

pub use self::connection::{Connection, Mode, Outbound};
pub use self::handoff::{hand_off, HandOffReceiver, HandOffSender};
pub use self::interest::{compute_interest, BufferState, Interest};
pub use self::reactor::{Endpoints, Protocol, Reactor, Token};
pub use self::transport::{MemoryTransport, Transport};

mod connection;
mod handoff;
mod interest;
mod reactor;
mod transport;
