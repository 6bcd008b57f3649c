//! The chat client: a connection to the server, the console hand-off and the
//! private links, all driven by one [`Reactor`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

use crate::network::{hand_off, Endpoints, HandOffSender, Mode, Reactor};
use crate::service::{ChatConfig, Shutdown};
use crate::{AppError, AppResult};

pub use self::chat::{ClientChat, Command};
pub use self::console::{forward_lines, spawn_console};
pub use self::event::ChatEvent;
pub use self::link::{LinkPayload, LinkState, PayloadReader, PrivateLink};
pub use self::transfer::{FileRequest, FileResponse, FileStore};

mod chat;
mod console;
mod event;
mod link;
mod transfer;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub server: SocketAddr,
    /// Where private links connect, the server's relay listener.
    pub relay: SocketAddr,
    pub login: String,
    /// Directory shared with private link peers.
    pub shared_dir: Option<PathBuf>,
}

/// Connects to the server and prepares the client reactor.
///
/// The returned sender feeds console lines to the reactor. The login is
/// already queued as the first line.
pub async fn connect(
    options: ClientOptions,
    config: &ChatConfig,
    events: UnboundedSender<ChatEvent>,
    shutdown: Shutdown,
) -> AppResult<(Reactor<ClientChat>, HandOffSender<String>)> {
    let stream = TcpStream::connect(options.server).await?;
    stream.set_nodelay(true)?;
    info!(server = %options.server, "connected to chat server");

    let mut endpoints = Endpoints::new(config.buffer.connection_buffer_size);
    let main = endpoints.insert(Arc::new(stream), Mode::framed());
    let chat = ClientChat::new(
        main,
        options.relay,
        config.transfer.max_payload_size,
        options.shared_dir.map(FileStore::new),
        events,
    );

    let (lines, handoff) = hand_off(config.network.handoff_capacity);
    if !lines.try_offer(options.login)? {
        return Err(AppError::IllegalStateError(
            "hand-off queue full before start".to_string(),
        ));
    }
    let reactor = Reactor::new(chat, endpoints, shutdown).with_handoff(handoff);
    Ok((reactor, lines))
}
