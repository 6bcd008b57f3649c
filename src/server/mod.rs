//! The chat server: one listener for users, optionally a second one for
//! private relay connections, both driven by a single [`Reactor`].

use tokio::net::TcpListener;
use tracing::info;

use crate::network::{Endpoints, Reactor};
use crate::service::{ChatConfig, Shutdown};
use crate::AppResult;

pub use self::chat::ServerChat;
pub use self::directory::SessionDirectory;
pub use self::rendezvous::{PrivateRendezvous, PrivateSession};

mod chat;
mod directory;
mod rendezvous;

/// Binds the listeners named by `config` and serves until `shutdown` fires.
pub async fn serve(config: &ChatConfig, shutdown: Shutdown) -> AppResult<()> {
    let network = &config.network;
    let mut listeners = vec![TcpListener::bind((network.ip.as_str(), network.port)).await?];
    if let Some(private_port) = network.private_port.filter(|port| *port != network.port) {
        listeners.push(TcpListener::bind((network.ip.as_str(), private_port)).await?);
    }
    let reactor = server_reactor(listeners, config, shutdown);
    info!("chat server listening on {:?}", reactor.local_addrs()?);
    reactor.run().await?;
    info!("chat server stopped");
    Ok(())
}

/// A server reactor over already bound listeners. Every listener accepts both
/// user and relay connections.
pub fn server_reactor(
    listeners: Vec<TcpListener>,
    config: &ChatConfig,
    shutdown: Shutdown,
) -> Reactor<ServerChat> {
    let endpoints = Endpoints::new(config.buffer.connection_buffer_size);
    let mut reactor = Reactor::new(ServerChat::new(), endpoints, shutdown);
    for listener in listeners {
        reactor = reactor.with_listener(listener);
    }
    reactor
}
