use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::{debug, info, warn};

use super::directory::SessionDirectory;
use super::rendezvous::PrivateRendezvous;
use crate::network::{Endpoints, Mode, Protocol, Token, Transport};
use crate::protocol::{Frame, FrameString, Opcode};
use crate::AppError;

/// What a server-side connection turned out to be, decided by its first frames.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Role {
    /// No successful login yet.
    Anonymous,
    Public { login: String },
    Relay { session_id: u64 },
}

/// Server session logic: logins, public and private messages, private session
/// negotiation and relaying.
#[derive(Debug, Default)]
pub struct ServerChat {
    directory: SessionDirectory,
    rendezvous: PrivateRendezvous,
    roles: HashMap<Token, Role>,
}

impl ServerChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rendezvous(rendezvous: PrivateRendezvous) -> Self {
        ServerChat {
            rendezvous,
            ..Self::default()
        }
    }

    pub fn directory(&self) -> &SessionDirectory {
        &self.directory
    }

    pub fn rendezvous(&self) -> &PrivateRendezvous {
        &self.rendezvous
    }

    fn on_anonymous_frame<T: Transport>(
        &mut self,
        endpoints: &mut Endpoints<T>,
        token: Token,
        frame: Frame,
    ) {
        match frame {
            Frame::Login { login } => match self.directory.register(login.as_str(), token) {
                Ok(()) => {
                    info!(%login, %token, "user logged in");
                    self.roles.insert(
                        token,
                        Role::Public {
                            login: login.into_string(),
                        },
                    );
                    endpoints.enqueue(token, Frame::LoginAccepted);
                }
                Err(err) => {
                    debug!(%token, "{}", err);
                    endpoints.enqueue(token, Frame::LoginRefused);
                }
            },
            Frame::LoginPrivate { session_id } => match self.rendezvous.attach(session_id, token)
            {
                Ok(paired) => {
                    self.roles.insert(token, Role::Relay { session_id });
                    if let Some((first, second)) = paired {
                        info!(session_id, "private relay established");
                        endpoints.enqueue(first, Frame::Established);
                        endpoints.enqueue(second, Frame::Established);
                        endpoints.splice(first, second);
                        endpoints.splice(second, first);
                    }
                }
                Err(err) => {
                    warn!(%token, "{}", err);
                    endpoints.close(token);
                }
            },
            other => {
                debug!(%token, opcode = ?other.opcode(), "frame before login");
                endpoints.close(token);
            }
        }
    }

    fn on_public_frame<T: Transport>(
        &mut self,
        endpoints: &mut Endpoints<T>,
        token: Token,
        login: &str,
        frame: Frame,
    ) {
        match &frame {
            Frame::Message { sender, .. } => {
                if self.check_sender(token, login, sender) {
                    self.directory.broadcast(endpoints, &frame, None);
                }
            }
            Frame::MessagePrivate { sender, target, .. } => {
                if !self.check_sender(token, login, sender) {
                    return;
                }
                match self.directory.lookup(target.as_str()) {
                    Some(recipient) => {
                        endpoints.enqueue(recipient, frame);
                    }
                    None => debug!(%target, "private message for offline user dropped"),
                }
            }
            Frame::RequestPrivate { sender, target } => {
                if !self.check_sender(token, login, sender) {
                    return;
                }
                let recipient = self
                    .directory
                    .lookup(target.as_str())
                    .filter(|_| target != login);
                match recipient {
                    Some(recipient) => {
                        if self.rendezvous.request(login, target.as_str()) {
                            endpoints.enqueue(recipient, frame);
                        }
                    }
                    None => {
                        let refusal = Frame::KoPrivate {
                            sender: sender.clone(),
                            target: target.clone(),
                        };
                        endpoints.enqueue(token, refusal);
                    }
                }
            }
            Frame::OkPrivate { sender, target } => {
                if !self.check_sender(token, login, target) {
                    return;
                }
                let Some(session_id) = self.rendezvous.accept(sender.as_str(), login) else {
                    debug!(%sender, %target, "answer to a request that is not pending");
                    return;
                };
                let id_frame = Frame::IdPrivate {
                    sender: sender.clone(),
                    target: target.clone(),
                    session_id,
                };
                if let Some(requester) = self.directory.lookup(sender.as_str()) {
                    endpoints.enqueue(requester, id_frame.clone());
                }
                endpoints.enqueue(token, id_frame);
            }
            Frame::KoPrivate { sender, target } => {
                if !self.check_sender(token, login, target) {
                    return;
                }
                if !self.rendezvous.reject(sender.as_str(), login) {
                    debug!(%sender, %target, "answer to a request that is not pending");
                    return;
                }
                if let Some(requester) = self.directory.lookup(sender.as_str()) {
                    endpoints.enqueue(requester, frame);
                }
            }
            _ => {
                debug!(%token, login, opcode = ?frame.opcode(), "unexpected frame from user");
                endpoints.close(token);
            }
        }
    }

    /// Frames may only speak for the login of the connection carrying them.
    fn check_sender(&self, token: Token, login: &str, claimed: &FrameString) -> bool {
        if claimed != login {
            warn!(%token, login, %claimed, "frame on behalf of another user ignored");
            return false;
        }
        true
    }
}

impl<T: Transport> Protocol<T> for ServerChat {
    type Request = ();

    /// Relay sockets stop decoding after their `LoginPrivate`.
    fn accept_mode(&self) -> Mode {
        Mode::raw_after(Opcode::LoginPrivate)
    }

    fn on_accept(&mut self, _endpoints: &mut Endpoints<T>, token: Token, peer: SocketAddr) {
        debug!(%token, %peer, "new connection");
        self.roles.insert(token, Role::Anonymous);
    }

    fn on_frame(&mut self, endpoints: &mut Endpoints<T>, token: Token, frame: Frame) {
        match self.roles.get(&token).cloned() {
            None | Some(Role::Anonymous) => self.on_anonymous_frame(endpoints, token, frame),
            Some(Role::Public { login }) => {
                if let Frame::Login { .. } | Frame::LoginPrivate { .. } = frame {
                    debug!(%token, %login, "second login on a connection");
                    endpoints.close(token);
                    return;
                }
                self.on_public_frame(endpoints, token, &login, frame);
            }
            Some(Role::Relay { session_id }) => {
                let err = AppError::InvalidFrame("frame on a relay connection".to_string());
                warn!(%token, session_id, "{}", err);
                endpoints.close(token);
            }
        }
    }

    fn on_progress(&mut self, endpoints: &mut Endpoints<T>, token: Token) {
        if let Some(Role::Relay { .. }) = self.roles.get(&token) {
            if let Some(peer) = self.rendezvous.peer_of(token) {
                endpoints.splice(token, peer);
                endpoints.splice(peer, token);
            }
        }
    }

    fn on_close(&mut self, endpoints: &mut Endpoints<T>, token: Token) {
        match self.roles.remove(&token) {
            Some(Role::Public { login }) => {
                self.directory.unregister(&login, token);
                for orphan in self.rendezvous.forget_login(&login) {
                    endpoints.close(orphan);
                }
                info!(%login, %token, "user logged out");
            }
            Some(Role::Relay { session_id }) => {
                if let Some(peer) = self.rendezvous.detach(token) {
                    debug!(session_id, %peer, "closing relay peer");
                    endpoints.close(peer);
                }
            }
            Some(Role::Anonymous) | None => {}
        }
    }
}
