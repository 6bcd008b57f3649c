use std::fmt;

/// Something the user should see, produced by the client session logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    LoginAccepted { login: String },
    LoginRefused { login: String },
    Message { sender: String, text: String },
    PrivateMessage { sender: String, text: String },
    /// `requester` waits for a `y` or `n` answer.
    PrivateRequest { requester: String },
    PrivateRefused { target: String },
    LinkEstablished { peer: String },
    LinkClosed { peer: String },
    DirectMessage { peer: String, text: String },
    FileReceived { peer: String, path: String, body: String },
    FileNotFound { peer: String, path: String },
    FileServed { peer: String, path: String, found: bool },
    Notice(String),
    Disconnected,
}

impl fmt::Display for ChatEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatEvent::LoginAccepted { login } => write!(f, " >>> Logged in as {}.", login),
            ChatEvent::LoginRefused { login } => {
                write!(f, " >>> Login {} is taken, enter another one.", login)
            }
            ChatEvent::Message { sender, text } => write!(f, "{}: {}", sender, text),
            ChatEvent::PrivateMessage { sender, text } => write!(f, "[private] {}: {}", sender, text),
            ChatEvent::PrivateRequest { requester } => write!(
                f,
                " >>> {} asks for a private connection, accept? (y/n)",
                requester
            ),
            ChatEvent::PrivateRefused { target } => {
                write!(f, " >>> {} refused the private connection.", target)
            }
            ChatEvent::LinkEstablished { peer } => {
                write!(f, " >>> Private connection established with {}.", peer)
            }
            ChatEvent::LinkClosed { peer } => {
                write!(f, " >>> Private connection with {} closed.", peer)
            }
            ChatEvent::DirectMessage { peer, text } => write!(f, "[direct] {}: {}", peer, text),
            ChatEvent::FileReceived { peer, path, body } => {
                write!(f, " >>> {} from {} ({} bytes):\n{}", path, peer, body.len(), body)
            }
            ChatEvent::FileNotFound { peer, path } => {
                write!(f, " >>> {} has no file {}.", peer, path)
            }
            ChatEvent::FileServed { peer, path, found } => {
                if *found {
                    write!(f, " >>> Sent {} to {}.", path, peer)
                } else {
                    write!(f, " >>> {} asked for {}, not found.", peer, path)
                }
            }
            ChatEvent::Notice(notice) => write!(f, " >>> {}", notice),
            ChatEvent::Disconnected => write!(f, " >>> Disconnected from the server."),
        }
    }
}
