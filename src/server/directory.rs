use std::collections::HashMap;

use tracing::debug;

use crate::network::{Endpoints, Token, Transport};
use crate::protocol::Frame;
use crate::{AppError, AppResult};

/// Logged-in users and the public connection each one is using.
///
/// A login maps to at most one connection.
#[derive(Debug, Default)]
pub struct SessionDirectory {
    sessions: HashMap<String, Token>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, login: &str, token: Token) -> AppResult<()> {
        if self.sessions.contains_key(login) {
            return Err(AppError::LoginTaken(login.to_string()));
        }
        self.sessions.insert(login.to_string(), token);
        debug!(login, %token, "login registered");
        Ok(())
    }

    /// Removes `login` only while it is still bound to `token`.
    pub fn unregister(&mut self, login: &str, token: Token) -> bool {
        if self.sessions.get(login) != Some(&token) {
            return false;
        }
        self.sessions.remove(login);
        debug!(login, %token, "login released");
        true
    }

    pub fn lookup(&self, login: &str) -> Option<Token> {
        self.sessions.get(login).copied()
    }

    pub fn is_online(&self, login: &str) -> bool {
        self.sessions.contains_key(login)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Queues `frame` on every registered connection but `exclude` and
    /// returns how many received it.
    pub fn broadcast<T: Transport>(
        &self,
        endpoints: &mut Endpoints<T>,
        frame: &Frame,
        exclude: Option<Token>,
    ) -> usize {
        self.sessions
            .values()
            .filter(|token| Some(**token) != exclude)
            .filter(|token| endpoints.enqueue(**token, frame.clone()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{MemoryTransport, Mode};
    use crate::protocol::MAX_FRAME_SIZE;

    fn endpoints() -> Endpoints<MemoryTransport> {
        Endpoints::new(MAX_FRAME_SIZE)
    }

    #[test]
    fn test_login_is_unique() {
        let mut endpoints = endpoints();
        let first = endpoints.insert(MemoryTransport::new(), Mode::framed());
        let second = endpoints.insert(MemoryTransport::new(), Mode::framed());
        let mut directory = SessionDirectory::new();

        directory.register("alice", first).unwrap();
        let err = directory.register("alice", second).unwrap_err();
        assert!(matches!(err, AppError::LoginTaken(login) if login == "alice"));
        assert_eq!(directory.lookup("alice"), Some(first));
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_unregister_requires_owner() {
        let mut endpoints = endpoints();
        let first = endpoints.insert(MemoryTransport::new(), Mode::framed());
        let second = endpoints.insert(MemoryTransport::new(), Mode::framed());
        let mut directory = SessionDirectory::new();

        directory.register("alice", first).unwrap();
        assert!(!directory.unregister("alice", second));
        assert!(directory.is_online("alice"));
        assert!(directory.unregister("alice", first));
        assert!(directory.lookup("alice").is_none());
        directory.register("alice", second).unwrap();
    }

    #[test]
    fn test_broadcast_reaches_everyone() {
        let mut endpoints = endpoints();
        let mut directory = SessionDirectory::new();
        for login in ["alice", "bob", "carol"] {
            let token = endpoints.insert(MemoryTransport::new(), Mode::framed());
            directory.register(login, token).unwrap();
        }
        let frame = Frame::message("alice", "hi all").unwrap();
        assert_eq!(directory.broadcast(&mut endpoints, &frame, None), 3);

        let bob = directory.lookup("bob").unwrap();
        assert_eq!(endpoints.get_mut(bob).unwrap().output(), &frame.to_bytes()[..]);
    }

    #[test]
    fn test_broadcast_skips_excluded() {
        let mut endpoints = endpoints();
        let mut directory = SessionDirectory::new();
        let alice = endpoints.insert(MemoryTransport::new(), Mode::framed());
        let bob = endpoints.insert(MemoryTransport::new(), Mode::framed());
        directory.register("alice", alice).unwrap();
        directory.register("bob", bob).unwrap();

        let frame = Frame::message("alice", "not for me").unwrap();
        assert_eq!(directory.broadcast(&mut endpoints, &frame, Some(alice)), 1);
        assert!(endpoints.get_mut(alice).unwrap().output().is_empty());
        assert!(!endpoints.get_mut(bob).unwrap().output().is_empty());
    }
}
