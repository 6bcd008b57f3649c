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

use std::collections::{BTreeSet, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tracing::{debug, warn};

use crate::network::Token;
use crate::{AppError, AppResult};

/// A private session between two logins, from id minting until one of its
/// relay sockets closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateSession {
    pub requester: String,
    pub target: String,
    slots: [Option<Token>; 2],
}

impl PrivateSession {
    fn new(requester: &str, target: &str) -> Self {
        PrivateSession {
            requester: requester.to_string(),
            target: target.to_string(),
            slots: [None, None],
        }
    }

    pub fn involves(&self, login: &str) -> bool {
        self.requester == login || self.target == login
    }

    /// Both relay sockets are attached.
    pub fn is_relaying(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.slots.iter().flatten().copied()
    }
}

/// Pairs private requests with their answers and relay sockets with their
/// session.
///
/// Session ids are random and unique among live sessions.
pub struct PrivateRendezvous {
    /// target login -> logins waiting for its answer
    pending: HashMap<String, BTreeSet<String>>,
    sessions: HashMap<u64, PrivateSession>,
    relays: HashMap<Token, u64>,
    rng: Box<dyn RngCore + Send>,
}

impl std::fmt::Debug for PrivateRendezvous {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateRendezvous")
            .field("pending", &self.pending)
            .field("sessions", &self.sessions)
            .field("relays", &self.relays)
            .finish()
    }
}

impl Default for PrivateRendezvous {
    fn default() -> Self {
        Self::new()
    }
}

impl PrivateRendezvous {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_rng(rng: impl RngCore + Send + 'static) -> Self {
        PrivateRendezvous {
            pending: HashMap::new(),
            sessions: HashMap::new(),
            relays: HashMap::new(),
            rng: Box::new(rng),
        }
    }

    pub fn is_pending(&self, requester: &str, target: &str) -> bool {
        self.pending
            .get(target)
            .is_some_and(|requesters| requesters.contains(requester))
    }

    /// Records a request. `true` when it is new and must be forwarded to the
    /// target, `false` when the same request is already waiting.
    pub fn request(&mut self, requester: &str, target: &str) -> bool {
        self.pending
            .entry(target.to_string())
            .or_default()
            .insert(requester.to_string())
    }

    fn take_pending(&mut self, requester: &str, target: &str) -> bool {
        let Some(requesters) = self.pending.get_mut(target) else {
            return false;
        };
        let removed = requesters.remove(requester);
        if requesters.is_empty() {
            self.pending.remove(target);
        }
        removed
    }

    /// The target accepted. Returns the id of the new session, or `None` when
    /// no such request was waiting.
    pub fn accept(&mut self, requester: &str, target: &str) -> Option<u64> {
        if !self.take_pending(requester, target) {
            return None;
        }
        loop {
            let session_id = self.rng.gen::<u64>();
            match self.open_session(session_id, requester, target) {
                Ok(()) => return Some(session_id),
                Err(err) => warn!("{}, minting another id", err),
            }
        }
    }

    fn open_session(&mut self, session_id: u64, requester: &str, target: &str) -> AppResult<()> {
        if self.sessions.contains_key(&session_id) {
            return Err(AppError::SessionIdCollision(session_id));
        }
        self.sessions
            .insert(session_id, PrivateSession::new(requester, target));
        debug!(session_id, requester, target, "private session opened");
        Ok(())
    }

    /// The target refused. `true` when the request was waiting and the refusal
    /// must be forwarded to the requester.
    pub fn reject(&mut self, requester: &str, target: &str) -> bool {
        self.take_pending(requester, target)
    }

    pub fn session(&self, session_id: u64) -> Option<&PrivateSession> {
        self.sessions.get(&session_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Binds a relay socket to its session. Once the second socket arrives the
    /// two tokens are returned and relaying starts.
    pub fn attach(&mut self, session_id: u64, token: Token) -> AppResult<Option<(Token, Token)>> {
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(AppError::UnmatchedPrivateLogin(session_id))?;
        let slot = session
            .slots
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(AppError::UnmatchedPrivateLogin(session_id))?;
        *slot = Some(token);
        self.relays.insert(token, session_id);
        match session.slots {
            [Some(first), Some(second)] => Ok(Some((first, second))),
            _ => Ok(None),
        }
    }

    /// The other socket of the relay `token` belongs to, once both are attached.
    pub fn peer_of(&self, token: Token) -> Option<Token> {
        let session = self.sessions.get(self.relays.get(&token)?)?;
        match session.slots {
            [Some(first), Some(second)] if first == token => Some(second),
            [Some(first), Some(second)] if second == token => Some(first),
            _ => None,
        }
    }

    /// A relay socket closed: its session ends. Returns the other attached
    /// socket, which must be closed too.
    pub fn detach(&mut self, token: Token) -> Option<Token> {
        let session_id = self.relays.remove(&token)?;
        let session = self.sessions.remove(&session_id)?;
        debug!(session_id, "private session closed");
        let other = session.tokens().find(|other| *other != token);
        if let Some(other) = other {
            self.relays.remove(&other);
        }
        other
    }

    /// `login` went offline. Drops the requests it is part of and the sessions
    /// still waiting for their sockets, returning the relay sockets to close.
    pub fn forget_login(&mut self, login: &str) -> Vec<Token> {
        self.pending.remove(login);
        self.pending.retain(|_, requesters| {
            requesters.remove(login);
            !requesters.is_empty()
        });

        let abandoned: Vec<u64> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.involves(login) && !session.is_relaying())
            .map(|(session_id, _)| *session_id)
            .collect();
        let mut orphans = Vec::new();
        for session_id in abandoned {
            if let Some(session) = self.sessions.remove(&session_id) {
                debug!(session_id, login, "private session abandoned");
                for token in session.tokens() {
                    self.relays.remove(&token);
                    orphans.push(token);
                }
            }
        }
        orphans
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::mock::StepRng;

    use super::*;
    use crate::network::{Endpoints, MemoryTransport, Mode};
    use crate::protocol::MAX_FRAME_SIZE;

    fn tokens(count: usize) -> Vec<Token> {
        let mut endpoints = Endpoints::new(MAX_FRAME_SIZE);
        (0..count)
            .map(|_| endpoints.insert(MemoryTransport::new(), Mode::framed()))
            .collect()
    }

    /// Yields the given values in turn, then repeats the last one.
    struct ScriptedRng(Vec<u64>);

    impl RngCore for ScriptedRng {
        fn next_u32(&mut self) -> u32 {
            self.next_u64() as u32
        }

        fn next_u64(&mut self) -> u64 {
            if self.0.len() > 1 {
                self.0.remove(0)
            } else {
                self.0[0]
            }
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            for byte in dest {
                *byte = self.next_u64() as u8;
            }
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    #[test]
    fn test_request_is_idempotent() {
        let mut rendezvous = PrivateRendezvous::new();
        assert!(rendezvous.request("alice", "bob"));
        assert!(!rendezvous.request("alice", "bob"));
        assert!(rendezvous.request("carol", "bob"));
        assert!(rendezvous.is_pending("alice", "bob"));
        assert!(!rendezvous.is_pending("bob", "alice"));
    }

    #[test]
    fn test_answers_only_count_when_pending() {
        let mut rendezvous = PrivateRendezvous::new();
        assert!(rendezvous.accept("alice", "bob").is_none());
        assert!(!rendezvous.reject("alice", "bob"));

        rendezvous.request("alice", "bob");
        assert!(rendezvous.reject("alice", "bob"));
        assert!(!rendezvous.reject("alice", "bob"));
        assert!(rendezvous.accept("alice", "bob").is_none());
        assert_eq!(rendezvous.session_count(), 0);
    }

    #[test]
    fn test_accept_opens_session() {
        let mut rendezvous = PrivateRendezvous::with_rng(StepRng::new(42, 1));
        rendezvous.request("alice", "bob");
        let session_id = rendezvous.accept("alice", "bob").unwrap();
        assert_eq!(session_id, 42);
        assert!(!rendezvous.is_pending("alice", "bob"));

        let session = rendezvous.session(session_id).unwrap();
        assert_eq!(session.requester, "alice");
        assert_eq!(session.target, "bob");
        assert!(!session.is_relaying());
    }

    #[test]
    fn test_colliding_id_is_reminted() {
        let mut rendezvous = PrivateRendezvous::with_rng(ScriptedRng(vec![5, 5, 9]));
        rendezvous.request("alice", "bob");
        rendezvous.request("carol", "dave");
        assert_eq!(rendezvous.accept("alice", "bob"), Some(5));
        assert_eq!(rendezvous.accept("carol", "dave"), Some(9));
        assert_eq!(rendezvous.session_count(), 2);
    }

    #[test]
    fn test_third_socket_is_refused() {
        let tokens = tokens(3);
        let mut rendezvous = PrivateRendezvous::new();
        rendezvous.request("alice", "bob");
        let session_id = rendezvous.accept("alice", "bob").unwrap();

        assert_eq!(rendezvous.attach(session_id, tokens[0]).unwrap(), None);
        assert_eq!(rendezvous.peer_of(tokens[0]), None);
        assert_eq!(
            rendezvous.attach(session_id, tokens[1]).unwrap(),
            Some((tokens[0], tokens[1]))
        );
        let err = rendezvous.attach(session_id, tokens[2]).unwrap_err();
        assert!(matches!(err, AppError::UnmatchedPrivateLogin(id) if id == session_id));

        assert_eq!(rendezvous.peer_of(tokens[0]), Some(tokens[1]));
        assert_eq!(rendezvous.peer_of(tokens[1]), Some(tokens[0]));
        assert_eq!(rendezvous.peer_of(tokens[2]), None);
    }

    #[test]
    fn test_unknown_session_is_refused() {
        let tokens = tokens(1);
        let mut rendezvous = PrivateRendezvous::new();
        assert!(matches!(
            rendezvous.attach(77, tokens[0]),
            Err(AppError::UnmatchedPrivateLogin(77))
        ));
    }

    #[test]
    fn test_detach_ends_session() {
        let tokens = tokens(2);
        let mut rendezvous = PrivateRendezvous::new();
        rendezvous.request("alice", "bob");
        let session_id = rendezvous.accept("alice", "bob").unwrap();
        rendezvous.attach(session_id, tokens[0]).unwrap();
        rendezvous.attach(session_id, tokens[1]).unwrap();

        assert_eq!(rendezvous.detach(tokens[1]), Some(tokens[0]));
        assert_eq!(rendezvous.detach(tokens[0]), None);
        assert!(rendezvous.session(session_id).is_none());
    }

    #[test]
    fn test_forget_login_drops_waiting_state() {
        let tokens = tokens(3);
        let mut rendezvous = PrivateRendezvous::new();
        rendezvous.request("alice", "bob");
        rendezvous.request("bob", "carol");
        rendezvous.request("dave", "carol");

        rendezvous.request("carol", "erin");
        let waiting = rendezvous.accept("carol", "erin").unwrap();
        rendezvous.attach(waiting, tokens[0]).unwrap();

        rendezvous.request("erin", "carol");
        let relaying = rendezvous.accept("erin", "carol").unwrap();
        rendezvous.attach(relaying, tokens[1]).unwrap();
        rendezvous.attach(relaying, tokens[2]).unwrap();

        assert!(rendezvous.forget_login("bob").is_empty());
        assert!(!rendezvous.is_pending("alice", "bob"));
        assert!(!rendezvous.is_pending("bob", "carol"));
        assert!(rendezvous.is_pending("dave", "carol"));

        assert_eq!(rendezvous.forget_login("carol"), vec![tokens[0]]);
        assert!(rendezvous.session(waiting).is_none());
        assert!(rendezvous.session(relaying).is_some());
        assert!(!rendezvous.is_pending("dave", "carol"));
    }
}
