use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use super::event::ChatEvent;
use super::link::{LinkPayload, PrivateLink};
use super::transfer::{FileRequest, FileResponse, FileStore};
use crate::network::{Endpoints, Protocol, Token, Transport};
use crate::protocol::Frame;
use crate::{AppError, AppResult};

/// A console line once the user is logged in and no private request waits
/// for an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Any line not starting with `@`, `/` or `$`.
    Public(String),
    /// `@login text`, relayed by the server.
    Private { target: String, text: String },
    /// `/login text`, sent over the private link.
    Direct { target: String, text: String },
    /// `$login path`, a file request over the private link.
    File { target: String, path: String },
}

impl Command {
    pub fn parse(line: &str) -> AppResult<Command> {
        let Some(prefix) = line.chars().next().filter(|c| matches!(c, '@' | '/' | '$')) else {
            return Ok(Command::Public(line.to_string()));
        };
        let (target, rest) = line[1..]
            .split_once(' ')
            .map(|(target, rest)| (target.to_string(), rest.trim().to_string()))
            .filter(|(target, rest)| !target.is_empty() && !rest.is_empty())
            .ok_or_else(|| AppError::InvalidValue(format!("usage: {}login text", prefix)))?;
        Ok(match prefix {
            '@' => Command::Private { target, text: rest },
            '/' => Command::Direct { target, text: rest },
            _ => Command::File { target, path: rest },
        })
    }
}

/// Client session logic: the login exchange, public and private messages,
/// answering private requests and the private links opened from them.
#[derive(Debug)]
pub struct ClientChat {
    main: Token,
    relay: SocketAddr,
    login: String,
    logged_in: bool,
    max_payload_size: usize,
    store: Option<FileStore>,
    events: UnboundedSender<ChatEvent>,
    /// Requesters waiting for a `y`/`n`, oldest first.
    awaiting_answer: VecDeque<String>,
    links: HashMap<String, PrivateLink>,
    link_peers: HashMap<Token, String>,
    /// Payloads for peers asked for a private session that has no link yet.
    waiting_payloads: HashMap<String, Vec<LinkPayload>>,
}

impl ClientChat {
    /// `main` is the connection to the server's user listener, `relay` the
    /// address private links connect to.
    pub fn new(
        main: Token,
        relay: SocketAddr,
        max_payload_size: usize,
        store: Option<FileStore>,
        events: UnboundedSender<ChatEvent>,
    ) -> Self {
        ClientChat {
            main,
            relay,
            login: String::new(),
            logged_in: false,
            max_payload_size,
            store,
            events,
            awaiting_answer: VecDeque::new(),
            links: HashMap::new(),
            link_peers: HashMap::new(),
            waiting_payloads: HashMap::new(),
        }
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn link(&self, peer: &str) -> Option<&PrivateLink> {
        self.links.get(peer)
    }

    fn emit(&self, event: ChatEvent) {
        if self.events.send(event).is_err() {
            debug!("chat event dropped, nobody is listening");
        }
    }

    fn send_frame<T: Transport>(&self, endpoints: &mut Endpoints<T>, frame: AppResult<Frame>) {
        match frame {
            Ok(frame) => {
                endpoints.enqueue(self.main, frame);
            }
            Err(err) => self.emit(ChatEvent::Notice(err.to_string())),
        }
    }

    fn on_line<T: Transport>(&mut self, endpoints: &mut Endpoints<T>, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        if !self.logged_in {
            let login = line.split_whitespace().next().unwrap_or_default();
            self.login = login.to_string();
            self.send_frame(endpoints, Frame::login(login));
            return;
        }
        if let Some(requester) = self.awaiting_answer.front().cloned() {
            let answer = match line.trim() {
                "y" | "Y" => Frame::ok_private(&requester, &self.login),
                "n" | "N" => Frame::ko_private(&requester, &self.login),
                _ => {
                    self.emit(ChatEvent::Notice(format!(
                        "answer y or n to the private request of {} first",
                        requester
                    )));
                    return;
                }
            };
            self.awaiting_answer.pop_front();
            self.send_frame(endpoints, answer);
            return;
        }
        match Command::parse(line) {
            Ok(Command::Public(text)) => {
                let frame = Frame::message(&self.login, &text);
                self.send_frame(endpoints, frame)
            }
            Ok(Command::Private { target, text }) => {
                let frame = Frame::message_private(&self.login, &target, &text);
                self.send_frame(endpoints, frame)
            }
            Ok(Command::Direct { target, text }) => {
                self.send_to_peer(endpoints, &target, LinkPayload::Text(text))
            }
            Ok(Command::File { target, path }) => self.send_to_peer(
                endpoints,
                &target,
                LinkPayload::FileRequest(FileRequest::new(path)),
            ),
            Err(err) => self.emit(ChatEvent::Notice(err.to_string())),
        }
    }

    /// Uses the link to `peer`, asking the server for one first if needed.
    fn send_to_peer<T: Transport>(
        &mut self,
        endpoints: &mut Endpoints<T>,
        peer: &str,
        payload: LinkPayload,
    ) {
        if peer == self.login {
            self.emit(ChatEvent::Notice("no private connection with yourself".to_string()));
            return;
        }
        if !payload.fits(self.max_payload_size) {
            self.emit(ChatEvent::Notice(format!(
                "message too long for a private connection, at most {} bytes",
                self.max_payload_size
            )));
            return;
        }
        if let Some(link) = self.links.get_mut(peer) {
            link.send(endpoints, payload);
            return;
        }
        let waiting = self.waiting_payloads.entry(peer.to_string()).or_default();
        waiting.push(payload);
        if waiting.len() == 1 {
            let request = Frame::request_private(&self.login, peer);
            self.send_frame(endpoints, request);
        }
    }

    fn on_server_frame<T: Transport>(&mut self, endpoints: &mut Endpoints<T>, frame: Frame) {
        match frame {
            Frame::LoginAccepted => {
                self.logged_in = true;
                info!(login = %self.login, "logged in");
                self.emit(ChatEvent::LoginAccepted {
                    login: self.login.clone(),
                });
            }
            Frame::LoginRefused => self.emit(ChatEvent::LoginRefused {
                login: self.login.clone(),
            }),
            Frame::Message { sender, text } => self.emit(ChatEvent::Message {
                sender: sender.into_string(),
                text: text.into_string(),
            }),
            Frame::MessagePrivate { sender, text, .. } => self.emit(ChatEvent::PrivateMessage {
                sender: sender.into_string(),
                text: text.into_string(),
            }),
            Frame::RequestPrivate { sender, target } if target == self.login.as_str() => {
                let requester = sender.into_string();
                if !self.awaiting_answer.contains(&requester) {
                    self.awaiting_answer.push_back(requester.clone());
                }
                self.emit(ChatEvent::PrivateRequest { requester });
            }
            Frame::KoPrivate { sender, target } if sender == self.login.as_str() => {
                self.waiting_payloads.remove(target.as_str());
                self.emit(ChatEvent::PrivateRefused {
                    target: target.into_string(),
                });
            }
            Frame::IdPrivate {
                sender,
                target,
                session_id,
            } => {
                let peer = if sender == self.login.as_str() {
                    target.into_string()
                } else if target == self.login.as_str() {
                    sender.into_string()
                } else {
                    warn!(%sender, %target, "session id for other users ignored");
                    return;
                };
                self.open_link(endpoints, peer, session_id);
            }
            other => debug!(opcode = ?other.opcode(), "frame ignored"),
        }
    }

    fn open_link<T: Transport>(&mut self, endpoints: &mut Endpoints<T>, peer: String, session_id: u64) {
        let mut link = PrivateLink::open(
            endpoints,
            self.relay,
            &peer,
            session_id,
            self.max_payload_size,
        );
        for payload in self.waiting_payloads.remove(&peer).unwrap_or_default() {
            link.send(endpoints, payload);
        }
        self.link_peers.insert(link.token(), peer.clone());
        if let Some(previous) = self.links.insert(peer, link) {
            debug!(token = %previous.token(), "replacing private link");
            endpoints.close(previous.token());
        }
    }

    fn on_payload<T: Transport>(
        &mut self,
        endpoints: &mut Endpoints<T>,
        peer: &str,
        payload: LinkPayload,
    ) {
        let Some(link) = self.links.get_mut(peer) else {
            return;
        };
        let event = match payload {
            LinkPayload::Text(text) => ChatEvent::DirectMessage {
                peer: peer.to_string(),
                text,
            },
            LinkPayload::FileRequest(request) => {
                let mut response = match &self.store {
                    Some(store) => store.respond(&request),
                    None => FileResponse::NotFound,
                };
                if !LinkPayload::FileResponse(response.clone()).fits(self.max_payload_size) {
                    warn!(peer, path = request.path(), "file too large to send");
                    response = FileResponse::NotFound;
                }
                let found = matches!(response, FileResponse::Found { .. });
                link.send(endpoints, LinkPayload::FileResponse(response));
                ChatEvent::FileServed {
                    peer: peer.to_string(),
                    path: request.path().to_string(),
                    found,
                }
            }
            LinkPayload::FileResponse(response) => {
                let path = link.take_requested().unwrap_or_default();
                match response {
                    FileResponse::Found { body } => ChatEvent::FileReceived {
                        peer: peer.to_string(),
                        path,
                        body,
                    },
                    FileResponse::NotFound => ChatEvent::FileNotFound {
                        peer: peer.to_string(),
                        path,
                    },
                }
            }
        };
        self.emit(event);
    }
}

impl<T: Transport> Protocol<T> for ClientChat {
    type Request = String;

    fn on_connect(&mut self, endpoints: &mut Endpoints<T>, token: Token) {
        let Some(peer) = self.link_peers.get(&token) else {
            return;
        };
        if let Some(link) = self.links.get_mut(peer) {
            link.on_connect(endpoints);
        }
    }

    fn on_frame(&mut self, endpoints: &mut Endpoints<T>, token: Token, frame: Frame) {
        if token == self.main {
            self.on_server_frame(endpoints, frame);
            return;
        }
        let Some(peer) = self.link_peers.get(&token).cloned() else {
            return;
        };
        let Some(link) = self.links.get_mut(&peer) else {
            return;
        };
        match link.on_frame(endpoints, frame) {
            Ok(()) => self.emit(ChatEvent::LinkEstablished { peer }),
            Err(err) => {
                warn!(%token, "{}", err);
                endpoints.close(token);
            }
        }
    }

    fn on_progress(&mut self, endpoints: &mut Endpoints<T>, token: Token) {
        let Some(peer) = self.link_peers.get(&token).cloned() else {
            return;
        };
        let Some(link) = self.links.get_mut(&peer) else {
            return;
        };
        match link.receive(endpoints) {
            Ok(payloads) => {
                for payload in payloads {
                    self.on_payload(endpoints, &peer, payload);
                }
            }
            Err(err) => {
                warn!(%token, "{}", err);
                endpoints.close(token);
            }
        }
    }

    fn on_request(&mut self, endpoints: &mut Endpoints<T>, line: String) {
        self.on_line(endpoints, &line);
    }

    fn on_close(&mut self, endpoints: &mut Endpoints<T>, token: Token) {
        if token == self.main {
            info!("connection to the server closed");
            self.emit(ChatEvent::Disconnected);
            endpoints.request_stop();
            return;
        }
        let Some(peer) = self.link_peers.remove(&token) else {
            return;
        };
        if self.links.get(&peer).is_some_and(|link| link.token() == token) {
            self.links.remove(&peer);
            self.emit(ChatEvent::LinkClosed { peer });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use bytes::BytesMut;
    use rstest::rstest;
    use tempfile::tempdir;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    use super::*;
    use crate::network::{MemoryTransport, Mode};
    use crate::protocol::{FrameReader, ProcessStatus, Reader, MAX_FRAME_SIZE};

    struct Harness {
        chat: ClientChat,
        endpoints: Endpoints<MemoryTransport>,
        main: Token,
        events: UnboundedReceiver<ChatEvent>,
    }

    impl Harness {
        fn new(store: Option<FileStore>) -> Self {
            let mut endpoints = Endpoints::new(MAX_FRAME_SIZE);
            let main = endpoints.insert(MemoryTransport::new(), Mode::framed());
            let (tx, events) = unbounded_channel();
            let relay = "127.0.0.1:7778".parse().unwrap();
            Harness {
                chat: ClientChat::new(main, relay, 4096, store, tx),
                endpoints,
                main,
                events,
            }
        }

        fn logged_in(login: &str) -> Self {
            let mut harness = Self::new(None);
            harness.line(login);
            harness.server(Frame::LoginAccepted);
            harness.sent();
            harness.events();
            harness
        }

        fn line(&mut self, line: &str) {
            self.chat.on_request(&mut self.endpoints, line.to_string());
        }

        fn server(&mut self, frame: Frame) {
            self.chat.on_frame(&mut self.endpoints, self.main, frame);
        }

        fn sent(&mut self) -> Vec<Frame> {
            written_frames(&mut self.endpoints, self.main)
        }

        fn events(&mut self) -> Vec<ChatEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }

        /// Connects the link to `peer` and delivers `Established` on it.
        fn establish(&mut self, peer: &str) -> Token {
            let token = self.chat.link(peer).unwrap().token();
            assert!(self.endpoints.finish_connect(token, MemoryTransport::new()));
            self.chat.on_connect(&mut self.endpoints, token);
            self.feed(token, &Frame::Established.to_bytes());
            token
        }

        fn feed(&mut self, token: Token, bytes: &[u8]) {
            let connection = self.endpoints.get_mut(token).unwrap();
            connection.transport_mut().feed(bytes);
            for frame in connection.on_readable().unwrap() {
                self.chat.on_frame(&mut self.endpoints, token, frame);
            }
            self.chat.on_progress(&mut self.endpoints, token);
        }

        fn written(&mut self, token: Token) -> BytesMut {
            let connection = self.endpoints.get_mut(token).unwrap();
            connection.on_writable().unwrap();
            connection.transport_mut().take_written()
        }
    }

    fn written_frames(endpoints: &mut Endpoints<MemoryTransport>, token: Token) -> Vec<Frame> {
        let connection = endpoints.get_mut(token).unwrap();
        connection.on_writable().unwrap();
        let mut bytes = connection.transport_mut().take_written();
        let mut reader = FrameReader::new();
        let mut frames = Vec::new();
        while reader.process(&mut bytes) == ProcessStatus::Done {
            frames.push(reader.take().unwrap());
            reader.reset();
        }
        frames
    }

    #[rstest]
    #[case("hello there", Command::Public("hello there".to_string()))]
    #[case("@bob hi you", Command::Private { target: "bob".to_string(), text: "hi you".to_string() })]
    #[case("/bob direct", Command::Direct { target: "bob".to_string(), text: "direct".to_string() })]
    #[case("$bob notes.txt", Command::File { target: "bob".to_string(), path: "notes.txt".to_string() })]
    fn test_command_parse(#[case] line: &str, #[case] expected: Command) {
        assert_eq!(Command::parse(line).unwrap(), expected);
    }

    #[rstest]
    #[case("@bob")]
    #[case("@ text")]
    #[case("$bob   ")]
    fn test_command_parse_usage(#[case] line: &str) {
        assert!(Command::parse(line).is_err());
    }

    #[test]
    fn test_login_retry() {
        let mut harness = Harness::new(None);
        harness.line("alice");
        assert_eq!(harness.sent(), vec![Frame::login("alice").unwrap()]);
        harness.server(Frame::LoginRefused);
        assert_eq!(
            harness.events(),
            vec![ChatEvent::LoginRefused {
                login: "alice".to_string()
            }]
        );

        harness.line("bob");
        harness.server(Frame::LoginAccepted);
        assert_eq!(harness.sent(), vec![Frame::login("bob").unwrap()]);
        assert!(harness.chat.is_logged_in());
        assert_eq!(harness.chat.login(), "bob");
    }

    #[test]
    fn test_lines_become_frames() {
        let mut harness = Harness::logged_in("alice");
        harness.line("hello world");
        harness.line("@carol psst");
        harness.line("@carol");
        assert_eq!(
            harness.sent(),
            vec![
                Frame::message("alice", "hello world").unwrap(),
                Frame::message_private("alice", "carol", "psst").unwrap()
            ]
        );
        assert!(matches!(harness.events()[..], [ChatEvent::Notice(_)]));
    }

    #[test]
    fn test_incoming_messages() {
        let mut harness = Harness::logged_in("alice");
        harness.server(Frame::message("bob", "hi all").unwrap());
        harness.server(Frame::message_private("bob", "alice", "hi you").unwrap());
        assert_eq!(
            harness.events(),
            vec![
                ChatEvent::Message {
                    sender: "bob".to_string(),
                    text: "hi all".to_string()
                },
                ChatEvent::PrivateMessage {
                    sender: "bob".to_string(),
                    text: "hi you".to_string()
                }
            ]
        );
    }

    #[test]
    fn test_answering_private_request() {
        let mut harness = Harness::logged_in("alice");
        harness.server(Frame::request_private("carol", "alice").unwrap());
        assert_eq!(
            harness.events(),
            vec![ChatEvent::PrivateRequest {
                requester: "carol".to_string()
            }]
        );

        harness.line("hello");
        assert!(harness.sent().is_empty());
        harness.line("y");
        assert_eq!(harness.sent(), vec![Frame::ok_private("carol", "alice").unwrap()]);

        harness.server(Frame::request_private("dave", "alice").unwrap());
        harness.line("n");
        assert_eq!(harness.sent(), vec![Frame::ko_private("dave", "alice").unwrap()]);
    }

    #[test]
    fn test_request_sent_once_and_refusal_clears_queue() {
        let mut harness = Harness::logged_in("alice");
        harness.line("/bob hi");
        harness.line("/bob again");
        assert_eq!(harness.sent(), vec![Frame::request_private("alice", "bob").unwrap()]);

        harness.server(Frame::ko_private("alice", "bob").unwrap());
        assert_eq!(
            harness.events(),
            vec![ChatEvent::PrivateRefused {
                target: "bob".to_string()
            }]
        );
        harness.line("/bob third");
        assert_eq!(harness.sent(), vec![Frame::request_private("alice", "bob").unwrap()]);
    }

    #[test]
    fn test_file_request_waits_for_established() {
        let mut harness = Harness::logged_in("alice");
        harness.line("$bob notes.txt");
        harness.sent();
        harness.server(Frame::id_private("alice", "bob", 9).unwrap());

        let token = harness.chat.link("bob").unwrap().token();
        assert!(harness.endpoints.is_connecting(token));
        assert!(harness.endpoints.finish_connect(token, MemoryTransport::new()));
        harness.chat.on_connect(&mut harness.endpoints, token);
        assert_eq!(&harness.written(token)[..], &Frame::login_private(9).to_bytes()[..]);

        harness.feed(token, &Frame::Established.to_bytes());
        assert_eq!(
            harness.events(),
            vec![ChatEvent::LinkEstablished {
                peer: "bob".to_string()
            }]
        );
        let request = LinkPayload::FileRequest(FileRequest::new("notes.txt")).encode();
        assert_eq!(&harness.written(token)[..], &request[..]);

        let response = LinkPayload::FileResponse(FileResponse::Found {
            body: "the notes".to_string(),
        });
        harness.feed(token, &response.encode());
        assert_eq!(
            harness.events(),
            vec![ChatEvent::FileReceived {
                peer: "bob".to_string(),
                path: "notes.txt".to_string(),
                body: "the notes".to_string()
            }]
        );
    }

    #[test]
    fn test_serving_files_and_texts() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("shared.txt"), "shared body").unwrap();
        let mut harness = Harness::new(Some(FileStore::new(dir.path())));
        harness.line("alice");
        harness.server(Frame::LoginAccepted);
        harness.server(Frame::id_private("bob", "alice", 3).unwrap());
        let token = harness.establish("bob");
        harness.written(token);
        harness.events();

        let mut incoming = BytesMut::new();
        incoming.extend_from_slice(&LinkPayload::Text("direct hi".to_string()).encode());
        incoming.extend_from_slice(&LinkPayload::FileRequest(FileRequest::new("shared.txt")).encode());
        incoming.extend_from_slice(&LinkPayload::FileRequest(FileRequest::new("../x")).encode());
        harness.feed(token, &incoming);

        let mut expected = BytesMut::new();
        expected.extend_from_slice(
            &LinkPayload::FileResponse(FileResponse::Found {
                body: "shared body".to_string(),
            })
            .encode(),
        );
        expected.extend_from_slice(&LinkPayload::FileResponse(FileResponse::NotFound).encode());
        assert_eq!(harness.written(token), expected);
        assert_eq!(
            harness.events(),
            vec![
                ChatEvent::DirectMessage {
                    peer: "bob".to_string(),
                    text: "direct hi".to_string()
                },
                ChatEvent::FileServed {
                    peer: "bob".to_string(),
                    path: "shared.txt".to_string(),
                    found: true
                },
                ChatEvent::FileServed {
                    peer: "bob".to_string(),
                    path: "../x".to_string(),
                    found: false
                }
            ]
        );

        harness.line("/bob reply");
        assert_eq!(
            &harness.written(token)[..],
            &LinkPayload::Text("reply".to_string()).encode()[..]
        );
    }

    #[test]
    fn test_file_over_payload_limit_is_not_found() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("big.txt"), "b".repeat(5000)).unwrap();
        let mut server_side = Harness::new(Some(FileStore::new(dir.path())));
        server_side.line("bob");
        server_side.server(Frame::LoginAccepted);
        server_side.server(Frame::id_private("alice", "bob", 4).unwrap());
        let served = server_side.establish("alice");
        server_side.written(served);
        server_side.events();

        let mut requester = Harness::logged_in("alice");
        requester.line("$bob big.txt");
        requester.server(Frame::id_private("alice", "bob", 4).unwrap());
        let token = requester.chat.link("bob").unwrap().token();
        assert!(requester.endpoints.finish_connect(token, MemoryTransport::new()));
        requester.chat.on_connect(&mut requester.endpoints, token);
        requester.written(token);
        requester.feed(token, &Frame::Established.to_bytes());
        requester.events();

        let request = requester.written(token);
        server_side.feed(served, &request);
        assert_eq!(
            server_side.events(),
            vec![ChatEvent::FileServed {
                peer: "alice".to_string(),
                path: "big.txt".to_string(),
                found: false
            }]
        );

        let response = server_side.written(served);
        requester.feed(token, &response);
        assert_eq!(
            requester.events(),
            vec![ChatEvent::FileNotFound {
                peer: "bob".to_string(),
                path: "big.txt".to_string()
            }]
        );
        assert_eq!(requester.endpoints.closing().count(), 0);
        assert!(requester.chat.link("bob").is_some());
    }

    #[test]
    fn test_direct_text_over_payload_limit_is_refused() {
        let mut harness = Harness::logged_in("alice");
        harness.server(Frame::id_private("alice", "bob", 6).unwrap());
        let token = harness.establish("bob");
        harness.written(token);
        harness.events();

        harness.line(&format!("/bob {}", "x".repeat(5000)));
        assert!(harness.written(token).is_empty());
        assert!(matches!(harness.events()[..], [ChatEvent::Notice(_)]));
        assert!(harness.sent().is_empty());
    }

    #[test]
    fn test_link_and_server_close() {
        let mut harness = Harness::logged_in("alice");
        harness.server(Frame::id_private("alice", "bob", 5).unwrap());
        let token = harness.establish("bob");
        harness.events();

        harness.chat.on_close(&mut harness.endpoints, token);
        assert!(harness.chat.link("bob").is_none());
        assert_eq!(
            harness.events(),
            vec![ChatEvent::LinkClosed {
                peer: "bob".to_string()
            }]
        );

        let main = harness.main;
        harness.chat.on_close(&mut harness.endpoints, main);
        assert_eq!(harness.events(), vec![ChatEvent::Disconnected]);
        assert!(harness.endpoints.is_stop_requested());
    }
}
