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

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{AbortHandle, JoinSet};
use tokio::time;
use tracing::{debug, error, info, trace, warn};

use super::connection::{Connection, Mode};
use super::handoff::HandOffReceiver;
use super::interest::Interest;
use super::transport::Transport;
use crate::protocol::Frame;
use crate::service::Shutdown;
use crate::{AppError, AppResult};

/// Identifies one connection for as long as the reactor runs. Tokens are never
/// reused, so a stale token simply finds nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u64);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Session logic driven by the [`Reactor`].
///
/// Every callback runs on the reactor's thread and must not block. Effects on
/// connections go through [`Endpoints`]; closes and connects requested there
/// are carried out by the reactor once the callback returns.
pub trait Protocol<T: Transport> {
    /// Work handed to the reactor from other threads.
    type Request;

    /// Mode given to connections accepted from a listener.
    fn accept_mode(&self) -> Mode {
        Mode::framed()
    }

    fn on_accept(&mut self, _endpoints: &mut Endpoints<T>, _token: Token, _peer: SocketAddr) {}

    /// A connection requested with [`Endpoints::connect`] is established.
    fn on_connect(&mut self, _endpoints: &mut Endpoints<T>, _token: Token) {}

    fn on_frame(&mut self, endpoints: &mut Endpoints<T>, token: Token, frame: Frame);

    /// Called after every read or write on `token`, once its frames have been
    /// dispatched. Raw mode connections consume their input here.
    fn on_progress(&mut self, _endpoints: &mut Endpoints<T>, _token: Token) {}

    fn on_request(&mut self, _endpoints: &mut Endpoints<T>, _request: Self::Request) {}

    /// `token` is gone, or its connect attempt failed.
    fn on_close(&mut self, endpoints: &mut Endpoints<T>, token: Token);
}

/// The connections of a reactor, as seen by the session logic.
#[derive(Debug)]
pub struct Endpoints<T> {
    capacity: usize,
    next_token: u64,
    connections: HashMap<Token, Connection<T>>,
    connecting: HashMap<Token, Mode>,
    connect_requests: Vec<(Token, SocketAddr)>,
    touched: BTreeSet<Token>,
    closing: VecDeque<Token>,
    stop_requested: bool,
}

impl<T: Transport> Endpoints<T> {
    /// `capacity` bounds the buffers of every connection created here.
    pub fn new(capacity: usize) -> Self {
        Endpoints {
            capacity,
            next_token: 0,
            connections: HashMap::new(),
            connecting: HashMap::new(),
            connect_requests: Vec::new(),
            touched: BTreeSet::new(),
            closing: VecDeque::new(),
            stop_requested: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn next_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// Adds a connection over `transport`.
    pub fn insert(&mut self, transport: T, mode: Mode) -> Token {
        let token = self.next_token();
        self.insert_at(token, transport, mode);
        token
    }

    fn insert_at(&mut self, token: Token, transport: T, mode: Mode) {
        self.connections
            .insert(token, Connection::with_mode(transport, self.capacity, mode));
        self.touched.insert(token);
    }

    pub fn contains(&self, token: Token) -> bool {
        self.connections.contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Mutable access to a connection. Its interest is recomputed afterwards.
    pub fn get_mut(&mut self, token: Token) -> Option<&mut Connection<T>> {
        let connection = self.connections.get_mut(&token)?;
        self.touched.insert(token);
        Some(connection)
    }

    /// Queues `frame` on `token`, `false` when there is no such connection.
    pub fn enqueue(&mut self, token: Token, frame: Frame) -> bool {
        match self.get_mut(token) {
            Some(connection) => {
                connection.enqueue(frame);
                true
            }
            None => false,
        }
    }

    pub fn enqueue_bytes(&mut self, token: Token, bytes: Bytes) -> bool {
        match self.get_mut(token) {
            Some(connection) => {
                connection.enqueue_bytes(bytes);
                true
            }
            None => false,
        }
    }

    /// Moves input bytes of `from` into the output of `to`, see
    /// [`Connection::splice_into`].
    pub fn splice(&mut self, from: Token, to: Token) -> usize {
        if from == to {
            return 0;
        }
        let Some(mut source) = self.connections.remove(&from) else {
            return 0;
        };
        let moved = match self.connections.get_mut(&to) {
            Some(sink) => source.splice_into(sink),
            None => 0,
        };
        self.connections.insert(from, source);
        self.touched.insert(from);
        self.touched.insert(to);
        moved
    }

    /// Schedules `token` for closing. Queued output that was not written yet
    /// is dropped with the connection.
    pub fn close(&mut self, token: Token) {
        if !self.closing.contains(&token) {
            self.closing.push_back(token);
        }
    }

    /// Requests a new outbound connection. The token is valid right away;
    /// [`Protocol::on_connect`] or [`Protocol::on_close`] follows.
    pub fn connect(&mut self, addr: SocketAddr, mode: Mode) -> Token {
        let token = self.next_token();
        self.connecting.insert(token, mode);
        self.connect_requests.push((token, addr));
        token
    }

    pub fn is_connecting(&self, token: Token) -> bool {
        self.connecting.contains_key(&token)
    }

    /// Turns a pending connect into a connection over `transport`, with the
    /// mode it was requested with. `false` if `token` was closed meanwhile.
    pub fn finish_connect(&mut self, token: Token, transport: T) -> bool {
        match self.connecting.remove(&token) {
            Some(mode) => {
                self.insert_at(token, transport, mode);
                true
            }
            None => false,
        }
    }

    /// Asks the reactor to stop once the current event is handled.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Tokens scheduled by [`Endpoints::close`] and not processed yet.
    pub fn closing(&self) -> impl Iterator<Item = Token> + '_ {
        self.closing.iter().copied()
    }

    /// Removes `token`, `true` if it was a connection or a pending connect.
    fn remove(&mut self, token: Token) -> bool {
        self.touched.remove(&token);
        let connected = self.connections.remove(&token).is_some();
        connected || self.connecting.remove(&token).is_some()
    }
}

struct Waiter {
    interest: Interest,
    generation: u64,
    handle: AbortHandle,
}

enum Event {
    Ready {
        token: Token,
        generation: u64,
        ready: std::io::Result<tokio::io::Ready>,
    },
    Accepted {
        listener: usize,
        result: AppResult<(TcpStream, SocketAddr)>,
    },
    Connected {
        token: Token,
        result: std::io::Result<TcpStream>,
    },
}

/// Single-threaded event loop multiplexing every connection of a process.
///
/// Each connection has at most one task waiting for the readiness it is
/// interested in. Completed waits, accepted sockets and finished connects come
/// back through one [`JoinSet`], and the loop dispatches them one at a time to
/// the [`Protocol`], so the session state needs no locking.
pub struct Reactor<P: Protocol<Arc<TcpStream>>> {
    protocol: P,
    endpoints: Endpoints<Arc<TcpStream>>,
    listeners: Vec<Arc<TcpListener>>,
    handoff: Option<HandOffReceiver<P::Request>>,
    shutdown: Shutdown,
    tasks: JoinSet<Event>,
    waiters: HashMap<Token, Waiter>,
    generation: u64,
}

impl<P: Protocol<Arc<TcpStream>>> Reactor<P> {
    pub fn new(protocol: P, endpoints: Endpoints<Arc<TcpStream>>, shutdown: Shutdown) -> Self {
        Reactor {
            protocol,
            endpoints,
            listeners: Vec::new(),
            handoff: None,
            shutdown,
            tasks: JoinSet::new(),
            waiters: HashMap::new(),
            generation: 0,
        }
    }

    pub fn with_listener(mut self, listener: TcpListener) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn with_handoff(mut self, handoff: HandOffReceiver<P::Request>) -> Self {
        self.handoff = Some(handoff);
        self
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn local_addrs(&self) -> AppResult<Vec<SocketAddr>> {
        self.listeners
            .iter()
            .map(|listener| listener.local_addr().map_err(AppError::from))
            .collect()
    }

    /// Runs until shutdown is signalled or the protocol requests a stop. A
    /// listener that keeps failing is paused, not fatal. Every connection is
    /// closed on return.
    pub async fn run(mut self) -> AppResult<P> {
        for index in 0..self.listeners.len() {
            self.spawn_accept(index, Duration::ZERO);
        }
        self.settle();

        loop {
            if self.endpoints.is_stop_requested() {
                debug!("reactor stop requested");
                break;
            }
            let event = tokio::select! {
                _ = self.shutdown.recv() => {
                    info!("reactor received shutdown signal");
                    break;
                }
                request = next_request(&self.handoff) => {
                    match request {
                        Some(request) => self.protocol.on_request(&mut self.endpoints, request),
                        None => self.handoff = None,
                    }
                    None
                }
                joined = self.tasks.join_next(), if !self.tasks.is_empty() => joined,
            };

            // Work handed off by other threads goes before readiness events.
            if let Some(handoff) = &self.handoff {
                for request in handoff.drain() {
                    self.protocol.on_request(&mut self.endpoints, request);
                }
            }

            match event {
                Some(Ok(event)) => self.dispatch(event),
                Some(Err(join_err)) if join_err.is_panic() => {
                    error!("reactor task panicked: {:?}", join_err);
                }
                Some(Err(_)) | None => {}
            }
            self.settle();
        }

        self.tasks.shutdown().await;
        debug!(connections = self.endpoints.len(), "reactor closing connections");
        self.endpoints.connections.clear();
        Ok(self.protocol)
    }

    fn dispatch(&mut self, event: Event) {
        match event {
            Event::Ready {
                token,
                generation,
                ready,
            } => {
                match self.waiters.get(&token) {
                    Some(waiter) if waiter.generation == generation => {
                        self.waiters.remove(&token);
                    }
                    _ => {
                        trace!(%token, "stale readiness event");
                        return;
                    }
                }
                match ready {
                    Ok(ready) => self.on_ready(token, ready),
                    Err(err) => {
                        warn!(%token, "readiness error: {}", err);
                        self.endpoints.close(token);
                    }
                }
            }
            Event::Accepted { listener, result } => {
                let (stream, peer) = match result {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        error!(listener, "accept keeps failing, pausing listener: {}", err);
                        self.spawn_accept(listener, ACCEPT_PAUSE);
                        return;
                    }
                };
                self.spawn_accept(listener, Duration::ZERO);
                if let Err(err) = stream.set_nodelay(true) {
                    debug!("set_nodelay failed: {}", err);
                }
                let mode = self.protocol.accept_mode();
                let token = self.endpoints.insert(Arc::new(stream), mode);
                debug!(%token, %peer, "connection accepted");
                self.protocol.on_accept(&mut self.endpoints, token, peer);
            }
            Event::Connected { token, result } => match result {
                Ok(stream) => {
                    if self.endpoints.finish_connect(token, Arc::new(stream)) {
                        debug!(%token, "connection established");
                        self.protocol.on_connect(&mut self.endpoints, token);
                    } else {
                        debug!(%token, "connect finished after close, dropping it");
                    }
                }
                Err(err) => {
                    if self.endpoints.connecting.remove(&token).is_some() {
                        warn!(%token, "connect failed: {}", err);
                        self.protocol.on_close(&mut self.endpoints, token);
                    }
                }
            },
        }
    }

    fn on_ready(&mut self, token: Token, ready: tokio::io::Ready) {
        let Some(connection) = self.endpoints.get_mut(token) else {
            return;
        };
        if ready.is_writable() {
            if let Err(err) = connection.on_writable() {
                debug!(%token, "write failed: {}", err);
                self.endpoints.close(token);
                return;
            }
        }
        let mut frames = Vec::new();
        if ready.is_readable() || ready.is_read_closed() {
            match connection.on_readable() {
                Ok(decoded) => frames = decoded,
                Err(err) => {
                    debug!(%token, "read failed: {}", err);
                    self.endpoints.close(token);
                    return;
                }
            }
        }
        for frame in frames {
            trace!(%token, ?frame, "frame received");
            self.protocol.on_frame(&mut self.endpoints, token, frame);
        }
        self.protocol.on_progress(&mut self.endpoints, token);
    }

    /// Carries out closes and connects requested by the protocol, then waits
    /// on each touched connection for what it is interested in now.
    fn settle(&mut self) {
        loop {
            while let Some(token) = self.endpoints.closing.pop_front() {
                if let Some(waiter) = self.waiters.remove(&token) {
                    waiter.handle.abort();
                }
                if self.endpoints.remove(token) {
                    debug!(%token, "connection closed");
                    self.protocol.on_close(&mut self.endpoints, token);
                }
            }

            for (token, addr) in std::mem::take(&mut self.endpoints.connect_requests) {
                self.tasks.spawn(async move {
                    let result = TcpStream::connect(addr).await;
                    if let Ok(stream) = &result {
                        if let Err(err) = stream.set_nodelay(true) {
                            debug!("set_nodelay failed: {}", err);
                        }
                    }
                    Event::Connected { token, result }
                });
            }

            for token in std::mem::take(&mut self.endpoints.touched) {
                let Some(connection) = self.endpoints.connections.get(&token) else {
                    continue;
                };
                let interest = connection.interest();
                match interest.to_tokio() {
                    None if connection.is_stalled() => {
                        trace!(%token, "input full, waiting until it is consumed");
                        if let Some(waiter) = self.waiters.remove(&token) {
                            waiter.handle.abort();
                        }
                    }
                    None => self.endpoints.close(token),
                    Some(wanted) => {
                        if let Some(waiter) = self.waiters.get(&token) {
                            if waiter.interest == interest {
                                continue;
                            }
                            waiter.handle.abort();
                        }
                        let stream = connection.transport().clone();
                        self.generation += 1;
                        let generation = self.generation;
                        let handle = self.tasks.spawn(async move {
                            let ready = stream.ready(wanted).await;
                            Event::Ready {
                                token,
                                generation,
                                ready,
                            }
                        });
                        self.waiters.insert(
                            token,
                            Waiter {
                                interest,
                                generation,
                                handle,
                            },
                        );
                    }
                }
            }

            if self.endpoints.closing.is_empty() && self.endpoints.connect_requests.is_empty() {
                return;
            }
        }
    }

    /// Waits for the next connection on listener `index`, after `pause`.
    fn spawn_accept(&mut self, index: usize, pause: Duration) {
        let listener = self.listeners[index].clone();
        self.tasks.spawn(async move {
            if !pause.is_zero() {
                time::sleep(pause).await;
            }
            Event::Accepted {
                listener: index,
                result: accept(&listener).await,
            }
        });
    }
}

async fn next_request<R>(handoff: &Option<HandOffReceiver<R>>) -> Option<R> {
    match handoff {
        Some(handoff) => handoff.recv().await,
        None => std::future::pending().await,
    }
}

/// How long a listener rests once its retries are used up.
const ACCEPT_PAUSE: Duration = Duration::from_secs(MAX_ACCEPT_BACKOFF);

const MAX_ACCEPT_BACKOFF: u64 = 64;

async fn accept(listener: &TcpListener) -> AppResult<(TcpStream, SocketAddr)> {
    let mut backoff = 1;
    loop {
        match listener.accept().await {
            Ok(accepted) => return Ok(accepted),
            Err(err) => {
                if backoff > MAX_ACCEPT_BACKOFF {
                    return Err(AppError::IoError(err));
                }
                warn!("accept failed, retrying in {}s: {}", backoff, err);
            }
        }
        time::sleep(Duration::from_secs(backoff)).await;
        backoff *= 2;
    }
}
