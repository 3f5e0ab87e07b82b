use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use crate::codec::{self, Control, IncomingHeader};
use crate::consts::{MAX_FRAGMENT_SIZE, RECV_TIMEOUT, SEND_PACING};
use crate::error::{ChatError, Result};
use crate::reassembly::{Appended, Completed, Reassembly};
use crate::registry::PeerRegistry;
use crate::socket::ChatSocket;
use crate::time::timestamp;
use crate::transceiver::Transceiver;
use crate::transmitter::{fragment_count, send_framed};

/// Configuration for a server
///
/// * `fragment_size` - The maximum number of payload bytes carried by one relayed fragment.
/// * `send_pacing` - The delay between consecutive datagrams of a relayed message.
/// * `recv_timeout` - How long a single receive waits for a datagram.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use udp_chat::ServerConfig;
///
/// let cfg = ServerConfig::new()
///     .fragment_size(512)
///     .send_pacing(Duration::ZERO);
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    fragment_size: usize,
    send_pacing: Duration,
    recv_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            fragment_size: MAX_FRAGMENT_SIZE,
            send_pacing: SEND_PACING,
            recv_timeout: RECV_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }
    /// Set the maximum fragment size. The default is 1024 bytes.
    pub fn fragment_size(mut self, fragment_size: usize) -> Self {
        self.fragment_size = fragment_size;
        self
    }
    /// Set the delay between datagrams of a relayed message. The default is 1ms, `Duration::ZERO` disables pacing.
    pub fn send_pacing(mut self, pacing: Duration) -> Self {
        self.send_pacing = pacing;
        self
    }
    /// Set how long a receive waits for a datagram. The default is 1 second.
    pub fn recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }
}

/// Something the server did in response to a datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Joined { addr: SocketAddr, username: String },
    Left { addr: SocketAddr, username: String },
    /// The transport reported the peer unreachable, it was dropped as if it had left.
    ConnectionLost { addr: SocketAddr, username: String },
    /// A message was reassembled and relayed to every other peer.
    Message {
        from: SocketAddr,
        username: String,
        text: String,
    },
}

/// The chat server.
///
/// A single-threaded dispatch loop: every datagram is either the next fragment of an upload
/// in progress from its sender, or a control message. Completed uploads are relayed to every
/// other registered peer under a `MSG_INCOMING` header naming the original sender.
///
/// # Example
/// ```no_run
/// use udp_chat::Server;
///
/// let mut server = Server::new("0.0.0.0:7070").unwrap();
/// server.run();
/// ```
pub struct Server<T: Transceiver> {
    transceiver: T,
    registry: PeerRegistry,
    uploads: Reassembly<String>,
    // the peer of the most recent datagram, blamed for connection reset errors
    last_sender: Option<SocketAddr>,
    buf: Vec<u8>,
    cfg: ServerConfig,
}

impl Server<ChatSocket> {
    /// Binds a server to `addr` with the default configuration.
    pub fn new(addr: impl ToSocketAddrs) -> Result<Self> {
        Self::with_config(addr, ServerConfig::default())
    }
    pub fn with_config(addr: impl ToSocketAddrs, cfg: ServerConfig) -> Result<Self> {
        let socket = ChatSocket::new(addr, cfg.recv_timeout)?;
        let server = Self::with_transceiver(socket, cfg)?;
        log::info!("server listening on {}", server.addr());
        Ok(server)
    }
}

impl<T: Transceiver> Server<T> {
    pub fn with_transceiver(transceiver: T, cfg: ServerConfig) -> Result<Self> {
        if cfg.fragment_size == 0 {
            return Err(ChatError::ZeroFragmentSize);
        }
        Ok(Self {
            transceiver,
            registry: PeerRegistry::new(),
            uploads: Reassembly::new(),
            last_sender: None,
            // clients never send more than a fragment, and capping the username length at
            // the fragment size keeps every relayed header within a client's receive buffer
            buf: vec![0u8; cfg.fragment_size],
            cfg,
        })
    }
    /// Gets the local `SocketAddr` that the server is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.transceiver.addr()
    }
    pub fn peers(&self) -> &PeerRegistry {
        &self.registry
    }
    /// Number of peers with an unfinished upload.
    pub fn pending_uploads(&self) -> usize {
        self.uploads.len()
    }
    /// Runs the dispatch loop forever. Errors are logged and never stop the loop.
    pub fn run(&mut self) -> ! {
        loop {
            if let Err(e) = self.recv() {
                log::error!("server failed to receive: {e}");
            }
        }
    }
    /// Waits for at most one datagram and processes it.
    ///
    /// Returns `Ok(None)` if nothing arrived or the datagram did not change anything observable.
    pub fn recv(&mut self) -> Result<Option<ServerEvent>> {
        match self.transceiver.recv(&mut self.buf).map_err(Into::<ChatError>::into) {
            Ok(None) => Ok(None),
            Ok(Some((size, from))) => {
                self.last_sender = Some(from);
                let data = self.buf[..size].to_vec();
                Ok(self.process(&data, from))
            }
            Err(e) if e.is_connection_reset() => {
                let Some(addr) = self.last_sender.take() else {
                    log::debug!("server ignored connection reset with no known peer");
                    return Ok(None);
                };
                log::debug!("connection reset by {addr}");
                Ok(self.disconnect_peer(addr))
            }
            Err(e) => Err(e),
        }
    }
    /// Processes one datagram received from `from`.
    pub fn process(&mut self, data: &[u8], from: SocketAddr) -> Option<ServerEvent> {
        match self.uploads.append(from, data) {
            Appended::Complete(done) => return self.relay(from, done),
            Appended::Pending { received, expected } => {
                log::trace!("server received fragment {received}/{expected} from {from}");
                return None;
            }
            Appended::NotExpected => {}
        }
        let control = match Control::decode(data) {
            Ok(control) => control,
            Err(codec::Error::NotText(_)) => {
                log::debug!(
                    "server ignored {} bytes of binary data from {from}, no upload in progress",
                    data.len()
                );
                return None;
            }
            Err(e) => {
                log::warn!("server ignored datagram from {from}: {e}");
                return None;
            }
        };
        log::trace!("server received {control} from {from}");
        match control {
            Control::Hi { username } => Some(self.join(from, username)),
            Control::Bye => self.leave(from),
            Control::UploadStart { fragments } => {
                let Some(username) = self.registry.username(&from) else {
                    log::debug!("server ignored upload start from unregistered peer {from}");
                    return None;
                };
                let username = username.to_string();
                self.uploads.begin(from, fragments, username);
                None
            }
            other => {
                log::debug!("server ignored unexpected control message from {from}: {other}");
                None
            }
        }
    }
    /// Drops `addr` as if its connection was lost, notifying the remaining peers.
    pub fn disconnect_peer(&mut self, addr: SocketAddr) -> Option<ServerEvent> {
        self.uploads.cancel(&addr);
        let username = self.registry.unregister(&addr)?;
        log::info!("{username} left the room (connection lost)");
        self.broadcast(
            &Control::Notify(format!("{username} left the room (connection lost).")),
            None,
        );
        Some(ServerEvent::ConnectionLost { addr, username })
    }
    fn join(&mut self, addr: SocketAddr, username: String) -> ServerEvent {
        if let Some(previous) = self.registry.register(addr, username.clone()) {
            log::debug!("{addr} re-registered, previously known as {previous}");
        }
        log::info!("{username} joined the room");
        self.broadcast(
            &Control::Notify(format!("{username} joined the room.")),
            Some(&addr),
        );
        ServerEvent::Joined { addr, username }
    }
    fn leave(&mut self, addr: SocketAddr) -> Option<ServerEvent> {
        self.uploads.cancel(&addr);
        let Some(username) = self.registry.unregister(&addr) else {
            log::debug!("server ignored leave from unregistered peer {addr}");
            return None;
        };
        log::info!("{username} left the room");
        self.broadcast(&Control::Notify(format!("{username} left the room.")), None);
        Some(ServerEvent::Left { addr, username })
    }
    fn relay(&mut self, from: SocketAddr, done: Completed<String>) -> Option<ServerEvent> {
        if !done.is_valid_utf8() {
            log::debug!("message from {from} is not valid utf-8, decoded lossily");
        }
        let text = done.text().into_owned();
        let username = done.meta;
        let timestamp = timestamp();
        log::info!("{}:{}/~{username}: {text} {timestamp}", from.ip(), from.port());
        let header = Control::Incoming(IncomingHeader {
            ip: from.ip().to_string(),
            port: from.port(),
            username: username.clone(),
            timestamp,
            fragments: fragment_count(done.payload.len(), self.cfg.fragment_size),
        })
        .to_bytes();
        for target in self.registry.broadcast_targets(Some(&from)) {
            if let Err(e) = send_framed(
                &self.transceiver,
                target,
                &header,
                &done.payload,
                self.cfg.fragment_size,
                self.cfg.send_pacing,
            ) {
                log::error!("server failed to relay message to {target}: {e}");
            }
        }
        Some(ServerEvent::Message {
            from,
            username,
            text,
        })
    }
    fn broadcast(&self, control: &Control, excluding: Option<&SocketAddr>) {
        let bytes = control.to_bytes();
        for target in self.registry.broadcast_targets(excluding) {
            if let Err(e) = self.transceiver.send(&bytes, target) {
                let e: ChatError = e.into();
                log::error!("server failed to notify {target}: {e}");
            }
        }
    }
}
