use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use crate::codec::{self, Control, IncomingHeader};
use crate::consts::{HEADER_HEADROOM, MAX_FRAGMENT_SIZE, RECV_TIMEOUT, SEND_PACING};
use crate::error::{ChatError, Result};
use crate::reassembly::{Appended, Reassembly};
use crate::socket::ChatSocket;
use crate::transceiver::Transceiver;
use crate::transmitter::{fragment_count, send_framed};

/// Configuration for a client
///
/// * `fragment_size` - The maximum number of payload bytes carried by one fragment.
/// * `send_pacing` - The delay between consecutive datagrams of an outgoing message.
/// * `recv_timeout` - How long a single receive waits, bounding how late a stop flag is noticed.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    fragment_size: usize,
    send_pacing: Duration,
    recv_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            fragment_size: MAX_FRAGMENT_SIZE,
            send_pacing: SEND_PACING,
            recv_timeout: RECV_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }
    /// Set the maximum fragment size. The default is 1024 bytes.
    pub fn fragment_size(mut self, fragment_size: usize) -> Self {
        self.fragment_size = fragment_size;
        self
    }
    /// Set the delay between datagrams of an outgoing message. The default is 1ms.
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

/// A chat line relayed by the server on behalf of another peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub ip: String,
    pub port: u16,
    pub username: String,
    pub text: String,
    pub timestamp: String,
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/~{}: {} {}",
            self.ip, self.port, self.username, self.text, self.timestamp
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Message(ChatMessage),
    /// A server notice, e.g. someone joined or left.
    Notice(String),
}

/// The sending half of a client, cheap to clone and usable from another thread.
pub struct ClientSender<T> {
    transceiver: Arc<T>,
    server_addr: SocketAddr,
    fragment_size: usize,
    send_pacing: Duration,
}

impl<T> Clone for ClientSender<T> {
    fn clone(&self) -> Self {
        Self {
            transceiver: Arc::clone(&self.transceiver),
            server_addr: self.server_addr,
            fragment_size: self.fragment_size,
            send_pacing: self.send_pacing,
        }
    }
}

impl<T: Transceiver> ClientSender<T> {
    fn send_control(&self, control: &Control) -> Result<()> {
        log::trace!("client sending {control} to {}", self.server_addr);
        self.transceiver
            .send(&control.to_bytes(), self.server_addr)
            .map_err(Into::<ChatError>::into)?;
        Ok(())
    }
    /// Registers with the server under `username`.
    pub fn join(&self, username: &str) -> Result<()> {
        if username.trim().is_empty() {
            return Err(ChatError::EmptyUsername);
        }
        self.send_control(&Control::Hi {
            username: username.to_string(),
        })?;
        log::info!("client joined {} as {username}", self.server_addr);
        Ok(())
    }
    pub fn leave(&self) -> Result<()> {
        self.send_control(&Control::Bye)?;
        log::info!("client left {}", self.server_addr);
        Ok(())
    }
    /// Sends `text` as one message: an upload header followed by its fragments.
    ///
    /// Blank text is not sent. Returns the number of fragments sent.
    pub fn send_text(&self, text: &str) -> Result<usize> {
        if text.trim().is_empty() {
            return Ok(0);
        }
        let payload = text.as_bytes();
        let fragments = fragment_count(payload.len(), self.fragment_size).max(1);
        send_framed(
            &*self.transceiver,
            self.server_addr,
            &Control::UploadStart { fragments }.to_bytes(),
            payload,
            self.fragment_size,
            self.send_pacing,
        )
    }
}

/// The chat client.
///
/// Receiving (and the reassembly state it needs) stays with the `Client`, sending goes through
/// a [`ClientSender`] so a console thread can send while another thread blocks in [`Client::recv`].
///
/// # Example
/// ```no_run
/// use udp_chat::Client;
///
/// let mut client = Client::new("127.0.0.1:7070").unwrap();
/// let sender = client.sender();
/// sender.join("alice").unwrap();
/// sender.send_text("hello everyone").unwrap();
/// if let Ok(Some(event)) = client.recv() {
///     println!("{event:?}");
/// }
/// sender.leave().unwrap();
/// ```
pub struct Client<T: Transceiver> {
    sender: ClientSender<T>,
    incoming: Reassembly<IncomingHeader>,
    buf: Vec<u8>,
}

impl Client<ChatSocket> {
    /// Creates a client on an ephemeral local port talking to `server_addr`.
    pub fn new(server_addr: impl ToSocketAddrs) -> Result<Self> {
        Self::with_config(
            crate::consts::CLIENT_BIND_ADDR,
            server_addr,
            ClientConfig::default(),
        )
    }
    pub fn with_config(
        bind_addr: impl ToSocketAddrs,
        server_addr: impl ToSocketAddrs,
        cfg: ClientConfig,
    ) -> Result<Self> {
        let server_addr = server_addr.to_socket_addrs()?.next().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "no server address found")
        })?;
        let socket = ChatSocket::new(bind_addr, cfg.recv_timeout)?;
        let client = Self::with_transceiver(socket, server_addr, cfg)?;
        log::info!("client started on {}", client.addr());
        Ok(client)
    }
}

impl<T: Transceiver> Client<T> {
    pub fn with_transceiver(transceiver: T, server_addr: SocketAddr, cfg: ClientConfig) -> Result<Self> {
        if cfg.fragment_size == 0 {
            return Err(ChatError::ZeroFragmentSize);
        }
        Ok(Self {
            sender: ClientSender {
                transceiver: Arc::new(transceiver),
                server_addr,
                fragment_size: cfg.fragment_size,
                send_pacing: cfg.send_pacing,
            },
            incoming: Reassembly::new(),
            buf: vec![0u8; cfg.fragment_size + HEADER_HEADROOM],
        })
    }
    /// Gets the local `SocketAddr` that the client is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.sender.transceiver.addr()
    }
    pub fn server_addr(&self) -> SocketAddr {
        self.sender.server_addr
    }
    pub fn sender(&self) -> ClientSender<T> {
        self.sender.clone()
    }
    /// Returns true while a relayed message is only partially received.
    pub fn is_receiving(&self) -> bool {
        self.incoming.is_expecting(&self.sender.server_addr)
    }
    /// Waits for at most one datagram and processes it.
    ///
    /// Returns `Ok(None)` if nothing arrived or the datagram did not complete anything displayable.
    pub fn recv(&mut self) -> Result<Option<ClientEvent>> {
        let Some((size, from)) = self
            .sender
            .transceiver
            .recv(&mut self.buf)
            .map_err(Into::<ChatError>::into)?
        else {
            return Ok(None);
        };
        let data = self.buf[..size].to_vec();
        Ok(self.process(&data, from))
    }
    /// Processes one datagram received from `from`.
    pub fn process(&mut self, data: &[u8], from: SocketAddr) -> Option<ClientEvent> {
        if from != self.sender.server_addr {
            log::trace!("client ignored datagram from {from}, not the server");
            return None;
        }
        match self.incoming.append(from, data) {
            Appended::Complete(done) => {
                if !done.is_valid_utf8() {
                    log::debug!("relayed message is not valid utf-8, decoded lossily");
                }
                let text = done.text().into_owned();
                let IncomingHeader {
                    ip,
                    port,
                    username,
                    timestamp,
                    ..
                } = done.meta;
                return Some(ClientEvent::Message(ChatMessage {
                    ip,
                    port,
                    username,
                    text,
                    timestamp,
                }));
            }
            Appended::Pending { received, expected } => {
                log::trace!("client received fragment {received}/{expected}");
                return None;
            }
            Appended::NotExpected => {}
        }
        match Control::decode(data) {
            Ok(Control::Notify(notice)) => Some(ClientEvent::Notice(notice)),
            Ok(Control::Incoming(header)) => {
                log::trace!(
                    "client expecting {} fragments from {}",
                    header.fragments,
                    header.username
                );
                self.incoming.begin(from, header.fragments, header);
                None
            }
            Ok(other) => {
                log::warn!("client ignored unexpected control message: {other}");
                None
            }
            Err(codec::Error::NotText(_)) => {
                log::warn!(
                    "client received {} bytes of binary data outside of a message",
                    data.len()
                );
                None
            }
            Err(e) => {
                log::error!("client ignored datagram from server: {e}");
                None
            }
        }
    }
}
