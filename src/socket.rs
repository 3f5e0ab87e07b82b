use std::io::{self};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::consts::{SOCKET_RECV_BUF_SIZE, SOCKET_SEND_BUF_SIZE};
use crate::transceiver::Transceiver;

#[derive(thiserror::Error, Debug)]
#[error("failed to create and bind udp socket: {0}")]
pub struct Error(#[from] std::io::Error);

pub type Result<T> = std::result::Result<T, Error>;

/// A UDP socket with a bounded receive wait.
///
/// The socket is closed when the value is dropped, so ownership guarantees it is released exactly once.
pub struct ChatSocket(pub UdpSocket);

impl ChatSocket {
    pub fn new(addr: impl ToSocketAddrs, recv_timeout: Duration) -> Result<Self> {
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no socket addresses found")
        })?;
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        if addr.is_ipv6() {
            socket.set_only_v6(true)?;
        }
        socket.set_send_buffer_size(SOCKET_SEND_BUF_SIZE)?;
        socket.set_recv_buffer_size(SOCKET_RECV_BUF_SIZE)?;
        socket.bind(&addr.into())?;
        // a zero duration is rejected by the OS, fall back to the shortest wait
        socket.set_read_timeout(Some(recv_timeout.max(Duration::from_millis(1))))?;
        log::debug!("udp socket bound to {addr}");
        Ok(ChatSocket(socket.into()))
    }
}

impl Transceiver for ChatSocket {
    type Error = io::Error;

    fn addr(&self) -> SocketAddr {
        self.0.local_addr().expect("address should be bound")
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.0.recv_from(buf) {
            Ok((len, addr)) => Ok(Some((len, addr))),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn send(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.0.send_to(buf, addr)
    }
}
