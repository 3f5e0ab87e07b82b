use std::net::SocketAddr;

use crate::error::ChatError;

/// A trait for sending and receiving datagrams.
///
/// Both the server and client use a statically dispatched generic type `T: Transceiver` to send and receive data,
/// which allows any type that implements this trait to stand in for the network socket.
///
/// See [`ChatSocket`](crate::ChatSocket) for the default implementation backed by a real UDP socket.
pub trait Transceiver {
    type Error: Into<ChatError>;
    /// Returns the local address of the socket (i.e. the address it is bound to).
    fn addr(&self) -> SocketAddr;
    /// Receives a datagram, if one arrives within the transceiver's bounded wait.
    ///
    /// Must **NOT** block indefinitely, callers rely on regular returns to observe stop flags.
    fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, Self::Error>;
    /// Sends a datagram to the specified address.
    fn send(&self, buf: &[u8], addr: SocketAddr) -> Result<usize, Self::Error>;
}
