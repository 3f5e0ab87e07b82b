use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Socket(#[from] crate::socket::Error),
    #[error("invalid control message: {0}")]
    Codec(#[from] crate::codec::Error),
    #[error("fragment size must be greater than zero")]
    ZeroFragmentSize,
    #[error("username must not be empty")]
    EmptyUsername,
}

impl ChatError {
    /// Returns true if the transport reported that the remote end reset the connection.
    ///
    /// On some platforms an ICMP port-unreachable for a previously sent datagram
    /// surfaces as this error on the next receive.
    pub fn is_connection_reset(&self) -> bool {
        matches!(self, ChatError::Io(e) if e.kind() == io::ErrorKind::ConnectionReset)
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
