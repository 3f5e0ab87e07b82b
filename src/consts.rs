use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

pub const MAX_FRAGMENT_SIZE: usize = 1024;
// Extra client receive space: a relayed MSG_INCOMING header adds at most ~100 bytes
// (IPv6 address, port, timestamp, count) to a username no longer than one fragment.
pub const HEADER_HEADROOM: usize = 256;
pub const SERVER_PORT: u16 = 7070;
pub const SERVER_BIND_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), SERVER_PORT);
pub const SERVER_CONNECT_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), SERVER_PORT);
pub const CLIENT_BIND_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
pub const SEND_PACING: Duration = Duration::from_millis(1);
pub const RECV_TIMEOUT: Duration = Duration::from_secs(1);
pub const TIMESTAMP_FORMAT: &str = "%H:%M:%S %d/%m/%Y";

pub(crate) const SOCKET_RECV_BUF_SIZE: usize = 4 * 1024 * 1024;
pub(crate) const SOCKET_SEND_BUF_SIZE: usize = 4 * 1024 * 1024;
