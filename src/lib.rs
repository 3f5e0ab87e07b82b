//! A multi-user chat over raw UDP datagrams.
//!
//! Every chat message is announced by a text header declaring how many fragment
//! datagrams follow, then sent as fixed-size fragments. Receivers buffer fragments
//! per sender until the declared count is reached and reassemble them in arrival
//! order. There is no retransmission or sequencing, so the protocol is only
//! reliable on lossless, in-order transports such as loopback.

mod consts;
mod error;
mod socket;
mod transceiver;

#[cfg(test)]
mod simulator;

pub mod client;
pub mod codec;
pub mod reassembly;
pub mod registry;
pub mod server;
pub mod time;
pub mod transmitter;

pub use client::{ChatMessage, Client, ClientConfig, ClientEvent, ClientSender};
pub use consts::{
    CLIENT_BIND_ADDR, HEADER_HEADROOM, MAX_FRAGMENT_SIZE, RECV_TIMEOUT, SEND_PACING,
    SERVER_BIND_ADDR, SERVER_CONNECT_ADDR, SERVER_PORT,
};
pub use error::{ChatError, Result};
pub use server::{Server, ServerConfig, ServerEvent};
pub use socket::ChatSocket;
pub use transceiver::Transceiver;
