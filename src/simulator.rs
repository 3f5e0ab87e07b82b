use std::{
    cell::RefCell,
    collections::HashMap,
    io::{self, ErrorKind},
    net::{Ipv4Addr, SocketAddr},
    rc::Rc,
    sync::mpsc::{self, Receiver, Sender},
};

use crate::transceiver::Transceiver;

#[derive(Debug, Clone)]
pub struct PacketEntry {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub packet: Vec<u8>,
}

pub struct Endpoint {
    pub tx: Sender<PacketEntry>,
    pub rx: Receiver<PacketEntry>,
    /// Sends to this endpoint fail with `ConnectionRefused`.
    pub unreachable: bool,
    /// The next receive on this endpoint fails with `ConnectionReset`.
    pub reset_next_recv: bool,
}

pub type RoutingTable = Rc<RefCell<HashMap<u16, Endpoint>>>;

/// A lossless, in-order network of loopback endpoints keyed by port.
pub struct NetworkSimulator {
    pub port: u16,
    pub routing_table: RoutingTable,
}

impl NetworkSimulator {
    pub fn new(port: u16, table: RoutingTable) -> Self {
        let (tx, rx) = mpsc::channel::<PacketEntry>();
        table.borrow_mut().insert(
            port,
            Endpoint {
                tx,
                rx,
                unreachable: false,
                reset_next_recv: false,
            },
        );
        Self {
            port,
            routing_table: table,
        }
    }
}

impl Transceiver for NetworkSimulator {
    type Error = io::Error;

    fn addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
    }

    fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, Self::Error> {
        let mut table = self.routing_table.borrow_mut();
        let Some(endpoint) = table.get_mut(&self.port) else {
            return Ok(None);
        };
        if endpoint.reset_next_recv {
            endpoint.reset_next_recv = false;
            return Err(io::Error::from(ErrorKind::ConnectionReset));
        }
        if let Ok(entry) = endpoint.rx.try_recv() {
            if entry.to != self.addr() {
                return Err(io::Error::new(
                    ErrorKind::Other,
                    "received packet for wrong address",
                ));
            }
            // like a real datagram socket, excess bytes are discarded
            let len = entry.packet.len().min(buf.len());
            buf[..len].copy_from_slice(&entry.packet[..len]);
            return Ok(Some((len, entry.from)));
        }
        Ok(None)
    }

    fn send(&self, buf: &[u8], addr: SocketAddr) -> Result<usize, Self::Error> {
        let table = self.routing_table.borrow();
        let Some(endpoint) = table.get(&addr.port()) else {
            // nobody listening, the datagram is silently lost
            return Ok(buf.len());
        };
        if endpoint.unreachable {
            return Err(io::Error::from(ErrorKind::ConnectionRefused));
        }
        endpoint
            .tx
            .send(PacketEntry {
                from: self.addr(),
                to: addr,
                packet: buf.to_vec(),
            })
            .ok();
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{
        client::{ChatMessage, Client, ClientConfig, ClientEvent},
        codec::{Control, IncomingHeader},
        server::{Server, ServerConfig, ServerEvent},
    };

    use super::*;

    const SERVER_PORT: u16 = 50000;
    const PUMP_ITERATIONS: usize = 512;

    fn enable_logging() {
        // Uncomment this to enable logging

        // static LOGGER_CELL: std::sync::OnceLock<()> = std::sync::OnceLock::new();
        // LOGGER_CELL.get_or_init(|| {
        //     env_logger::Builder::new()
        //         .filter(None, log::LevelFilter::Trace)
        //         .init();
        // });
    }

    fn server_addr() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, SERVER_PORT))
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, port))
    }

    fn new_server(table: &RoutingTable, fragment_size: usize) -> Server<NetworkSimulator> {
        let cfg = ServerConfig::new()
            .fragment_size(fragment_size)
            .send_pacing(Duration::ZERO);
        Server::with_transceiver(NetworkSimulator::new(SERVER_PORT, table.clone()), cfg).unwrap()
    }

    fn new_client(
        table: &RoutingTable,
        port: u16,
        fragment_size: usize,
    ) -> Client<NetworkSimulator> {
        let cfg = ClientConfig::new()
            .fragment_size(fragment_size)
            .send_pacing(Duration::ZERO);
        Client::with_transceiver(NetworkSimulator::new(port, table.clone()), server_addr(), cfg)
            .unwrap()
    }

    fn pump_server(server: &mut Server<NetworkSimulator>) -> Vec<ServerEvent> {
        (0..PUMP_ITERATIONS)
            .filter_map(|_| server.recv().unwrap())
            .collect()
    }

    fn pump_client(client: &mut Client<NetworkSimulator>) -> Vec<ClientEvent> {
        (0..PUMP_ITERATIONS)
            .filter_map(|_| client.recv().unwrap())
            .collect()
    }

    fn messages(events: &[ClientEvent]) -> Vec<&ChatMessage> {
        events
            .iter()
            .filter_map(|e| match e {
                ClientEvent::Message(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn join_message_leave_scenario() {
        enable_logging();

        let table = RoutingTable::default();
        let mut server = new_server(&table, 1024);
        let mut alice = new_client(&table, 40000, 1024);
        let mut bob = new_client(&table, 40001, 1024);

        alice.sender().join("alice").unwrap();
        assert_eq!(
            pump_server(&mut server),
            vec![ServerEvent::Joined {
                addr: addr(40000),
                username: "alice".to_string()
            }]
        );
        assert_eq!(server.peers().len(), 1);

        bob.sender().join("bob").unwrap();
        pump_server(&mut server);
        assert_eq!(server.peers().len(), 2);
        assert_eq!(
            pump_client(&mut alice),
            vec![ClientEvent::Notice("bob joined the room.".to_string())]
        );
        assert!(pump_client(&mut bob).is_empty());

        assert_eq!(bob.sender().send_text("hi").unwrap(), 1);
        assert_eq!(
            pump_server(&mut server),
            vec![ServerEvent::Message {
                from: addr(40001),
                username: "bob".to_string(),
                text: "hi".to_string()
            }]
        );
        let events = pump_client(&mut alice);
        let received = messages(&events);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].text, "hi");
        assert_eq!(received[0].username, "bob");
        assert_eq!(received[0].ip, "127.0.0.1");
        assert_eq!(received[0].port, 40001);
        assert!(pump_client(&mut bob).is_empty());

        bob.sender().leave().unwrap();
        assert_eq!(
            pump_server(&mut server),
            vec![ServerEvent::Left {
                addr: addr(40001),
                username: "bob".to_string()
            }]
        );
        assert_eq!(server.peers().len(), 1);
        assert_eq!(server.peers().username(&addr(40000)), Some("alice"));
        assert_eq!(
            pump_client(&mut alice),
            vec![ClientEvent::Notice("bob left the room.".to_string())]
        );
    }

    #[test]
    fn multi_fragment_message_fans_out_to_everyone_else() {
        enable_logging();

        let table = RoutingTable::default();
        let mut server = new_server(&table, 16);
        let mut clients: Vec<_> = (0..4).map(|i| new_client(&table, 40000 + i, 16)).collect();
        for (i, client) in clients.iter().enumerate() {
            client.sender().join(&format!("user{i}")).unwrap();
        }
        assert_eq!(pump_server(&mut server).len(), 4);
        // each join is announced to the peers that were already registered
        let notices: usize = clients.iter_mut().map(|c| pump_client(c).len()).sum();
        assert_eq!(notices, 3 + 2 + 1);

        let text = "the quick brown fox jumps over the lazy dog, twice: ".repeat(7);
        let sent = clients[2].sender().send_text(&text).unwrap();
        assert_eq!(sent, text.len().div_ceil(16));
        let events = pump_server(&mut server);
        assert_eq!(events.len(), 1);
        assert_eq!(server.pending_uploads(), 0);

        for (i, client) in clients.iter_mut().enumerate() {
            let events = pump_client(client);
            let received = messages(&events);
            if i == 2 {
                assert!(received.is_empty());
            } else {
                assert_eq!(received.len(), 1);
                assert_eq!(received[0].text, text);
                assert_eq!(received[0].username, "user2");
                assert!(!client.is_receiving());
            }
        }
    }

    #[test]
    fn leave_from_unknown_peer_is_noop() {
        enable_logging();

        let table = RoutingTable::default();
        let mut server = new_server(&table, 1024);
        let mut alice = new_client(&table, 40000, 1024);
        let stranger = new_client(&table, 40009, 1024);

        alice.sender().join("alice").unwrap();
        pump_server(&mut server);

        stranger.sender().leave().unwrap();
        assert!(pump_server(&mut server).is_empty());
        assert_eq!(server.peers().len(), 1);
        assert!(pump_client(&mut alice).is_empty());
    }

    #[test]
    fn upload_from_unregistered_peer_is_ignored() {
        enable_logging();

        let table = RoutingTable::default();
        let mut server = new_server(&table, 1024);
        let mut alice = new_client(&table, 40000, 1024);
        let stranger = new_client(&table, 40009, 1024);

        alice.sender().join("alice").unwrap();
        pump_server(&mut server);

        stranger.sender().send_text("let me in").unwrap();
        assert!(pump_server(&mut server).is_empty());
        assert_eq!(server.pending_uploads(), 0);
        assert!(pump_client(&mut alice).is_empty());
    }

    #[test]
    fn non_numeric_upload_count_is_rejected() {
        enable_logging();

        let table = RoutingTable::default();
        let mut server = new_server(&table, 1024);
        let alice = new_client(&table, 40000, 1024);
        alice.sender().join("alice").unwrap();
        pump_server(&mut server);

        let mut events = Vec::new();
        events.extend(server.process(b"MSG_UPLOAD_START:abc", addr(40000)));
        assert_eq!(server.pending_uploads(), 0);
        assert_eq!(server.peers().len(), 1);
        // with no upload in progress the next datagram is read as a command again
        events.extend(server.process(b"CMD:BYE", addr(40000)));
        assert_eq!(
            events,
            vec![ServerEvent::Left {
                addr: addr(40000),
                username: "alice".to_string()
            }]
        );
    }

    #[test]
    fn datagrams_during_upload_are_fragments() {
        enable_logging();

        let table = RoutingTable::default();
        let mut server = new_server(&table, 1024);
        let alice = new_client(&table, 40000, 1024);
        alice.sender().join("alice").unwrap();
        pump_server(&mut server);

        assert_eq!(server.process(b"MSG_UPLOAD_START:2", addr(40000)), None);
        assert_eq!(server.process(b"CMD:BYE", addr(40000)), None);
        assert_eq!(server.pending_uploads(), 1);
        assert_eq!(
            server.process(b"!", addr(40000)),
            Some(ServerEvent::Message {
                from: addr(40000),
                username: "alice".to_string(),
                text: "CMD:BYE!".to_string()
            })
        );
        assert_eq!(server.peers().len(), 1);
    }

    #[test]
    fn missing_fragment_stalls_until_leave() {
        enable_logging();

        let table = RoutingTable::default();
        let mut server = new_server(&table, 1024);
        let alice = new_client(&table, 40000, 1024);
        alice.sender().join("alice").unwrap();
        pump_server(&mut server);

        server.process(b"MSG_UPLOAD_START:3", addr(40000));
        server.process(b"one", addr(40000));
        server.process(b"two", addr(40000));
        assert_eq!(server.pending_uploads(), 1);

        server.disconnect_peer(addr(40000));
        assert_eq!(server.pending_uploads(), 0);
        assert!(server.peers().is_empty());
    }

    #[test]
    fn stray_binary_datagram_is_ignored() {
        enable_logging();

        let table = RoutingTable::default();
        let mut server = new_server(&table, 1024);
        assert_eq!(server.process(&[0xff, 0x00, 0xfe], addr(40000)), None);
        assert_eq!(server.process(b"WHAT:IS:THIS", addr(40000)), None);
        assert!(server.peers().is_empty());
        assert_eq!(server.pending_uploads(), 0);
    }

    #[test]
    fn invalid_utf8_is_relayed_raw_and_decoded_lossily() {
        enable_logging();

        let table = RoutingTable::default();
        let mut server = new_server(&table, 1024);
        let mut alice = new_client(&table, 40000, 1024);
        let bob = NetworkSimulator::new(40001, table.clone());

        alice.sender().join("alice").unwrap();
        bob.send(b"CMD:HI:bob", server_addr()).unwrap();
        bob.send(b"MSG_UPLOAD_START:1", server_addr()).unwrap();
        bob.send(&[b'o', b'k', 0xc3], server_addr()).unwrap();
        let events = pump_server(&mut server);
        assert!(events.contains(&ServerEvent::Message {
            from: addr(40001),
            username: "bob".to_string(),
            text: "ok\u{fffd}".to_string()
        }));

        let events = pump_client(&mut alice);
        let received = messages(&events);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].text, "ok\u{fffd}");
    }

    #[test]
    fn connection_reset_drops_last_sender() {
        enable_logging();

        let table = RoutingTable::default();
        let mut server = new_server(&table, 1024);
        let mut alice = new_client(&table, 40000, 1024);
        let bob = new_client(&table, 40001, 1024);

        alice.sender().join("alice").unwrap();
        pump_server(&mut server);
        bob.sender().join("bob").unwrap();
        pump_server(&mut server);
        pump_client(&mut alice);

        table
            .borrow_mut()
            .get_mut(&SERVER_PORT)
            .unwrap()
            .reset_next_recv = true;
        assert_eq!(
            server.recv().unwrap(),
            Some(ServerEvent::ConnectionLost {
                addr: addr(40001),
                username: "bob".to_string()
            })
        );
        assert_eq!(server.peers().len(), 1);
        assert_eq!(
            pump_client(&mut alice),
            vec![ClientEvent::Notice(
                "bob left the room (connection lost).".to_string()
            )]
        );
    }

    #[test]
    fn failed_send_does_not_abort_fan_out() {
        enable_logging();

        let table = RoutingTable::default();
        let mut server = new_server(&table, 4);
        let mut clients: Vec<_> = (0..3).map(|i| new_client(&table, 40000 + i, 4)).collect();
        for (i, client) in clients.iter().enumerate() {
            client.sender().join(&format!("user{i}")).unwrap();
        }
        pump_server(&mut server);
        clients.iter_mut().for_each(|c| {
            pump_client(c);
        });

        table.borrow_mut().get_mut(&40000).unwrap().unreachable = true;
        clients[2].sender().send_text("still delivered").unwrap();
        assert_eq!(pump_server(&mut server).len(), 1);

        let events = pump_client(&mut clients[1]);
        let received = messages(&events);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].text, "still delivered");
    }

    #[test]
    fn oversized_username_still_relays_within_client_buffer() {
        enable_logging();

        let table = RoutingTable::default();
        let mut server = new_server(&table, 1024);
        let mut alice = new_client(&table, 40000, 1024);
        let mut bob = new_client(&table, 40001, 1024);

        alice.sender().join("alice").unwrap();
        bob.sender().join(&"b".repeat(1240)).unwrap();
        pump_server(&mut server);
        pump_client(&mut alice);
        let registered = server.peers().username(&addr(40001)).unwrap().to_string();
        // the join datagram is cut at the fragment size, the name with it
        assert_eq!(registered.len(), 1024 - "CMD:HI:".len());

        bob.sender().send_text("hi").unwrap();
        assert_eq!(pump_server(&mut server).len(), 1);
        let events = pump_client(&mut alice);
        let received = messages(&events);
        assert_eq!(received.len(), 1, "relayed message should reach alice");
        assert_eq!(received[0].text, "hi");
        assert_eq!(received[0].username, registered);
        assert_eq!(received[0].timestamp.len(), "00:00:00 01/01/2026".len());
        assert!(!alice.is_receiving());
        assert!(pump_client(&mut bob).is_empty());
    }

    #[test]
    fn client_handles_server_headers() {
        enable_logging();

        let table = RoutingTable::default();
        let server = NetworkSimulator::new(SERVER_PORT, table.clone());
        let impostor = NetworkSimulator::new(40099, table.clone());
        let mut client = new_client(&table, 40000, 1024);
        let to = client.addr();

        // only the server is listened to
        impostor.send(b"NOTIFY:fake", to).unwrap();
        assert!(pump_client(&mut client).is_empty());

        server.send(b"MSG_INCOMING:127.0.0.1:bad:bob:x:1", to).unwrap();
        server.send(b"not a fragment", to).unwrap();
        server.send(&[0xff, 0xfe], to).unwrap();
        assert!(pump_client(&mut client).is_empty());
        assert!(!client.is_receiving());

        let header = Control::Incoming(IncomingHeader {
            ip: "10.1.2.3".to_string(),
            port: 5555,
            username: "carol".to_string(),
            timestamp: "09:08:07 19/10/2026".to_string(),
            fragments: 2,
        });
        server.send(&header.to_bytes(), to).unwrap();
        server.send(b"hello, ", to).unwrap();
        assert_eq!(client.recv().unwrap(), None);
        assert_eq!(client.recv().unwrap(), None);
        assert!(client.is_receiving());
        server.send(b"world", to).unwrap();
        let Some(ClientEvent::Message(msg)) = client.recv().unwrap() else {
            panic!("expected a complete message");
        };
        assert_eq!(
            msg.to_string(),
            "10.1.2.3:5555/~carol: hello, world 09:08:07 19/10/2026"
        );
        assert!(!client.is_receiving());
    }
}
