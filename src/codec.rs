//! Text control messages exchanged between clients and the server.
//!
//! Control messages are UTF-8 strings with a colon-delimited tagged format.
//! Fragment datagrams carry raw bytes and are never decoded here; whether a
//! datagram is a fragment is decided by the receiver's reassembly state.

use std::fmt;
use std::str::{self, Utf8Error};

const HI: &str = "CMD:HI:";
const BYE: &str = "CMD:BYE";
const UPLOAD_START: &str = "MSG_UPLOAD_START:";
const INCOMING: &str = "MSG_INCOMING:";
const NOTIFY: &str = "NOTIFY:";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("datagram is not valid utf-8 text: {0}")]
    NotText(#[from] Utf8Error),
    #[error("malformed {tag} header: {content:?}")]
    Malformed { tag: &'static str, content: String },
    #[error("invalid fragment count: {0:?}")]
    InvalidCount(String),
    #[error("unrecognized control message: {0:?}")]
    Unrecognized(String),
}

/// Header sent by the server in front of a relayed message.
///
/// Carries the address and name of the peer that originally sent the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingHeader {
    pub ip: String,
    pub port: u16,
    pub username: String,
    pub timestamp: String,
    pub fragments: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// `CMD:HI:<username>`, a join request.
    Hi { username: String },
    /// `CMD:BYE`, a leave request.
    Bye,
    /// `MSG_UPLOAD_START:<n>`, the sender will send `n` fragments next.
    UploadStart { fragments: usize },
    /// `MSG_INCOMING:<ip>:<port>:<username>:<timestamp>:<n>`
    Incoming(IncomingHeader),
    /// `NOTIFY:<text>`, a server notice about joins and leaves.
    Notify(String),
}

impl Control {
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let text = str::from_utf8(data)?;
        if let Some(username) = text.strip_prefix(HI) {
            // everything after the second colon is the name, colons included
            Ok(Control::Hi {
                username: username.to_string(),
            })
        } else if text.starts_with(BYE) {
            Ok(Control::Bye)
        } else if let Some(count) = text.strip_prefix(UPLOAD_START) {
            let fragments = count
                .parse::<usize>()
                .map_err(|_| Error::InvalidCount(count.to_string()))?;
            Ok(Control::UploadStart { fragments })
        } else if let Some(content) = text.strip_prefix(INCOMING) {
            IncomingHeader::parse(content).map(Control::Incoming)
        } else if let Some(notice) = text.strip_prefix(NOTIFY) {
            Ok(Control::Notify(notice.to_string()))
        } else {
            Err(Error::Unrecognized(text.to_string()))
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Control::Hi { username } => write!(f, "{HI}{username}"),
            Control::Bye => f.write_str(BYE),
            Control::UploadStart { fragments } => write!(f, "{UPLOAD_START}{fragments}"),
            Control::Incoming(h) => write!(
                f,
                "{INCOMING}{}:{}:{}:{}:{}",
                h.ip, h.port, h.username, h.timestamp, h.fragments
            ),
            Control::Notify(notice) => write!(f, "{NOTIFY}{notice}"),
        }
    }
}

impl IncomingHeader {
    fn parse(content: &str) -> Result<Self, Error> {
        let malformed = || Error::Malformed {
            tag: "MSG_INCOMING",
            content: content.to_string(),
        };
        // the count is whatever follows the last colon, the timestamp itself contains colons
        let (fields, count) = content.rsplit_once(':').ok_or_else(malformed)?;
        let fragments = count.parse::<usize>().map_err(|_| malformed())?;
        let mut fields = fields.splitn(4, ':');
        let (Some(ip), Some(port), Some(username), Some(timestamp)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed());
        };
        let port = port.parse::<u16>().map_err(|_| malformed())?;
        Ok(Self {
            ip: ip.to_string(),
            port,
            username: username.to_string(),
            timestamp: timestamp.to_string(),
            fragments,
        })
    }
}
