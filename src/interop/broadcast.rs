//! Key-exchange broadcast messages.
//!
//! Peers announce themselves with `notify` (address, SSRC and starting
//! sequence/index) and publish their current outbound indices with
//! `sendindexes`, so the other side can schedule a matching receive-side key
//! change. Each datagram is `"<clientId> <message line>"`, and a message
//! line is the verb, a colon, then six fields:
//!
//! ```text
//! notify: <addr> ssrc seqnum roc index sessionId
//! sendindexes: <addr> rtpIndexHi rtpIndexLo rtcpIndexHi rtcpIndexLo sessionId
//! ```
//!
//! Addresses are `ip:port` for IPv4 and `[ip]|port/scope` for IPv6. On input
//! `_` is accepted in place of `[`.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr, SocketAddrV6};
use std::str::FromStr;

use crate::srtp::{Result, SrtpError};

const NOTIFY: &str = "notify";
const SEND_INDEXES: &str = "sendindexes";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastMessage {
    Notify {
        addr: SocketAddr,
        ssrc: u32,
        seq: u16,
        roc: u32,
        /// First SRTCP index.
        index: u32,
        session_id: u32,
    },
    SendIndexes {
        addr: SocketAddr,
        rtp_index: u64,
        rtcp_index: u64,
        session_id: u32,
    },
}

impl BroadcastMessage {
    pub fn addr(&self) -> SocketAddr {
        match self {
            BroadcastMessage::Notify { addr, .. } | BroadcastMessage::SendIndexes { addr, .. } => {
                *addr
            }
        }
    }

    pub fn session_id(&self) -> u32 {
        match self {
            BroadcastMessage::Notify { session_id, .. }
            | BroadcastMessage::SendIndexes { session_id, .. } => *session_id,
        }
    }
}

impl fmt::Display for BroadcastMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BroadcastMessage::Notify {
                addr,
                ssrc,
                seq,
                roc,
                index,
                session_id,
            } => write!(
                f,
                "{}: {} {} {} {} {} {}",
                NOTIFY,
                WireAddr(*addr),
                ssrc,
                seq,
                roc,
                index,
                session_id
            ),
            BroadcastMessage::SendIndexes {
                addr,
                rtp_index,
                rtcp_index,
                session_id,
            } => write!(
                f,
                "{}: {} {} {} {} {} {}",
                SEND_INDEXES,
                WireAddr(*addr),
                rtp_index >> 32,
                rtp_index & 0xFFFF_FFFF,
                rtcp_index >> 32,
                rtcp_index & 0xFFFF_FFFF,
                session_id
            ),
        }
    }
}

impl FromStr for BroadcastMessage {
    type Err = SrtpError;

    fn from_str(line: &str) -> Result<Self> {
        // The verb runs up to the first ':'.
        let Some((verb, rest)) = line.split_once(':') else {
            return Err(SrtpError::Unknown(format!("no message verb in '{}'", line.trim())));
        };
        let verb = verb.trim();
        let args: Vec<&str> = rest.split_whitespace().collect();
        if args.len() != 6 {
            return Err(SrtpError::Unknown(format!(
                "{} expects 6 fields, got {}",
                verb,
                args.len()
            )));
        }
        let addr = parse_addr(args[0])?;
        match verb {
            NOTIFY => Ok(BroadcastMessage::Notify {
                addr,
                ssrc: number(args[1], "ssrc")?,
                seq: number(args[2], "seqnum")?,
                roc: number(args[3], "roc")?,
                index: number(args[4], "index")?,
                session_id: number(args[5], "session id")?,
            }),
            SEND_INDEXES => {
                let hi_lo = |hi: &str, lo: &str, what: &str| -> Result<u64> {
                    let hi: u32 = number(hi, what)?;
                    let lo: u32 = number(lo, what)?;
                    Ok(((hi as u64) << 32) | lo as u64)
                };
                Ok(BroadcastMessage::SendIndexes {
                    addr,
                    rtp_index: hi_lo(args[1], args[2], "rtp index")?,
                    rtcp_index: hi_lo(args[3], args[4], "rtcp index")?,
                    session_id: number(args[5], "session id")?,
                })
            }
            other => Err(SrtpError::Unknown(format!("unknown broadcast message '{}'", other))),
        }
    }
}

fn number<T: FromStr>(field: &str, what: &str) -> Result<T> {
    field
        .parse()
        .map_err(|_| SrtpError::Unknown(format!("bad {} '{}'", what, field)))
}

/// Wire form of a socket address.
pub struct WireAddr(pub SocketAddr);

impl fmt::Display for WireAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            SocketAddr::V4(v4) => write!(f, "{}:{}", v4.ip(), v4.port()),
            SocketAddr::V6(v6) => write!(f, "[{}]|{}/{}", v6.ip(), v6.port(), v6.scope_id()),
        }
    }
}

/// Parse `ip:port`, `[ip]|port/scope` or `_ip|port/scope`.
pub fn parse_addr(text: &str) -> Result<SocketAddr> {
    let bad = || SrtpError::Unknown(format!("bad address '{}'", text));
    if let Some(rest) = text.strip_prefix('[').or_else(|| text.strip_prefix('_')) {
        let (ip, rest) = rest.split_once('|').ok_or_else(bad)?;
        let ip: Ipv6Addr = ip.trim_end_matches(']').parse().map_err(|_| bad())?;
        let (port, scope) = match rest.split_once('/') {
            Some((port, scope)) => (port, scope.parse().map_err(|_| bad())?),
            None => (rest, 0),
        };
        let port = port.parse().map_err(|_| bad())?;
        return Ok(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, scope)));
    }
    let (ip, port) = text.rsplit_once(':').ok_or_else(bad)?;
    let ip: IpAddr = ip.parse().map_err(|_| bad())?;
    let port = port.parse().map_err(|_| bad())?;
    Ok(SocketAddr::new(ip, port))
}

/// Prefix a message line with the sending client's id.
pub fn encode_datagram(client_id: &str, message: &BroadcastMessage) -> String {
    format!("{} {}", client_id, message)
}

/// Split a datagram into client id and message.
pub fn decode_datagram(datagram: &str) -> Result<(String, BroadcastMessage)> {
    let datagram = datagram.trim();
    let (client, line) = datagram
        .split_once(char::is_whitespace)
        .ok_or_else(|| SrtpError::Unknown(format!("malformed datagram '{}'", datagram)))?;
    Ok((client.to_string(), line.parse()?))
}
