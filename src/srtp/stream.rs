//! Destination and source streams.
//!
//! A stream is one direction of one RTP or RTCP flow: outbound to a remote
//! address (destination) or inbound from a remote SSRC (source). Each owns a
//! key timeline; sources also own a replay window.

use std::fmt;
use std::net::SocketAddr;

use super::history::Timeline;
use super::replay::ReplayWindow;
use super::{rtp_index, split_rtp_index, StreamKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Destination(SocketAddr),
    Source(u32),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Destination(addr) => write!(f, "dest {}", addr),
            Endpoint::Source(ssrc) => write!(f, "src {:#010x}", ssrc),
        }
    }
}

/// Stream identity: endpoint plus RTP/RTCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId {
    pub endpoint: Endpoint,
    pub kind: StreamKind,
}

impl StreamId {
    pub fn destination(addr: SocketAddr, kind: StreamKind) -> Self {
        Self {
            endpoint: Endpoint::Destination(addr),
            kind,
        }
    }

    pub fn source(ssrc: u32, kind: StreamKind) -> Self {
        Self {
            endpoint: Endpoint::Source(ssrc),
            kind,
        }
    }

    pub fn is_source(&self) -> bool {
        matches!(self.endpoint, Endpoint::Source(_))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.endpoint)
    }
}

#[derive(Debug)]
pub struct Stream {
    pub id: StreamId,
    /// First index expected when the stream was created.
    pub initial_index: u64,
    pub(crate) timeline: Timeline,
    pub(crate) replay: Option<ReplayWindow>,
}

impl Stream {
    pub(crate) fn destination(id: StreamId, history: u64, first: u64) -> Self {
        Self {
            id,
            initial_index: first & id.kind.wrap(),
            timeline: Timeline::new(id.kind.wrap(), history, first),
            replay: None,
        }
    }

    pub(crate) fn source(id: StreamId, history: u64, replay_size: usize, first: u64) -> Self {
        let wrap = id.kind.wrap();
        Self {
            id,
            initial_index: first & wrap,
            timeline: Timeline::new(wrap, history, first),
            replay: Some(ReplayWindow::new(replay_size, history, wrap, first)),
        }
    }

    /// Roll-over counter and sequence number the source was seeded with.
    pub fn initial_roc_seq(&self) -> (u32, u16) {
        split_rtp_index(self.initial_index)
    }

    /// Index the next in-order packet on this stream will carry.
    pub fn next_index(&self) -> u64 {
        self.timeline.next_index()
    }

    pub fn max_index(&self) -> u64 {
        self.timeline.max_index()
    }

    /// Full RTP index for a received sequence number (RFC 3711, Appendix A).
    pub fn estimate_rtp_index(&self, seq: u16) -> u64 {
        let (roc, s_l) = split_rtp_index(self.timeline.max_index());
        let seq32 = seq as i64;
        let s_l = s_l as i64;
        let v = if s_l < 32768 {
            if seq32 - s_l > 32768 {
                roc.wrapping_sub(1)
            } else {
                roc
            }
        } else if s_l - 32768 > seq32 {
            roc.wrapping_add(1)
        } else {
            roc
        };
        rtp_index(v, seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src(first: u64) -> Stream {
        Stream::source(StreamId::source(0xABCD, StreamKind::Rtp), 1024, 64, first)
    }

    #[test]
    fn test_estimate_in_order() {
        let s = src(rtp_index(3, 100));
        assert_eq!(s.estimate_rtp_index(100), rtp_index(3, 100));
        assert_eq!(s.estimate_rtp_index(101), rtp_index(3, 101));
    }

    #[test]
    fn test_estimate_sequence_wrap_forward() {
        let s = src(rtp_index(3, 65530));
        assert_eq!(s.estimate_rtp_index(2), rtp_index(4, 2));
    }

    #[test]
    fn test_estimate_late_packet_before_wrap() {
        let s = src(rtp_index(4, 3));
        assert_eq!(s.estimate_rtp_index(65534), rtp_index(3, 65534));
    }

    #[test]
    fn test_initial_roc_seq() {
        let s = src(rtp_index(7, 42));
        assert_eq!(s.initial_roc_seq(), (7, 42));
        assert_eq!(s.next_index(), rtp_index(7, 42));
    }

    #[test]
    fn test_stream_id_display() {
        let id = StreamId::destination("127.0.0.1:5000".parse().unwrap(), StreamKind::Rtcp);
        assert_eq!(id.to_string(), "rtcp dest 127.0.0.1:5000");
        assert!(!id.is_source());
        assert_eq!(StreamId::source(1, StreamKind::Rtp).to_string(), "rtp src 0x00000001");
    }
}
