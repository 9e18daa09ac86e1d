//! SRTP/SRTCP key-lifecycle engine.
//!
//! Tracks which master key protects each outbound (destination) and inbound
//! (source) stream, schedules key changes at future packet indices, rejects
//! replayed packets, and fans key switches out to every stream sharing a key.

pub mod config;
pub mod crypto;
pub mod error;
pub mod event;
pub mod history;
pub mod key;
pub mod pool;
pub mod replay;
pub mod session;
pub mod stream;

use std::fmt;

pub use config::SrtpConfig;
pub use error::{Result, SrtpError};
pub use event::{EventSink, MemorySink, SrtpEvent, TracingSink};
pub use key::{MasterKey, Mki};
pub use session::{LocalIdentity, SrtpSession};

/// RTP packet indices are 48 bits: `ROC << 16 | seq`.
pub const RTP_INDEX_MASK: u64 = 0xFFFF_FFFF_FFFF;

/// SRTCP indices are 31 bits.
pub const RTCP_INDEX_MASK: u64 = 0x7FFF_FFFF;

/// Which half of the media session a stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamKind {
    Rtp,
    Rtcp,
}

impl StreamKind {
    /// Index wrap mask for this kind.
    pub fn wrap(self) -> u64 {
        match self {
            StreamKind::Rtp => RTP_INDEX_MASK,
            StreamKind::Rtcp => RTCP_INDEX_MASK,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Rtp => "rtp",
            StreamKind::Rtcp => "rtcp",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build an RTP packet index from rollover counter and sequence number.
pub fn rtp_index(roc: u32, seq: u16) -> u64 {
    (((roc as u64) << 16) | seq as u64) & RTP_INDEX_MASK
}

/// Split an RTP packet index back into `(roc, seq)`.
pub fn split_rtp_index(index: u64) -> (u32, u16) {
    let index = index & RTP_INDEX_MASK;
    ((index >> 16) as u32, index as u16)
}

/// Distance from `from` forward to `to`, modulo `wrap`.
pub(crate) fn distance(from: u64, to: u64, wrap: u64) -> u64 {
    to.wrapping_sub(from) & wrap
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtp_index_roundtrip() {
        let idx = rtp_index(0x1234, 0xABCD);
        assert_eq!(idx, 0x1234_ABCD);
        assert_eq!(split_rtp_index(idx), (0x1234, 0xABCD));
    }

    #[test]
    fn test_rtp_index_truncates_roc() {
        let idx = rtp_index(u32::MAX, 0xFFFF);
        assert_eq!(idx, RTP_INDEX_MASK);
    }

    #[test]
    fn test_distance_wraps() {
        assert_eq!(distance(RTCP_INDEX_MASK, 1, RTCP_INDEX_MASK), 2);
        assert_eq!(distance(5, 3, RTP_INDEX_MASK), RTP_INDEX_MASK - 1);
    }
}
