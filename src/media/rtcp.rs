//! RTCP sender reports (RFC 3550).
//!
//! The interop peer sends a compound SR + SDES packet periodically over
//! SRTCP and parses whatever comes back for logging.

use std::time::{SystemTime, UNIX_EPOCH};

/// NTP epoch offset: seconds between 1900-01-01 and 1970-01-01.
const NTP_EPOCH_OFFSET: u64 = 2_208_988_800;

const PT_SR: u8 = 200;
const PT_RR: u8 = 201;
const PT_SDES: u8 = 202;

const SDES_CNAME: u8 = 1;

/// Counters for the sender info block.
#[derive(Debug, Clone, Default)]
pub struct RtpSendStats {
    pub packets_sent: u32,
    pub bytes_sent: u32,
    pub ssrc: u32,
    pub last_rtp_timestamp: u32,
}

/// One packet out of an incoming compound RTCP packet.
#[derive(Debug, PartialEq, Eq)]
pub enum RtcpBlock {
    SenderReport {
        ssrc: u32,
        ntp_timestamp: u64,
        rtp_timestamp: u32,
        sender_packet_count: u32,
        sender_octet_count: u32,
    },
    ReceiverReport {
        ssrc: u32,
    },
    Sdes,
    Unknown(u8),
}

/// RTCP packet types live in 200-204, where RTP has M|PT.
pub fn is_rtcp_packet(data: &[u8]) -> bool {
    if data.len() < 8 {
        return false;
    }
    (200..=204).contains(&data[1])
}

/// Current NTP timestamp (seconds since 1900-01-01, 32.32 fixed point).
pub fn ntp_timestamp() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = now.as_secs() + NTP_EPOCH_OFFSET;
    let frac = ((now.subsec_nanos() as u64) << 32) / 1_000_000_000;
    (secs << 32) | frac
}

/// Build a compound RTCP Sender Report + SDES packet.
pub fn build_sender_report(send_stats: &RtpSendStats, ntp: u64, cname: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);

    // V=2, P=0, RC=0
    buf.push(0x80);
    buf.push(PT_SR);
    let len_pos = buf.len();
    buf.extend_from_slice(&[0, 0]);

    buf.extend_from_slice(&send_stats.ssrc.to_be_bytes());
    buf.extend_from_slice(&((ntp >> 32) as u32).to_be_bytes());
    buf.extend_from_slice(&(ntp as u32).to_be_bytes());
    buf.extend_from_slice(&send_stats.last_rtp_timestamp.to_be_bytes());
    buf.extend_from_slice(&send_stats.packets_sent.to_be_bytes());
    buf.extend_from_slice(&send_stats.bytes_sent.to_be_bytes());

    let sr_words = (buf.len() / 4) - 1;
    buf[len_pos] = (sr_words >> 8) as u8;
    buf[len_pos + 1] = sr_words as u8;

    append_sdes(&mut buf, send_stats.ssrc, cname);
    buf
}

fn append_sdes(buf: &mut Vec<u8>, ssrc: u32, cname: &str) {
    let sdes_start = buf.len();

    // V=2, P=0, SC=1
    buf.push(0x81);
    buf.push(PT_SDES);
    let len_pos = buf.len();
    buf.extend_from_slice(&[0, 0]);

    buf.extend_from_slice(&ssrc.to_be_bytes());

    let cname_bytes = &cname.as_bytes()[..cname.len().min(255)];
    buf.push(SDES_CNAME);
    buf.push(cname_bytes.len() as u8);
    buf.extend_from_slice(cname_bytes);
    buf.push(0);

    while (buf.len() - sdes_start) % 4 != 0 {
        buf.push(0);
    }

    let sdes_words = (buf.len() - sdes_start) / 4 - 1;
    buf[len_pos] = (sdes_words >> 8) as u8;
    buf[len_pos + 1] = sdes_words as u8;
}

/// Split an incoming compound RTCP packet into blocks.
pub fn parse_rtcp(data: &[u8]) -> Vec<RtcpBlock> {
    let mut blocks = Vec::new();
    let mut offset = 0;

    while offset + 4 <= data.len() {
        let pt = data[offset + 1];
        let length_words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
        let packet_len = (length_words + 1) * 4;

        if offset + packet_len > data.len() {
            break;
        }

        let pkt = &data[offset..offset + packet_len];
        let word = |at: usize| u32::from_be_bytes([pkt[at], pkt[at + 1], pkt[at + 2], pkt[at + 3]]);

        match pt {
            PT_SR if pkt.len() >= 28 => blocks.push(RtcpBlock::SenderReport {
                ssrc: word(4),
                ntp_timestamp: ((word(8) as u64) << 32) | word(12) as u64,
                rtp_timestamp: word(16),
                sender_packet_count: word(20),
                sender_octet_count: word(24),
            }),
            PT_RR if pkt.len() >= 8 => blocks.push(RtcpBlock::ReceiverReport { ssrc: word(4) }),
            PT_SDES => blocks.push(RtcpBlock::Sdes),
            other => blocks.push(RtcpBlock::Unknown(other)),
        }

        offset += packet_len;
    }

    blocks
}
