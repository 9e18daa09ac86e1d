//! RTP packet encoding/decoding and G.711 payload codecs.
//!
//! RTP header format (RFC 3550):
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           synchronization source (SSRC) identifier            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};

/// Minimum RTP header size in bytes (no CSRC, no extension).
pub const RTP_HEADER_SIZE: usize = 12;

/// PCMU payload type (RFC 3551).
pub const PT_PCMU: u8 = 0;

/// PCMA payload type (RFC 3551).
pub const PT_PCMA: u8 = 8;

/// Samples per 20ms packet at 8000 Hz.
pub const SAMPLES_PER_PACKET: usize = 160;

/// Packet interval in milliseconds.
pub const PACKET_INTERVAL_MS: u64 = 20;

/// Timestamp increment per packet (8000 Hz * 20ms = 160).
pub const TIMESTAMP_INCREMENT: u32 = 160;

/// Compute the full RTP header length from raw packet bytes.
///
/// Accounts for CSRC entries and header extensions (RFC 3550 §5.3.1).
/// Returns `None` if the packet is too short.
pub fn full_header_len(data: &[u8]) -> Option<usize> {
    if data.len() < RTP_HEADER_SIZE {
        return None;
    }
    let csrc_count = (data[0] & 0x0F) as usize;
    let has_extension = (data[0] >> 4) & 0x01 != 0;
    let mut len = RTP_HEADER_SIZE + csrc_count * 4;
    if data.len() < len {
        return None;
    }
    if has_extension {
        // 2 bytes profile + 2 bytes length in 32-bit words
        if data.len() < len + 4 {
            return None;
        }
        let ext_words = u16::from_be_bytes([data[len + 2], data[len + 3]]) as usize;
        len += 4 + ext_words * 4;
        if data.len() < len {
            return None;
        }
    }
    Some(len)
}

/// SSRC and sequence number straight from the fixed header.
pub fn ssrc_and_seq(data: &[u8]) -> Option<(u32, u16)> {
    if data.len() < RTP_HEADER_SIZE {
        return None;
    }
    let seq = u16::from_be_bytes([data[2], data[3]]);
    let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
    Some((ssrc, seq))
}

/// Parsed RTP packet.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Vec<u8>,
}

/// Encode an RTP packet into bytes.
pub fn encode(payload_type: u8, seq: u16, timestamp: u32, ssrc: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RTP_HEADER_SIZE + payload.len());

    // V=2, P=0, X=0, CC=0
    buf.push(0x80);
    buf.push(payload_type & 0x7F);
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf.extend_from_slice(&ssrc.to_be_bytes());
    buf.extend_from_slice(payload);

    buf
}

/// Decode bytes into an RTP packet.
pub fn decode(data: &[u8]) -> Result<RtpPacket> {
    if data.len() < RTP_HEADER_SIZE {
        bail!("RTP packet too short: {} bytes", data.len());
    }

    let version = (data[0] >> 6) & 0x03;
    if version != 2 {
        bail!("Unsupported RTP version: {}", version);
    }

    let header_len = match full_header_len(data) {
        Some(len) => len,
        None => bail!("RTP packet too short for its header: {} bytes", data.len()),
    };

    Ok(RtpPacket {
        marker: (data[1] >> 7) & 0x01 != 0,
        payload_type: data[1] & 0x7F,
        sequence_number: u16::from_be_bytes([data[2], data[3]]),
        timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        payload: data[header_len..].to_vec(),
    })
}

/// Audio payload format carried by a session.
pub trait PayloadCodec: Send + Sync {
    fn payload_type(&self) -> u8;

    fn encode(&self, samples: &[i16]) -> Vec<u8>;

    fn decode(&self, payload: &[u8]) -> Vec<i16>;

    /// Payload for one packet interval of silence.
    fn silence(&self) -> Vec<u8> {
        self.encode(&[0; SAMPLES_PER_PACKET])
    }
}

/// G.711 codec selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum G711 {
    Pcmu,
    Pcma,
}

impl FromStr for G711 {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PCMU" | "ULAW" => Ok(G711::Pcmu),
            "PCMA" | "ALAW" => Ok(G711::Pcma),
            other => bail!("unknown codec '{}'", other),
        }
    }
}

impl fmt::Display for G711 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            G711::Pcmu => f.write_str("PCMU"),
            G711::Pcma => f.write_str("PCMA"),
        }
    }
}

impl PayloadCodec for G711 {
    fn payload_type(&self) -> u8 {
        match self {
            G711::Pcmu => PT_PCMU,
            G711::Pcma => PT_PCMA,
        }
    }

    fn encode(&self, samples: &[i16]) -> Vec<u8> {
        match self {
            G711::Pcmu => samples.iter().map(|&s| linear_to_ulaw(s)).collect(),
            G711::Pcma => samples.iter().map(|&s| linear_to_alaw(s)).collect(),
        }
    }

    fn decode(&self, payload: &[u8]) -> Vec<i16> {
        match self {
            G711::Pcmu => payload.iter().map(|&b| ulaw_to_linear(b)).collect(),
            G711::Pcma => payload.iter().map(|&b| alaw_to_linear(b)).collect(),
        }
    }
}

// --- G.711 mu-law (PCMU) ---
//
// The mu-law companding curve: F(x) = sgn(x) * ln(1 + mu*|x|) / ln(1 + mu)
// with mu = 255, implemented with the segment/quantization lookup.

/// Encode a 16-bit linear PCM sample to 8-bit mu-law (ITU-T G.711).
pub fn linear_to_ulaw(sample: i16) -> u8 {
    const BIAS: i16 = 0x84;
    const CLIP: i16 = 32635;

    let (sign, mut mag) = if sample < 0 {
        // -(-32768) overflows, clip first
        (0x80u8, if sample == i16::MIN { CLIP } else { -sample })
    } else {
        (0u8, sample)
    };

    if mag > CLIP {
        mag = CLIP;
    }
    mag += BIAS;

    let mut exponent: u8 = 7;
    let mut exp_mask: i16 = 0x4000;
    while exponent > 0 && (mag & exp_mask) == 0 {
        exponent -= 1;
        exp_mask >>= 1;
    }

    let mantissa = ((mag >> (exponent as i16 + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Decode an 8-bit mu-law sample to 16-bit linear PCM (ITU-T G.711).
///
/// Reconstructs the midpoint of the quantization step.
pub fn ulaw_to_linear(sample: u8) -> i16 {
    let ulaw = !sample;
    let sign = (ulaw & 0x80) != 0;
    let exponent = ((ulaw >> 4) & 0x07) as u32;
    let mantissa = (ulaw & 0x0F) as i32;

    let biased = ((mantissa | 0x10) << (exponent + 3)) + (1i32 << (exponent + 2));
    let mag = (biased - 132).max(0);

    if sign {
        -(mag as i16)
    } else {
        mag as i16
    }
}

// --- G.711 A-law (PCMA) ---

/// Encode a 16-bit linear PCM sample to 8-bit A-law (ITU-T G.711).
pub fn linear_to_alaw(sample: i16) -> u8 {
    let (sign, mag) = if sample >= 0 {
        (0x80u8, (sample as i32) >> 3)
    } else {
        (0x00u8, ((-(sample as i32)) >> 3).min(0xFFF))
    };

    let code = if mag < 32 {
        (mag >> 1) as u8
    } else {
        let mut exponent: u8 = 1;
        while exponent < 7 && mag >= (64 << (exponent - 1)) {
            exponent += 1;
        }
        let mantissa = ((mag >> exponent) & 0x0F) as u8;
        (exponent << 4) | mantissa
    };

    (sign | code) ^ 0x55
}

/// Decode an 8-bit A-law sample to 16-bit linear PCM (ITU-T G.711).
pub fn alaw_to_linear(sample: u8) -> i16 {
    let a = sample ^ 0x55;
    let exponent = ((a >> 4) & 0x07) as i32;
    let mantissa = (a & 0x0F) as i32;

    let mag = if exponent == 0 {
        (mantissa << 4) + 8
    } else {
        ((mantissa << 4) + 0x108) << (exponent - 1)
    };

    if a & 0x80 != 0 {
        mag as i16
    } else {
        -(mag as i16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let payload = vec![0xFF; 160];
        let encoded = encode(PT_PCMU, 1, 160, 0x12345678, &payload);
        assert_eq!(encoded.len(), RTP_HEADER_SIZE + 160);

        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.payload_type, PT_PCMU);
        assert_eq!(decoded.sequence_number, 1);
        assert_eq!(decoded.timestamp, 160);
        assert_eq!(decoded.ssrc, 0x12345678);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn test_decode_too_short() {
        assert!(decode(&[0x80, 0x00]).is_err());
    }

    #[test]
    fn test_decode_wrong_version() {
        let data = [0u8; 12];
        assert!(decode(&data).is_err());
    }

    #[test]
    fn test_ssrc_and_seq() {
        let pkt = encode(PT_PCMA, 0xBEEF, 0, 0xA1B2C3D4, &[]);
        assert_eq!(ssrc_and_seq(&pkt), Some((0xA1B2C3D4, 0xBEEF)));
        assert_eq!(ssrc_and_seq(&pkt[..11]), None);
    }

    #[test]
    fn test_header_len_with_csrc() {
        let mut pkt = encode(PT_PCMU, 1, 0, 1, &[0; 8]);
        pkt[0] |= 0x01;
        assert_eq!(full_header_len(&pkt), Some(16));
    }

    #[test]
    fn test_ulaw_roundtrip_sign_and_magnitude() {
        for &sample in &[100i16, 1000, 10000, 30000, -100, -1000, -10000, -30000] {
            let decoded = ulaw_to_linear(linear_to_ulaw(sample));
            assert_eq!(decoded.signum(), sample.signum(), "sample={}", sample);
            let s = sample.unsigned_abs() as i32;
            let d = decoded.unsigned_abs() as i32;
            assert!(d >= s / 8 && d <= s * 2, "sample={}, decoded={}", sample, decoded);
        }
    }

    #[test]
    fn test_alaw_roundtrip_sign_and_magnitude() {
        for &sample in &[100i16, 1000, 10000, 30000, -100, -1000, -10000, -30000] {
            let decoded = alaw_to_linear(linear_to_alaw(sample));
            assert_eq!(decoded.signum(), sample.signum(), "sample={}", sample);
            let s = sample.unsigned_abs() as i32;
            let d = decoded.unsigned_abs() as i32;
            assert!(d >= s / 2 && d <= s * 2, "sample={}, decoded={}", sample, decoded);
        }
    }

    #[test]
    fn test_codec_silence() {
        let pcmu = G711::Pcmu.silence();
        assert_eq!(pcmu.len(), SAMPLES_PER_PACKET);
        assert!(pcmu.iter().all(|&b| b == 0xFF));

        let pcma = G711::Pcma.silence();
        assert!(pcma.iter().all(|&b| b == 0xD5));
        assert!(G711::Pcma
            .decode(&pcma)
            .iter()
            .all(|s| s.unsigned_abs() < 16));
    }

    #[test]
    fn test_codec_parse() {
        assert_eq!("pcmu".parse::<G711>().unwrap(), G711::Pcmu);
        assert_eq!("alaw".parse::<G711>().unwrap(), G711::Pcma);
        assert!("opus".parse::<G711>().is_err());
        assert_eq!(G711::Pcma.payload_type(), PT_PCMA);
    }
}
