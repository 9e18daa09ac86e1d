//! SRTP/SRTCP packet transforms (RFC 3711).
//!
//! Session key derivation with the AES-CM PRF, AES-CM and AES-F8 payload
//! encryption, HMAC-SHA1 authentication, and the SRTP trailer layout:
//!
//! ```text
//! SRTP:  header || payload* || [MKI] || [auth tag]
//! SRTCP: header || payload* || E|index || [MKI] || [auth tag]
//! ```
//!
//! The engine decides which master key applies; everything here is a pure
//! function of keys, configuration and packet bytes.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::{Aes128, Aes192, Aes256};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::fmt;

use super::config::{AuthAlg, EncryptionAlg, KindConfig};
use super::error::{Result, SrtpError};
use super::key::{MasterKey, Mki};
use super::StreamKind;
use crate::media::rtp;

type HmacSha1 = Hmac<Sha1>;

/// SRTP key derivation labels (RFC 3711, section 4.3.1).
const LABEL_CIPHER_KEY: u8 = 0x00;
const LABEL_AUTH_KEY: u8 = 0x01;
const LABEL_SALT: u8 = 0x02;

/// SRTCP key derivation labels (RFC 3711, section 3.4).
const LABEL_SRTCP_CIPHER_KEY: u8 = 0x03;
const LABEL_SRTCP_AUTH_KEY: u8 = 0x04;
const LABEL_SRTCP_SALT: u8 = 0x05;

/// Minimum RTCP header size: V/P/RC(1) + PT(1) + length(2) + SSRC(4) = 8 bytes.
pub const RTCP_HEADER_SIZE: usize = 8;

/// SRTCP E flag plus 31-bit index.
pub const SRTCP_INDEX_SIZE: usize = 4;

/// Session keys derived from one master key for one stream kind.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub cipher_key: Vec<u8>,
    pub auth_key: Vec<u8>,
    pub salt: Vec<u8>,
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys")
            .field("cipher_key_len", &self.cipher_key.len())
            .field("auth_key_len", &self.auth_key.len())
            .field("salt_len", &self.salt.len())
            .finish()
    }
}

/// `index DIV key_derivation_rate`, or 0 when keys are derived once.
pub fn derivation_epoch(index: u64, rate: Option<u64>) -> u64 {
    match rate {
        Some(rate) if rate > 0 => index / rate,
        _ => 0,
    }
}

/// Derive session keys for `kind` at derivation epoch `r` (RFC 3711, 4.3.1).
pub fn derive_session_keys(
    master: &MasterKey,
    kind: StreamKind,
    r: u64,
    cfg: &KindConfig,
) -> Result<SessionKeys> {
    let (cipher_label, auth_label, salt_label) = match kind {
        StreamKind::Rtp => (LABEL_CIPHER_KEY, LABEL_AUTH_KEY, LABEL_SALT),
        StreamKind::Rtcp => (LABEL_SRTCP_CIPHER_KEY, LABEL_SRTCP_AUTH_KEY, LABEL_SRTCP_SALT),
    };
    Ok(SessionKeys {
        cipher_key: prf_derive(master, cipher_label, r, cfg.encrypt_key_size)?,
        auth_key: prf_derive(master, auth_label, r, cfg.auth_key_size)?,
        salt: prf_derive(master, salt_label, r, cfg.salt_size)?,
    })
}

/// PRF for key derivation: AES-CM keyed with the master key.
///
/// key_id = label || r (48 bits), x = key_id XOR master_salt,
/// IV = x || 0x0000.
fn prf_derive(master: &MasterKey, label: u8, r: u64, output_len: usize) -> Result<Vec<u8>> {
    let mut x = [0u8; 14];
    x[7] = label;
    x[8..14].copy_from_slice(&r.to_be_bytes()[2..8]);

    let mut iv = [0u8; 16];
    let salt = right_aligned::<14>(&master.salt);
    for i in 0..14 {
        iv[i] = salt[i] ^ x[i];
    }

    let mut output = vec![0u8; output_len];
    apply_ctr(&master.key, &iv, &mut output)?;
    Ok(output)
}

/// Place `bytes` at the end of an N-byte zero block.
fn right_aligned<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    let take = bytes.len().min(N);
    out[N - take..].copy_from_slice(&bytes[bytes.len() - take..]);
    out
}

fn apply_ctr(key: &[u8], iv: &[u8; 16], data: &mut [u8]) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    let bad_key = |_| SrtpError::bad_param(format!("{}-byte AES key", key.len()));
    match key.len() {
        16 => ctr::Ctr128BE::<Aes128>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .apply_keystream(data),
        24 => ctr::Ctr128BE::<Aes192>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .apply_keystream(data),
        32 => ctr::Ctr128BE::<Aes256>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .apply_keystream(data),
        n => return Err(SrtpError::bad_param(format!("{}-byte AES key", n))),
    }
    Ok(())
}

/// Raw AES block encryption, for F8 mode.
enum AesBlock {
    A128(Aes128),
    A192(Aes192),
    A256(Aes256),
}

impl AesBlock {
    fn new(key: &[u8]) -> Result<Self> {
        let bad_key = |_| SrtpError::bad_param(format!("{}-byte AES key", key.len()));
        Ok(match key.len() {
            16 => AesBlock::A128(Aes128::new_from_slice(key).map_err(bad_key)?),
            24 => AesBlock::A192(Aes192::new_from_slice(key).map_err(bad_key)?),
            32 => AesBlock::A256(Aes256::new_from_slice(key).map_err(bad_key)?),
            n => return Err(SrtpError::bad_param(format!("{}-byte AES key", n))),
        })
    }

    fn encrypt(&self, block: &mut [u8; 16]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            AesBlock::A128(c) => c.encrypt_block(block),
            AesBlock::A192(c) => c.encrypt_block(block),
            AesBlock::A256(c) => c.encrypt_block(block),
        }
    }
}

/// AES-F8 keystream (RFC 3711, 4.1.2).
///
/// IV' = E(k_e XOR m, IV) with m = k_s || 0x555..., then
/// S(j) = E(k_e, IV' XOR j XOR S(j-1)).
fn apply_f8(keys: &SessionKeys, iv: &[u8; 16], data: &mut [u8]) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    let mut masked = keys.cipher_key.clone();
    for (i, b) in masked.iter_mut().enumerate() {
        *b ^= keys.salt.get(i).copied().unwrap_or(0x55);
    }
    let mut iv_prime = *iv;
    AesBlock::new(&masked)?.encrypt(&mut iv_prime);

    let cipher = AesBlock::new(&keys.cipher_key)?;
    let mut s = [0u8; 16];
    for (j, chunk) in data.chunks_mut(16).enumerate() {
        let counter = (j as u128).to_be_bytes();
        for i in 0..16 {
            s[i] ^= iv_prime[i] ^ counter[i];
        }
        cipher.encrypt(&mut s);
        for (b, k) in chunk.iter_mut().zip(s.iter()) {
            *b ^= k;
        }
    }
    Ok(())
}

/// Build the AES-CM IV (RFC 3711, 4.1.1).
///
/// IV = (session_salt * 2^16) XOR (SSRC * 2^64) XOR (index * 2^16).
fn build_cm_iv(salt: &[u8], ssrc: u32, index: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[4..8].copy_from_slice(&ssrc.to_be_bytes());
    iv[8..14].copy_from_slice(&index.to_be_bytes()[2..8]);

    let salt = right_aligned::<14>(salt);
    for i in 0..14 {
        iv[i] ^= salt[i];
    }
    iv
}

/// F8 IV for SRTP: 0x00 || M|PT || SEQ || TS || SSRC || ROC.
fn build_f8_rtp_iv(header: &[u8], roc: u32) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[1..12].copy_from_slice(&header[1..12]);
    iv[12..16].copy_from_slice(&roc.to_be_bytes());
    iv
}

/// F8 IV for SRTCP: 0..0 || E|index || V|P|RC|PT|length || SSRC.
fn build_f8_rtcp_iv(header: &[u8], e_index: u32) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[4..8].copy_from_slice(&e_index.to_be_bytes());
    iv[8..16].copy_from_slice(&header[..RTCP_HEADER_SIZE]);
    iv
}

fn compute_auth_tag(
    auth_key: &[u8],
    authenticated_portion: &[u8],
    roc: Option<u32>,
    tag_len: usize,
) -> Result<Vec<u8>> {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(auth_key)
        .map_err(|_| SrtpError::bad_param("HMAC key length"))?;
    mac.update(authenticated_portion);
    if let Some(roc) = roc {
        mac.update(&roc.to_be_bytes());
    }
    let result = mac.finalize().into_bytes();
    Ok(result[..tag_len].to_vec())
}

fn append_trailer(
    out: &mut Vec<u8>,
    cfg: &KindConfig,
    keys: &SessionKeys,
    mki: Option<&Mki>,
    roc: Option<u32>,
) -> Result<()> {
    let tag = match cfg.authentication {
        AuthAlg::None => Vec::new(),
        AuthAlg::HmacSha1 => compute_auth_tag(&keys.auth_key, out, roc, cfg.tag_size)?,
    };
    if cfg.use_mki {
        let mki = mki.ok_or(SrtpError::NullPtr("mki for packet trailer"))?;
        out.extend_from_slice(mki.as_bytes());
    }
    out.extend_from_slice(&tag);
    Ok(())
}

/// The pieces of a received SRTP/SRTCP packet, split at the trailer.
#[derive(Debug)]
pub struct ProtectedParts<'a> {
    /// Authenticated portion (for SRTCP this ends with E|index).
    pub body: &'a [u8],
    pub mki: Option<&'a [u8]>,
    pub tag: &'a [u8],
}

/// Split a protected packet into body, MKI and tag.
pub fn split_trailer<'a>(
    cfg: &KindConfig,
    mki_len: usize,
    min_body: usize,
    packet: &'a [u8],
) -> Result<ProtectedParts<'a>> {
    let tag_len = cfg.effective_tag_size();
    let mki_len = if cfg.use_mki { mki_len } else { 0 };
    if packet.len() < min_body + mki_len + tag_len {
        return Err(SrtpError::bad_param(format!(
            "protected packet too short: {} bytes",
            packet.len()
        )));
    }
    let tag_at = packet.len() - tag_len;
    let mki_at = tag_at - mki_len;
    Ok(ProtectedParts {
        body: &packet[..mki_at],
        mki: cfg.use_mki.then(|| &packet[mki_at..tag_at]),
        tag: &packet[tag_at..],
    })
}

/// Encrypt and authenticate an RTP packet.
pub fn protect_rtp(
    cfg: &KindConfig,
    keys: &SessionKeys,
    rtp_packet: &[u8],
    roc: u32,
    mki: Option<&Mki>,
) -> Result<Vec<u8>> {
    let header_len = rtp::full_header_len(rtp_packet)
        .ok_or_else(|| SrtpError::bad_param("RTP packet too short for SRTP protection"))?;
    let header = &rtp_packet[..header_len];
    let (ssrc, seq) = rtp::ssrc_and_seq(rtp_packet)
        .ok_or_else(|| SrtpError::bad_param("RTP packet too short for SRTP protection"))?;

    let mut out = Vec::with_capacity(rtp_packet.len() + 4 + cfg.effective_tag_size());
    out.extend_from_slice(rtp_packet);
    let payload = &mut out[header_len..];
    match cfg.encryption {
        EncryptionAlg::Null => {}
        EncryptionAlg::AesCm => {
            let iv = build_cm_iv(&keys.salt, ssrc, super::rtp_index(roc, seq));
            apply_ctr(&keys.cipher_key, &iv, payload)?;
        }
        EncryptionAlg::AesF8 => {
            let iv = build_f8_rtp_iv(header, roc);
            apply_f8(keys, &iv, payload)?;
        }
    }

    append_trailer(&mut out, cfg, keys, mki, Some(roc))?;
    Ok(out)
}

/// Verify and decrypt the body of a received SRTP packet.
pub fn unprotect_rtp(
    cfg: &KindConfig,
    keys: &SessionKeys,
    parts: &ProtectedParts<'_>,
    roc: u32,
) -> Result<Vec<u8>> {
    if cfg.authentication == AuthAlg::HmacSha1 {
        let expected = compute_auth_tag(&keys.auth_key, parts.body, Some(roc), cfg.tag_size)?;
        if parts.tag != expected.as_slice() {
            return Err(SrtpError::AuthFailed);
        }
    }

    let header_len = rtp::full_header_len(parts.body)
        .ok_or_else(|| SrtpError::bad_param("SRTP packet has truncated RTP header"))?;
    let (ssrc, seq) = rtp::ssrc_and_seq(parts.body)
        .ok_or_else(|| SrtpError::bad_param("SRTP packet has truncated RTP header"))?;

    let mut out = parts.body.to_vec();
    let (header, payload) = out.split_at_mut(header_len);
    match cfg.encryption {
        EncryptionAlg::Null => {}
        EncryptionAlg::AesCm => {
            let iv = build_cm_iv(&keys.salt, ssrc, super::rtp_index(roc, seq));
            apply_ctr(&keys.cipher_key, &iv, payload)?;
        }
        EncryptionAlg::AesF8 => {
            let iv = build_f8_rtp_iv(header, roc);
            apply_f8(keys, &iv, payload)?;
        }
    }
    Ok(out)
}

/// Encrypt (optionally) and authenticate an RTCP packet with SRTCP index
/// `index`.
pub fn protect_rtcp(
    cfg: &KindConfig,
    keys: &SessionKeys,
    rtcp_packet: &[u8],
    index: u32,
    encrypt: bool,
    mki: Option<&Mki>,
) -> Result<Vec<u8>> {
    if rtcp_packet.len() < RTCP_HEADER_SIZE {
        return Err(SrtpError::bad_param("RTCP packet too short for SRTCP protection"));
    }
    let header = &rtcp_packet[..RTCP_HEADER_SIZE];
    let ssrc = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let encrypted = encrypt && cfg.encryption != EncryptionAlg::Null;
    let e_flag: u32 = if encrypted { 0x8000_0000 } else { 0 };
    let e_index = e_flag | (index & 0x7FFF_FFFF);

    let mut out = Vec::with_capacity(
        rtcp_packet.len() + SRTCP_INDEX_SIZE + 4 + cfg.effective_tag_size(),
    );
    out.extend_from_slice(rtcp_packet);
    if encrypted {
        let payload = &mut out[RTCP_HEADER_SIZE..];
        match cfg.encryption {
            EncryptionAlg::AesCm => {
                let iv = build_cm_iv(&keys.salt, ssrc, index as u64 & 0x7FFF_FFFF);
                apply_ctr(&keys.cipher_key, &iv, payload)?;
            }
            EncryptionAlg::AesF8 => {
                let iv = build_f8_rtcp_iv(header, e_index);
                apply_f8(keys, &iv, payload)?;
            }
            EncryptionAlg::Null => {}
        }
    }
    out.extend_from_slice(&e_index.to_be_bytes());

    append_trailer(&mut out, cfg, keys, mki, None)?;
    Ok(out)
}

/// Read the E flag and SRTCP index from a split SRTCP packet.
pub fn srtcp_index(parts: &ProtectedParts<'_>) -> Result<(bool, u32)> {
    let at = parts
        .body
        .len()
        .checked_sub(SRTCP_INDEX_SIZE)
        .ok_or_else(|| SrtpError::bad_param("SRTCP packet too short"))?;
    let e_index = u32::from_be_bytes([
        parts.body[at],
        parts.body[at + 1],
        parts.body[at + 2],
        parts.body[at + 3],
    ]);
    Ok((e_index & 0x8000_0000 != 0, e_index & 0x7FFF_FFFF))
}

/// Verify and decrypt the body of a received SRTCP packet.
pub fn unprotect_rtcp(
    cfg: &KindConfig,
    keys: &SessionKeys,
    parts: &ProtectedParts<'_>,
) -> Result<Vec<u8>> {
    if parts.body.len() < RTCP_HEADER_SIZE + SRTCP_INDEX_SIZE {
        return Err(SrtpError::bad_param("SRTCP packet too short"));
    }
    if cfg.authentication == AuthAlg::HmacSha1 {
        let expected = compute_auth_tag(&keys.auth_key, parts.body, None, cfg.tag_size)?;
        if parts.tag != expected.as_slice() {
            return Err(SrtpError::AuthFailed);
        }
    }

    let (encrypted, index) = srtcp_index(parts)?;
    let ei_offset = parts.body.len() - SRTCP_INDEX_SIZE;
    let mut out = parts.body[..ei_offset].to_vec();
    if encrypted {
        let e_index = 0x8000_0000 | index;
        let (header, payload) = out.split_at_mut(RTCP_HEADER_SIZE);
        let ssrc = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        match cfg.encryption {
            EncryptionAlg::AesCm => {
                let iv = build_cm_iv(&keys.salt, ssrc, index as u64);
                apply_ctr(&keys.cipher_key, &iv, payload)?;
            }
            EncryptionAlg::AesF8 => {
                let iv = build_f8_rtcp_iv(header, e_index);
                apply_f8(keys, &iv, payload)?;
            }
            EncryptionAlg::Null => {}
        }
    }
    Ok(out)
}
