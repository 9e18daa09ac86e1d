//! Engine configuration.
//!
//! Everything here is fixed once a session is initialised. Algorithm and
//! pool names are parsed at the boundary, so an unknown name fails with
//! `BadParam` instead of falling back to a default.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{Result, SrtpError};
use super::key::MasterKeySizes;
use super::pool::{HashPolicy, PoolPolicy};
use super::replay::{self, DEFAULT_HISTORY_SIZE, MIN_REPLAY_SIZE};
use super::StreamKind;

/// Largest key derivation rate allowed (RFC 3711 §4.3.1).
pub const MAX_KEY_DERIVATION_RATE: u64 = 1 << 24;

/// HMAC-SHA1 output length, the upper bound for tags.
pub const MAX_TAG_SIZE: usize = 20;

/// Session salts and the PRF input block are 112 bits.
pub const MAX_SALT_SIZE: usize = 14;

macro_rules! named_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = SrtpError;

            fn from_str(s: &str) -> Result<Self> {
                let wanted = s.trim().replace(['-', '_'], "").to_ascii_uppercase();
                match wanted.as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(SrtpError::bad_param(format!(
                        concat!("unknown ", stringify!($name), " '{}'"),
                        s
                    ))),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = SrtpError;

            fn try_from(s: String) -> Result<Self> {
                s.parse()
            }
        }

        impl From<$name> for String {
            fn from(v: $name) -> Self {
                v.as_str().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

named_enum! {
    /// Session key derivation PRF.
    KeyDerivationAlg { AesCm => "AESCM" }
}

named_enum! {
    /// Payload cipher.
    EncryptionAlg { Null => "NULL", AesCm => "AESCM", AesF8 => "AESF8" }
}

named_enum! {
    /// Message authentication.
    AuthAlg { None => "NONE", HmacSha1 => "HMACSHA1" }
}

/// Per stream kind (RTP or RTCP) processing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KindConfig {
    pub encryption: EncryptionAlg,
    pub use_mki: bool,
    pub authentication: AuthAlg,
    pub tag_size: usize,
    pub encrypt_key_size: usize,
    pub auth_key_size: usize,
    pub salt_size: usize,
    pub replay_size: usize,
    pub history_size: u64,
}

impl Default for KindConfig {
    fn default() -> Self {
        Self {
            encryption: EncryptionAlg::AesCm,
            use_mki: true,
            authentication: AuthAlg::HmacSha1,
            tag_size: 10,
            encrypt_key_size: 16,
            auth_key_size: 20,
            salt_size: 14,
            replay_size: MIN_REPLAY_SIZE,
            history_size: DEFAULT_HISTORY_SIZE,
        }
    }
}

impl KindConfig {
    /// Bytes the authentication tag occupies on the wire.
    pub fn effective_tag_size(&self) -> usize {
        match self.authentication {
            AuthAlg::None => 0,
            AuthAlg::HmacSha1 => self.tag_size,
        }
    }

    /// History horizon after clamping to the replay window.
    pub fn effective_history_size(&self) -> u64 {
        self.history_size.max(self.replay_size as u64)
    }

    fn validate(&self, kind: StreamKind) -> Result<()> {
        if self.encryption != EncryptionAlg::Null
            && !matches!(self.encrypt_key_size, 16 | 24 | 32)
        {
            return Err(SrtpError::bad_param(format!(
                "{} encryption key size {} is not an AES key size",
                kind, self.encrypt_key_size
            )));
        }
        if self.salt_size > MAX_SALT_SIZE {
            return Err(SrtpError::bad_param(format!(
                "{} salt size {} exceeds {}",
                kind, self.salt_size, MAX_SALT_SIZE
            )));
        }
        if self.authentication == AuthAlg::HmacSha1 {
            if self.tag_size == 0 || self.tag_size > MAX_TAG_SIZE {
                return Err(SrtpError::bad_param(format!(
                    "{} tag size {} outside 1..={}",
                    kind, self.tag_size, MAX_TAG_SIZE
                )));
            }
            if self.auth_key_size == 0 {
                return Err(SrtpError::bad_param(format!(
                    "{} authentication key size must be nonzero",
                    kind
                )));
            }
        }
        Ok(())
    }
}

/// Pool and lookup sizing for the key, stream and context stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub key_pool: PoolPolicy,
    pub stream_pool: PoolPolicy,
    pub context_pool: PoolPolicy,
    pub key_hash: HashPolicy,
    pub source_hash: HashPolicy,
    pub destination_hash: HashPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            key_pool: PoolPolicy::with_page_items(10),
            stream_pool: PoolPolicy::with_page_items(20),
            context_pool: PoolPolicy::with_page_items(40),
            key_hash: HashPolicy::default(),
            source_hash: HashPolicy::default(),
            destination_hash: HashPolicy::default(),
        }
    }
}

impl PoolConfig {
    fn validate(&self) -> Result<()> {
        self.key_pool.validate()?;
        self.stream_pool.validate()?;
        self.context_pool.validate()?;
        self.key_hash.validate()?;
        self.source_hash.validate()?;
        self.destination_hash.validate()
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SrtpConfig {
    pub key_derivation: KeyDerivationAlg,
    /// 0 derives session keys once per master key.
    pub key_derivation_rate: u64,
    pub prefix_length: usize,
    pub master_key_sizes: MasterKeySizes,
    pub rtp: KindConfig,
    pub rtcp: KindConfig,
    pub pools: PoolConfig,
}

impl Default for SrtpConfig {
    fn default() -> Self {
        Self {
            key_derivation: KeyDerivationAlg::AesCm,
            key_derivation_rate: 0,
            prefix_length: 0,
            master_key_sizes: MasterKeySizes::default(),
            rtp: KindConfig::default(),
            rtcp: KindConfig::default(),
            pools: PoolConfig::default(),
        }
    }
}

impl SrtpConfig {
    pub fn kind(&self, kind: StreamKind) -> &KindConfig {
        match kind {
            StreamKind::Rtp => &self.rtp,
            StreamKind::Rtcp => &self.rtcp,
        }
    }

    fn kind_mut(&mut self, kind: StreamKind) -> &mut KindConfig {
        match kind {
            StreamKind::Rtp => &mut self.rtp,
            StreamKind::Rtcp => &mut self.rtcp,
        }
    }

    pub fn set_master_key_sizes(&mut self, mki: usize, key: usize, salt: usize) -> Result<()> {
        let sizes = MasterKeySizes { mki, key, salt };
        sizes.validate()?;
        self.master_key_sizes = sizes;
        Ok(())
    }

    pub fn set_key_derivation(&mut self, alg: KeyDerivationAlg, rate: u64) -> Result<()> {
        if rate != 0 && (!rate.is_power_of_two() || rate > MAX_KEY_DERIVATION_RATE) {
            return Err(SrtpError::bad_param(format!(
                "key derivation rate {} must be 0 or a power of two up to 2^24",
                rate
            )));
        }
        self.key_derivation = alg;
        self.key_derivation_rate = rate;
        Ok(())
    }

    pub fn set_prefix_length(&mut self, len: usize) -> Result<()> {
        self.prefix_length = len;
        Ok(())
    }

    pub fn set_encryption(&mut self, kind: StreamKind, alg: EncryptionAlg, use_mki: bool) -> Result<()> {
        let cfg = self.kind_mut(kind);
        cfg.encryption = alg;
        cfg.use_mki = use_mki;
        Ok(())
    }

    pub fn set_authentication(&mut self, kind: StreamKind, alg: AuthAlg, tag_size: usize) -> Result<()> {
        if alg == AuthAlg::HmacSha1 && (tag_size == 0 || tag_size > MAX_TAG_SIZE) {
            return Err(SrtpError::bad_param(format!(
                "tag size {} outside 1..={}",
                tag_size, MAX_TAG_SIZE
            )));
        }
        let cfg = self.kind_mut(kind);
        cfg.authentication = alg;
        cfg.tag_size = tag_size;
        Ok(())
    }

    pub fn set_key_sizes(
        &mut self,
        kind: StreamKind,
        encrypt_key_size: usize,
        auth_key_size: usize,
        salt_size: usize,
    ) -> Result<()> {
        if salt_size > MAX_SALT_SIZE {
            return Err(SrtpError::bad_param(format!(
                "salt size {} exceeds {}",
                salt_size, MAX_SALT_SIZE
            )));
        }
        let cfg = self.kind_mut(kind);
        cfg.encrypt_key_size = encrypt_key_size;
        cfg.auth_key_size = auth_key_size;
        cfg.salt_size = salt_size;
        Ok(())
    }

    /// Sizes below the minimum are raised; the history follows if needed.
    pub fn set_replay_size(&mut self, kind: StreamKind, size: usize) -> Result<()> {
        let cfg = self.kind_mut(kind);
        cfg.replay_size = replay::normalize_size(size);
        cfg.history_size = cfg.effective_history_size();
        Ok(())
    }

    /// Silently raised to the replay window size if smaller.
    pub fn set_history_size(&mut self, kind: StreamKind, size: u64) -> Result<()> {
        let cfg = self.kind_mut(kind);
        cfg.history_size = size.max(cfg.replay_size as u64);
        Ok(())
    }

    /// Check the whole configuration before it is put to use.
    pub fn validate(&self) -> Result<()> {
        self.master_key_sizes.validate()?;
        if !matches!(self.master_key_sizes.key, 16 | 24 | 32) {
            return Err(SrtpError::bad_param(format!(
                "master key size {} is not an AES key size",
                self.master_key_sizes.key
            )));
        }
        if self.master_key_sizes.salt > MAX_SALT_SIZE {
            return Err(SrtpError::bad_param(format!(
                "master salt size {} exceeds {}",
                self.master_key_sizes.salt, MAX_SALT_SIZE
            )));
        }
        self.rtp.validate(StreamKind::Rtp)?;
        self.rtcp.validate(StreamKind::Rtcp)?;
        self.pools.validate()
    }

    /// Packet index divisor for key derivation, `None` when keys are
    /// derived once.
    pub fn derivation_rate(&self) -> Option<u64> {
        (self.key_derivation_rate > 0).then_some(self.key_derivation_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = SrtpConfig::default();
        assert_eq!(cfg.master_key_sizes, MasterKeySizes { mki: 4, key: 16, salt: 14 });
        assert_eq!(cfg.rtp.replay_size, 64);
        assert_eq!(cfg.rtcp.history_size, 65536);
        assert!(cfg.rtp.use_mki);
        assert_eq!(cfg.rtp.effective_tag_size(), 10);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_algorithm_names_parse() {
        assert_eq!("AES_CM".parse::<EncryptionAlg>().unwrap(), EncryptionAlg::AesCm);
        assert_eq!("aesf8".parse::<EncryptionAlg>().unwrap(), EncryptionAlg::AesF8);
        assert_eq!("null".parse::<EncryptionAlg>().unwrap(), EncryptionAlg::Null);
        assert_eq!("HMAC-SHA1".parse::<AuthAlg>().unwrap(), AuthAlg::HmacSha1);
        assert_eq!("aescm".parse::<KeyDerivationAlg>().unwrap(), KeyDerivationAlg::AesCm);
        assert!(matches!("des".parse::<EncryptionAlg>(), Err(SrtpError::BadParam(_))));
    }

    #[test]
    fn test_master_key_sizes_rejected() {
        let mut cfg = SrtpConfig::default();
        assert!(cfg.set_master_key_sizes(0, 16, 14).is_err());
        assert!(cfg.set_master_key_sizes(4, 0, 14).is_err());
        assert!(cfg.set_master_key_sizes(2, 32, 0).is_ok());
        assert_eq!(cfg.master_key_sizes.mki, 2);
    }

    #[test]
    fn test_key_derivation_rate() {
        let mut cfg = SrtpConfig::default();
        assert!(cfg.set_key_derivation(KeyDerivationAlg::AesCm, 0).is_ok());
        assert!(cfg.set_key_derivation(KeyDerivationAlg::AesCm, 1 << 16).is_ok());
        assert_eq!(cfg.derivation_rate(), Some(1 << 16));
        assert!(cfg.set_key_derivation(KeyDerivationAlg::AesCm, 3).is_err());
        assert!(cfg.set_key_derivation(KeyDerivationAlg::AesCm, 1 << 25).is_err());
    }

    #[test]
    fn test_history_clamped_to_replay() {
        let mut cfg = SrtpConfig::default();
        cfg.set_replay_size(StreamKind::Rtp, 1024).unwrap();
        cfg.set_history_size(StreamKind::Rtp, 100).unwrap();
        assert_eq!(cfg.rtp.history_size, 1024);

        cfg.set_history_size(StreamKind::Rtcp, 100).unwrap();
        assert_eq!(cfg.rtcp.history_size, 100);
        cfg.set_replay_size(StreamKind::Rtcp, 512).unwrap();
        assert_eq!(cfg.rtcp.history_size, 512);
    }

    #[test]
    fn test_replay_size_minimum() {
        let mut cfg = SrtpConfig::default();
        cfg.set_replay_size(StreamKind::Rtp, 10).unwrap();
        assert_eq!(cfg.rtp.replay_size, 64);
        cfg.set_replay_size(StreamKind::Rtp, 0).unwrap();
        assert_eq!(cfg.rtp.replay_size, 0);
    }

    #[test]
    fn test_tag_size_bounds() {
        let mut cfg = SrtpConfig::default();
        assert!(cfg.set_authentication(StreamKind::Rtp, AuthAlg::HmacSha1, 21).is_err());
        assert!(cfg.set_authentication(StreamKind::Rtp, AuthAlg::HmacSha1, 4).is_ok());
        assert!(cfg.set_authentication(StreamKind::Rtcp, AuthAlg::None, 0).is_ok());
        assert_eq!(cfg.rtcp.effective_tag_size(), 0);
    }

    #[test]
    fn test_validate_rejects_bad_encryption_key() {
        let mut cfg = SrtpConfig::default();
        cfg.set_key_sizes(StreamKind::Rtp, 20, 20, 14).unwrap();
        assert!(matches!(cfg.validate(), Err(SrtpError::BadParam(_))));
        cfg.set_encryption(StreamKind::Rtp, EncryptionAlg::Null, false).unwrap();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_toml_roundtrip_keeps_names() {
        let cfg = SrtpConfig::default();
        let text = toml::to_string(&cfg).unwrap();
        assert!(text.contains("encryption = \"AESCM\""));
        assert!(text.contains("kind = \"EXPANDING\""));
        let back: SrtpConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn test_toml_unknown_pool_kind_rejected() {
        let text = "[pools.key_pool]\nkind = \"ELASTIC\"\n";
        assert!(toml::from_str::<SrtpConfig>(text).is_err());
    }
}
