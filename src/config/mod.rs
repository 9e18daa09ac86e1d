//! Configuration file handling

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::srtp::SrtpConfig;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Engine settings, fixed when a session is initialized
    pub srtp: SrtpConfig,
    pub peer: PeerConfig,
    pub sessions: Vec<SessionConfig>,
}

/// Interop peer runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Identifies this process in broadcasts
    pub client_id: String,
    /// Where broadcasts are received
    pub broadcast_bind: SocketAddr,
    /// Where broadcasts are sent
    pub broadcast_targets: Vec<SocketAddr>,
    pub announce_interval_ms: u64,
    pub rtcp_interval_ms: u64,
    /// "PCMU" or "PCMA"
    pub codec: String,
    pub rotation: Option<RotationConfig>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            broadcast_bind: SocketAddr::from(([0, 0, 0, 0], 7400)),
            broadcast_targets: Vec::new(),
            announce_interval_ms: 1000,
            rtcp_interval_ms: 5000,
            codec: "PCMU".to_string(),
            rotation: None,
        }
    }
}

fn default_client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("peer-{}", &id[..8])
}

/// Periodic key rotation across every session's keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub interval_ms: u64,
    /// Indices between scheduling a change and its taking effect
    pub index_offset: u64,
    pub share_trigger: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            index_offset: 100,
            share_trigger: false,
        }
    }
}

/// One media session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub session_id: u32,
    /// Local RTP address; RTCP uses the next port
    pub local: SocketAddr,
    /// Remote RTP address media is sent to
    pub remote: SocketAddr,
    /// Base64 MKI of the key used from the start
    pub initial_mki: String,
    pub keys: Vec<KeyConfig>,
}

impl SessionConfig {
    pub fn rtcp_addr(addr: SocketAddr) -> SocketAddr {
        SocketAddr::new(addr.ip(), addr.port().wrapping_add(1))
    }

    pub fn initial_mki(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(&self.initial_mki)
            .with_context(|| format!("Invalid initial MKI for session {}", self.session_id))
    }
}

/// A master key, base64-encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConfig {
    pub mki: String,
    pub key: String,
    pub salt: String,
}

/// Decoded master key material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub mki: Vec<u8>,
    pub key: Vec<u8>,
    pub salt: Vec<u8>,
}

impl KeyConfig {
    pub fn encode(mki: &[u8], key: &[u8], salt: &[u8]) -> Self {
        Self {
            mki: BASE64.encode(mki),
            key: BASE64.encode(key),
            salt: BASE64.encode(salt),
        }
    }

    /// Random key and salt of the given lengths for `mki`.
    pub fn generate(mki: &[u8], key_len: usize, salt_len: usize) -> Result<Self> {
        let mut key = vec![0u8; key_len];
        let mut salt = vec![0u8; salt_len];
        getrandom::getrandom(&mut key)
            .and_then(|_| getrandom::getrandom(&mut salt))
            .map_err(|e| anyhow::anyhow!("Random source unavailable: {}", e))?;
        Ok(Self::encode(mki, &key, &salt))
    }

    pub fn decode(&self) -> Result<KeyMaterial> {
        Ok(KeyMaterial {
            mki: BASE64.decode(&self.mki).context("Invalid base64 MKI")?,
            key: BASE64.decode(&self.key).context("Invalid base64 master key")?,
            salt: BASE64.decode(&self.salt).context("Invalid base64 master salt")?,
        })
    }
}

impl AppConfig {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("org", "srtp-rekey", "srtp-rekey")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`; a missing file gives the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;
        config.srtp.validate().context("Invalid [srtp] configuration")?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let content = self.to_toml()?;
        fs::write(path, content).context("Failed to write config file")?;

        // Config carries master keys
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}
