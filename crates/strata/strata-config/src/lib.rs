//! Workspace-level configuration, loaded from a TOML file:
//! `serde::Deserialize` + `toml` + `thiserror`, with a `defaults` module of
//! free functions feeding `#[serde(default = ...)]`.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Deserialize;

/// Headroom above `maxclients` usable only by addresses in `writeips`
///.
pub const RESERVE: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("failed to stat '{path}'")]
    Stat {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Deserialize, Debug, Clone)]
pub struct RingConfig {
    /// Directory the packet buffer and stream-index sidecar live in. `None`
    /// means an anonymous, non-persisted ring.
    #[serde(default)]
    pub ring_directory: Option<PathBuf>,
    #[serde(default = "defaults::pktsize")]
    pub pktsize: u64,
    /// Total ring capacity in bytes; `maxpackets = ringsize / pktsize`.
    #[serde(default = "defaults::ringsize")]
    pub ringsize: u64,
    /// 0 = refuse to start, 1 = rename aside, 2 = unlink.
    #[serde(default = "defaults::autorecovery")]
    pub autorecovery: u8,
}

impl RingConfig {
    pub fn maxpackets(&self) -> u64 {
        self.ringsize / self.pktsize
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct LimitIpEntry {
    /// CIDR-style address pattern, e.g. `"10.2.0.0/16"`.
    pub cidr: String,
    /// Stream-glob this address is limited to.
    pub pattern: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct IpPolicyConfig {
    #[serde(default)]
    pub matchips: Vec<String>,
    #[serde(default)]
    pub rejectips: Vec<String>,
    #[serde(default)]
    pub writeips: Vec<String>,
    #[serde(default)]
    pub trustedips: Vec<String>,
    #[serde(default)]
    pub limitips: Vec<LimitIpEntry>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EndpointProtocol {
    Tcp,
    LocalSocket,
}

#[derive(Deserialize, Debug, Clone)]
pub struct EndpointConfig {
    pub address: String,
    pub protocol: EndpointProtocol,
    #[serde(default)]
    pub tls: bool,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct TlsConfig {
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub enabled: bool,
    pub directory: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TransferLogConfig {
    #[serde(default)]
    pub enabled: bool,
    pub path: Option<PathBuf>,
    #[serde(default = "defaults::transfer_log_window_secs")]
    pub window_secs: u64,
}

impl Default for TransferLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            window_secs: defaults::transfer_log_window_secs(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    pub ring: RingConfig,
    #[serde(default = "defaults::maxclients")]
    pub maxclients: u64,
    #[serde(default = "defaults::maxclients_per_ip")]
    pub maxclients_per_ip: u64,
    /// Idle-client timeout in seconds; `0` disables reaping.
    #[serde(default)]
    pub clienttimeout: u64,
    #[serde(default)]
    pub ip_policy: IpPolicyConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub transfer_log: TransferLogConfig,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

mod defaults {
    pub fn log_level() -> String {
        "info".into()
    }

    pub fn pktsize() -> u64 {
        512
    }

    pub fn ringsize() -> u64 {
        1 << 30 // 1 GiB
    }

    pub fn autorecovery() -> u8 {
        1
    }

    pub fn maxclients() -> u64 {
        600
    }

    pub fn maxclients_per_ip() -> u64 {
        20
    }

    pub fn transfer_log_window_secs() -> u64 {
        600
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&text)?;
        Ok(config)
    }

    /// Reload `path` if its mtime is newer than `last_mtime`. Returns the
    /// reloaded config and its new mtime, or `None` if unchanged.
    pub fn reload_if_changed(path: impl AsRef<Path>, last_mtime: SystemTime) -> Result<Option<(Self, SystemTime)>, ConfigError> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path).map_err(|source| ConfigError::Stat {
            path: path.display().to_string(),
            source,
        })?;
        let mtime = metadata.modified().map_err(|source| ConfigError::Stat {
            path: path.display().to_string(),
            source,
        })?;
        if mtime <= last_mtime {
            return Ok(None);
        }
        Ok(Some((Self::load(path)?, mtime)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let toml = r#"
            [ring]
        "#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, toml).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.ring.pktsize, 512);
        assert_eq!(config.maxclients, 600);
        assert!(config.endpoints.is_empty());
    }

    #[test]
    fn reload_if_changed_detects_newer_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "[ring]\n").unwrap();

        let before = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert!(Config::reload_if_changed(&path, before).unwrap().is_none());

        std::thread::sleep(std::time::Duration::from_millis(10));
        std::fs::write(&path, "[ring]\npktsize = 1024\n").unwrap();
        let reloaded = Config::reload_if_changed(&path, before).unwrap();
        assert!(reloaded.is_some());
        assert_eq!(reloaded.unwrap().0.ring.pktsize, 1024);
    }

    #[test]
    fn parses_full_config() {
        let toml = r#"
            log_level = "debug"
            maxclients = 2
            clienttimeout = 2

            [ring]
            pktsize = 256
            ringsize = 2048
            autorecovery = 1

            [ip_policy]
            matchips = ["10.0.0.0/8"]
            rejectips = ["10.1.0.0/16"]
            writeips = ["10.2.0.0/16"]

            [[endpoints]]
            address = "0.0.0.0:18000"
            protocol = "tcp"
            tls = false
        "#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, toml).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.ring.maxpackets(), 8);
        assert_eq!(config.ip_policy.matchips, vec!["10.0.0.0/8".to_string()]);
        assert_eq!(config.endpoints.len(), 1);
        assert_eq!(config.endpoints[0].protocol, EndpointProtocol::Tcp);
    }
}
