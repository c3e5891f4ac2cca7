// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed named configuration sections: a `#[derive(Deserialize)]` struct
//! per concern with `Default` and a `validate(&self)` method, aggregated
//! into one top-level document.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// A named RFC 7182 signature configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureConfig {
    pub name: String,
    /// Symmetric key bytes, base64 or hex depending on the YAML author's
    /// taste — carried as raw bytes once deserialized via a newtype in a
    /// production loader; a plain `Vec<u8>` here for this document's scope.
    #[serde(default)]
    pub key: Vec<u8>,
    /// May be empty.
    #[serde(default)]
    pub id: Vec<u8>,
    /// Message types (0..255) this signature applies to.
    #[serde(default)]
    pub msgtype: Vec<u8>,
    #[serde(default)]
    pub packet: bool,
    #[serde(default)]
    pub source_specific: bool,
    #[serde(default)]
    pub drop_if_invalid: bool,
    #[serde(default = "default_hash")]
    pub hash: String,
    #[serde(default = "default_crypt")]
    pub crypt: String,
}

fn default_hash() -> String {
    "identity".to_string()
}

fn default_crypt() -> String {
    "identity".to_string()
}

impl SignatureConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::InvalidValue("signature section name cannot be empty".into()));
        }
        if !self.packet && self.msgtype.is_empty() {
            return Err(ConfigError::InvalidValue(
                "signature section must apply to the packet or at least one msgtype".into(),
            ));
        }
        Ok(())
    }
}

/// UDP-mode policy for a DLEP interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UdpMode {
    None,
    SingleSession,
    Always,
}

impl Default for UdpMode {
    fn default() -> Self {
        Self::SingleSession
    }
}

/// A named DLEP interface configuration section. Router-side and
/// radio-side fields coexist here with
/// `Option`; [`validate`](Self::validate) enforces which combination is
/// legal for a given `radio` flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlepInterfaceConfig {
    pub name: String,
    #[serde(default)]
    pub radio: bool,

    #[serde(default = "default_peer_type")]
    pub peer_type: String,
    #[serde(default = "default_discovery_mc_v4")]
    pub discovery_mc_v4: String,
    #[serde(default = "default_discovery_mc_v6")]
    pub discovery_mc_v6: String,
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    #[serde(default)]
    pub discovery_bindto: Option<String>,
    #[serde(default = "default_discovery_interval_ms")]
    pub discovery_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default)]
    pub udp_mode: UdpMode,
    #[serde(default)]
    pub datapath_if: Option<String>,
    #[serde(default)]
    pub connect_to: Option<String>,
    #[serde(default)]
    pub connect_to_port: Option<u16>,

    // Radio-side only.
    #[serde(default)]
    pub session_port: Option<u16>,
    #[serde(default)]
    pub session_bindto: Option<String>,
    #[serde(default)]
    pub proxied: bool,
    #[serde(default)]
    pub not_proxied: bool,
    #[serde(default = "default_lid_length")]
    pub lid_length: u8,
}

fn default_peer_type() -> String {
    "oonfd".to_string()
}
fn default_discovery_mc_v4() -> String {
    "224.0.0.2".to_string()
}
fn default_discovery_mc_v6() -> String {
    "ff02::2".to_string()
}
fn default_discovery_port() -> u16 {
    854
}
fn default_discovery_interval_ms() -> u64 {
    1000
}
fn default_heartbeat_interval_ms() -> u64 {
    5000
}
fn default_lid_length() -> u8 {
    4
}

/// Implementation maximum for a negotiated LID length. A requested length
/// larger than this forces a Session-Termination with status "request
/// denied".
pub const MAX_LID_LENGTH: u8 = 254;

impl DlepInterfaceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::InvalidValue("dlep interface name cannot be empty".into()));
        }
        if self.discovery_interval_ms < 1000 {
            return Err(ConfigError::InvalidValue("discovery_interval must be >= 1s".into()));
        }
        if !(1000..=65_000).contains(&self.heartbeat_interval_ms) {
            return Err(ConfigError::InvalidValue("heartbeat_interval must be within 1s..65s".into()));
        }
        if self.lid_length > MAX_LID_LENGTH {
            return Err(ConfigError::InvalidValue(format!(
                "lid_length {} exceeds implementation maximum {}",
                self.lid_length, MAX_LID_LENGTH
            )));
        }
        if self.proxied && self.not_proxied {
            return Err(ConfigError::InvalidValue("proxied and not_proxied are mutually exclusive".into()));
        }
        Ok(())
    }
}

impl Default for DlepInterfaceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            radio: false,
            peer_type: default_peer_type(),
            discovery_mc_v4: default_discovery_mc_v4(),
            discovery_mc_v6: default_discovery_mc_v6(),
            discovery_port: default_discovery_port(),
            discovery_bindto: None,
            discovery_interval_ms: default_discovery_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            udp_mode: UdpMode::default(),
            datapath_if: None,
            connect_to: None,
            connect_to_port: None,
            session_port: None,
            session_bindto: None,
            proxied: false,
            not_proxied: false,
            lid_length: default_lid_length(),
        }
    }
}

/// A named OLSRv2/NHDP mesh interface configuration section: the
/// multicast socket HELLO/TC is sent and received on, plus the timing
/// and willingness this interface advertises.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshInterfaceConfig {
    pub name: String,
    /// This interface's own address, advertised as every composed
    /// message's originator and omitted from its own two-hop set.
    pub local_addr: String,
    #[serde(default = "default_mesh_mc_v4")]
    pub multicast_v4: String,
    #[serde(default = "default_mesh_port")]
    pub port: u16,
    #[serde(default)]
    pub bindto: Option<String>,
    #[serde(default = "default_hello_interval_ms")]
    pub hello_interval_ms: u64,
    #[serde(default = "default_tc_interval_ms")]
    pub tc_interval_ms: u64,
    /// RFC 7181 §5.4 willingness (0 = never, 7 = always, 1..6 = level).
    #[serde(default = "default_willingness")]
    pub willingness: u8,
    /// How long a neighbor may go unheard before it is dropped.
    #[serde(default = "default_hold_time_ms")]
    pub hold_time_ms: u64,
}

fn default_mesh_mc_v4() -> String {
    "224.0.0.109".to_string()
}
fn default_mesh_port() -> u16 {
    698
}
fn default_hello_interval_ms() -> u64 {
    2000
}
fn default_tc_interval_ms() -> u64 {
    5000
}
fn default_willingness() -> u8 {
    3
}
fn default_hold_time_ms() -> u64 {
    6000
}

impl MeshInterfaceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::InvalidValue("mesh interface name cannot be empty".into()));
        }
        if self.local_addr.parse::<std::net::Ipv4Addr>().is_err() {
            return Err(ConfigError::InvalidValue(format!(
                "mesh interface '{}' has an invalid local_addr",
                self.name
            )));
        }
        if self.hello_interval_ms < 100 {
            return Err(ConfigError::InvalidValue("hello_interval_ms must be >= 100".into()));
        }
        if self.tc_interval_ms < self.hello_interval_ms {
            return Err(ConfigError::InvalidValue(
                "tc_interval_ms must be >= hello_interval_ms".into(),
            ));
        }
        if self.willingness > 7 {
            return Err(ConfigError::InvalidValue("willingness must be within 0..=7".into()));
        }
        if self.hold_time_ms <= self.hello_interval_ms {
            return Err(ConfigError::InvalidValue(
                "hold_time_ms must exceed hello_interval_ms".into(),
            ));
        }
        Ok(())
    }
}

/// `[global]` options shared across every subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self { log_level: default_log_level() }
    }
}

/// The top-level daemon configuration document (`oonfd.yaml`), aggregating
/// every subsystem's named section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub signature: Vec<SignatureConfig>,
    #[serde(default)]
    pub dlep: Vec<DlepInterfaceConfig>,
    #[serde(default)]
    pub mesh: Vec<MeshInterfaceConfig>,
}

impl DaemonConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(s).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for sig in &self.signature {
            sig.validate()?;
        }
        for dlep in &self.dlep {
            dlep.validate()?;
        }
        for mesh in &self.mesh {
            mesh.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(s) => write!(f, "I/O error: {s}"),
            Self::ParseError(s) => write!(f, "parse error: {s}"),
            Self::InvalidValue(s) => write!(f, "invalid value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_daemon_config_validates() {
        assert!(DaemonConfig::default().validate().is_ok());
    }

    #[test]
    fn signature_without_packet_or_msgtype_is_rejected() {
        let sig = SignatureConfig {
            name: "default".into(),
            key: vec![],
            id: vec![],
            msgtype: vec![],
            packet: false,
            source_specific: false,
            drop_if_invalid: false,
            hash: default_hash(),
            crypt: default_crypt(),
        };
        assert!(sig.validate().is_err());
    }

    #[test]
    fn dlep_lid_length_over_maximum_is_rejected() {
        let mut dlep = DlepInterfaceConfig { name: "wlan0".into(), ..Default::default() };
        dlep.lid_length = 255;
        assert!(dlep.validate().is_err());
    }

    #[test]
    fn dlep_heartbeat_out_of_range_is_rejected() {
        let mut dlep = DlepInterfaceConfig { name: "wlan0".into(), ..Default::default() };
        dlep.heartbeat_interval_ms = 70_000;
        assert!(dlep.validate().is_err());
    }

    #[test]
    fn parses_minimal_yaml_document() {
        let yaml = r#"
global:
  log_level: debug
dlep:
  - name: wlan0
    radio: true
    lid_length: 6
"#;
        let cfg = DaemonConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.global.log_level, "debug");
        assert_eq!(cfg.dlep.len(), 1);
        assert_eq!(cfg.dlep[0].lid_length, 6);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn proxied_and_not_proxied_are_mutually_exclusive() {
        let mut dlep = DlepInterfaceConfig { name: "wlan0".into(), ..Default::default() };
        dlep.proxied = true;
        dlep.not_proxied = true;
        assert!(dlep.validate().is_err());
    }

    #[test]
    fn from_file_reads_and_parses_yaml_on_disk() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
global:
  log_level: warn
dlep:
  - name: wlan1
    radio: false
"#
        )
        .unwrap();

        let cfg = DaemonConfig::from_file(file.path()).unwrap();
        assert_eq!(cfg.global.log_level, "warn");
        assert_eq!(cfg.dlep[0].name, "wlan1");
    }

    #[test]
    fn from_file_missing_path_is_io_error() {
        let err = DaemonConfig::from_file(Path::new("/nonexistent/oonfd.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
