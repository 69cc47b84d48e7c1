//! Configuration file parsing
//!
//! The configuration is a TOML file:
//!
//! ```toml
//! [tool]
//! name = "atmel-ice"
//!
//! [target]
//! name = "atmega328p"
//! physical-interface = "debug-wire"
//! description-file = "/usr/share/avrbridge/atdf"
//! manage-dwen-fuse-bit = true
//!
//! [gdb]
//! port = 1442
//!
//! [controller]
//! command-timeout-ms = "0xEA60"
//! ```
//!
//! Only `[tool]` and `[target]` are required. Numbers may be written as
//! decimal integers or as `0x` prefixed hex strings.

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use avrbridge_controller::TargetConfig;
use avrbridge_core::target::PhysicalInterface;
use avrbridge_edbg::EdbgToolModel;
use avrbridge_gdb::{ServerConfig, DEFAULT_PORT};
use serde::{de, Deserialize, Deserializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    pub tool: ToolConfig,
    pub target: TargetSection,
    #[serde(default)]
    pub gdb: GdbConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ToolConfig {
    #[serde(deserialize_with = "deserialize_tool")]
    pub name: EdbgToolModel,
    /// Serial number, to pick one of several connected tools
    pub serial: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_number")]
    pub max_memory_access_size: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TargetSection {
    pub name: String,
    pub physical_interface: PhysicalInterface,
    /// Description file, or a directory searched for `<name>.atdf`
    pub description_file: Option<PathBuf>,
    #[serde(default)]
    pub manage_dwen_fuse_bit: bool,
    #[serde(default = "enabled")]
    pub cycle_target_power_post_dwen_update: bool,
    #[serde(default = "default_power_cycle_delay", deserialize_with = "deserialize_number")]
    pub target_power_cycle_delay_ms: u64,
    #[serde(default)]
    pub disable_debug_wire_on_deactivate: bool,
    #[serde(default)]
    pub manage_ocden_fuse_bit: bool,
    #[serde(default = "enabled")]
    pub preserve_eeprom: bool,
    #[serde(default)]
    pub reactivate_jtag_target_post_programming_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GdbConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: IpAddr,
    #[serde(default = "default_port", deserialize_with = "deserialize_number")]
    pub port: u16,
}

impl Default for GdbConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ControllerConfig {
    #[serde(default = "default_command_timeout", deserialize_with = "deserialize_number")]
    pub command_timeout_ms: u64,
    /// Suspend the controller, releasing the tool, when a GDB client leaves
    #[serde(default)]
    pub release_post_debug_session: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout(),
            release_post_debug_session: false,
        }
    }
}

fn enabled() -> bool {
    true
}

fn default_power_cycle_delay() -> u64 {
    250
}

fn default_listen_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_command_timeout() -> u64 {
    60_000
}

impl Config {
    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse a configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Where to look for the target description file
    ///
    /// Falls back to the working directory when the file names none.
    pub fn description_location(&self) -> PathBuf {
        self.target
            .description_file
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn target_config(&self) -> TargetConfig {
        let target = &self.target;
        TargetConfig {
            physical_interface: target.physical_interface,
            manage_dwen_fuse_bit: target.manage_dwen_fuse_bit,
            cycle_target_power_post_dwen_update: target.cycle_target_power_post_dwen_update,
            target_power_cycle_delay: Duration::from_millis(target.target_power_cycle_delay_ms),
            disable_debug_wire_on_deactivate: target.disable_debug_wire_on_deactivate,
            manage_ocden_fuse_bit: target.manage_ocden_fuse_bit,
            preserve_eeprom: target.preserve_eeprom,
            reactivate_jtag_target_post_programming_mode: target
                .reactivate_jtag_target_post_programming_mode,
            max_memory_access_size: self.tool.max_memory_access_size,
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            listen_address: self.gdb.listen_address,
            port: self.gdb.port,
            release_post_debug_session: self.controller.release_post_debug_session,
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.controller.command_timeout_ms)
    }
}

fn deserialize_tool<'de, D>(deserializer: D) -> Result<EdbgToolModel, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    EdbgToolModel::from_config_name(&name).ok_or_else(|| {
        let known: Vec<&str> = EdbgToolModel::ALL.iter().map(|m| m.config_name()).collect();
        de::Error::custom(format!(
            "unknown tool '{}' (expected one of: {})",
            name,
            known.join(", ")
        ))
    })
}

/// Deserialize an integer that can be hex (0x...) or decimal
fn deserialize_number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexOrInt {
        Int(u64),
        Str(String),
    }

    let value = match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => n,
        HexOrInt::Str(s) => parse_number(&s).map_err(de::Error::custom)?,
    };
    T::try_from(value).map_err(|_| de::Error::custom(format!("{} is out of range", value)))
}

fn deserialize_optional_number<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_number(deserializer).map(Some)
}

fn parse_number(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[tool]
name = "atmel-ice"

[target]
name = "atmega328p"
physical-interface = "debug-wire"
"#;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.tool.name, EdbgToolModel::AtmelIce);
        assert_eq!(config.tool.serial, None);
        assert_eq!(config.description_location(), PathBuf::from("."));

        let target = config.target_config();
        assert_eq!(target, TargetConfig::new(PhysicalInterface::DebugWire));

        let server = config.server_config();
        assert_eq!(server, ServerConfig::default());
        assert_eq!(config.command_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_parse_full() {
        let toml = r#"
[tool]
name = "power-debugger"
serial = "J50200012345"
max-memory-access-size = "0x100"

[target]
name = "atmega1284p"
physical-interface = "jtag"
description-file = "/opt/atdf"
manage-ocden-fuse-bit = true
preserve-eeprom = false
target-power-cycle-delay-ms = 500
reactivate-jtag-target-post-programming-mode = true

[gdb]
listen-address = "0.0.0.0"
port = "0x1000"

[controller]
command-timeout-ms = 5000
release-post-debug-session = true
"#;
        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.tool.name, EdbgToolModel::PowerDebugger);
        assert_eq!(config.tool.serial.as_deref(), Some("J50200012345"));
        assert_eq!(config.description_location(), PathBuf::from("/opt/atdf"));

        let target = config.target_config();
        assert_eq!(target.physical_interface, PhysicalInterface::Jtag);
        assert_eq!(target.max_memory_access_size, Some(0x100));
        assert_eq!(target.target_power_cycle_delay, Duration::from_millis(500));
        assert!(target.manage_ocden_fuse_bit);
        assert!(!target.preserve_eeprom);
        assert!(target.reactivate_jtag_target_post_programming_mode);
        assert!(target.cycle_target_power_post_dwen_update);

        let server = config.server_config();
        assert_eq!(server.listen_address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(server.port, 0x1000);
        assert!(server.release_post_debug_session);
        assert_eq!(config.command_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_bad_values() {
        let unknown_tool = MINIMAL.replace("atmel-ice", "jtagice3");
        assert!(matches!(
            Config::from_toml_str(&unknown_tool),
            Err(ConfigError::Parse(_))
        ));

        let unknown_interface = MINIMAL.replace("debug-wire", "swd");
        assert!(Config::from_toml_str(&unknown_interface).is_err());

        let port_too_large = format!("{}\n[gdb]\nport = 70000\n", MINIMAL);
        assert!(Config::from_toml_str(&port_too_large).is_err());

        let unknown_key = format!("{}\n[gdb]\nbind = \"::1\"\n", MINIMAL);
        assert!(Config::from_toml_str(&unknown_key).is_err());

        assert!(Config::from_toml_str("[tool]\nname = \"snap\"\n").is_err());
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.target.name, "atmega328p");

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("avrbridge.toml");
        assert!(matches!(
            Config::load(&missing),
            Err(ConfigError::Io { path, .. }) if path == missing
        ));
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("4096").unwrap(), 4096);
        assert_eq!(parse_number("0x1000").unwrap(), 4096);
        assert_eq!(parse_number(" 0XFF ").unwrap(), 255);
        assert!(parse_number("0xZZ").is_err());
    }
}
