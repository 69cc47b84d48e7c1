//! Monitor commands (`monitor ...` in GDB, sent as `qRcmd`)

use serde::Serialize;

use crate::error::{GdbError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const HELP_TEXT: &str = "\
Supported monitor commands:

  help                        Show this help text
  version                     Show the avrbridge version
  version machine             Show the avrbridge version as JSON
  reset                       Reset the target and hold it in a stopped state
  svd                         Print a CMSIS-SVD description of the target
  svd --out                   Write the CMSIS-SVD description to <target>.svd
  eeprom fill [--value=<hex>] Fill the whole EEPROM with a repeating byte pattern
                              (defaults to 0xFF)
";

pub const RESET_COMPLETE: &str =
    "Target reset complete - use the 'continue' command to begin execution.\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorCommand {
    Help,
    Version,
    VersionMachine,
    Reset,
    Svd { out: bool },
    EepromFill { pattern: Vec<u8> },
    Unknown(String),
}

fn parse_pattern(value: &str) -> Result<Vec<u8>> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    if digits.is_empty() {
        return Err(GdbError::malformed("empty fill value"));
    }
    let pattern = crate::hex::decode(digits.as_bytes())
        .map_err(|_| GdbError::malformed(format!("invalid fill value '{}'", value)))?;
    Ok(pattern)
}

impl MonitorCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let words: Vec<&str> = line.split_whitespace().collect();

        let command = match words.as_slice() {
            [] | ["help"] => Self::Help,
            ["version"] => Self::Version,
            ["version", "machine"] => Self::VersionMachine,
            ["reset"] => Self::Reset,
            ["svd"] => Self::Svd { out: false },
            ["svd", "--out"] => Self::Svd { out: true },
            ["eeprom", "fill", options @ ..] => {
                let mut pattern = vec![0xFF];
                let mut options = options.iter();
                while let Some(option) = options.next() {
                    if let Some(value) = option.strip_prefix("--value=") {
                        pattern = parse_pattern(value)?;
                    } else if *option == "--value" {
                        let value = options
                            .next()
                            .ok_or_else(|| GdbError::malformed("--value needs an argument"))?;
                        pattern = parse_pattern(value)?;
                    } else {
                        return Ok(Self::Unknown(line.to_string()));
                    }
                }
                Self::EepromFill { pattern }
            }
            _ => Self::Unknown(line.to_string()),
        };
        Ok(command)
    }
}

#[derive(Serialize)]
struct VersionComponents {
    major: u32,
    minor: u32,
    patch: u32,
}

#[derive(Serialize)]
struct MachineVersion {
    version: &'static str,
    components: VersionComponents,
}

/// Version as a JSON document
pub fn version_json() -> String {
    let component = |s: &str| s.parse::<u32>().unwrap_or(0);
    let version = MachineVersion {
        version: VERSION,
        components: VersionComponents {
            major: component(env!("CARGO_PKG_VERSION_MAJOR")),
            minor: component(env!("CARGO_PKG_VERSION_MINOR")),
            patch: component(env!("CARGO_PKG_VERSION_PATCH")),
        },
    };
    serde_json::to_string_pretty(&version).unwrap_or_default() + "\n"
}

pub fn version_text() -> String {
    format!("avrbridge v{}\n", VERSION)
}

/// Repeat `pattern` to fill `size` bytes
pub fn fill_buffer(pattern: &[u8], size: usize) -> Vec<u8> {
    pattern.iter().copied().cycle().take(size).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(MonitorCommand::parse("").unwrap(), MonitorCommand::Help);
        assert_eq!(
            MonitorCommand::parse("version machine").unwrap(),
            MonitorCommand::VersionMachine
        );
        assert_eq!(
            MonitorCommand::parse("svd --out").unwrap(),
            MonitorCommand::Svd { out: true }
        );
        assert_eq!(
            MonitorCommand::parse("frobnicate").unwrap(),
            MonitorCommand::Unknown("frobnicate".into())
        );
    }

    #[test]
    fn test_parse_eeprom_fill() {
        assert_eq!(
            MonitorCommand::parse("eeprom fill").unwrap(),
            MonitorCommand::EepromFill {
                pattern: vec![0xFF]
            }
        );
        assert_eq!(
            MonitorCommand::parse("eeprom fill --value=0xAABB").unwrap(),
            MonitorCommand::EepromFill {
                pattern: vec![0xAA, 0xBB]
            }
        );
        assert_eq!(
            MonitorCommand::parse("eeprom fill --value 01").unwrap(),
            MonitorCommand::EepromFill {
                pattern: vec![0x01]
            }
        );
        assert!(MonitorCommand::parse("eeprom fill --value=ABC").is_err());
        assert!(MonitorCommand::parse("eeprom fill --value=").is_err());
    }

    #[test]
    fn test_version_json() {
        let json: serde_json::Value = serde_json::from_str(&version_json()).unwrap();
        assert_eq!(json["version"], VERSION);
        assert!(json["components"]["major"].is_u64());
        assert!(json["components"]["patch"].is_u64());
    }

    #[test]
    fn test_fill_buffer_repeats_pattern() {
        assert_eq!(fill_buffer(&[0xAA, 0xBB], 5), vec![0xAA, 0xBB, 0xAA, 0xBB, 0xAA]);
    }
}
