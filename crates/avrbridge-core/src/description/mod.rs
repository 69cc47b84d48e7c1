//! Target description files
//!
//! AVR8 targets are described by ATDF XML files. A description file is
//! loaded once per target and provides:
//!
//! - address spaces and memory segments
//! - module register layouts and peripheral instances
//! - property groups (signature, OCD, ISP, PDI and UPDI parameters)
//! - package variants and pinouts
//!
//! The AVR8 specific extraction (target parameters, fuse bits, pads) lives in
//! the `avr8` submodule.
//!
//! ```ignore
//! let tdf = TargetDescriptionFile::find_and_load("/usr/share/atdf", "atmega328p")?;
//! println!("{} ({:?})", tdf.name, tdf.family());
//! ```

mod avr8;
mod parser;
mod types;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use parser::parse;
pub use types::*;

/// Errors that can occur while loading a description file
#[derive(Debug, Error)]
pub enum DescriptionError {
    /// I/O error reading the file
    #[error("failed to read target description file: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed XML
    #[error("failed to parse target description XML: {0}")]
    Xml(#[from] roxmltree::Error),

    /// A required element or attribute is missing
    #[error("missing '{attribute}' in <{element}>")]
    Missing {
        /// Element name
        element: String,
        /// Attribute or child name
        attribute: &'static str,
    },

    /// A value could not be parsed
    #[error("invalid value for '{name}': {value}")]
    InvalidValue {
        /// Attribute or property name
        name: String,
        /// The offending value
        value: String,
    },

    /// A required property is missing
    #[error("missing property '{property}' in property group '{group}'")]
    MissingProperty {
        /// Property group name
        group: &'static str,
        /// Property name
        property: &'static str,
    },

    /// No description file matched the target name
    #[error("no target description file found for '{0}'")]
    NotFound(String),
}

/// A parsed target description file
#[derive(Debug, Clone, Default)]
pub struct TargetDescriptionFile {
    /// Device name as written in the file (e.g. "ATmega328P")
    pub name: String,
    /// Architecture (e.g. "AVR8")
    pub architecture: Option<String>,
    /// Family name as written in the file (e.g. "megaAVR")
    pub family_name: Option<String>,
    /// Address spaces keyed by lowercase id
    pub address_spaces: BTreeMap<String, AddressSpace>,
    /// Module definitions keyed by lowercase name
    pub modules: BTreeMap<String, Module>,
    /// Peripheral modules keyed by lowercase name
    pub peripheral_modules: BTreeMap<String, PeripheralModule>,
    /// Property groups keyed by lowercase name
    pub property_groups: BTreeMap<String, PropertyGroup>,
    /// Supported interfaces
    pub interfaces: Vec<Interface>,
    /// Package variants
    pub variants: Vec<Variant>,
    /// Pinouts keyed by lowercase name
    pub pinouts: BTreeMap<String, Pinout>,
}

impl TargetDescriptionFile {
    /// Load and parse a description file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DescriptionError> {
        let path = path.as_ref();
        log::debug!("Loading target description file {}", path.display());
        let text = fs::read_to_string(path)?;
        parse(&text)
    }

    /// Resolve a description file path for a target
    ///
    /// `location` may be a file, which is used as is, or a directory that is
    /// searched for `<target>.atdf` (case-insensitive).
    pub fn resolve_path(location: &Path, target_name: &str) -> Result<PathBuf, DescriptionError> {
        if location.is_file() {
            return Ok(location.to_path_buf());
        }

        let wanted = format!("{}.atdf", target_name.to_ascii_lowercase());
        for entry in fs::read_dir(location)? {
            let path = entry?.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.to_ascii_lowercase() == wanted);
            if matches && path.is_file() {
                return Ok(path);
            }
        }

        Err(DescriptionError::NotFound(target_name.to_string()))
    }

    /// Resolve and load the description file for a target
    pub fn find_and_load(location: &Path, target_name: &str) -> Result<Self, DescriptionError> {
        let path = Self::resolve_path(location, target_name)?;
        let tdf = Self::load(&path)?;

        if !tdf.name.eq_ignore_ascii_case(target_name) {
            log::warn!(
                "Target description file {} describes {}, not {}",
                path.display(),
                tdf.name,
                target_name
            );
        }

        Ok(tdf)
    }

    /// Look up a property value
    pub fn property(&self, group: &str, name: &str) -> Option<&str> {
        self.property_groups
            .get(group)
            .and_then(|g| g.properties.get(name))
            .map(String::as_str)
    }

    /// Look up a property and parse it as a hex or decimal number
    pub fn property_number(&self, group: &str, name: &str) -> Option<u32> {
        self.property(group, name).and_then(parser::parse_number)
    }

    /// Look up a property and parse it as hex
    pub fn property_hex(&self, group: &str, name: &str) -> Option<u32> {
        self.property(group, name).and_then(parser::parse_hex)
    }

    /// Look up an address space by id
    pub fn address_space(&self, id: &str) -> Option<&AddressSpace> {
        self.address_spaces.get(id)
    }

    /// Look up a module register group
    pub fn module_register_group(&self, module: &str, group: &str) -> Option<&RegisterGroup> {
        self.modules
            .get(module)
            .and_then(|m| m.register_groups.get(group))
    }

    /// Look up the offset of a peripheral instance register group
    pub fn peripheral_register_group_offset(
        &self,
        module: &str,
        instance: &str,
        group: &str,
    ) -> Option<u32> {
        self.peripheral_modules
            .get(module)
            .and_then(|m| m.instances.get(instance))
            .and_then(|i| i.register_groups.get(group))
            .and_then(|g| g.offset)
    }
}
