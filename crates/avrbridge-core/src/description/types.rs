//! Target description file data structures
//!
//! These mirror the ATDF element tree. All map keys are lowercase so that
//! lookups are case-insensitive.

use std::collections::BTreeMap;

/// A memory segment within an address space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySegment {
    /// Segment name, lowercase (e.g. "iram", "boot_section_1")
    pub name: String,
    /// Segment type, lowercase (e.g. "ram", "flash", "io", "regs")
    pub segment_type: String,
    /// Start address
    pub start: u32,
    /// Size in bytes
    pub size: u32,
    /// Page size, for paged segments
    pub page_size: Option<u32>,
}

/// An address space and its segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpace {
    /// Address space id, lowercase (e.g. "prog", "data", "eeprom")
    pub id: String,
    /// Start address
    pub start: u32,
    /// Size in bytes
    pub size: u32,
    /// Segments in document order
    pub segments: Vec<MemorySegment>,
}

impl AddressSpace {
    /// All segments of a given type
    pub fn segments_of_type<'a>(
        &'a self,
        segment_type: &'a str,
    ) -> impl Iterator<Item = &'a MemorySegment> + 'a {
        self.segments
            .iter()
            .filter(move |s| s.segment_type == segment_type)
    }

    /// The first segment of a given type
    pub fn first_segment_of_type(&self, segment_type: &str) -> Option<&MemorySegment> {
        self.segments.iter().find(|s| s.segment_type == segment_type)
    }

    /// A segment of a given type, looked up by name
    pub fn segment(&self, segment_type: &str, name: &str) -> Option<&MemorySegment> {
        self.segments
            .iter()
            .find(|s| s.segment_type == segment_type && s.name == name)
    }
}

/// A named property group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyGroup {
    /// Group name, lowercase
    pub name: String,
    /// Property values keyed by lowercase property name
    pub properties: BTreeMap<String, String>,
}

/// A bit field within a register
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitField {
    /// Bit field name, lowercase
    pub name: String,
    /// Caption
    pub caption: Option<String>,
    /// Bit mask within the register
    pub mask: u32,
}

/// A register within a module register group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    /// Register name, lowercase
    pub name: String,
    /// Caption
    pub caption: Option<String>,
    /// Offset within the register group
    pub offset: u32,
    /// Size in bytes
    pub size: u32,
    /// OCD access string (e.g. "RW", "R")
    pub access: Option<String>,
    /// Bit fields keyed by lowercase name
    pub bit_fields: BTreeMap<String, BitField>,
}

impl Register {
    /// Whether the register may be read
    pub fn readable(&self) -> bool {
        self.access
            .as_deref()
            .map_or(true, |a| a.to_ascii_lowercase().contains('r'))
    }

    /// Whether the register may be written
    pub fn writable(&self) -> bool {
        self.access
            .as_deref()
            .map_or(true, |a| a.to_ascii_lowercase().contains('w'))
    }
}

/// A register group, either a module definition or a peripheral instance reference
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterGroup {
    /// Group name, lowercase
    pub name: String,
    /// Name of the module register group this instance refers to
    pub name_in_module: Option<String>,
    /// Caption
    pub caption: Option<String>,
    /// Offset applied to register offsets
    pub offset: Option<u32>,
    /// Address space the registers live in
    pub address_space_id: Option<String>,
    /// Registers keyed by lowercase name
    pub registers: BTreeMap<String, Register>,
}

/// A module definition (register layout, no addresses)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    /// Module name, lowercase
    pub name: String,
    /// Caption
    pub caption: Option<String>,
    /// Register groups keyed by lowercase name
    pub register_groups: BTreeMap<String, RegisterGroup>,
}

/// A signal routed from a peripheral instance to a pad
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    /// Pad name, lowercase
    pub pad_name: String,
    /// Index of the signal (bit number for ports)
    pub index: Option<u32>,
    /// Function name
    pub function: Option<String>,
    /// Signal group
    pub group: Option<String>,
}

/// An instance of a peripheral module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInstance {
    /// Instance name, lowercase
    pub name: String,
    /// Caption
    pub caption: Option<String>,
    /// Register groups keyed by lowercase name
    pub register_groups: BTreeMap<String, RegisterGroup>,
    /// Signals of the instance
    pub signals: Vec<Signal>,
}

/// A peripheral module and its instances
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeripheralModule {
    /// Module name, lowercase
    pub name: String,
    /// Instances keyed by lowercase name
    pub instances: BTreeMap<String, ModuleInstance>,
}

impl PeripheralModule {
    /// Find an instance register group by name across all instances
    pub fn register_group(&self, name: &str) -> Option<&RegisterGroup> {
        self.instances
            .values()
            .find_map(|instance| instance.register_groups.get(name))
    }
}

/// A package variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    /// Order code
    pub ordercode: String,
    /// Package name
    pub package: String,
    /// Pinout name, lowercase
    pub pinout: Option<String>,
    /// Variant is marked as disabled
    pub disabled: bool,
}

/// A package pin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
    /// Position on the package
    pub position: u16,
    /// Pad name, lowercase
    pub pad: String,
}

/// A named pinout
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pinout {
    /// Pinout name, lowercase
    pub name: String,
    /// Pins in document order
    pub pins: Vec<Pin>,
}

/// A debug or programming interface listed in the description file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    /// Interface name
    pub name: String,
    /// Interface type, lowercase (e.g. "dw", "jtag", "isp")
    pub interface_type: Option<String>,
}
