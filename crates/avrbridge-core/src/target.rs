//! AVR8 target types
//!
//! Everything here is plain data. Family specific behaviour is expressed as
//! pure functions over these types (see [`resolve_config_variant`]) rather
//! than as a type hierarchy.

use std::collections::BTreeMap;
use std::fmt;

use crate::memory::{MemoryDescriptor, MemoryType};
use crate::register::RegisterDescriptors;

/// AVR8 device family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// megaAVR
    Mega,
    /// tinyAVR
    Tiny,
    /// AVR XMEGA
    XMega,
    /// AVR DA
    Da,
    /// AVR DB
    Db,
    /// AVR DD
    Dd,
    /// AVR EA
    Ea,
}

impl Family {
    /// Resolve a family from the name used in description files
    pub fn from_description_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "megaavr" | "avr mega" => Some(Self::Mega),
            "tinyavr" | "avr tiny" => Some(Self::Tiny),
            "avr xmega" | "xmega" => Some(Self::XMega),
            "avr da" => Some(Self::Da),
            "avr db" => Some(Self::Db),
            "avr dd" => Some(Self::Dd),
            "avr ea" => Some(Self::Ea),
            _ => None,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mega => "megaAVR",
            Self::Tiny => "tinyAVR",
            Self::XMega => "AVR XMEGA",
            Self::Da => "AVR DA",
            Self::Db => "AVR DB",
            Self::Dd => "AVR DD",
            Self::Ea => "AVR EA",
        };
        f.write_str(name)
    }
}

/// Physical debug interface between the tool and the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhysicalInterface {
    /// debugWire (single wire over RESET)
    DebugWire,
    /// JTAG
    Jtag,
    /// Program and Debug Interface (XMEGA)
    Pdi,
    /// Unified Program and Debug Interface
    Updi,
}

impl PhysicalInterface {
    /// Resolve an interface from the `type` attribute used in description files
    pub fn from_description_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "debugwire" | "dw" => Some(Self::DebugWire),
            "jtag" => Some(Self::Jtag),
            "pdi" => Some(Self::Pdi),
            "updi" => Some(Self::Updi),
            _ => None,
        }
    }
}

impl fmt::Display for PhysicalInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DebugWire => "debugWire",
            Self::Jtag => "JTAG",
            Self::Pdi => "PDI",
            Self::Updi => "UPDI",
        };
        f.write_str(name)
    }
}

/// Debug protocol variant used by the tool for a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Avr8ConfigVariant {
    /// debugWire on megaAVR and tinyAVR
    DebugWire,
    /// JTAG on megaAVR
    MegaJtag,
    /// JTAG or PDI on XMEGA
    XMega,
    /// UPDI on any family
    Updi,
}

/// Resolve the config variant for a family and physical interface pair
///
/// Without a known family, JTAG cannot be resolved because it is used by both
/// megaAVR and XMEGA targets with different protocols.
pub fn resolve_config_variant(
    family: Option<Family>,
    interface: PhysicalInterface,
) -> Option<Avr8ConfigVariant> {
    use Avr8ConfigVariant as V;
    use PhysicalInterface as P;

    match family {
        Some(Family::Mega) | Some(Family::Tiny) => match interface {
            P::Jtag => Some(V::MegaJtag),
            P::DebugWire => Some(V::DebugWire),
            P::Updi => Some(V::Updi),
            P::Pdi => None,
        },
        Some(Family::XMega) => match interface {
            P::Jtag | P::Pdi => Some(V::XMega),
            _ => None,
        },
        Some(Family::Da) | Some(Family::Db) | Some(Family::Dd) | Some(Family::Ea) => {
            match interface {
                P::Updi => Some(V::Updi),
                _ => None,
            }
        }
        None => match interface {
            P::DebugWire => Some(V::DebugWire),
            P::Pdi => Some(V::XMega),
            P::Updi => Some(V::Updi),
            P::Jtag => None,
        },
    }
}

/// Execution state of the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetState {
    /// Not yet known (before activation)
    #[default]
    Unknown,
    /// Executing code
    Running,
    /// Halted
    Stopped,
}

/// Three byte AVR device signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TargetSignature(pub [u8; 3]);

impl TargetSignature {
    /// Create a signature from its three bytes
    pub fn new(byte0: u8, byte1: u8, byte2: u8) -> Self {
        Self([byte0, byte1, byte2])
    }
}

impl fmt::Display for TargetSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}{:02X}{:02X}", self.0[0], self.0[1], self.0[2])
    }
}

/// Fuse byte selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FuseType {
    /// Low fuse byte
    Low,
    /// High fuse byte
    High,
    /// Extended fuse byte
    Extended,
}

impl FuseType {
    /// Resolve a fuse type from the register name used in description files
    pub fn from_register_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "high" => Some(Self::High),
            "extended" => Some(Self::Extended),
            _ => None,
        }
    }
}

/// Location of a single fuse bit (or bit field)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuseBitsDescriptor {
    /// Address of the fuse byte in the tool's FUSES memory
    pub byte_address: u32,
    /// Which fuse byte holds the bit
    pub fuse_type: FuseType,
    /// Mask of the bit within the byte
    pub bit_mask: u8,
}

/// A fuse byte value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fuse {
    /// Which fuse byte
    pub fuse_type: FuseType,
    /// Byte value
    pub value: u8,
}

/// Programmed fuse bits read as zero, so enabling a feature clears its bit
pub fn apply_fuse_bit(value: u8, bit_mask: u8, enable: bool) -> u8 {
    if enable {
        value & !bit_mask
    } else {
        value | bit_mask
    }
}

/// Whether the feature controlled by a fuse bit is enabled
pub fn fuse_bit_enabled(value: u8, bit_mask: u8) -> bool {
    value & bit_mask == 0
}

/// Timing and polling parameters for AVRISP programming mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IspParameters {
    /// Programming mode entry timeout
    pub program_mode_timeout: u8,
    /// Stabilisation delay
    pub program_mode_stabilization_delay: u8,
    /// Command execution delay
    pub program_mode_command_execution_delay: u8,
    /// Synchronisation loop count
    pub program_mode_sync_loops: u8,
    /// Byte delay
    pub program_mode_byte_delay: u8,
    /// Poll value
    pub program_mode_poll_value: u8,
    /// Poll index
    pub program_mode_poll_index: u8,
    /// Delay before leaving programming mode
    pub program_mode_pre_delay: u8,
    /// Delay after leaving programming mode
    pub program_mode_post_delay: u8,
    /// Poll index for signature reads
    pub read_signature_poll_index: u8,
    /// Poll index for fuse reads
    pub read_fuse_poll_index: u8,
    /// Poll index for lock bit reads
    pub read_lock_poll_index: u8,
}

/// Per-target constants extracted from the description file
///
/// Which fields are required depends on the config variant. Missing required
/// fields are reported when the parameters are handed to a debug interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct TargetParameters {
    pub family: Option<Family>,

    pub flash_start_address: Option<u32>,
    pub flash_size: Option<u32>,
    pub flash_page_size: Option<u32>,
    pub app_section_start_address: Option<u32>,
    pub app_section_size: Option<u32>,
    pub boot_section_start_address: Option<u32>,
    pub boot_section_size: Option<u32>,

    pub ram_start_address: Option<u32>,
    pub ram_size: Option<u32>,
    pub gp_register_start_address: Option<u32>,
    pub gp_register_size: Option<u32>,
    pub mapped_io_segment_start_address: Option<u32>,
    pub mapped_io_segment_size: Option<u32>,

    pub eeprom_start_address: Option<u32>,
    pub eeprom_size: Option<u32>,
    pub eeprom_page_size: Option<u32>,

    pub stack_pointer_register_low_address: Option<u32>,
    pub stack_pointer_register_size: Option<u32>,
    pub status_register_start_address: Option<u32>,
    pub status_register_size: Option<u32>,

    // debugWire and JTAG
    pub ocd_revision: Option<u32>,
    pub ocd_data_register: Option<u32>,
    pub spmc_register_start_address: Option<u32>,
    pub osccal_address: Option<u32>,
    pub eeprom_address_register_low: Option<u32>,
    pub eeprom_address_register_high: Option<u32>,
    pub eeprom_control_register_address: Option<u32>,
    pub eeprom_data_register_address: Option<u32>,

    // PDI
    pub app_section_pdi_offset: Option<u32>,
    pub boot_section_pdi_offset: Option<u32>,
    pub eeprom_pdi_offset: Option<u32>,
    pub fuse_registers_pdi_offset: Option<u32>,
    pub lock_registers_pdi_offset: Option<u32>,
    pub user_signatures_pdi_offset: Option<u32>,
    pub product_signatures_pdi_offset: Option<u32>,
    pub ram_pdi_offset: Option<u32>,
    pub nvm_module_base_address: Option<u32>,
    pub mcu_module_base_address: Option<u32>,

    // UPDI
    pub ocd_module_address: Option<u32>,
    pub program_memory_updi_start_address: Option<u32>,
    pub signature_segment_start_address: Option<u32>,
    pub signature_segment_size: Option<u32>,
    pub fuse_segment_start_address: Option<u32>,
    pub fuse_segment_size: Option<u32>,
    pub lockbits_segment_start_address: Option<u32>,
}

/// Why execution stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakCause {
    /// A program breakpoint was hit
    Breakpoint,
    /// Anything else (stop request, step completion, reset)
    Unknown,
}

/// Direction of a GPIO pad
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDirection {
    /// Pad is an input
    Input,
    /// Pad is an output
    Output,
}

/// Level of a GPIO pad
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoState {
    /// Logic high
    High,
    /// Logic low
    Low,
}

/// State of one target pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PinState {
    /// Direction, if known
    pub io_direction: Option<IoDirection>,
    /// Level, if known
    pub io_state: Option<IoState>,
}

/// A GPIO pad and the registers that control it
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PadDescriptor {
    /// Pad name (e.g. "pb5")
    pub name: String,
    /// Bit number of the pad within its port
    pub gpio_pin_number: Option<u8>,
    /// Address of the data direction register
    pub ddr_address: Option<u32>,
    /// Address of the output register
    pub port_address: Option<u32>,
    /// Address of the input register
    pub pin_address: Option<u32>,
}

impl PadDescriptor {
    /// Whether the pad can be read and driven through port registers
    pub fn is_gpio(&self) -> bool {
        self.gpio_pin_number.is_some()
            && self.ddr_address.is_some()
            && self.port_address.is_some()
            && self.pin_address.is_some()
    }
}

/// A physical package pin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinDescriptor {
    /// Pin number on the package
    pub number: u16,
    /// Name of the pad connected to the pin
    pub pad_name: String,
}

/// A package variant of the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetVariant {
    /// Index of the variant
    pub id: usize,
    /// Order code
    pub name: String,
    /// Package name
    pub package_name: String,
    /// Pins keyed by number
    pub pin_descriptors: BTreeMap<u16, PinDescriptor>,
}

/// Complete description of a target, as presented to debug clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    /// Target name (e.g. "atmega328p")
    pub name: String,
    /// Device signature
    pub signature: TargetSignature,
    /// Device family, if known
    pub family: Option<Family>,
    /// Memory regions keyed by type
    pub memory_descriptors: BTreeMap<MemoryType, MemoryDescriptor>,
    /// All register descriptors
    pub register_descriptors: RegisterDescriptors,
    /// Pads keyed by name
    pub pad_descriptors: BTreeMap<String, PadDescriptor>,
    /// Package variants
    pub variants: Vec<TargetVariant>,
}

impl TargetDescriptor {
    /// Look up the memory descriptor for a memory type
    pub fn memory(&self, memory_type: MemoryType) -> Option<&MemoryDescriptor> {
        self.memory_descriptors.get(&memory_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_config_variant() {
        use Avr8ConfigVariant as V;
        use PhysicalInterface as P;

        assert_eq!(resolve_config_variant(Some(Family::Mega), P::Jtag), Some(V::MegaJtag));
        assert_eq!(resolve_config_variant(Some(Family::Tiny), P::DebugWire), Some(V::DebugWire));
        assert_eq!(resolve_config_variant(Some(Family::Mega), P::Updi), Some(V::Updi));
        assert_eq!(resolve_config_variant(Some(Family::XMega), P::Jtag), Some(V::XMega));
        assert_eq!(resolve_config_variant(Some(Family::XMega), P::Pdi), Some(V::XMega));
        assert_eq!(resolve_config_variant(Some(Family::Db), P::Updi), Some(V::Updi));
        assert_eq!(resolve_config_variant(Some(Family::Db), P::Jtag), None);
        assert_eq!(resolve_config_variant(None, P::DebugWire), Some(V::DebugWire));
        assert_eq!(resolve_config_variant(None, P::Jtag), None);
    }

    #[test]
    fn test_family_from_description_name() {
        assert_eq!(Family::from_description_name("megaAVR"), Some(Family::Mega));
        assert_eq!(Family::from_description_name("AVR XMEGA"), Some(Family::XMega));
        assert_eq!(Family::from_description_name("AVR DA"), Some(Family::Da));
        assert_eq!(Family::from_description_name("ARM"), None);
    }

    #[test]
    fn test_fuse_bit_polarity() {
        // DWEN on the ATmega328P high fuse
        let mask = 0x40;
        let unprogrammed = 0xD9;
        assert!(!fuse_bit_enabled(unprogrammed, mask));

        let programmed = apply_fuse_bit(unprogrammed, mask, true);
        assert_eq!(programmed, 0x99);
        assert!(fuse_bit_enabled(programmed, mask));
        assert_eq!(apply_fuse_bit(programmed, mask, false), unprogrammed);
    }

    #[test]
    fn test_signature_display() {
        assert_eq!(TargetSignature::new(0x1E, 0x95, 0x0F).to_string(), "0x1E950F");
    }
}
