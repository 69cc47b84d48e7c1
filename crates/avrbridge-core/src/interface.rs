//! Debug tool trait definitions
//!
//! A debug tool exposes up to three interfaces:
//! - [`Avr8DebugInterface`] for debug sessions (mandatory)
//! - [`AvrIspInterface`] for fuse access over ISP (optional)
//! - [`TargetPowerManagement`] for switching target power (optional)
//!
//! All methods are blocking. Implementations are driven from a single thread,
//! so they take `&mut self` and keep their own session state.

use crate::error::Result;
use crate::memory::{MemoryAddressRange, MemoryType};
use crate::register::{Register, RegisterDescriptors};
use crate::target::{
    BreakCause, Family, Fuse, FuseType, IspParameters, PhysicalInterface, TargetParameters,
    TargetSignature, TargetState,
};

/// Session options for an AVR8 debug interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Avr8SessionConfig {
    /// Physical interface selected by the user
    pub physical_interface: PhysicalInterface,
    /// Target family, if known
    pub family: Option<Family>,
    /// Disable debugWire (and restore ISP) when the session ends
    pub disable_debug_wire_on_deactivate: bool,
    /// Reactivate a megaAVR JTAG target after leaving programming mode
    pub reactivate_jtag_target_post_programming_mode: bool,
    /// Snapshot and restore EEPROM around chip erase
    pub preserve_eeprom: bool,
    /// Override for the maximum number of bytes in a single memory access
    pub max_memory_access_size: Option<u32>,
}

impl Avr8SessionConfig {
    /// Options with every optional behaviour at its default
    pub fn new(physical_interface: PhysicalInterface, family: Option<Family>) -> Self {
        Self {
            physical_interface,
            family,
            disable_debug_wire_on_deactivate: false,
            reactivate_jtag_target_post_programming_mode: false,
            preserve_eeprom: true,
            max_memory_access_size: None,
        }
    }
}

/// AVR8 debug interface
///
/// The interface moves through three states: not activated, physical
/// interface active, and attached. Memory and execution control require the
/// attached state.
pub trait Avr8DebugInterface: Send {
    /// Apply session options. Must be called before `set_target_parameters`.
    fn configure(&mut self, config: &Avr8SessionConfig) -> Result<()>;

    /// Validate and push per-target parameters to the tool
    ///
    /// Resolves the config variant from the configured family and physical
    /// interface. A parameter required by that variant being absent is fatal.
    fn set_target_parameters(&mut self, parameters: &TargetParameters) -> Result<()>;

    /// Push session-wide settings (variant, function, physical interface)
    fn init(&mut self) -> Result<()>;

    /// Activate the physical interface and attach to the target
    fn activate(&mut self) -> Result<()>;

    /// Detach from the target and deactivate the physical interface
    fn deactivate(&mut self) -> Result<()>;

    /// Read the device signature over the debug interface
    fn device_id(&mut self) -> Result<TargetSignature>;

    /// Halt execution
    fn stop(&mut self) -> Result<()>;

    /// Resume execution
    fn run(&mut self) -> Result<()>;

    /// Resume execution until `address` (byte address) is reached
    fn run_to(&mut self, address: u32) -> Result<()>;

    /// Execute a single instruction
    fn step(&mut self) -> Result<()>;

    /// Reset the target, leaving it stopped
    fn reset(&mut self) -> Result<()>;

    /// Current execution state
    ///
    /// Only consults the tool while the target is not known to be stopped.
    fn target_state(&mut self) -> Result<TargetState>;

    /// Cause of the most recent stop
    fn break_cause(&self) -> BreakCause;

    /// Read the program counter as a byte address
    fn program_counter(&mut self) -> Result<u32>;

    /// Set the program counter from a byte address
    fn set_program_counter(&mut self, address: u32) -> Result<()>;

    /// Insert a software breakpoint at a byte address
    fn set_breakpoint(&mut self, address: u32) -> Result<()>;

    /// Remove a software breakpoint at a byte address
    fn clear_breakpoint(&mut self, address: u32) -> Result<()>;

    /// Remove every software breakpoint
    fn clear_all_breakpoints(&mut self) -> Result<()>;

    /// Read a batch of registers
    ///
    /// Values are returned most significant byte first, in descriptor order.
    fn read_registers(&mut self, descriptors: &RegisterDescriptors) -> Result<Vec<Register>>;

    /// Write a batch of registers (values most significant byte first)
    fn write_registers(&mut self, registers: &[Register]) -> Result<()>;

    /// Read memory, substituting `0x00` for any address in `excluded_ranges`
    fn read_memory(
        &mut self,
        memory_type: MemoryType,
        start: u32,
        bytes: u32,
        excluded_ranges: &[MemoryAddressRange],
    ) -> Result<Vec<u8>>;

    /// Write memory
    fn write_memory(&mut self, memory_type: MemoryType, start: u32, data: &[u8]) -> Result<()>;

    /// Erase program memory using the method appropriate to the variant
    fn erase_program_memory(&mut self) -> Result<()>;

    /// Read the lock bit byte (requires programming mode)
    fn read_lock_bit_byte(&mut self) -> Result<u8>;

    /// Enter programming mode. Idempotent.
    fn enable_programming_mode(&mut self) -> Result<()>;

    /// Leave programming mode. Idempotent.
    fn disable_programming_mode(&mut self) -> Result<()>;

    /// Whether programming mode is currently enabled
    fn programming_mode_enabled(&self) -> bool;
}

/// In-system programming interface, used for fuse access
pub trait AvrIspInterface: Send {
    /// Set the programming mode timing parameters
    fn set_isp_parameters(&mut self, parameters: &IspParameters);

    /// Enter ISP programming mode
    fn activate(&mut self) -> Result<()>;

    /// Leave ISP programming mode
    fn deactivate(&mut self) -> Result<()>;

    /// Read the device signature
    fn device_signature(&mut self) -> Result<TargetSignature>;

    /// Read a fuse byte
    fn read_fuse(&mut self, fuse_type: FuseType) -> Result<Fuse>;

    /// Read the lock bit byte
    fn read_lock_bit_byte(&mut self) -> Result<u8>;

    /// Program a fuse byte
    fn program_fuse(&mut self, fuse: Fuse) -> Result<()>;
}

/// Target power control
pub trait TargetPowerManagement: Send {
    /// Switch target power on
    fn enable_target_power(&mut self) -> Result<()>;

    /// Switch target power off
    fn disable_target_power(&mut self) -> Result<()>;
}

/// A debug tool connected to one target
pub trait DebugTool: Send {
    /// Human readable tool name
    fn name(&self) -> &str;

    /// Serial number reported by the tool
    fn serial_number(&self) -> Option<String>;

    /// Start a session with the tool
    fn init(&mut self) -> Result<()>;

    /// End the session with the tool
    fn close(&mut self) -> Result<()>;

    /// The AVR8 debug interface
    fn avr8_debug_interface(&mut self) -> &mut dyn Avr8DebugInterface;

    /// The ISP interface, if the tool has one
    fn avr_isp_interface(&mut self) -> Option<&mut dyn AvrIspInterface> {
        None
    }

    /// Target power control, if the tool has it
    fn target_power_management(&mut self) -> Option<&mut dyn TargetPowerManagement> {
        None
    }
}
