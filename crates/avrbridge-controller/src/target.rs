//! AVR8 target
//!
//! [`Avr8Target`] drives one debug tool for one target. It owns the session
//! lifecycle (activation, signature check, fuse management and release) and
//! turns the target description into the descriptors the rest of the system
//! works with.
//!
//! The debugWire and OCDEN fuse procedures share one implementation. Only
//! the way fuses are reached differs: over ISP for DWEN, and through the
//! debug interface's programming mode for OCDEN.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use avrbridge_core::description::TargetDescriptionFile;
use avrbridge_core::error::FuseFailure;
use avrbridge_core::interface::{Avr8DebugInterface, Avr8SessionConfig, AvrIspInterface, DebugTool};
use avrbridge_core::memory::{MemoryAccess, MemoryAddressRange, MemoryDescriptor, MemoryType};
use avrbridge_core::register::{Register, RegisterDescriptor, RegisterDescriptors, RegisterType};
use avrbridge_core::target::{
    apply_fuse_bit, fuse_bit_enabled, BreakCause, Fuse, FuseBitsDescriptor, IoDirection, IoState,
    PhysicalInterface, PinDescriptor, PinState, TargetDescriptor, TargetParameters,
    TargetSignature, TargetState,
};
use avrbridge_core::Error;

use crate::error::{ControllerError, Result};

/// Session and fuse handling options for a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    /// Physical interface to debug over
    pub physical_interface: PhysicalInterface,
    /// Program DWEN over ISP when debugWire activation fails
    pub manage_dwen_fuse_bit: bool,
    /// Cycle target power after programming DWEN, if the tool can
    pub cycle_target_power_post_dwen_update: bool,
    /// Time to hold power off, and to wait after power-up
    pub target_power_cycle_delay: Duration,
    /// Temporarily disable debugWire when the session ends
    pub disable_debug_wire_on_deactivate: bool,
    /// Program OCDEN on activation and clear it on deactivation (JTAG only)
    pub manage_ocden_fuse_bit: bool,
    /// Keep EEPROM contents across chip erase
    pub preserve_eeprom: bool,
    /// Reactivate a megaAVR JTAG target after leaving programming mode
    pub reactivate_jtag_target_post_programming_mode: bool,
    /// Override for the tool's maximum memory access size
    pub max_memory_access_size: Option<u32>,
}

impl TargetConfig {
    /// Options with every fuse and session behaviour at its default
    pub fn new(physical_interface: PhysicalInterface) -> Self {
        Self {
            physical_interface,
            manage_dwen_fuse_bit: false,
            cycle_target_power_post_dwen_update: true,
            target_power_cycle_delay: Duration::from_millis(250),
            disable_debug_wire_on_deactivate: false,
            manage_ocden_fuse_bit: false,
            preserve_eeprom: true,
            reactivate_jtag_target_post_programming_mode: false,
            max_memory_access_size: None,
        }
    }

    fn manages_ocden(&self) -> bool {
        self.manage_ocden_fuse_bit && self.physical_interface == PhysicalInterface::Jtag
    }
}

/// A fuse bit together with the name used in diagnostics
#[derive(Debug, Clone, Copy)]
struct FuseBit {
    name: &'static str,
    bits: FuseBitsDescriptor,
}

impl FuseBit {
    fn lookup(
        name: &'static str,
        descriptor: Option<FuseBitsDescriptor>,
    ) -> avrbridge_core::Result<Self> {
        let bits = descriptor.ok_or(FuseFailure::MissingBitField(name))?;
        Ok(Self { name, bits })
    }
}

/// The operations a fuse update needs, independent of how fuses are reached
trait FuseAccess {
    fn signature(&mut self) -> avrbridge_core::Result<TargetSignature>;
    fn read_fuse(&mut self, bits: &FuseBitsDescriptor) -> avrbridge_core::Result<u8>;
    fn read_lock_bits(&mut self) -> avrbridge_core::Result<u8>;
    fn write_fuse(&mut self, bits: &FuseBitsDescriptor, value: u8) -> avrbridge_core::Result<()>;
}

struct IspFuses<'a>(&'a mut dyn AvrIspInterface);

impl FuseAccess for IspFuses<'_> {
    fn signature(&mut self) -> avrbridge_core::Result<TargetSignature> {
        self.0.device_signature()
    }

    fn read_fuse(&mut self, bits: &FuseBitsDescriptor) -> avrbridge_core::Result<u8> {
        Ok(self.0.read_fuse(bits.fuse_type)?.value)
    }

    fn read_lock_bits(&mut self) -> avrbridge_core::Result<u8> {
        self.0.read_lock_bit_byte()
    }

    fn write_fuse(&mut self, bits: &FuseBitsDescriptor, value: u8) -> avrbridge_core::Result<()> {
        self.0.program_fuse(Fuse {
            fuse_type: bits.fuse_type,
            value,
        })
    }
}

/// Fuse access through programming mode of the debug interface
struct OcdFuses<'a>(&'a mut dyn Avr8DebugInterface);

impl FuseAccess for OcdFuses<'_> {
    fn signature(&mut self) -> avrbridge_core::Result<TargetSignature> {
        self.0.device_id()
    }

    fn read_fuse(&mut self, bits: &FuseBitsDescriptor) -> avrbridge_core::Result<u8> {
        let data = self
            .0
            .read_memory(MemoryType::Fuses, bits.byte_address, 1, &[])?;
        data.first().copied().ok_or(Error::UnexpectedByteCount {
            expected: 1,
            actual: 0,
        })
    }

    fn read_lock_bits(&mut self) -> avrbridge_core::Result<u8> {
        self.0.read_lock_bit_byte()
    }

    fn write_fuse(&mut self, bits: &FuseBitsDescriptor, value: u8) -> avrbridge_core::Result<()> {
        self.0
            .write_memory(MemoryType::Fuses, bits.byte_address, &[value])
    }
}

/// Set or clear a fuse bit
///
/// Any inconsistency aborts the update before the fuse is written: a
/// signature mismatch, a guard bit (SPIEN or JTAGEN) that reads as
/// unprogrammed on a live connection, or any lock bit being set.
fn update_fuse_bit(
    access: &mut dyn FuseAccess,
    expected_signature: TargetSignature,
    guard: FuseBit,
    target: FuseBit,
    enable: bool,
) -> avrbridge_core::Result<()> {
    let actual = access.signature()?;
    if actual != expected_signature {
        return Err(Error::SignatureMismatch {
            expected: expected_signature,
            actual,
        });
    }

    let guard_value = access.read_fuse(&guard.bits)?;
    if !fuse_bit_enabled(guard_value, guard.bits.bit_mask) {
        // We are talking to the target through the interface this bit
        // enables, so the description must be wrong
        return Err(FuseFailure::UntrustedDescription(guard.name).into());
    }

    let lock_bits = access.read_lock_bits()?;
    if lock_bits != 0xFF {
        return Err(FuseFailure::LockBitsSet { value: lock_bits }.into());
    }

    let current = access.read_fuse(&target.bits)?;
    if fuse_bit_enabled(current, target.bits.bit_mask) == enable {
        log::info!(
            "{} fuse bit already {}",
            target.name,
            if enable { "programmed" } else { "cleared" }
        );
        return Ok(());
    }

    let value = apply_fuse_bit(current, target.bits.bit_mask, enable);
    log::warn!(
        "{} {} fuse bit ({:?} fuse 0x{:02X} -> 0x{:02X})",
        if enable { "Programming" } else { "Clearing" },
        target.name,
        target.bits.fuse_type,
        current,
        value
    );
    access.write_fuse(&target.bits, value)?;

    let found = access.read_fuse(&target.bits)?;
    if found != value {
        return Err(FuseFailure::VerifyFailed {
            expected: value,
            found,
        }
        .into());
    }

    log::info!("{} fuse bit updated", target.name);
    Ok(())
}

fn required(value: Option<u32>, name: &'static str) -> avrbridge_core::Result<u32> {
    value.ok_or(Error::MissingTargetParameter(name))
}

fn range(start: u32, size: u32) -> avrbridge_core::Result<MemoryAddressRange> {
    MemoryAddressRange::from_start_and_size(start, size)
}

fn build_register_descriptors(
    parameters: &TargetParameters,
) -> avrbridge_core::Result<RegisterDescriptors> {
    let gp_start = required(
        parameters.gp_register_start_address,
        "general purpose register start address",
    )?;
    let sp_address = required(
        parameters.stack_pointer_register_low_address,
        "stack pointer register address",
    )?;
    let sp_size = required(parameters.stack_pointer_register_size, "stack pointer register size")?;
    let sreg_address = required(
        parameters.status_register_start_address,
        "status register address",
    )?;
    let sreg_size = required(parameters.status_register_size, "status register size")?;

    let mut descriptors: RegisterDescriptors = (0..32)
        .map(|i| {
            RegisterDescriptor::new(RegisterType::GeneralPurpose, Some(gp_start + i), 1)
                .with_name(format!("r{}", i))
                .with_group("general purpose cpu")
        })
        .collect();

    descriptors.insert(
        RegisterDescriptor::new(RegisterType::StackPointer, Some(sp_address), sp_size)
            .with_name("SP")
            .with_group("CPU")
            .with_description("Stack Pointer Register"),
    );
    descriptors.insert(
        RegisterDescriptor::new(RegisterType::Status, Some(sreg_address), sreg_size)
            .with_name("SREG")
            .with_group("CPU")
            .with_description("Status Register"),
    );
    descriptors.insert(
        RegisterDescriptor::new(RegisterType::ProgramCounter, None, 4)
            .with_name("PC")
            .with_group("CPU")
            .with_description("Program Counter"),
    );

    Ok(descriptors)
}

fn build_memory_descriptors(
    parameters: &TargetParameters,
) -> avrbridge_core::Result<BTreeMap<MemoryType, MemoryDescriptor>> {
    let mut memories = BTreeMap::new();

    let ram_start = required(parameters.ram_start_address, "RAM start address")?;
    let ram_size = required(parameters.ram_size, "RAM size")?;
    memories.insert(
        MemoryType::Ram,
        MemoryDescriptor {
            memory_type: MemoryType::Ram,
            address_range: range(ram_start, ram_size)?,
            access: MemoryAccess::all(),
            page_size: None,
        },
    );

    let flash_start = required(parameters.flash_start_address, "flash start address")?;
    let flash_size = required(parameters.flash_size, "flash size")?;
    memories.insert(
        MemoryType::Flash,
        MemoryDescriptor {
            memory_type: MemoryType::Flash,
            address_range: range(flash_start, flash_size)?,
            access: MemoryAccess::READABLE | MemoryAccess::WRITABLE,
            page_size: parameters.flash_page_size,
        },
    );

    if let (Some(start), Some(size)) = (parameters.eeprom_start_address, parameters.eeprom_size) {
        memories.insert(
            MemoryType::Eeprom,
            MemoryDescriptor {
                memory_type: MemoryType::Eeprom,
                address_range: range(start, size)?,
                access: MemoryAccess::all(),
                page_size: parameters.eeprom_page_size,
            },
        );
    }

    Ok(memories)
}

/// Build the descriptor of a target from its description file
pub fn target_descriptor(description: &TargetDescriptionFile) -> Result<TargetDescriptor> {
    let parameters = description.target_parameters();

    let mut register_descriptors = build_register_descriptors(&parameters)?;
    register_descriptors.extend(description.peripheral_register_descriptors());

    Ok(TargetDescriptor {
        name: description.name.clone(),
        signature: description.signature()?,
        family: parameters.family,
        memory_descriptors: build_memory_descriptors(&parameters)?,
        register_descriptors,
        pad_descriptors: description.pad_descriptors(),
        variants: description.target_variants(),
    })
}

/// Read one byte of data space, at most once per address
fn read_cached(
    avr8: &mut dyn Avr8DebugInterface,
    cache: &mut BTreeMap<u32, u8>,
    address: u32,
) -> Result<u8> {
    if let Some(value) = cache.get(&address) {
        return Ok(*value);
    }
    let value = read_byte(avr8, address)?;
    cache.insert(address, value);
    Ok(value)
}

fn read_byte(avr8: &mut dyn Avr8DebugInterface, address: u32) -> Result<u8> {
    let data = avr8.read_memory(MemoryType::Ram, address, 1, &[])?;
    Ok(data.first().copied().ok_or(Error::UnexpectedByteCount {
        expected: 1,
        actual: 0,
    })?)
}

/// Update a single bit of a data space register, writing only on change
fn update_bit(avr8: &mut dyn Avr8DebugInterface, address: u32, bit: u8, set: bool) -> Result<()> {
    let value = read_byte(avr8, address)?;
    let mask = 1u8 << bit;
    if (value & mask != 0) == set {
        return Ok(());
    }
    let updated = if set { value | mask } else { value & !mask };
    avr8.write_memory(MemoryType::Ram, address, &[updated])?;
    Ok(())
}

/// One AVR8 target behind one debug tool
pub struct Avr8Target {
    tool: Box<dyn DebugTool>,
    description: TargetDescriptionFile,
    config: TargetConfig,
    parameters: TargetParameters,
    descriptor: TargetDescriptor,
    stack_pointer: RegisterDescriptor,
    activated: bool,
}

impl Avr8Target {
    /// Bind a tool to a target description
    ///
    /// Nothing is sent to the tool until [`activate`](Self::activate).
    pub fn new(
        mut tool: Box<dyn DebugTool>,
        description: TargetDescriptionFile,
        config: TargetConfig,
    ) -> Result<Self> {
        if !description
            .physical_interfaces()
            .contains(&config.physical_interface)
        {
            return Err(ControllerError::UnsupportedPhysicalInterface {
                target: description.name.clone(),
                interface: config.physical_interface.to_string(),
            });
        }

        if config.manage_dwen_fuse_bit
            && config.physical_interface == PhysicalInterface::DebugWire
            && tool.avr_isp_interface().is_none()
        {
            log::warn!(
                "{} has no ISP interface, the DWEN fuse bit cannot be updated if debugWire activation fails",
                tool.name()
            );
        }
        if config.manage_ocden_fuse_bit && config.physical_interface != PhysicalInterface::Jtag {
            log::warn!("manage-ocden-fuse-bit only applies to JTAG targets and is ignored");
        }

        let descriptor = target_descriptor(&description)?;
        let stack_pointer = descriptor
            .register_descriptors
            .iter()
            .find(|d| d.register_type == RegisterType::StackPointer)
            .cloned()
            .ok_or(Error::MissingTargetParameter("stack pointer register address"))?;

        Ok(Self {
            tool,
            parameters: description.target_parameters(),
            description,
            config,
            descriptor,
            stack_pointer,
            activated: false,
        })
    }

    /// The target's memories, registers, pads and variants
    pub fn descriptor(&self) -> &TargetDescriptor {
        &self.descriptor
    }

    /// Session options
    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    /// Whether a debug session is active
    pub fn is_activated(&self) -> bool {
        self.activated
    }

    fn avr8(&mut self) -> &mut dyn Avr8DebugInterface {
        self.tool.avr8_debug_interface()
    }

    fn session_config(&self) -> Avr8SessionConfig {
        let mut session = Avr8SessionConfig::new(self.config.physical_interface, self.parameters.family);
        session.disable_debug_wire_on_deactivate = self.config.disable_debug_wire_on_deactivate;
        session.reactivate_jtag_target_post_programming_mode =
            self.config.reactivate_jtag_target_post_programming_mode;
        session.preserve_eeprom = self.config.preserve_eeprom;
        session.max_memory_access_size = self.config.max_memory_access_size;
        session
    }

    /// Start a debug session
    ///
    /// Opens the tool session, pushes the target parameters and activates
    /// the debug interface, recovering from a cleared DWEN fuse bit when
    /// configured to. The connected target must match the description's
    /// signature. The target is left reset and stopped.
    pub fn activate(&mut self) -> Result<()> {
        if self.activated {
            return Ok(());
        }

        if let Err(e) = self.try_activate() {
            self.release();
            return Err(e);
        }

        self.activated = true;
        log::info!(
            "Activated {} over {} with {}",
            self.descriptor.name,
            self.config.physical_interface,
            self.tool.name()
        );
        Ok(())
    }

    fn try_activate(&mut self) -> Result<()> {
        self.tool.init()?;

        let session = self.session_config();
        let parameters = self.parameters.clone();
        let avr8 = self.avr8();
        avr8.configure(&session)?;
        avr8.set_target_parameters(&parameters)?;
        avr8.init()?;

        match avr8.activate() {
            Ok(()) => {}
            Err(Error::DebugWirePhysicalInterface { code }) if self.config.manage_dwen_fuse_bit => {
                log::warn!(
                    "Failed to activate the debugWire physical interface (0x{:02X}), \
                     inspecting the DWEN fuse bit over ISP",
                    code
                );
                self.recover_debug_wire()?;
            }
            Err(e @ Error::DebugWirePhysicalInterface { .. }) => {
                log::error!(
                    "Enable manage-dwen-fuse-bit to have the DWEN fuse bit programmed automatically"
                );
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        }

        self.verify_signature()?;

        if self.config.manages_ocden() {
            log::debug!("Managing OCDEN fuse bit");
            self.update_ocden_fuse_bit(true)?;
        }

        self.avr8().reset()?;
        Ok(())
    }

    /// Undo a partial activation, logging failures
    fn release(&mut self) {
        if let Err(e) = self.avr8().deactivate() {
            log::debug!("Failed to deactivate debug interface: {}", e);
        }
        if let Err(e) = self.tool.close() {
            log::warn!("Failed to end session with {}: {}", self.tool.name(), e);
        }
    }

    fn recover_debug_wire(&mut self) -> Result<()> {
        self.avr8().deactivate()?;
        self.update_dwen_fuse_bit(true)?;

        if self.config.cycle_target_power_post_dwen_update {
            let delay = self.config.target_power_cycle_delay;
            if let Some(power) = self.tool.target_power_management() {
                log::info!("Cycling target power");
                power.disable_target_power()?;
                log::debug!("Holding power off for {:?}", delay);
                thread::sleep(delay);
                power.enable_target_power()?;
                log::debug!("Waiting {:?} for target power-up", delay);
                thread::sleep(delay);
            }
        }

        log::info!("Retrying debugWire physical interface activation");
        self.avr8().activate()?;
        Ok(())
    }

    fn verify_signature(&mut self) -> Result<()> {
        let expected = self.descriptor.signature;
        let actual = self.avr8().device_id()?;
        if actual != expected {
            log::error!(
                "Connected target {} is not a {} ({}), check the configured target name",
                actual,
                self.descriptor.name,
                expected
            );
            return Err(Error::SignatureMismatch { expected, actual }.into());
        }
        log::debug!("Target signature {} verified", actual);
        Ok(())
    }

    /// Program or clear DWEN over ISP
    ///
    /// The ISP session is always left, whatever the outcome.
    pub fn update_dwen_fuse_bit(&mut self, enable: bool) -> Result<()> {
        let dwen = FuseBit::lookup("DWEN", self.description.dwen_fuse_bits_descriptor())?;
        let spien = FuseBit::lookup("SPIEN", self.description.spien_fuse_bits_descriptor())?;
        let isp_parameters = self.description.isp_parameters()?;
        let signature = self.descriptor.signature;

        let isp = self
            .tool
            .avr_isp_interface()
            .ok_or(Error::Fuse(FuseFailure::NoIspInterface))?;
        isp.set_isp_parameters(&isp_parameters);
        isp.activate()?;

        let result = update_fuse_bit(&mut IspFuses(&mut *isp), signature, spien, dwen, enable);

        if let Err(e) = isp.deactivate() {
            log::error!("Failed to leave ISP programming mode: {}", e);
        }
        Ok(result?)
    }

    /// Program or clear OCDEN through programming mode
    ///
    /// Programming mode is always left, whatever the outcome.
    pub fn update_ocden_fuse_bit(&mut self, enable: bool) -> Result<()> {
        let ocden = FuseBit::lookup("OCDEN", self.description.ocden_fuse_bits_descriptor())?;
        let jtagen = FuseBit::lookup("JTAGEN", self.description.jtagen_fuse_bits_descriptor())?;
        let signature = self.descriptor.signature;

        let avr8 = self.avr8();
        avr8.enable_programming_mode()?;

        let result = update_fuse_bit(&mut OcdFuses(&mut *avr8), signature, jtagen, ocden, enable);

        if let Err(e) = avr8.disable_programming_mode() {
            log::error!("Failed to leave programming mode: {}", e);
        }
        Ok(result?)
    }

    /// End the debug session
    ///
    /// Each step is attempted even if an earlier one failed. Only the final
    /// interface deactivation decides the result.
    pub fn deactivate(&mut self) -> Result<()> {
        if !self.activated {
            return Ok(());
        }

        if self.programming_mode_enabled() {
            if let Err(e) = self.avr8().disable_programming_mode() {
                log::error!("Failed to leave programming mode: {}", e);
            }
        }
        if let Err(e) = self.avr8().stop() {
            log::error!("Failed to stop target: {}", e);
        }
        if let Err(e) = self.avr8().clear_all_breakpoints() {
            log::error!("Failed to clear breakpoints: {}", e);
        }
        if self.config.manages_ocden() {
            if let Err(e) = self.update_ocden_fuse_bit(false) {
                log::error!("Failed to clear OCDEN fuse bit: {}", e);
            }
        }

        let result = self.avr8().deactivate();
        self.activated = false;
        if let Err(e) = self.tool.close() {
            log::warn!("Failed to end session with {}: {}", self.tool.name(), e);
        }

        log::info!("Deactivated {}", self.descriptor.name);
        Ok(result?)
    }

    /// Current execution state
    pub fn target_state(&mut self) -> Result<TargetState> {
        Ok(self.avr8().target_state()?)
    }

    /// Cause of the most recent stop
    pub fn break_cause(&mut self) -> BreakCause {
        self.avr8().break_cause()
    }

    /// Halt execution
    pub fn stop(&mut self) -> Result<()> {
        Ok(self.avr8().stop()?)
    }

    /// Resume execution, optionally from and until given byte addresses
    pub fn run(&mut self, from: Option<u32>, to: Option<u32>) -> Result<()> {
        if let Some(address) = from {
            self.avr8().set_program_counter(address)?;
        }
        match to {
            Some(address) => self.avr8().run_to(address)?,
            None => self.avr8().run()?,
        }
        Ok(())
    }

    /// Execute one instruction, optionally from a given byte address
    pub fn step(&mut self, from: Option<u32>) -> Result<()> {
        if let Some(address) = from {
            self.avr8().set_program_counter(address)?;
        }
        Ok(self.avr8().step()?)
    }

    /// Reset the target, leaving it stopped
    pub fn reset(&mut self) -> Result<()> {
        Ok(self.avr8().reset()?)
    }

    pub fn read_registers(&mut self, descriptors: &RegisterDescriptors) -> Result<Vec<Register>> {
        Ok(self.avr8().read_registers(descriptors)?)
    }

    pub fn write_registers(&mut self, registers: &[Register]) -> Result<()> {
        Ok(self.avr8().write_registers(registers)?)
    }

    /// Check an access against the target's memory map
    ///
    /// RAM accesses may start anywhere in data space, since registers and
    /// peripherals are mapped below internal SRAM.
    pub fn check_memory_access(&self, memory_type: MemoryType, start: u32, bytes: u32) -> Result<()> {
        let descriptor = self
            .descriptor
            .memory(memory_type)
            .ok_or(Error::Unsupported)?;
        if bytes == 0 {
            return Ok(());
        }

        let lowest = match memory_type {
            MemoryType::Ram => 0,
            _ => descriptor.address_range.start,
        };
        let in_range = start
            .checked_add(bytes - 1)
            .map_or(false, |end| start >= lowest && end <= descriptor.address_range.end);
        if !in_range {
            return Err(ControllerError::OutOfRange {
                memory_type,
                start,
                bytes,
            });
        }
        Ok(())
    }

    pub fn read_memory(
        &mut self,
        memory_type: MemoryType,
        start: u32,
        bytes: u32,
        excluded_ranges: &[MemoryAddressRange],
    ) -> Result<Vec<u8>> {
        self.check_memory_access(memory_type, start, bytes)?;
        Ok(self
            .avr8()
            .read_memory(memory_type, start, bytes, excluded_ranges)?)
    }

    pub fn write_memory(&mut self, memory_type: MemoryType, start: u32, data: &[u8]) -> Result<()> {
        self.check_memory_access(memory_type, start, data.len() as u32)?;
        if memory_type == MemoryType::Flash && !self.programming_mode_enabled() {
            return Err(Error::ProgrammingModeRequired.into());
        }
        Ok(self.avr8().write_memory(memory_type, start, data)?)
    }

    /// Erase a memory
    ///
    /// Flash is not erased over debugWire, since page writes replace its
    /// contents. RAM and EEPROM are filled with 0xFF.
    pub fn erase_memory(&mut self, memory_type: MemoryType) -> Result<()> {
        match memory_type {
            MemoryType::Flash => {
                if self.config.physical_interface == PhysicalInterface::DebugWire {
                    log::debug!("Skipping flash erase over debugWire");
                    return Ok(());
                }
                Ok(self.avr8().erase_program_memory()?)
            }
            MemoryType::Ram | MemoryType::Eeprom => {
                let range = self
                    .descriptor
                    .memory(memory_type)
                    .ok_or(Error::Unsupported)?
                    .address_range;
                self.write_memory(memory_type, range.start, &vec![0xFF; range.size() as usize])
            }
            _ => Err(Error::Unsupported.into()),
        }
    }

    pub fn set_breakpoint(&mut self, address: u32) -> Result<()> {
        Ok(self.avr8().set_breakpoint(address)?)
    }

    pub fn remove_breakpoint(&mut self, address: u32) -> Result<()> {
        Ok(self.avr8().clear_breakpoint(address)?)
    }

    /// Program counter as a byte address
    pub fn program_counter(&mut self) -> Result<u32> {
        Ok(self.avr8().program_counter()?)
    }

    pub fn set_program_counter(&mut self, address: u32) -> Result<()> {
        Ok(self.avr8().set_program_counter(address)?)
    }

    pub fn stack_pointer(&mut self) -> Result<u32> {
        let descriptors = RegisterDescriptors::from([self.stack_pointer.clone()]);
        let registers = self.read_registers(&descriptors)?;
        let register = registers.first().ok_or(Error::InvalidResponse)?;
        Ok(register.value_u32())
    }

    /// State of every GPIO pin of a package variant, keyed by pin number
    ///
    /// Each port register is read at most once.
    pub fn pin_states(&mut self, variant_id: usize) -> Result<BTreeMap<u16, PinState>> {
        let descriptor = &self.descriptor;
        let avr8 = self.tool.avr8_debug_interface();

        let variant = descriptor
            .variants
            .iter()
            .find(|v| v.id == variant_id)
            .ok_or(Error::UnknownPin)?;

        let mut cache = BTreeMap::new();
        let mut states = BTreeMap::new();

        for (number, pin) in &variant.pin_descriptors {
            let Some(pad) = descriptor.pad_descriptors.get(&pin.pad_name) else {
                continue;
            };
            let Some(bit) = pad.gpio_pin_number else {
                continue;
            };
            let mask = 1u8 << bit;

            let mut state = PinState::default();
            if let Some(ddr) = pad.ddr_address {
                let output = read_cached(avr8, &mut cache, ddr)? & mask != 0;
                state.io_direction = Some(if output {
                    IoDirection::Output
                } else {
                    IoDirection::Input
                });

                let level_address = if output { pad.port_address } else { pad.pin_address };
                if let Some(address) = level_address {
                    let high = read_cached(avr8, &mut cache, address)? & mask != 0;
                    state.io_state = Some(if high { IoState::High } else { IoState::Low });
                }
            }

            states.insert(*number, state);
        }

        Ok(states)
    }

    /// Drive a GPIO pin
    ///
    /// An input pin always has its PORT bit cleared, which disables the
    /// pull-up.
    pub fn set_pin_state(
        &mut self,
        variant_id: usize,
        pin: &PinDescriptor,
        state: PinState,
    ) -> Result<()> {
        if !self.descriptor.variants.iter().any(|v| v.id == variant_id) {
            return Err(Error::UnknownPin.into());
        }
        let pad = self
            .descriptor
            .pad_descriptors
            .get(&pin.pad_name)
            .ok_or(Error::UnknownPin)?;
        let (Some(bit), Some(ddr), Some(port)) =
            (pad.gpio_pin_number, pad.ddr_address, pad.port_address)
        else {
            return Err(Error::UnknownPin.into());
        };
        let direction = state.io_direction.ok_or(ControllerError::InvalidPinState)?;

        let io_state = match direction {
            IoDirection::Input => Some(IoState::Low),
            IoDirection::Output => state.io_state,
        };

        let avr8 = self.avr8();
        update_bit(avr8, ddr, bit, direction == IoDirection::Output)?;
        if let Some(io_state) = io_state {
            update_bit(avr8, port, bit, io_state == IoState::High)?;
        }
        Ok(())
    }

    pub fn enable_programming_mode(&mut self) -> Result<()> {
        Ok(self.avr8().enable_programming_mode()?)
    }

    pub fn disable_programming_mode(&mut self) -> Result<()> {
        Ok(self.avr8().disable_programming_mode()?)
    }

    pub fn programming_mode_enabled(&mut self) -> bool {
        self.avr8().programming_mode_enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avrbridge_dummy::{atmega328p_description, simulated_tool, SimulatedConfig};
    use avrbridge_edbg::EdbgToolModel;

    #[test]
    fn test_descriptor_from_description() {
        let descriptor = target_descriptor(&atmega328p_description().unwrap()).unwrap();

        let ram = descriptor.memory(MemoryType::Ram).unwrap();
        assert_eq!(ram.address_range, MemoryAddressRange::new(0x100, 0x8FF).unwrap());
        assert!(ram.access.contains(MemoryAccess::WRITABLE_DURING_SESSION));

        let flash = descriptor.memory(MemoryType::Flash).unwrap();
        assert_eq!(flash.address_range, MemoryAddressRange::new(0, 0x7FFF).unwrap());
        assert_eq!(flash.page_size, Some(128));
        assert!(!flash.access.contains(MemoryAccess::WRITABLE_DURING_SESSION));

        assert!(descriptor.memory(MemoryType::Eeprom).is_some());

        let gp: Vec<_> = descriptor
            .register_descriptors
            .iter()
            .filter(|d| d.register_type == RegisterType::GeneralPurpose)
            .collect();
        assert_eq!(gp.len(), 32);
        assert_eq!(gp[0].start_address, Some(0));
        assert_eq!(gp[31].name.as_deref(), Some("r31"));

        let sp = descriptor
            .register_descriptors
            .iter()
            .find(|d| d.register_type == RegisterType::StackPointer)
            .unwrap();
        assert_eq!((sp.start_address, sp.size), (Some(0x5D), 2));

        let pc = descriptor
            .register_descriptors
            .iter()
            .find(|d| d.register_type == RegisterType::ProgramCounter)
            .unwrap();
        assert_eq!((pc.start_address, pc.size), (None, 4));
    }

    #[test]
    fn test_rejects_unsupported_physical_interface() {
        let (tool, _probe) = simulated_tool(EdbgToolModel::AtmelIce, SimulatedConfig::atmega328p());
        let result = Avr8Target::new(
            Box::new(tool),
            atmega328p_description().unwrap(),
            TargetConfig::new(PhysicalInterface::Updi),
        );
        assert!(matches!(
            result,
            Err(ControllerError::UnsupportedPhysicalInterface { .. })
        ));
    }

    #[test]
    fn test_memory_access_check() {
        let (tool, probe) = simulated_tool(EdbgToolModel::AtmelIce, SimulatedConfig::atmega328p());
        let target = Avr8Target::new(
            Box::new(tool),
            atmega328p_description().unwrap(),
            TargetConfig::new(PhysicalInterface::DebugWire),
        )
        .unwrap();

        // IO space below internal SRAM is reachable
        assert!(target.check_memory_access(MemoryType::Ram, 0x23, 3).is_ok());
        assert!(target.check_memory_access(MemoryType::Ram, 0x8FF, 1).is_ok());
        assert!(target.check_memory_access(MemoryType::Ram, 0x8FF, 2).is_err());
        assert!(target.check_memory_access(MemoryType::Flash, 0x7F80, 0x80).is_ok());
        assert!(target.check_memory_access(MemoryType::Flash, 0x8000, 1).is_err());
        assert!(target.check_memory_access(MemoryType::Fuses, 0, 1).is_err());
        assert!(probe.commands().is_empty());
    }

    struct FakeFuses {
        signature: TargetSignature,
        fuses: [u8; 3],
        lock_bits: u8,
        writes: usize,
    }

    impl FuseAccess for FakeFuses {
        fn signature(&mut self) -> avrbridge_core::Result<TargetSignature> {
            Ok(self.signature)
        }

        fn read_fuse(&mut self, bits: &FuseBitsDescriptor) -> avrbridge_core::Result<u8> {
            Ok(self.fuses[bits.byte_address as usize])
        }

        fn read_lock_bits(&mut self) -> avrbridge_core::Result<u8> {
            Ok(self.lock_bits)
        }

        fn write_fuse(&mut self, bits: &FuseBitsDescriptor, value: u8) -> avrbridge_core::Result<()> {
            self.writes += 1;
            self.fuses[bits.byte_address as usize] = value;
            Ok(())
        }
    }

    fn high_fuse_bit(name: &'static str, bit_mask: u8) -> FuseBit {
        FuseBit {
            name,
            bits: FuseBitsDescriptor {
                byte_address: 1,
                fuse_type: avrbridge_core::target::FuseType::High,
                bit_mask,
            },
        }
    }

    fn fake(high: u8, lock_bits: u8) -> FakeFuses {
        FakeFuses {
            signature: TargetSignature::new(0x1E, 0x95, 0x0F),
            fuses: [0xFF, high, 0xFF],
            lock_bits,
            writes: 0,
        }
    }

    #[test]
    fn test_fuse_update_programs_and_verifies() {
        let mut fuses = fake(0xD9, 0xFF);
        update_fuse_bit(
            &mut fuses,
            TargetSignature::new(0x1E, 0x95, 0x0F),
            high_fuse_bit("SPIEN", 0x20),
            high_fuse_bit("DWEN", 0x40),
            true,
        )
        .unwrap();
        assert_eq!(fuses.fuses[1], 0x99);
        assert_eq!(fuses.writes, 1);
    }

    #[test]
    fn test_fuse_update_skips_when_already_set() {
        let mut fuses = fake(0x99, 0xFF);
        update_fuse_bit(
            &mut fuses,
            TargetSignature::new(0x1E, 0x95, 0x0F),
            high_fuse_bit("SPIEN", 0x20),
            high_fuse_bit("DWEN", 0x40),
            true,
        )
        .unwrap();
        assert_eq!(fuses.writes, 0);
    }

    #[test]
    fn test_fuse_update_aborts_on_inconsistency() {
        let expected = TargetSignature::new(0x1E, 0x95, 0x0F);
        let spien = high_fuse_bit("SPIEN", 0x20);
        let dwen = high_fuse_bit("DWEN", 0x40);

        let mut locked = fake(0xD9, 0xFC);
        assert_eq!(
            update_fuse_bit(&mut locked, expected, spien, dwen, true),
            Err(Error::Fuse(FuseFailure::LockBitsSet { value: 0xFC }))
        );
        assert_eq!(locked.writes, 0);

        // SPIEN unprogrammed while we are connected over ISP
        let mut untrusted = fake(0xF9, 0xFF);
        assert_eq!(
            update_fuse_bit(&mut untrusted, expected, spien, dwen, true),
            Err(Error::Fuse(FuseFailure::UntrustedDescription("SPIEN")))
        );
        assert_eq!(untrusted.writes, 0);

        let mut wrong_part = fake(0xD9, 0xFF);
        wrong_part.signature = TargetSignature::new(0x1E, 0x95, 0x14);
        assert!(matches!(
            update_fuse_bit(&mut wrong_part, expected, spien, dwen, true),
            Err(Error::SignatureMismatch { .. })
        ));
        assert_eq!(wrong_part.writes, 0);
    }
}
