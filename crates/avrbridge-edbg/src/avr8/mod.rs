//! AVR8 generic debug interface
//!
//! [`EdbgAvr8Interface`] drives the tool's AVR8 generic handler. One
//! implementation serves every config variant; the differences between
//! debugWire, megaAVR JTAG, XMEGA and UPDI are data (parameter sets and the
//! memory translation in [`probe_memory_type`]).
//!
//! Memory accesses pass through a fixed pipeline:
//!
//! 1. fuse access over debugWire is rejected
//! 2. excluded addresses are masked, either with a masked read or by
//!    splitting the read around them
//! 3. paged memory types are widened to whole pages (writes become
//!    read-modify-write)
//! 4. the access is chunked to the tool's maximum request size
//! 5. the command is issued and the returned byte count verified

mod commands;
mod memory;

use std::collections::BTreeSet;
use std::thread;
use std::time::Duration;

use avrbridge_core::align::AlignedAccess;
use avrbridge_core::interface::{Avr8DebugInterface, Avr8SessionConfig};
use avrbridge_core::memory::{MemoryAddressRange, MemoryType};
use avrbridge_core::register::{Register, RegisterDescriptor, RegisterDescriptors, RegisterType};
use avrbridge_core::target::{
    resolve_config_variant, Avr8ConfigVariant, BreakCause, PhysicalInterface, TargetParameters,
    TargetSignature, TargetState,
};
use avrbridge_core::{Error, Result};

use crate::device::HidTransport;
use crate::error::EdbgError;
use crate::frame::{AvrEvent, ResponseFrame};
use crate::link::{lock, SharedLink};
use crate::protocol::*;

pub use memory::{probe_memory_type, Access};

/// AVR8 debug interface of an EDBG tool
pub struct EdbgAvr8Interface<T: HidTransport> {
    link: SharedLink<T>,
    config: Option<Avr8SessionConfig>,
    config_variant: Option<Avr8ConfigVariant>,
    parameters: TargetParameters,

    target_state: TargetState,
    break_cause: BreakCause,
    physical_interface_activated: bool,
    target_attached: bool,
    programming_mode_enabled: bool,

    avoid_masked_memory_read: bool,
}

impl<T: HidTransport> EdbgAvr8Interface<T> {
    /// Create an interface on a shared link
    pub fn new(link: SharedLink<T>) -> Self {
        Self {
            link,
            config: None,
            config_variant: None,
            parameters: TargetParameters::default(),
            target_state: TargetState::Unknown,
            break_cause: BreakCause::Unknown,
            physical_interface_activated: false,
            target_attached: false,
            programming_mode_enabled: false,
            avoid_masked_memory_read: false,
        }
    }

    /// Emulate masked reads by splitting, for tools without masked read support
    pub fn set_avoid_masked_memory_read(&mut self, avoid: bool) {
        self.avoid_masked_memory_read = avoid;
    }

    /// Resolved config variant
    pub fn config_variant(&self) -> Option<Avr8ConfigVariant> {
        self.config_variant
    }

    fn session_config(&self) -> Result<&Avr8SessionConfig> {
        self.config.as_ref().ok_or(Error::NotConfigured)
    }

    fn variant(&self) -> Result<Avr8ConfigVariant> {
        self.config_variant.ok_or(Error::UnresolvableConfigVariant)
    }

    fn physical_interface(&self) -> Result<PhysicalInterface> {
        Ok(self.session_config()?.physical_interface)
    }

    fn send(&self, payload: &[u8]) -> std::result::Result<ResponseFrame, EdbgError> {
        lock(&self.link).send_command(HANDLER_AVR8_GENERIC, payload)
    }

    fn send_ok(&self, payload: &[u8]) -> Result<()> {
        let response = self.send(payload)?;
        commands::expect_ok(&response)?;
        Ok(())
    }

    fn clear_events(&self) -> Result<()> {
        lock(&self.link).clear_events()?;
        Ok(())
    }

    fn set_parameter(&self, parameter: Avr8Parameter, value: &[u8]) -> Result<()> {
        log::trace!(
            "Setting AVR8 parameter {:02X}:{:02X} to {:02X?}",
            parameter.context,
            parameter.id,
            value
        );
        self.send_ok(&commands::set_parameter(parameter, value))
    }

    fn set_u8(&self, parameter: Avr8Parameter, value: u8) -> Result<()> {
        self.set_parameter(parameter, &[value])
    }

    fn set_u16(&self, parameter: Avr8Parameter, value: u16) -> Result<()> {
        self.set_parameter(parameter, &value.to_le_bytes())
    }

    fn set_u32(&self, parameter: Avr8Parameter, value: u32) -> Result<()> {
        self.set_parameter(parameter, &value.to_le_bytes())
    }

    fn max_memory_access_size(&self) -> u32 {
        if let Some(size) = self.config.as_ref().and_then(|c| c.max_memory_access_size) {
            return size.max(1);
        }
        let report_size = lock(&self.link).report_size();
        (report_size.saturating_sub(MEMORY_ACCESS_OVERHEAD).max(1) * 2) as u32
    }

    fn page_size(&self, memory_type: Avr8MemoryType) -> Option<u32> {
        if !memory_type.is_paged() {
            return None;
        }
        match memory_type {
            Avr8MemoryType::EepromPage | Avr8MemoryType::EepromAtomic => {
                self.parameters.eeprom_page_size
            }
            _ => self.parameters.flash_page_size,
        }
        .filter(|size| *size > 1)
    }

    fn set_debug_wire_and_jtag_parameters(&self) -> Result<()> {
        let p = &self.parameters;
        let io_start = p.mapped_io_segment_start_address.unwrap_or(0);
        let io_relative = |address: u32| address.wrapping_sub(io_start) as u8;

        if let Some(size) = p.flash_page_size {
            self.set_u16(params::DEVICE_FLASH_PAGE_SIZE, size as u16)?;
        }
        if let Some(size) = p.flash_size {
            self.set_u32(params::DEVICE_FLASH_SIZE, size)?;
        }
        if let Some(start) = p.flash_start_address {
            self.set_u32(params::DEVICE_FLASH_BASE, start)?;
        }
        if let Some(start) = p.ram_start_address {
            self.set_u16(params::DEVICE_SRAM_START, start as u16)?;
        }
        if let Some(size) = p.eeprom_size {
            self.set_u16(params::DEVICE_EEPROM_SIZE, size as u16)?;
        }
        if let Some(size) = p.eeprom_page_size {
            self.set_u8(params::DEVICE_EEPROM_PAGE_SIZE, size as u8)?;
        }
        if let Some(revision) = p.ocd_revision {
            self.set_u8(params::DEVICE_OCD_REVISION, revision as u8)?;
        }
        if let Some(register) = p.ocd_data_register {
            self.set_u8(params::DEVICE_OCD_DATA_REGISTER, register as u8)?;
        }
        if let Some(register) = p.spmc_register_start_address {
            self.set_u8(params::DEVICE_SPMCR_REGISTER, register as u8)?;
        }
        if let Some(start) = p.boot_section_start_address {
            self.set_u32(params::DEVICE_BOOT_START_ADDR, start)?;
        }
        if let Some(address) = p.osccal_address {
            self.set_u8(params::DEVICE_OSCCAL_ADDR, io_relative(address))?;
        }
        if let Some(address) = p.eeprom_address_register_low {
            self.set_u8(params::DEVICE_EEARL_ADDR, io_relative(address))?;
        }
        if let Some(address) = p.eeprom_address_register_high {
            self.set_u8(params::DEVICE_EEARH_ADDR, io_relative(address))?;
        }
        if let Some(address) = p.eeprom_control_register_address {
            self.set_u8(params::DEVICE_EECR_ADDR, io_relative(address))?;
        }
        if let Some(address) = p.eeprom_data_register_address {
            self.set_u8(params::DEVICE_EEDR_ADDR, io_relative(address))?;
        }

        Ok(())
    }

    fn set_pdi_parameters(&self) -> Result<()> {
        let p = &self.parameters;
        let required = |value: Option<u32>, name: &'static str| {
            value.ok_or(Error::MissingTargetParameter(name))
        };

        let app_base = required(p.app_section_pdi_offset, "app section PDI offset")?;
        let boot_base = required(p.boot_section_pdi_offset, "boot section PDI offset")?;
        let eeprom_base = required(p.eeprom_pdi_offset, "EEPROM PDI offset")?;
        let fuse_base = required(p.fuse_registers_pdi_offset, "fuse registers PDI offset")?;
        let lock_base = required(p.lock_registers_pdi_offset, "lock registers PDI offset")?;
        let user_sign = required(p.user_signatures_pdi_offset, "user signatures PDI offset")?;
        let prod_sign = required(
            p.product_signatures_pdi_offset,
            "production signatures PDI offset",
        )?;
        let data_base = required(p.ram_pdi_offset, "RAM PDI offset")?;
        let app_bytes = required(p.app_section_size, "app section size")?;
        let boot_bytes = required(p.boot_section_size, "boot section size")?;
        let flash_page = required(p.flash_page_size, "flash page size")?;
        let eeprom_size = required(p.eeprom_size, "EEPROM size")?;
        let eeprom_page = required(p.eeprom_page_size, "EEPROM page size")?;
        let nvm_base = required(p.nvm_module_base_address, "NVM module base address")?;
        let mcu_base = required(p.mcu_module_base_address, "MCU module base address")?;

        self.set_u32(params::DEVICE_XMEGA_APPL_BASE_ADDR, app_base)?;
        self.set_u32(params::DEVICE_XMEGA_BOOT_BASE_ADDR, boot_base)?;
        self.set_u32(params::DEVICE_XMEGA_EEPROM_BASE_ADDR, eeprom_base)?;
        self.set_u32(params::DEVICE_XMEGA_FUSE_BASE_ADDR, fuse_base)?;
        self.set_u32(params::DEVICE_XMEGA_LOCKBIT_BASE_ADDR, lock_base)?;
        self.set_u32(params::DEVICE_XMEGA_USER_SIGN_BASE_ADDR, user_sign)?;
        self.set_u32(params::DEVICE_XMEGA_PROD_SIGN_BASE_ADDR, prod_sign)?;
        self.set_u32(params::DEVICE_XMEGA_DATA_BASE_ADDR, data_base)?;
        self.set_u32(params::DEVICE_XMEGA_APPLICATION_BYTES, app_bytes)?;
        self.set_u16(params::DEVICE_XMEGA_BOOT_BYTES, boot_bytes as u16)?;
        self.set_u16(params::DEVICE_XMEGA_FLASH_PAGE_BYTES, flash_page as u16)?;
        self.set_u16(params::DEVICE_XMEGA_EEPROM_SIZE, eeprom_size as u16)?;
        self.set_u8(params::DEVICE_XMEGA_EEPROM_PAGE_SIZE, eeprom_page as u8)?;
        self.set_u16(params::DEVICE_XMEGA_NVM_BASE, nvm_base as u16)?;
        self.set_u16(params::DEVICE_XMEGA_SIGNATURE_OFFSET, mcu_base as u16)?;

        Ok(())
    }

    fn set_updi_parameters(&self) -> Result<()> {
        let p = &self.parameters;

        let signature_base = p
            .signature_segment_start_address
            .ok_or(Error::MissingTargetParameter("signature segment start address"))?;
        let eeprom_page_size = p
            .eeprom_page_size
            .ok_or(Error::MissingTargetParameter("EEPROM page size"))?;

        if let Some(base) = p.program_memory_updi_start_address {
            self.set_u16(params::DEVICE_UPDI_PROGMEM_BASE_ADDR, base as u16)?;
            self.set_u8(params::DEVICE_UPDI_PROGMEM_BASE_ADDR_MSB, (base >> 16) as u8)?;
            self.set_u8(
                params::DEVICE_UPDI_24_BIT_ADDRESSING_ENABLE,
                (base > 0xFFFF) as u8,
            )?;
        }
        if let Some(size) = p.flash_page_size {
            self.set_u8(params::DEVICE_UPDI_FLASH_PAGE_SIZE, size as u8)?;
            self.set_u8(params::DEVICE_UPDI_FLASH_PAGE_SIZE_MSB, (size >> 8) as u8)?;
        }
        self.set_u8(params::DEVICE_UPDI_EEPROM_PAGE_SIZE, eeprom_page_size as u8)?;
        if let Some(address) = p.nvm_module_base_address {
            self.set_u16(params::DEVICE_UPDI_NVMCTRL_ADDR, address as u16)?;
        }
        if let Some(address) = p.ocd_module_address {
            self.set_u16(params::DEVICE_UPDI_OCD_ADDR, address as u16)?;
        }
        if let Some(size) = p.flash_size {
            self.set_u32(params::DEVICE_UPDI_FLASH_SIZE, size)?;
        }
        if let Some(size) = p.eeprom_size {
            self.set_u16(params::DEVICE_UPDI_EEPROM_SIZE, size as u16)?;
        }
        if let Some(start) = p.eeprom_start_address {
            self.set_u16(params::DEVICE_UPDI_EEPROM_BASE_ADDR, start as u16)?;
        }
        self.set_u16(params::DEVICE_UPDI_SIG_BASE_ADDR, signature_base as u16)?;
        if let Some(start) = p.fuse_segment_start_address {
            self.set_u16(params::DEVICE_UPDI_FUSE_BASE_ADDR, start as u16)?;
        }
        if let Some(size) = p.fuse_segment_size {
            self.set_u16(params::DEVICE_UPDI_FUSE_SIZE, size as u16)?;
        }
        if let Some(start) = p.lockbits_segment_start_address {
            self.set_u16(params::DEVICE_UPDI_LOCK_BASE_ADDR, start as u16)?;
        }

        Ok(())
    }

    fn activate_physical(&mut self, apply_external_reset: bool) -> Result<()> {
        let variant = self.variant()?;
        match self.send_ok(&commands::activate_physical(apply_external_reset)) {
            Ok(()) => {
                self.physical_interface_activated = true;
                Ok(())
            }
            Err(Error::CommandFailed { code }) if !apply_external_reset => {
                log::debug!(
                    "Physical activation failed (0x{:02X}), retrying with external reset",
                    code
                );
                self.activate_physical(true)
            }
            Err(Error::CommandFailed { code })
                if variant == Avr8ConfigVariant::DebugWire
                    && (code == AVR8_FAILURE_DW_PHY_ERROR
                        || code == AVR8_FAILURE_FAILED_TO_ENABLE_OCD) =>
            {
                Err(Error::DebugWirePhysicalInterface { code })
            }
            Err(e) => Err(e),
        }
    }

    fn deactivate_physical(&mut self) -> Result<()> {
        self.send_ok(&commands::deactivate_physical())?;
        self.physical_interface_activated = false;
        Ok(())
    }

    fn attach(&mut self) -> Result<()> {
        // The megaAVR JTAG OCD cannot break on attach
        let break_after_attach = self.variant()? != Avr8ConfigVariant::MegaJtag;

        self.send_ok(&commands::attach(break_after_attach))?;
        self.target_attached = true;

        if break_after_attach {
            if let Err(e) = self.wait_for_stopped_event() {
                log::warn!("Target did not report a stop after attaching: {}", e);
            }
        }

        Ok(())
    }

    fn detach(&mut self) -> Result<()> {
        self.send_ok(&commands::detach())?;
        self.target_attached = false;
        Ok(())
    }

    fn handle_event(&mut self, event: &AvrEvent) -> bool {
        if let AvrEvent::Break { pc, cause } = event {
            log::debug!("Target stopped at 0x{:04X} ({:?})", pc, cause);
            self.target_state = TargetState::Stopped;
            self.break_cause = *cause;
            return true;
        }
        false
    }

    fn wait_for_stopped_event(&mut self) -> Result<()> {
        for _ in 0..AVR_EVENT_WAIT_POLLS {
            let event = lock(&self.link).poll_event()?;
            match event {
                Some(event) => {
                    if self.handle_event(&event) {
                        return Ok(());
                    }
                }
                None => thread::sleep(Duration::from_millis(AVR_EVENT_WAIT_INTERVAL_MS)),
            }
        }
        Err(Error::MissingStopEvent)
    }

    fn disable_debug_wire(&self) -> Result<()> {
        self.send_ok(&commands::disable_debug_wire())
    }

    fn erase(&self, mode: Avr8EraseMode) -> Result<()> {
        log::debug!("Erasing ({:?})", mode);
        self.send_ok(&commands::erase(mode, 0))
    }

    /// Address of the OCD data register in data space, which register reads
    /// over debugWire or megaAVR JTAG skip
    fn ocd_data_register_address(&self) -> Option<u32> {
        match self.config_variant {
            Some(Avr8ConfigVariant::DebugWire) | Some(Avr8ConfigVariant::MegaJtag) => self
                .parameters
                .ocd_data_register
                .map(|r| r + self.parameters.mapped_io_segment_start_address.unwrap_or(0)),
            _ => None,
        }
    }

    fn read_probe_memory(
        &self,
        memory_type: Avr8MemoryType,
        address: u32,
        bytes: u32,
        excluded: &BTreeSet<u32>,
    ) -> Result<Vec<u8>> {
        if bytes == 0 {
            return Ok(Vec::new());
        }
        let end = address.checked_add(bytes).ok_or(Error::AddressOutOfBounds)?;

        let excluded_in_range: BTreeSet<u32> = excluded.range(address..end).copied().collect();
        if !excluded_in_range.is_empty() {
            if memory_type != Avr8MemoryType::Sram || self.avoid_masked_memory_read {
                return self.read_around_excluded(memory_type, address, end, &excluded_in_range);
            }
            return self.read_masked(address, bytes, &excluded_in_range);
        }

        if let Some(page_size) = self.page_size(memory_type) {
            let aligned = AlignedAccess::new(address, bytes, page_size);
            if aligned.is_widened(address, bytes) {
                let buffer =
                    self.read_probe_memory(memory_type, aligned.start, aligned.bytes, excluded)?;
                return Ok(buffer[aligned.offset..aligned.offset + bytes as usize].to_vec());
            }
        }

        let chunk_size = self
            .page_size(memory_type)
            .unwrap_or_else(|| self.max_memory_access_size());

        let mut data = Vec::with_capacity(bytes as usize);
        let mut chunk_address = address;
        while chunk_address < end {
            let chunk_bytes = chunk_size.min(end - chunk_address);
            let response =
                self.send(&commands::read_memory(memory_type, chunk_address, chunk_bytes))?;
            let chunk = commands::response_data(&response)?;
            if chunk.len() != chunk_bytes as usize {
                return Err(Error::UnexpectedByteCount {
                    expected: chunk_bytes,
                    actual: chunk.len() as u32,
                });
            }
            data.extend_from_slice(chunk);
            chunk_address += chunk_bytes;
        }

        Ok(data)
    }

    fn read_around_excluded(
        &self,
        memory_type: Avr8MemoryType,
        address: u32,
        end: u32,
        excluded: &BTreeSet<u32>,
    ) -> Result<Vec<u8>> {
        let none = BTreeSet::new();
        let mut data = Vec::with_capacity((end - address) as usize);
        let mut cursor = address;

        for &excluded_address in excluded {
            if excluded_address > cursor {
                data.extend(self.read_probe_memory(
                    memory_type,
                    cursor,
                    excluded_address - cursor,
                    &none,
                )?);
            }
            data.push(0x00);
            cursor = excluded_address + 1;
        }

        if cursor < end {
            data.extend(self.read_probe_memory(memory_type, cursor, end - cursor, &none)?);
        }

        Ok(data)
    }

    fn read_masked(&self, address: u32, bytes: u32, excluded: &BTreeSet<u32>) -> Result<Vec<u8>> {
        let end = address + bytes;
        let chunk_size = self.max_memory_access_size();

        let mut data = Vec::with_capacity(bytes as usize);
        let mut chunk_address = address;
        while chunk_address < end {
            let chunk_bytes = chunk_size.min(end - chunk_address);
            let mask = commands::read_mask(chunk_address, chunk_bytes, |a| excluded.contains(&a));
            let response = self.send(&commands::read_memory_masked(
                Avr8MemoryType::Sram,
                chunk_address,
                chunk_bytes,
                &mask,
            ))?;
            let chunk = commands::response_data(&response)?;
            if chunk.len() != chunk_bytes as usize {
                return Err(Error::UnexpectedByteCount {
                    expected: chunk_bytes,
                    actual: chunk.len() as u32,
                });
            }
            data.extend_from_slice(chunk);
            chunk_address += chunk_bytes;
        }

        // Excluded bytes are zero regardless of what the tool returned
        for excluded_address in excluded {
            data[(excluded_address - address) as usize] = 0x00;
        }

        Ok(data)
    }

    fn write_probe_memory(
        &self,
        memory_type: Avr8MemoryType,
        address: u32,
        data: &[u8],
    ) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let bytes = data.len() as u32;

        if let Some(page_size) = self.page_size(memory_type) {
            let aligned = AlignedAccess::new(address, bytes, page_size);
            if aligned.is_widened(address, bytes) {
                log::trace!(
                    "Widening write at 0x{:X} ({} bytes) to 0x{:X} ({} bytes)",
                    address,
                    bytes,
                    aligned.start,
                    aligned.bytes
                );
                let mut buffer = self.read_probe_memory(
                    memory::read_back_type(memory_type),
                    aligned.start,
                    aligned.bytes,
                    &BTreeSet::new(),
                )?;
                buffer[aligned.offset..aligned.offset + data.len()].copy_from_slice(data);
                return self.write_probe_memory(memory_type, aligned.start, &buffer);
            }
        }

        let chunk_size = self
            .page_size(memory_type)
            .unwrap_or_else(|| self.max_memory_access_size()) as usize;

        for (index, chunk) in data.chunks(chunk_size).enumerate() {
            let chunk_address = address + (index * chunk_size) as u32;
            self.send_ok(&commands::write_memory(memory_type, chunk_address, chunk))?;
        }

        Ok(())
    }

    fn register_memory(&self, descriptor_type: RegisterType) -> Result<(Avr8MemoryType, u32)> {
        let variant = self.variant()?;
        if descriptor_type == RegisterType::GeneralPurpose
            && matches!(variant, Avr8ConfigVariant::XMega | Avr8ConfigVariant::Updi)
        {
            let base = self.parameters.gp_register_start_address.unwrap_or(0);
            return Ok((Avr8MemoryType::RegisterFile, base));
        }
        Ok((Avr8MemoryType::Sram, 0))
    }

    fn excluded_register_addresses(&self) -> BTreeSet<u32> {
        self.ocd_data_register_address().into_iter().collect()
    }
}

impl<T: HidTransport> Avr8DebugInterface for EdbgAvr8Interface<T> {
    fn configure(&mut self, config: &Avr8SessionConfig) -> Result<()> {
        self.config_variant = resolve_config_variant(config.family, config.physical_interface);
        self.config = Some(config.clone());

        log::debug!(
            "Configured AVR8 interface for {} ({:?})",
            config.physical_interface,
            self.config_variant
        );
        Ok(())
    }

    fn set_target_parameters(&mut self, parameters: &TargetParameters) -> Result<()> {
        let config = self.session_config()?;

        if parameters.stack_pointer_register_low_address.is_none() {
            return Err(Error::MissingTargetParameter("stack pointer start address"));
        }
        if parameters.stack_pointer_register_size.is_none() {
            return Err(Error::MissingTargetParameter("stack pointer size"));
        }
        if parameters.status_register_start_address.is_none() {
            return Err(Error::MissingTargetParameter("status register start address"));
        }
        if parameters.status_register_size.is_none() {
            return Err(Error::MissingTargetParameter("status register size"));
        }

        let family = parameters.family.or(config.family);
        let variant = resolve_config_variant(family, config.physical_interface)
            .ok_or(Error::UnresolvableConfigVariant)?;

        self.config_variant = Some(variant);
        self.parameters = parameters.clone();

        match variant {
            Avr8ConfigVariant::DebugWire | Avr8ConfigVariant::MegaJtag => {
                self.set_debug_wire_and_jtag_parameters()
            }
            Avr8ConfigVariant::XMega => self.set_pdi_parameters(),
            Avr8ConfigVariant::Updi => self.set_updi_parameters(),
        }
    }

    fn init(&mut self) -> Result<()> {
        let variant = self.variant()?;
        let physical_interface = self.physical_interface()?;

        match variant {
            Avr8ConfigVariant::XMega => {
                self.set_u16(params::PDI_CLOCK_SPEED, DEFAULT_PDI_CLOCK_KHZ)?;
            }
            Avr8ConfigVariant::Updi => {
                self.set_u16(params::PDI_CLOCK_SPEED, DEFAULT_UPDI_CLOCK_KHZ)?;
                self.set_u8(params::ENABLE_HIGH_VOLTAGE_UPDI, 0)?;
            }
            Avr8ConfigVariant::MegaJtag => {
                self.set_u16(params::MEGA_DEBUG_CLOCK, DEFAULT_MEGA_DEBUG_CLOCK_KHZ)?;
                self.set_u32(params::JTAG_DAISY_CHAIN_SETTINGS, 0)?;
            }
            Avr8ConfigVariant::DebugWire => {}
        }

        let variant_id = match variant {
            Avr8ConfigVariant::DebugWire => AVR8_VARIANT_DEBUG_WIRE,
            Avr8ConfigVariant::MegaJtag => AVR8_VARIANT_MEGAJTAG,
            Avr8ConfigVariant::XMega => AVR8_VARIANT_XMEGA,
            Avr8ConfigVariant::Updi => AVR8_VARIANT_UPDI,
        };
        let interface_id = match physical_interface {
            PhysicalInterface::DebugWire => AVR8_PHY_INTERFACE_DEBUG_WIRE,
            PhysicalInterface::Jtag => AVR8_PHY_INTERFACE_JTAG,
            PhysicalInterface::Pdi => AVR8_PHY_INTERFACE_PDI,
            PhysicalInterface::Updi => AVR8_PHY_INTERFACE_UPDI,
        };

        self.set_u8(params::CONFIG_VARIANT, variant_id)?;
        self.set_u8(params::CONFIG_FUNCTION, AVR8_FUNCTION_DEBUGGING)?;
        self.set_u8(params::PHYSICAL_INTERFACE, interface_id)?;

        Ok(())
    }

    fn activate(&mut self) -> Result<()> {
        if !self.physical_interface_activated {
            self.activate_physical(false)?;
        }
        if !self.target_attached {
            self.attach()?;
        }
        Ok(())
    }

    fn deactivate(&mut self) -> Result<()> {
        if self.target_attached {
            if self.variant()? == Avr8ConfigVariant::DebugWire
                && self.session_config()?.disable_debug_wire_on_deactivate
            {
                match self.disable_debug_wire() {
                    Ok(()) => log::warn!(
                        "Disabled debugWire on the target. This is only temporary: \
                         the DWEN fuse bit is still programmed and debugWire returns after a power cycle"
                    ),
                    Err(e) => log::error!("Failed to disable debugWire: {}", e),
                }
            }

            self.detach()?;
        }

        if self.physical_interface_activated {
            self.deactivate_physical()?;
        }

        self.target_state = TargetState::Unknown;
        Ok(())
    }

    fn device_id(&mut self) -> Result<TargetSignature> {
        let physical_interface = self.physical_interface()?;

        if self.variant()? == Avr8ConfigVariant::Updi {
            // GET_ID over UPDI returns a fixed string, so read the signature row
            let start = self
                .parameters
                .signature_segment_start_address
                .ok_or(Error::MissingTargetParameter("signature segment start address"))?;
            let data = self.read_probe_memory(Avr8MemoryType::Sram, start, 3, &BTreeSet::new())?;
            return Ok(TargetSignature::new(data[0], data[1], data[2]));
        }

        let response = self.send(&commands::get_id())?;
        let data = commands::response_data(&response)?;
        Ok(commands::signature_from_device_id(data, physical_interface)?)
    }

    fn stop(&mut self) -> Result<()> {
        self.send_ok(&commands::stop())?;
        if self.target_state()? != TargetState::Stopped {
            self.wait_for_stopped_event()?;
        }
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        self.clear_events()?;
        self.send_ok(&commands::run())?;
        self.target_state = TargetState::Running;
        Ok(())
    }

    fn run_to(&mut self, address: u32) -> Result<()> {
        self.clear_events()?;
        self.send_ok(&commands::run_to(address / 2))?;
        self.target_state = TargetState::Running;
        Ok(())
    }

    fn step(&mut self) -> Result<()> {
        self.clear_events()?;
        self.send_ok(&commands::step())?;
        self.target_state = TargetState::Running;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.clear_events()?;
        self.send_ok(&commands::reset())?;
        self.target_state = TargetState::Running;
        self.wait_for_stopped_event()
    }

    fn target_state(&mut self) -> Result<TargetState> {
        if self.target_state != TargetState::Stopped {
            let event = lock(&self.link).poll_event()?;
            if let Some(event) = event {
                self.handle_event(&event);
            }
        }
        Ok(self.target_state)
    }

    fn break_cause(&self) -> BreakCause {
        self.break_cause
    }

    fn program_counter(&mut self) -> Result<u32> {
        let response = self.send(&commands::read_program_counter())?;
        Ok(commands::response_program_counter(&response)?)
    }

    fn set_program_counter(&mut self, address: u32) -> Result<()> {
        self.send_ok(&commands::write_program_counter(address / 2))
    }

    fn set_breakpoint(&mut self, address: u32) -> Result<()> {
        log::debug!("Setting software breakpoint at 0x{:04X}", address);
        self.send_ok(&commands::set_software_breakpoint(address))
    }

    fn clear_breakpoint(&mut self, address: u32) -> Result<()> {
        log::debug!("Clearing software breakpoint at 0x{:04X}", address);
        self.send_ok(&commands::clear_software_breakpoint(address))
    }

    fn clear_all_breakpoints(&mut self) -> Result<()> {
        self.send_ok(&commands::clear_all_software_breakpoints())
    }

    fn read_registers(&mut self, descriptors: &RegisterDescriptors) -> Result<Vec<Register>> {
        let mut registers = Vec::with_capacity(descriptors.len());

        let mut groups: Vec<(RegisterType, Vec<&RegisterDescriptor>)> = Vec::new();
        for descriptor in descriptors {
            match groups.last_mut() {
                Some((register_type, group)) if *register_type == descriptor.register_type => {
                    group.push(descriptor)
                }
                _ => groups.push((descriptor.register_type, vec![descriptor])),
            }
        }

        for (register_type, group) in groups {
            if register_type == RegisterType::ProgramCounter {
                let pc = self.program_counter()?;
                for descriptor in group {
                    let size = descriptor.size.min(4) as usize;
                    let value = pc.to_be_bytes()[4 - size..].to_vec();
                    registers.push(Register::new(descriptor.clone(), value));
                }
                continue;
            }

            let addressed: Vec<(&RegisterDescriptor, u32)> = group
                .iter()
                .filter_map(|d| d.start_address.map(|a| (*d, a)))
                .collect();
            let Some(start) = addressed.iter().map(|(_, a)| *a).min() else {
                continue;
            };
            let end = addressed
                .iter()
                .map(|(d, a)| a + d.size)
                .max()
                .unwrap_or(start);

            let (memory_type, base) = self.register_memory(register_type)?;
            let excluded = if memory_type == Avr8MemoryType::Sram {
                self.excluded_register_addresses()
            } else {
                BTreeSet::new()
            };

            let buffer = self.read_probe_memory(
                memory_type,
                start - base.min(start),
                end - start,
                &excluded,
            )?;

            for (descriptor, address) in addressed {
                let offset = (address - start) as usize;
                let mut value = buffer[offset..offset + descriptor.size as usize].to_vec();
                value.reverse();
                registers.push(Register::new(descriptor.clone(), value));
            }
        }

        Ok(registers)
    }

    fn write_registers(&mut self, registers: &[Register]) -> Result<()> {
        for register in registers {
            let descriptor = &register.descriptor;
            if register.value.is_empty() || register.value.len() > descriptor.size as usize {
                return Err(Error::InvalidRegisterValue);
            }

            if descriptor.register_type == RegisterType::ProgramCounter {
                self.set_program_counter(register.value_u32())?;
                continue;
            }

            let address = descriptor.start_address.ok_or(Error::InvalidRegisterValue)?;
            let (memory_type, base) = self.register_memory(descriptor.register_type)?;

            // Zero extend to the full register width, least significant byte first
            let mut value = register.value_lsb_first();
            value.resize(descriptor.size as usize, 0x00);

            self.write_probe_memory(memory_type, address - base.min(address), &value)?;
        }

        Ok(())
    }

    fn read_memory(
        &mut self,
        memory_type: MemoryType,
        start: u32,
        bytes: u32,
        excluded_ranges: &[MemoryAddressRange],
    ) -> Result<Vec<u8>> {
        let variant = self.variant()?;
        if memory_type == MemoryType::Fuses && variant == Avr8ConfigVariant::DebugWire {
            return Err(Error::FuseAccessOverDebugWire);
        }

        let (probe_type, probe_address) = probe_memory_type(
            memory_type,
            variant,
            self.programming_mode_enabled,
            Access::Read,
            start,
            &self.parameters,
        )?;

        let mut excluded: BTreeSet<u32> = BTreeSet::new();
        if let Ok(range) = MemoryAddressRange::from_start_and_size(start, bytes) {
            for excluded_range in excluded_ranges {
                if let Some(overlap) = range.intersection(excluded_range) {
                    excluded.extend(
                        (overlap.start..=overlap.end).map(|a| a - start + probe_address),
                    );
                }
            }
        }

        self.read_probe_memory(probe_type, probe_address, bytes, &excluded)
    }

    fn write_memory(&mut self, memory_type: MemoryType, start: u32, data: &[u8]) -> Result<()> {
        let variant = self.variant()?;
        match memory_type {
            MemoryType::Fuses if variant == Avr8ConfigVariant::DebugWire => {
                return Err(Error::FuseAccessOverDebugWire);
            }
            MemoryType::Flash if !self.programming_mode_enabled => {
                return Err(Error::ProgrammingModeRequired);
            }
            _ => {}
        }

        let (probe_type, probe_address) = probe_memory_type(
            memory_type,
            variant,
            self.programming_mode_enabled,
            Access::Write,
            start,
            &self.parameters,
        )?;

        self.write_probe_memory(probe_type, probe_address, data)
    }

    fn erase_program_memory(&mut self) -> Result<()> {
        match self.variant()? {
            Avr8ConfigVariant::DebugWire => {
                // No erase command over debugWire
                let start = self.parameters.flash_start_address.unwrap_or(0);
                let size = self
                    .parameters
                    .flash_size
                    .ok_or(Error::MissingTargetParameter("flash size"))?;
                log::debug!("Erasing flash by filling {} bytes with 0xFF", size);
                self.write_memory(MemoryType::Flash, start, &vec![0xFF; size as usize])
            }
            Avr8ConfigVariant::XMega => {
                self.erase(Avr8EraseMode::BootSection)?;
                self.erase(Avr8EraseMode::ApplicationSection)
            }
            Avr8ConfigVariant::MegaJtag | Avr8ConfigVariant::Updi => {
                let preserve = self.session_config()?.preserve_eeprom;
                let eeprom = match (
                    preserve,
                    self.parameters.eeprom_start_address,
                    self.parameters.eeprom_size,
                ) {
                    (true, Some(start), Some(size)) => {
                        log::debug!("Preserving {} bytes of EEPROM across chip erase", size);
                        Some((start, self.read_memory(MemoryType::Eeprom, start, size, &[])?))
                    }
                    _ => None,
                };

                self.erase(Avr8EraseMode::Chip)?;

                if let Some((start, data)) = eeprom {
                    self.write_memory(MemoryType::Eeprom, start, &data)?;
                }
                Ok(())
            }
        }
    }

    fn read_lock_bit_byte(&mut self) -> Result<u8> {
        let data = self.read_probe_memory(Avr8MemoryType::LockBits, 0, 1, &BTreeSet::new())?;
        Ok(data[0])
    }

    fn enable_programming_mode(&mut self) -> Result<()> {
        if self.programming_mode_enabled {
            return Ok(());
        }

        // debugWire has no programming mode; flash is written through the OCD
        if self.variant()? != Avr8ConfigVariant::DebugWire {
            self.send_ok(&commands::enter_programming_mode())?;
        }
        self.programming_mode_enabled = true;
        log::debug!("Programming mode enabled");
        Ok(())
    }

    fn disable_programming_mode(&mut self) -> Result<()> {
        if !self.programming_mode_enabled {
            return Ok(());
        }

        let variant = self.variant()?;
        if variant != Avr8ConfigVariant::DebugWire {
            self.send_ok(&commands::leave_programming_mode())?;
        }
        self.programming_mode_enabled = false;
        log::debug!("Programming mode disabled");

        if variant == Avr8ConfigVariant::MegaJtag
            && self.session_config()?.reactivate_jtag_target_post_programming_mode
        {
            log::debug!("Reactivating JTAG target after programming mode");
            self.deactivate_physical()?;
            self.target_attached = false;
            self.activate()?;
        }

        Ok(())
    }

    fn programming_mode_enabled(&self) -> bool {
        self.programming_mode_enabled
    }
}
