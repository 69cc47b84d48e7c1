//! avr-gdb view of a target
//!
//! avr-gdb numbers 35 registers: r0 to r31, then SREG (32), SP (33) and PC
//! (34). Memory lives in one flat address space where bit 23 selects data
//! space and bits 23 and 16 together select EEPROM.

use std::collections::BTreeMap;
use std::sync::Arc;

use avrbridge_core::memory::MemoryType;
use avrbridge_core::register::{RegisterDescriptor, RegisterDescriptors, RegisterType};
use avrbridge_core::target::TargetDescriptor;

use crate::error::{GdbError, Result};

/// Data space offset in the GDB address space
pub const RAM_OFFSET: u32 = 0x0080_0000;
/// EEPROM offset in the GDB address space
pub const EEPROM_OFFSET: u32 = 0x0081_0000;

pub const SREG_NUMBER: u32 = 32;
pub const SP_NUMBER: u32 = 33;
pub const PC_NUMBER: u32 = 34;
pub const REGISTER_COUNT: u32 = 35;

/// Size in bytes of a register as avr-gdb sees it
pub fn gdb_register_size(number: u32) -> usize {
    match number {
        SP_NUMBER => 2,
        PC_NUMBER => 4,
        _ => 1,
    }
}

/// Logical memory type for a GDB address
pub fn memory_type_from_gdb_address(address: u32) -> MemoryType {
    if address & EEPROM_OFFSET == EEPROM_OFFSET {
        MemoryType::Eeprom
    } else if address & RAM_OFFSET != 0 {
        MemoryType::Ram
    } else {
        MemoryType::Flash
    }
}

fn gdb_offset(memory_type: MemoryType) -> u32 {
    match memory_type {
        MemoryType::Eeprom => EEPROM_OFFSET,
        MemoryType::Ram => RAM_OFFSET,
        _ => 0,
    }
}

/// A target descriptor with the avr-gdb register and address mappings
#[derive(Debug, Clone)]
pub struct GdbTargetDescriptor {
    pub target: Arc<TargetDescriptor>,
    registers: BTreeMap<u32, RegisterDescriptor>,
}

impl GdbTargetDescriptor {
    pub fn new(target: Arc<TargetDescriptor>) -> Self {
        let descriptors = &target.register_descriptors;
        let mut registers = BTreeMap::new();

        // Descriptor order puts general purpose registers first, by address
        let general_purpose = descriptors
            .iter()
            .filter(|d| d.register_type == RegisterType::GeneralPurpose)
            .take(32);
        for (number, descriptor) in (0u32..).zip(general_purpose) {
            registers.insert(number, descriptor.clone());
        }

        for (number, register_type) in [
            (SREG_NUMBER, RegisterType::Status),
            (SP_NUMBER, RegisterType::StackPointer),
            (PC_NUMBER, RegisterType::ProgramCounter),
        ] {
            if let Some(descriptor) = descriptors.iter().find(|d| d.register_type == register_type) {
                registers.insert(number, descriptor.clone());
            }
        }

        if registers.len() != REGISTER_COUNT as usize {
            log::warn!(
                "Only {} of {} GDB registers could be mapped for {}",
                registers.len(),
                REGISTER_COUNT,
                target.name
            );
        }

        Self { target, registers }
    }

    /// Target register behind a GDB register number
    pub fn register(&self, number: u32) -> Result<&RegisterDescriptor> {
        self.registers
            .get(&number)
            .ok_or(GdbError::UnknownRegister(number))
    }

    /// GDB number of a target register
    pub fn register_number(&self, descriptor: &RegisterDescriptor) -> Option<u32> {
        self.registers
            .iter()
            .find(|(_, d)| *d == descriptor)
            .map(|(number, _)| *number)
    }

    /// Every mapped register, in GDB order
    pub fn registers(&self) -> impl Iterator<Item = (u32, &RegisterDescriptor)> {
        self.registers.iter().map(|(n, d)| (*n, d))
    }

    pub fn register_descriptors(&self) -> RegisterDescriptors {
        self.registers.values().cloned().collect()
    }

    /// Translate a GDB access into a target memory type and address
    ///
    /// Checks the access against the target's memory map. RAM accesses may
    /// start below internal SRAM, where registers and peripherals live.
    pub fn translate(&self, gdb_address: u32, length: u32) -> Result<(MemoryType, u32)> {
        let memory_type = memory_type_from_gdb_address(gdb_address);
        let descriptor = self
            .target
            .memory(memory_type)
            .ok_or(GdbError::NoSuchMemory(memory_type))?;

        let mut address = gdb_address & !gdb_offset(memory_type);
        if memory_type == MemoryType::Eeprom {
            // GDB addresses EEPROM relative to its start
            address = address
                .checked_add(descriptor.address_range.start)
                .ok_or(GdbError::OutOfRange {
                    memory_type,
                    start: address,
                    bytes: length,
                })?;
        }

        if length == 0 {
            return Ok((memory_type, address));
        }

        let lowest = match memory_type {
            MemoryType::Ram => 0,
            _ => descriptor.address_range.start,
        };
        let in_range = address
            .checked_add(length - 1)
            .map_or(false, |end| address >= lowest && end <= descriptor.address_range.end);
        if !in_range {
            return Err(GdbError::OutOfRange {
                memory_type,
                start: address,
                bytes: length,
            });
        }

        Ok((memory_type, address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avrbridge_core::memory::{MemoryAccess, MemoryAddressRange, MemoryDescriptor};
    use avrbridge_core::target::TargetSignature;

    fn descriptor() -> GdbTargetDescriptor {
        let mut register_descriptors = RegisterDescriptors::new();
        for i in 0..32 {
            register_descriptors.insert(
                RegisterDescriptor::new(RegisterType::GeneralPurpose, Some(i), 1)
                    .with_name(format!("r{}", i)),
            );
        }
        register_descriptors.insert(RegisterDescriptor::new(RegisterType::Status, Some(0x5F), 1));
        register_descriptors.insert(RegisterDescriptor::new(
            RegisterType::StackPointer,
            Some(0x5D),
            2,
        ));
        register_descriptors.insert(RegisterDescriptor::new(RegisterType::ProgramCounter, None, 4));
        register_descriptors.insert(
            RegisterDescriptor::new(RegisterType::Other, Some(0x5F), 1).with_name("SREG"),
        );

        let memory = |memory_type, start, end| MemoryDescriptor {
            memory_type,
            address_range: MemoryAddressRange::new(start, end).unwrap(),
            access: MemoryAccess::all(),
            page_size: None,
        };
        let mut memory_descriptors = BTreeMap::new();
        memory_descriptors.insert(MemoryType::Flash, memory(MemoryType::Flash, 0, 0x7FFF));
        memory_descriptors.insert(MemoryType::Ram, memory(MemoryType::Ram, 0x100, 0x8FF));
        memory_descriptors.insert(MemoryType::Eeprom, memory(MemoryType::Eeprom, 0x1000, 0x13FF));

        GdbTargetDescriptor::new(Arc::new(TargetDescriptor {
            name: "test".into(),
            signature: TargetSignature::new(0x1E, 0x95, 0x0F),
            family: None,
            memory_descriptors,
            register_descriptors,
            pad_descriptors: BTreeMap::new(),
            variants: Vec::new(),
        }))
    }

    #[test]
    fn test_address_space_selection() {
        assert_eq!(memory_type_from_gdb_address(0x0000_0100), MemoryType::Flash);
        assert_eq!(memory_type_from_gdb_address(0x0080_0100), MemoryType::Ram);
        assert_eq!(memory_type_from_gdb_address(0x0081_0010), MemoryType::Eeprom);
    }

    #[test]
    fn test_register_mapping() {
        let gdb = descriptor();
        assert_eq!(gdb.registers().count(), REGISTER_COUNT as usize);
        assert_eq!(gdb.register(5).unwrap().start_address, Some(5));
        assert_eq!(gdb.register(SREG_NUMBER).unwrap().register_type, RegisterType::Status);
        assert_eq!(gdb.register(SP_NUMBER).unwrap().size, 2);
        assert_eq!(
            gdb.register(PC_NUMBER).unwrap().register_type,
            RegisterType::ProgramCounter
        );
        assert!(matches!(gdb.register(35), Err(GdbError::UnknownRegister(35))));

        let sp = gdb.register(SP_NUMBER).unwrap().clone();
        assert_eq!(gdb.register_number(&sp), Some(SP_NUMBER));
    }

    #[test]
    fn test_translate_rebases_eeprom() {
        let gdb = descriptor();
        assert_eq!(
            gdb.translate(0x0081_0010, 4).unwrap(),
            (MemoryType::Eeprom, 0x1010)
        );
        assert!(gdb.translate(0x0081_0400, 1).is_err());
    }

    #[test]
    fn test_translate_bounds() {
        let gdb = descriptor();
        // Register file and IO space are reachable below SRAM
        assert_eq!(gdb.translate(0x0080_0020, 2).unwrap(), (MemoryType::Ram, 0x20));
        assert_eq!(gdb.translate(0x0080_08FF, 1).unwrap(), (MemoryType::Ram, 0x8FF));
        assert!(matches!(
            gdb.translate(0x0080_08FF, 2),
            Err(GdbError::OutOfRange { .. })
        ));
        assert_eq!(gdb.translate(0x7FFC, 4).unwrap(), (MemoryType::Flash, 0x7FFC));
        assert!(gdb.translate(0x8000, 1).is_err());
    }
}
