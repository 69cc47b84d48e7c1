//! Logical to tool memory translation

use avrbridge_core::memory::MemoryType;
use avrbridge_core::target::{Avr8ConfigVariant, TargetParameters};
use avrbridge_core::{Error, Result};

use crate::protocol::Avr8MemoryType;

/// Direction of a memory access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Read
    Read,
    /// Write
    Write,
}

/// Map a logical memory access onto a tool memory type and address
///
/// XMEGA flash and EEPROM are addressed relative to their section start.
/// Everything else keeps its address.
pub fn probe_memory_type(
    memory_type: MemoryType,
    variant: Avr8ConfigVariant,
    programming_mode: bool,
    access: Access,
    address: u32,
    parameters: &TargetParameters,
) -> Result<(Avr8MemoryType, u32)> {
    use Avr8ConfigVariant as V;

    match memory_type {
        MemoryType::Ram => {
            if programming_mode {
                return Err(Error::RamAccessInProgrammingMode);
            }
            Ok((Avr8MemoryType::Sram, address))
        }

        MemoryType::Flash => match variant {
            V::DebugWire | V::Updi => Ok((Avr8MemoryType::FlashPage, address)),
            V::MegaJtag => match (access, programming_mode) {
                (Access::Read, false) => Ok((Avr8MemoryType::Spm, address)),
                _ => Ok((Avr8MemoryType::FlashPage, address)),
            },
            V::XMega => {
                let boot_start = parameters
                    .boot_section_start_address
                    .ok_or(Error::MissingTargetParameter("boot section start address"))?
                    * 2;
                if address >= boot_start {
                    Ok((Avr8MemoryType::BootFlash, address - boot_start))
                } else {
                    let app_start = parameters.app_section_start_address.unwrap_or(0);
                    let offset = address
                        .checked_sub(app_start)
                        .ok_or(Error::AddressOutOfBounds)?;
                    Ok((Avr8MemoryType::ApplFlash, offset))
                }
            }
        },

        MemoryType::Eeprom => {
            let eeprom_offset = |address: u32| {
                let start = parameters.eeprom_start_address.unwrap_or(0);
                address.checked_sub(start).ok_or(Error::AddressOutOfBounds)
            };

            match (access, variant) {
                (_, V::MegaJtag) if programming_mode => Ok((Avr8MemoryType::EepromPage, address)),
                (Access::Read, V::XMega) => Ok((Avr8MemoryType::Eeprom, eeprom_offset(address)?)),
                (Access::Write, V::XMega) => {
                    Ok((Avr8MemoryType::EepromAtomic, eeprom_offset(address)?))
                }
                (Access::Write, V::Updi) => Ok((Avr8MemoryType::EepromAtomic, address)),
                _ => Ok((Avr8MemoryType::Eeprom, address)),
            }
        }

        MemoryType::Fuses => Ok((Avr8MemoryType::Fuses, address)),

        MemoryType::Other => Err(Error::Unsupported),
    }
}

/// Tool memory type used to read back a region before a partial page write
pub fn read_back_type(write_type: Avr8MemoryType) -> Avr8MemoryType {
    match write_type {
        Avr8MemoryType::EepromAtomic => Avr8MemoryType::Eeprom,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Avr8ConfigVariant as V;

    fn xmega_parameters() -> TargetParameters {
        TargetParameters {
            app_section_start_address: Some(0),
            boot_section_start_address: Some(0x10000),
            eeprom_start_address: Some(0x1000),
            ..Default::default()
        }
    }

    fn translate(
        memory_type: MemoryType,
        variant: Avr8ConfigVariant,
        programming_mode: bool,
        access: Access,
        address: u32,
    ) -> Result<(Avr8MemoryType, u32)> {
        probe_memory_type(
            memory_type,
            variant,
            programming_mode,
            access,
            address,
            &xmega_parameters(),
        )
    }

    #[test]
    fn test_ram_translation() {
        for variant in [V::DebugWire, V::MegaJtag, V::XMega, V::Updi] {
            assert_eq!(
                translate(MemoryType::Ram, variant, false, Access::Read, 0x100),
                Ok((Avr8MemoryType::Sram, 0x100))
            );
            assert_eq!(
                translate(MemoryType::Ram, variant, true, Access::Write, 0x100),
                Err(Error::RamAccessInProgrammingMode)
            );
        }
    }

    #[test]
    fn test_flash_translation() {
        assert_eq!(
            translate(MemoryType::Flash, V::DebugWire, false, Access::Read, 0x50),
            Ok((Avr8MemoryType::FlashPage, 0x50))
        );
        assert_eq!(
            translate(MemoryType::Flash, V::MegaJtag, false, Access::Read, 0x50),
            Ok((Avr8MemoryType::Spm, 0x50))
        );
        assert_eq!(
            translate(MemoryType::Flash, V::MegaJtag, true, Access::Read, 0x50),
            Ok((Avr8MemoryType::FlashPage, 0x50))
        );
        assert_eq!(
            translate(MemoryType::Flash, V::MegaJtag, false, Access::Write, 0x50),
            Ok((Avr8MemoryType::FlashPage, 0x50))
        );
        assert_eq!(
            translate(MemoryType::Flash, V::XMega, true, Access::Write, 0x200),
            Ok((Avr8MemoryType::ApplFlash, 0x200))
        );
        assert_eq!(
            translate(MemoryType::Flash, V::XMega, true, Access::Write, 0x20100),
            Ok((Avr8MemoryType::BootFlash, 0x100))
        );
    }

    #[test]
    fn test_eeprom_translation() {
        assert_eq!(
            translate(MemoryType::Eeprom, V::MegaJtag, true, Access::Read, 0x10),
            Ok((Avr8MemoryType::EepromPage, 0x10))
        );
        assert_eq!(
            translate(MemoryType::Eeprom, V::MegaJtag, false, Access::Write, 0x10),
            Ok((Avr8MemoryType::Eeprom, 0x10))
        );
        assert_eq!(
            translate(MemoryType::Eeprom, V::XMega, false, Access::Read, 0x1010),
            Ok((Avr8MemoryType::Eeprom, 0x10))
        );
        assert_eq!(
            translate(MemoryType::Eeprom, V::XMega, false, Access::Write, 0x1010),
            Ok((Avr8MemoryType::EepromAtomic, 0x10))
        );
        assert_eq!(
            translate(MemoryType::Eeprom, V::Updi, false, Access::Write, 0x1410),
            Ok((Avr8MemoryType::EepromAtomic, 0x1410))
        );
        assert_eq!(
            translate(MemoryType::Eeprom, V::Updi, false, Access::Read, 0x1410),
            Ok((Avr8MemoryType::Eeprom, 0x1410))
        );
        assert_eq!(
            translate(MemoryType::Eeprom, V::DebugWire, false, Access::Write, 0x10),
            Ok((Avr8MemoryType::Eeprom, 0x10))
        );
    }

    #[test]
    fn test_fuses_translation() {
        assert_eq!(
            translate(MemoryType::Fuses, V::MegaJtag, true, Access::Read, 0x01),
            Ok((Avr8MemoryType::Fuses, 0x01))
        );
        assert_eq!(
            translate(MemoryType::Other, V::MegaJtag, true, Access::Read, 0x01),
            Err(Error::Unsupported)
        );
    }
}
