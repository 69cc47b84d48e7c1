//! AVR8 generic command payloads and response decoding
//!
//! Every command payload starts with the command id and a version byte.
//! Multi-byte fields are little endian.

use avrbridge_core::target::{PhysicalInterface, TargetSignature};

use crate::error::{EdbgError, Result};
use crate::frame::ResponseFrame;
use crate::protocol::*;

fn command(id: u8) -> Vec<u8> {
    vec![id, EDBG_PROTOCOL_VERSION]
}

pub fn set_parameter(parameter: Avr8Parameter, value: &[u8]) -> Vec<u8> {
    let mut payload = command(AVR8_SET_PARAMETER);
    payload.extend_from_slice(&[parameter.context, parameter.id, value.len() as u8]);
    payload.extend_from_slice(value);
    payload
}

pub fn get_parameter(parameter: Avr8Parameter, size: u8) -> Vec<u8> {
    let mut payload = command(AVR8_GET_PARAMETER);
    payload.extend_from_slice(&[parameter.context, parameter.id, size]);
    payload
}

pub fn activate_physical(apply_external_reset: bool) -> Vec<u8> {
    let mut payload = command(AVR8_ACTIVATE_PHYSICAL);
    payload.push(apply_external_reset as u8);
    payload
}

pub fn deactivate_physical() -> Vec<u8> {
    command(AVR8_DEACTIVATE_PHYSICAL)
}

pub fn get_id() -> Vec<u8> {
    command(AVR8_GET_ID)
}

pub fn attach(break_after_attach: bool) -> Vec<u8> {
    let mut payload = command(AVR8_ATTACH);
    payload.push(break_after_attach as u8);
    payload
}

pub fn detach() -> Vec<u8> {
    command(AVR8_DETACH)
}

pub fn enter_programming_mode() -> Vec<u8> {
    command(AVR8_PROG_MODE_ENTER)
}

pub fn leave_programming_mode() -> Vec<u8> {
    command(AVR8_PROG_MODE_LEAVE)
}

pub fn disable_debug_wire() -> Vec<u8> {
    command(AVR8_DISABLE_DEBUGWIRE)
}

pub fn erase(mode: Avr8EraseMode, address: u32) -> Vec<u8> {
    let mut payload = command(AVR8_ERASE);
    payload.push(mode as u8);
    payload.extend_from_slice(&address.to_le_bytes());
    payload
}

pub fn read_memory(memory_type: Avr8MemoryType, address: u32, bytes: u32) -> Vec<u8> {
    let mut payload = command(AVR8_MEMORY_READ);
    payload.push(memory_type as u8);
    payload.extend_from_slice(&address.to_le_bytes());
    payload.extend_from_slice(&bytes.to_le_bytes());
    payload
}

/// Masked read. Bit `n % 8` of mask byte `n / 8` selects whether byte `n`
/// is read; unselected bytes come back as zero.
pub fn read_memory_masked(
    memory_type: Avr8MemoryType,
    address: u32,
    bytes: u32,
    mask: &[u8],
) -> Vec<u8> {
    let mut payload = command(AVR8_MEMORY_READ_MASKED);
    payload.push(memory_type as u8);
    payload.extend_from_slice(&address.to_le_bytes());
    payload.extend_from_slice(&bytes.to_le_bytes());
    payload.extend_from_slice(mask);
    payload
}

pub fn write_memory(memory_type: Avr8MemoryType, address: u32, data: &[u8]) -> Vec<u8> {
    let mut payload = command(AVR8_MEMORY_WRITE);
    payload.push(memory_type as u8);
    payload.extend_from_slice(&address.to_le_bytes());
    payload.extend_from_slice(&(data.len() as u32).to_le_bytes());
    // Synchronous write
    payload.push(0x00);
    payload.extend_from_slice(data);
    payload
}

pub fn reset() -> Vec<u8> {
    let mut payload = command(AVR8_RESET);
    payload.push(0x01);
    payload
}

pub fn stop() -> Vec<u8> {
    let mut payload = command(AVR8_STOP);
    // Stop immediately
    payload.push(0x01);
    payload
}

pub fn run() -> Vec<u8> {
    command(AVR8_RUN)
}

pub fn run_to(word_address: u32) -> Vec<u8> {
    let mut payload = command(AVR8_RUN_TO_ADDRESS);
    payload.extend_from_slice(&word_address.to_le_bytes());
    payload
}

pub fn step() -> Vec<u8> {
    let mut payload = command(AVR8_STEP);
    // Instruction level, step into
    payload.extend_from_slice(&[0x01, 0x01]);
    payload
}

pub fn read_program_counter() -> Vec<u8> {
    command(AVR8_PC_READ)
}

pub fn write_program_counter(word_address: u32) -> Vec<u8> {
    let mut payload = command(AVR8_PC_WRITE);
    payload.extend_from_slice(&word_address.to_le_bytes());
    payload
}

pub fn set_software_breakpoint(address: u32) -> Vec<u8> {
    let mut payload = command(AVR8_SW_BREAK_SET);
    payload.extend_from_slice(&address.to_le_bytes());
    payload
}

pub fn clear_software_breakpoint(address: u32) -> Vec<u8> {
    let mut payload = command(AVR8_SW_BREAK_CLEAR);
    payload.extend_from_slice(&address.to_le_bytes());
    payload
}

pub fn clear_all_software_breakpoints() -> Vec<u8> {
    command(AVR8_SW_BREAK_CLEAR_ALL)
}

/// Build a masked read mask for `bytes` bytes at `address`
pub fn read_mask(address: u32, bytes: u32, excluded: impl Fn(u32) -> bool) -> Vec<u8> {
    let mut mask = vec![0u8; (bytes as usize).div_ceil(8)];
    for index in 0..bytes {
        if !excluded(address + index) {
            mask[index as usize / 8] |= 1 << (index % 8);
        }
    }
    mask
}

fn unexpected(response: &ResponseFrame, expected: &str) -> EdbgError {
    EdbgError::InvalidResponse(format!(
        "expected {} response, got 0x{:02X}",
        expected,
        response.response_id()
    ))
}

pub fn expect_ok(response: &ResponseFrame) -> Result<()> {
    if response.response_id() != AVR8_RSP_OK {
        return Err(unexpected(response, "OK"));
    }
    Ok(())
}

/// Data of a DATA response, without the trailing status byte
pub fn response_data(response: &ResponseFrame) -> Result<&[u8]> {
    if response.response_id() != AVR8_RSP_DATA || response.payload.len() < 3 {
        return Err(unexpected(response, "DATA"));
    }
    Ok(&response.payload[2..response.payload.len() - 1])
}

/// Program counter of a PC response, as a byte address
pub fn response_program_counter(response: &ResponseFrame) -> Result<u32> {
    match response.payload.get(2..6) {
        Some(pc) if response.response_id() == AVR8_RSP_PC => {
            Ok(u32::from_le_bytes([pc[0], pc[1], pc[2], pc[3]]) * 2)
        }
        _ => Err(unexpected(response, "PC")),
    }
}

/// Extract the signature from a GET_ID response
///
/// debugWire returns the signature little endian in the last three of four
/// bytes. JTAG returns the 32 bit JTAG id, whose part number holds the last
/// two signature bytes. PDI returns the signature as is.
pub fn signature_from_device_id(
    data: &[u8],
    physical_interface: PhysicalInterface,
) -> Result<TargetSignature> {
    let short = || EdbgError::InvalidResponse(format!("device id too short: {:02X?}", data));

    match physical_interface {
        PhysicalInterface::DebugWire => {
            let id = data.get(..4).ok_or_else(short)?;
            Ok(TargetSignature::new(id[3], id[2], id[1]))
        }
        PhysicalInterface::Jtag => {
            let id = data.get(..4).ok_or_else(short)?;
            let jtag_id = u32::from_le_bytes([id[0], id[1], id[2], id[3]]);
            let part_number = (jtag_id >> 12) & 0xFFFF;
            Ok(TargetSignature::new(
                0x1E,
                (part_number >> 8) as u8,
                part_number as u8,
            ))
        }
        PhysicalInterface::Pdi | PhysicalInterface::Updi => {
            let id = data.get(..3).ok_or_else(short)?;
            Ok(TargetSignature::new(id[0], id[1], id[2]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(payload: &[u8]) -> ResponseFrame {
        ResponseFrame {
            sequence_id: 0,
            handler: HANDLER_AVR8_GENERIC,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_memory_command_layout() {
        assert_eq!(
            read_memory(Avr8MemoryType::FlashPage, 0x0100, 0x80),
            vec![0x21, 0x00, 0xB0, 0x00, 0x01, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00]
        );

        let write = write_memory(Avr8MemoryType::Sram, 0x0123, &[0xAA, 0xBB]);
        assert_eq!(&write[..12], &[0x23, 0x00, 0x20, 0x23, 0x01, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(&write[12..], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_set_parameter_layout() {
        let payload = set_parameter(params::PDI_CLOCK_SPEED, &4000u16.to_le_bytes());
        assert_eq!(payload, vec![0x01, 0x00, 0x01, 0x31, 0x02, 0xA0, 0x0F]);
    }

    #[test]
    fn test_read_mask_excludes_addresses() {
        let mask = read_mask(0x50, 10, |address| address == 0x51 || address == 0x59);
        assert_eq!(mask, vec![0b1111_1101, 0b0000_0001]);
    }

    #[test]
    fn test_response_decoding() {
        assert!(expect_ok(&response(&[0x80, 0x00])).is_ok());
        assert!(expect_ok(&response(&[0x84, 0x00, 0x00])).is_err());

        let data = response(&[0x84, 0x00, 0x01, 0x02, 0x03, 0x00]);
        assert_eq!(response_data(&data).unwrap(), &[0x01, 0x02, 0x03]);

        let pc = response(&[0x83, 0x00, 0x40, 0x00, 0x00, 0x00]);
        assert_eq!(response_program_counter(&pc).unwrap(), 0x80);
    }

    #[test]
    fn test_signature_extraction() {
        let dw = signature_from_device_id(&[0x00, 0x0F, 0x95, 0x1E], PhysicalInterface::DebugWire);
        assert_eq!(dw.unwrap(), TargetSignature::new(0x1E, 0x95, 0x0F));

        // ATmega1284P JTAG id 0x0970503F
        let jtag = signature_from_device_id(&0x0970_503Fu32.to_le_bytes(), PhysicalInterface::Jtag);
        assert_eq!(jtag.unwrap(), TargetSignature::new(0x1E, 0x97, 0x05));

        let pdi = signature_from_device_id(&[0x1E, 0x97, 0x4C], PhysicalInterface::Pdi);
        assert_eq!(pdi.unwrap(), TargetSignature::new(0x1E, 0x97, 0x4C));

        assert!(signature_from_device_id(&[0x1E], PhysicalInterface::DebugWire).is_err());
    }
}
