//! AVRISP interface
//!
//! Fuse and lock bit access over the ISP (SPI) lines, used to manage the
//! DWEN fuse bit of debugWire targets. Commands follow STK500v2: each
//! payload carries the raw four byte serial programming instruction.

use avrbridge_core::interface::AvrIspInterface;
use avrbridge_core::target::{Fuse, FuseType, IspParameters, TargetSignature};
use avrbridge_core::{Error, Result};

use crate::device::HidTransport;
use crate::link::{lock, SharedLink};
use crate::protocol::*;

/// ISP interface of an EDBG tool
pub struct EdbgAvrIspInterface<T: HidTransport> {
    link: SharedLink<T>,
    parameters: IspParameters,
}

fn read_fuse_instruction(fuse_type: FuseType) -> [u8; 4] {
    match fuse_type {
        FuseType::Low => [0x50, 0x00, 0x00, 0x00],
        FuseType::High => [0x58, 0x08, 0x00, 0x00],
        FuseType::Extended => [0x50, 0x08, 0x00, 0x00],
    }
}

fn program_fuse_instruction(fuse: Fuse) -> [u8; 4] {
    match fuse.fuse_type {
        FuseType::Low => [0xAC, 0xA0, 0x00, fuse.value],
        FuseType::High => [0xAC, 0xA8, 0x00, fuse.value],
        FuseType::Extended => [0xAC, 0xA4, 0x00, fuse.value],
    }
}

impl<T: HidTransport> EdbgAvrIspInterface<T> {
    /// Create an interface on a shared link
    pub fn new(link: SharedLink<T>) -> Self {
        Self {
            link,
            parameters: IspParameters::default(),
        }
    }

    /// Send a command and return the response bytes after the status byte
    fn command(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let response = lock(&self.link).send_command(HANDLER_AVRISP, payload)?;

        let (Some(&id), Some(&status)) = (response.payload.first(), response.payload.get(1))
        else {
            return Err(Error::InvalidResponse);
        };
        if id != payload[0] {
            return Err(Error::InvalidResponse);
        }
        if status != AVRISP_STATUS_OK {
            log::debug!("AVRISP command 0x{:02X} failed with status 0x{:02X}", id, status);
            return Err(Error::CommandFailed { code: status });
        }

        Ok(response.payload[2..].to_vec())
    }

    fn read_byte(&self, payload: &[u8]) -> Result<u8> {
        self.command(payload)?
            .first()
            .copied()
            .ok_or(Error::InvalidResponse)
    }
}

impl<T: HidTransport> AvrIspInterface for EdbgAvrIspInterface<T> {
    fn set_isp_parameters(&mut self, parameters: &IspParameters) {
        self.parameters = *parameters;
    }

    fn activate(&mut self) -> Result<()> {
        let p = &self.parameters;
        let mut payload = vec![
            AVRISP_ENTER_PROGMODE,
            p.program_mode_timeout,
            p.program_mode_stabilization_delay,
            p.program_mode_command_execution_delay,
            p.program_mode_sync_loops,
            p.program_mode_byte_delay,
            p.program_mode_poll_value,
            p.program_mode_poll_index,
        ];
        payload.extend_from_slice(&ISP_PROGRAMMING_ENABLE);
        payload.extend_from_slice(&[0x00, 0x00]);

        self.command(&payload)?;
        log::debug!("ISP programming mode entered");
        Ok(())
    }

    fn deactivate(&mut self) -> Result<()> {
        self.command(&[
            AVRISP_LEAVE_PROGMODE,
            self.parameters.program_mode_pre_delay,
            self.parameters.program_mode_post_delay,
        ])?;
        log::debug!("ISP programming mode left");
        Ok(())
    }

    fn device_signature(&mut self) -> Result<TargetSignature> {
        let mut signature = [0u8; 3];
        for (index, byte) in signature.iter_mut().enumerate() {
            *byte = self.read_byte(&[
                AVRISP_READ_SIGNATURE,
                self.parameters.read_signature_poll_index,
                0x30,
                0x00,
                index as u8,
                0x00,
            ])?;
        }
        Ok(TargetSignature(signature))
    }

    fn read_fuse(&mut self, fuse_type: FuseType) -> Result<Fuse> {
        let mut payload = vec![AVRISP_READ_FUSE, self.parameters.read_fuse_poll_index];
        payload.extend_from_slice(&read_fuse_instruction(fuse_type));

        let value = self.read_byte(&payload)?;
        Ok(Fuse { fuse_type, value })
    }

    fn read_lock_bit_byte(&mut self) -> Result<u8> {
        self.read_byte(&[
            AVRISP_READ_LOCK,
            self.parameters.read_lock_poll_index,
            0x58,
            0x00,
            0x00,
            0x00,
        ])
    }

    fn program_fuse(&mut self, fuse: Fuse) -> Result<()> {
        log::warn!("Programming {:?} fuse byte to 0x{:02X}", fuse.fuse_type, fuse.value);

        let mut payload = vec![AVRISP_PROGRAM_FUSE];
        payload.extend_from_slice(&program_fuse_instruction(fuse));
        self.command(&payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fuse_instructions() {
        assert_eq!(read_fuse_instruction(FuseType::High), [0x58, 0x08, 0x00, 0x00]);
        assert_eq!(
            program_fuse_instruction(Fuse {
                fuse_type: FuseType::High,
                value: 0x99
            }),
            [0xAC, 0xA8, 0x00, 0x99]
        );
        assert_eq!(
            program_fuse_instruction(Fuse {
                fuse_type: FuseType::Extended,
                value: 0xFD
            })[1],
            0xA4
        );
    }
}
