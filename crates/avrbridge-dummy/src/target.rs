//! Simulated AVR8 target
//!
//! Executes decoded EDBG commands against an in-memory target. The checks
//! mirror the failure codes a real tool returns, so the driver's handling of
//! alignment, state and range errors is exercised.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use avrbridge_edbg::protocol::*;

const ISP_STATUS_CMD_FAILED: u8 = 0xC0;

/// Configuration of the simulated target
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// HID report size of the tool
    pub report_size: usize,
    /// Device signature
    pub signature: [u8; 3],
    /// Flash size in bytes
    pub flash_size: usize,
    /// Flash page size in bytes
    pub flash_page_size: u32,
    /// Size of the data space (registers, IO and SRAM)
    pub data_size: usize,
    /// EEPROM size in bytes
    pub eeprom_size: usize,
    /// EEPROM page size in bytes
    pub eeprom_page_size: u32,
    /// Low, high and extended fuse bytes
    pub fuses: [u8; 3],
    /// Lock bit byte
    pub lock_bits: u8,
    /// DWEN bit within the high fuse byte
    pub dwen_fuse_mask: u8,
    /// Whether the tool implements masked reads
    pub masked_read: bool,
    /// Number of software breakpoints the tool accepts
    pub max_breakpoints: usize,
}

impl SimulatedConfig {
    /// ATmega328P with DWEN programmed
    pub fn atmega328p() -> Self {
        Self {
            report_size: 64,
            signature: [0x1E, 0x95, 0x0F],
            flash_size: 0x8000,
            flash_page_size: 128,
            data_size: 0x900,
            eeprom_size: 0x400,
            eeprom_page_size: 4,
            fuses: [0xFF, 0x99, 0xFF],
            lock_bits: 0xFF,
            dwen_fuse_mask: 0x40,
            masked_read: true,
            max_breakpoints: 64,
        }
    }

    /// ATmega1284P with JTAGEN programmed and OCDEN unprogrammed
    pub fn atmega1284p() -> Self {
        Self {
            report_size: 512,
            signature: [0x1E, 0x97, 0x05],
            flash_size: 0x20000,
            flash_page_size: 256,
            data_size: 0x4100,
            eeprom_size: 0x1000,
            eeprom_page_size: 8,
            fuses: [0xFF, 0x99, 0xFF],
            lock_bits: 0xFF,
            dwen_fuse_mask: 0x00,
            masked_read: true,
            max_breakpoints: 64,
        }
    }
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self::atmega328p()
    }
}

/// In-memory AVR8 target and tool state
#[derive(Debug)]
pub struct SimulatedTarget {
    pub(crate) config: SimulatedConfig,
    pub(crate) flash: Vec<u8>,
    pub(crate) data: Vec<u8>,
    pub(crate) eeprom: Vec<u8>,
    pub(crate) fuses: Vec<u8>,
    pub(crate) lock_bits: Vec<u8>,
    pub(crate) signature: Vec<u8>,

    parameters: BTreeMap<(u8, u8), Vec<u8>>,
    pub(crate) breakpoints: BTreeSet<u32>,
    /// Program counter, word address
    pub(crate) pc: u32,

    pub(crate) session_active: bool,
    pub(crate) physical_active: bool,
    pub(crate) attached: bool,
    pub(crate) programming_mode: bool,
    pub(crate) running: bool,
    pub(crate) isp_active: bool,
    pub(crate) target_powered: bool,
    pub(crate) power_cycles: usize,
    /// DWEN as sampled at the last power-up
    dwen_latched: bool,

    pub(crate) events: VecDeque<Vec<u8>>,
}

fn ok() -> Vec<u8> {
    vec![AVR8_RSP_OK, 0x00]
}

fn failed(code: u8) -> Vec<u8> {
    vec![AVR8_RSP_FAILED, 0x00, code]
}

fn data(bytes: &[u8]) -> Vec<u8> {
    let mut payload = vec![AVR8_RSP_DATA, 0x00];
    payload.extend_from_slice(bytes);
    payload.push(0x00);
    payload
}

fn u32_at(bytes: &[u8], offset: usize) -> Option<u32> {
    let b = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

type Outcome = std::result::Result<Vec<u8>, u8>;

impl SimulatedTarget {
    pub(crate) fn new(config: SimulatedConfig) -> Self {
        let dwen_latched = config.fuses[1] & config.dwen_fuse_mask == 0;
        Self {
            flash: vec![0xFF; config.flash_size],
            data: vec![0x00; config.data_size],
            eeprom: vec![0xFF; config.eeprom_size],
            fuses: config.fuses.to_vec(),
            lock_bits: vec![config.lock_bits],
            signature: config.signature.to_vec(),
            parameters: BTreeMap::new(),
            breakpoints: BTreeSet::new(),
            pc: 0,
            session_active: false,
            physical_active: false,
            attached: false,
            programming_mode: false,
            running: true,
            isp_active: false,
            target_powered: true,
            power_cycles: 0,
            dwen_latched,
            events: VecDeque::new(),
            config,
        }
    }

    fn parameter_u8(&self, parameter: Avr8Parameter) -> Option<u8> {
        self.parameters
            .get(&(parameter.context, parameter.id))
            .and_then(|v| v.first().copied())
    }

    fn physical_interface(&self) -> Option<u8> {
        self.parameter_u8(params::PHYSICAL_INTERFACE)
    }

    fn queue_break(&mut self, cause: u8) {
        self.running = false;
        let mut frame = vec![EDBG_SOF, 0x00, 0x00, HANDLER_AVR8_GENERIC, AVR8_EVT_BREAK];
        frame.extend_from_slice(&self.pc.to_le_bytes());
        frame.push(cause);
        self.events.push_back(frame);
    }

    /// Execute a housekeeping command
    pub(crate) fn housekeeping(&mut self, payload: &[u8]) -> Vec<u8> {
        let hk_ok = vec![HOUSEKEEPING_OK, 0x00];
        match payload.first().copied() {
            Some(HOUSEKEEPING_START_SESSION) => {
                self.session_active = true;
                hk_ok
            }
            Some(HOUSEKEEPING_END_SESSION) => {
                self.session_active = false;
                hk_ok
            }
            Some(HOUSEKEEPING_SET)
                if payload.get(2..4)
                    == Some(&[HOUSEKEEPING_CONTEXT_ANALOG, HOUSEKEEPING_PARAM_TARGET_POWER]) =>
            {
                let on = payload.get(5).copied().unwrap_or(0) != 0;
                self.set_target_power(on);
                hk_ok
            }
            _ => vec![HOUSEKEEPING_FAILED, 0x00, AVR8_FAILURE_UNKNOWN],
        }
    }

    fn set_target_power(&mut self, on: bool) {
        if on && !self.target_powered {
            self.power_cycles += 1;
            self.dwen_latched = self.fuses[1] & self.config.dwen_fuse_mask == 0;
            self.running = true;
            self.pc = 0;
        }
        if !on {
            self.physical_active = false;
            self.attached = false;
            self.programming_mode = false;
        }
        self.target_powered = on;
        log::debug!("Simulated target power {}", if on { "on" } else { "off" });
    }

    /// Execute an AVRISP command
    pub(crate) fn isp(&mut self, payload: &[u8]) -> Vec<u8> {
        let Some(&command) = payload.first() else {
            return vec![0x00, ISP_STATUS_CMD_FAILED];
        };
        let reply = |status: u8, value: Option<u8>| {
            let mut reply = vec![command, status];
            if let Some(value) = value {
                reply.extend_from_slice(&[value, status]);
            }
            reply
        };

        if command != AVRISP_ENTER_PROGMODE && !self.isp_active {
            return reply(ISP_STATUS_CMD_FAILED, None);
        }

        match command {
            AVRISP_ENTER_PROGMODE => {
                self.isp_active = true;
                reply(AVRISP_STATUS_OK, None)
            }
            AVRISP_LEAVE_PROGMODE => {
                self.isp_active = false;
                reply(AVRISP_STATUS_OK, None)
            }
            AVRISP_READ_SIGNATURE => {
                let index = payload.get(4).copied().unwrap_or(0) as usize;
                match self.signature.get(index) {
                    Some(&byte) => reply(AVRISP_STATUS_OK, Some(byte)),
                    None => reply(ISP_STATUS_CMD_FAILED, None),
                }
            }
            AVRISP_READ_FUSE => match fuse_index(payload.get(2..4)) {
                Some(index) => reply(AVRISP_STATUS_OK, Some(self.fuses[index])),
                None => reply(ISP_STATUS_CMD_FAILED, None),
            },
            AVRISP_READ_LOCK => reply(AVRISP_STATUS_OK, Some(self.lock_bits[0])),
            AVRISP_PROGRAM_FUSE => {
                let index = match payload.get(2) {
                    Some(0xA0) => Some(0),
                    Some(0xA8) => Some(1),
                    Some(0xA4) => Some(2),
                    _ => None,
                };
                match (index, payload.get(4)) {
                    (Some(index), Some(&value)) => {
                        self.fuses[index] = value;
                        reply(AVRISP_STATUS_OK, None)
                    }
                    _ => reply(ISP_STATUS_CMD_FAILED, None),
                }
            }
            _ => reply(ISP_STATUS_CMD_FAILED, None),
        }
    }

    /// Execute an AVR8 generic command
    pub(crate) fn avr8(&mut self, payload: &[u8]) -> Vec<u8> {
        let Some(&command) = payload.first() else {
            return failed(AVR8_FAILURE_UNKNOWN);
        };
        let args = payload.get(2..).unwrap_or_default();

        match self.execute(command, args) {
            Ok(response) => response,
            Err(code) => {
                log::trace!("Simulated command 0x{:02X} failed with 0x{:02X}", command, code);
                failed(code)
            }
        }
    }

    fn require_physical(&self) -> std::result::Result<(), u8> {
        if !self.physical_active {
            return Err(AVR8_FAILURE_INVALID_PHYSICAL_STATE);
        }
        Ok(())
    }

    fn require_stopped(&self) -> std::result::Result<(), u8> {
        self.require_physical()?;
        if !self.attached {
            return Err(AVR8_FAILURE_NOT_ATTACHED);
        }
        if self.running {
            return Err(AVR8_FAILURE_ILLEGAL_STATE);
        }
        Ok(())
    }

    fn execute(&mut self, command: u8, args: &[u8]) -> Outcome {
        let invalid = AVR8_FAILURE_INVALID_SIZE;

        match command {
            AVR8_SET_PARAMETER => {
                let (context, id, len) = match args {
                    [context, id, len, ..] => (*context, *id, *len as usize),
                    _ => return Err(invalid),
                };
                let value = args.get(3..3 + len).ok_or(invalid)?;
                self.parameters.insert((context, id), value.to_vec());
                Ok(ok())
            }
            AVR8_GET_PARAMETER => {
                let (context, id, size) = match args {
                    [context, id, size, ..] => (*context, *id, *size as usize),
                    _ => return Err(invalid),
                };
                let mut value = self.parameters.get(&(context, id)).cloned().unwrap_or_default();
                value.resize(size, 0x00);
                Ok(data(&value))
            }
            AVR8_ACTIVATE_PHYSICAL => {
                if !self.target_powered {
                    return Err(AVR8_FAILURE_NO_TARGET_POWER);
                }
                if self.physical_interface() == Some(AVR8_PHY_INTERFACE_DEBUG_WIRE)
                    && !self.dwen_latched
                {
                    return Err(AVR8_FAILURE_DW_PHY_ERROR);
                }
                self.physical_active = true;
                Ok(ok())
            }
            AVR8_DEACTIVATE_PHYSICAL => {
                self.physical_active = false;
                self.attached = false;
                self.programming_mode = false;
                Ok(ok())
            }
            AVR8_GET_ID => {
                self.require_physical()?;
                Ok(data(&self.device_id()))
            }
            AVR8_ATTACH => {
                self.require_physical()?;
                self.attached = true;
                if args.first() == Some(&1) {
                    self.queue_break(0x00);
                }
                Ok(ok())
            }
            AVR8_DETACH => {
                self.attached = false;
                self.running = true;
                Ok(ok())
            }
            AVR8_PROG_MODE_ENTER => {
                self.require_physical()?;
                self.programming_mode = true;
                Ok(ok())
            }
            AVR8_PROG_MODE_LEAVE => {
                self.programming_mode = false;
                Ok(ok())
            }
            AVR8_DISABLE_DEBUGWIRE => {
                self.require_physical()?;
                self.physical_active = false;
                self.attached = false;
                Ok(ok())
            }
            AVR8_ERASE => {
                if !self.programming_mode {
                    return Err(AVR8_FAILURE_ILLEGAL_STATE);
                }
                self.erase(args.first().copied().ok_or(invalid)?);
                Ok(ok())
            }
            AVR8_MEMORY_READ => {
                let memory_type = args.first().copied().ok_or(invalid)?;
                let address = u32_at(args, 1).ok_or(invalid)?;
                let bytes = u32_at(args, 5).ok_or(invalid)?;
                let read = self.read(memory_type, address, bytes)?;
                Ok(data(&read))
            }
            AVR8_MEMORY_READ_MASKED => {
                if !self.config.masked_read {
                    return Err(AVR8_FAILURE_INVALID_MEMTYPE);
                }
                let memory_type = args.first().copied().ok_or(invalid)?;
                let address = u32_at(args, 1).ok_or(invalid)?;
                let bytes = u32_at(args, 5).ok_or(invalid)?;
                let mask = args.get(9..).unwrap_or_default();
                let mut read = self.read(memory_type, address, bytes)?;
                for (index, byte) in read.iter_mut().enumerate() {
                    let selected = mask
                        .get(index / 8)
                        .map_or(false, |m| m & (1 << (index % 8)) != 0);
                    if !selected {
                        *byte = 0x00;
                    }
                }
                Ok(data(&read))
            }
            AVR8_MEMORY_WRITE => {
                let memory_type = args.first().copied().ok_or(invalid)?;
                let address = u32_at(args, 1).ok_or(invalid)?;
                let bytes = u32_at(args, 5).ok_or(invalid)? as usize;
                let payload = args.get(10..10 + bytes).ok_or(invalid)?;
                self.write(memory_type, address, payload)?;
                Ok(ok())
            }
            AVR8_RESET => {
                self.require_physical()?;
                if !self.attached {
                    return Err(AVR8_FAILURE_NOT_ATTACHED);
                }
                self.pc = 0;
                self.queue_break(0x00);
                Ok(ok())
            }
            AVR8_STOP => {
                self.require_physical()?;
                if !self.attached {
                    return Err(AVR8_FAILURE_NOT_ATTACHED);
                }
                if self.running {
                    self.queue_break(0x00);
                }
                Ok(ok())
            }
            AVR8_RUN => {
                self.require_stopped()?;
                self.running = true;
                // Execution reaches the next breakpoint, wrapping around
                let pc_bytes = self.pc * 2;
                let next = self
                    .breakpoints
                    .range(pc_bytes + 1..)
                    .next()
                    .or_else(|| self.breakpoints.iter().next())
                    .copied();
                if let Some(address) = next {
                    self.pc = address / 2;
                    self.queue_break(AVR8_BREAK_CAUSE_PROGRAM_BREAKPOINT);
                }
                Ok(ok())
            }
            AVR8_RUN_TO_ADDRESS => {
                self.require_stopped()?;
                self.pc = u32_at(args, 0).ok_or(invalid)?;
                self.queue_break(0x00);
                Ok(ok())
            }
            AVR8_STEP => {
                self.require_stopped()?;
                self.pc += 1;
                self.queue_break(0x00);
                Ok(ok())
            }
            AVR8_PC_READ => {
                self.require_stopped()?;
                let mut response = vec![AVR8_RSP_PC, 0x00];
                response.extend_from_slice(&self.pc.to_le_bytes());
                Ok(response)
            }
            AVR8_PC_WRITE => {
                self.require_stopped()?;
                self.pc = u32_at(args, 0).ok_or(invalid)?;
                Ok(ok())
            }
            AVR8_SW_BREAK_SET => {
                self.require_physical()?;
                let address = u32_at(args, 0).ok_or(invalid)?;
                if self.breakpoints.len() >= self.config.max_breakpoints {
                    return Err(AVR8_FAILURE_TOO_MANY_BREAKPOINTS);
                }
                self.breakpoints.insert(address);
                Ok(ok())
            }
            AVR8_SW_BREAK_CLEAR => {
                let address = u32_at(args, 0).ok_or(invalid)?;
                self.breakpoints.remove(&address);
                Ok(ok())
            }
            AVR8_SW_BREAK_CLEAR_ALL => {
                self.breakpoints.clear();
                Ok(ok())
            }
            _ => Err(AVR8_FAILURE_UNKNOWN),
        }
    }

    fn device_id(&self) -> Vec<u8> {
        let [s0, s1, s2] = self.config.signature;
        match self.physical_interface() {
            Some(AVR8_PHY_INTERFACE_DEBUG_WIRE) => vec![0x00, s2, s1, s0],
            Some(AVR8_PHY_INTERFACE_JTAG) => {
                let part_number = (u32::from(s1) << 8) | u32::from(s2);
                ((part_number << 12) | 0x03F).to_le_bytes().to_vec()
            }
            _ => vec![s0, s1, s2],
        }
    }

    fn erase(&mut self, mode: u8) {
        let boot_start = self.boot_offset() as usize;
        match mode {
            m if m == Avr8EraseMode::Chip as u8 => {
                self.flash.fill(0xFF);
                self.eeprom.fill(0xFF);
            }
            m if m == Avr8EraseMode::ApplicationSection as u8 => {
                let end = boot_start.min(self.flash.len());
                if end > 0 {
                    self.flash[..end].fill(0xFF);
                } else {
                    self.flash.fill(0xFF);
                }
            }
            m if m == Avr8EraseMode::BootSection as u8 => {
                if boot_start > 0 && boot_start < self.flash.len() {
                    self.flash[boot_start..].fill(0xFF);
                }
            }
            _ => self.eeprom.fill(0xFF),
        }
    }

    /// Start of the boot section within the flash array
    fn boot_offset(&self) -> u32 {
        self.parameters
            .get(&(
                params::DEVICE_XMEGA_APPLICATION_BYTES.context,
                params::DEVICE_XMEGA_APPLICATION_BYTES.id,
            ))
            .and_then(|v| u32_at(v, 0))
            .unwrap_or(0)
    }

    fn check_access(&self, memory_type: Avr8MemoryType) -> std::result::Result<(), u8> {
        self.require_physical()?;
        if self.programming_mode {
            if memory_type == Avr8MemoryType::Sram {
                return Err(AVR8_FAILURE_ILLEGAL_STATE);
            }
            return Ok(());
        }
        self.require_stopped()
    }

    fn region(
        &mut self,
        memory_type: u8,
        address: u32,
        bytes: u32,
    ) -> std::result::Result<(&mut Vec<u8>, usize), u8> {
        let memory_type =
            Avr8MemoryType::from_u8(memory_type).ok_or(AVR8_FAILURE_INVALID_MEMTYPE)?;
        self.check_access(memory_type)?;

        let page_size = match memory_type {
            Avr8MemoryType::EepromPage | Avr8MemoryType::EepromAtomic => {
                Some(self.config.eeprom_page_size)
            }
            t if t.is_paged() => Some(self.config.flash_page_size),
            _ => None,
        };
        if let Some(page_size) = page_size.filter(|size| *size > 1) {
            if address % page_size != 0 || bytes % page_size != 0 {
                return Err(AVR8_FAILURE_INVALID_ALIGNMENT);
            }
        }

        let offset = if memory_type == Avr8MemoryType::BootFlash {
            self.boot_offset()
        } else {
            0
        };

        let region = match memory_type {
            Avr8MemoryType::Sram | Avr8MemoryType::RegisterFile => &mut self.data,
            Avr8MemoryType::FlashPage
            | Avr8MemoryType::Spm
            | Avr8MemoryType::ApplFlash
            | Avr8MemoryType::BootFlash => &mut self.flash,
            Avr8MemoryType::Eeprom | Avr8MemoryType::EepromPage | Avr8MemoryType::EepromAtomic => {
                &mut self.eeprom
            }
            Avr8MemoryType::Fuses => &mut self.fuses,
            Avr8MemoryType::LockBits => &mut self.lock_bits,
            Avr8MemoryType::Signature => &mut self.signature,
            _ => return Err(AVR8_FAILURE_INVALID_MEMTYPE),
        };

        let start = address.checked_add(offset).ok_or(AVR8_FAILURE_INVALID_ADDRESS)? as usize;
        if start + bytes as usize > region.len() {
            return Err(AVR8_FAILURE_INVALID_ADDRESS);
        }
        Ok((region, start))
    }

    fn read(&mut self, memory_type: u8, address: u32, bytes: u32) -> Outcome {
        let (region, start) = self.region(memory_type, address, bytes)?;
        Ok(region[start..start + bytes as usize].to_vec())
    }

    fn write(&mut self, memory_type: u8, address: u32, payload: &[u8]) -> std::result::Result<(), u8> {
        if memory_type == Avr8MemoryType::Signature as u8
            || memory_type == Avr8MemoryType::LockBits as u8
        {
            return Err(AVR8_FAILURE_INVALID_MEMTYPE);
        }
        let (region, start) = self.region(memory_type, address, payload.len() as u32)?;
        region[start..start + payload.len()].copy_from_slice(payload);
        Ok(())
    }
}

/// Fuse byte index from the second and third ISP instruction bytes
fn fuse_index(instruction: Option<&[u8]>) -> Option<usize> {
    match instruction? {
        [0x50, 0x00] => Some(0),
        [0x58, 0x08] => Some(1),
        [0x50, 0x08] => Some(2),
        _ => None,
    }
}
