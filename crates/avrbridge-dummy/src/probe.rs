//! Report-level simulation of an EDBG tool
//!
//! [`SimulatedProbe`] implements [`HidTransport`], so the whole driver stack
//! (framing, fragmentation, sequence matching, event polling) runs against
//! it unchanged. Tests inspect and steer the simulation through a
//! [`ProbeHandle`].

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use avrbridge_edbg::protocol::*;
use avrbridge_edbg::{EdbgError, HidTransport};

use crate::target::{SimulatedConfig, SimulatedTarget};

/// A command as received by the simulated tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedCommand {
    /// Sub-protocol handler
    pub handler: u8,
    /// Command payload, starting with the command id
    pub payload: Vec<u8>,
}

/// Direction of a logged memory access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    MaskedRead,
    Write,
}

/// A memory command decoded from the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAccess {
    pub kind: AccessKind,
    pub memory_type: Avr8MemoryType,
    pub address: u32,
    pub bytes: u32,
}

impl LoggedCommand {
    /// Command id
    pub fn command_id(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// Decode an AVR8 memory command
    pub fn memory_access(&self) -> Option<MemoryAccess> {
        if self.handler != HANDLER_AVR8_GENERIC {
            return None;
        }
        let kind = match self.command_id()? {
            AVR8_MEMORY_READ => AccessKind::Read,
            AVR8_MEMORY_READ_MASKED => AccessKind::MaskedRead,
            AVR8_MEMORY_WRITE => AccessKind::Write,
            _ => return None,
        };
        let field = |offset: usize| {
            self.payload
                .get(offset..offset + 4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        };
        Some(MemoryAccess {
            kind,
            memory_type: Avr8MemoryType::from_u8(*self.payload.get(2)?)?,
            address: field(3)?,
            bytes: field(7)?,
        })
    }
}

#[derive(Debug)]
struct ProbeState {
    target: SimulatedTarget,
    /// Replies waiting to be read, one per written report
    replies: VecDeque<Vec<u8>>,
    command_buffer: Vec<u8>,
    response_fragments: VecDeque<Vec<u8>>,
    log: Vec<LoggedCommand>,
    reports_written: usize,
    failures: Vec<(u8, u8, u8)>,
}

impl ProbeState {
    fn report_size(&self) -> usize {
        self.target.config.report_size
    }

    fn handle_report(&mut self, report: &[u8]) -> Result<Vec<u8>, EdbgError> {
        match report.first().copied() {
            Some(CMSIS_DAP_AVR_CMD) => self.handle_command_fragment(report),
            Some(CMSIS_DAP_AVR_RSP) => Ok(self
                .response_fragments
                .pop_front()
                .unwrap_or_else(|| vec![CMSIS_DAP_AVR_RSP, 0x00, 0x00, 0x00])),
            Some(CMSIS_DAP_AVR_EVT) => {
                let mut reply = vec![CMSIS_DAP_AVR_EVT];
                match self.target.events.pop_front() {
                    Some(frame) => {
                        reply.extend_from_slice(&(frame.len() as u16).to_be_bytes());
                        reply.extend_from_slice(&frame);
                    }
                    None => reply.extend_from_slice(&[0x00, 0x00]),
                }
                Ok(reply)
            }
            _ => Err(EdbgError::InvalidResponse(format!(
                "simulated tool does not implement report {:02X?}",
                &report[..report.len().min(2)]
            ))),
        }
    }

    fn handle_command_fragment(&mut self, report: &[u8]) -> Result<Vec<u8>, EdbgError> {
        let malformed = || EdbgError::InvalidResponse("malformed AVR_CMD report".into());

        let fragment = *report.get(1).ok_or_else(malformed)?;
        let length = u16::from_be_bytes([
            *report.get(2).ok_or_else(malformed)?,
            *report.get(3).ok_or_else(malformed)?,
        ]) as usize;
        let data = report
            .get(AVR_CMD_HEADER_SIZE..AVR_CMD_HEADER_SIZE + length)
            .ok_or_else(malformed)?;

        let (number, total) = (fragment >> 4, fragment & 0x0F);
        if number == 1 {
            self.command_buffer.clear();
        }
        self.command_buffer.extend_from_slice(data);

        if number == total {
            let frame = std::mem::take(&mut self.command_buffer);
            self.process_frame(&frame)?;
        }

        Ok(vec![CMSIS_DAP_AVR_CMD, CMSIS_DAP_AVR_CMD_OK])
    }

    fn process_frame(&mut self, frame: &[u8]) -> Result<(), EdbgError> {
        if frame.len() < COMMAND_FRAME_HEADER_SIZE || frame[0] != EDBG_SOF {
            return Err(EdbgError::InvalidResponse(format!(
                "malformed command frame {:02X?}",
                frame
            )));
        }
        let sequence_id = [frame[2], frame[3]];
        let handler = frame[4];
        let payload = &frame[COMMAND_FRAME_HEADER_SIZE..];

        log::trace!("Simulated tool: handler 0x{:02X} {:02X?}", handler, payload);
        self.log.push(LoggedCommand {
            handler,
            payload: payload.to_vec(),
        });

        let command = payload.first().copied().unwrap_or_default();
        let injected = self
            .failures
            .iter()
            .position(|&(h, c, _)| h == handler && c == command)
            .map(|index| self.failures.remove(index).2);

        let response = match (injected, handler) {
            (Some(code), HANDLER_AVRISP) => vec![command, code],
            (Some(code), _) => vec![AVR8_RSP_FAILED, 0x00, code],
            (None, HANDLER_HOUSEKEEPING) => self.target.housekeeping(payload),
            (None, HANDLER_AVRISP) => self.target.isp(payload),
            (None, HANDLER_AVR8_GENERIC) => self.target.avr8(payload),
            (None, _) => vec![AVR8_RSP_FAILED, 0x00, AVR8_FAILURE_UNKNOWN],
        };

        let mut response_frame = vec![EDBG_SOF, sequence_id[0], sequence_id[1], handler];
        response_frame.extend_from_slice(&response);
        self.queue_response(&response_frame);
        Ok(())
    }

    fn queue_response(&mut self, frame: &[u8]) {
        let chunk_size = self.report_size() - AVR_RSP_HEADER_SIZE;
        let total = frame.len().div_ceil(chunk_size);
        for (index, chunk) in frame.chunks(chunk_size).enumerate() {
            let mut report = vec![CMSIS_DAP_AVR_RSP, (((index + 1) as u8) << 4) | total as u8];
            report.extend_from_slice(&(chunk.len() as u16).to_be_bytes());
            report.extend_from_slice(chunk);
            self.response_fragments.push_back(report);
        }
    }
}

/// Simulated EDBG tool with an attached AVR8 target
pub struct SimulatedProbe {
    state: Arc<Mutex<ProbeState>>,
}

/// Inspection and control handle for a [`SimulatedProbe`]
#[derive(Clone)]
pub struct ProbeHandle {
    state: Arc<Mutex<ProbeState>>,
}

fn lock(state: &Arc<Mutex<ProbeState>>) -> MutexGuard<'_, ProbeState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl SimulatedProbe {
    /// Create a probe with its target in the power-on state
    pub fn new(config: SimulatedConfig) -> Self {
        let state = ProbeState {
            target: SimulatedTarget::new(config),
            replies: VecDeque::new(),
            command_buffer: Vec::new(),
            response_fragments: VecDeque::new(),
            log: Vec::new(),
            reports_written: 0,
            failures: Vec::new(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// A handle sharing this probe's state
    pub fn handle(&self) -> ProbeHandle {
        ProbeHandle {
            state: self.state.clone(),
        }
    }
}

impl HidTransport for SimulatedProbe {
    fn report_size(&self) -> usize {
        lock(&self.state).report_size()
    }

    fn write_report(&mut self, report: &[u8]) -> avrbridge_edbg::Result<()> {
        let mut state = lock(&self.state);
        let report_size = state.report_size();
        if report.len() > report_size {
            return Err(EdbgError::TransferFailed(format!(
                "report of {} bytes exceeds {}",
                report.len(),
                report_size
            )));
        }

        state.reports_written += 1;
        let mut reply = state.handle_report(report)?;
        reply.resize(report_size, 0x00);
        state.replies.push_back(reply);
        Ok(())
    }

    fn read_report(&mut self) -> avrbridge_edbg::Result<Vec<u8>> {
        lock(&self.state)
            .replies
            .pop_front()
            .ok_or(EdbgError::Timeout)
    }
}

impl ProbeHandle {
    /// Every command received so far
    pub fn commands(&self) -> Vec<LoggedCommand> {
        lock(&self.state).log.clone()
    }

    /// Number of received commands with the given handler and id
    pub fn count(&self, handler: u8, command: u8) -> usize {
        lock(&self.state)
            .log
            .iter()
            .filter(|c| c.handler == handler && c.command_id() == Some(command))
            .count()
    }

    /// Memory commands received so far
    pub fn memory_accesses(&self) -> Vec<MemoryAccess> {
        lock(&self.state)
            .log
            .iter()
            .filter_map(LoggedCommand::memory_access)
            .collect()
    }

    /// Forget logged commands
    pub fn clear_log(&self) {
        let mut state = lock(&self.state);
        state.log.clear();
        state.reports_written = 0;
    }

    /// Number of HID reports written to the tool
    pub fn reports_written(&self) -> usize {
        lock(&self.state).reports_written
    }

    /// Fail the next `command` sent to `handler` with `code`
    pub fn inject_failure(&self, handler: u8, command: u8, code: u8) {
        lock(&self.state).failures.push((handler, command, code));
    }

    pub fn flash(&self) -> Vec<u8> {
        lock(&self.state).target.flash.clone()
    }

    pub fn set_flash(&self, address: usize, bytes: &[u8]) {
        lock(&self.state).target.flash[address..address + bytes.len()].copy_from_slice(bytes);
    }

    pub fn data(&self) -> Vec<u8> {
        lock(&self.state).target.data.clone()
    }

    pub fn set_data(&self, address: usize, bytes: &[u8]) {
        lock(&self.state).target.data[address..address + bytes.len()].copy_from_slice(bytes);
    }

    pub fn eeprom(&self) -> Vec<u8> {
        lock(&self.state).target.eeprom.clone()
    }

    pub fn set_eeprom(&self, address: usize, bytes: &[u8]) {
        lock(&self.state).target.eeprom[address..address + bytes.len()].copy_from_slice(bytes);
    }

    /// Low, high and extended fuse bytes
    pub fn fuses(&self) -> Vec<u8> {
        lock(&self.state).target.fuses.clone()
    }

    pub fn set_lock_bits(&self, value: u8) {
        lock(&self.state).target.lock_bits[0] = value;
    }

    pub fn breakpoints(&self) -> BTreeSet<u32> {
        lock(&self.state).target.breakpoints.clone()
    }

    /// Program counter as a byte address
    pub fn program_counter(&self) -> u32 {
        lock(&self.state).target.pc * 2
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).target.running
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.state).target.attached
    }

    pub fn programming_mode(&self) -> bool {
        lock(&self.state).target.programming_mode
    }

    pub fn session_active(&self) -> bool {
        lock(&self.state).target.session_active
    }

    pub fn isp_active(&self) -> bool {
        lock(&self.state).target.isp_active
    }

    /// Number of off/on target power transitions
    pub fn power_cycles(&self) -> usize {
        lock(&self.state).target.power_cycles
    }

    /// Queue a break event at a byte address, as if the target hit a breakpoint
    pub fn trigger_break(&self, address: u32) {
        let mut state = lock(&self.state);
        state.target.pc = address / 2;
        let mut frame = vec![EDBG_SOF, 0x00, 0x00, HANDLER_AVR8_GENERIC, AVR8_EVT_BREAK];
        frame.extend_from_slice(&state.target.pc.to_le_bytes());
        frame.push(AVR8_BREAK_CAUSE_PROGRAM_BREAKPOINT);
        state.target.running = false;
        state.target.events.push_back(frame);
    }
}

#[cfg(test)]
mod tests {
    use avrbridge_edbg::{AvrEvent, EdbgLink};

    use super::*;

    fn link() -> (EdbgLink<SimulatedProbe>, ProbeHandle) {
        let probe = SimulatedProbe::new(SimulatedConfig::default());
        let handle = probe.handle();
        (EdbgLink::new(probe), handle)
    }

    fn avr8(link: &mut EdbgLink<SimulatedProbe>, payload: &[u8]) -> Vec<u8> {
        link.send_command(HANDLER_AVR8_GENERIC, payload)
            .unwrap()
            .payload
    }

    fn attach_debug_wire(link: &mut EdbgLink<SimulatedProbe>) {
        avr8(link, &[AVR8_SET_PARAMETER, 0, 0x01, 0x00, 0x01, AVR8_PHY_INTERFACE_DEBUG_WIRE]);
        avr8(link, &[AVR8_ACTIVATE_PHYSICAL, 0, 0]);
        avr8(link, &[AVR8_ATTACH, 0, 1]);
    }

    #[test]
    fn test_session_and_power() {
        let (mut link, handle) = link();
        link.send_command(HANDLER_HOUSEKEEPING, &[HOUSEKEEPING_START_SESSION, 0])
            .unwrap();
        assert!(handle.session_active());

        let power = |on| [HOUSEKEEPING_SET, 0, 0x00, 0x10, 0x01, on];
        link.send_command(HANDLER_HOUSEKEEPING, &power(0)).unwrap();
        link.send_command(HANDLER_HOUSEKEEPING, &power(1)).unwrap();
        assert_eq!(handle.power_cycles(), 1);
    }

    #[test]
    fn test_attach_queues_break_event() {
        let (mut link, handle) = link();
        attach_debug_wire(&mut link);

        assert!(handle.is_attached());
        assert!(matches!(
            link.poll_event().unwrap(),
            Some(AvrEvent::Break { pc: 0, .. })
        ));
        assert_eq!(link.poll_event().unwrap(), None);
    }

    #[test]
    fn test_large_response_is_fragmented() {
        let (mut link, handle) = link();
        attach_debug_wire(&mut link);
        handle.set_flash(0x100, &[0xAA; 128]);

        let mut read = vec![AVR8_MEMORY_READ, 0, Avr8MemoryType::FlashPage as u8];
        read.extend_from_slice(&0x100u32.to_le_bytes());
        read.extend_from_slice(&128u32.to_le_bytes());
        let payload = avr8(&mut link, &read);

        assert_eq!(payload.len(), 2 + 128 + 1);
        assert!(payload[2..130].iter().all(|b| *b == 0xAA));
    }

    #[test]
    fn test_paged_access_must_be_aligned() {
        let (mut link, _) = link();
        attach_debug_wire(&mut link);

        let mut read = vec![AVR8_MEMORY_READ, 0, Avr8MemoryType::FlashPage as u8];
        read.extend_from_slice(&0x50u32.to_le_bytes());
        read.extend_from_slice(&10u32.to_le_bytes());
        let result = link.send_command(HANDLER_AVR8_GENERIC, &read);

        assert!(matches!(
            result,
            Err(EdbgError::CommandFailed {
                code: AVR8_FAILURE_INVALID_ALIGNMENT,
                ..
            })
        ));
    }

    #[test]
    fn test_debug_wire_requires_dwen() {
        let mut config = SimulatedConfig::default();
        config.fuses[1] = 0xD9;
        let mut link = EdbgLink::new(SimulatedProbe::new(config));

        avr8(&mut link, &[AVR8_SET_PARAMETER, 0, 0x01, 0x00, 0x01, AVR8_PHY_INTERFACE_DEBUG_WIRE]);
        let result = link.send_command(HANDLER_AVR8_GENERIC, &[AVR8_ACTIVATE_PHYSICAL, 0, 0]);
        assert!(matches!(
            result,
            Err(EdbgError::CommandFailed {
                code: AVR8_FAILURE_DW_PHY_ERROR,
                ..
            })
        ));
    }

    #[test]
    fn test_injected_failure_fires_once() {
        let (mut link, handle) = link();
        handle.inject_failure(HANDLER_AVR8_GENERIC, AVR8_ACTIVATE_PHYSICAL, 0x20);

        assert!(link
            .send_command(HANDLER_AVR8_GENERIC, &[AVR8_ACTIVATE_PHYSICAL, 0, 0])
            .is_err());
        assert!(link
            .send_command(HANDLER_AVR8_GENERIC, &[AVR8_ACTIVATE_PHYSICAL, 0, 0])
            .is_ok());
        assert_eq!(handle.count(HANDLER_AVR8_GENERIC, AVR8_ACTIVATE_PHYSICAL), 2);
    }

    #[test]
    fn test_run_stops_at_breakpoint() {
        let (mut link, handle) = link();
        attach_debug_wire(&mut link);
        link.clear_events().unwrap();

        let mut set = vec![AVR8_SW_BREAK_SET, 0];
        set.extend_from_slice(&0x0120u32.to_le_bytes());
        avr8(&mut link, &set);
        avr8(&mut link, &[AVR8_RUN, 0]);

        assert!(matches!(
            link.poll_event().unwrap(),
            Some(AvrEvent::Break { pc: 0x0120, .. })
        ));
        assert_eq!(handle.program_counter(), 0x0120);
        assert!(!handle.is_running());
    }

    #[test]
    fn test_isp_fuse_access() {
        let (mut link, handle) = link();
        let isp = |link: &mut EdbgLink<SimulatedProbe>, payload: &[u8]| {
            link.send_command(HANDLER_AVRISP, payload).unwrap().payload
        };

        assert_eq!(isp(&mut link, &[AVRISP_READ_FUSE, 4, 0x58, 0x08, 0, 0])[1], 0xC0);

        isp(&mut link, &[AVRISP_ENTER_PROGMODE, 0, 0, 0, 0, 0, 0, 0, 0xAC, 0x53, 0, 0]);
        assert_eq!(isp(&mut link, &[AVRISP_READ_FUSE, 4, 0x58, 0x08, 0, 0]), vec![0x18, 0, 0x99, 0]);

        isp(&mut link, &[AVRISP_PROGRAM_FUSE, 0xAC, 0xA8, 0x00, 0xD9]);
        assert_eq!(handle.fuses()[1], 0xD9);
    }
}
