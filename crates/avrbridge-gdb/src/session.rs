//! One GDB debug session
//!
//! A session lives as long as its client connection. It turns command
//! packets into target controller calls and writes exactly one response per
//! command. `c` and `s` are answered later, by a stop reply once the
//! controller reports that the target stopped.
//!
//! Program memory is only written through the vFlash sequence:
//! `vFlashErase` enters programming mode and erases once, `vFlashWrite`
//! buffers data, and `vFlashDone` writes the buffer and leaves programming
//! mode.

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use avrbridge_controller::{Event, EventBus, TargetControllerService};
use avrbridge_core::description::TargetDescriptionFile;
use avrbridge_core::memory::MemoryType;
use avrbridge_core::register::{Register, RegisterDescriptor, RegisterDescriptors};
use avrbridge_core::target::BreakCause;
use crossbeam_channel::Receiver;

use crate::commands::{BreakpointKind, CommandPacket};
use crate::connection::{ClientInput, Connection};
use crate::descriptor::{
    gdb_register_size, GdbTargetDescriptor, EEPROM_OFFSET, RAM_OFFSET, REGISTER_COUNT,
};
use crate::error::{GdbError, Result};
use crate::hex;
use crate::monitor::{self, MonitorCommand};
use crate::packet::MAX_PACKET_SIZE;
use crate::svd;

/// How often a running target is checked for a stop while no input arrives
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Size of each console output packet carrying monitor output
const CONSOLE_CHUNK_SIZE: usize = 1024;

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Detached,
    Killed,
    Disconnected,
    Shutdown,
}

/// State of an in-progress vFlash sequence
#[derive(Debug, Default)]
struct FlashLoad {
    programming_mode: bool,
    erased: bool,
    segments: BTreeMap<u32, Vec<u8>>,
}

impl FlashLoad {
    /// Buffered data as contiguous runs
    fn runs(&mut self) -> Vec<(u32, Vec<u8>)> {
        let mut runs: Vec<(u32, Vec<u8>)> = Vec::new();
        for (address, data) in std::mem::take(&mut self.segments) {
            match runs.last_mut() {
                Some((start, run)) if *start as usize + run.len() == address as usize => {
                    run.extend_from_slice(&data)
                }
                _ => runs.push((address, data)),
            }
        }
        runs
    }
}

pub struct DebugSession {
    connection: Connection,
    service: TargetControllerService,
    bus: EventBus,
    events: Receiver<Event>,
    gdb: GdbTargetDescriptor,
    description: Arc<TargetDescriptionFile>,
    waiting_for_stop: bool,
    swbreak: bool,
    flash: FlashLoad,
}

impl DebugSession {
    pub fn new(
        connection: Connection,
        service: TargetControllerService,
        bus: EventBus,
        gdb: GdbTargetDescriptor,
        description: Arc<TargetDescriptionFile>,
    ) -> Self {
        let events = bus.subscribe();
        bus.publish(Event::DebugSessionStarted);
        Self {
            connection,
            service,
            bus,
            events,
            gdb,
            description,
            waiting_for_stop: false,
            swbreak: false,
            flash: FlashLoad::default(),
        }
    }

    /// Serve the client until it detaches, disconnects or shutdown is requested
    pub fn run(&mut self) -> Result<SessionEnd> {
        loop {
            let timeout = self.waiting_for_stop.then_some(STOP_POLL_INTERVAL);
            let input = match self.connection.read(timeout) {
                Ok(input) => input,
                Err(GdbError::ClientDisconnected) => return Ok(SessionEnd::Disconnected),
                Err(GdbError::Interrupted) => return Ok(SessionEnd::Shutdown),
                Err(e) => return Err(e),
            };

            match input {
                Some(ClientInput::Interrupt) => self.interrupt()?,
                Some(ClientInput::Command(payload)) => {
                    if let Some(end) = self.dispatch(&payload)? {
                        return Ok(end);
                    }
                }
                None => {}
            }

            if self.waiting_for_stop {
                self.check_for_stop()?;
            }
        }
    }

    fn dispatch(&mut self, payload: &[u8]) -> Result<Option<SessionEnd>> {
        let packet = match CommandPacket::parse(payload) {
            Ok(packet) => packet,
            Err(e) => {
                log::error!("Failed to parse packet: {}", e);
                self.connection.write_response(b"E01")?;
                return Ok(None);
            }
        };

        let name = packet.name();
        log::debug!("Handling {} packet", name);
        match self.handle(packet) {
            Ok(end) => Ok(end),
            Err(e @ (GdbError::Io(_) | GdbError::ClientDisconnected | GdbError::Interrupted)) => {
                Err(e)
            }
            Err(e) => {
                log::error!("{} failed: {}", name, e);
                self.connection.write_response(b"E01")?;
                Ok(None)
            }
        }
    }

    fn reply(&mut self, payload: impl AsRef<[u8]>) -> Result<Option<SessionEnd>> {
        self.connection.write_response(payload.as_ref())?;
        Ok(None)
    }

    fn handle(&mut self, packet: CommandPacket) -> Result<Option<SessionEnd>> {
        match packet {
            CommandPacket::HaltReason => self.reply("S05"),
            CommandPacket::ReadRegisters => {
                let values = self.read_registers(self.gdb.register_descriptors())?;
                let mut out = Vec::new();
                for number in 0..REGISTER_COUNT {
                    let size = gdb_register_size(number);
                    let mut value = values.get(&number).cloned().unwrap_or_default();
                    value.resize(size, 0x00);
                    out.extend_from_slice(&value);
                }
                self.reply(hex::encode(&out))
            }
            CommandPacket::ReadRegister(number) => {
                let descriptor = self.gdb.register(number)?.clone();
                let values = self.read_registers([descriptor].into_iter().collect())?;
                let mut value = values.get(&number).cloned().unwrap_or_default();
                value.resize(gdb_register_size(number), 0x00);
                self.reply(hex::encode(&value))
            }
            CommandPacket::WriteRegisters(bytes) => {
                let mut registers = Vec::new();
                let mut offset = 0;
                for number in 0..REGISTER_COUNT {
                    let size = gdb_register_size(number);
                    let value = bytes
                        .get(offset..offset + size)
                        .ok_or_else(|| GdbError::malformed("register file too short"))?;
                    offset += size;
                    if let Ok(descriptor) = self.gdb.register(number) {
                        registers.push(self.register_value(descriptor.clone(), value));
                    }
                }
                self.service.write_registers(registers)?;
                self.reply("OK")
            }
            CommandPacket::WriteRegister { number, value } => {
                let descriptor = self.gdb.register(number)?.clone();
                let register = self.register_value(descriptor, &value);
                self.service.write_registers(vec![register])?;
                self.reply("OK")
            }
            CommandPacket::ReadMemory { address, length } => {
                let (memory_type, start) = self.gdb.translate(address, length)?;
                if length == 0 {
                    return self.reply("");
                }
                let data = self
                    .service
                    .read_memory(memory_type, start, length, Vec::new())?;
                self.reply(hex::encode(&data))
            }
            CommandPacket::WriteMemory { address, data } => {
                let (memory_type, start) = self.gdb.translate(address, data.len() as u32)?;
                if memory_type == MemoryType::Flash {
                    return Err(GdbError::FlashWriteOutsideLoad);
                }
                if !data.is_empty() {
                    self.service.write_memory(memory_type, start, data)?;
                }
                self.reply("OK")
            }
            CommandPacket::InsertBreakpoint { kind, address } => {
                if kind == BreakpointKind::Hardware {
                    log::debug!("Hardware breakpoint at 0x{:X} set as software breakpoint", address);
                }
                self.service.set_breakpoint(address)?;
                self.reply("OK")
            }
            CommandPacket::RemoveBreakpoint { address, .. } => {
                self.service.remove_breakpoint(address)?;
                self.reply("OK")
            }
            CommandPacket::Continue { address } => {
                self.drain_events();
                self.service.resume_target_execution(address, None)?;
                self.waiting_for_stop = true;
                Ok(None)
            }
            CommandPacket::Step { address } => {
                self.drain_events();
                self.service.step_target_execution(address)?;
                self.waiting_for_stop = true;
                Ok(None)
            }
            CommandPacket::Detach => {
                self.connection.write_response(b"OK")?;
                Ok(Some(SessionEnd::Detached))
            }
            CommandPacket::Kill => Ok(Some(SessionEnd::Killed)),
            CommandPacket::Supported(features) => {
                self.swbreak = features.iter().any(|f| f == "swbreak+");
                self.reply(format!(
                    "PacketSize={:x};swbreak+;qXfer:memory-map:read+",
                    MAX_PACKET_SIZE
                ))
            }
            CommandPacket::Attached => self.reply("1"),
            CommandPacket::Monitor(line) => self.monitor(&line),
            CommandPacket::MemoryMap { offset, length } => {
                let map = self.memory_map();
                let start = (offset as usize).min(map.len());
                let end = start.saturating_add(length as usize).min(map.len());
                let marker = if end == map.len() { 'l' } else { 'm' };
                self.reply(format!("{}{}", marker, &map[start..end]))
            }
            CommandPacket::FlashErase { address, length } => {
                self.gdb.translate(address, length)?;
                self.enter_programming_mode()?;
                if !self.flash.erased {
                    log::info!("Erasing program memory");
                    self.service.erase_memory(MemoryType::Flash)?;
                    self.flash.erased = true;
                }
                self.reply("OK")
            }
            CommandPacket::FlashWrite { address, data } => {
                self.gdb.translate(address, data.len() as u32)?;
                self.enter_programming_mode()?;
                self.flash.segments.insert(address, data);
                self.reply("OK")
            }
            CommandPacket::FlashDone => {
                let result = self.write_flash();
                let left = self.leave_programming_mode();
                result?;
                left?;
                self.reply("OK")
            }
            CommandPacket::MustReplyEmpty => self.reply(""),
            CommandPacket::Unsupported(command) => {
                log::debug!("Unsupported packet: {}", command);
                self.reply("")
            }
        }
    }

    /// Register values keyed by GDB number, least significant byte first
    fn read_registers(&self, descriptors: RegisterDescriptors) -> Result<BTreeMap<u32, Vec<u8>>> {
        let registers = self.service.read_registers(descriptors)?;
        Ok(registers
            .iter()
            .filter_map(|register| {
                self.gdb
                    .register_number(&register.descriptor)
                    .map(|number| (number, register.value_lsb_first()))
            })
            .collect())
    }

    /// Convert a least significant byte first GDB value to a register value
    fn register_value(&self, descriptor: RegisterDescriptor, value: &[u8]) -> Register {
        let size = (descriptor.size as usize).min(value.len());
        let mut bytes = value[..size].to_vec();
        bytes.reverse();
        Register::new(descriptor, bytes)
    }

    fn drain_events(&self) {
        while self.events.try_recv().is_ok() {}
    }

    fn check_for_stop(&mut self) -> Result<()> {
        while let Ok(event) = self.events.try_recv() {
            if let Event::TargetExecutionStopped {
                program_counter,
                cause,
            } = event
            {
                log::debug!("Target stopped at 0x{:X}", program_counter);
                self.waiting_for_stop = false;
                let reply = if cause == BreakCause::Breakpoint && self.swbreak {
                    "T05swbreak:;"
                } else {
                    "T05"
                };
                self.connection.write_response(reply.as_bytes())?;
                break;
            }
        }
        Ok(())
    }

    fn interrupt(&mut self) -> Result<()> {
        log::debug!("Interrupt requested");
        if let Err(e) = self.service.stop_target_execution() {
            log::error!("Failed to stop target: {}", e);
            return self.connection.write_response(b"E01");
        }
        self.waiting_for_stop = false;
        self.connection.write_response(b"S05")
    }

    fn enter_programming_mode(&mut self) -> Result<()> {
        if !self.flash.programming_mode {
            self.service.enable_programming_mode()?;
            self.flash.programming_mode = true;
        }
        Ok(())
    }

    fn leave_programming_mode(&mut self) -> Result<()> {
        let was_enabled = self.flash.programming_mode;
        self.flash = FlashLoad::default();
        if was_enabled {
            self.service.disable_programming_mode()?;
        }
        Ok(())
    }

    fn write_flash(&mut self) -> Result<()> {
        for (start, data) in self.flash.runs() {
            log::info!("Writing {} bytes to program memory at 0x{:X}", data.len(), start);
            self.service.write_memory(MemoryType::Flash, start, data)?;
        }
        Ok(())
    }

    fn memory_map(&self) -> String {
        let mut map = String::from("<memory-map>\n");
        if let Some(flash) = self.gdb.target.memory(MemoryType::Flash) {
            map.push_str(&format!(
                "  <memory type=\"flash\" start=\"0x{:x}\" length=\"0x{:x}\">\n    <property name=\"blocksize\">0x{:x}</property>\n  </memory>\n",
                flash.address_range.start,
                flash.size(),
                flash.page_size.unwrap_or(2),
            ));
        }
        if let Some(ram) = self.gdb.target.memory(MemoryType::Ram) {
            map.push_str(&format!(
                "  <memory type=\"ram\" start=\"0x{:x}\" length=\"0x{:x}\"/>\n",
                RAM_OFFSET,
                ram.address_range.end + 1,
            ));
        }
        if let Some(eeprom) = self.gdb.target.memory(MemoryType::Eeprom) {
            map.push_str(&format!(
                "  <memory type=\"ram\" start=\"0x{:x}\" length=\"0x{:x}\"/>\n",
                EEPROM_OFFSET,
                eeprom.size(),
            ));
        }
        map.push_str("</memory-map>\n");
        map
    }

    fn console_output(&mut self, text: &str) -> Result<Option<SessionEnd>> {
        for chunk in text.as_bytes().chunks(CONSOLE_CHUNK_SIZE) {
            let packet = format!("O{}", hex::encode(chunk));
            self.connection.write_response(packet.as_bytes())?;
        }
        self.reply("OK")
    }

    fn monitor(&mut self, line: &str) -> Result<Option<SessionEnd>> {
        match MonitorCommand::parse(line)? {
            MonitorCommand::Help => self.reply(hex::encode(monitor::HELP_TEXT.as_bytes())),
            MonitorCommand::Version => self.reply(hex::encode(monitor::version_text().as_bytes())),
            MonitorCommand::VersionMachine => {
                self.reply(hex::encode(monitor::version_json().as_bytes()))
            }
            MonitorCommand::Reset => {
                log::warn!("Resetting target");
                self.service.reset_target()?;
                log::info!("Target reset complete");
                self.reply(hex::encode(monitor::RESET_COMPLETE.as_bytes()))
            }
            MonitorCommand::Svd { out } => {
                let document = svd::generate(&self.description);
                if out {
                    let path = std::env::current_dir()
                        .map_err(GdbError::SvdWrite)?
                        .join(format!("{}.svd", self.gdb.target.name.to_ascii_lowercase()));
                    fs::write(&path, document).map_err(GdbError::SvdWrite)?;
                    log::info!("SVD written to {}", path.display());
                    let message = format!("SVD output saved to {}\n", path.display());
                    self.reply(hex::encode(message.as_bytes()))
                } else {
                    self.console_output(&document)
                }
            }
            MonitorCommand::EepromFill { pattern } => {
                let eeprom = self
                    .gdb
                    .target
                    .memory(MemoryType::Eeprom)
                    .ok_or(GdbError::NoSuchMemory(MemoryType::Eeprom))?;
                let (start, size) = (eeprom.address_range.start, eeprom.size());
                let data = monitor::fill_buffer(&pattern, size as usize);
                self.service.write_memory(MemoryType::Eeprom, start, data)?;
                let message = format!(
                    "Filled {} bytes of EEPROM, with values: 0x{}\n",
                    size,
                    hex::encode(&pattern).to_ascii_uppercase()
                );
                self.reply(hex::encode(message.as_bytes()))
            }
            MonitorCommand::Unknown(command) => {
                let message = format!(
                    "Unknown monitor command '{}'. See 'monitor help' for supported commands.\n",
                    command
                );
                self.reply(hex::encode(message.as_bytes()))
            }
        }
    }
}

impl Drop for DebugSession {
    fn drop(&mut self) {
        if self.flash.programming_mode {
            log::warn!("Debug session ended during a program memory load");
            if let Err(e) = self.leave_programming_mode() {
                log::error!("Failed to disable programming mode: {}", e);
            }
        }
        self.bus.publish(Event::DebugSessionFinished);
    }
}
