//! GDB server against the simulated EDBG probe

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use avrbridge_controller::{
    Avr8Target, Event, EventBus, TargetConfig, TargetControllerHandle, TargetControllerState,
};
use avrbridge_core::description::TargetDescriptionFile;
use avrbridge_core::target::PhysicalInterface;
use avrbridge_dummy::{
    atmega1284p_description, atmega328p_description, simulated_tool, AccessKind, ProbeHandle,
    SimulatedConfig,
};
use avrbridge_edbg::protocol::{Avr8MemoryType, AVR8_ERASE, HANDLER_AVR8_GENERIC};
use avrbridge_edbg::EdbgToolModel;
use avrbridge_gdb::hex;
use avrbridge_gdb::monitor::RESET_COMPLETE;
use avrbridge_gdb::packet::frame;
use avrbridge_gdb::{GdbServer, ServerConfig, ShutdownNotifier};
use crossbeam_channel::Receiver;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimal RSP client
struct Client {
    stream: TcpStream,
}

impl Client {
    fn connect(address: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(address).unwrap();
        stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
        Self { stream }
    }

    fn read_byte(&mut self) -> u8 {
        let mut byte = [0u8; 1];
        self.stream.read_exact(&mut byte).unwrap();
        byte[0]
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    /// Send a command and wait for the server's acknowledgement
    fn send(&mut self, payload: &[u8]) {
        self.send_raw(&frame(payload));
        assert_eq!(self.read_byte(), b'+');
    }

    /// Read one response packet and acknowledge it
    fn receive(&mut self) -> String {
        while self.read_byte() != b'$' {}
        let mut body = Vec::new();
        loop {
            match self.read_byte() {
                b'#' => break,
                byte => body.push(byte),
            }
        }
        let checksum = [self.read_byte(), self.read_byte()];
        let expected = body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        assert_eq!(
            hex::decode_u32(&checksum).unwrap(),
            u32::from(expected),
            "bad checksum"
        );
        self.send_raw(b"+");
        String::from_utf8(body).unwrap()
    }

    fn command(&mut self, payload: &str) -> String {
        self.send(payload.as_bytes());
        self.receive()
    }

    /// Run a monitor command, returning its decoded output
    fn monitor(&mut self, line: &str) -> String {
        let reply = self.command(&format!("qRcmd,{}", hex::encode(line.as_bytes())));
        String::from_utf8(hex::decode(reply.as_bytes()).unwrap()).unwrap()
    }
}

struct Harness {
    client: Client,
    probe: ProbeHandle,
    controller: TargetControllerHandle,
    events: Receiver<Event>,
    address: std::net::SocketAddr,
    shutdown: Arc<ShutdownNotifier>,
    server: Option<JoinHandle<avrbridge_gdb::Result<()>>>,
}

impl Harness {
    fn start(
        simulated: SimulatedConfig,
        description: TargetDescriptionFile,
        interface: PhysicalInterface,
        release_post_debug_session: bool,
    ) -> Self {
        let (tool, probe) = simulated_tool(EdbgToolModel::AtmelIce, simulated);
        let target =
            Avr8Target::new(Box::new(tool), description.clone(), TargetConfig::new(interface))
                .unwrap();
        let bus = EventBus::new();
        let events = bus.subscribe();
        let controller = TargetControllerHandle::start(target, bus).unwrap();

        let shutdown = Arc::new(ShutdownNotifier::new().unwrap());
        let config = ServerConfig {
            port: 0,
            release_post_debug_session,
            ..ServerConfig::default()
        };
        let mut server = GdbServer::bind(
            config,
            controller.service(),
            controller.events().clone(),
            Arc::new(description),
            shutdown.clone(),
        )
        .unwrap();
        let address = server.local_addr().unwrap();
        let server = thread::spawn(move || server.run());

        Self {
            client: Client::connect(address),
            probe,
            controller,
            events,
            address,
            shutdown,
            server: Some(server),
        }
    }

    fn atmega328p() -> Self {
        Self::start(
            SimulatedConfig::atmega328p(),
            atmega328p_description().unwrap(),
            PhysicalInterface::DebugWire,
            false,
        )
    }

    fn atmega1284p() -> Self {
        Self::start(
            SimulatedConfig::atmega1284p(),
            atmega1284p_description().unwrap(),
            PhysicalInterface::Jtag,
            false,
        )
    }

    fn avr8_commands(&self) -> usize {
        self.probe
            .commands()
            .iter()
            .filter(|c| c.handler == HANDLER_AVR8_GENERIC)
            .count()
    }

    /// Events received so far, waiting briefly for stragglers
    fn collect_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.recv_timeout(Duration::from_millis(200)) {
            events.push(event);
        }
        events
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.notify().unwrap();
        if let Some(server) = self.server.take() {
            server.join().unwrap().unwrap();
        }
    }
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + IO_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_out_of_range_read_is_refused_without_probe_io() {
    let mut h = Harness::atmega328p();
    // Make sure the session is up before clearing the log
    assert_eq!(h.client.command("qAttached"), "1");
    h.probe.clear_log();

    // SRAM ends at 0x8FF, flash at 0x7FFF and EEPROM at 0x3FF
    assert_eq!(h.client.command("m8008fe,4"), "E01");
    assert_eq!(h.client.command("m7ffe,4"), "E01");
    assert_eq!(h.client.command("m810400,1"), "E01");
    assert_eq!(h.avr8_commands(), 0);

    // The session survives the errors
    assert_eq!(h.client.command("m8008fe,2").len(), 4);
}

#[test]
fn test_flash_load_sequence() {
    let mut h = Harness::atmega1284p();
    let image: Vec<u8> = (0..0x100u32).map(|i| (i * 7) as u8).collect();

    assert_eq!(h.client.command("vFlashErase:0,100"), "OK");

    let mut write = b"vFlashWrite:0:".to_vec();
    write.extend_from_slice(&image[..0x80]);
    h.client.send(&write);
    assert_eq!(h.client.receive(), "OK");

    let mut write = b"vFlashWrite:80:".to_vec();
    write.extend_from_slice(&image[0x80..]);
    h.client.send(&write);
    assert_eq!(h.client.receive(), "OK");

    assert!(h.probe.programming_mode());
    assert_eq!(h.client.command("vFlashDone"), "OK");
    assert!(!h.probe.programming_mode());

    assert_eq!(h.probe.count(HANDLER_AVR8_GENERIC, AVR8_ERASE), 1);
    let flash_writes: Vec<_> = h
        .probe
        .memory_accesses()
        .into_iter()
        .filter(|a| a.kind == AccessKind::Write && a.memory_type == Avr8MemoryType::FlashPage)
        .collect();
    assert_eq!(flash_writes.len(), 1);
    assert_eq!(flash_writes[0].address, 0);
    assert_eq!(flash_writes[0].bytes, 0x100);
    assert_eq!(&h.probe.flash()[..0x100], &image[..]);

    let events = h.collect_events();
    let enabled = events
        .iter()
        .position(|e| *e == Event::ProgrammingModeEnabled)
        .unwrap();
    let disabled = events
        .iter()
        .position(|e| *e == Event::ProgrammingModeDisabled)
        .unwrap();
    assert!(enabled < disabled);
    let flash_written = events
        .iter()
        .position(|e| matches!(e, Event::MemoryWrittenToTarget { start: 0, size: 0x100, .. }))
        .unwrap();
    assert!(enabled < flash_written && flash_written < disabled);
}

#[test]
fn test_memory_packets_reject_program_memory_writes() {
    let mut h = Harness::atmega328p();
    h.probe.set_flash(0, &[0x0C, 0x94]);

    assert_eq!(h.client.command("m0,2"), "0c94");
    assert_eq!(h.client.command("M0,2:0000"), "E01");
    assert_eq!(&h.probe.flash()[..2], &[0x0C, 0x94]);

    assert_eq!(h.client.command("M800100,2:beef"), "OK");
    assert_eq!(&h.probe.data()[0x100..0x102], &[0xBE, 0xEF]);
    assert_eq!(h.client.command("m800100,2"), "beef");

    // GDB addresses EEPROM relative to the EEPROM window
    assert_eq!(h.client.command("M810010,2:0102"), "OK");
    assert_eq!(&h.probe.eeprom()[0x10..0x12], &[0x01, 0x02]);

    // Binary writes, including the zero length probe GDB sends first
    assert_eq!(h.client.command("X800200,0:"), "OK");
    h.client.send(b"X800200,2:\x11\x22");
    assert_eq!(h.client.receive(), "OK");
    assert_eq!(&h.probe.data()[0x200..0x202], &[0x11, 0x22]);
}

#[test]
fn test_register_packets() {
    let mut h = Harness::atmega328p();

    // r0-r31, SREG, SP (2 bytes) and PC (4 bytes)
    let registers = h.client.command("g");
    assert_eq!(registers.len(), (32 + 1 + 2 + 4) * 2);

    assert_eq!(h.client.command("P5=5a"), "OK");
    assert_eq!(h.client.command("p5"), "5a");
    assert_eq!(h.probe.data()[5], 0x5A);

    // SP is sent least significant byte first
    assert_eq!(h.client.command("P21=fb08"), "OK");
    assert_eq!(h.client.command("p21"), "fb08");

    assert_eq!(h.client.command("P22=00010000"), "OK");
    assert_eq!(h.client.command("p22"), "00010000");
    assert_eq!(h.probe.program_counter(), 0x100);

    assert_eq!(h.client.command("p23"), "E01");
}

#[test]
fn test_breakpoint_stop_reply() {
    let mut h = Harness::atmega328p();

    let supported = h.client.command("qSupported:multiprocess+;swbreak+");
    assert!(supported.contains("PacketSize=1fff68"));
    assert!(supported.contains("swbreak+"));

    assert_eq!(h.client.command("Z0,100,2"), "OK");
    assert!(h.probe.breakpoints().contains(&0x100));

    h.client.send(b"c");
    assert_eq!(h.client.receive(), "T05swbreak:;");
    assert_eq!(h.client.command("p22"), "00010000");

    assert_eq!(h.client.command("z0,100,2"), "OK");
    assert!(h.probe.breakpoints().is_empty());

    h.client.send(b"s");
    assert_eq!(h.client.receive(), "T05");
}

#[test]
fn test_interrupt_stops_running_target() {
    let mut h = Harness::atmega328p();

    h.client.send(b"c");
    wait_for(|| h.probe.is_running());

    h.client.send_raw(&[0x03]);
    assert_eq!(h.client.receive(), "S05");
    assert!(!h.probe.is_running());
    assert_eq!(h.client.command("?"), "S05");
}

#[test]
fn test_framing_errors() {
    let mut h = Harness::atmega328p();

    h.client.send_raw(b"$g#00");
    assert_eq!(h.client.read_byte(), b'-');

    assert_eq!(h.client.command("vMustReplyEmpty"), "");
    assert_eq!(h.client.command("qTStatus"), "");
    assert_eq!(h.client.command("m800100"), "E01");

    // A '-' from the client repeats the last response
    h.client.send(b"qAttached");
    assert_eq!(h.client.receive(), "1");
    h.client.send_raw(b"-");
    assert_eq!(h.client.receive(), "1");
}

#[test]
fn test_oversized_packet_keeps_session() {
    let mut h = Harness::atmega328p();

    let mut packet = Vec::with_capacity(2_100_004);
    packet.push(b'$');
    packet.resize(2_100_001, b'a');
    packet.extend_from_slice(b"#00");
    h.client.send_raw(&packet);

    assert_eq!(h.client.read_byte(), b'+');
    assert_eq!(h.client.receive(), "E01");
    assert_eq!(h.client.command("qAttached"), "1");
}

#[test]
fn test_monitor_commands() {
    let mut h = Harness::atmega328p();

    assert!(h.client.monitor("help").contains("eeprom fill"));
    assert!(h.client.monitor("version").starts_with("avrbridge v"));

    let version: serde_json::Value =
        serde_json::from_str(&h.client.monitor("version machine")).unwrap();
    assert!(version["components"]["minor"].is_u64());

    assert_eq!(h.client.monitor("reset"), RESET_COMPLETE);
    assert_eq!(h.probe.program_counter(), 0);

    let filled = h.client.monitor("eeprom fill --value=0xA55A");
    assert!(filled.starts_with("Filled 1024 bytes of EEPROM"));
    assert!(h
        .probe
        .eeprom()
        .chunks(2)
        .all(|pair| pair == [0xA5, 0x5A]));

    assert!(h.client.monitor("bogus").starts_with("Unknown monitor command"));
}

#[test]
fn test_monitor_svd_streams_console_output() {
    let mut h = Harness::atmega328p();

    h.client.send(format!("qRcmd,{}", hex::encode(b"svd")).as_bytes());
    let mut document = Vec::new();
    loop {
        let packet = h.client.receive();
        if packet == "OK" {
            break;
        }
        let chunk = packet.strip_prefix('O').unwrap();
        document.extend(hex::decode(chunk.as_bytes()).unwrap());
    }

    let document = String::from_utf8(document).unwrap();
    assert!(document.contains("<name>ATMEGA328P</name>"));
    assert!(document.contains("<peripheral>"));
    assert!(document.trim_end().ends_with("</device>"));
}

#[test]
fn test_memory_map() {
    let mut h = Harness::atmega328p();

    let map = h.client.command("qXfer:memory-map:read::0,1000");
    assert!(map.starts_with("l<memory-map>"));
    assert!(map.contains("type=\"flash\" start=\"0x0\" length=\"0x8000\""));
    assert!(map.contains("<property name=\"blocksize\">0x80</property>"));

    let first = h.client.command("qXfer:memory-map:read::0,10");
    assert_eq!(first, "m<memory-map>\n  <");
}

#[test]
fn test_session_release_and_reacquire() {
    let mut h = Harness::start(
        SimulatedConfig::atmega328p(),
        atmega328p_description().unwrap(),
        PhysicalInterface::DebugWire,
        true,
    );
    let service = h.controller.service();

    assert_eq!(h.client.command("D"), "OK");
    wait_for(|| service.controller_state().unwrap() == TargetControllerState::Suspended);
    assert!(!h.probe.session_active());

    let events = h.collect_events();
    let started = events
        .iter()
        .position(|e| *e == Event::DebugSessionStarted)
        .unwrap();
    let finished = events
        .iter()
        .position(|e| *e == Event::DebugSessionFinished)
        .unwrap();
    assert!(started < finished);

    // A new client reacquires the tool
    h.client = Client::connect(h.address);
    assert_eq!(h.client.command("qAttached"), "1");
    assert_eq!(
        service.controller_state().unwrap(),
        TargetControllerState::Active
    );
    assert!(h.probe.session_active());
}
