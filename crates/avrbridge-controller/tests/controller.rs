//! Target controller against the simulated EDBG probe

use std::collections::BTreeMap;
use std::time::Duration;

use avrbridge_controller::{
    Avr8Target, ControllerError, Event, EventBus, Rejection, TargetConfig, TargetControllerHandle,
    TargetControllerState,
};
use avrbridge_core::description::TargetDescriptionFile;
use avrbridge_core::memory::{MemoryAddressRange, MemoryType};
use avrbridge_core::register::{RegisterDescriptors, RegisterType};
use avrbridge_core::target::{
    BreakCause, IoDirection, IoState, PhysicalInterface, PinDescriptor, PinState, TargetState,
};
use avrbridge_core::Error;
use avrbridge_dummy::{
    atmega1284p_description, atmega328p_description, simulated_tool, AccessKind, ProbeHandle,
    SimulatedConfig,
};
use avrbridge_edbg::protocol::{
    Avr8MemoryType, AVR8_ERASE, AVR8_MEMORY_READ, AVR8_MEMORY_WRITE, HANDLER_AVR8_GENERIC,
};
use avrbridge_edbg::EdbgToolModel;

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

fn start(
    model: EdbgToolModel,
    simulated: SimulatedConfig,
    description: TargetDescriptionFile,
    config: TargetConfig,
) -> (TargetControllerHandle, ProbeHandle) {
    let (tool, probe) = simulated_tool(model, simulated);
    let target = Avr8Target::new(Box::new(tool), description, config).unwrap();
    let controller = TargetControllerHandle::start(target, EventBus::new()).unwrap();
    (controller, probe)
}

fn start_328p() -> (TargetControllerHandle, ProbeHandle) {
    start(
        EdbgToolModel::AtmelIce,
        SimulatedConfig::atmega328p(),
        atmega328p_description().unwrap(),
        TargetConfig::new(PhysicalInterface::DebugWire),
    )
}

fn avr8_commands(probe: &ProbeHandle) -> usize {
    probe
        .commands()
        .iter()
        .filter(|c| c.handler == HANDLER_AVR8_GENERIC)
        .count()
}

#[test]
fn test_activation_leaves_target_stopped() {
    let (controller, probe) = start_328p();
    let service = controller.service();

    assert!(probe.session_active());
    assert!(probe.is_attached());
    assert!(!probe.is_running());
    assert_eq!(service.target_state().unwrap(), TargetState::Stopped);
    assert_eq!(
        service.controller_state().unwrap(),
        TargetControllerState::Active
    );
    assert_eq!(service.program_counter().unwrap(), 0);

    let descriptor = service.target_descriptor().unwrap();
    assert_eq!(descriptor.name, "atmega328p");
}

#[test]
fn test_shutdown_releases_tool() {
    let (mut controller, probe) = start_328p();
    let service = controller.service();
    service.set_breakpoint(0x200).unwrap();

    controller.shutdown().unwrap();
    assert!(!probe.session_active());
    assert!(!probe.is_attached());
    assert!(probe.breakpoints().is_empty());
    assert!(matches!(
        service.target_state(),
        Err(ControllerError::ShutDown)
    ));
}

#[test]
fn test_partial_flash_page_write_is_widened() {
    let (controller, probe) = start_328p();
    let service = controller.service();

    let original: Vec<u8> = (0..0x80u32).map(|i| i as u8).collect();
    probe.set_flash(0, &original);

    // Flash writes are refused outside programming mode
    assert!(matches!(
        service.write_memory(MemoryType::Flash, 0x50, vec![0xAA; 10]),
        Err(ControllerError::Target(Error::ProgrammingModeRequired))
    ));

    service.enable_programming_mode().unwrap();
    probe.clear_log();
    service
        .write_memory(MemoryType::Flash, 0x50, vec![0xAA; 10])
        .unwrap();

    let accesses = probe.memory_accesses();
    assert_eq!(accesses.len(), 2);
    assert_eq!(
        (accesses[0].kind, accesses[0].memory_type, accesses[0].address, accesses[0].bytes),
        (AccessKind::Read, Avr8MemoryType::FlashPage, 0x00, 0x80)
    );
    assert_eq!(
        (accesses[1].kind, accesses[1].memory_type, accesses[1].address, accesses[1].bytes),
        (AccessKind::Write, Avr8MemoryType::FlashPage, 0x00, 0x80)
    );

    let flash = probe.flash();
    assert_eq!(&flash[..0x50], &original[..0x50]);
    assert_eq!(&flash[0x50..0x5A], &[0xAA; 10]);
    assert_eq!(&flash[0x5A..0x80], &original[0x5A..]);

    service.disable_programming_mode().unwrap();
}

#[test]
fn test_timed_out_command_is_dropped_unrun() {
    let (controller, probe) = start_328p();
    let service = controller.service();
    probe.clear_log();

    let impatient = controller.service().with_timeout(Duration::ZERO);
    assert!(matches!(
        impatient.write_memory(MemoryType::Ram, 0x100, vec![0xAA; 4]),
        Err(ControllerError::Timeout(_))
    ));
    // Queue order puts the expired write ahead of this read
    assert_eq!(
        service.read_memory(MemoryType::Ram, 0x100, 4, Vec::new()).unwrap(),
        vec![0; 4]
    );
    assert_eq!(probe.count(HANDLER_AVR8_GENERIC, AVR8_MEMORY_WRITE), 0);
    assert_eq!(probe.data()[0x100..0x104], [0; 4]);
}

#[test]
fn test_running_target_rejects_without_io() {
    let (controller, probe) = start_328p();
    let service = controller.service();

    service.resume_target_execution(None, None).unwrap();
    assert!(probe.is_running());
    let before = avr8_commands(&probe);

    assert!(matches!(
        service.read_memory(MemoryType::Ram, 0x100, 4, Vec::new()),
        Err(ControllerError::Rejected(Rejection::TargetRunning))
    ));
    assert!(matches!(
        service.read_registers(RegisterDescriptors::new()),
        Err(ControllerError::Rejected(Rejection::TargetRunning))
    ));
    assert!(matches!(
        service.enable_programming_mode(),
        Err(ControllerError::Rejected(Rejection::TargetRunning))
    ));
    assert_eq!(avr8_commands(&probe), before);

    // Stopping is always allowed
    service.stop_target_execution().unwrap();
    assert!(!probe.is_running());
    assert_eq!(
        service.read_memory(MemoryType::Ram, 0x100, 4, Vec::new()).unwrap(),
        vec![0; 4]
    );
}

#[test]
fn test_programming_mode_rejects_ram_access() {
    let (controller, probe) = start(
        EdbgToolModel::AtmelIce,
        SimulatedConfig::atmega1284p(),
        atmega1284p_description().unwrap(),
        TargetConfig::new(PhysicalInterface::Jtag),
    );
    let service = controller.service();

    service.enable_programming_mode().unwrap();
    assert!(probe.programming_mode());
    let before = avr8_commands(&probe);

    assert!(matches!(
        service.read_memory(MemoryType::Ram, 0x100, 1, Vec::new()),
        Err(ControllerError::Rejected(Rejection::ProgrammingMode))
    ));
    assert!(matches!(
        service.step_target_execution(None),
        Err(ControllerError::Rejected(Rejection::ProgrammingMode))
    ));
    assert_eq!(avr8_commands(&probe), before);

    // Flash is reachable in programming mode
    service
        .write_memory(MemoryType::Flash, 0, vec![0x0C; 0x100])
        .unwrap();
    assert_eq!(&probe.flash()[..0x100], &[0x0C; 0x100][..]);

    service.disable_programming_mode().unwrap();
    assert!(!probe.programming_mode());
}

#[test]
fn test_masked_read_matches_zeroed_direct_read() {
    let (controller, probe) = start_328p();
    let service = controller.service();

    let pattern: Vec<u8> = (0..0x40u32).map(|i| 0x80 | i as u8).collect();
    probe.set_data(0x100, &pattern);

    let excluded = vec![MemoryAddressRange::new(0x110, 0x11F).unwrap()];
    let masked = service
        .read_memory(MemoryType::Ram, 0x100, 0x40, excluded)
        .unwrap();
    let mut direct = service
        .read_memory(MemoryType::Ram, 0x100, 0x40, Vec::new())
        .unwrap();
    direct[0x10..0x20].fill(0);

    assert_eq!(masked, direct);
    assert!(probe
        .memory_accesses()
        .iter()
        .any(|a| a.kind == AccessKind::MaskedRead));
}

#[test]
fn test_plain_ram_read_covers_ocd_data_register() {
    let (controller, probe) = start_328p();
    let service = controller.service();

    // OCDR sits at 0x51 in IO space, 0x71 in data space
    let pattern: Vec<u8> = (0..0x20u8).map(|i| 0x40 | i).collect();
    probe.set_data(0x60, &pattern);
    probe.clear_log();

    assert_eq!(
        service.read_memory(MemoryType::Ram, 0x60, 0x20, Vec::new()).unwrap(),
        pattern
    );
    assert!(probe
        .memory_accesses()
        .iter()
        .all(|a| a.kind != AccessKind::MaskedRead));
}

#[test]
fn test_chunked_write_matches_single_write() {
    let data: Vec<u8> = (0..200u32).map(|i| (i * 7) as u8).collect();

    let with_access_size = |size| {
        let mut config = TargetConfig::new(PhysicalInterface::DebugWire);
        config.max_memory_access_size = Some(size);
        start(
            EdbgToolModel::AtmelIce,
            SimulatedConfig::atmega328p(),
            atmega328p_description().unwrap(),
            config,
        )
    };
    let (whole, whole_probe) = with_access_size(0x200);
    let (chunked, chunked_probe) = with_access_size(16);

    for (controller, probe) in [(&whole, &whole_probe), (&chunked, &chunked_probe)] {
        probe.clear_log();
        controller
            .service()
            .write_memory(MemoryType::Ram, 0x200, data.clone())
            .unwrap();
        assert_eq!(
            controller
                .service()
                .read_memory(MemoryType::Ram, 0x200, 200, Vec::new())
                .unwrap(),
            data
        );
    }

    assert_eq!(whole_probe.count(HANDLER_AVR8_GENERIC, AVR8_MEMORY_WRITE), 1);
    assert_eq!(chunked_probe.count(HANDLER_AVR8_GENERIC, AVR8_MEMORY_WRITE), 13);
    assert_eq!(whole_probe.data(), chunked_probe.data());
}

#[test]
fn test_grouped_register_read_matches_individual_reads() {
    let (controller, probe) = start_328p();
    let service = controller.service();

    let registers: Vec<u8> = (0..32u8).map(|i| i.wrapping_mul(9)).collect();
    probe.set_data(0, &registers);
    probe.set_data(0x5D, &[0xFB, 0x08]);
    probe.set_data(0x5F, &[0x82]);

    let descriptors: RegisterDescriptors = service
        .target_descriptor()
        .unwrap()
        .register_descriptors
        .iter()
        .filter(|d| {
            matches!(
                d.register_type,
                RegisterType::GeneralPurpose | RegisterType::StackPointer | RegisterType::Status
            )
        })
        .cloned()
        .collect();
    assert_eq!(descriptors.len(), 34);

    let grouped: BTreeMap<_, _> = service
        .read_registers(descriptors.clone())
        .unwrap()
        .into_iter()
        .map(|r| (r.descriptor, r.value))
        .collect();

    for descriptor in &descriptors {
        let single = service
            .read_registers(RegisterDescriptors::from([descriptor.clone()]))
            .unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(grouped[descriptor], single[0].value, "{:?}", descriptor.name);
    }

    assert_eq!(service.stack_pointer().unwrap(), 0x08FB);
}

#[test]
fn test_breakpoint_stop_is_published() {
    let (controller, _probe) = start_328p();
    let service = controller.service();
    let events = controller.events().subscribe();

    service.set_breakpoint(0x100).unwrap();
    service.resume_target_execution(None, None).unwrap();

    assert_eq!(
        events.recv_timeout(EVENT_TIMEOUT).unwrap(),
        Event::TargetExecutionResumed
    );
    assert_eq!(
        events.recv_timeout(EVENT_TIMEOUT).unwrap(),
        Event::TargetExecutionStopped {
            program_counter: 0x100,
            cause: BreakCause::Breakpoint,
        }
    );
    assert_eq!(service.target_state().unwrap(), TargetState::Stopped);
    assert_eq!(service.program_counter().unwrap(), 0x100);
}

#[test]
fn test_writes_are_published() {
    let (controller, _probe) = start_328p();
    let service = controller.service();
    let events = controller.events().subscribe();

    service
        .write_memory(MemoryType::Eeprom, 0x10, vec![1, 2, 3])
        .unwrap();
    assert_eq!(
        events.recv_timeout(EVENT_TIMEOUT).unwrap(),
        Event::MemoryWrittenToTarget {
            memory_type: MemoryType::Eeprom,
            start: 0x10,
            size: 3,
        }
    );

    service.reset_target().unwrap();
    assert_eq!(events.recv_timeout(EVENT_TIMEOUT).unwrap(), Event::TargetReset);
}

#[test]
fn test_suspend_and_resume() {
    let (controller, probe) = start_328p();
    let service = controller.service();
    let events = controller.events().subscribe();

    service.suspend().unwrap();
    assert!(!probe.session_active());
    assert_eq!(
        events.recv_timeout(EVENT_TIMEOUT).unwrap(),
        Event::TargetControllerStateChanged {
            state: TargetControllerState::Suspended
        }
    );

    probe.clear_log();
    assert!(matches!(
        service.program_counter(),
        Err(ControllerError::Rejected(Rejection::Suspended))
    ));
    assert!(matches!(
        service.target_state(),
        Err(ControllerError::Rejected(Rejection::Suspended))
    ));
    assert!(probe.commands().is_empty());
    assert_eq!(
        service.controller_state().unwrap(),
        TargetControllerState::Suspended
    );

    service.resume().unwrap();
    assert!(probe.session_active());
    assert_eq!(service.target_state().unwrap(), TargetState::Stopped);
    assert_eq!(
        service.controller_state().unwrap(),
        TargetControllerState::Active
    );
}

#[test]
fn test_out_of_range_access_is_refused() {
    let (controller, probe) = start_328p();
    let service = controller.service();
    probe.clear_log();

    assert!(matches!(
        service.read_memory(MemoryType::Ram, 0x8F0, 0x20, Vec::new()),
        Err(ControllerError::OutOfRange { .. })
    ));
    assert!(matches!(
        service.read_memory(MemoryType::Eeprom, 0x3FF, 2, Vec::new()),
        Err(ControllerError::OutOfRange { .. })
    ));
    assert!(probe.memory_accesses().is_empty());
}

#[test]
fn test_erase_memory() {
    let (controller, probe) = start_328p();
    let service = controller.service();

    probe.set_eeprom(0, &[0x00; 16]);
    service.erase_memory(MemoryType::Eeprom).unwrap();
    assert!(probe.eeprom().iter().all(|b| *b == 0xFF));

    // No flash erase over debugWire
    probe.set_flash(0, &[0x00; 4]);
    service.enable_programming_mode().unwrap();
    probe.clear_log();
    service.erase_memory(MemoryType::Flash).unwrap();
    assert!(probe.commands().is_empty());
    assert_eq!(&probe.flash()[..4], &[0x00; 4]);
}

#[test]
fn test_jtag_flash_erase_preserves_eeprom() {
    let (controller, probe) = start(
        EdbgToolModel::AtmelIce,
        SimulatedConfig::atmega1284p(),
        atmega1284p_description().unwrap(),
        TargetConfig::new(PhysicalInterface::Jtag),
    );
    let service = controller.service();

    probe.set_flash(0, &[0x12; 8]);
    probe.set_eeprom(0, &[0x34; 8]);

    service.enable_programming_mode().unwrap();
    service.erase_memory(MemoryType::Flash).unwrap();
    service.disable_programming_mode().unwrap();

    assert_eq!(probe.count(HANDLER_AVR8_GENERIC, AVR8_ERASE), 1);
    assert_eq!(&probe.flash()[..8], &[0xFF; 8]);
    assert_eq!(&probe.eeprom()[..8], &[0x34; 8]);
}

#[test]
fn test_pin_states() {
    let (controller, probe) = start_328p();
    let service = controller.service();

    // PB5 output driven high, PB0 input reading high
    probe.set_data(0x24, &[0x20]);
    probe.set_data(0x25, &[0x20]);
    probe.set_data(0x23, &[0x01]);
    probe.clear_log();

    let states = service.pin_states(0).unwrap();
    assert_eq!(
        states.get(&19),
        Some(&PinState {
            io_direction: Some(IoDirection::Output),
            io_state: Some(IoState::High),
        })
    );
    assert_eq!(
        states.get(&14),
        Some(&PinState {
            io_direction: Some(IoDirection::Input),
            io_state: Some(IoState::High),
        })
    );
    // GND is not a GPIO pad
    assert!(!states.contains_key(&8));
    // DDRB, PORTB and PINB are each read once
    assert_eq!(probe.count(HANDLER_AVR8_GENERIC, AVR8_MEMORY_READ), 3);

    let pb0 = PinDescriptor {
        number: 14,
        pad_name: "pb0".into(),
    };
    service
        .set_pin_state(
            0,
            pb0,
            PinState {
                io_direction: Some(IoDirection::Output),
                io_state: Some(IoState::High),
            },
        )
        .unwrap();
    assert_eq!(probe.data()[0x24], 0x21);
    assert_eq!(probe.data()[0x25], 0x21);

    // An input never keeps its pull-up
    let pb5 = PinDescriptor {
        number: 19,
        pad_name: "pb5".into(),
    };
    service
        .set_pin_state(
            0,
            pb5.clone(),
            PinState {
                io_direction: Some(IoDirection::Input),
                io_state: Some(IoState::High),
            },
        )
        .unwrap();
    assert_eq!(probe.data()[0x24], 0x01);
    assert_eq!(probe.data()[0x25], 0x01);

    assert!(matches!(
        service.set_pin_state(0, pb5, PinState::default()),
        Err(ControllerError::InvalidPinState)
    ));
}

#[test]
fn test_signature_mismatch_aborts_activation() {
    let mut simulated = SimulatedConfig::atmega328p();
    simulated.signature = [0x1E, 0x95, 0x14];
    let (tool, probe) = simulated_tool(EdbgToolModel::AtmelIce, simulated);
    let target = Avr8Target::new(
        Box::new(tool),
        atmega328p_description().unwrap(),
        TargetConfig::new(PhysicalInterface::DebugWire),
    )
    .unwrap();

    let result = TargetControllerHandle::start(target, EventBus::new());
    assert!(matches!(
        result,
        Err(ControllerError::Target(Error::SignatureMismatch { .. }))
    ));
    assert!(!probe.session_active());
    assert!(!probe.is_attached());
}

#[test]
fn test_debug_wire_failure_without_fuse_management() {
    let mut simulated = SimulatedConfig::atmega328p();
    simulated.fuses[1] = 0xD9;
    let (tool, probe) = simulated_tool(EdbgToolModel::XplainedPro, simulated);
    let target = Avr8Target::new(
        Box::new(tool),
        atmega328p_description().unwrap(),
        TargetConfig::new(PhysicalInterface::DebugWire),
    )
    .unwrap();

    let result = TargetControllerHandle::start(target, EventBus::new());
    assert!(matches!(
        result,
        Err(ControllerError::Target(Error::DebugWirePhysicalInterface { .. }))
    ));
    assert_eq!(probe.fuses()[1], 0xD9);
    assert!(!probe.session_active());
}

#[test]
fn test_debug_wire_recovery_programs_dwen() {
    let mut simulated = SimulatedConfig::atmega328p();
    simulated.fuses[1] = 0xD9;

    let mut config = TargetConfig::new(PhysicalInterface::DebugWire);
    config.manage_dwen_fuse_bit = true;
    config.target_power_cycle_delay = Duration::from_millis(1);

    let (controller, probe) = start(
        EdbgToolModel::XplainedPro,
        simulated,
        atmega328p_description().unwrap(),
        config,
    );

    assert_eq!(probe.fuses()[1], 0x99);
    assert_eq!(probe.power_cycles(), 1);
    assert!(!probe.isp_active());
    assert!(probe.is_attached());
    assert_eq!(
        controller.service().target_state().unwrap(),
        TargetState::Stopped
    );
}

#[test]
fn test_dwen_update_refused_with_lock_bits_set() {
    let mut simulated = SimulatedConfig::atmega328p();
    simulated.fuses[1] = 0xD9;
    simulated.lock_bits = 0xFC;

    let mut config = TargetConfig::new(PhysicalInterface::DebugWire);
    config.manage_dwen_fuse_bit = true;
    config.target_power_cycle_delay = Duration::from_millis(1);

    let (tool, probe) = simulated_tool(EdbgToolModel::XplainedPro, simulated);
    let target = Avr8Target::new(Box::new(tool), atmega328p_description().unwrap(), config).unwrap();

    assert!(matches!(
        TargetControllerHandle::start(target, EventBus::new()),
        Err(ControllerError::Target(Error::Fuse(_)))
    ));
    assert_eq!(probe.fuses()[1], 0xD9);
    assert!(!probe.isp_active());
    assert_eq!(probe.power_cycles(), 0);
}

#[test]
fn test_ocden_managed_for_jtag_session() {
    let mut config = TargetConfig::new(PhysicalInterface::Jtag);
    config.manage_ocden_fuse_bit = true;

    let (mut controller, probe) = start(
        EdbgToolModel::AtmelIce,
        SimulatedConfig::atmega1284p(),
        atmega1284p_description().unwrap(),
        config,
    );

    // OCDEN (0x80) programmed for the session
    assert_eq!(probe.fuses()[1], 0x19);
    assert!(!probe.programming_mode());

    controller.shutdown().unwrap();
    assert_eq!(probe.fuses()[1], 0x99);
    assert!(!probe.session_active());
}
