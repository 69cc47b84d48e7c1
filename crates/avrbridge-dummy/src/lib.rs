//! avrbridge-dummy - Simulated EDBG tool for testing
//!
//! This crate provides a debug tool that emulates an EDBG probe and its AVR8
//! target in memory, at the HID report level. It's useful for testing the
//! driver, the target controller and the GDB server without hardware.
//!
//! # Example
//!
//! ```
//! use avrbridge_core::interface::DebugTool;
//! use avrbridge_dummy::{simulated_tool, SimulatedConfig};
//! use avrbridge_edbg::EdbgToolModel;
//!
//! let (mut tool, probe) = simulated_tool(EdbgToolModel::AtmelIce, SimulatedConfig::atmega328p());
//! tool.init().unwrap();
//! assert!(probe.session_active());
//! ```

use std::path::PathBuf;

use avrbridge_core::description::{parse, DescriptionError, TargetDescriptionFile};
use avrbridge_edbg::{EdbgTool, EdbgToolModel};

mod probe;
mod target;

pub use probe::{AccessKind, LoggedCommand, MemoryAccess, ProbeHandle, SimulatedProbe};
pub use target::SimulatedConfig;

/// Description file matching [`SimulatedConfig::atmega328p`]
pub const ATMEGA328P_ATDF: &str = include_str!("../fixtures/ATmega328P.atdf");

/// Description file matching [`SimulatedConfig::atmega1284p`]
pub const ATMEGA1284P_ATDF: &str = include_str!("../fixtures/ATmega1284P.atdf");

/// Directory holding the bundled description files
pub fn fixtures_directory() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

/// Parsed ATmega328P description
pub fn atmega328p_description() -> Result<TargetDescriptionFile, DescriptionError> {
    parse(ATMEGA328P_ATDF)
}

/// Parsed ATmega1284P description
pub fn atmega1284p_description() -> Result<TargetDescriptionFile, DescriptionError> {
    parse(ATMEGA1284P_ATDF)
}

/// An EDBG tool driving a simulated probe, and the handle to inspect it
pub fn simulated_tool(
    model: EdbgToolModel,
    config: SimulatedConfig,
) -> (EdbgTool<SimulatedProbe>, ProbeHandle) {
    let probe = SimulatedProbe::new(config);
    let handle = probe.handle();
    (
        EdbgTool::new(model, probe, Some("SIM00000001".into())),
        handle,
    )
}

#[cfg(test)]
mod tests {
    use avrbridge_core::interface::{Avr8SessionConfig, DebugTool};
    use avrbridge_core::memory::MemoryType;
    use avrbridge_core::target::{PhysicalInterface, TargetSignature};

    use super::*;

    #[test]
    fn test_fixtures_parse() {
        let tdf = atmega328p_description().unwrap();
        assert_eq!(tdf.signature().unwrap(), TargetSignature::new(0x1E, 0x95, 0x0F));

        let tdf = atmega1284p_description().unwrap();
        assert_eq!(tdf.signature().unwrap(), TargetSignature::new(0x1E, 0x97, 0x05));
        assert!(tdf.physical_interfaces().contains(&PhysicalInterface::Jtag));
        assert!(tdf.ocden_fuse_bits_descriptor().is_some());

        assert!(fixtures_directory().join("ATmega328P.atdf").is_file());
    }

    #[test]
    fn test_debug_wire_session_through_driver() {
        let tdf = atmega328p_description().unwrap();
        let (mut tool, probe) =
            simulated_tool(EdbgToolModel::AtmelIce, SimulatedConfig::atmega328p());
        tool.init().unwrap();

        let avr8 = tool.avr8_debug_interface();
        avr8.configure(&Avr8SessionConfig::new(
            PhysicalInterface::DebugWire,
            tdf.family(),
        ))
        .unwrap();
        avr8.set_target_parameters(&tdf.target_parameters()).unwrap();
        avr8.init().unwrap();
        avr8.activate().unwrap();

        assert_eq!(avr8.device_id().unwrap(), TargetSignature::new(0x1E, 0x95, 0x0F));

        probe.set_data(0x100, &[1, 2, 3, 4]);
        assert_eq!(
            avr8.read_memory(MemoryType::Ram, 0x100, 4, &[]).unwrap(),
            vec![1, 2, 3, 4]
        );

        avr8.deactivate().unwrap();
        tool.close().unwrap();
        assert!(!probe.session_active());
    }
}
