//! avrbridge-edbg - Microchip EDBG debug tool support
//!
//! This crate drives EDBG based debug tools (Atmel-ICE, Power Debugger, the
//! on-board debuggers of Xplained, Curiosity and PICkit/Snap in AVR mode)
//! for AVR8 on-chip debugging.
//!
//! # Protocol Overview
//!
//! The tools enumerate as a USB HID device and speak CMSIS-DAP. AVR
//! debugging is tunnelled through three CMSIS-DAP vendor commands:
//!
//! - `AVR_CMD` (0x80) carries fragments of an EDBG command frame
//! - `AVR_RSP` (0x81) polls for fragments of the response frame
//! - `AVR_EVT` (0x82) polls for asynchronous events (break events)
//!
//! Each EDBG frame is addressed to a sub-protocol handler: housekeeping
//! (sessions, target power), AVRISP (fuses over ISP) or AVR8 generic
//! (everything else). Frames carry a 16 bit sequence id used to match
//! responses to commands.
//!
//! # Layers
//!
//! - [`HidTransport`]: blocking report I/O, implemented by [`EdbgDevice`]
//!   over nusb and by the simulated probe used in tests
//! - [`EdbgLink`]: framing, fragmentation and response correlation
//! - [`EdbgAvr8Interface`] and [`EdbgAvrIspInterface`]: the debug
//!   interfaces, sharing one link
//! - [`EdbgTool`]: a tool as a whole, implementing
//!   [`avrbridge_core::interface::DebugTool`]
//!
//! # Example
//!
//! ```no_run
//! use avrbridge_core::interface::DebugTool;
//! use avrbridge_edbg::{EdbgTool, EdbgToolModel};
//!
//! let mut tool = EdbgTool::open(EdbgToolModel::AtmelIce, None)?;
//! tool.init()?;
//! println!("Connected to {}", tool.name());
//! tool.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod avr8;
mod device;
mod error;
pub mod frame;
mod isp;
mod link;
pub mod protocol;
mod tool;

pub use avr8::{probe_memory_type, Access, EdbgAvr8Interface};
pub use device::{list_devices, EdbgDevice, EdbgDeviceInfo, EdbgToolModel, HidTransport};
pub use error::{EdbgError, Result};
pub use frame::AvrEvent;
pub use isp::EdbgAvrIspInterface;
pub use link::{EdbgLink, SharedLink};
pub use tool::{EdbgTargetPower, EdbgTool};
