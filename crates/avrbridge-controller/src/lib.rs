//! avrbridge-controller - Serializing AVR8 target controller
//!
//! The controller owns the debug tool. It runs on a dedicated thread, and
//! clients reach it through [`TargetControllerService`] handles that enqueue
//! [`Command`]s and wait for their results. Commands whose preconditions do
//! not hold (controller suspended, target running, programming mode on) are
//! refused before any I/O.
//!
//! [`Avr8Target`] holds the session logic: activation with signature
//! verification, debugWire recovery by programming DWEN over ISP, OCDEN
//! management for JTAG targets, memory range checks and GPIO pin access.
//!
//! # Example
//!
//! ```no_run
//! use avrbridge_controller::{Avr8Target, EventBus, TargetConfig, TargetControllerHandle};
//! use avrbridge_core::description::TargetDescriptionFile;
//! use avrbridge_core::memory::MemoryType;
//! use avrbridge_core::target::PhysicalInterface;
//! use avrbridge_edbg::{EdbgTool, EdbgToolModel};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tool = EdbgTool::open(EdbgToolModel::AtmelIce, None)?;
//! let description = TargetDescriptionFile::load("ATmega328P.atdf")?;
//! let target = Avr8Target::new(
//!     Box::new(tool),
//!     description,
//!     TargetConfig::new(PhysicalInterface::DebugWire),
//! )?;
//!
//! let controller = TargetControllerHandle::start(target, EventBus::new())?;
//! let service = controller.service();
//! let sram = service.read_memory(MemoryType::Ram, 0x100, 16, Vec::new())?;
//! println!("{:02X?}", sram);
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod error;
pub mod events;
pub mod queue;
pub mod service;
pub mod target;
pub mod worker;

pub use commands::{Command, Preconditions, Response};
pub use error::{ControllerError, Rejection, Result};
pub use events::{Event, EventBus};
pub use service::{TargetControllerService, DEFAULT_COMMAND_TIMEOUT};
pub use target::{target_descriptor, Avr8Target, TargetConfig};
pub use worker::{TargetControllerHandle, TargetControllerState};
