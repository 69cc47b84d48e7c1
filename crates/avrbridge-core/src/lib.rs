//! avrbridge-core - Core types for AVR8 on-chip debugging
//!
//! This crate holds everything that is shared between the debug tool
//! drivers, the target controller and the GDB server:
//!
//! - the memory and register data model
//! - per-target parameters and the config variant resolution
//! - target description file (ATDF) parsing
//! - the debug tool traits implemented by tool drivers
//! - page alignment helpers
//!
//! # Example
//!
//! ```ignore
//! use avrbridge_core::description::TargetDescriptionFile;
//!
//! let tdf = TargetDescriptionFile::load("ATmega328P.atdf")?;
//! let params = tdf.target_parameters();
//! println!("flash: {:?} bytes", params.flash_size);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod align;
pub mod description;
pub mod error;
pub mod interface;
pub mod memory;
pub mod register;
pub mod target;

pub use error::{Error, Result};
