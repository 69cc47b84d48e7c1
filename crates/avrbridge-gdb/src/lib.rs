//! avrbridge-gdb - GDB remote serial protocol server
//!
//! Serves avr-gdb (or any RSP client) on a TCP port and forwards its
//! requests to the target controller. One client is served at a time.
//!
//! ```no_run
//! use std::sync::Arc;
//! use avrbridge_gdb::{GdbServer, ServerConfig, ShutdownNotifier};
//! # fn serve(
//! #     controller: &avrbridge_controller::TargetControllerHandle,
//! #     description: avrbridge_core::description::TargetDescriptionFile,
//! # ) -> Result<(), avrbridge_gdb::GdbError> {
//! let shutdown = Arc::new(ShutdownNotifier::new()?);
//! let mut server = GdbServer::bind(
//!     ServerConfig::default(),
//!     controller.service(),
//!     controller.events().clone(),
//!     Arc::new(description),
//!     shutdown,
//! )?;
//! server.run()?;
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod connection;
pub mod descriptor;
pub mod error;
pub mod hex;
pub mod monitor;
pub mod notifier;
pub mod packet;
pub mod server;
pub mod session;
pub mod svd;

pub use error::{GdbError, Result};
pub use notifier::ShutdownNotifier;
pub use server::{GdbServer, ServerConfig, DEFAULT_PORT};
pub use session::{DebugSession, SessionEnd};
