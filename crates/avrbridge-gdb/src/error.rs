//! Error types for the GDB server

use avrbridge_controller::ControllerError;
use avrbridge_core::memory::MemoryType;
use thiserror::Error;

/// Errors raised while serving a GDB client
#[derive(Debug, Error)]
pub enum GdbError {
    /// Socket I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// poll(2) or eventfd failure
    #[error("system call failed: {0}")]
    Sys(#[from] nix::Error),

    /// The client closed the connection
    #[error("GDB client disconnected")]
    ClientDisconnected,

    /// The shutdown notifier fired while waiting for I/O
    #[error("interrupted by shutdown request")]
    Interrupted,

    /// A packet could not be parsed
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// A register number outside the avr-gdb register file
    #[error("unknown GDB register number {0}")]
    UnknownRegister(u32),

    /// The access falls outside the target's memory
    #[error("{memory_type} access at 0x{start:X} ({bytes} bytes) is out of range")]
    OutOfRange {
        memory_type: MemoryType,
        start: u32,
        bytes: u32,
    },

    /// The target has no memory of the requested type
    #[error("target has no {0} memory")]
    NoSuchMemory(MemoryType),

    /// Program memory writes must go through the vFlash packets
    #[error("program memory can only be written with vFlashWrite")]
    FlashWriteOutsideLoad,

    /// Writing the SVD output file failed
    #[error("failed to write SVD file: {0}")]
    SvdWrite(#[source] std::io::Error),

    /// The target controller refused or failed a command
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl GdbError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedPacket(message.into())
    }
}

/// Result type for GDB server operations
pub type Result<T> = std::result::Result<T, GdbError>;
