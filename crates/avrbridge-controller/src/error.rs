//! Error types for the target controller

use std::time::Duration;

use avrbridge_core::description::DescriptionError;
use thiserror::Error;

use crate::commands::Preconditions;

/// Target controller errors
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The debug tool or target reported a failure
    #[error("{0}")]
    Target(#[from] avrbridge_core::Error),

    /// The target description file is incomplete
    #[error(transparent)]
    Description(#[from] DescriptionError),

    /// The configured physical interface is not listed in the description file
    #[error("{target} does not support the {interface} physical interface")]
    UnsupportedPhysicalInterface { target: String, interface: String },

    /// A command was refused because the controller or target was in the wrong state
    #[error("command rejected: {0}")]
    Rejected(Rejection),

    /// The controller has shut down
    #[error("target controller is not running")]
    ShutDown,

    /// No response arrived in time
    #[error("timed out after {0:?} waiting for the target controller")]
    Timeout(Duration),

    /// The command was still queued when its caller stopped waiting
    #[error("command dropped after its caller timed out")]
    Expired,

    /// The worker answered with a response of the wrong kind
    #[error("unexpected response from the target controller")]
    UnexpectedResponse,

    /// The access falls outside the target's memory
    #[error("{memory_type} access at 0x{start:X} ({bytes} bytes) is out of range")]
    OutOfRange {
        memory_type: avrbridge_core::memory::MemoryType,
        start: u32,
        bytes: u32,
    },

    /// A pin state to apply has no IO direction
    #[error("pin state has no IO direction")]
    InvalidPinState,

    /// Failed to spawn the worker thread
    #[error("failed to start target controller thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Why a command was refused without touching the debug tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The controller is suspended
    #[error("the target controller is suspended")]
    Suspended,
    /// The target is running
    #[error("the target must be stopped")]
    TargetRunning,
    /// The target state has not been established since the last suspension
    #[error("the target state is unknown")]
    TargetStateUnknown,
    /// Programming mode is enabled
    #[error("programming mode is enabled")]
    ProgrammingMode,
}

impl Rejection {
    /// The precondition whose violation produces this rejection
    pub fn precondition(self) -> Preconditions {
        match self {
            Self::Suspended => Preconditions::ACTIVE_SESSION,
            Self::TargetRunning | Self::TargetStateUnknown => Preconditions::STOPPED_TARGET,
            Self::ProgrammingMode => Preconditions::DEBUG_MODE,
        }
    }
}

/// Result type for target controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;
