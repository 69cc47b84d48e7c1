//! Error types for avrbridge-core
//!
//! This module provides the error type shared by every debug interface
//! implementation. It is `Copy` so that it can be carried through the
//! target controller's response channel without allocation.

use core::fmt;

use crate::target::TargetSignature;

/// Details about a failed fuse-bit update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuseFailure {
    /// The description file has no bit field with the requested name
    MissingBitField(&'static str),
    /// A bit that must be programmed on a live connection reads as unprogrammed
    UntrustedDescription(&'static str),
    /// At least one lock bit is set
    LockBitsSet {
        /// The lock bit byte as read from the target
        value: u8,
    },
    /// The fuse byte read back after programming differs from the value written
    VerifyFailed {
        /// Value that was written
        expected: u8,
        /// Value that was read back
        found: u8,
    },
    /// The probe offers no ISP interface
    NoIspInterface,
}

/// Core error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Transport errors
    /// Debug tool not found on the USB bus
    DeviceNotFound,
    /// USB transfer failed
    TransferFailed,
    /// Operation timed out
    Timeout,
    /// Response from the debug tool could not be decoded
    InvalidResponse,

    // Probe errors
    /// The debug tool reported a command failure
    CommandFailed {
        /// Failure code reported by the tool
        code: u8,
    },

    // Initialization errors
    /// A target parameter required by the selected config variant is missing
    MissingTargetParameter(&'static str),
    /// No config variant exists for the family/physical interface pair
    UnresolvableConfigVariant,
    /// The debug interface was used before it was configured
    NotConfigured,

    // Physical interface errors
    /// The debugWire physical interface could not be activated
    DebugWirePhysicalInterface {
        /// Failure code reported by the tool
        code: u8,
    },

    // Memory errors
    /// Address range is empty or inverted
    InvalidRange,
    /// Access falls outside of the memory segment
    AddressOutOfBounds,
    /// Operation requires aligned address or size
    InvalidAlignment,
    /// The tool returned a different number of bytes than requested
    UnexpectedByteCount {
        /// Number of bytes requested
        expected: u32,
        /// Number of bytes returned
        actual: u32,
    },
    /// RAM cannot be accessed while programming mode is enabled
    RamAccessInProgrammingMode,
    /// Fuses cannot be accessed over debugWire
    FuseAccessOverDebugWire,
    /// Flash writes require programming mode
    ProgrammingModeRequired,
    /// Register value is empty or wider than its descriptor
    InvalidRegisterValue,

    // Target errors
    /// The connected target's signature differs from the description file
    SignatureMismatch {
        /// Signature from the description file
        expected: TargetSignature,
        /// Signature read from the target
        actual: TargetSignature,
    },
    /// No break event arrived when the target was expected to stop
    MissingStopEvent,
    /// Fuse-bit update aborted
    Fuse(FuseFailure),
    /// Unknown pin, pad or variant
    UnknownPin,
    /// Operation not supported by this target or tool
    Unsupported,
}

impl fmt::Display for FuseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingBitField(name) => {
                write!(f, "could not find {} bit field in target description", name)
            }
            Self::UntrustedDescription(name) => write!(
                f,
                "invalid {} fuse bit value, suspected inaccuracies in target description",
                name
            ),
            Self::LockBitsSet { value } => write!(
                f,
                "lock bits are set (0x{:02X}), updating fuses could brick the target",
                value
            ),
            Self::VerifyFailed { expected, found } => write!(
                f,
                "post-update verification failed: expected 0x{:02X}, found 0x{:02X}",
                expected, found
            ),
            Self::NoIspInterface => write!(f, "debug tool provides no ISP interface"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceNotFound => write!(f, "debug tool not found"),
            Self::TransferFailed => write!(f, "USB transfer failed"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::InvalidResponse => write!(f, "invalid response from debug tool"),
            Self::CommandFailed { code } => {
                write!(f, "debug tool command failed (code 0x{:02X})", code)
            }
            Self::MissingTargetParameter(name) => {
                write!(f, "missing required target parameter: {}", name)
            }
            Self::UnresolvableConfigVariant => write!(
                f,
                "could not resolve AVR8 config variant from target family and physical interface"
            ),
            Self::NotConfigured => write!(f, "debug interface has not been configured"),
            Self::DebugWirePhysicalInterface { code } => write!(
                f,
                "failed to activate the debugWire physical interface (code 0x{:02X}), check target connection and DWEN fuse bit",
                code
            ),
            Self::InvalidRange => write!(f, "invalid address range"),
            Self::AddressOutOfBounds => write!(f, "address out of bounds"),
            Self::InvalidAlignment => write!(f, "invalid alignment"),
            Self::UnexpectedByteCount { expected, actual } => write!(
                f,
                "unexpected number of bytes from debug tool: expected {}, got {}",
                expected, actual
            ),
            Self::RamAccessInProgrammingMode => {
                write!(f, "cannot access RAM when programming mode is enabled")
            }
            Self::FuseAccessOverDebugWire => {
                write!(f, "cannot access AVR fuses via the debugWire interface")
            }
            Self::ProgrammingModeRequired => {
                write!(f, "flash write attempted with no active programming session")
            }
            Self::InvalidRegisterValue => write!(f, "invalid register value"),
            Self::SignatureMismatch { expected, actual } => write!(
                f,
                "target signature mismatch: expected {}, got {}",
                expected, actual
            ),
            Self::MissingStopEvent => write!(f, "missing break event from target"),
            Self::Fuse(failure) => write!(f, "fuse update aborted: {}", failure),
            Self::UnknownPin => write!(f, "unknown pin, pad or target variant"),
            Self::Unsupported => write!(f, "operation not supported"),
        }
    }
}

impl std::error::Error for Error {}

impl From<FuseFailure> for Error {
    fn from(failure: FuseFailure) -> Self {
        Self::Fuse(failure)
    }
}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
