//! EDBG-specific error types

use std::fmt;

/// Errors specific to EDBG based debug tools
#[derive(Debug)]
pub enum EdbgError {
    /// No matching debug tool was found
    DeviceNotFound,
    /// Failed to open the USB device
    OpenFailed(String),
    /// Failed to claim the HID interface
    ClaimFailed(String),
    /// USB transfer failed
    TransferFailed(String),
    /// Malformed report or frame from the tool
    InvalidResponse(String),
    /// No response within the polling budget
    Timeout,
    /// The tool answered a command with a failure code
    CommandFailed {
        /// Sub-protocol handler the command was sent to
        handler: u8,
        /// Failure code reported by the tool
        code: u8,
    },
    /// Core error
    Core(avrbridge_core::Error),
}

impl fmt::Display for EdbgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdbgError::DeviceNotFound => write!(f, "EDBG debug tool not found"),
            EdbgError::OpenFailed(e) => write!(f, "failed to open debug tool: {}", e),
            EdbgError::ClaimFailed(e) => write!(f, "failed to claim HID interface: {}", e),
            EdbgError::TransferFailed(e) => write!(f, "USB transfer failed: {}", e),
            EdbgError::InvalidResponse(e) => write!(f, "invalid response: {}", e),
            EdbgError::Timeout => write!(f, "timed out waiting for a response"),
            EdbgError::CommandFailed { handler, code } => write!(
                f,
                "command to handler 0x{:02X} failed: {} (0x{:02X})",
                handler,
                crate::protocol::avr8_failure_description(*code),
                code
            ),
            EdbgError::Core(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for EdbgError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EdbgError::Core(e) => Some(e),
            _ => None,
        }
    }
}

impl From<avrbridge_core::Error> for EdbgError {
    fn from(e: avrbridge_core::Error) -> Self {
        EdbgError::Core(e)
    }
}

impl From<nusb::Error> for EdbgError {
    fn from(e: nusb::Error) -> Self {
        EdbgError::TransferFailed(e.to_string())
    }
}

impl From<nusb::transfer::TransferError> for EdbgError {
    fn from(e: nusb::transfer::TransferError) -> Self {
        EdbgError::TransferFailed(e.to_string())
    }
}

impl From<EdbgError> for avrbridge_core::Error {
    fn from(e: EdbgError) -> Self {
        use avrbridge_core::Error;

        match e {
            EdbgError::DeviceNotFound | EdbgError::OpenFailed(_) | EdbgError::ClaimFailed(_) => {
                Error::DeviceNotFound
            }
            EdbgError::TransferFailed(_) => Error::TransferFailed,
            EdbgError::InvalidResponse(_) => Error::InvalidResponse,
            EdbgError::Timeout => Error::Timeout,
            EdbgError::CommandFailed { code, .. } => Error::CommandFailed { code },
            EdbgError::Core(e) => e,
        }
    }
}

/// Result type for EDBG operations
pub type Result<T> = std::result::Result<T, EdbgError>;
