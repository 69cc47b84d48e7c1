//! EDBG protocol constants
//!
//! EDBG based tools speak CMSIS-DAP over USB HID. AVR commands are carried in
//! the CMSIS-DAP vendor commands `AVR_CMD`, `AVR_RSP` and `AVR_EVT`, wrapped
//! in EDBG frames addressed to a sub-protocol handler.

// Allow unused constants - the tables are kept complete for reference
#![allow(dead_code)]

// USB device identifiers
/// Microchip (Atmel) USB vendor id
pub const EDBG_USB_VENDOR: u16 = 0x03EB;
/// Atmel-ICE
pub const ATMEL_ICE_USB_PRODUCT: u16 = 0x2141;
/// Power Debugger
pub const POWER_DEBUGGER_USB_PRODUCT: u16 = 0x2144;
/// Xplained Pro on-board debugger
pub const XPLAINED_PRO_USB_PRODUCT: u16 = 0x2111;
/// Xplained Mini and Xplained Nano on-board debugger (mEDBG)
pub const XPLAINED_MINI_USB_PRODUCT: u16 = 0x2145;
/// Curiosity Nano on-board debugger (nEDBG)
pub const CURIOSITY_NANO_USB_PRODUCT: u16 = 0x2175;
/// MPLAB PICkit 4 in AVR mode
pub const PICKIT4_USB_PRODUCT: u16 = 0x2177;
/// MPLAB Snap in AVR mode
pub const SNAP_USB_PRODUCT: u16 = 0x2180;

/// HID interface number on every supported tool
pub const HID_INTERFACE_NUMBER: u8 = 0;
/// USB HID interface class
pub const USB_CLASS_HID: u8 = 0x03;
/// Timeout for a single HID report transfer
pub const USB_TIMEOUT_MS: u64 = 5000;

// CMSIS-DAP vendor commands
/// Send an AVR command fragment
pub const CMSIS_DAP_AVR_CMD: u8 = 0x80;
/// Poll for an AVR response fragment
pub const CMSIS_DAP_AVR_RSP: u8 = 0x81;
/// Poll for an AVR event
pub const CMSIS_DAP_AVR_EVT: u8 = 0x82;
/// Status byte acknowledging an AVR_CMD fragment
pub const CMSIS_DAP_AVR_CMD_OK: u8 = 0x01;
/// Bytes of each AVR_CMD report taken by the header
pub const AVR_CMD_HEADER_SIZE: usize = 4;
/// Bytes of each AVR_RSP report taken by the header
pub const AVR_RSP_HEADER_SIZE: usize = 4;
/// Bytes of each AVR_EVT report taken by the header
pub const AVR_EVT_HEADER_SIZE: usize = 3;
/// Number of empty AVR_RSP polls before giving up on a response
pub const AVR_RSP_MAX_POLLS: usize = 400;
/// Delay between empty AVR_RSP polls
pub const AVR_RSP_POLL_INTERVAL_MS: u64 = 5;

// EDBG framing
/// Start of frame marker
pub const EDBG_SOF: u8 = 0x0E;
/// Protocol version carried in command frames
pub const EDBG_PROTOCOL_VERSION: u8 = 0x00;
/// Bytes before the payload in a command frame (SOF, version, seq, handler)
pub const COMMAND_FRAME_HEADER_SIZE: usize = 5;
/// Bytes before the payload in a response or event frame (SOF, seq, handler)
pub const RESPONSE_FRAME_HEADER_SIZE: usize = 4;

// Sub-protocol handlers
/// Discovery
pub const HANDLER_DISCOVERY: u8 = 0x00;
/// Housekeeping (sessions, tool parameters, target power)
pub const HANDLER_HOUSEKEEPING: u8 = 0x01;
/// AVRISP (STK500v2 style ISP commands)
pub const HANDLER_AVRISP: u8 = 0x11;
/// AVR8 generic debugging
pub const HANDLER_AVR8_GENERIC: u8 = 0x12;

// Housekeeping commands
/// Start a tool session
pub const HOUSEKEEPING_START_SESSION: u8 = 0x10;
/// End a tool session
pub const HOUSEKEEPING_END_SESSION: u8 = 0x11;
/// Set a housekeeping parameter
pub const HOUSEKEEPING_SET: u8 = 0x01;
/// Get a housekeeping parameter
pub const HOUSEKEEPING_GET: u8 = 0x02;
/// Housekeeping OK response
pub const HOUSEKEEPING_OK: u8 = 0x80;
/// Housekeeping failure response
pub const HOUSEKEEPING_FAILED: u8 = 0xA0;
/// Analog context
pub const HOUSEKEEPING_CONTEXT_ANALOG: u8 = 0x00;
/// Target power switch parameter (analog context)
pub const HOUSEKEEPING_PARAM_TARGET_POWER: u8 = 0x10;

// AVR8 generic commands
/// Query capabilities
pub const AVR8_QUERY: u8 = 0x00;
/// Set a parameter
pub const AVR8_SET_PARAMETER: u8 = 0x01;
/// Get a parameter
pub const AVR8_GET_PARAMETER: u8 = 0x02;
/// Activate the physical interface
pub const AVR8_ACTIVATE_PHYSICAL: u8 = 0x10;
/// Deactivate the physical interface
pub const AVR8_DEACTIVATE_PHYSICAL: u8 = 0x11;
/// Read the device id
pub const AVR8_GET_ID: u8 = 0x12;
/// Attach to the OCD module
pub const AVR8_ATTACH: u8 = 0x13;
/// Detach from the OCD module
pub const AVR8_DETACH: u8 = 0x14;
/// Enter programming mode
pub const AVR8_PROG_MODE_ENTER: u8 = 0x15;
/// Leave programming mode
pub const AVR8_PROG_MODE_LEAVE: u8 = 0x16;
/// Disable debugWire (restores ISP)
pub const AVR8_DISABLE_DEBUGWIRE: u8 = 0x17;
/// Erase memory
pub const AVR8_ERASE: u8 = 0x20;
/// Read memory
pub const AVR8_MEMORY_READ: u8 = 0x21;
/// Read memory with a byte mask
pub const AVR8_MEMORY_READ_MASKED: u8 = 0x22;
/// Write memory
pub const AVR8_MEMORY_WRITE: u8 = 0x23;
/// Reset the target
pub const AVR8_RESET: u8 = 0x30;
/// Halt execution
pub const AVR8_STOP: u8 = 0x31;
/// Resume execution
pub const AVR8_RUN: u8 = 0x32;
/// Resume execution until an address
pub const AVR8_RUN_TO_ADDRESS: u8 = 0x33;
/// Single step
pub const AVR8_STEP: u8 = 0x34;
/// Read the program counter
pub const AVR8_PC_READ: u8 = 0x35;
/// Write the program counter
pub const AVR8_PC_WRITE: u8 = 0x36;
/// Set a hardware breakpoint
pub const AVR8_HW_BREAK_SET: u8 = 0x40;
/// Clear a hardware breakpoint
pub const AVR8_HW_BREAK_CLEAR: u8 = 0x41;
/// Set a software breakpoint
pub const AVR8_SW_BREAK_SET: u8 = 0x43;
/// Clear a software breakpoint
pub const AVR8_SW_BREAK_CLEAR: u8 = 0x44;
/// Clear all software breakpoints
pub const AVR8_SW_BREAK_CLEAR_ALL: u8 = 0x45;

// AVR8 responses
/// Success
pub const AVR8_RSP_OK: u8 = 0x80;
/// List
pub const AVR8_RSP_LIST: u8 = 0x81;
/// Program counter
pub const AVR8_RSP_PC: u8 = 0x83;
/// Data (followed by a trailing status byte)
pub const AVR8_RSP_DATA: u8 = 0x84;
/// Failure (followed by a failure code)
pub const AVR8_RSP_FAILED: u8 = 0xA0;

// AVR8 events
/// Execution stopped
pub const AVR8_EVT_BREAK: u8 = 0x40;
/// IDR message
pub const AVR8_EVT_IDR: u8 = 0x41;
/// Break caused by a program breakpoint
pub const AVR8_BREAK_CAUSE_PROGRAM_BREAKPOINT: u8 = 0x01;

// AVR8 parameter contexts
/// Session configuration
pub const AVR8_CONTEXT_CONFIG: u8 = 0x00;
/// Physical interface
pub const AVR8_CONTEXT_PHYSICAL: u8 = 0x01;
/// Device parameters
pub const AVR8_CONTEXT_DEVICE: u8 = 0x02;
/// Options
pub const AVR8_CONTEXT_OPTIONS: u8 = 0x03;

/// An AVR8 parameter address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Avr8Parameter {
    /// Parameter context
    pub context: u8,
    /// Parameter id within the context
    pub id: u8,
}

const fn param(context: u8, id: u8) -> Avr8Parameter {
    Avr8Parameter { context, id }
}

/// AVR8 parameters
#[allow(missing_docs)]
pub mod params {
    use super::*;

    pub const CONFIG_VARIANT: Avr8Parameter = param(AVR8_CONTEXT_CONFIG, 0x00);
    pub const CONFIG_FUNCTION: Avr8Parameter = param(AVR8_CONTEXT_CONFIG, 0x01);

    pub const PHYSICAL_INTERFACE: Avr8Parameter = param(AVR8_CONTEXT_PHYSICAL, 0x00);
    pub const JTAG_DAISY_CHAIN_SETTINGS: Avr8Parameter = param(AVR8_CONTEXT_PHYSICAL, 0x01);
    pub const DW_CLOCK_DIVISION_FACTOR: Avr8Parameter = param(AVR8_CONTEXT_PHYSICAL, 0x10);
    pub const MEGA_DEBUG_CLOCK: Avr8Parameter = param(AVR8_CONTEXT_PHYSICAL, 0x21);
    pub const PDI_CLOCK_SPEED: Avr8Parameter = param(AVR8_CONTEXT_PHYSICAL, 0x31);

    pub const RUN_TIMERS_WHILST_STOPPED: Avr8Parameter = param(AVR8_CONTEXT_OPTIONS, 0x00);
    pub const ENABLE_HIGH_VOLTAGE_UPDI: Avr8Parameter = param(AVR8_CONTEXT_OPTIONS, 0x06);

    // debugWire and megaAVR JTAG
    pub const DEVICE_FLASH_PAGE_SIZE: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x00);
    pub const DEVICE_FLASH_SIZE: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x02);
    pub const DEVICE_FLASH_BASE: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x06);
    pub const DEVICE_BOOT_START_ADDR: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x0A);
    pub const DEVICE_SRAM_START: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x0E);
    pub const DEVICE_EEPROM_SIZE: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x10);
    pub const DEVICE_EEPROM_PAGE_SIZE: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x12);
    pub const DEVICE_OCD_REVISION: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x13);
    pub const DEVICE_OCD_DATA_REGISTER: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x18);
    pub const DEVICE_EEARH_ADDR: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x19);
    pub const DEVICE_EEARL_ADDR: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x1A);
    pub const DEVICE_EECR_ADDR: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x1B);
    pub const DEVICE_EEDR_ADDR: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x1C);
    pub const DEVICE_SPMCR_REGISTER: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x1D);
    pub const DEVICE_OSCCAL_ADDR: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x1E);

    // XMEGA (PDI)
    pub const DEVICE_XMEGA_APPL_BASE_ADDR: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x00);
    pub const DEVICE_XMEGA_BOOT_BASE_ADDR: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x04);
    pub const DEVICE_XMEGA_EEPROM_BASE_ADDR: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x08);
    pub const DEVICE_XMEGA_FUSE_BASE_ADDR: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x0C);
    pub const DEVICE_XMEGA_LOCKBIT_BASE_ADDR: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x10);
    pub const DEVICE_XMEGA_USER_SIGN_BASE_ADDR: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x14);
    pub const DEVICE_XMEGA_PROD_SIGN_BASE_ADDR: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x18);
    pub const DEVICE_XMEGA_DATA_BASE_ADDR: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x1C);
    pub const DEVICE_XMEGA_APPLICATION_BYTES: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x20);
    pub const DEVICE_XMEGA_BOOT_BYTES: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x24);
    pub const DEVICE_XMEGA_FLASH_PAGE_BYTES: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x26);
    pub const DEVICE_XMEGA_EEPROM_SIZE: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x28);
    pub const DEVICE_XMEGA_EEPROM_PAGE_SIZE: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x2A);
    pub const DEVICE_XMEGA_NVM_BASE: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x2B);
    pub const DEVICE_XMEGA_SIGNATURE_OFFSET: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x2D);

    // UPDI
    pub const DEVICE_UPDI_PROGMEM_BASE_ADDR: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x00);
    pub const DEVICE_UPDI_FLASH_PAGE_SIZE: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x02);
    pub const DEVICE_UPDI_EEPROM_PAGE_SIZE: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x03);
    pub const DEVICE_UPDI_NVMCTRL_ADDR: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x04);
    pub const DEVICE_UPDI_OCD_ADDR: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x06);
    pub const DEVICE_UPDI_FLASH_SIZE: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x12);
    pub const DEVICE_UPDI_EEPROM_SIZE: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x16);
    pub const DEVICE_UPDI_EEPROM_BASE_ADDR: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x18);
    pub const DEVICE_UPDI_SIG_BASE_ADDR: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x1A);
    pub const DEVICE_UPDI_FUSE_BASE_ADDR: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x1C);
    pub const DEVICE_UPDI_FUSE_SIZE: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x1E);
    pub const DEVICE_UPDI_LOCK_BASE_ADDR: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x20);
    pub const DEVICE_UPDI_PROGMEM_BASE_ADDR_MSB: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x22);
    pub const DEVICE_UPDI_FLASH_PAGE_SIZE_MSB: Avr8Parameter = param(AVR8_CONTEXT_DEVICE, 0x23);
    pub const DEVICE_UPDI_24_BIT_ADDRESSING_ENABLE: Avr8Parameter =
        param(AVR8_CONTEXT_DEVICE, 0x24);
}

// Config variant values (CONFIG_VARIANT)
/// debugWire
pub const AVR8_VARIANT_DEBUG_WIRE: u8 = 0x01;
/// megaAVR JTAG
pub const AVR8_VARIANT_MEGAJTAG: u8 = 0x02;
/// XMEGA
pub const AVR8_VARIANT_XMEGA: u8 = 0x03;
/// UPDI
pub const AVR8_VARIANT_UPDI: u8 = 0x05;

// Config function values (CONFIG_FUNCTION)
/// Programming only
pub const AVR8_FUNCTION_PROGRAMMING: u8 = 0x01;
/// Debugging
pub const AVR8_FUNCTION_DEBUGGING: u8 = 0x02;

// Physical interface values (PHYSICAL_INTERFACE)
/// JTAG
pub const AVR8_PHY_INTERFACE_JTAG: u8 = 0x04;
/// debugWire
pub const AVR8_PHY_INTERFACE_DEBUG_WIRE: u8 = 0x05;
/// PDI
pub const AVR8_PHY_INTERFACE_PDI: u8 = 0x06;
/// UPDI (PDI single wire)
pub const AVR8_PHY_INTERFACE_UPDI: u8 = 0x08;

/// Tool memory types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Avr8MemoryType {
    /// Data space (SRAM, IO, register file on older parts)
    Sram = 0x20,
    /// EEPROM via the debug interface
    Eeprom = 0x22,
    /// Flash via SPM (megaAVR JTAG outside programming mode)
    Spm = 0xA0,
    /// Flash, page granular
    FlashPage = 0xB0,
    /// EEPROM, page granular
    EepromPage = 0xB1,
    /// Fuses
    Fuses = 0xB2,
    /// Lock bits
    LockBits = 0xB3,
    /// Signature
    Signature = 0xB4,
    /// Oscillator calibration
    Osccal = 0xB5,
    /// Register file
    RegisterFile = 0xB8,
    /// XMEGA application section
    ApplFlash = 0xC0,
    /// XMEGA boot section
    BootFlash = 0xC1,
    /// EEPROM with atomic page erase and write
    EepromAtomic = 0xC4,
    /// XMEGA user signature
    UserSignature = 0xC5,
    /// Production signature
    ProductionSignature = 0xC6,
}

impl Avr8MemoryType {
    /// Decode a memory type byte from a command payload
    pub fn from_u8(value: u8) -> Option<Self> {
        let memory_type = match value {
            0x20 => Self::Sram,
            0x22 => Self::Eeprom,
            0xA0 => Self::Spm,
            0xB0 => Self::FlashPage,
            0xB1 => Self::EepromPage,
            0xB2 => Self::Fuses,
            0xB3 => Self::LockBits,
            0xB4 => Self::Signature,
            0xB5 => Self::Osccal,
            0xB8 => Self::RegisterFile,
            0xC0 => Self::ApplFlash,
            0xC1 => Self::BootFlash,
            0xC4 => Self::EepromAtomic,
            0xC5 => Self::UserSignature,
            0xC6 => Self::ProductionSignature,
            _ => return None,
        };
        Some(memory_type)
    }

    /// Whether accesses must cover whole pages
    pub fn is_paged(self) -> bool {
        matches!(
            self,
            Self::FlashPage
                | Self::Spm
                | Self::ApplFlash
                | Self::BootFlash
                | Self::EepromPage
                | Self::EepromAtomic
        )
    }
}

/// Erase modes for `AVR8_ERASE`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Avr8EraseMode {
    /// Chip erase
    Chip = 0x00,
    /// XMEGA application section
    ApplicationSection = 0x01,
    /// XMEGA boot section
    BootSection = 0x02,
    /// EEPROM
    Eeprom = 0x03,
}

// AVR8 failure codes
/// debugWire physical layer error
pub const AVR8_FAILURE_DW_PHY_ERROR: u8 = 0x10;
/// JTAG master failed to initialise
pub const AVR8_FAILURE_JTAGM_INIT_ERROR: u8 = 0x11;
/// PDI enable failed
pub const AVR8_FAILURE_PDI_ENABLE: u8 = 0x1B;
/// No device found
pub const AVR8_FAILURE_NO_DEVICE_FOUND: u8 = 0x20;
/// Target power not detected
pub const AVR8_FAILURE_NO_TARGET_POWER: u8 = 0x22;
/// Attach command required first
pub const AVR8_FAILURE_NOT_ATTACHED: u8 = 0x23;
/// Physical interface not activated
pub const AVR8_FAILURE_INVALID_PHYSICAL_STATE: u8 = 0x31;
/// Illegal run or stopped state
pub const AVR8_FAILURE_ILLEGAL_STATE: u8 = 0x32;
/// Invalid memory type
pub const AVR8_FAILURE_INVALID_MEMTYPE: u8 = 0x34;
/// Invalid size
pub const AVR8_FAILURE_INVALID_SIZE: u8 = 0x35;
/// Invalid address
pub const AVR8_FAILURE_INVALID_ADDRESS: u8 = 0x36;
/// Invalid alignment
pub const AVR8_FAILURE_INVALID_ALIGNMENT: u8 = 0x37;
/// Failed to enable the OCD module
pub const AVR8_FAILURE_FAILED_TO_ENABLE_OCD: u8 = 0x44;
/// Too many breakpoints
pub const AVR8_FAILURE_TOO_MANY_BREAKPOINTS: u8 = 0x81;
/// Unknown failure
pub const AVR8_FAILURE_UNKNOWN: u8 = 0xFF;

/// Describe an AVR8 failure code
pub fn avr8_failure_description(code: u8) -> &'static str {
    match code {
        AVR8_FAILURE_DW_PHY_ERROR => "debugWire physical error",
        AVR8_FAILURE_JTAGM_INIT_ERROR => "JTAG master failed to initialise",
        AVR8_FAILURE_PDI_ENABLE => "PDI enable failed",
        AVR8_FAILURE_NO_DEVICE_FOUND => "target not found",
        AVR8_FAILURE_NO_TARGET_POWER => "target power not detected",
        AVR8_FAILURE_NOT_ATTACHED => "attach command required first",
        AVR8_FAILURE_INVALID_PHYSICAL_STATE => "physical interface not activated",
        AVR8_FAILURE_ILLEGAL_STATE => "illegal run or stopped state",
        AVR8_FAILURE_INVALID_MEMTYPE => "invalid memory type",
        AVR8_FAILURE_INVALID_SIZE => "invalid size",
        AVR8_FAILURE_INVALID_ADDRESS => "invalid address",
        AVR8_FAILURE_INVALID_ALIGNMENT => "invalid alignment",
        AVR8_FAILURE_FAILED_TO_ENABLE_OCD => "failed to enable OCD",
        AVR8_FAILURE_TOO_MANY_BREAKPOINTS => "too many breakpoints",
        _ => "unknown failure",
    }
}

// AVRISP commands
/// Enter programming mode
pub const AVRISP_ENTER_PROGMODE: u8 = 0x10;
/// Leave programming mode
pub const AVRISP_LEAVE_PROGMODE: u8 = 0x11;
/// Program a fuse byte
pub const AVRISP_PROGRAM_FUSE: u8 = 0x17;
/// Read a fuse byte
pub const AVRISP_READ_FUSE: u8 = 0x18;
/// Read the lock bit byte
pub const AVRISP_READ_LOCK: u8 = 0x1A;
/// Read a signature byte
pub const AVRISP_READ_SIGNATURE: u8 = 0x1B;
/// AVRISP success status
pub const AVRISP_STATUS_OK: u8 = 0x00;

/// Serial programming enable instruction, bytes 1 and 2
pub const ISP_PROGRAMMING_ENABLE: [u8; 2] = [0xAC, 0x53];

/// Number of times to poll for an AVR event when waiting for a stop
pub const AVR_EVENT_WAIT_POLLS: usize = 40;
/// Delay between AVR event polls
pub const AVR_EVENT_WAIT_INTERVAL_MS: u64 = 50;
/// Delay after a reset before the target is usable
pub const POST_RESET_DELAY_MS: u64 = 250;

/// Default PDI clock speed in kHz
pub const DEFAULT_PDI_CLOCK_KHZ: u16 = 4000;
/// Default UPDI clock speed in kHz
pub const DEFAULT_UPDI_CLOCK_KHZ: u16 = 1800;
/// Default megaAVR JTAG debug clock in kHz
pub const DEFAULT_MEGA_DEBUG_CLOCK_KHZ: u16 = 200;

/// Size of the CMSIS-DAP and EDBG overhead subtracted from the report size
/// when computing the maximum single memory access
pub const MEMORY_ACCESS_OVERHEAD: usize = 30;
