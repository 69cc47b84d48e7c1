//! EDBG USB HID transport
//!
//! This module provides [`EdbgDevice`], a blocking HID report channel to an
//! EDBG based debug tool, and the [`HidTransport`] trait the protocol layer
//! is written against. The trait allows the protocol stack to run against a
//! simulated tool.

use std::fmt;
use std::time::Duration;

use nusb::transfer::{Buffer, In, Interrupt, Out};
use nusb::{Endpoint, MaybeFuture};

use crate::error::{EdbgError, Result};
use crate::protocol::*;

/// A channel of fixed size HID reports to and from a debug tool
pub trait HidTransport: Send {
    /// Size of every report in bytes
    fn report_size(&self) -> usize;

    /// Send one report. Shorter reports are zero padded to the report size.
    fn write_report(&mut self, report: &[u8]) -> Result<()>;

    /// Receive one report
    fn read_report(&mut self) -> Result<Vec<u8>>;
}

/// Supported EDBG based tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdbgToolModel {
    /// Atmel-ICE
    AtmelIce,
    /// Power Debugger
    PowerDebugger,
    /// Xplained Pro evaluation kit
    XplainedPro,
    /// Xplained Mini evaluation kit
    XplainedMini,
    /// Xplained Nano evaluation kit
    XplainedNano,
    /// Curiosity Nano evaluation kit
    CuriosityNano,
    /// MPLAB PICkit 4 in AVR mode
    PicKit4,
    /// MPLAB Snap in AVR mode
    Snap,
}

impl EdbgToolModel {
    /// Every supported tool
    pub const ALL: [EdbgToolModel; 8] = [
        Self::AtmelIce,
        Self::PowerDebugger,
        Self::XplainedPro,
        Self::XplainedMini,
        Self::XplainedNano,
        Self::CuriosityNano,
        Self::PicKit4,
        Self::Snap,
    ];

    /// Name used in configuration files
    pub fn config_name(self) -> &'static str {
        match self {
            Self::AtmelIce => "atmel-ice",
            Self::PowerDebugger => "power-debugger",
            Self::XplainedPro => "xplained-pro",
            Self::XplainedMini => "xplained-mini",
            Self::XplainedNano => "xplained-nano",
            Self::CuriosityNano => "curiosity-nano",
            Self::PicKit4 => "pickit4",
            Self::Snap => "snap",
        }
    }

    /// Look up a tool by its configuration name
    pub fn from_config_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|m| m.config_name() == name)
    }

    /// Human readable name
    pub fn display_name(self) -> &'static str {
        match self {
            Self::AtmelIce => "Atmel-ICE",
            Self::PowerDebugger => "Power Debugger",
            Self::XplainedPro => "Xplained Pro",
            Self::XplainedMini => "Xplained Mini",
            Self::XplainedNano => "Xplained Nano",
            Self::CuriosityNano => "Curiosity Nano",
            Self::PicKit4 => "MPLAB PICkit 4",
            Self::Snap => "MPLAB Snap",
        }
    }

    /// USB product id
    pub fn product_id(self) -> u16 {
        match self {
            Self::AtmelIce => ATMEL_ICE_USB_PRODUCT,
            Self::PowerDebugger => POWER_DEBUGGER_USB_PRODUCT,
            Self::XplainedPro => XPLAINED_PRO_USB_PRODUCT,
            Self::XplainedMini | Self::XplainedNano => XPLAINED_MINI_USB_PRODUCT,
            Self::CuriosityNano => CURIOSITY_NANO_USB_PRODUCT,
            Self::PicKit4 => PICKIT4_USB_PRODUCT,
            Self::Snap => SNAP_USB_PRODUCT,
        }
    }

    /// USB vendor id
    pub fn vendor_id(self) -> u16 {
        EDBG_USB_VENDOR
    }

    /// HID interface number
    pub fn interface_number(self) -> u8 {
        HID_INTERFACE_NUMBER
    }

    /// Whether the tool can switch target power
    pub fn has_target_power_control(self) -> bool {
        matches!(self, Self::PowerDebugger | Self::XplainedPro)
    }
}

impl fmt::Display for EdbgToolModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Information about a connected EDBG tool
#[derive(Debug, Clone)]
pub struct EdbgDeviceInfo {
    /// USB bus number
    pub bus: u8,
    /// USB device address
    pub address: u8,
    /// USB product id
    pub product_id: u16,
    /// Serial number, if the device reports one
    pub serial_number: Option<String>,
    /// Product string, if the device reports one
    pub product: Option<String>,
}

impl fmt::Display for EdbgDeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (03EB:{:04X}) at bus {} address {}",
            self.product.as_deref().unwrap_or("EDBG tool"),
            self.product_id,
            self.bus,
            self.address
        )?;
        if let Some(serial) = &self.serial_number {
            write!(f, ", serial {}", serial)?;
        }
        Ok(())
    }
}

/// List every connected device with an EDBG vendor and product id
pub fn list_devices() -> Result<Vec<EdbgDeviceInfo>> {
    let devices = nusb::list_devices()
        .wait()
        .map_err(|e| EdbgError::OpenFailed(e.to_string()))?
        .filter(|d| {
            d.vendor_id() == EDBG_USB_VENDOR
                && EdbgToolModel::ALL
                    .iter()
                    .any(|m| m.product_id() == d.product_id())
        })
        .map(|d| EdbgDeviceInfo {
            bus: d.busnum(),
            address: d.device_address(),
            product_id: d.product_id(),
            serial_number: d.serial_number().map(str::to_string),
            product: d.product_string().map(str::to_string),
        })
        .collect();

    Ok(devices)
}

/// An open EDBG tool
///
/// Owns the USB device handle and the HID interface's interrupt endpoints.
pub struct EdbgDevice {
    out_ep: Endpoint<Interrupt, Out>,
    in_ep: Endpoint<Interrupt, In>,
    report_size: usize,
    serial_number: Option<String>,
}

impl EdbgDevice {
    /// Open the first connected tool of the given model
    ///
    /// When `serial` is given, only a tool with that serial number matches.
    pub fn open(model: EdbgToolModel, serial: Option<&str>) -> Result<Self> {
        let device_info = nusb::list_devices()
            .wait()
            .map_err(|e| EdbgError::OpenFailed(e.to_string()))?
            .filter(|d| d.vendor_id() == model.vendor_id() && d.product_id() == model.product_id())
            .find(|d| serial.map_or(true, |s| d.serial_number() == Some(s)))
            .ok_or(EdbgError::DeviceNotFound)?;

        log::info!(
            "Opening {} at bus {} address {}",
            model,
            device_info.busnum(),
            device_info.device_address()
        );

        let serial_number = device_info.serial_number().map(str::to_string);

        let device = device_info
            .open()
            .wait()
            .map_err(|e| EdbgError::OpenFailed(e.to_string()))?;

        let config_desc = device
            .active_configuration()
            .map_err(|e| EdbgError::OpenFailed(format!("Failed to get config: {}", e)))?;

        let mut endpoints: Option<(u8, u8)> = None;
        for iface in config_desc.interface_alt_settings() {
            if iface.interface_number() != model.interface_number()
                || iface.class() != USB_CLASS_HID
            {
                continue;
            }

            let mut in_address = None;
            let mut out_address = None;
            for endpoint in iface.endpoints() {
                if endpoint.address() & 0x80 != 0 {
                    in_address.get_or_insert(endpoint.address());
                } else {
                    out_address.get_or_insert(endpoint.address());
                }
            }

            if let (Some(i), Some(o)) = (in_address, out_address) {
                endpoints = Some((i, o));
                break;
            }
        }

        let (in_address, out_address) = endpoints.ok_or_else(|| {
            EdbgError::OpenFailed("Could not find HID interface endpoints".to_string())
        })?;

        log::debug!(
            "Using interface {} (IN 0x{:02X}, OUT 0x{:02X})",
            model.interface_number(),
            in_address,
            out_address
        );

        let interface = device
            .claim_interface(model.interface_number())
            .wait()
            .map_err(|e| EdbgError::ClaimFailed(e.to_string()))?;

        let out_ep = interface
            .endpoint::<Interrupt, Out>(out_address)
            .map_err(|e| EdbgError::ClaimFailed(e.to_string()))?;
        let in_ep = interface
            .endpoint::<Interrupt, In>(in_address)
            .map_err(|e| EdbgError::ClaimFailed(e.to_string()))?;

        let report_size = in_ep.max_packet_size();
        log::debug!("HID report size: {} bytes", report_size);

        Ok(Self {
            out_ep,
            in_ep,
            report_size,
            serial_number,
        })
    }

    /// Serial number reported by the tool
    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }
}

impl HidTransport for EdbgDevice {
    fn report_size(&self) -> usize {
        self.report_size
    }

    fn write_report(&mut self, report: &[u8]) -> Result<()> {
        if report.len() > self.report_size {
            return Err(EdbgError::InvalidResponse(format!(
                "report of {} bytes exceeds report size {}",
                report.len(),
                self.report_size
            )));
        }

        let mut buf = Buffer::new(self.report_size);
        buf.extend_from_slice(report);
        buf.extend_from_slice(&vec![0u8; self.report_size - report.len()]);

        self.out_ep
            .transfer_blocking(buf, Duration::from_millis(USB_TIMEOUT_MS))
            .into_result()?;

        log::trace!("USB write {:02X?}", report);
        Ok(())
    }

    fn read_report(&mut self) -> Result<Vec<u8>> {
        let mut in_buf = Buffer::new(self.report_size);
        in_buf.set_requested_len(self.report_size);

        let data = self
            .in_ep
            .transfer_blocking(in_buf, Duration::from_millis(USB_TIMEOUT_MS))
            .into_result()?;

        log::trace!("USB read {} bytes", data.len());
        Ok(data.to_vec())
    }
}
