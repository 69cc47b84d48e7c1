//! EDBG debug tool
//!
//! [`EdbgTool`] bundles the interfaces of one tool over a single shared
//! link, and manages the housekeeping session that brackets their use.

use avrbridge_core::interface::{
    Avr8DebugInterface, AvrIspInterface, DebugTool, TargetPowerManagement,
};
use avrbridge_core::{Error, Result};

use crate::avr8::EdbgAvr8Interface;
use crate::device::{EdbgDevice, EdbgToolModel, HidTransport};
use crate::isp::EdbgAvrIspInterface;
use crate::link::{lock, EdbgLink, SharedLink};
use crate::protocol::*;

fn housekeeping<T: HidTransport>(link: &SharedLink<T>, payload: &[u8]) -> Result<()> {
    let response = lock(link).send_command(HANDLER_HOUSEKEEPING, payload)?;
    if response.response_id() != HOUSEKEEPING_OK {
        return Err(Error::InvalidResponse);
    }
    Ok(())
}

/// Target power switch of tools with an on-board target supply
pub struct EdbgTargetPower<T: HidTransport> {
    link: SharedLink<T>,
}

impl<T: HidTransport> EdbgTargetPower<T> {
    fn set_target_power(&self, enabled: bool) -> Result<()> {
        log::debug!("Switching target power {}", if enabled { "on" } else { "off" });
        housekeeping(
            &self.link,
            &[
                HOUSEKEEPING_SET,
                EDBG_PROTOCOL_VERSION,
                HOUSEKEEPING_CONTEXT_ANALOG,
                HOUSEKEEPING_PARAM_TARGET_POWER,
                0x01,
                enabled as u8,
            ],
        )
    }
}

impl<T: HidTransport> TargetPowerManagement for EdbgTargetPower<T> {
    fn enable_target_power(&mut self) -> Result<()> {
        self.set_target_power(true)
    }

    fn disable_target_power(&mut self) -> Result<()> {
        self.set_target_power(false)
    }
}

/// An EDBG based debug tool
pub struct EdbgTool<T: HidTransport> {
    model: EdbgToolModel,
    serial_number: Option<String>,
    link: SharedLink<T>,
    avr8: EdbgAvr8Interface<T>,
    isp: EdbgAvrIspInterface<T>,
    power: Option<EdbgTargetPower<T>>,
    session_started: bool,
}

impl EdbgTool<EdbgDevice> {
    /// Open a connected tool
    pub fn open(model: EdbgToolModel, serial: Option<&str>) -> crate::Result<Self> {
        let device = EdbgDevice::open(model, serial)?;
        let serial_number = device.serial_number().map(str::to_string);
        Ok(Self::new(model, device, serial_number))
    }
}

impl<T: HidTransport> EdbgTool<T> {
    /// Build a tool on any HID transport
    pub fn new(model: EdbgToolModel, transport: T, serial_number: Option<String>) -> Self {
        let link = EdbgLink::shared(transport);

        let mut avr8 = EdbgAvr8Interface::new(link.clone());
        // mEDBG firmware has no masked read
        avr8.set_avoid_masked_memory_read(matches!(
            model,
            EdbgToolModel::XplainedMini | EdbgToolModel::XplainedNano
        ));

        let power = model.has_target_power_control().then(|| EdbgTargetPower {
            link: link.clone(),
        });

        Self {
            model,
            serial_number,
            isp: EdbgAvrIspInterface::new(link.clone()),
            avr8,
            power,
            link,
            session_started: false,
        }
    }

    /// Tool model
    pub fn model(&self) -> EdbgToolModel {
        self.model
    }

    /// The link shared by the tool's interfaces
    pub fn link(&self) -> &SharedLink<T> {
        &self.link
    }
}

impl<T: HidTransport> DebugTool for EdbgTool<T> {
    fn name(&self) -> &str {
        self.model.display_name()
    }

    fn serial_number(&self) -> Option<String> {
        self.serial_number.clone()
    }

    fn init(&mut self) -> Result<()> {
        housekeeping(
            &self.link,
            &[HOUSEKEEPING_START_SESSION, EDBG_PROTOCOL_VERSION],
        )?;
        self.session_started = true;
        log::info!("Started session with {}", self.model);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.session_started {
            return Ok(());
        }
        housekeeping(
            &self.link,
            &[HOUSEKEEPING_END_SESSION, EDBG_PROTOCOL_VERSION, 0x00],
        )?;
        self.session_started = false;
        log::info!("Ended session with {}", self.model);
        Ok(())
    }

    fn avr8_debug_interface(&mut self) -> &mut dyn Avr8DebugInterface {
        &mut self.avr8
    }

    fn avr_isp_interface(&mut self) -> Option<&mut dyn AvrIspInterface> {
        Some(&mut self.isp)
    }

    fn target_power_management(&mut self) -> Option<&mut dyn TargetPowerManagement> {
        self.power
            .as_mut()
            .map(|p| p as &mut dyn TargetPowerManagement)
    }
}
