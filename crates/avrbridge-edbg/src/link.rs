//! Command/response channel to the tool
//!
//! [`EdbgLink`] owns the HID transport and the sequence counter. Sending a
//! command blocks until the response with the matching sequence id has been
//! reassembled. Events are drained through a separate read path.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::device::HidTransport;
use crate::error::{EdbgError, Result};
use crate::frame::{
    encode_command_frame, fragment_command_frame, parse_event_report, parse_response_report,
    AvrEvent, ResponseFrame,
};
use crate::protocol::*;

/// EDBG protocol session over a HID transport
pub struct EdbgLink<T: HidTransport> {
    transport: T,
    sequence_id: u16,
}

/// A link shared by the interfaces of one tool
pub type SharedLink<T> = Arc<Mutex<EdbgLink<T>>>;

/// Lock a shared link
///
/// A poisoned lock still guards a usable link, so the guard is recovered.
pub fn lock<T: HidTransport>(link: &SharedLink<T>) -> MutexGuard<'_, EdbgLink<T>> {
    link.lock().unwrap_or_else(|e| e.into_inner())
}

impl<T: HidTransport> EdbgLink<T> {
    /// Wrap a transport
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            sequence_id: 0,
        }
    }

    /// Wrap a transport for sharing between interfaces
    pub fn shared(transport: T) -> SharedLink<T> {
        Arc::new(Mutex::new(Self::new(transport)))
    }

    /// HID report size of the underlying transport
    pub fn report_size(&self) -> usize {
        self.transport.report_size()
    }

    /// The underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The underlying transport, mutably
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn next_sequence_id(&mut self) -> u16 {
        let id = self.sequence_id;
        self.sequence_id = self.sequence_id.wrapping_add(1);
        id
    }

    /// Send a command to a handler and wait for its response
    ///
    /// A FAILED response is returned as [`EdbgError::CommandFailed`].
    pub fn send_command(&mut self, handler: u8, payload: &[u8]) -> Result<ResponseFrame> {
        let sequence_id = self.next_sequence_id();
        let frame = encode_command_frame(sequence_id, handler, payload);

        for report in fragment_command_frame(&frame, self.transport.report_size())? {
            self.transport.write_report(&report)?;
            let ack = self.transport.read_report()?;
            if ack.len() < 2 || ack[0] != CMSIS_DAP_AVR_CMD || ack[1] != CMSIS_DAP_AVR_CMD_OK {
                return Err(EdbgError::InvalidResponse(format!(
                    "AVR_CMD not acknowledged: {:02X?}",
                    &ack[..ack.len().min(2)]
                )));
            }
        }

        let response = self.receive_response(sequence_id)?;

        if let Some(code) = response.failure_code() {
            log::debug!(
                "Handler 0x{:02X} command 0x{:02X} failed with code 0x{:02X}",
                handler,
                payload.first().copied().unwrap_or_default(),
                code
            );
            return Err(EdbgError::CommandFailed { handler, code });
        }

        Ok(response)
    }

    fn receive_response(&mut self, sequence_id: u16) -> Result<ResponseFrame> {
        let mut assembled = Vec::new();
        let mut empty_polls = 0;

        loop {
            self.transport.write_report(&[CMSIS_DAP_AVR_RSP])?;
            let report = self.transport.read_report()?;

            let Some(fragment) = parse_response_report(&report)? else {
                empty_polls += 1;
                if empty_polls >= AVR_RSP_MAX_POLLS {
                    return Err(EdbgError::Timeout);
                }
                thread::sleep(Duration::from_millis(AVR_RSP_POLL_INTERVAL_MS));
                continue;
            };

            if fragment.number == 1 {
                assembled.clear();
            }
            assembled.extend_from_slice(&fragment.data);

            if fragment.number < fragment.total {
                continue;
            }

            let response = ResponseFrame::parse(&assembled)?;
            if response.sequence_id == sequence_id {
                return Ok(response);
            }

            log::debug!(
                "Discarding response with sequence id {} (expected {})",
                response.sequence_id,
                sequence_id
            );
            assembled.clear();
        }
    }

    /// Fetch the next pending event, if any
    pub fn poll_event(&mut self) -> Result<Option<AvrEvent>> {
        self.transport.write_report(&[CMSIS_DAP_AVR_EVT])?;
        let report = self.transport.read_report()?;
        let event = parse_event_report(&report)?;
        if let Some(event) = &event {
            log::trace!("AVR event: {:?}", event);
        }
        Ok(event)
    }

    /// Discard every pending event
    pub fn clear_events(&mut self) -> Result<usize> {
        let mut cleared = 0;
        while self.poll_event()?.is_some() {
            cleared += 1;
        }
        if cleared > 0 {
            log::debug!("Cleared {} stale AVR event(s)", cleared);
        }
        Ok(cleared)
    }
}
