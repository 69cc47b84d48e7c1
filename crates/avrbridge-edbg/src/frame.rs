//! EDBG frame encoding
//!
//! An EDBG command frame is split over one or more CMSIS-DAP `AVR_CMD`
//! reports. Responses come back in `AVR_RSP` reports and are reassembled
//! here. Asynchronous events arrive in `AVR_EVT` reports and are decoded into
//! [`AvrEvent`] at this boundary so nothing above sees raw event bytes.

use avrbridge_core::target::BreakCause;

use crate::error::{EdbgError, Result};
use crate::protocol::*;

/// Build a command frame: `[SOF, version, seq_lo, seq_hi, handler, payload...]`
pub fn encode_command_frame(sequence_id: u16, handler: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(COMMAND_FRAME_HEADER_SIZE + payload.len());
    frame.push(EDBG_SOF);
    frame.push(EDBG_PROTOCOL_VERSION);
    frame.extend_from_slice(&sequence_id.to_le_bytes());
    frame.push(handler);
    frame.extend_from_slice(payload);
    frame
}

/// Split a command frame into `AVR_CMD` reports
///
/// Each report is `[AVR_CMD, (n << 4) | total, len_hi, len_lo, data...]`
/// with a one based fragment number.
pub fn fragment_command_frame(frame: &[u8], report_size: usize) -> Result<Vec<Vec<u8>>> {
    let chunk_size = report_size
        .checked_sub(AVR_CMD_HEADER_SIZE)
        .filter(|size| *size > 0)
        .ok_or_else(|| EdbgError::InvalidResponse(format!("report size {}", report_size)))?;

    let total = frame.len().div_ceil(chunk_size).max(1);
    if total > 0x0F {
        return Err(EdbgError::InvalidResponse(format!(
            "command frame of {} bytes needs {} fragments",
            frame.len(),
            total
        )));
    }

    let reports = frame
        .chunks(chunk_size)
        .enumerate()
        .map(|(index, chunk)| {
            let mut report = Vec::with_capacity(AVR_CMD_HEADER_SIZE + chunk.len());
            report.push(CMSIS_DAP_AVR_CMD);
            report.push((((index + 1) as u8) << 4) | total as u8);
            report.extend_from_slice(&(chunk.len() as u16).to_be_bytes());
            report.extend_from_slice(chunk);
            report
        })
        .collect();

    Ok(reports)
}

/// One fragment of a response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFragment {
    /// One based fragment number
    pub number: u8,
    /// Total number of fragments
    pub total: u8,
    /// Fragment data
    pub data: Vec<u8>,
}

/// Decode an `AVR_RSP` report. `None` means the tool has no response yet.
pub fn parse_response_report(report: &[u8]) -> Result<Option<ResponseFragment>> {
    if report.len() < 2 || report[0] != CMSIS_DAP_AVR_RSP {
        return Err(EdbgError::InvalidResponse(format!(
            "unexpected AVR_RSP report {:02X?}",
            &report[..report.len().min(4)]
        )));
    }

    let fragment_info = report[1];
    if fragment_info == 0 {
        return Ok(None);
    }

    if report.len() < AVR_RSP_HEADER_SIZE {
        return Err(EdbgError::InvalidResponse("truncated AVR_RSP report".into()));
    }

    let length = u16::from_be_bytes([report[2], report[3]]) as usize;
    let data = report
        .get(AVR_RSP_HEADER_SIZE..AVR_RSP_HEADER_SIZE + length)
        .ok_or_else(|| EdbgError::InvalidResponse("AVR_RSP length exceeds report".into()))?;

    Ok(Some(ResponseFragment {
        number: fragment_info >> 4,
        total: fragment_info & 0x0F,
        data: data.to_vec(),
    }))
}

/// A decoded response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Sequence id of the command this answers
    pub sequence_id: u16,
    /// Handler that produced the response
    pub handler: u8,
    /// Response payload, starting with the response id
    pub payload: Vec<u8>,
}

impl ResponseFrame {
    /// Decode `[SOF, seq_lo, seq_hi, handler, payload...]`
    pub fn parse(frame: &[u8]) -> Result<Self> {
        if frame.len() < RESPONSE_FRAME_HEADER_SIZE + 1 || frame[0] != EDBG_SOF {
            return Err(EdbgError::InvalidResponse(format!(
                "malformed response frame {:02X?}",
                &frame[..frame.len().min(8)]
            )));
        }

        Ok(Self {
            sequence_id: u16::from_le_bytes([frame[1], frame[2]]),
            handler: frame[3],
            payload: frame[RESPONSE_FRAME_HEADER_SIZE..].to_vec(),
        })
    }

    /// Response id (first payload byte)
    pub fn response_id(&self) -> u8 {
        self.payload[0]
    }

    /// Failure code of a FAILED response
    pub fn failure_code(&self) -> Option<u8> {
        if self.response_id() != AVR8_RSP_FAILED {
            return None;
        }
        Some(self.payload.get(2).copied().unwrap_or(AVR8_FAILURE_UNKNOWN))
    }
}

/// An asynchronous event from the tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvrEvent {
    /// The target stopped
    Break {
        /// Program counter as a byte address
        pc: u32,
        /// Why the target stopped
        cause: BreakCause,
    },
    /// Any other event
    Other {
        /// Handler that raised the event
        handler: u8,
        /// Event id
        event_id: u8,
        /// Event data after the id
        data: Vec<u8>,
    },
}

/// Decode an `AVR_EVT` report. `None` means no event is pending.
pub fn parse_event_report(report: &[u8]) -> Result<Option<AvrEvent>> {
    if report.len() < AVR_EVT_HEADER_SIZE || report[0] != CMSIS_DAP_AVR_EVT {
        return Err(EdbgError::InvalidResponse(format!(
            "unexpected AVR_EVT report {:02X?}",
            &report[..report.len().min(4)]
        )));
    }

    let length = u16::from_be_bytes([report[1], report[2]]) as usize;
    if length == 0 {
        return Ok(None);
    }

    let frame = report
        .get(AVR_EVT_HEADER_SIZE..AVR_EVT_HEADER_SIZE + length)
        .ok_or_else(|| EdbgError::InvalidResponse("AVR_EVT length exceeds report".into()))?;

    if frame.len() < RESPONSE_FRAME_HEADER_SIZE + 1 || frame[0] != EDBG_SOF {
        return Err(EdbgError::InvalidResponse(format!(
            "malformed event frame {:02X?}",
            frame
        )));
    }

    let handler = frame[3];
    let event_id = frame[RESPONSE_FRAME_HEADER_SIZE];
    let data = &frame[RESPONSE_FRAME_HEADER_SIZE + 1..];

    if handler == HANDLER_AVR8_GENERIC && event_id == AVR8_EVT_BREAK && data.len() >= 5 {
        let pc_words = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let cause = if data[4] == AVR8_BREAK_CAUSE_PROGRAM_BREAKPOINT {
            BreakCause::Breakpoint
        } else {
            BreakCause::Unknown
        };
        return Ok(Some(AvrEvent::Break {
            pc: pc_words * 2,
            cause,
        }));
    }

    Ok(Some(AvrEvent::Other {
        handler,
        event_id,
        data: data.to_vec(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_frame_layout() {
        let frame = encode_command_frame(0x1234, HANDLER_AVR8_GENERIC, &[AVR8_RUN, 0x00]);
        assert_eq!(frame, vec![0x0E, 0x00, 0x34, 0x12, 0x12, 0x32, 0x00]);
    }

    #[test]
    fn test_single_fragment() {
        let frame = encode_command_frame(1, HANDLER_AVR8_GENERIC, &[AVR8_STOP, 0x00, 0x01]);
        let reports = fragment_command_frame(&frame, 64).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0][0], CMSIS_DAP_AVR_CMD);
        assert_eq!(reports[0][1], 0x11);
        assert_eq!(&reports[0][2..4], &[0x00, frame.len() as u8]);
        assert_eq!(&reports[0][4..], &frame[..]);
    }

    #[test]
    fn test_multi_fragment_numbering() {
        let payload = vec![0xAA; 150];
        let frame = encode_command_frame(7, HANDLER_AVR8_GENERIC, &payload);
        let reports = fragment_command_frame(&frame, 64).unwrap();

        // 155 bytes over 60 byte chunks
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0][1], 0x13);
        assert_eq!(reports[1][1], 0x23);
        assert_eq!(reports[2][1], 0x33);
        assert_eq!(u16::from_be_bytes([reports[2][2], reports[2][3]]), 35);

        let reassembled: Vec<u8> = reports.iter().flat_map(|r| r[4..].to_vec()).collect();
        assert_eq!(reassembled, frame);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let frame = vec![0u8; 16 * 60 + 1];
        assert!(fragment_command_frame(&frame, 64).is_err());
    }

    #[test]
    fn test_empty_response_report() {
        assert_eq!(parse_response_report(&[0x81, 0x00, 0x00, 0x00]).unwrap(), None);
        assert!(parse_response_report(&[0x80, 0x01]).is_err());
    }

    #[test]
    fn test_response_frame_failure_code() {
        let report = [0x81, 0x11, 0x00, 0x07, 0x0E, 0x05, 0x00, 0x12, 0xA0, 0x00, 0x44];
        let fragment = parse_response_report(&report).unwrap().unwrap();
        assert_eq!((fragment.number, fragment.total), (1, 1));

        let response = ResponseFrame::parse(&fragment.data).unwrap();
        assert_eq!(response.sequence_id, 5);
        assert_eq!(response.handler, HANDLER_AVR8_GENERIC);
        assert_eq!(response.failure_code(), Some(AVR8_FAILURE_FAILED_TO_ENABLE_OCD));
    }

    #[test]
    fn test_break_event_decoding() {
        let mut report = vec![0x82, 0x00, 0x0A];
        report.extend_from_slice(&[0x0E, 0x00, 0x00, 0x12, 0x40, 0x40, 0x00, 0x00, 0x00, 0x01]);
        let event = parse_event_report(&report).unwrap().unwrap();
        assert_eq!(
            event,
            AvrEvent::Break {
                pc: 0x80,
                cause: BreakCause::Breakpoint
            }
        );

        assert_eq!(parse_event_report(&[0x82, 0x00, 0x00]).unwrap(), None);
    }

    #[test]
    fn test_other_event_decoding() {
        let report = [0x82, 0x00, 0x06, 0x0E, 0x00, 0x00, 0x12, 0x41, 0x55];
        let event = parse_event_report(&report).unwrap().unwrap();
        assert_eq!(
            event,
            AvrEvent::Other {
                handler: 0x12,
                event_id: AVR8_EVT_IDR,
                data: vec![0x55]
            }
        );
    }
}
