//! Command packet parsing
//!
//! Turns the payload of a framed packet into a [`CommandPacket`]. Anything
//! this server does not implement parses to [`CommandPacket::Unsupported`],
//! which is answered with an empty response.

use crate::error::{GdbError, Result};
use crate::hex;

/// Breakpoint flavour from `Z0`/`Z1`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointKind {
    Software,
    Hardware,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandPacket {
    /// `?`
    HaltReason,
    /// `g`
    ReadRegisters,
    /// `G`, register file bytes in GDB order
    WriteRegisters(Vec<u8>),
    /// `p n`
    ReadRegister(u32),
    /// `P n=v`
    WriteRegister { number: u32, value: Vec<u8> },
    /// `m addr,len`
    ReadMemory { address: u32, length: u32 },
    /// `M addr,len:hex` and `X addr,len:bin`
    WriteMemory { address: u32, data: Vec<u8> },
    /// `Z0`/`Z1`
    InsertBreakpoint { kind: BreakpointKind, address: u32 },
    /// `z0`/`z1`
    RemoveBreakpoint { kind: BreakpointKind, address: u32 },
    /// `c [addr]`
    Continue { address: Option<u32> },
    /// `s [addr]`
    Step { address: Option<u32> },
    /// `D`
    Detach,
    /// `k`
    Kill,
    /// `qSupported`, with the client's feature list
    Supported(Vec<String>),
    /// `qAttached`
    Attached,
    /// `qRcmd`, decoded monitor command line
    Monitor(String),
    /// `qXfer:memory-map:read::offset,length`
    MemoryMap { offset: u32, length: u32 },
    /// `vFlashErase:addr,len`
    FlashErase { address: u32, length: u32 },
    /// `vFlashWrite:addr:bin`
    FlashWrite { address: u32, data: Vec<u8> },
    /// `vFlashDone`
    FlashDone,
    /// `vMustReplyEmpty`
    MustReplyEmpty,
    /// Anything else
    Unsupported(String),
}

fn split_once(buf: &[u8], separator: u8) -> Result<(&[u8], &[u8])> {
    let position = buf
        .iter()
        .position(|b| *b == separator)
        .ok_or_else(|| GdbError::malformed(format!("missing '{}'", separator as char)))?;
    Ok((&buf[..position], &buf[position + 1..]))
}

/// Parse `addr,len`
fn address_and_length(buf: &[u8]) -> Result<(u32, u32)> {
    let (address, length) = split_once(buf, b',')?;
    Ok((hex::decode_u32(address)?, hex::decode_u32(length)?))
}

fn optional_address(buf: &[u8]) -> Result<Option<u32>> {
    if buf.is_empty() {
        Ok(None)
    } else {
        hex::decode_u32(buf).map(Some)
    }
}

fn breakpoint(body: &[u8]) -> Result<Option<(BreakpointKind, u32)>> {
    let kind = match body.first() {
        Some(b'0') => BreakpointKind::Software,
        Some(b'1') => BreakpointKind::Hardware,
        _ => return Ok(None),
    };
    // Z0,addr,kind
    let rest = body
        .get(2..)
        .ok_or_else(|| GdbError::malformed("truncated breakpoint packet"))?;
    let (address, _size) = split_once(rest, b',')?;
    Ok(Some((kind, hex::decode_u32(address)?)))
}

fn write_memory(body: &[u8], binary: bool) -> Result<CommandPacket> {
    let (range, data) = split_once(body, b':')?;
    let (address, length) = address_and_length(range)?;
    let data = if binary {
        hex::decode_binary(data)?
    } else {
        hex::decode(data)?
    };
    if data.len() != length as usize {
        return Err(GdbError::malformed(format!(
            "length {} does not match {} data bytes",
            length,
            data.len()
        )));
    }
    Ok(CommandPacket::WriteMemory { address, data })
}

impl CommandPacket {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::HaltReason => "HaltReason",
            Self::ReadRegisters => "ReadRegisters",
            Self::WriteRegisters(_) => "WriteRegisters",
            Self::ReadRegister(_) => "ReadRegister",
            Self::WriteRegister { .. } => "WriteRegister",
            Self::ReadMemory { .. } => "ReadMemory",
            Self::WriteMemory { .. } => "WriteMemory",
            Self::InsertBreakpoint { .. } => "InsertBreakpoint",
            Self::RemoveBreakpoint { .. } => "RemoveBreakpoint",
            Self::Continue { .. } => "Continue",
            Self::Step { .. } => "Step",
            Self::Detach => "Detach",
            Self::Kill => "Kill",
            Self::Supported(_) => "Supported",
            Self::Attached => "Attached",
            Self::Monitor(_) => "Monitor",
            Self::MemoryMap { .. } => "MemoryMap",
            Self::FlashErase { .. } => "FlashErase",
            Self::FlashWrite { .. } => "FlashWrite",
            Self::FlashDone => "FlashDone",
            Self::MustReplyEmpty => "MustReplyEmpty",
            Self::Unsupported(_) => "Unsupported",
        }
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        let Some((&first, body)) = payload.split_first() else {
            return Ok(Self::Unsupported(String::new()));
        };

        let packet = match first {
            b'?' => Self::HaltReason,
            b'g' => Self::ReadRegisters,
            b'G' => Self::WriteRegisters(hex::decode(body)?),
            b'p' => Self::ReadRegister(hex::decode_u32(body)?),
            b'P' => {
                let (number, value) = split_once(body, b'=')?;
                Self::WriteRegister {
                    number: hex::decode_u32(number)?,
                    value: hex::decode(value)?,
                }
            }
            b'm' => {
                let (address, length) = address_and_length(body)?;
                Self::ReadMemory { address, length }
            }
            b'M' => write_memory(body, false)?,
            b'X' => write_memory(body, true)?,
            b'Z' | b'z' => match breakpoint(body)? {
                Some((kind, address)) if first == b'Z' => Self::InsertBreakpoint { kind, address },
                Some((kind, address)) => Self::RemoveBreakpoint { kind, address },
                None => Self::unsupported(payload),
            },
            b'c' => Self::Continue {
                address: optional_address(body)?,
            },
            b's' => Self::Step {
                address: optional_address(body)?,
            },
            b'D' => Self::Detach,
            b'k' => Self::Kill,
            b'q' => Self::parse_query(payload)?,
            b'v' => Self::parse_v(payload)?,
            _ => Self::unsupported(payload),
        };
        Ok(packet)
    }

    fn parse_query(payload: &[u8]) -> Result<Self> {
        if let Some(features) = payload.strip_prefix(b"qSupported") {
            let features = features.strip_prefix(b":").unwrap_or(features);
            return Ok(Self::Supported(
                String::from_utf8_lossy(features)
                    .split(';')
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect(),
            ));
        }
        if payload.starts_with(b"qAttached") {
            return Ok(Self::Attached);
        }
        if let Some(command) = payload.strip_prefix(b"qRcmd,") {
            let command = hex::decode(command)?;
            return Ok(Self::Monitor(String::from_utf8_lossy(&command).trim().to_string()));
        }
        if let Some(range) = payload.strip_prefix(b"qXfer:memory-map:read::") {
            let (offset, length) = address_and_length(range)?;
            return Ok(Self::MemoryMap { offset, length });
        }
        Ok(Self::unsupported(payload))
    }

    fn parse_v(payload: &[u8]) -> Result<Self> {
        if let Some(range) = payload.strip_prefix(b"vFlashErase:") {
            let (address, length) = address_and_length(range)?;
            return Ok(Self::FlashErase { address, length });
        }
        if let Some(body) = payload.strip_prefix(b"vFlashWrite:") {
            let (address, data) = split_once(body, b':')?;
            return Ok(Self::FlashWrite {
                address: hex::decode_u32(address)?,
                data: hex::decode_binary(data)?,
            });
        }
        if payload == b"vFlashDone" {
            return Ok(Self::FlashDone);
        }
        if payload == b"vMustReplyEmpty" {
            return Ok(Self::MustReplyEmpty);
        }
        Ok(Self::unsupported(payload))
    }

    fn unsupported(payload: &[u8]) -> Self {
        Self::Unsupported(String::from_utf8_lossy(payload).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory_packets() {
        assert_eq!(
            CommandPacket::parse(b"m800100,4").unwrap(),
            CommandPacket::ReadMemory {
                address: 0x80_0100,
                length: 4
            }
        );
        assert_eq!(
            CommandPacket::parse(b"M810000,2:abcd").unwrap(),
            CommandPacket::WriteMemory {
                address: 0x81_0000,
                data: vec![0xAB, 0xCD]
            }
        );
        assert_eq!(
            CommandPacket::parse(b"X800200,0:").unwrap(),
            CommandPacket::WriteMemory {
                address: 0x80_0200,
                data: vec![]
            }
        );
        assert!(CommandPacket::parse(b"M810000,3:abcd").is_err());
        assert!(CommandPacket::parse(b"m800100").is_err());
    }

    #[test]
    fn test_parse_registers() {
        assert_eq!(
            CommandPacket::parse(b"p22").unwrap(),
            CommandPacket::ReadRegister(0x22)
        );
        assert_eq!(
            CommandPacket::parse(b"P21=ff08").unwrap(),
            CommandPacket::WriteRegister {
                number: 0x21,
                value: vec![0xFF, 0x08]
            }
        );
    }

    #[test]
    fn test_parse_breakpoints() {
        assert_eq!(
            CommandPacket::parse(b"Z0,1a4,2").unwrap(),
            CommandPacket::InsertBreakpoint {
                kind: BreakpointKind::Software,
                address: 0x1A4
            }
        );
        assert_eq!(
            CommandPacket::parse(b"z1,1a4,2").unwrap(),
            CommandPacket::RemoveBreakpoint {
                kind: BreakpointKind::Hardware,
                address: 0x1A4
            }
        );
        // Watchpoints are not implemented
        assert!(matches!(
            CommandPacket::parse(b"Z2,800100,1").unwrap(),
            CommandPacket::Unsupported(_)
        ));
    }

    #[test]
    fn test_parse_execution_control() {
        assert_eq!(
            CommandPacket::parse(b"c").unwrap(),
            CommandPacket::Continue { address: None }
        );
        assert_eq!(
            CommandPacket::parse(b"s100").unwrap(),
            CommandPacket::Step {
                address: Some(0x100)
            }
        );
    }

    #[test]
    fn test_parse_queries() {
        assert_eq!(
            CommandPacket::parse(b"qSupported:multiprocess+;swbreak+").unwrap(),
            CommandPacket::Supported(vec!["multiprocess+".into(), "swbreak+".into()])
        );
        assert_eq!(
            CommandPacket::parse(b"qRcmd,7265736574").unwrap(),
            CommandPacket::Monitor("reset".into())
        );
        assert_eq!(
            CommandPacket::parse(b"qXfer:memory-map:read::0,fff").unwrap(),
            CommandPacket::MemoryMap {
                offset: 0,
                length: 0xFFF
            }
        );
        assert!(matches!(
            CommandPacket::parse(b"qTStatus").unwrap(),
            CommandPacket::Unsupported(_)
        ));
    }

    #[test]
    fn test_parse_flash_packets() {
        assert_eq!(
            CommandPacket::parse(b"vFlashErase:0,100").unwrap(),
            CommandPacket::FlashErase {
                address: 0,
                length: 0x100
            }
        );
        assert_eq!(
            CommandPacket::parse(b"vFlashWrite:80:\x0c\x94}\x5d").unwrap(),
            CommandPacket::FlashWrite {
                address: 0x80,
                data: vec![0x0C, 0x94, b'}']
            }
        );
        assert_eq!(CommandPacket::parse(b"vFlashDone").unwrap(), CommandPacket::FlashDone);
        assert_eq!(
            CommandPacket::parse(b"vMustReplyEmpty").unwrap(),
            CommandPacket::MustReplyEmpty
        );
        assert!(matches!(
            CommandPacket::parse(b"vCont?").unwrap(),
            CommandPacket::Unsupported(_)
        ));
    }
}
