//! Remote protocol framing
//!
//! Packets travel as `$<payload>#<checksum>`, where the checksum is the
//! modulo-256 sum of the payload bytes written as two hex digits. Outside a
//! frame the client may send a bare `+` or `-` acknowledgement, or a single
//! 0x03 byte to interrupt a running target.

/// Largest packet body accepted from the client
pub const MAX_PACKET_SIZE: usize = 2_097_000;

const INTERRUPT: u8 = 0x03;

/// One unit of client input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// `+`
    Ack,
    /// `-`, the last response must be resent
    Nack,
    /// 0x03 outside a frame
    Interrupt,
    /// A frame whose checksum did not match; answered with `-`
    Corrupt,
    /// A frame whose body exceeded [`MAX_PACKET_SIZE`]; its bytes are dropped
    Oversized,
    /// A framed command with a valid checksum
    Command(Vec<u8>),
}

enum State {
    Ready,
    Body,
    Checksum1,
    Checksum2(Option<u8>),
    /// Skipping the rest of an oversized frame, then its checksum
    Discard,
    DiscardChecksum(u8),
}

/// Incremental frame decoder, fed one byte at a time
pub struct PacketDecoder {
    state: State,
    body: Vec<u8>,
    checksum: u8,
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn nibble(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|d| d as u8)
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Ready,
            body: Vec::new(),
            checksum: 0,
        }
    }

    /// Feed one byte, returning a packet once one is complete
    pub fn pump(&mut self, byte: u8) -> Option<Packet> {
        match self.state {
            State::Ready => match byte {
                b'$' => {
                    self.body.clear();
                    self.checksum = 0;
                    self.state = State::Body;
                }
                b'+' => return Some(Packet::Ack),
                b'-' => return Some(Packet::Nack),
                INTERRUPT => return Some(Packet::Interrupt),
                other => log::trace!("Ignoring stray byte 0x{:02X}", other),
            },
            State::Body => {
                if byte == b'#' {
                    self.state = State::Checksum1;
                } else {
                    if self.body.len() >= MAX_PACKET_SIZE {
                        log::warn!("Dropping packet larger than {} bytes", MAX_PACKET_SIZE);
                        self.state = State::Discard;
                        self.body = Vec::new();
                        return None;
                    }
                    self.checksum = self.checksum.wrapping_add(byte);
                    self.body.push(byte);
                }
            }
            State::Checksum1 => self.state = State::Checksum2(nibble(byte)),
            State::Discard => {
                if byte == b'#' {
                    self.state = State::DiscardChecksum(2);
                }
            }
            State::DiscardChecksum(remaining) => {
                if remaining > 1 {
                    self.state = State::DiscardChecksum(remaining - 1);
                } else {
                    self.state = State::Ready;
                    return Some(Packet::Oversized);
                }
            }
            State::Checksum2(high) => {
                self.state = State::Ready;
                let received = high.zip(nibble(byte)).map(|(h, l)| (h << 4) | l);
                if received != Some(self.checksum) {
                    log::debug!(
                        "Checksum mismatch: computed {:02x}, received {:?}",
                        self.checksum,
                        received
                    );
                    self.body.clear();
                    return Some(Packet::Corrupt);
                }
                let body = std::mem::take(&mut self.body);
                log::trace!("<- ${}", String::from_utf8_lossy(&body));
                return Some(Packet::Command(body));
            }
        }
        None
    }

    /// Check whether a frame is partially received
    pub fn in_frame(&self) -> bool {
        !matches!(self.state, State::Ready)
    }
}

/// Frame a response payload, escaping the protocol's reserved bytes
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    let mut checksum = 0u8;
    out.push(b'$');

    for byte in payload {
        if matches!(byte, b'$' | b'#' | b'}' | b'*') {
            out.push(b'}');
            checksum = checksum.wrapping_add(b'}');
            let escaped = byte ^ 0x20;
            out.push(escaped);
            checksum = checksum.wrapping_add(escaped);
        } else {
            out.push(*byte);
            checksum = checksum.wrapping_add(*byte);
        }
    }

    out.push(b'#');
    out.extend_from_slice(format!("{:02x}", checksum).as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Vec<Packet> {
        let mut decoder = PacketDecoder::new();
        input
            .iter()
            .filter_map(|b| decoder.pump(*b))
            .collect()
    }

    #[test]
    fn test_frame_checksum() {
        assert_eq!(frame(b"OK"), b"$OK#9a".to_vec());
        assert_eq!(frame(b""), b"$#00".to_vec());
    }

    #[test]
    fn test_frame_escapes_reserved_bytes() {
        assert_eq!(&frame(b"a#b")[..5], b"$a}\x03b");
    }

    #[test]
    fn test_decodes_command_and_acks() {
        let packets = decode_all(b"+$g#67-");
        assert_eq!(
            packets,
            vec![Packet::Ack, Packet::Command(b"g".to_vec()), Packet::Nack]
        );
    }

    #[test]
    fn test_bad_checksum_is_reported() {
        assert_eq!(decode_all(b"$g#00"), vec![Packet::Corrupt]);
        assert_eq!(decode_all(b"$g#zz"), vec![Packet::Corrupt]);
    }

    #[test]
    fn test_interrupt_only_outside_frame() {
        assert_eq!(decode_all(&[0x03]), vec![Packet::Interrupt]);
        // 0x03 inside a body is payload (checksum of [0x03] is 03)
        assert_eq!(
            decode_all(&[b'$', 0x03, b'#', b'0', b'3']),
            vec![Packet::Command(vec![0x03])]
        );
    }

    #[test]
    fn test_checksum_accepts_uppercase() {
        // 'm' + '0' + ',' + '1' = 0x6d + 0x30 + 0x2c + 0x31 = 0xca
        assert_eq!(
            decode_all(b"$m0,1#CA"),
            vec![Packet::Command(b"m0,1".to_vec())]
        );
    }

    #[test]
    fn test_oversized_body_is_dropped_up_to_checksum() {
        let mut decoder = PacketDecoder::new();
        assert_eq!(decoder.pump(b'$'), None);
        for _ in 0..MAX_PACKET_SIZE + 10 {
            assert_eq!(decoder.pump(b'a'), None);
        }
        assert!(decoder.in_frame());
        assert_eq!(decoder.pump(b'#'), None);
        assert_eq!(decoder.pump(b'0'), None);
        assert_eq!(decoder.pump(b'0'), Some(Packet::Oversized));
        assert!(!decoder.in_frame());

        // The decoder is ready for the next frame
        let packets: Vec<_> = b"$g#67".iter().filter_map(|b| decoder.pump(*b)).collect();
        assert_eq!(packets, vec![Packet::Command(b"g".to_vec())]);
    }
}
