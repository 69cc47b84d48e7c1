//! Hex and binary payload encoding used by the remote protocol

use crate::error::{GdbError, Result};

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

fn ascii_to_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Lowercase hex encoding of a byte buffer
pub fn encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        out.push(HEX_DIGITS[(byte >> 4) as usize] as char);
        out.push(HEX_DIGITS[(byte & 0xF) as usize] as char);
    }
    out
}

/// Decode a hex buffer into bytes
pub fn decode(buf: &[u8]) -> Result<Vec<u8>> {
    if buf.len() % 2 != 0 {
        return Err(GdbError::malformed("odd number of hex digits"));
    }

    buf.chunks_exact(2)
        .map(|pair| {
            let high = ascii_to_nibble(pair[0]);
            let low = ascii_to_nibble(pair[1]);
            match (high, low) {
                (Some(high), Some(low)) => Ok((high << 4) | low),
                _ => Err(GdbError::malformed("invalid hex digit")),
            }
        })
        .collect()
}

/// Parse a hex number such as an address or length
pub fn decode_u32(buf: &[u8]) -> Result<u32> {
    if buf.is_empty() {
        return Err(GdbError::malformed("empty number"));
    }

    buf.iter().try_fold(0u32, |acc, digit| {
        let nibble = ascii_to_nibble(*digit).ok_or_else(|| GdbError::malformed("invalid hex digit"))?;
        acc.checked_mul(16)
            .map(|acc| acc | u32::from(nibble))
            .ok_or_else(|| GdbError::malformed("number overflows 32 bits"))
    })
}

/// Undo the `}` escaping of binary packet data
pub fn decode_binary(buf: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(buf.len());
    let mut bytes = buf.iter();
    while let Some(byte) = bytes.next() {
        if *byte == b'}' {
            let escaped = bytes
                .next()
                .ok_or_else(|| GdbError::malformed("truncated escape sequence"))?;
            out.push(escaped ^ 0x20);
        } else {
            out.push(*byte);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_lowercase() {
        assert_eq!(encode(&[0x00, 0xAB, 0x7F]), "00ab7f");
        assert_eq!(encode(&[]), "");
    }

    #[test]
    fn test_decode_accepts_both_cases() {
        assert_eq!(decode(b"00aBFf").unwrap(), vec![0x00, 0xAB, 0xFF]);
        assert!(decode(b"abc").is_err());
        assert!(decode(b"zz").is_err());
    }

    #[test]
    fn test_decode_u32() {
        assert_eq!(decode_u32(b"800100").unwrap(), 0x0080_0100);
        assert_eq!(decode_u32(b"FFFFFFFF").unwrap(), u32::MAX);
        assert!(decode_u32(b"100000000").is_err());
        assert!(decode_u32(b"").is_err());
        assert!(decode_u32(b"12g").is_err());
    }

    #[test]
    fn test_decode_binary_unescapes() {
        // '}' followed by 0x5d encodes '}', 0x03 encodes '#'
        assert_eq!(
            decode_binary(&[0x01, b'}', 0x5D, b'}', 0x03, 0xFF]).unwrap(),
            vec![0x01, b'}', b'#', 0xFF]
        );
        assert!(decode_binary(&[0x01, b'}']).is_err());
    }
}
