//! Varint Primitives
//!
//! LEB128 unsigned integers, at most 10 bytes for a full `u64`. Signed
//! values take a zigzag transform first so small negative numbers stay
//! small on the wire.

use super::error::WireError;

/// Longest legal LEB128 encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Append `value` to `buf` as LEB128.
pub fn write_u64(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Decode a LEB128 `u64` from the front of `buf`, returning the value and
/// the number of bytes consumed.
pub fn read_u64(buf: &[u8]) -> Result<(u64, usize), WireError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(WireError::VarintOverflow);
        }
        let low = u64::from(byte & 0x7f);
        // The tenth byte may only contribute the final bit.
        if shift == 63 && low > 1 {
            return Err(WireError::VarintOverflow);
        }
        value |= low << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }
    Err(WireError::UnexpectedEof { needed: 1 })
}

pub fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

pub fn write_i64(buf: &mut Vec<u8>, value: i64) {
    write_u64(buf, zigzag(value));
}

pub fn read_i64(buf: &[u8]) -> Result<(i64, usize), WireError> {
    let (raw, len) = read_u64(buf)?;
    Ok((unzigzag(raw), len))
}

// ----------- Tests -----------

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: u64) -> usize {
        let mut buf = Vec::new();
        write_u64(&mut buf, value);
        let (decoded, len) = read_u64(&buf).expect("decode");
        assert_eq!(decoded, value);
        assert_eq!(len, buf.len());
        buf.len()
    }

    #[test]
    fn small_values_are_one_byte() {
        assert_eq!(round_trip(0), 1);
        assert_eq!(round_trip(127), 1);
        assert_eq!(round_trip(128), 2);
    }

    #[test]
    fn u64_max_is_ten_bytes() {
        assert_eq!(round_trip(u64::MAX), MAX_VARINT_LEN);
    }

    #[test]
    fn truncated_input_is_eof() {
        let mut buf = Vec::new();
        write_u64(&mut buf, 300);
        assert_eq!(
            read_u64(&buf[..1]),
            Err(WireError::UnexpectedEof { needed: 1 })
        );
    }

    #[test]
    fn eleven_continuation_bytes_overflow() {
        let buf = [0x80u8; 11];
        assert_eq!(read_u64(&buf), Err(WireError::VarintOverflow));
    }

    #[test]
    fn tenth_byte_must_fit() {
        // Nine continuation bytes then 0x02 would set bit 64.
        let mut buf = vec![0x80u8; 9];
        buf.push(0x02);
        assert_eq!(read_u64(&buf), Err(WireError::VarintOverflow));
    }

    #[test]
    fn zigzag_interleaves_signs() {
        assert_eq!(zigzag(0), 0);
        assert_eq!(zigzag(-1), 1);
        assert_eq!(zigzag(1), 2);
        assert_eq!(zigzag(-2), 3);
        for v in [i64::MIN, i64::MAX, -12345, 12345] {
            assert_eq!(unzigzag(zigzag(v)), v);
        }
    }
}
