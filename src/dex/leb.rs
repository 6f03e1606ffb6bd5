pub(crate) fn encode_uleb128(value: u32) -> Vec<u8> {
    let mut result = Vec::new();
    let mut remaining = value;

    loop {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;

        if remaining != 0 {
            byte |= 0x80;
        }

        result.push(byte);

        if remaining == 0 {
            break;
        }
    }

    result
}

/// Decodes a uleb128 value, returning it with the number of bytes consumed.
/// `None` if the input ends before the final byte of the sequence.
pub(crate) fn decode_uleb128(encoded: &[u8]) -> Option<(u32, usize)> {
    let mut value: u32 = 0;
    let mut shift: u32 = 0;

    for (count, &byte) in encoded.iter().enumerate() {
        let low = (byte & 0x7F) as u32;
        if shift < 32 {
            value |= low.wrapping_shl(shift);
        }
        shift += 7;

        // 32-bit values never take more than 5 bytes
        if byte & 0x80 == 0 || count == 4 {
            return Some((value, count + 1));
        }
    }

    None
}

pub(crate) fn encode_sleb128(value: i32) -> Vec<u8> {
    let mut result = Vec::new();
    let mut remaining = value;

    loop {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;

        let is_more =
            !((remaining == 0 && (byte & 0x40) == 0) || (remaining == -1 && (byte & 0x40) != 0));
        if is_more {
            byte |= 0x80;
        }

        result.push(byte);

        if !is_more {
            break;
        }
    }

    result
}

pub(crate) fn decode_sleb128(encoded: &[u8]) -> Option<(i32, usize)> {
    let mut value: i32 = 0;
    let mut shift: u32 = 0;

    for (count, &byte) in encoded.iter().enumerate() {
        let low = (byte & 0x7F) as i32;
        if shift < 32 {
            value |= low.wrapping_shl(shift);
        }
        shift += 7;

        if byte & 0x80 == 0 || count == 4 {
            // Sign-extend if we didn't fill all 32 bits
            if (byte & 0x40) != 0 && shift < 32 {
                value |= (-1i32).wrapping_shl(shift);
            }
            return Some((value, count + 1));
        }
    }

    None
}

pub(crate) fn encode_uleb128p1(value: i32) -> Vec<u8> {
    encode_uleb128(value.wrapping_add(1) as u32)
}

pub(crate) fn decode_uleb128p1(encoded: &[u8]) -> Option<(i32, usize)> {
    decode_uleb128(encoded).map(|(v, c)| ((v as i32).wrapping_sub(1), c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_uleb128() {
        let cases = vec![
            (0, vec![0x00]),
            (1, vec![0x01]),
            (127, vec![0x7F]),
            (128, vec![0x80, 0x01]),
            (16256, vec![0x80, 0x7F]),
            (624485, vec![0xE5, 0x8E, 0x26]),
            (u32::MAX, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
        ];

        for (value, expected) in cases {
            assert_eq!(encode_uleb128(value), expected);
        }
    }

    #[test]
    fn test_decode_uleb128() {
        let cases = vec![
            (vec![0x00], 0, 1),
            (vec![0x7F], 127, 1),
            (vec![0x80, 0x01], 128, 2),
            (vec![0xE5, 0x8E, 0x26, 0xAA], 624485, 3),
            (vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F], u32::MAX, 5),
        ];

        for (encoded, expected, used) in cases {
            assert_eq!(decode_uleb128(&encoded), Some((expected, used)));
        }
    }

    #[test]
    fn test_decode_uleb128_truncated() {
        assert_eq!(decode_uleb128(&[]), None);
        assert_eq!(decode_uleb128(&[0x80, 0x80]), None);
    }

    #[test]
    fn test_sleb128() {
        let cases = vec![
            (0, vec![0x00]),
            (1, vec![0x01]),
            (-1, vec![0x7F]),
            (-123456, vec![0xC0, 0xBB, 0x78]),
            (-128, vec![0x80, 0x7F]),
            (127, vec![0xFF, 0x00]),
        ];

        for (value, encoded) in cases {
            assert_eq!(encode_sleb128(value), encoded);
            assert_eq!(decode_sleb128(&encoded), Some((value, encoded.len())));
        }
    }

    #[test]
    fn test_uleb128p1_no_index() {
        assert_eq!(encode_uleb128p1(-1), vec![0x00]);
        assert_eq!(decode_uleb128p1(&[0x00]), Some((-1, 1)));
        assert_eq!(decode_uleb128p1(&[0x05]), Some((4, 1)));
    }
}
