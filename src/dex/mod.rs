#[macro_use]
pub mod error;

pub mod annotations;
pub mod code;
pub mod encoded_values;
pub(crate) mod leb;
pub mod model;
pub(crate) mod opcodes;
pub(crate) mod parser;
pub(crate) mod writer;

use crate::dex::error::DexError;
use crate::dex::leb::{decode_sleb128, decode_uleb128, decode_uleb128p1, encode_sleb128, encode_uleb128, encode_uleb128p1};

// Basic type reading and writing
pub(crate) fn read_u1(bytes: &[u8], ix: &mut usize) -> Result<u8, DexError>
{
    let Some(&result) = bytes.get(*ix) else {
        return Err(DexError::truncated(*ix, 1));
    };
    *ix += 1;
    Ok(result)
}

pub(crate) fn read_u2(bytes: &[u8], ix: &mut usize) -> Result<u16, DexError>
{
    if bytes.len() < *ix + 2
    {
        return Err(DexError::truncated(*ix, 2));
    }
    let result = ((bytes[*ix + 1] as u16) << 8) | (bytes[*ix] as u16);
    *ix += 2;
    Ok(result)
}

pub(crate) fn read_u4(bytes: &[u8], ix: &mut usize) -> Result<u32, DexError>
{
    if bytes.len() < *ix + 4
    {
        return Err(DexError::truncated(*ix, 4));
    }
    let result =
        ((bytes[*ix + 3] as u32) << 24) | ((bytes[*ix + 2] as u32) << 16) | ((bytes[*ix + 1] as u32) << 8) | (bytes[*ix] as u32);
    *ix += 4;
    Ok(result)
}

pub(crate) fn read_uleb128(bytes: &[u8], ix: &mut usize) -> Result<u32, DexError>
{
    let (val, size) = decode_uleb128(bytes.get(*ix..).unwrap_or_default())
        .ok_or_else(|| DexError::truncated(*ix, bytes.len().saturating_sub(*ix) + 1))?;
    *ix += size;
    Ok(val)
}

pub(crate) fn read_sleb128(bytes: &[u8], ix: &mut usize) -> Result<i32, DexError>
{
    let (val, size) = decode_sleb128(bytes.get(*ix..).unwrap_or_default())
        .ok_or_else(|| DexError::truncated(*ix, bytes.len().saturating_sub(*ix) + 1))?;
    *ix += size;
    Ok(val)
}

pub(crate) fn read_uleb128p1(bytes: &[u8], ix: &mut usize) -> Result<i32, DexError>
{
    let (val, size) = decode_uleb128p1(bytes.get(*ix..).unwrap_or_default())
        .ok_or_else(|| DexError::truncated(*ix, bytes.len().saturating_sub(*ix) + 1))?;
    *ix += size;
    Ok(val)
}

pub(crate) fn read_x(bytes: &[u8], ix: &mut usize, length: usize) -> Result<Vec<u8>, DexError>
{
    match ix.checked_add(length) {
        Some(end) if end <= bytes.len() => {
            let v = bytes[*ix..end].to_vec();
            *ix = end;
            Ok(v)
        }
        _ => Err(DexError::truncated(*ix, length)),
    }
}

pub(crate) fn write_u1(buffer: &mut Vec<u8>, val: u8) -> usize
{
    buffer.push(val);
    1
}

pub(crate) fn write_u2(buffer: &mut Vec<u8>, val: u16) -> usize
{
    buffer.extend_from_slice(&val.to_le_bytes());
    2
}

pub(crate) fn write_u4(buffer: &mut Vec<u8>, val: u32) -> usize
{
    buffer.extend_from_slice(&val.to_le_bytes());
    4
}

/// Writes a table index into a 16-bit field.
pub(crate) fn write_idx16(buffer: &mut Vec<u8>, val: u32) -> Result<usize, DexError>
{
    let narrow = u16::try_from(val).map_err(|_| DexError::overflow(val, 16))?;
    Ok(write_u2(buffer, narrow))
}

/// Writes an optional table index into a 32-bit field, `None` becoming `NO_INDEX`.
pub(crate) fn write_idx32(buffer: &mut Vec<u8>, val: Option<u32>) -> Result<usize, DexError>
{
    match val {
        Some(NO_INDEX) => Err(DexError::overflow(NO_INDEX, 32)),
        Some(v) => Ok(write_u4(buffer, v)),
        None => Ok(write_u4(buffer, NO_INDEX)),
    }
}

pub(crate) fn write_uleb128(buffer: &mut Vec<u8>, val: u32) -> usize
{
    let encoded = encode_uleb128(val);
    let c = encoded.len();
    buffer.extend(encoded);
    c
}

pub(crate) fn write_sleb128(buffer: &mut Vec<u8>, val: i32) -> usize
{
    let encoded = encode_sleb128(val);
    let c = encoded.len();
    buffer.extend(encoded);
    c
}

pub(crate) fn write_uleb128p1(buffer: &mut Vec<u8>, val: i32) -> usize
{
    let encoded = encode_uleb128p1(val);
    let c = encoded.len();
    buffer.extend(encoded);
    c
}

/// Writes an optional index as uleb128p1, `None` encoding as -1.
pub(crate) fn write_opt_uleb128p1(buffer: &mut Vec<u8>, val: Option<u32>) -> Result<usize, DexError>
{
    match val {
        None => Ok(write_uleb128p1(buffer, -1)),
        Some(v) if v < i32::MAX as u32 => Ok(write_uleb128p1(buffer, v as i32)),
        Some(v) => Err(DexError::overflow(v, 31)),
    }
}

pub(crate) fn write_x(buffer: &mut Vec<u8>, val: &[u8]) -> usize
{
    let len = val.len();
    buffer.extend(val);
    len
}

/// Sentinel for an absent 32-bit index.
pub const NO_INDEX: u32 = 0xffffffff;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_width_reads_advance_the_cursor() {
        let bytes = [0x01, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12];
        let mut ix = 0;
        assert_eq!(read_u1(&bytes, &mut ix).unwrap(), 0x01);
        assert_eq!(read_u2(&bytes, &mut ix).unwrap(), 0x1234);
        assert_eq!(read_u4(&bytes, &mut ix).unwrap(), 0x12345678);
        assert_eq!(ix, bytes.len());
    }

    #[test]
    fn reads_past_the_end_are_truncated_input() {
        let bytes = [0x01, 0x02, 0x03];
        let mut ix = 1;
        assert_eq!(read_u4(&bytes, &mut ix), Err(DexError::TruncatedInput { offset: 1, needed: 4 }));
        assert_eq!(ix, 1);

        let mut ix = 2;
        assert!(matches!(read_x(&bytes, &mut ix, 2), Err(DexError::TruncatedInput { offset: 2, needed: 2 })));

        let mut ix = 3;
        assert!(matches!(read_u1(&bytes, &mut ix), Err(DexError::TruncatedInput { .. })));

        let unterminated = [0x80, 0x80];
        let mut ix = 0;
        assert!(matches!(read_uleb128(&unterminated, &mut ix), Err(DexError::TruncatedInput { .. })));

        // cursor beyond the end must not panic
        let mut ix = 10;
        assert!(read_uleb128(&bytes, &mut ix).is_err());
    }

    #[test]
    fn index_writers_reject_values_wider_than_the_field() {
        let mut buf = vec![];
        assert_eq!(write_idx16(&mut buf, 0xffff), Ok(2));
        assert_eq!(write_idx16(&mut buf, 0x1_0000), Err(DexError::EncodingOverflow { value: 0x1_0000, width: 16 }));
        assert_eq!(buf, vec![0xff, 0xff]);

        let mut buf = vec![];
        assert_eq!(write_idx32(&mut buf, None), Ok(4));
        assert_eq!(buf, vec![0xff; 4]);
        assert!(write_idx32(&mut buf, Some(NO_INDEX)).is_err());
    }

    #[test]
    fn optional_index_uses_p1_encoding() {
        let mut buf = vec![];
        write_opt_uleb128p1(&mut buf, None).unwrap();
        write_opt_uleb128p1(&mut buf, Some(3)).unwrap();
        assert_eq!(buf, vec![0x00, 0x04]);
    }
}
