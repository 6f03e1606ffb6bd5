use crate::dex::error::DexError;
use crate::dex::{read_u1, read_uleb128, write_u1, write_uleb128, write_x};
use crate::graph::Table;

#[derive(Debug, PartialEq, Clone)]
pub struct EncodedAnnotation {
    pub type_idx: u32,
    pub elements: Vec<AnnotationElement>,
}

impl EncodedAnnotation {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<EncodedAnnotation, DexError> {
        let type_idx = read_uleb128(bytes, ix)?;
        let size = read_uleb128(bytes, ix)? as usize;
        let mut elements = Vec::with_capacity(size.min(bytes.len()));

        for _ in 0..size {
            let element = AnnotationElement::read(bytes, ix)?;
            elements.push(element);
        }

        Ok(EncodedAnnotation { type_idx, elements })
    }

    /// String constants among the element values. Element names are skipped.
    pub fn string_literals_mut(&mut self, f: &mut dyn FnMut(&mut u32)) {
        for element in &mut self.elements {
            element.value.string_literals_mut(f);
        }
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut written_bytes = 0;

        written_bytes += write_uleb128(bytes, self.type_idx);
        written_bytes += write_uleb128(bytes, self.elements.len() as u32);

        for element in &self.elements {
            written_bytes += element.write(bytes);
        }

        written_bytes
    }

    /// Visits every index in preorder: the annotation type, then each element's name and value.
    pub fn refs(&self, f: &mut dyn FnMut(Table, u32)) {
        f(Table::Type, self.type_idx);
        for e in &self.elements {
            f(Table::String, e.name_idx);
            e.value.refs(f);
        }
    }

    pub fn refs_mut(&mut self, f: &mut dyn FnMut(Table, &mut u32)) {
        f(Table::Type, &mut self.type_idx);
        for e in &mut self.elements {
            f(Table::String, &mut e.name_idx);
            e.value.refs_mut(f);
        }
    }

    /// Elements must be stored sorted by name index.
    pub(crate) fn sort_elements(&mut self) {
        self.elements.sort_by_key(|e| e.name_idx);
        for e in &mut self.elements {
            e.value.sort_nested();
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct AnnotationElement {
    pub name_idx: u32,
    pub value: EncodedValue,
}

impl AnnotationElement {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<AnnotationElement, DexError> {
        let name_idx = read_uleb128(bytes, ix)?;
        let value = EncodedValue::read(bytes, ix)?;

        Ok(AnnotationElement { name_idx, value })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut written_bytes = 0;

        written_bytes += write_uleb128(bytes, self.name_idx);
        written_bytes += self.value.write(bytes);

        written_bytes
    }
}

const VALUE_BYTE: u8 = 0x00;
const VALUE_SHORT: u8 = 0x02;
const VALUE_CHAR: u8 = 0x03;
const VALUE_INT: u8 = 0x04;
const VALUE_LONG: u8 = 0x06;
const VALUE_FLOAT: u8 = 0x10;
const VALUE_DOUBLE: u8 = 0x11;
const VALUE_METHOD_TYPE: u8 = 0x15;
const VALUE_METHOD_HANDLE: u8 = 0x16;
const VALUE_STRING: u8 = 0x17;
const VALUE_TYPE: u8 = 0x18;
const VALUE_FIELD: u8 = 0x19;
const VALUE_METHOD: u8 = 0x1a;
const VALUE_ENUM: u8 = 0x1b;
const VALUE_ARRAY: u8 = 0x1c;
const VALUE_ANNOTATION: u8 = 0x1d;
const VALUE_NULL: u8 = 0x1e;
const VALUE_BOOLEAN: u8 = 0x1f;

/// encoded_value. Method handles are not modelled: reading one is an unsupported-format error.
#[derive(Debug, PartialEq, Clone)]
pub enum EncodedValue {
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    MethodType(u32),
    String(u32),
    Type(u32),
    Field(u32),
    Method(u32),
    Enum(u32),
    Array(Vec<EncodedValue>),
    Annotation(EncodedAnnotation),
    Null,
    Boolean(bool),
}

impl EncodedValue
{
    #[inline]
    pub fn as_annotation(&self) -> Option<&EncodedAnnotation> {
        match self {
            EncodedValue::Annotation(ann) => Some(ann),
            _ => None,
        }
    }

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<EncodedValue, DexError> {
        let start = *ix;
        let header_byte = read_u1(bytes, ix)?;
        let value_arg = header_byte >> 5;
        let value_type = header_byte & 0x1F;
        let size = (value_arg + 1) as usize;

        let check_size = |max: usize| {
            if size > max { Err(malformed!(Table::Class, start)) } else { Ok(()) }
        };

        match value_type {
            VALUE_BYTE => {
                check_size(1)?;
                Ok(EncodedValue::Byte(read_u1(bytes, ix)? as i8))
            },
            VALUE_SHORT => {
                check_size(2)?;
                Ok(EncodedValue::Short(read_signed(bytes, ix, size)? as i16))
            },
            VALUE_CHAR => {
                check_size(2)?;
                Ok(EncodedValue::Char(read_unsigned(bytes, ix, size)? as u16))
            },
            VALUE_INT => {
                check_size(4)?;
                Ok(EncodedValue::Int(read_signed(bytes, ix, size)? as i32))
            },
            VALUE_LONG => {
                check_size(8)?;
                Ok(EncodedValue::Long(read_signed(bytes, ix, size)?))
            },
            VALUE_FLOAT => {
                check_size(4)?;
                let bits = read_unsigned(bytes, ix, size)? << (8 * (4 - size));
                Ok(EncodedValue::Float(f32::from_bits(bits as u32)))
            },
            VALUE_DOUBLE => {
                check_size(8)?;
                let bits = read_unsigned(bytes, ix, size)? << (8 * (8 - size));
                Ok(EncodedValue::Double(f64::from_bits(bits)))
            },
            VALUE_METHOD_TYPE => {
                check_size(4)?;
                Ok(EncodedValue::MethodType(read_unsigned(bytes, ix, size)? as u32))
            },
            VALUE_METHOD_HANDLE => Err(unsupported!("method handle value at offset 0x{:x}", start)),
            VALUE_STRING => {
                check_size(4)?;
                Ok(EncodedValue::String(read_unsigned(bytes, ix, size)? as u32))
            },
            VALUE_TYPE => {
                check_size(4)?;
                Ok(EncodedValue::Type(read_unsigned(bytes, ix, size)? as u32))
            },
            VALUE_FIELD => {
                check_size(4)?;
                Ok(EncodedValue::Field(read_unsigned(bytes, ix, size)? as u32))
            },
            VALUE_METHOD => {
                check_size(4)?;
                Ok(EncodedValue::Method(read_unsigned(bytes, ix, size)? as u32))
            },
            VALUE_ENUM => {
                check_size(4)?;
                Ok(EncodedValue::Enum(read_unsigned(bytes, ix, size)? as u32))
            },
            VALUE_ARRAY => Ok(EncodedValue::Array(read_encoded_array(bytes, ix)?)),
            VALUE_ANNOTATION => Ok(EncodedValue::Annotation(EncodedAnnotation::read(bytes, ix)?)),
            VALUE_NULL => Ok(EncodedValue::Null),
            VALUE_BOOLEAN => Ok(EncodedValue::Boolean(value_arg != 0)),
            _ => Err(malformed!(Table::Class, start)),
        }
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        match self {
            EncodedValue::Byte(val) => {
                write_u1(bytes, VALUE_BYTE) + write_u1(bytes, *val as u8)
            },
            EncodedValue::Short(v) => write_signed(bytes, VALUE_SHORT, *v as i64),
            EncodedValue::Char(v) => write_unsigned(bytes, VALUE_CHAR, *v as u64),
            EncodedValue::Int(v) => write_signed(bytes, VALUE_INT, *v as i64),
            EncodedValue::Long(v) => write_signed(bytes, VALUE_LONG, *v),
            EncodedValue::Float(v) => write_right_zero_extended(bytes, VALUE_FLOAT, v.to_bits() as u64, 4),
            EncodedValue::Double(v) => write_right_zero_extended(bytes, VALUE_DOUBLE, v.to_bits(), 8),
            EncodedValue::MethodType(v) => write_unsigned(bytes, VALUE_METHOD_TYPE, *v as u64),
            EncodedValue::String(v) => write_unsigned(bytes, VALUE_STRING, *v as u64),
            EncodedValue::Type(v) => write_unsigned(bytes, VALUE_TYPE, *v as u64),
            EncodedValue::Field(v) => write_unsigned(bytes, VALUE_FIELD, *v as u64),
            EncodedValue::Method(v) => write_unsigned(bytes, VALUE_METHOD, *v as u64),
            EncodedValue::Enum(v) => write_unsigned(bytes, VALUE_ENUM, *v as u64),
            EncodedValue::Array(values) => write_u1(bytes, VALUE_ARRAY) + write_encoded_array(values, bytes),
            EncodedValue::Annotation(value) => write_u1(bytes, VALUE_ANNOTATION) + value.write(bytes),
            EncodedValue::Null => write_u1(bytes, VALUE_NULL),
            EncodedValue::Boolean(val) => write_u1(bytes, VALUE_BOOLEAN | ((*val as u8) << 5)),
        }
    }

    /// Visits every table index held by this value, nested values in preorder.
    pub fn refs(&self, f: &mut dyn FnMut(Table, u32)) {
        match self {
            EncodedValue::MethodType(v) => f(Table::Proto, *v),
            EncodedValue::String(v) => f(Table::String, *v),
            EncodedValue::Type(v) => f(Table::Type, *v),
            EncodedValue::Field(v) | EncodedValue::Enum(v) => f(Table::Field, *v),
            EncodedValue::Method(v) => f(Table::Method, *v),
            EncodedValue::Array(values) => values.iter().for_each(|v| v.refs(f)),
            EncodedValue::Annotation(a) => a.refs(f),
            _ => {}
        }
    }

    pub fn refs_mut(&mut self, f: &mut dyn FnMut(Table, &mut u32)) {
        match self {
            EncodedValue::MethodType(v) => f(Table::Proto, v),
            EncodedValue::String(v) => f(Table::String, v),
            EncodedValue::Type(v) => f(Table::Type, v),
            EncodedValue::Field(v) | EncodedValue::Enum(v) => f(Table::Field, v),
            EncodedValue::Method(v) => f(Table::Method, v),
            EncodedValue::Array(values) => values.iter_mut().for_each(|v| v.refs_mut(f)),
            EncodedValue::Annotation(a) => a.refs_mut(f),
            _ => {}
        }
    }

    /// String constants held as values, including those inside nested arrays and
    /// annotations. Names of annotation elements are not literals and are skipped.
    pub fn string_literals_mut(&mut self, f: &mut dyn FnMut(&mut u32)) {
        match self {
            EncodedValue::String(v) => f(v),
            EncodedValue::Array(values) => values.iter_mut().for_each(|v| v.string_literals_mut(f)),
            EncodedValue::Annotation(a) => a.string_literals_mut(f),
            _ => {}
        }
    }

    pub(crate) fn sort_nested(&mut self) {
        match self {
            EncodedValue::Array(values) => values.iter_mut().for_each(|v| v.sort_nested()),
            EncodedValue::Annotation(a) => a.sort_elements(),
            _ => {}
        }
    }
}

fn read_unsigned(bytes: &[u8], ix: &mut usize, size: usize) -> Result<u64, DexError> {
    let mut result = 0u64;
    for i in 0..size {
        let byte = read_u1(bytes, ix)?;
        result |= (byte as u64) << (8 * i);
    }
    Ok(result)
}

fn read_signed(bytes: &[u8], ix: &mut usize, size: usize) -> Result<i64, DexError> {
    let raw = read_unsigned(bytes, ix, size)?;
    let shift = 64 - 8 * size as u32;
    Ok(((raw << shift) as i64) >> shift)
}

// Smallest byte count whose sign extension gives back the value.
fn signed_size(v: i64) -> usize {
    let magnitude = if v < 0 { !v } else { v };
    let bits = 64 - magnitude.leading_zeros() as usize + 1;
    bits.div_ceil(8).max(1)
}

fn unsigned_size(v: u64) -> usize {
    let bits = 64 - v.leading_zeros() as usize;
    bits.div_ceil(8).max(1)
}

fn write_signed(bytes: &mut Vec<u8>, value_type: u8, v: i64) -> usize {
    let size = signed_size(v);
    write_u1(bytes, (((size - 1) as u8) << 5) | value_type) + write_x(bytes, &v.to_le_bytes()[..size])
}

fn write_unsigned(bytes: &mut Vec<u8>, value_type: u8, v: u64) -> usize {
    let size = unsigned_size(v);
    write_u1(bytes, (((size - 1) as u8) << 5) | value_type) + write_x(bytes, &v.to_le_bytes()[..size])
}

// Floating point values drop their low-order zero bytes and keep the high ones.
fn write_right_zero_extended(bytes: &mut Vec<u8>, value_type: u8, bits: u64, width: usize) -> usize {
    let dropped = ((bits.trailing_zeros() / 8) as usize).min(width - 1);
    let size = width - dropped;
    let le = bits.to_le_bytes();
    write_u1(bytes, (((size - 1) as u8) << 5) | value_type) + write_x(bytes, &le[dropped..width])
}

pub fn write_encoded_array(encoded_array: &[EncodedValue], bytes: &mut Vec<u8>) -> usize
{
    let mut c = 0;
    c += write_uleb128(bytes, encoded_array.len() as u32);

    for value in encoded_array {
        c += value.write(bytes);
    }

    c
}

pub fn read_encoded_array(bytes: &[u8], ix: &mut usize) -> Result<Vec<EncodedValue>, DexError>
{
    let size = read_uleb128(bytes, ix)? as usize;

    let mut values = Vec::with_capacity(size.min(bytes.len()));
    for _ in 0..size
    {
        values.push(EncodedValue::read(bytes, ix)?);
    }

    Ok(values)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn encode(v: &EncodedValue) -> Vec<u8> {
        let mut out = vec![];
        v.write(&mut out);
        out
    }

    fn decode(bytes: &[u8]) -> EncodedValue {
        let mut ix = 0;
        let v = EncodedValue::read(bytes, &mut ix).expect("Failed to read EncodedValue");
        assert_eq!(ix, bytes.len());
        v
    }

    #[test]
    fn test_encoded_value_byte() {
        let bytes = vec![0x00, 0x7F];
        assert_eq!(decode(&bytes), EncodedValue::Byte(127));
        assert_eq!(encode(&EncodedValue::Byte(127)), bytes);
    }

    #[test]
    fn test_encoded_value_short() {
        let bytes = vec![0x22, 0x34, 0x12];
        assert_eq!(decode(&bytes), EncodedValue::Short(0x1234));
        assert_eq!(encode(&EncodedValue::Short(0x1234)), bytes);
    }

    #[test]
    fn negative_values_are_sign_extended() {
        assert_eq!(encode(&EncodedValue::Int(-1)), vec![0x04, 0xff]);
        assert_eq!(decode(&[0x04, 0xff]), EncodedValue::Int(-1));
        assert_eq!(encode(&EncodedValue::Int(-129)), vec![0x24, 0x7f, 0xff]);
        assert_eq!(decode(&[0x24, 0x7f, 0xff]), EncodedValue::Int(-129));
        assert_eq!(encode(&EncodedValue::Long(i64::MIN)), vec![0xe6, 0, 0, 0, 0, 0, 0, 0, 0x80]);
        assert_eq!(encode(&EncodedValue::Short(-2)), vec![0x02, 0xfe]);
        // 128 needs a second byte to stay positive
        assert_eq!(encode(&EncodedValue::Int(128)), vec![0x24, 0x80, 0x00]);
    }

    #[test]
    fn chars_and_indices_are_zero_extended() {
        assert_eq!(encode(&EncodedValue::Char(0xffff)), vec![0x23, 0xff, 0xff]);
        assert_eq!(decode(&[0x03, 0xff]), EncodedValue::Char(0xff));
        assert_eq!(encode(&EncodedValue::String(0x80)), vec![0x17, 0x80]);
        assert_eq!(encode(&EncodedValue::Type(0x1234)), vec![0x38, 0x34, 0x12]);
        assert_eq!(decode(&[0x38, 0x34, 0x12]), EncodedValue::Type(0x1234));
    }

    #[test]
    fn floats_keep_their_high_bytes() {
        // 1.0f32 is 0x3f800000
        assert_eq!(encode(&EncodedValue::Float(1.0)), vec![0x30, 0x80, 0x3f]);
        assert_eq!(decode(&[0x30, 0x80, 0x3f]), EncodedValue::Float(1.0));
        // 2.0f64 is 0x4000000000000000
        assert_eq!(encode(&EncodedValue::Double(2.0)), vec![0x11, 0x40]);
        assert_eq!(decode(&[0x11, 0x40]), EncodedValue::Double(2.0));
        assert_eq!(encode(&EncodedValue::Float(0.0)), vec![0x10, 0x00]);
        assert_eq!(decode(&[0x10, 0x00]), EncodedValue::Float(0.0));
    }

    #[test]
    fn test_encoded_value_boolean_and_null() {
        assert_eq!(decode(&[0x3F]), EncodedValue::Boolean(true));
        assert_eq!(decode(&[0x1F]), EncodedValue::Boolean(false));
        assert_eq!(encode(&EncodedValue::Boolean(true)), vec![0x3F]);
        assert_eq!(encode(&EncodedValue::Null), vec![0x1E]);
    }

    #[test]
    fn method_handles_are_unsupported() {
        let mut ix = 0;
        assert!(matches!(EncodedValue::read(&[0x16, 0x00], &mut ix), Err(DexError::UnsupportedFormat(_))));
    }

    #[test]
    fn oversized_value_arg_is_malformed() {
        let mut ix = 0;
        // an int with value_arg 4 claims five bytes
        let r = EncodedValue::read(&[0x84, 0, 0, 0, 0, 0], &mut ix);
        assert!(matches!(r, Err(DexError::MalformedTable { .. })));
    }

    #[test]
    fn refs_walk_nested_values_in_preorder() {
        let v = EncodedValue::Array(vec![
            EncodedValue::String(3),
            EncodedValue::Annotation(EncodedAnnotation {
                type_idx: 7,
                elements: vec![AnnotationElement { name_idx: 4, value: EncodedValue::Method(2) }],
            }),
            EncodedValue::Enum(5),
            EncodedValue::Int(9),
        ]);
        let mut seen = vec![];
        v.refs(&mut |t, i| seen.push((t, i)));
        assert_eq!(
            seen,
            vec![(Table::String, 3), (Table::Type, 7), (Table::String, 4), (Table::Method, 2), (Table::Field, 5)]
        );
    }

    #[test]
    fn string_literals_skip_element_names() {
        let mut v = EncodedValue::Array(vec![
            EncodedValue::String(1),
            EncodedValue::Annotation(EncodedAnnotation {
                type_idx: 0,
                elements: vec![AnnotationElement { name_idx: 1, value: EncodedValue::String(1) }],
            }),
        ]);
        let mut count = 0;
        v.string_literals_mut(&mut |s| {
            *s = 9;
            count += 1;
        });
        assert_eq!(count, 2);
        let EncodedValue::Array(values) = &v else { panic!() };
        assert_eq!(values[0], EncodedValue::String(9));
        let EncodedValue::Annotation(a) = &values[1] else { panic!() };
        assert_eq!(a.elements[0].name_idx, 1);
        assert_eq!(a.elements[0].value, EncodedValue::String(9));
    }

    #[test]
    fn test_encoded_annotation_read_write() {
        let annotation = EncodedAnnotation {
            type_idx: 1,
            elements: vec![
                AnnotationElement { name_idx: 2, value: EncodedValue::Boolean(true) },
                AnnotationElement { name_idx: 3, value: EncodedValue::Int(42) },
            ],
        };

        let mut bytes = vec![];
        annotation.write(&mut bytes);

        let mut ix = 0;
        let read_annotation = EncodedAnnotation::read(&bytes, &mut ix).expect("Failed to read EncodedAnnotation");

        assert_eq!(annotation, read_annotation);
    }
}
