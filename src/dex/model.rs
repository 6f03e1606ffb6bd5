//! In-memory representation of a dex image.
//!
//! Every table holds plain records and cross references are table indices, never
//! pointers or file offsets. Data items that the file format shares by offset
//! (type lists, annotation sets, encoded arrays) are owned by value here and
//! deduplicated again by the writer.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use cesu8::{from_java_cesu8, to_java_cesu8};
use log::debug;

use crate::dex::annotations::AnnotationsDirectory;
use crate::dex::code::CodeItem;
use crate::dex::encoded_values::EncodedValue;
use crate::dex::error::DexError;
use crate::dex::{read_u1, read_u4, read_uleb128, read_x, write_u1, write_u4, write_uleb128, write_x};
use crate::graph::Table;

pub const HEADER_SIZE: u32 = 0x70;
pub const ENDIAN_CONSTANT: u32 = 0x12345678;
pub const REVERSE_ENDIAN_CONSTANT: u32 = 0x78563412;

// map_list item types
pub const TYPE_HEADER_ITEM: u16 = 0x0000;
pub const TYPE_STRING_ID_ITEM: u16 = 0x0001;
pub const TYPE_TYPE_ID_ITEM: u16 = 0x0002;
pub const TYPE_PROTO_ID_ITEM: u16 = 0x0003;
pub const TYPE_FIELD_ID_ITEM: u16 = 0x0004;
pub const TYPE_METHOD_ID_ITEM: u16 = 0x0005;
pub const TYPE_CLASS_DEF_ITEM: u16 = 0x0006;
pub const TYPE_CALL_SITE_ID_ITEM: u16 = 0x0007;
pub const TYPE_METHOD_HANDLE_ITEM: u16 = 0x0008;
pub const TYPE_MAP_LIST: u16 = 0x1000;
pub const TYPE_TYPE_LIST: u16 = 0x1001;
pub const TYPE_ANNOTATION_SET_REF_LIST: u16 = 0x1002;
pub const TYPE_ANNOTATION_SET_ITEM: u16 = 0x1003;
pub const TYPE_CLASS_DATA_ITEM: u16 = 0x2000;
pub const TYPE_CODE_ITEM: u16 = 0x2001;
pub const TYPE_STRING_DATA_ITEM: u16 = 0x2002;
pub const TYPE_DEBUG_INFO_ITEM: u16 = 0x2003;
pub const TYPE_ANNOTATION_ITEM: u16 = 0x2004;
pub const TYPE_ENCODED_ARRAY_ITEM: u16 = 0x2005;
pub const TYPE_ANNOTATIONS_DIRECTORY_ITEM: u16 = 0x2006;
pub const TYPE_HIDDENAPI_CLASS_DATA_ITEM: u16 = 0xF000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 8],
    pub checksum: u32,
    pub signature: [u8; 20],
    pub file_size: u32,
    pub header_size: u32,
    pub endian_tag: u32,
    pub link_size: u32,
    pub link_off: u32,
    pub map_off: u32,
    pub string_ids_size: u32,
    pub string_ids_off: u32,
    pub type_ids_size: u32,
    pub type_ids_off: u32,
    pub proto_ids_size: u32,
    pub proto_ids_off: u32,
    pub field_ids_size: u32,
    pub field_ids_off: u32,
    pub method_ids_size: u32,
    pub method_ids_off: u32,
    pub class_defs_size: u32,
    pub class_defs_off: u32,
    pub data_size: u32,
    pub data_off: u32,
}

impl Header
{
    /// A zeroed header for the given format version, e.g. `35` for `dex\n035\0`.
    pub fn for_version(version: u32) -> Header
    {
        let digits = format!("{:03}", version.min(999));
        let mut magic = *b"dex\n000\0";
        magic[4..7].copy_from_slice(digits.as_bytes());
        Header {
            magic,
            checksum: 0,
            signature: [0; 20],
            file_size: 0,
            header_size: HEADER_SIZE,
            endian_tag: ENDIAN_CONSTANT,
            link_size: 0,
            link_off: 0,
            map_off: 0,
            string_ids_size: 0,
            string_ids_off: 0,
            type_ids_size: 0,
            type_ids_off: 0,
            proto_ids_size: 0,
            proto_ids_off: 0,
            field_ids_size: 0,
            field_ids_off: 0,
            method_ids_size: 0,
            method_ids_off: 0,
            class_defs_size: 0,
            class_defs_off: 0,
            data_size: 0,
            data_off: 0,
        }
    }

    /// The three version digits as a number, `None` when they are not digits.
    pub fn version(&self) -> Option<u32>
    {
        std::str::from_utf8(&self.magic[4..7]).ok()?.parse().ok()
    }

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<Header, DexError>
    {
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&read_x(bytes, ix, 8)?);
        let checksum = read_u4(bytes, ix)?;
        let mut signature = [0u8; 20];
        signature.copy_from_slice(&read_x(bytes, ix, 20)?);

        Ok(Header {
            magic,
            checksum,
            signature,
            file_size: read_u4(bytes, ix)?,
            header_size: read_u4(bytes, ix)?,
            endian_tag: read_u4(bytes, ix)?,
            link_size: read_u4(bytes, ix)?,
            link_off: read_u4(bytes, ix)?,
            map_off: read_u4(bytes, ix)?,
            string_ids_size: read_u4(bytes, ix)?,
            string_ids_off: read_u4(bytes, ix)?,
            type_ids_size: read_u4(bytes, ix)?,
            type_ids_off: read_u4(bytes, ix)?,
            proto_ids_size: read_u4(bytes, ix)?,
            proto_ids_off: read_u4(bytes, ix)?,
            field_ids_size: read_u4(bytes, ix)?,
            field_ids_off: read_u4(bytes, ix)?,
            method_ids_size: read_u4(bytes, ix)?,
            method_ids_off: read_u4(bytes, ix)?,
            class_defs_size: read_u4(bytes, ix)?,
            class_defs_off: read_u4(bytes, ix)?,
            data_size: read_u4(bytes, ix)?,
            data_off: read_u4(bytes, ix)?,
        })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;
        c += write_x(bytes, &self.magic);
        c += write_u4(bytes, self.checksum);
        c += write_x(bytes, &self.signature);
        c += write_u4(bytes, self.file_size);
        c += write_u4(bytes, self.header_size);
        c += write_u4(bytes, self.endian_tag);
        c += write_u4(bytes, self.link_size);
        c += write_u4(bytes, self.link_off);
        c += write_u4(bytes, self.map_off);
        c += write_u4(bytes, self.string_ids_size);
        c += write_u4(bytes, self.string_ids_off);
        c += write_u4(bytes, self.type_ids_size);
        c += write_u4(bytes, self.type_ids_off);
        c += write_u4(bytes, self.proto_ids_size);
        c += write_u4(bytes, self.proto_ids_off);
        c += write_u4(bytes, self.field_ids_size);
        c += write_u4(bytes, self.field_ids_off);
        c += write_u4(bytes, self.method_ids_size);
        c += write_u4(bytes, self.method_ids_off);
        c += write_u4(bytes, self.class_defs_size);
        c += write_u4(bytes, self.class_defs_off);
        c += write_u4(bytes, self.data_size);
        c += write_u4(bytes, self.data_off);
        c
    }
}

/// A string_data_item: MUTF-8 bytes without the trailing NUL and the declared UTF-16 length.
///
/// The bytes are kept as read so that strings that are not valid modified UTF-8
/// survive a round trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DexString {
    pub utf16_len: u32,
    pub data: Vec<u8>,
}

impl DexString
{
    pub fn from_string(s: &str) -> DexString
    {
        DexString { utf16_len: s.encode_utf16().count() as u32, data: to_java_cesu8(s).into_owned() }
    }

    /// Decodes the string, `None` when the bytes are not valid modified UTF-8.
    pub fn decode(&self) -> Option<String>
    {
        from_java_cesu8(&self.data).ok().map(|s| s.into_owned())
    }

    pub fn to_string_lossy(&self) -> String
    {
        self.decode().unwrap_or_else(|| String::from_utf8_lossy(&self.data).into_owned())
    }

    /// UTF-16 code units of the string, the key the format sorts string ids by.
    ///
    /// Decodes the 1, 2 and 3 byte forms of modified UTF-8 directly so that unpaired
    /// surrogates keep their position. Malformed sequences fall back to the raw byte.
    pub fn utf16_units(&self) -> Vec<u16>
    {
        let mut units = Vec::with_capacity(self.data.len());
        let mut i = 0;
        let d = &self.data;
        while i < d.len() {
            let b = d[i];
            if b & 0x80 == 0 {
                units.push(b as u16);
                i += 1;
            } else if b & 0xe0 == 0xc0 && i + 1 < d.len() {
                units.push((((b & 0x1f) as u16) << 6) | (d[i + 1] & 0x3f) as u16);
                i += 2;
            } else if b & 0xf0 == 0xe0 && i + 2 < d.len() {
                units.push((((b & 0x0f) as u16) << 12) | (((d[i + 1] & 0x3f) as u16) << 6) | (d[i + 2] & 0x3f) as u16);
                i += 3;
            } else {
                units.push(b as u16);
                i += 1;
            }
        }
        units
    }

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<DexString, DexError>
    {
        let utf16_len = read_uleb128(bytes, ix)?;
        let start = *ix;
        loop {
            if read_u1(bytes, ix)? == 0 {
                break;
            }
        }
        Ok(DexString { utf16_len, data: bytes[start..*ix - 1].to_vec() })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;
        c += write_uleb128(bytes, self.utf16_len);
        c += write_x(bytes, &self.data);
        c += write_u1(bytes, 0);
        c
    }
}

impl From<&str> for DexString {
    fn from(s: &str) -> Self {
        DexString::from_string(s)
    }
}

impl fmt::Display for DexString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_lossy())
    }
}

/// type_id_item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeItem {
    pub descriptor: u32,
}

/// proto_id_item with its parameter type_list inlined.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProtoItem {
    pub shorty: u32,
    pub return_type: u32,
    pub parameters: Vec<u32>,
}

/// field_id_item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldItem {
    pub class: u32,
    pub type_: u32,
    pub name: u32,
}

/// method_id_item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodItem {
    pub class: u32,
    pub proto: u32,
    pub name: u32,
}

bitflags! {
    /// Access flags shared by classes, fields and methods.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x1;
        const PRIVATE = 0x2;
        const PROTECTED = 0x4;
        const STATIC = 0x8;
        const FINAL = 0x10;
        const SYNCHRONIZED = 0x20;
        const VOLATILE = 0x40;
        const BRIDGE = 0x40;
        const TRANSIENT = 0x80;
        const VARARGS = 0x80;
        const NATIVE = 0x100;
        const INTERFACE = 0x200;
        const ABSTRACT = 0x400;
        const STRICT = 0x800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const CONSTRUCTOR = 0x10000;
        const DECLARED_SYNCHRONIZED = 0x20000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedField {
    pub field: u32,
    pub access_flags: AccessFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedMethod {
    pub method: u32,
    pub access_flags: AccessFlags,
    /// Index into `Image::codes`, `None` for abstract and native methods.
    pub code: Option<u32>,
}

/// class_data_item
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassData {
    pub static_fields: Vec<EncodedField>,
    pub instance_fields: Vec<EncodedField>,
    pub direct_methods: Vec<EncodedMethod>,
    pub virtual_methods: Vec<EncodedMethod>,
}

impl ClassData
{
    pub fn fields(&self) -> impl Iterator<Item = &EncodedField> {
        self.static_fields.iter().chain(self.instance_fields.iter())
    }

    pub fn methods(&self) -> impl Iterator<Item = &EncodedMethod> {
        self.direct_methods.iter().chain(self.virtual_methods.iter())
    }

    pub fn fields_mut(&mut self) -> impl Iterator<Item = &mut EncodedField> {
        self.static_fields.iter_mut().chain(self.instance_fields.iter_mut())
    }

    pub fn methods_mut(&mut self) -> impl Iterator<Item = &mut EncodedMethod> {
        self.direct_methods.iter_mut().chain(self.virtual_methods.iter_mut())
    }
}

/// class_def_item with every offset resolved to the item it points at.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub class_type: u32,
    pub access_flags: AccessFlags,
    pub superclass: Option<u32>,
    pub interfaces: Vec<u32>,
    pub source_file: Option<u32>,
    pub annotations: Option<AnnotationsDirectory>,
    pub class_data: Option<ClassData>,
    pub static_values: Option<Vec<EncodedValue>>,
}

impl ClassDef
{
    pub fn new(class_type: u32, access_flags: AccessFlags, superclass: Option<u32>) -> ClassDef
    {
        ClassDef {
            class_type,
            access_flags,
            superclass,
            interfaces: vec![],
            source_file: None,
            annotations: None,
            class_data: None,
            static_values: None,
        }
    }
}

/// The file an image was parsed from. It takes no part in image equality.
#[derive(Clone)]
pub(crate) struct SourceBytes(pub(crate) Arc<[u8]>);

impl PartialEq for SourceBytes {
    fn eq(&self, _: &SourceBytes) -> bool {
        true
    }
}

impl fmt::Debug for SourceBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceBytes({} bytes)", self.0.len())
    }
}

/// A parsed dex image.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    /// The header as read. The writer keeps only the magic and recomputes the rest.
    pub header: Header,
    pub strings: Vec<DexString>,
    pub types: Vec<TypeItem>,
    pub protos: Vec<ProtoItem>,
    pub fields: Vec<FieldItem>,
    pub methods: Vec<MethodItem>,
    pub classes: Vec<ClassDef>,
    pub codes: Vec<CodeItem>,
    /// Set by the parser. The writer re-emits these bytes while the tables still match them.
    pub(crate) source: Option<SourceBytes>,
}

impl Image
{
    /// An empty image of the given format version.
    pub fn new(version: u32) -> Image
    {
        Image {
            header: Header::for_version(version),
            strings: vec![],
            types: vec![],
            protos: vec![],
            fields: vec![],
            methods: vec![],
            classes: vec![],
            codes: vec![],
            source: None,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Image, DexError>
    {
        crate::dex::parser::parse(bytes)
    }

    pub fn to_bytes(self) -> Result<Vec<u8>, DexError>
    {
        crate::dex::writer::serialize(self)
    }

    /// Number of entries in an entity table. Tables that hold no entities have none.
    pub fn len(&self, table: Table) -> usize
    {
        match table {
            Table::String => self.strings.len(),
            Table::Type => self.types.len(),
            Table::Proto => self.protos.len(),
            Table::Field => self.fields.len(),
            Table::Method => self.methods.len(),
            Table::Class => self.classes.len(),
            Table::Code => self.codes.len(),
            Table::Header | Table::Map => 0,
        }
    }

    pub fn contains(&self, table: Table, index: u32) -> bool
    {
        (index as usize) < self.len(table)
    }

    pub fn string(&self, idx: u32) -> String
    {
        match self.strings.get(idx as usize) {
            Some(s) => s.to_string_lossy(),
            None => {
                debug!("string index {} out of range", idx);
                format!("string@{}", idx)
            }
        }
    }

    pub fn type_descriptor(&self, type_idx: u32) -> String
    {
        match self.types.get(type_idx as usize) {
            Some(t) => self.string(t.descriptor),
            None => format!("type@{}", type_idx),
        }
    }

    /// Method prototype as a descriptor, e.g. `(ILjava/lang/String;)V`.
    pub fn proto_descriptor(&self, proto_idx: u32) -> String
    {
        let Some(p) = self.protos.get(proto_idx as usize) else {
            return format!("proto@{}", proto_idx);
        };
        let mut s = "(".to_string();
        for t in &p.parameters {
            s.push_str(&self.type_descriptor(*t));
        }
        s.push(')');
        s.push_str(&self.type_descriptor(p.return_type));
        s
    }

    /// `Lcom/x/Foo;->name:I`
    pub fn field_descriptor(&self, field_idx: u32) -> String
    {
        match self.fields.get(field_idx as usize) {
            Some(f) => format!("{}->{}:{}", self.type_descriptor(f.class), self.string(f.name), self.type_descriptor(f.type_)),
            None => format!("field@{}", field_idx),
        }
    }

    /// `Lcom/x/Foo;->name(I)V`
    pub fn method_descriptor(&self, method_idx: u32) -> String
    {
        match self.methods.get(method_idx as usize) {
            Some(m) => format!("{}->{}{}", self.type_descriptor(m.class), self.string(m.name), self.proto_descriptor(m.proto)),
            None => format!("method@{}", method_idx),
        }
    }

    pub fn find_string(&self, s: &str) -> Option<u32>
    {
        let target = DexString::from_string(s);
        self.strings.iter().position(|x| x.data == target.data).map(|i| i as u32)
    }

    pub fn find_type(&self, descriptor: &str) -> Option<u32>
    {
        let target = DexString::from_string(descriptor);
        self.types
            .iter()
            .position(|t| self.strings.get(t.descriptor as usize).is_some_and(|s| s.data == target.data))
            .map(|i| i as u32)
    }

    /// Index of the class definition for a type, if the image defines it.
    pub fn class_by_type(&self, type_idx: u32) -> Option<u32>
    {
        self.classes.iter().position(|c| c.class_type == type_idx).map(|i| i as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let mut h = Header::for_version(38);
        h.file_size = 0x1234;
        h.map_off = 0x200;
        let mut bytes = vec![];
        assert_eq!(h.write(&mut bytes), 0x70);
        assert_eq!(&bytes[0..8], b"dex\n038\0");
        let mut ix = 0;
        assert_eq!(Header::read(&bytes, &mut ix).unwrap(), h);
        assert_eq!(h.version(), Some(38));
    }

    #[test]
    fn strings_keep_their_raw_bytes() {
        let s = DexString::from_string("caf\u{e9}");
        assert_eq!(s.utf16_len, 4);
        assert_eq!(s.data, vec![b'c', b'a', b'f', 0xc3, 0xa9]);

        // an unpaired surrogate is not valid cesu8 but must survive
        let raw = DexString { utf16_len: 1, data: vec![0xed, 0xa0, 0x80] };
        let mut bytes = vec![];
        raw.write(&mut bytes);
        let mut ix = 0;
        let back = DexString::read(&bytes, &mut ix).unwrap();
        assert_eq!(back, raw);
        assert_eq!(back.utf16_units(), vec![0xd800]);
        assert_eq!(ix, bytes.len());
    }

    #[test]
    fn nul_is_two_bytes_in_mutf8() {
        let s = DexString::from_string("a\0b");
        assert_eq!(s.data, vec![b'a', 0xc0, 0x80, b'b']);
        assert_eq!(s.utf16_units(), vec![0x61, 0x00, 0x62]);
        assert_eq!(s.decode().as_deref(), Some("a\0b"));
    }

    #[test]
    fn utf16_order_differs_from_code_point_order() {
        // U+10000 encodes as a surrogate pair that sorts below U+FFFF in UTF-16
        let supplementary = DexString::from_string("\u{10000}");
        let bmp = DexString::from_string("\u{ffff}");
        assert!(supplementary.utf16_units() < bmp.utf16_units());
    }

    #[test]
    fn access_flags_keep_unknown_bits() {
        let f = AccessFlags::from_bits_retain(0x8000_0001);
        assert!(f.contains(AccessFlags::PUBLIC));
        assert_eq!(f.bits(), 0x8000_0001);
    }
}
