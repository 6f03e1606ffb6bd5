//! Builds an [`Image`] from a dex buffer.
//!
//! The header and map list are validated first, then each id table is read in
//! file order. Offsets into the data section are followed as they are met and
//! every index is checked against the size of the table it names.

use std::collections::HashMap;
use std::sync::Arc;

use adler::adler32_slice;
use log::{info, warn};

use crate::dex::annotations::AnnotationsDirectory;
use crate::dex::code::CodeItem;
use crate::dex::encoded_values::read_encoded_array;
use crate::dex::error::DexError;
use crate::dex::model::*;
use crate::dex::writer::signature;
use crate::dex::{read_u2, read_u4, read_uleb128, NO_INDEX};
use crate::graph::Table;

const MIN_VERSION: u32 = 35;
const MAX_VERSION: u32 = 40;
const MAX_16BIT_TABLE: u32 = 0x10000;

/// Table sizes as declared by the header.
struct Limits {
    strings: u32,
    types: u32,
    protos: u32,
    fields: u32,
    methods: u32,
}

impl Limits {
    fn from_header(h: &Header) -> Limits {
        Limits {
            strings: h.string_ids_size,
            types: h.type_ids_size,
            protos: h.proto_ids_size,
            fields: h.field_ids_size,
            methods: h.method_ids_size,
        }
    }

    fn count(&self, table: Table) -> u32 {
        match table {
            Table::String => self.strings,
            Table::Type => self.types,
            Table::Proto => self.protos,
            Table::Field => self.fields,
            Table::Method => self.methods,
            _ => u32::MAX,
        }
    }

    /// `index` must name an entry of `target`; `reading` and `offset` locate the error.
    fn check(&self, target: Table, index: u32, reading: Table, offset: usize) -> Result<u32, DexError> {
        if index < self.count(target) {
            Ok(index)
        } else {
            Err(malformed!(reading, offset))
        }
    }

    fn check_optional(&self, target: Table, index: u32, reading: Table, offset: usize) -> Result<Option<u32>, DexError> {
        match index {
            NO_INDEX => Ok(None),
            i => self.check(target, i, reading, offset).map(Some),
        }
    }

    /// Checks every index visited by `walk`.
    fn check_walk(&self, reading: Table, offset: usize, walk: impl FnOnce(&mut dyn FnMut(Table, u32))) -> Result<(), DexError> {
        let mut ok = true;
        walk(&mut |table, index| {
            if index >= self.count(table) {
                ok = false;
            }
        });
        if ok {
            Ok(())
        } else {
            Err(malformed!(reading, offset))
        }
    }
}

fn check_header(bytes: &[u8]) -> Result<Header, DexError> {
    if bytes.len() < HEADER_SIZE as usize {
        return Err(DexError::truncated(0, HEADER_SIZE as usize));
    }
    if &bytes[0..4] != b"dex\n" {
        return Err(unsupported!("not a dex image (magic {:02x?})", &bytes[0..4]));
    }

    let mut ix = 0;
    let header = Header::read(bytes, &mut ix)?;
    match header.version() {
        Some(v) if (MIN_VERSION..=MAX_VERSION).contains(&v) && header.magic[7] == 0 => {}
        _ => {
            return Err(unsupported!("dex version {}", String::from_utf8_lossy(&header.magic[4..8]).trim_end_matches('\0')));
        }
    }
    if header.endian_tag == REVERSE_ENDIAN_CONSTANT {
        return Err(unsupported!("big-endian images"));
    }
    if header.endian_tag != ENDIAN_CONSTANT {
        return Err(malformed!(Table::Header, 0x28));
    }
    if header.header_size != HEADER_SIZE {
        return Err(malformed!(Table::Header, 0x24));
    }
    let file_size = header.file_size as usize;
    if file_size > bytes.len() {
        return Err(DexError::truncated(bytes.len(), file_size - bytes.len()));
    }
    if file_size < HEADER_SIZE as usize {
        return Err(malformed!(Table::Header, 0x20));
    }
    if header.link_size != 0 {
        return Err(unsupported!("statically linked images"));
    }
    Ok(header)
}

fn check_integrity(bytes: &[u8], header: &Header) {
    let checksum = adler32_slice(&bytes[12..]);
    if checksum != header.checksum {
        warn!("checksum mismatch: header says 0x{:08x}, contents give 0x{:08x}", header.checksum, checksum);
    }
    if signature(&bytes[32..]) != header.signature {
        warn!("signature mismatch");
    }
}

fn check_map(bytes: &[u8], header: &Header) -> Result<(), DexError> {
    let mut ix = header.map_off as usize;
    if header.map_off == 0 || ix % 4 != 0 {
        return Err(malformed!(Table::Map, header.map_off));
    }
    let size = read_u4(bytes, &mut ix)?;
    for _ in 0..size {
        let entry = ix;
        let item_type = read_u2(bytes, &mut ix)?;
        let _unused = read_u2(bytes, &mut ix)?;
        let _count = read_u4(bytes, &mut ix)?;
        let _offset = read_u4(bytes, &mut ix)?;
        match item_type {
            TYPE_CALL_SITE_ID_ITEM => return Err(unsupported!("call site ids")),
            TYPE_METHOD_HANDLE_ITEM => return Err(unsupported!("method handles")),
            TYPE_HIDDENAPI_CLASS_DATA_ITEM => return Err(unsupported!("hidden api class data")),
            TYPE_HEADER_ITEM
            | TYPE_STRING_ID_ITEM
            | TYPE_TYPE_ID_ITEM
            | TYPE_PROTO_ID_ITEM
            | TYPE_FIELD_ID_ITEM
            | TYPE_METHOD_ID_ITEM
            | TYPE_CLASS_DEF_ITEM
            | TYPE_MAP_LIST
            | TYPE_TYPE_LIST
            | TYPE_ANNOTATION_SET_REF_LIST
            | TYPE_ANNOTATION_SET_ITEM
            | TYPE_CLASS_DATA_ITEM
            | TYPE_CODE_ITEM
            | TYPE_STRING_DATA_ITEM
            | TYPE_DEBUG_INFO_ITEM
            | TYPE_ANNOTATION_ITEM
            | TYPE_ENCODED_ARRAY_ITEM
            | TYPE_ANNOTATIONS_DIRECTORY_ITEM => {}
            _ => return Err(malformed!(Table::Map, entry)),
        }
    }
    Ok(())
}

/// Id tables must fit the buffer, follow the header in section order and not overlap.
fn check_id_tables(bytes: &[u8], h: &Header) -> Result<(), DexError> {
    let tables = [
        (Table::String, h.string_ids_size, h.string_ids_off, 4usize),
        (Table::Type, h.type_ids_size, h.type_ids_off, 4),
        (Table::Proto, h.proto_ids_size, h.proto_ids_off, 12),
        (Table::Field, h.field_ids_size, h.field_ids_off, 8),
        (Table::Method, h.method_ids_size, h.method_ids_off, 8),
        (Table::Class, h.class_defs_size, h.class_defs_off, 32),
    ];
    let mut end = HEADER_SIZE as usize;
    for (table, size, off, width) in tables {
        if size == 0 {
            continue;
        }
        let start = off as usize;
        let fits = (size as usize).checked_mul(width).and_then(|len| start.checked_add(len));
        match fits {
            Some(table_end) if start >= end && table_end <= bytes.len() => end = table_end,
            _ => return Err(malformed!(table, off)),
        }
    }
    if h.type_ids_size > MAX_16BIT_TABLE {
        return Err(malformed!(Table::Type, h.type_ids_off));
    }
    if h.proto_ids_size > MAX_16BIT_TABLE {
        return Err(malformed!(Table::Proto, h.proto_ids_off));
    }
    Ok(())
}

fn read_type_list(bytes: &[u8], off: u32, limits: &Limits, reading: Table, entry: usize) -> Result<Vec<u32>, DexError> {
    if off == 0 {
        return Ok(vec![]);
    }
    let mut ix = off as usize;
    let size = read_u4(bytes, &mut ix)? as usize;
    let mut list = Vec::with_capacity(size.min(bytes.len() / 2));
    for _ in 0..size {
        let t = read_u2(bytes, &mut ix)? as u32;
        list.push(limits.check(Table::Type, t, reading, entry)?);
    }
    Ok(list)
}

/// Code bodies met so far, keyed by file offset so that shared bodies are read once.
struct Codes {
    items: Vec<CodeItem>,
    by_offset: HashMap<u32, u32>,
}

impl Codes {
    fn get_or_read(&mut self, bytes: &[u8], off: u32, limits: &Limits) -> Result<u32, DexError> {
        if let Some(&idx) = self.by_offset.get(&off) {
            return Ok(idx);
        }
        let mut ix = off as usize;
        let code = CodeItem::read(bytes, &mut ix)?;
        for (_, _, type_idx) in code.catch_types() {
            limits.check(Table::Type, type_idx, Table::Code, off as usize)?;
        }
        if let Some(debug) = &code.debug_info {
            limits.check_walk(Table::Code, off as usize, |f| debug.refs(f))?;
        }
        let idx = self.items.len() as u32;
        self.items.push(code);
        self.by_offset.insert(off, idx);
        Ok(idx)
    }
}

fn read_encoded_fields(bytes: &[u8], ix: &mut usize, count: u32, limits: &Limits, off: usize) -> Result<Vec<EncodedField>, DexError> {
    let mut fields = Vec::with_capacity((count as usize).min(bytes.len()));
    let mut field: u32 = 0;
    for _ in 0..count {
        field = field.wrapping_add(read_uleb128(bytes, ix)?);
        let access_flags = AccessFlags::from_bits_retain(read_uleb128(bytes, ix)?);
        fields.push(EncodedField { field: limits.check(Table::Field, field, Table::Class, off)?, access_flags });
    }
    Ok(fields)
}

fn read_encoded_methods(
    bytes: &[u8],
    ix: &mut usize,
    count: u32,
    limits: &Limits,
    off: usize,
    codes: &mut Codes,
) -> Result<Vec<EncodedMethod>, DexError> {
    let mut methods = Vec::with_capacity((count as usize).min(bytes.len()));
    let mut method: u32 = 0;
    for _ in 0..count {
        method = method.wrapping_add(read_uleb128(bytes, ix)?);
        let access_flags = AccessFlags::from_bits_retain(read_uleb128(bytes, ix)?);
        let code = match read_uleb128(bytes, ix)? {
            0 => None,
            code_off => Some(codes.get_or_read(bytes, code_off, limits)?),
        };
        methods.push(EncodedMethod { method: limits.check(Table::Method, method, Table::Class, off)?, access_flags, code });
    }
    Ok(methods)
}

fn read_class_data(bytes: &[u8], off: u32, limits: &Limits, codes: &mut Codes) -> Result<ClassData, DexError> {
    let at = off as usize;
    let mut ix = at;
    let static_fields_size = read_uleb128(bytes, &mut ix)?;
    let instance_fields_size = read_uleb128(bytes, &mut ix)?;
    let direct_methods_size = read_uleb128(bytes, &mut ix)?;
    let virtual_methods_size = read_uleb128(bytes, &mut ix)?;

    Ok(ClassData {
        static_fields: read_encoded_fields(bytes, &mut ix, static_fields_size, limits, at)?,
        instance_fields: read_encoded_fields(bytes, &mut ix, instance_fields_size, limits, at)?,
        direct_methods: read_encoded_methods(bytes, &mut ix, direct_methods_size, limits, at, codes)?,
        virtual_methods: read_encoded_methods(bytes, &mut ix, virtual_methods_size, limits, at, codes)?,
    })
}

fn read_class_def(bytes: &[u8], entry: usize, limits: &Limits, codes: &mut Codes) -> Result<ClassDef, DexError> {
    let mut ix = entry;
    let class_type = limits.check(Table::Type, read_u4(bytes, &mut ix)?, Table::Class, entry)?;
    let access_flags = AccessFlags::from_bits_retain(read_u4(bytes, &mut ix)?);
    let superclass = limits.check_optional(Table::Type, read_u4(bytes, &mut ix)?, Table::Class, entry)?;
    let interfaces_off = read_u4(bytes, &mut ix)?;
    let source_file = limits.check_optional(Table::String, read_u4(bytes, &mut ix)?, Table::Class, entry)?;
    let annotations_off = read_u4(bytes, &mut ix)?;
    let class_data_off = read_u4(bytes, &mut ix)?;
    let static_values_off = read_u4(bytes, &mut ix)?;

    let interfaces = read_type_list(bytes, interfaces_off, limits, Table::Class, entry)?;

    let annotations = match annotations_off {
        0 => None,
        off => {
            let mut aix = off as usize;
            let dir = AnnotationsDirectory::read(bytes, &mut aix)?;
            limits.check_walk(Table::Class, off as usize, |f| dir.refs(f))?;
            Some(dir)
        }
    };

    let class_data = match class_data_off {
        0 => None,
        off => Some(read_class_data(bytes, off, limits, codes)?),
    };

    let static_values = match static_values_off {
        0 => None,
        off => {
            let mut six = off as usize;
            let values = read_encoded_array(bytes, &mut six)?;
            limits.check_walk(Table::Class, off as usize, |f| {
                for v in &values {
                    v.refs(f)
                }
            })?;
            Some(values)
        }
    };

    Ok(ClassDef { class_type, access_flags, superclass, interfaces, source_file, annotations, class_data, static_values })
}

/// Parses a complete dex image. Fails without a partial result on the first violation.
pub(crate) fn parse(bytes: &[u8]) -> Result<Image, DexError> {
    let header = check_header(bytes)?;
    let bytes = &bytes[..header.file_size as usize];
    check_integrity(bytes, &header);
    check_map(bytes, &header)?;
    check_id_tables(bytes, &header)?;
    let limits = Limits::from_header(&header);

    let mut strings = Vec::with_capacity(header.string_ids_size as usize);
    for i in 0..header.string_ids_size as usize {
        let entry = header.string_ids_off as usize + i * 4;
        let mut ix = entry;
        let data_off = read_u4(bytes, &mut ix)? as usize;
        if data_off < HEADER_SIZE as usize || data_off >= bytes.len() {
            return Err(malformed!(Table::String, entry));
        }
        let mut dix = data_off;
        strings.push(DexString::read(bytes, &mut dix)?);
    }

    let mut types = Vec::with_capacity(header.type_ids_size as usize);
    for i in 0..header.type_ids_size as usize {
        let entry = header.type_ids_off as usize + i * 4;
        let mut ix = entry;
        let descriptor = limits.check(Table::String, read_u4(bytes, &mut ix)?, Table::Type, entry)?;
        types.push(TypeItem { descriptor });
    }

    let mut protos = Vec::with_capacity(header.proto_ids_size as usize);
    for i in 0..header.proto_ids_size as usize {
        let entry = header.proto_ids_off as usize + i * 12;
        let mut ix = entry;
        let shorty = limits.check(Table::String, read_u4(bytes, &mut ix)?, Table::Proto, entry)?;
        let return_type = limits.check(Table::Type, read_u4(bytes, &mut ix)?, Table::Proto, entry)?;
        let parameters_off = read_u4(bytes, &mut ix)?;
        let parameters = read_type_list(bytes, parameters_off, &limits, Table::Proto, entry)?;
        protos.push(ProtoItem { shorty, return_type, parameters });
    }

    let mut fields = Vec::with_capacity(header.field_ids_size as usize);
    for i in 0..header.field_ids_size as usize {
        let entry = header.field_ids_off as usize + i * 8;
        let mut ix = entry;
        let class = limits.check(Table::Type, read_u2(bytes, &mut ix)? as u32, Table::Field, entry)?;
        let type_ = limits.check(Table::Type, read_u2(bytes, &mut ix)? as u32, Table::Field, entry)?;
        let name = limits.check(Table::String, read_u4(bytes, &mut ix)?, Table::Field, entry)?;
        fields.push(FieldItem { class, type_, name });
    }

    let mut methods = Vec::with_capacity(header.method_ids_size as usize);
    for i in 0..header.method_ids_size as usize {
        let entry = header.method_ids_off as usize + i * 8;
        let mut ix = entry;
        let class = limits.check(Table::Type, read_u2(bytes, &mut ix)? as u32, Table::Method, entry)?;
        let proto = limits.check(Table::Proto, read_u2(bytes, &mut ix)? as u32, Table::Method, entry)?;
        let name = limits.check(Table::String, read_u4(bytes, &mut ix)?, Table::Method, entry)?;
        methods.push(MethodItem { class, proto, name });
    }

    let mut codes = Codes { items: vec![], by_offset: HashMap::new() };
    let mut classes = Vec::with_capacity(header.class_defs_size as usize);
    for i in 0..header.class_defs_size as usize {
        let entry = header.class_defs_off as usize + i * 32;
        classes.push(read_class_def(bytes, entry, &limits, &mut codes)?);
    }

    info!(
        "parsed dex {:?}: {} strings, {} types, {} methods, {} classes, {} code items",
        header.version(),
        strings.len(),
        types.len(),
        methods.len(),
        classes.len(),
        codes.items.len()
    );

    let source = Some(SourceBytes(Arc::from(bytes)));
    Ok(Image { header, strings, types, protos, fields, methods, classes, codes: codes.items, source })
}
