//! Serializes an [`Image`] to dex bytes.
//!
//! An image that still matches the file it was parsed from is written back in
//! that file's layout, with only the signature and checksum restamped. Any other
//! image is first brought into canonical order (string ids by UTF-16 code units,
//! the other id tables by their keys, classes supertype first), every site is
//! rewritten through the reference graph, and then the file is laid out in one
//! pass: ids, data items in dependency order, map list. Data items with identical
//! contents are shared. The signature is computed before the checksum.

use std::collections::HashMap;

use adler::adler32_slice;
use log::{debug, info};
use sha1::{Digest, Sha1};

use crate::dex::annotations::{AnnotationItem, AnnotationSet};
use crate::dex::encoded_values::write_encoded_array;
use crate::dex::error::DexError;
use crate::dex::model::*;
use crate::dex::{write_idx16, write_idx32, write_u2, write_u4, write_uleb128, NO_INDEX};
use crate::graph::{Graph, Remapping, Table};

const MAX_16BIT_TABLE: usize = 0x10000;

pub(crate) fn serialize(mut image: Image) -> Result<Vec<u8>, DexError> {
    if let Some(source) = image.source.take() {
        if let Some(file) = reuse_source(&image, &source.0) {
            info!("serialized {} bytes in their parsed layout", file.len());
            return Ok(file);
        }
        debug!("image changed since parsing, laying it out again");
    }
    let graph = Graph::build(&image)?;
    if let Some(edge) = graph.unresolved().first().and_then(|id| graph.edge(*id)) {
        return Err(DexError::UnresolvedReference { table: edge.target.table, index: edge.target.index });
    }
    check_limits(&image)?;
    canonicalize(&mut image, &graph)?;
    let file = emit(&image)?;
    info!(
        "serialized {} bytes: {} strings, {} types, {} methods, {} classes",
        file.len(),
        image.strings.len(),
        image.types.len(),
        image.methods.len(),
        image.classes.len()
    );
    Ok(file)
}

/// The parsed bytes with fresh integrity fields, if the image still describes them exactly.
fn reuse_source(image: &Image, source: &[u8]) -> Option<Vec<u8>> {
    match crate::dex::parser::parse(source) {
        Ok(original) if original == *image => {}
        _ => return None,
    }
    let mut file = source.to_vec();
    let digest = signature(&file[32..]);
    file[12..32].copy_from_slice(&digest);
    let checksum = adler32_slice(&file[12..]);
    file[8..12].copy_from_slice(&checksum.to_le_bytes());
    Some(file)
}

/// Tables addressed by 16-bit indices somewhere in the format.
fn check_limits(image: &Image) -> Result<(), DexError> {
    for table in [Table::Type, Table::Proto, Table::Field, Table::Method] {
        let count = image.len(table);
        if count > MAX_16BIT_TABLE {
            return Err(DexError::LayoutOverflow { table, count, limit: MAX_16BIT_TABLE });
        }
    }
    Ok(())
}

// old -> new for a permutation given as new -> old
fn invert(order: &[usize]) -> Vec<u32> {
    let mut mapping = vec![0; order.len()];
    for (new, &old) in order.iter().enumerate() {
        mapping[old] = new as u32;
    }
    mapping
}

fn sorted_mapping<K: Ord>(len: usize, mut key: impl FnMut(usize) -> K) -> Vec<u32> {
    let mut order: Vec<usize> = (0..len).collect();
    order.sort_by_cached_key(|&i| key(i));
    invert(&order)
}

/// Depth-first over superclass and interfaces, so a class follows every supertype
/// the image defines. Classes keep their relative order otherwise.
fn class_order(image: &Image) -> Vec<usize> {
    let by_type: HashMap<u32, usize> = image.classes.iter().enumerate().map(|(i, c)| (c.class_type, i)).collect();
    let mut visited = vec![false; image.classes.len()];
    let mut order = Vec::with_capacity(image.classes.len());

    for start in 0..image.classes.len() {
        let mut stack = vec![(start, false)];
        while let Some((i, expanded)) = stack.pop() {
            if expanded {
                order.push(i);
                continue;
            }
            if visited[i] {
                continue;
            }
            visited[i] = true;
            stack.push((i, true));
            let class = &image.classes[i];
            let supers: Vec<usize> =
                class.superclass.iter().chain(class.interfaces.iter()).filter_map(|t| by_type.get(t).copied()).collect();
            for &s in supers.iter().rev() {
                if !visited[s] {
                    stack.push((s, false));
                }
            }
        }
    }
    order
}

/// Puts every table into the order the format requires and drops code items no
/// method uses.
pub(crate) fn canonicalize(image: &mut Image, graph: &Graph) -> Result<(), DexError> {
    let img: &Image = image;
    let strings = sorted_mapping(img.strings.len(), |i| img.strings[i].utf16_units());
    let types = sorted_mapping(img.types.len(), |i| strings[img.types[i].descriptor as usize]);
    let protos = sorted_mapping(img.protos.len(), |i| {
        let p = &img.protos[i];
        (types[p.return_type as usize], p.parameters.iter().map(|t| types[*t as usize]).collect::<Vec<_>>())
    });
    let fields = sorted_mapping(img.fields.len(), |i| {
        let f = &img.fields[i];
        (types[f.class as usize], strings[f.name as usize], types[f.type_ as usize])
    });
    let methods = sorted_mapping(img.methods.len(), |i| {
        let m = &img.methods[i];
        (types[m.class as usize], strings[m.name as usize], protos[m.proto as usize])
    });

    let order = class_order(img);

    // code items follow their first use, direct methods before virtual ones
    let mut codes = vec![NO_INDEX; img.codes.len()];
    let mut next = 0;
    for &ci in &order {
        let Some(data) = &img.classes[ci].class_data else {
            continue;
        };
        for list in [&data.direct_methods, &data.virtual_methods] {
            let mut members: Vec<&EncodedMethod> = list.iter().collect();
            members.sort_by_key(|m| methods[m.method as usize]);
            for code in members.iter().filter_map(|m| m.code) {
                if codes[code as usize] == NO_INDEX {
                    codes[code as usize] = next;
                    next += 1;
                }
            }
        }
    }
    let dropped = codes.len() - next as usize;
    if dropped > 0 {
        debug!("dropping {} code item(s) no method refers to", dropped);
    }

    let mut remapping = Remapping::default();
    remapping.set(Table::String, strings);
    remapping.set(Table::Type, types);
    remapping.set(Table::Proto, protos);
    remapping.set(Table::Field, fields);
    remapping.set(Table::Method, methods);
    remapping.set(Table::Class, invert(&order));
    remapping.set(Table::Code, codes);
    graph.remap_all(image, &remapping)?;

    image.strings = remapping.permute(Table::String, std::mem::take(&mut image.strings));
    image.types = remapping.permute(Table::Type, std::mem::take(&mut image.types));
    image.protos = remapping.permute(Table::Proto, std::mem::take(&mut image.protos));
    image.fields = remapping.permute(Table::Field, std::mem::take(&mut image.fields));
    image.methods = remapping.permute(Table::Method, std::mem::take(&mut image.methods));
    image.classes = remapping.permute(Table::Class, std::mem::take(&mut image.classes));
    image.codes = remapping.permute(Table::Code, std::mem::take(&mut image.codes));

    for class in &mut image.classes {
        if let Some(data) = &mut class.class_data {
            data.static_fields.sort_by_key(|f| f.field);
            data.instance_fields.sort_by_key(|f| f.field);
            data.direct_methods.sort_by_key(|m| m.method);
            data.virtual_methods.sort_by_key(|m| m.method);
        }
        if let Some(dir) = &mut class.annotations {
            dir.sort();
        }
        if let Some(values) = &mut class.static_values {
            values.iter_mut().for_each(|v| v.sort_nested());
        }
    }
    Ok(())
}

/// Offsets of the id sections, which directly follow the header.
struct IdLayout {
    string_ids_off: u32,
    type_ids_off: u32,
    proto_ids_off: u32,
    field_ids_off: u32,
    method_ids_off: u32,
    class_defs_off: u32,
    data_off: u32,
}

impl IdLayout {
    fn new(image: &Image) -> IdLayout {
        let mut cursor = HEADER_SIZE;
        let mut place = |count: usize, width: u32| {
            if count == 0 {
                return 0;
            }
            let off = cursor;
            cursor += count as u32 * width;
            off
        };
        let string_ids_off = place(image.strings.len(), 4);
        let type_ids_off = place(image.types.len(), 4);
        let proto_ids_off = place(image.protos.len(), 12);
        let field_ids_off = place(image.fields.len(), 8);
        let method_ids_off = place(image.methods.len(), 8);
        let class_defs_off = place(image.classes.len(), 32);
        IdLayout { string_ids_off, type_ids_off, proto_ids_off, field_ids_off, method_ids_off, class_defs_off, data_off: cursor }
    }
}

#[derive(Debug)]
struct MapItem {
    type_code: u16,
    size: u32,
    offset: u32,
}

/// The file being built. Items of one type are written back to back so that each
/// type needs a single map entry.
struct Emitter {
    file: Vec<u8>,
    sections: Vec<MapItem>,
}

impl Emitter {
    fn begin(&mut self, type_code: u16, align: usize) -> Result<u32, DexError> {
        while self.file.len() % align != 0 {
            self.file.push(0);
        }
        let offset = u32::try_from(self.file.len()).map_err(|_| DexError::overflow(self.file.len() as u64, 32))?;
        match self.sections.last_mut() {
            Some(s) if s.type_code == type_code => s.size += 1,
            _ => self.sections.push(MapItem { type_code, size: 1, offset }),
        }
        Ok(offset)
    }

    /// Writes `bytes` as a new item unless an identical one exists.
    fn shared(&mut self, cache: &mut HashMap<Vec<u8>, u32>, type_code: u16, align: usize, bytes: Vec<u8>) -> Result<u32, DexError> {
        if let Some(&off) = cache.get(&bytes) {
            return Ok(off);
        }
        let off = self.begin(type_code, align)?;
        self.file.extend_from_slice(&bytes);
        cache.insert(bytes, off);
        Ok(off)
    }

    fn type_list(&mut self, cache: &mut HashMap<Vec<u8>, u32>, list: &[u32]) -> Result<u32, DexError> {
        if list.is_empty() {
            return Ok(0);
        }
        let mut bytes = Vec::with_capacity(4 + list.len() * 2);
        write_u4(&mut bytes, list.len() as u32);
        for t in list {
            write_idx16(&mut bytes, *t)?;
        }
        self.shared(cache, TYPE_TYPE_LIST, 4, bytes)
    }
}

fn annotation_bytes(item: &AnnotationItem) -> Vec<u8> {
    let mut bytes = vec![];
    item.write(&mut bytes);
    bytes
}

fn lookup(cache: &HashMap<Vec<u8>, u32>, bytes: &[u8], class: usize) -> Result<u32, DexError> {
    cache.get(bytes).copied().ok_or(DexError::UnresolvedReference { table: Table::Class, index: class as u32 })
}

fn set_bytes(set: &AnnotationSet, items: &HashMap<Vec<u8>, u32>, class: usize) -> Result<Vec<u8>, DexError> {
    let mut bytes = Vec::with_capacity(4 + set.items.len() * 4);
    write_u4(&mut bytes, set.items.len() as u32);
    for item in &set.items {
        write_u4(&mut bytes, lookup(items, &annotation_bytes(item), class)?);
    }
    Ok(bytes)
}

fn write_class_data(bytes: &mut Vec<u8>, data: &ClassData, code_offsets: &[u32]) -> Result<(), DexError> {
    write_uleb128(bytes, data.static_fields.len() as u32);
    write_uleb128(bytes, data.instance_fields.len() as u32);
    write_uleb128(bytes, data.direct_methods.len() as u32);
    write_uleb128(bytes, data.virtual_methods.len() as u32);
    for list in [&data.static_fields, &data.instance_fields] {
        let mut prev = 0u32;
        for f in list {
            write_uleb128(bytes, f.field.wrapping_sub(prev));
            write_uleb128(bytes, f.access_flags.bits());
            prev = f.field;
        }
    }
    for list in [&data.direct_methods, &data.virtual_methods] {
        let mut prev = 0u32;
        for m in list {
            write_uleb128(bytes, m.method.wrapping_sub(prev));
            write_uleb128(bytes, m.access_flags.bits());
            let code_off = match m.code {
                None => 0,
                Some(c) => code_offsets
                    .get(c as usize)
                    .copied()
                    .ok_or(DexError::UnresolvedReference { table: Table::Code, index: c })?,
            };
            write_uleb128(bytes, code_off);
            prev = m.method;
        }
    }
    Ok(())
}

#[derive(Default, Clone, Copy)]
struct ClassOffsets {
    interfaces: u32,
    annotations: u32,
    class_data: u32,
    static_values: u32,
}

fn emit(image: &Image) -> Result<Vec<u8>, DexError> {
    let ids = IdLayout::new(image);
    let mut e = Emitter { file: vec![0; ids.data_off as usize], sections: vec![] };
    let mut class_offsets = vec![ClassOffsets::default(); image.classes.len()];

    let mut string_offsets = Vec::with_capacity(image.strings.len());
    for s in &image.strings {
        string_offsets.push(e.begin(TYPE_STRING_DATA_ITEM, 1)?);
        s.write(&mut e.file);
    }

    let mut type_lists = HashMap::new();
    let mut proto_parameters = Vec::with_capacity(image.protos.len());
    for p in &image.protos {
        proto_parameters.push(e.type_list(&mut type_lists, &p.parameters)?);
    }
    for (class, offsets) in image.classes.iter().zip(class_offsets.iter_mut()) {
        offsets.interfaces = e.type_list(&mut type_lists, &class.interfaces)?;
    }

    let mut debug_offsets = Vec::with_capacity(image.codes.len());
    for code in &image.codes {
        debug_offsets.push(match &code.debug_info {
            Some(debug) => {
                let off = e.begin(TYPE_DEBUG_INFO_ITEM, 1)?;
                debug.write(&mut e.file)?;
                off
            }
            None => 0,
        });
    }

    let mut code_offsets = Vec::with_capacity(image.codes.len());
    for (code, debug_off) in image.codes.iter().zip(debug_offsets) {
        code_offsets.push(e.begin(TYPE_CODE_ITEM, 4)?);
        code.write(&mut e.file, debug_off)?;
    }

    // annotation items, then the sets that list them, then parameter ref lists
    let mut items = HashMap::new();
    for class in &image.classes {
        for set in class.annotations.iter().flat_map(|d| d.sets()) {
            for item in &set.items {
                e.shared(&mut items, TYPE_ANNOTATION_ITEM, 1, annotation_bytes(item))?;
            }
        }
    }
    let mut sets = HashMap::new();
    for (ci, class) in image.classes.iter().enumerate() {
        for set in class.annotations.iter().flat_map(|d| d.sets()) {
            let bytes = set_bytes(set, &items, ci)?;
            e.shared(&mut sets, TYPE_ANNOTATION_SET_ITEM, 4, bytes)?;
        }
    }
    let set_offset = |set: &AnnotationSet, ci: usize| -> Result<u32, DexError> { lookup(&sets, &set_bytes(set, &items, ci)?, ci) };

    let mut ref_lists = HashMap::new();
    let mut ref_list_offsets: Vec<Vec<u32>> = vec![vec![]; image.classes.len()];
    for (ci, class) in image.classes.iter().enumerate() {
        let Some(dir) = &class.annotations else {
            continue;
        };
        for p in &dir.parameters {
            let mut bytes = Vec::with_capacity(4 + p.parameters.len() * 4);
            write_u4(&mut bytes, p.parameters.len() as u32);
            for set in &p.parameters {
                let off = match set {
                    Some(s) => set_offset(s, ci)?,
                    None => 0,
                };
                write_u4(&mut bytes, off);
            }
            ref_list_offsets[ci].push(e.shared(&mut ref_lists, TYPE_ANNOTATION_SET_REF_LIST, 4, bytes)?);
        }
    }

    for (ci, class) in image.classes.iter().enumerate() {
        let Some(dir) = &class.annotations else {
            continue;
        };
        let mut bytes = vec![];
        let class_set = match &dir.class_annotations {
            Some(s) => set_offset(s, ci)?,
            None => 0,
        };
        write_u4(&mut bytes, class_set);
        write_u4(&mut bytes, dir.fields.len() as u32);
        write_u4(&mut bytes, dir.methods.len() as u32);
        write_u4(&mut bytes, dir.parameters.len() as u32);
        for f in &dir.fields {
            write_u4(&mut bytes, f.field);
            write_u4(&mut bytes, set_offset(&f.annotations, ci)?);
        }
        for m in &dir.methods {
            write_u4(&mut bytes, m.method);
            write_u4(&mut bytes, set_offset(&m.annotations, ci)?);
        }
        for (p, off) in dir.parameters.iter().zip(&ref_list_offsets[ci]) {
            write_u4(&mut bytes, p.method);
            write_u4(&mut bytes, *off);
        }
        class_offsets[ci].annotations = e.begin(TYPE_ANNOTATIONS_DIRECTORY_ITEM, 4)?;
        e.file.extend_from_slice(&bytes);
    }

    let mut arrays = HashMap::new();
    for (class, offsets) in image.classes.iter().zip(class_offsets.iter_mut()) {
        if let Some(values) = &class.static_values {
            let mut bytes = vec![];
            write_encoded_array(values, &mut bytes);
            offsets.static_values = e.shared(&mut arrays, TYPE_ENCODED_ARRAY_ITEM, 1, bytes)?;
        }
    }

    for (class, offsets) in image.classes.iter().zip(class_offsets.iter_mut()) {
        if let Some(data) = &class.class_data {
            offsets.class_data = e.begin(TYPE_CLASS_DATA_ITEM, 1)?;
            write_class_data(&mut e.file, data, &code_offsets)?;
        }
    }

    let map_off = e.begin(TYPE_MAP_LIST, 4)?;
    let mut map = vec![MapItem { type_code: TYPE_HEADER_ITEM, size: 1, offset: 0 }];
    for (type_code, count, offset) in [
        (TYPE_STRING_ID_ITEM, image.strings.len(), ids.string_ids_off),
        (TYPE_TYPE_ID_ITEM, image.types.len(), ids.type_ids_off),
        (TYPE_PROTO_ID_ITEM, image.protos.len(), ids.proto_ids_off),
        (TYPE_FIELD_ID_ITEM, image.fields.len(), ids.field_ids_off),
        (TYPE_METHOD_ID_ITEM, image.methods.len(), ids.method_ids_off),
        (TYPE_CLASS_DEF_ITEM, image.classes.len(), ids.class_defs_off),
    ] {
        if count > 0 {
            map.push(MapItem { type_code, size: count as u32, offset });
        }
    }
    map.append(&mut e.sections);
    map.sort_by_key(|item| item.offset);
    write_u4(&mut e.file, map.len() as u32);
    for item in &map {
        write_u2(&mut e.file, item.type_code);
        write_u2(&mut e.file, 0);
        write_u4(&mut e.file, item.size);
        write_u4(&mut e.file, item.offset);
    }

    let mut id_bytes = Vec::with_capacity((ids.data_off - HEADER_SIZE) as usize);
    for off in &string_offsets {
        write_u4(&mut id_bytes, *off);
    }
    for t in &image.types {
        write_u4(&mut id_bytes, t.descriptor);
    }
    for (p, params_off) in image.protos.iter().zip(&proto_parameters) {
        write_u4(&mut id_bytes, p.shorty);
        write_u4(&mut id_bytes, p.return_type);
        write_u4(&mut id_bytes, *params_off);
    }
    for f in &image.fields {
        write_idx16(&mut id_bytes, f.class)?;
        write_idx16(&mut id_bytes, f.type_)?;
        write_u4(&mut id_bytes, f.name);
    }
    for m in &image.methods {
        write_idx16(&mut id_bytes, m.class)?;
        write_idx16(&mut id_bytes, m.proto)?;
        write_u4(&mut id_bytes, m.name);
    }
    for (class, offsets) in image.classes.iter().zip(&class_offsets) {
        write_u4(&mut id_bytes, class.class_type);
        write_u4(&mut id_bytes, class.access_flags.bits());
        write_idx32(&mut id_bytes, class.superclass)?;
        write_u4(&mut id_bytes, offsets.interfaces);
        write_idx32(&mut id_bytes, class.source_file)?;
        write_u4(&mut id_bytes, offsets.annotations);
        write_u4(&mut id_bytes, offsets.class_data);
        write_u4(&mut id_bytes, offsets.static_values);
    }
    e.file[HEADER_SIZE as usize..ids.data_off as usize].copy_from_slice(&id_bytes);

    let file_size = u32::try_from(e.file.len()).map_err(|_| DexError::overflow(e.file.len() as u64, 32))?;
    let mut header = Header::for_version(35);
    header.magic = image.header.magic;
    header.file_size = file_size;
    header.map_off = map_off;
    header.string_ids_size = image.strings.len() as u32;
    header.string_ids_off = ids.string_ids_off;
    header.type_ids_size = image.types.len() as u32;
    header.type_ids_off = ids.type_ids_off;
    header.proto_ids_size = image.protos.len() as u32;
    header.proto_ids_off = ids.proto_ids_off;
    header.field_ids_size = image.fields.len() as u32;
    header.field_ids_off = ids.field_ids_off;
    header.method_ids_size = image.methods.len() as u32;
    header.method_ids_off = ids.method_ids_off;
    header.class_defs_size = image.classes.len() as u32;
    header.class_defs_off = ids.class_defs_off;
    header.data_off = ids.data_off;
    header.data_size = file_size - ids.data_off;

    let mut file = e.file;
    write_header(&mut file, &header);
    header.signature = signature(&file[32..]);
    write_header(&mut file, &header);
    header.checksum = adler32_slice(&file[12..]);
    write_header(&mut file, &header);
    Ok(file)
}

pub(crate) fn signature(data: &[u8]) -> [u8; 20] {
    let digest = Sha1::digest(data);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

fn write_header(file: &mut [u8], header: &Header) {
    let mut bytes = Vec::with_capacity(HEADER_SIZE as usize);
    header.write(&mut bytes);
    file[..HEADER_SIZE as usize].copy_from_slice(&bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::code::CodeItem;
    use crate::dex::read_u4;

    fn image_with_strings(strings: &[&str]) -> Image {
        let mut image = Image::new(35);
        image.strings = strings.iter().map(|s| DexString::from_string(s)).collect();
        image
    }

    #[test]
    fn empty_image_has_header_and_map_only() {
        let bytes = serialize(Image::new(35)).unwrap();
        // header, then a map with two entries
        assert_eq!(bytes.len(), 0x70 + 4 + 2 * 12);
        let mut ix = 0x20;
        assert_eq!(read_u4(&bytes, &mut ix).unwrap() as usize, bytes.len());
        let mut ix = 0x34;
        assert_eq!(read_u4(&bytes, &mut ix).unwrap(), 0x70);
        let mut ix = 8;
        assert_eq!(read_u4(&bytes, &mut ix).unwrap(), adler32_slice(&bytes[12..]));
    }

    #[test]
    fn strings_are_sorted_by_utf16_units() {
        let mut image = image_with_strings(&["b", "\u{ffff}", "a", "\u{10000}"]);
        let graph = Graph::build(&image).unwrap();
        canonicalize(&mut image, &graph).unwrap();
        let sorted: Vec<String> = image.strings.iter().map(|s| s.to_string_lossy()).collect();
        assert_eq!(sorted, vec!["a", "b", "\u{10000}", "\u{ffff}"]);
    }

    #[test]
    fn canonical_order_rewrites_references() {
        let mut image = image_with_strings(&["LB;", "LA;"]);
        image.types = vec![TypeItem { descriptor: 0 }, TypeItem { descriptor: 1 }];
        // B extends A, but B comes first
        image.classes = vec![ClassDef::new(0, AccessFlags::PUBLIC, Some(1)), ClassDef::new(1, AccessFlags::PUBLIC, None)];
        let graph = Graph::build(&image).unwrap();
        canonicalize(&mut image, &graph).unwrap();

        assert_eq!(image.string(0), "LA;");
        assert_eq!(image.types[0].descriptor, 0);
        assert_eq!(image.type_descriptor(image.classes[0].class_type), "LA;");
        assert_eq!(image.type_descriptor(image.classes[1].class_type), "LB;");
        assert_eq!(image.classes[1].superclass, Some(image.classes[0].class_type));
    }

    #[test]
    fn unused_code_items_are_dropped() {
        let mut image = Image::new(35);
        image.codes = vec![CodeItem::new(0, 0, 0, vec![0x000e])];
        let bytes = serialize(image).unwrap();
        let back = Image::from_bytes(&bytes).unwrap();
        assert!(back.codes.is_empty());
    }

    #[test]
    fn dangling_index_fails_serialization() {
        let mut image = image_with_strings(&["LA;"]);
        image.types = vec![TypeItem { descriptor: 3 }];
        assert_eq!(serialize(image), Err(DexError::UnresolvedReference { table: Table::String, index: 3 }));
    }

    #[test]
    fn too_many_types_is_a_layout_overflow() {
        let mut image = image_with_strings(&["LA;"]);
        image.types = vec![TypeItem { descriptor: 0 }; MAX_16BIT_TABLE + 1];
        assert!(matches!(serialize(image), Err(DexError::LayoutOverflow { table: Table::Type, .. })));
    }

    #[test]
    fn identical_type_lists_are_shared() {
        let mut image = image_with_strings(&["I", "V", "VI", "J", "JI"]);
        image.types = vec![TypeItem { descriptor: 0 }, TypeItem { descriptor: 1 }, TypeItem { descriptor: 3 }];
        image.protos = vec![
            ProtoItem { shorty: 2, return_type: 1, parameters: vec![0] },
            ProtoItem { shorty: 4, return_type: 2, parameters: vec![0] },
        ];
        let bytes = serialize(image).unwrap();
        let mut h = 0;
        let header = Header::read(&bytes, &mut h).unwrap();
        let params_at = |i: u32| {
            let mut ix = (header.proto_ids_off + i * 12 + 8) as usize;
            read_u4(&bytes, &mut ix).unwrap()
        };
        assert_ne!(params_at(0), 0);
        assert_eq!(params_at(0), params_at(1));
    }
}
