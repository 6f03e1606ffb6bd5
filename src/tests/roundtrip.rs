use sha1::{Digest, Sha1};

use super::builder::sample;
use crate::dex::encoded_values::EncodedValue;
use crate::dex::read_u4;
use crate::{edit, parse, serialize, DexError, EditOp, Table};

fn u4_at(bytes: &[u8], offset: usize) -> u32 {
    let mut ix = offset;
    read_u4(bytes, &mut ix).expect("header field")
}

fn sample_bytes() -> Vec<u8> {
    serialize(sample().build()).expect("serialize sample")
}

/// Class data offsets in class_def order.
fn class_data_offsets(bytes: &[u8]) -> Vec<usize> {
    let defs = u4_at(bytes, 0x64) as usize;
    (0..u4_at(bytes, 0x60) as usize).map(|i| u4_at(bytes, defs + i * 32 + 24) as usize).collect()
}

fn restamp(bytes: &mut [u8]) {
    let digest = Sha1::digest(&bytes[32..]);
    bytes[12..32].copy_from_slice(digest.as_slice());
    let checksum = adler::adler32_slice(&bytes[12..]);
    bytes[8..12].copy_from_slice(&checksum.to_le_bytes());
}

/// The sample with its first two class data items stored in swapped order. Still a
/// valid image, but not the layout the writer produces.
fn reordered_sample_bytes() -> Vec<u8> {
    let mut bytes = sample_bytes();
    let defs = u4_at(&bytes, 0x64) as usize;
    let mut items: Vec<(usize, usize)> =
        class_data_offsets(&bytes).into_iter().enumerate().map(|(class, off)| (off, class)).collect();
    items.sort();
    let (first, first_class) = items[0];
    let (second, second_class) = items[1];
    let end = items[2].0;

    let moved = [&bytes[second..end], &bytes[first..second]].concat();
    bytes[first..end].copy_from_slice(&moved);
    let second_at = (first + end - second) as u32;
    bytes[defs + first_class * 32 + 24..][..4].copy_from_slice(&second_at.to_le_bytes());
    bytes[defs + second_class * 32 + 24..][..4].copy_from_slice(&(first as u32).to_le_bytes());
    restamp(&mut bytes);
    bytes
}

#[test]
fn unchanged_foreign_layout_is_reproduced_exactly() {
    let bytes = reordered_sample_bytes();
    assert!(bytes != sample_bytes());
    let image = parse(&bytes).expect("parse reordered sample");
    assert_eq!(image.classes.len(), 3);
    let again = serialize(image).expect("serialize");
    assert_eq!(again.len(), bytes.len());
    assert!(again == bytes, "unchanged image was laid out again");
}

#[test]
fn stale_integrity_fields_are_restamped_on_reuse() {
    let mut bytes = reordered_sample_bytes();
    bytes[8] ^= 0xff;
    let again = serialize(parse(&bytes).expect("parse")).expect("serialize");
    assert_eq!(u4_at(&again, 8), adler::adler32_slice(&again[12..]));
    assert_eq!(&again[12..], &bytes[12..]);
}

#[test]
fn edited_foreign_layout_is_laid_out_canonically() {
    let bytes = reordered_sample_bytes();
    let mut image = parse(&bytes).expect("parse reordered sample");
    edit(&mut image, vec![EditOp::ReplaceString { from: "hello".into(), to: "bonjour".into() }]).expect("edit");
    let again = serialize(image).expect("serialize");
    assert!(again != bytes);
    let offsets = class_data_offsets(&again);
    assert!(offsets.windows(2).all(|w| w[0] < w[1]));
    let image = parse(&again).expect("reparse");
    assert!(image.find_string("bonjour").is_some());
    assert!(serialize(image).expect("serialize again") == again);
}

#[test]
fn serialized_image_reparses_to_the_same_bytes() {
    let bytes = sample_bytes();
    let mut image = parse(&bytes).expect("parse serialized sample");
    assert_eq!(image.classes.len(), 3);
    assert_eq!(image.codes.len(), 7);

    // without its source bytes the image goes through the canonical writer again
    image.source = None;
    let again = serialize(image.clone()).expect("serialize parsed sample");
    assert!(again == bytes, "canonical image changed after a round trip");
    assert_eq!(parse(&again).expect("reparse"), image);
}

#[test]
fn annotations_handlers_and_debug_info_survive_serialization() {
    let image = parse(&sample_bytes()).expect("parse serialized sample");
    let class = |descriptor: &str| {
        let t = image.find_type(descriptor).expect("type present");
        &image.classes[image.class_by_type(t).expect("class present") as usize]
    };

    let dir = class("Lcom/app/Helper;").annotations.as_ref().expect("Helper is annotated");
    let on_class = &dir.class_annotations.as_ref().expect("class annotations").items[0];
    assert_eq!(image.type_descriptor(on_class.annotation.type_idx), "Lcom/app/Marker;");
    let element = &on_class.annotation.elements[0];
    assert_eq!(image.string(element.name_idx), "name");
    assert_eq!(element.value, EncodedValue::String(image.find_string("helper-marker").expect("value present")));
    assert_eq!(image.field_descriptor(dir.fields[0].field), "Lcom/app/Helper;->TAG:Ljava/lang/String;");
    assert_eq!(image.method_descriptor(dir.methods[0].method), "Lcom/app/Helper;->greet()V");
    assert_eq!(image.method_descriptor(dir.parameters[0].method), "Lcom/app/Helper;->say(Ljava/lang/String;)V");
    assert_eq!(dir.parameters[0].parameters.len(), 1);

    let data = class("Lcom/app/Main;").class_data.as_ref().expect("Main has members");
    let main = data
        .direct_methods
        .iter()
        .find(|m| image.string(image.methods[m.method as usize].name) == "main")
        .and_then(|m| m.code)
        .expect("main has code");
    let code = &image.codes[main as usize];
    assert_eq!(code.tries.len(), 1);
    assert_eq!((code.tries[0].start_addr, code.tries[0].insn_count), (0, 12));
    let pair = code.handlers[code.tries[0].handler as usize].pairs[0];
    assert_eq!(image.type_descriptor(pair.type_idx), "Ljava/lang/Exception;");
    assert_eq!(pair.addr, 12);
    let debug = code.debug_info.as_ref().expect("main has debug info");
    assert_eq!(debug.line_start, 10);
    assert_eq!(debug.ops.len(), 5);
    assert!(image.find_string("greeter").is_some());
    assert!(image.find_string("message").is_some());
}

#[test]
fn header_is_recomputed() {
    let bytes = sample_bytes();
    assert_eq!(&bytes[0..8], b"dex\n035\0");
    assert_eq!(u4_at(&bytes, 0x20) as usize, bytes.len());
    assert_eq!(u4_at(&bytes, 0x24), 0x70);
    assert_eq!(u4_at(&bytes, 0x28), 0x12345678);
    assert_eq!(&bytes[12..32], Sha1::digest(&bytes[32..]).as_slice());
    assert_eq!(u4_at(&bytes, 8), adler::adler32_slice(&bytes[12..]));
}

#[test]
fn serialized_tables_are_in_canonical_order() {
    let image = parse(&sample_bytes()).expect("parse serialized sample");
    assert!(image.strings.windows(2).all(|w| w[0].utf16_units() < w[1].utf16_units()));
    assert!(image.types.windows(2).all(|w| w[0].descriptor < w[1].descriptor));
    let method_key = |m: &crate::dex::model::MethodItem| (m.class, m.name, m.proto);
    assert!(image.methods.windows(2).all(|w| method_key(&w[0]) < method_key(&w[1])));
}

#[test]
fn rejects_bad_magic_and_versions() {
    let mut bytes = sample_bytes();
    bytes[0] = b'x';
    assert!(matches!(parse(&bytes), Err(DexError::UnsupportedFormat(_))));

    let mut bytes = sample_bytes();
    bytes[4..7].copy_from_slice(b"099");
    assert!(matches!(parse(&bytes), Err(DexError::UnsupportedFormat(_))));

    let mut bytes = sample_bytes();
    bytes[0x28..0x2c].copy_from_slice(&[0x12, 0x34, 0x56, 0x78]);
    assert!(matches!(parse(&bytes), Err(DexError::UnsupportedFormat(_))));
}

#[test]
fn rejects_truncated_input() {
    let bytes = sample_bytes();
    let cut = &bytes[..bytes.len() - 10];
    assert_eq!(parse(cut).unwrap_err(), DexError::TruncatedInput { offset: cut.len(), needed: 10 });
    assert!(matches!(parse(&bytes[..0x40]), Err(DexError::TruncatedInput { .. })));
}

#[test]
fn rejects_out_of_range_index() {
    let mut bytes = sample_bytes();
    let type_ids_off = u4_at(&bytes, 0x44) as usize;
    bytes[type_ids_off..type_ids_off + 4].copy_from_slice(&0xffffu32.to_le_bytes());
    assert_eq!(parse(&bytes).unwrap_err(), DexError::MalformedTable { table: Table::Type, offset: type_ids_off });
}

#[test]
fn checksum_mismatch_is_tolerated() {
    let mut bytes = sample_bytes();
    bytes[8] ^= 0xff;
    assert!(parse(&bytes).is_ok());
}

#[test]
fn dangling_references_are_not_serialized() {
    let mut image = sample().build();
    image.methods[0].name = 999;
    assert_eq!(serialize(image).unwrap_err(), DexError::UnresolvedReference { table: Table::String, index: 999 });
}
