//! Instruction formats and the pool each opcode's index operand points into.
//!
//! Only what is needed to find index operands is modelled: the size of every
//! format and where its index sits. Register and literal operands are never decoded.

use std::ops::RangeInclusive;

use once_cell::sync::Lazy;
use rangemap::RangeInclusiveMap;

use crate::dex::error::DexError;
use crate::graph::Table;

/// Instruction formats, named as in the Dalvik bytecode documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Format {
    F10x,
    F12x,
    F11n,
    F11x,
    F10t,
    F20t,
    F22x,
    F21t,
    F21s,
    F21h,
    F21c,
    F23x,
    F22b,
    F22t,
    F22s,
    F22c,
    F30t,
    F32x,
    F31i,
    F31t,
    F31c,
    F35c,
    F3rc,
    F45cc,
    F4rcc,
    F51l,
}

impl Format {
    /// Size in 16-bit code units.
    pub(crate) fn size(self) -> usize {
        match self {
            Format::F10x | Format::F12x | Format::F11n | Format::F11x | Format::F10t => 1,
            Format::F20t
            | Format::F22x
            | Format::F21t
            | Format::F21s
            | Format::F21h
            | Format::F21c
            | Format::F23x
            | Format::F22b
            | Format::F22t
            | Format::F22s
            | Format::F22c => 2,
            Format::F30t | Format::F32x | Format::F31i | Format::F31t | Format::F31c | Format::F35c | Format::F3rc => 3,
            Format::F45cc | Format::F4rcc => 4,
            Format::F51l => 5,
        }
    }
}

/// What an opcode's index operand refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reference {
    None,
    String,
    Type,
    Field,
    Method,
    Proto,
    /// invoke-polymorphic: a method at unit 1 and a prototype at unit 3.
    MethodAndProto,
    CallSite,
    MethodHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Opcode {
    Defined(Format, Reference),
    Unused,
}

fn op(format: Format, reference: Reference) -> Opcode {
    Opcode::Defined(format, reference)
}

static OPCODES: Lazy<RangeInclusiveMap<u8, Opcode>> = Lazy::new(|| {
    use Format::*;
    let table: Vec<(RangeInclusive<u8>, Opcode)> = vec![
        (0x00..=0x00, op(F10x, Reference::None)),
        (0x01..=0x01, op(F12x, Reference::None)),
        (0x02..=0x02, op(F22x, Reference::None)),
        (0x03..=0x03, op(F32x, Reference::None)),
        (0x04..=0x04, op(F12x, Reference::None)),
        (0x05..=0x05, op(F22x, Reference::None)),
        (0x06..=0x06, op(F32x, Reference::None)),
        (0x07..=0x07, op(F12x, Reference::None)),
        (0x08..=0x08, op(F22x, Reference::None)),
        (0x09..=0x09, op(F32x, Reference::None)),
        (0x0a..=0x11, op(F11x, Reference::None)),
        (0x0e..=0x0e, op(F10x, Reference::None)),
        (0x12..=0x12, op(F11n, Reference::None)),
        (0x13..=0x13, op(F21s, Reference::None)),
        (0x14..=0x14, op(F31i, Reference::None)),
        (0x15..=0x15, op(F21h, Reference::None)),
        (0x16..=0x16, op(F21s, Reference::None)),
        (0x17..=0x17, op(F31i, Reference::None)),
        (0x18..=0x18, op(F51l, Reference::None)),
        (0x19..=0x19, op(F21h, Reference::None)),
        (0x1a..=0x1a, op(F21c, Reference::String)),
        (0x1b..=0x1b, op(F31c, Reference::String)),
        (0x1c..=0x1c, op(F21c, Reference::Type)),
        (0x1d..=0x1e, op(F11x, Reference::None)),
        (0x1f..=0x1f, op(F21c, Reference::Type)),
        (0x20..=0x20, op(F22c, Reference::Type)),
        (0x21..=0x21, op(F12x, Reference::None)),
        (0x22..=0x22, op(F21c, Reference::Type)),
        (0x23..=0x23, op(F22c, Reference::Type)),
        (0x24..=0x24, op(F35c, Reference::Type)),
        (0x25..=0x25, op(F3rc, Reference::Type)),
        (0x26..=0x26, op(F31t, Reference::None)),
        (0x27..=0x27, op(F11x, Reference::None)),
        (0x28..=0x28, op(F10t, Reference::None)),
        (0x29..=0x29, op(F20t, Reference::None)),
        (0x2a..=0x2a, op(F30t, Reference::None)),
        (0x2b..=0x2c, op(F31t, Reference::None)),
        (0x2d..=0x31, op(F23x, Reference::None)),
        (0x32..=0x37, op(F22t, Reference::None)),
        (0x38..=0x3d, op(F21t, Reference::None)),
        (0x3e..=0x43, Opcode::Unused),
        (0x44..=0x51, op(F23x, Reference::None)),
        (0x52..=0x5f, op(F22c, Reference::Field)),
        (0x60..=0x6d, op(F21c, Reference::Field)),
        (0x6e..=0x72, op(F35c, Reference::Method)),
        (0x73..=0x73, Opcode::Unused),
        (0x74..=0x78, op(F3rc, Reference::Method)),
        (0x79..=0x7a, Opcode::Unused),
        (0x7b..=0x8f, op(F12x, Reference::None)),
        (0x90..=0xaf, op(F23x, Reference::None)),
        (0xb0..=0xcf, op(F12x, Reference::None)),
        (0xd0..=0xd7, op(F22s, Reference::None)),
        (0xd8..=0xe2, op(F22b, Reference::None)),
        (0xe3..=0xf9, Opcode::Unused),
        (0xfa..=0xfa, op(F45cc, Reference::MethodAndProto)),
        (0xfb..=0xfb, op(F4rcc, Reference::MethodAndProto)),
        (0xfc..=0xfc, op(F35c, Reference::CallSite)),
        (0xfd..=0xfd, op(F3rc, Reference::CallSite)),
        (0xfe..=0xfe, op(F21c, Reference::MethodHandle)),
        (0xff..=0xff, op(F21c, Reference::Proto)),
    ];

    // later entries override earlier overlapping ones (return-void inside the 11x run)
    let mut map = RangeInclusiveMap::new();
    for (range, opcode) in table {
        map.insert(range, opcode);
    }
    map
});

pub(crate) fn lookup(opcode: u8) -> Opcode {
    OPCODES.get(&opcode).copied().unwrap_or(Opcode::Unused)
}

const PACKED_SWITCH_PAYLOAD: u16 = 0x0100;
const SPARSE_SWITCH_PAYLOAD: u16 = 0x0200;
const FILL_ARRAY_DATA_PAYLOAD: u16 = 0x0300;

/// An index operand found in an instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OperandRef {
    /// Code unit holding the index (the low half for 32-bit indices).
    pub at: u32,
    pub wide: bool,
    pub table: Table,
    pub index: u32,
}

/// Size in code units of the payload pseudo-instruction starting at `pc`, if any.
fn payload_size(insns: &[u16], pc: usize) -> Option<Result<usize, DexError>> {
    let unit = |i: usize| insns.get(pc + i).copied().map(|u| u as usize);
    let size = match insns[pc] {
        PACKED_SWITCH_PAYLOAD => unit(1).map(|n| 4 + n * 2),
        SPARSE_SWITCH_PAYLOAD => unit(1).map(|n| 2 + n * 4),
        FILL_ARRAY_DATA_PAYLOAD => match (unit(1), unit(2), unit(3)) {
            (Some(width), Some(lo), Some(hi)) => {
                let count = lo | (hi << 16);
                Some(4 + (count * width + 1) / 2)
            }
            _ => None,
        },
        _ => return None,
    };
    Some(size.ok_or_else(|| malformed!(Table::Code, pc * 2)))
}

/// Walks an instruction stream and returns every index operand in order.
///
/// Offsets in errors are byte offsets within the instruction array.
pub(crate) fn operand_refs(insns: &[u16]) -> Result<Vec<OperandRef>, DexError> {
    let mut refs = vec![];
    let mut pc = 0;
    while pc < insns.len() {
        if let Some(size) = payload_size(insns, pc) {
            pc += size?;
            continue;
        }

        let opcode = (insns[pc] & 0xff) as u8;
        let (format, reference) = match lookup(opcode) {
            Opcode::Defined(f, r) => (f, r),
            Opcode::Unused => return Err(malformed!(Table::Code, pc * 2)),
        };
        if pc + format.size() > insns.len() {
            return Err(malformed!(Table::Code, pc * 2));
        }

        let narrow = |table: Table, unit: usize| OperandRef {
            at: (pc + unit) as u32,
            wide: false,
            table,
            index: insns[pc + unit] as u32,
        };
        match reference {
            Reference::None => {}
            Reference::String if format == Format::F31c => refs.push(OperandRef {
                at: (pc + 1) as u32,
                wide: true,
                table: Table::String,
                index: insns[pc + 1] as u32 | ((insns[pc + 2] as u32) << 16),
            }),
            Reference::String => refs.push(narrow(Table::String, 1)),
            Reference::Type => refs.push(narrow(Table::Type, 1)),
            Reference::Field => refs.push(narrow(Table::Field, 1)),
            Reference::Method => refs.push(narrow(Table::Method, 1)),
            Reference::Proto => refs.push(narrow(Table::Proto, 1)),
            Reference::MethodAndProto => {
                refs.push(narrow(Table::Method, 1));
                refs.push(narrow(Table::Proto, 3));
            }
            Reference::CallSite => return Err(unsupported!("invoke-custom at code unit {}", pc)),
            Reference::MethodHandle => return Err(unsupported!("const-method-handle at code unit {}", pc)),
        }
        pc += format.size();
    }
    Ok(refs)
}
