//! code_item, its try/catch tables and the debug_info_item state machine.

use std::collections::HashMap;

use log::warn;

use crate::dex::error::DexError;
use crate::dex::{
    read_sleb128, read_u1, read_u2, read_u4, read_uleb128, read_uleb128p1, write_opt_uleb128p1, write_sleb128, write_u1,
    write_u2, write_u4, write_uleb128,
};
use crate::graph::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeAddrPair {
    pub type_idx: u32,
    pub addr: u32,
}

/// try_item. `handler` is a position in `CodeItem::handlers`, not a byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TryItem {
    pub start_addr: u32,
    pub insn_count: u16,
    pub handler: u32,
}

/// encoded_catch_handler
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatchHandler {
    pub pairs: Vec<TypeAddrPair>,
    pub catch_all: Option<u32>,
}

impl CatchHandler {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<CatchHandler, DexError> {
        let size = read_sleb128(bytes, ix)?;
        let count = size.unsigned_abs() as usize;
        let mut pairs = Vec::with_capacity(count.min(bytes.len()));
        for _ in 0..count {
            let type_idx = read_uleb128(bytes, ix)?;
            let addr = read_uleb128(bytes, ix)?;
            pairs.push(TypeAddrPair { type_idx, addr });
        }
        let catch_all = if size <= 0 { Some(read_uleb128(bytes, ix)?) } else { None };
        Ok(CatchHandler { pairs, catch_all })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = 0;
        let size = if self.catch_all.is_some() { -(self.pairs.len() as i32) } else { self.pairs.len() as i32 };
        c += write_sleb128(bytes, size);
        for p in &self.pairs {
            c += write_uleb128(bytes, p.type_idx);
            c += write_uleb128(bytes, p.addr);
        }
        if let Some(addr) = self.catch_all {
            c += write_uleb128(bytes, addr);
        }
        c
    }
}

/// One instruction of the debug_info state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugOp {
    AdvancePc(u32),
    AdvanceLine(i32),
    StartLocal { register: u32, name: Option<u32>, type_: Option<u32> },
    StartLocalExtended { register: u32, name: Option<u32>, type_: Option<u32>, signature: Option<u32> },
    EndLocal(u32),
    RestartLocal(u32),
    SetPrologueEnd,
    SetEpilogueBegin,
    SetFile(Option<u32>),
    /// Special opcodes `0x0a..=0xff` advance line and address together.
    Special(u8),
}

const DBG_END_SEQUENCE: u8 = 0x00;
const DBG_ADVANCE_PC: u8 = 0x01;
const DBG_ADVANCE_LINE: u8 = 0x02;
const DBG_START_LOCAL: u8 = 0x03;
const DBG_START_LOCAL_EXTENDED: u8 = 0x04;
const DBG_END_LOCAL: u8 = 0x05;
const DBG_RESTART_LOCAL: u8 = 0x06;
const DBG_SET_PROLOGUE_END: u8 = 0x07;
const DBG_SET_EPILOGUE_BEGIN: u8 = 0x08;
const DBG_SET_FILE: u8 = 0x09;

fn read_opt_index(bytes: &[u8], ix: &mut usize) -> Result<Option<u32>, DexError> {
    let v = read_uleb128p1(bytes, ix)?;
    Ok(if v < 0 { None } else { Some(v as u32) })
}

/// debug_info_item
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebugInfo {
    pub line_start: u32,
    pub parameter_names: Vec<Option<u32>>,
    pub ops: Vec<DebugOp>,
}

impl DebugInfo {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<DebugInfo, DexError> {
        let line_start = read_uleb128(bytes, ix)?;
        let parameters_size = read_uleb128(bytes, ix)? as usize;
        let mut parameter_names = Vec::with_capacity(parameters_size.min(bytes.len()));
        for _ in 0..parameters_size {
            parameter_names.push(read_opt_index(bytes, ix)?);
        }

        let mut ops = vec![];
        loop {
            let op = match read_u1(bytes, ix)? {
                DBG_END_SEQUENCE => break,
                DBG_ADVANCE_PC => DebugOp::AdvancePc(read_uleb128(bytes, ix)?),
                DBG_ADVANCE_LINE => DebugOp::AdvanceLine(read_sleb128(bytes, ix)?),
                DBG_START_LOCAL => DebugOp::StartLocal {
                    register: read_uleb128(bytes, ix)?,
                    name: read_opt_index(bytes, ix)?,
                    type_: read_opt_index(bytes, ix)?,
                },
                DBG_START_LOCAL_EXTENDED => DebugOp::StartLocalExtended {
                    register: read_uleb128(bytes, ix)?,
                    name: read_opt_index(bytes, ix)?,
                    type_: read_opt_index(bytes, ix)?,
                    signature: read_opt_index(bytes, ix)?,
                },
                DBG_END_LOCAL => DebugOp::EndLocal(read_uleb128(bytes, ix)?),
                DBG_RESTART_LOCAL => DebugOp::RestartLocal(read_uleb128(bytes, ix)?),
                DBG_SET_PROLOGUE_END => DebugOp::SetPrologueEnd,
                DBG_SET_EPILOGUE_BEGIN => DebugOp::SetEpilogueBegin,
                DBG_SET_FILE => DebugOp::SetFile(read_opt_index(bytes, ix)?),
                special => DebugOp::Special(special),
            };
            ops.push(op);
        }

        Ok(DebugInfo { line_start, parameter_names, ops })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> Result<usize, DexError> {
        let mut c = 0;
        c += write_uleb128(bytes, self.line_start);
        c += write_uleb128(bytes, self.parameter_names.len() as u32);
        for p in &self.parameter_names {
            c += write_opt_uleb128p1(bytes, *p)?;
        }
        for op in &self.ops {
            match *op {
                DebugOp::AdvancePc(d) => {
                    c += write_u1(bytes, DBG_ADVANCE_PC) + write_uleb128(bytes, d);
                }
                DebugOp::AdvanceLine(d) => {
                    c += write_u1(bytes, DBG_ADVANCE_LINE) + write_sleb128(bytes, d);
                }
                DebugOp::StartLocal { register, name, type_ } => {
                    c += write_u1(bytes, DBG_START_LOCAL) + write_uleb128(bytes, register);
                    c += write_opt_uleb128p1(bytes, name)?;
                    c += write_opt_uleb128p1(bytes, type_)?;
                }
                DebugOp::StartLocalExtended { register, name, type_, signature } => {
                    c += write_u1(bytes, DBG_START_LOCAL_EXTENDED) + write_uleb128(bytes, register);
                    c += write_opt_uleb128p1(bytes, name)?;
                    c += write_opt_uleb128p1(bytes, type_)?;
                    c += write_opt_uleb128p1(bytes, signature)?;
                }
                DebugOp::EndLocal(r) => {
                    c += write_u1(bytes, DBG_END_LOCAL) + write_uleb128(bytes, r);
                }
                DebugOp::RestartLocal(r) => {
                    c += write_u1(bytes, DBG_RESTART_LOCAL) + write_uleb128(bytes, r);
                }
                DebugOp::SetPrologueEnd => c += write_u1(bytes, DBG_SET_PROLOGUE_END),
                DebugOp::SetEpilogueBegin => c += write_u1(bytes, DBG_SET_EPILOGUE_BEGIN),
                DebugOp::SetFile(name) => {
                    c += write_u1(bytes, DBG_SET_FILE) + write_opt_uleb128p1(bytes, name)?;
                }
                DebugOp::Special(b) => c += write_u1(bytes, b),
            }
        }
        c += write_u1(bytes, DBG_END_SEQUENCE);
        Ok(c)
    }

    /// Visits parameter names, then the names, types and signatures of the local
    /// variable ops in order. Absent (`NO_INDEX`) entries are not visited.
    pub fn refs(&self, f: &mut dyn FnMut(Table, u32)) {
        for p in self.parameter_names.iter().flatten() {
            f(Table::String, *p);
        }
        for op in &self.ops {
            match op {
                DebugOp::StartLocal { name, type_, .. } => {
                    name.iter().for_each(|n| f(Table::String, *n));
                    type_.iter().for_each(|t| f(Table::Type, *t));
                }
                DebugOp::StartLocalExtended { name, type_, signature, .. } => {
                    name.iter().for_each(|n| f(Table::String, *n));
                    type_.iter().for_each(|t| f(Table::Type, *t));
                    signature.iter().for_each(|s| f(Table::String, *s));
                }
                DebugOp::SetFile(Some(n)) => f(Table::String, *n),
                _ => {}
            }
        }
    }

    pub fn refs_mut(&mut self, f: &mut dyn FnMut(Table, &mut u32)) {
        for p in self.parameter_names.iter_mut().flatten() {
            f(Table::String, p);
        }
        for op in &mut self.ops {
            match op {
                DebugOp::StartLocal { name, type_, .. } => {
                    name.iter_mut().for_each(|n| f(Table::String, n));
                    type_.iter_mut().for_each(|t| f(Table::Type, t));
                }
                DebugOp::StartLocalExtended { name, type_, signature, .. } => {
                    name.iter_mut().for_each(|n| f(Table::String, n));
                    type_.iter_mut().for_each(|t| f(Table::Type, t));
                    signature.iter_mut().for_each(|s| f(Table::String, s));
                }
                DebugOp::SetFile(Some(n)) => f(Table::String, n),
                _ => {}
            }
        }
    }
}

/// code_item with its handler list decoded and its debug info resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodeItem {
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    pub insns: Vec<u16>,
    pub tries: Vec<TryItem>,
    pub handlers: Vec<CatchHandler>,
    pub debug_info: Option<DebugInfo>,
}

impl CodeItem {
    pub fn new(registers_size: u16, ins_size: u16, outs_size: u16, insns: Vec<u16>) -> CodeItem {
        CodeItem { registers_size, ins_size, outs_size, insns, tries: vec![], handlers: vec![], debug_info: None }
    }

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<CodeItem, DexError> {
        let code_item_start = *ix;
        let registers_size = read_u2(bytes, ix)?;
        let ins_size = read_u2(bytes, ix)?;
        let outs_size = read_u2(bytes, ix)?;
        let tries_size = read_u2(bytes, ix)?;
        let debug_info_off = read_u4(bytes, ix)?;
        let insns_size = read_u4(bytes, ix)? as usize;

        if insns_size.saturating_mul(2) > bytes.len().saturating_sub(*ix) {
            return Err(malformed!(Table::Code, code_item_start));
        }
        let mut insns = Vec::with_capacity(insns_size);
        for _ in 0..insns_size {
            insns.push(read_u2(bytes, ix)?);
        }

        let mut tries = Vec::with_capacity(tries_size as usize);
        let mut handlers = vec![];
        if tries_size > 0 {
            if insns_size & 1 != 0 {
                let padding = read_u2(bytes, ix)?;
                if padding != 0 {
                    warn!("non-zero code item padding 0x{:04x} at 0x{:x}", padding, *ix - 2);
                }
            }
            let mut raw_tries = Vec::with_capacity(tries_size as usize);
            for _ in 0..tries_size {
                let start_addr = read_u4(bytes, ix)?;
                let insn_count = read_u2(bytes, ix)?;
                let handler_off = read_u2(bytes, ix)?;
                raw_tries.push((start_addr, insn_count, handler_off));
            }

            let handlers_base = *ix;
            let handlers_size = read_uleb128(bytes, ix)? as usize;
            let mut by_offset = HashMap::new();
            for i in 0..handlers_size {
                by_offset.insert(*ix - handlers_base, i as u32);
                handlers.push(CatchHandler::read(bytes, ix)?);
            }

            for (start_addr, insn_count, handler_off) in raw_tries {
                let Some(&handler) = by_offset.get(&(handler_off as usize)) else {
                    return Err(malformed!(Table::Code, code_item_start));
                };
                tries.push(TryItem { start_addr, insn_count, handler });
            }
        }

        let debug_info = match debug_info_off {
            0 => None,
            off => {
                let mut dix = off as usize;
                Some(DebugInfo::read(bytes, &mut dix)?)
            }
        };

        Ok(CodeItem { registers_size, ins_size, outs_size, insns, tries, handlers, debug_info })
    }

    /// Writes the code item with an already placed debug_info_item.
    pub fn write(&self, bytes: &mut Vec<u8>, debug_info_off: u32) -> Result<usize, DexError> {
        let tries_size = u16::try_from(self.tries.len()).map_err(|_| DexError::overflow(self.tries.len() as u64, 16))?;
        let mut c = 0;
        c += write_u2(bytes, self.registers_size);
        c += write_u2(bytes, self.ins_size);
        c += write_u2(bytes, self.outs_size);
        c += write_u2(bytes, tries_size);
        c += write_u4(bytes, debug_info_off);
        c += write_u4(bytes, self.insns.len() as u32);
        for i in &self.insns {
            c += write_u2(bytes, *i);
        }

        if self.tries.is_empty() {
            return Ok(c);
        }
        if self.insns.len() & 1 != 0 {
            c += write_u2(bytes, 0);
        }

        // handler offsets are relative to the start of the encoded_catch_handler_list
        let mut list = vec![];
        write_uleb128(&mut list, self.handlers.len() as u32);
        let mut offsets = Vec::with_capacity(self.handlers.len());
        for h in &self.handlers {
            offsets.push(list.len());
            h.write(&mut list);
        }

        for t in &self.tries {
            let off = *offsets
                .get(t.handler as usize)
                .ok_or(DexError::UnresolvedReference { table: Table::Code, index: t.handler })?;
            let off = u16::try_from(off).map_err(|_| DexError::overflow(off as u64, 16))?;
            c += write_u4(bytes, t.start_addr);
            c += write_u2(bytes, t.insn_count);
            c += write_u2(bytes, off);
        }
        bytes.extend_from_slice(&list);
        c += list.len();
        Ok(c)
    }

    /// Catch types in handler order, each with its (handler, position) slot.
    pub fn catch_types(&self) -> impl Iterator<Item = (u32, u32, u32)> + '_ {
        self.handlers.iter().enumerate().flat_map(|(h, handler)| {
            handler.pairs.iter().enumerate().map(move |(p, pair)| (h as u32, p as u32, pair.type_idx))
        })
    }
}
