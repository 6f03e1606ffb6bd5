use thiserror::Error;

use crate::graph::{EntityId, Table};

macro_rules! malformed {
    ($table:expr, $offset:expr) => {
        crate::dex::error::DexError::MalformedTable { table: $table, offset: ($offset) as usize }
    };
}

macro_rules! unsupported {
    ($msg:literal) => {
        crate::dex::error::DexError::UnsupportedFormat($msg.to_string())
    };
    ($fmtstr:literal, $($args:tt)*) => {
        crate::dex::error::DexError::UnsupportedFormat(format!($fmtstr, $($args)*))
    };
}

/// Every way a parse, transformation or serialization can fail.
///
/// Parse and serialize errors are fatal for the call that raised them: no partial
/// image or buffer is produced. Editor errors (`EntityInUse`, `UnresolvedReference`,
/// `EntityKindMismatch`, `NameConflict`) are raised before anything is mutated, so the
/// caller may fix the precondition and retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DexError {
    /// A read would run past the end of the buffer.
    #[error("unexpected end of input reading {needed} byte(s) at offset 0x{offset:x}")]
    TruncatedInput { offset: usize, needed: usize },

    /// A value does not fit the width of the field it is written to.
    #[error("value {value} does not fit in {width} bits")]
    EncodingOverflow { value: u64, width: u8 },

    /// Wrong magic, unsupported version, or a format feature this editor does not model.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A structural violation found while reading `table`.
    #[error("malformed {table} table at offset 0x{offset:x}")]
    MalformedTable { table: Table, offset: usize },

    /// The entity still has incoming references.
    #[error("{entity} is still referenced from {referrers} site(s)")]
    EntityInUse { entity: EntityId, referrers: usize },

    /// A declared entry point or keep-list name does not exist in the image.
    #[error("entry point not found: {0}")]
    EntryPointMissing(String),

    /// A table grew beyond what the format's index width can address.
    #[error("{table} table has {count} entries, the format allows at most {limit}")]
    LayoutOverflow { table: Table, count: usize, limit: usize },

    /// An index names an entry that does not exist.
    #[error("reference to missing {table} entry {index}")]
    UnresolvedReference { table: Table, index: u32 },

    /// A replacement entity is not of the table kind it replaces.
    #[error("cannot store a {found} entity in the {expected} table")]
    EntityKindMismatch { expected: Table, found: Table },

    /// A rename would produce a name that already exists.
    #[error("name already in use: {0}")]
    NameConflict(String),

    /// A qualified name or identifier could not be parsed or is not valid.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// A transformation was configured with out-of-range values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DexError {
    pub(crate) fn truncated(offset: usize, needed: usize) -> Self {
        DexError::TruncatedInput { offset, needed }
    }

    pub(crate) fn overflow(value: impl Into<u64>, width: u8) -> Self {
        DexError::EncodingOverflow { value: value.into(), width }
    }
}
