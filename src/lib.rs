//! # dexedit
//!
//! Reads, transforms and writes Android dex images.
//!
//! An image is parsed into an index-based [`Image`], changed in place by any
//! number of transformations in the order the caller picks, and serialized
//! back to a valid file as the final step:
//!
//! ```no_run
//! use dexedit::{obfuscate, parse, serialize, shrink, ObfuscationConfig, ShrinkConfig};
//!
//! let bytes = std::fs::read("classes.dex").unwrap();
//! let mut image = parse(&bytes).unwrap();
//! let config = ShrinkConfig { entry_points: vec!["com.example.MainActivity".into()], ..Default::default() };
//! let report = shrink(&mut image, &config).unwrap();
//! println!("{} classes removed", report.removed_classes.len());
//! obfuscate(&mut image, &ObfuscationConfig::default()).unwrap();
//! std::fs::write("classes.out.dex", serialize(image).unwrap()).unwrap();
//! ```

#[macro_use]
pub mod dex;
pub mod editor;
pub mod graph;
mod hierarchy;
pub mod names;
pub mod obfuscate;
pub mod shrink;

#[cfg(test)]
mod tests;

pub use crate::dex::error::DexError;
pub use crate::dex::model::Image;
pub use crate::editor::{edit, EditOp, Editor, Entity, EntitySet};
pub use crate::graph::{EntityId, Graph, Site, Slot, Table};
pub use crate::obfuscate::{obfuscate, NameStyle, ObfuscationConfig, ObfuscationMapping, Repackage};
pub use crate::shrink::{shrink, ShrinkConfig, ShrinkReport};

/// Parses a dex image. Checksum and signature mismatches are logged, not rejected.
pub fn parse(bytes: &[u8]) -> Result<Image, DexError> {
    dex::parser::parse(bytes)
}

/// Writes an image with a fresh signature and checksum. An image left unchanged since
/// [`parse`] keeps its original layout; anything else is laid out canonically.
pub fn serialize(image: Image) -> Result<Vec<u8>, DexError> {
    dex::writer::serialize(image)
}
