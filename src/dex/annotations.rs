//! DEX annotation structures.
//!
//! The file stores annotations as a web of offsets:
//! annotations_directory_item -> annotation_set_ref_list -> annotation_set_item -> annotation_item.
//! Here each level owns the level below it by value. Readers follow the offsets, the
//! writer lays the items out again and shares identical ones.

use crate::dex::encoded_values::EncodedAnnotation;
use crate::dex::error::DexError;
use crate::dex::{read_u1, read_u4, write_u1};
use crate::graph::Table;

pub const VISIBILITY_BUILD: u8 = 0x00;
pub const VISIBILITY_RUNTIME: u8 = 0x01;
pub const VISIBILITY_SYSTEM: u8 = 0x02;

/// annotation_item
/// https://source.android.com/docs/core/runtime/dex-format#annotation-item
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationItem {
    /// Visibility: 0x00 = build, 0x01 = runtime, 0x02 = system
    pub visibility: u8,
    pub annotation: EncodedAnnotation,
}

impl AnnotationItem {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<AnnotationItem, DexError> {
        let visibility = read_u1(bytes, ix)?;
        let annotation = EncodedAnnotation::read(bytes, ix)?;
        Ok(AnnotationItem {
            visibility,
            annotation,
        })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = 0;
        c += write_u1(bytes, self.visibility);
        c += self.annotation.write(bytes);
        c
    }
}

/// annotation_set_item with its entries resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationSet {
    pub items: Vec<AnnotationItem>,
}

impl AnnotationSet {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<AnnotationSet, DexError> {
        let size = read_u4(bytes, ix)? as usize;
        let mut items = Vec::with_capacity(size.min(bytes.len() / 4));
        for _ in 0..size {
            let mut off = read_u4(bytes, ix)? as usize;
            items.push(AnnotationItem::read(bytes, &mut off)?);
        }
        Ok(AnnotationSet { items })
    }

    pub fn read_at(bytes: &[u8], off: u32) -> Result<AnnotationSet, DexError> {
        let mut ix = off as usize;
        AnnotationSet::read(bytes, &mut ix)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn refs(&self, f: &mut dyn FnMut(Table, u32)) {
        for item in &self.items {
            item.annotation.refs(f);
        }
    }

    pub fn refs_mut(&mut self, f: &mut dyn FnMut(Table, &mut u32)) {
        for item in &mut self.items {
            item.annotation.refs_mut(f);
        }
    }

    /// String constants in element values of every annotation in the set.
    pub fn string_literals_mut(&mut self, f: &mut dyn FnMut(&mut u32)) {
        for item in &mut self.items {
            item.annotation.string_literals_mut(f);
        }
    }

    /// Entries are stored sorted by annotation type.
    pub(crate) fn sort(&mut self) {
        self.items.sort_by_key(|a| a.annotation.type_idx);
        for item in &mut self.items {
            item.annotation.sort_elements();
        }
    }
}

/// field_annotation
#[derive(Debug, Clone, PartialEq)]
pub struct FieldAnnotation {
    pub field: u32,
    pub annotations: AnnotationSet,
}

/// method_annotation
#[derive(Debug, Clone, PartialEq)]
pub struct MethodAnnotation {
    pub method: u32,
    pub annotations: AnnotationSet,
}

/// parameter_annotation, one optional set per parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterAnnotation {
    pub method: u32,
    pub parameters: Vec<Option<AnnotationSet>>,
}

/// annotations_directory_item
/// https://source.android.com/docs/core/runtime/dex-format#annotations-directory-item
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationsDirectory {
    pub class_annotations: Option<AnnotationSet>,
    pub fields: Vec<FieldAnnotation>,
    pub methods: Vec<MethodAnnotation>,
    pub parameters: Vec<ParameterAnnotation>,
}

impl AnnotationsDirectory {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<AnnotationsDirectory, DexError> {
        let class_annotations_off = read_u4(bytes, ix)?;
        let fields_size = read_u4(bytes, ix)? as usize;
        let annotated_methods_size = read_u4(bytes, ix)? as usize;
        let annotated_parameters_size = read_u4(bytes, ix)? as usize;

        let class_annotations = match class_annotations_off {
            0 => None,
            off => Some(AnnotationSet::read_at(bytes, off)?),
        };

        let mut fields = Vec::with_capacity(fields_size.min(bytes.len() / 8));
        for _ in 0..fields_size {
            let field = read_u4(bytes, ix)?;
            let off = read_u4(bytes, ix)?;
            fields.push(FieldAnnotation { field, annotations: AnnotationSet::read_at(bytes, off)? });
        }

        let mut methods = Vec::with_capacity(annotated_methods_size.min(bytes.len() / 8));
        for _ in 0..annotated_methods_size {
            let method = read_u4(bytes, ix)?;
            let off = read_u4(bytes, ix)?;
            methods.push(MethodAnnotation { method, annotations: AnnotationSet::read_at(bytes, off)? });
        }

        let mut parameters = Vec::with_capacity(annotated_parameters_size.min(bytes.len() / 8));
        for _ in 0..annotated_parameters_size {
            let method = read_u4(bytes, ix)?;
            let mut list_ix = read_u4(bytes, ix)? as usize;
            let size = read_u4(bytes, &mut list_ix)? as usize;
            let mut sets = Vec::with_capacity(size.min(bytes.len() / 4));
            for _ in 0..size {
                sets.push(match read_u4(bytes, &mut list_ix)? {
                    0 => None,
                    off => Some(AnnotationSet::read_at(bytes, off)?),
                });
            }
            parameters.push(ParameterAnnotation { method, parameters: sets });
        }

        Ok(AnnotationsDirectory {
            class_annotations,
            fields,
            methods,
            parameters,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.class_annotations.as_ref().map_or(true, |s| s.is_empty())
            && self.fields.is_empty()
            && self.methods.is_empty()
            && self.parameters.is_empty()
    }

    /// Every set in the directory in storage order, parameter sets included.
    pub fn sets(&self) -> impl Iterator<Item = &AnnotationSet> {
        self.class_annotations
            .iter()
            .chain(self.fields.iter().map(|f| &f.annotations))
            .chain(self.methods.iter().map(|m| &m.annotations))
            .chain(self.parameters.iter().flat_map(|p| p.parameters.iter().flatten()))
    }

    pub fn sets_mut(&mut self) -> impl Iterator<Item = &mut AnnotationSet> {
        self.class_annotations
            .iter_mut()
            .chain(self.fields.iter_mut().map(|f| &mut f.annotations))
            .chain(self.methods.iter_mut().map(|m| &mut m.annotations))
            .chain(self.parameters.iter_mut().flat_map(|p| p.parameters.iter_mut().flatten()))
    }

    /// Visits every index in preorder: the class set, then each field, method and
    /// parameter entry followed by the annotations attached to it.
    pub fn refs(&self, f: &mut dyn FnMut(Table, u32)) {
        if let Some(set) = &self.class_annotations {
            set.refs(f);
        }
        for fa in &self.fields {
            f(Table::Field, fa.field);
            fa.annotations.refs(f);
        }
        for ma in &self.methods {
            f(Table::Method, ma.method);
            ma.annotations.refs(f);
        }
        for pa in &self.parameters {
            f(Table::Method, pa.method);
            for set in pa.parameters.iter().flatten() {
                set.refs(f);
            }
        }
    }

    pub fn refs_mut(&mut self, f: &mut dyn FnMut(Table, &mut u32)) {
        if let Some(set) = &mut self.class_annotations {
            set.refs_mut(f);
        }
        for fa in &mut self.fields {
            f(Table::Field, &mut fa.field);
            fa.annotations.refs_mut(f);
        }
        for ma in &mut self.methods {
            f(Table::Method, &mut ma.method);
            ma.annotations.refs_mut(f);
        }
        for pa in &mut self.parameters {
            f(Table::Method, &mut pa.method);
            for set in pa.parameters.iter_mut().flatten() {
                set.refs_mut(f);
            }
        }
    }

    /// Entries are stored sorted by field or method index.
    pub(crate) fn sort(&mut self) {
        self.fields.sort_by_key(|f| f.field);
        self.methods.sort_by_key(|m| m.method);
        self.parameters.sort_by_key(|p| p.method);
        for set in self.sets_mut() {
            set.sort();
        }
    }

    /// Number of indices in the class-level set. They come first in the `refs` walk.
    pub(crate) fn class_ref_count(&self) -> u32 {
        let mut n = 0;
        if let Some(set) = &self.class_annotations {
            set.refs(&mut |_, _| n += 1);
        }
        n
    }

    /// Visits the indices inside the annotations attached to one field or method,
    /// its parameter annotations included. Entry keys are not visited.
    pub(crate) fn member_refs(&self, member: Table, index: u32, f: &mut dyn FnMut(Table, u32)) {
        match member {
            Table::Field => {
                for fa in self.fields.iter().filter(|fa| fa.field == index) {
                    fa.annotations.refs(f);
                }
            }
            Table::Method => {
                for ma in self.methods.iter().filter(|ma| ma.method == index) {
                    ma.annotations.refs(f);
                }
                for pa in self.parameters.iter().filter(|pa| pa.method == index) {
                    for set in pa.parameters.iter().flatten() {
                        set.refs(f);
                    }
                }
            }
            _ => {}
        }
    }

    /// Drops the entries of fields and methods the predicates reject.
    pub(crate) fn retain_members(&mut self, field: impl Fn(u32) -> bool, method: impl Fn(u32) -> bool) {
        self.fields.retain(|fa| field(fa.field));
        self.methods.retain(|ma| method(ma.method));
        self.parameters.retain(|pa| method(pa.method));
    }

    /// Keeps only the annotations accepted by `keep`, dropping entries left empty.
    pub(crate) fn retain(&mut self, mut keep: impl FnMut(&AnnotationItem) -> bool) {
        for set in self.sets_mut() {
            set.items.retain(&mut keep);
        }
        if self.class_annotations.as_ref().is_some_and(|s| s.is_empty()) {
            self.class_annotations = None;
        }
        self.fields.retain(|f| !f.annotations.is_empty());
        self.methods.retain(|m| !m.annotations.is_empty());
        for p in &mut self.parameters {
            for set in &mut p.parameters {
                if set.as_ref().is_some_and(|s| s.is_empty()) {
                    *set = None;
                }
            }
        }
        self.parameters.retain(|p| p.parameters.iter().any(|s| s.is_some()));
    }
}
