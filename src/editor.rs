//! Generic, reference-safe editing of an [`Image`].
//!
//! Every operation checks its preconditions before touching the image, so a
//! failed operation leaves the image as it was. The reference graph is kept in
//! step: incrementally for inserts, replacements and patches, rebuilt after
//! deletions.

use std::collections::BTreeSet;

use log::debug;

use crate::dex::code::CodeItem;
use crate::dex::error::DexError;
use crate::dex::model::{ClassDef, DexString, FieldItem, Image, MethodItem, ProtoItem, TypeItem};
use crate::dex::NO_INDEX;
use crate::graph::{owner_edges, write_site, EntityId, Graph, Remapping, Site, Slot, Table};
use crate::names::is_valid_type_descriptor;

/// A new or replacement table entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    String(DexString),
    Type(TypeItem),
    Proto(ProtoItem),
    Field(FieldItem),
    Method(MethodItem),
    Class(ClassDef),
    Code(CodeItem),
}

impl Entity {
    pub fn table(&self) -> Table {
        match self {
            Entity::String(_) => Table::String,
            Entity::Type(_) => Table::Type,
            Entity::Proto(_) => Table::Proto,
            Entity::Field(_) => Table::Field,
            Entity::Method(_) => Table::Method,
            Entity::Class(_) => Table::Class,
            Entity::Code(_) => Table::Code,
        }
    }
}

/// A set of entities to delete together. Iterates in table, then index order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitySet {
    ids: BTreeSet<EntityId>,
}

impl EntitySet {
    pub fn new() -> EntitySet {
        EntitySet::default()
    }

    pub fn insert(&mut self, id: EntityId) -> bool {
        self.ids.insert(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityId> {
        self.ids.iter()
    }

    /// Number of members in one table.
    pub fn count(&self, table: Table) -> usize {
        self.ids.iter().filter(|id| id.table == table).count()
    }
}

impl FromIterator<EntityId> for EntitySet {
    fn from_iter<I: IntoIterator<Item = EntityId>>(iter: I) -> Self {
        EntitySet { ids: iter.into_iter().collect() }
    }
}

impl Extend<EntityId> for EntitySet {
    fn extend<I: IntoIterator<Item = EntityId>>(&mut self, iter: I) {
        self.ids.extend(iter)
    }
}

/// One step of an [`edit`] script.
#[derive(Debug, Clone, PartialEq)]
pub enum EditOp {
    Insert(Entity),
    Replace(EntityId, Entity),
    Delete(EntityId),
    Patch { site: Site, index: u32 },
    /// Renames a type by descriptor, e.g. `Lcom/x/Foo;` to `Lcom/y/Bar;`.
    RenameType { from: String, to: String },
    /// Rewrites string literals in code, static values and annotation values.
    ReplaceString { from: String, to: String },
}

/// Applies `ops` in order. Stops at the first failing op; ops before it stay applied.
pub fn edit(image: &mut Image, ops: Vec<EditOp>) -> Result<(), DexError> {
    let mut editor = Editor::new(image)?;
    for op in ops {
        editor.apply(op)?;
    }
    Ok(())
}

pub struct Editor<'a> {
    image: &'a mut Image,
    graph: Graph,
}

impl<'a> Editor<'a> {
    pub fn new(image: &'a mut Image) -> Result<Editor<'a>, DexError> {
        let graph = Graph::build(image)?;
        Ok(Editor { image, graph })
    }

    pub fn image(&self) -> &Image {
        &*self.image
    }

    pub(crate) fn image_mut(&mut self) -> &mut Image {
        &mut *self.image
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Sites currently pointing at `target`.
    pub fn referrers(&self, target: EntityId) -> Vec<Site> {
        self.graph.edges_into(target).iter().filter_map(|id| self.graph.edge(*id)).map(|e| e.site).collect()
    }

    pub fn apply(&mut self, op: EditOp) -> Result<(), DexError> {
        match op {
            EditOp::Insert(entity) => self.insert(entity).map(|_| ()),
            EditOp::Replace(id, entity) => self.replace(id, entity),
            EditOp::Delete(id) => self.delete(id),
            EditOp::Patch { site, index } => self.patch(site, index),
            EditOp::RenameType { from, to } => self.rename_type(&from, &to),
            EditOp::ReplaceString { from, to } => self.replace_string_literal(&from, &to).map(|_| ()),
        }
    }

    fn exists(&self, id: EntityId) -> Result<(), DexError> {
        if self.image.contains(id.table, id.index) {
            Ok(())
        } else {
            Err(DexError::UnresolvedReference { table: id.table, index: id.index })
        }
    }

    fn check_resolved(&self, owner: EntityId) -> Result<(), DexError> {
        let mut edges = vec![];
        owner_edges(self.image, owner, &mut edges)?;
        match edges.iter().find(|e| !self.image.contains(e.target.table, e.target.index)) {
            Some(e) => Err(DexError::UnresolvedReference { table: e.target.table, index: e.target.index }),
            None => Ok(()),
        }
    }

    fn push(&mut self, entity: Entity) {
        match entity {
            Entity::String(s) => self.image.strings.push(s),
            Entity::Type(t) => self.image.types.push(t),
            Entity::Proto(p) => self.image.protos.push(p),
            Entity::Field(f) => self.image.fields.push(f),
            Entity::Method(m) => self.image.methods.push(m),
            Entity::Class(c) => self.image.classes.push(c),
            Entity::Code(c) => self.image.codes.push(c),
        }
    }

    fn pop(&mut self, table: Table) {
        match table {
            Table::String => drop(self.image.strings.pop()),
            Table::Type => drop(self.image.types.pop()),
            Table::Proto => drop(self.image.protos.pop()),
            Table::Field => drop(self.image.fields.pop()),
            Table::Method => drop(self.image.methods.pop()),
            Table::Class => drop(self.image.classes.pop()),
            Table::Code => drop(self.image.codes.pop()),
            Table::Header | Table::Map => {}
        }
    }

    // Stores `entity` at `index` of its table and hands back the previous entry.
    fn swap(&mut self, index: u32, entity: Entity) -> Entity {
        let i = index as usize;
        match entity {
            Entity::String(s) => Entity::String(std::mem::replace(&mut self.image.strings[i], s)),
            Entity::Type(t) => Entity::Type(std::mem::replace(&mut self.image.types[i], t)),
            Entity::Proto(p) => Entity::Proto(std::mem::replace(&mut self.image.protos[i], p)),
            Entity::Field(f) => Entity::Field(std::mem::replace(&mut self.image.fields[i], f)),
            Entity::Method(m) => Entity::Method(std::mem::replace(&mut self.image.methods[i], m)),
            Entity::Class(c) => Entity::Class(std::mem::replace(&mut self.image.classes[i], c)),
            Entity::Code(c) => Entity::Code(std::mem::replace(&mut self.image.codes[i], c)),
        }
    }

    /// Appends an entity. Every index it holds must name an existing entry.
    pub fn insert(&mut self, entity: Entity) -> Result<EntityId, DexError> {
        let table = entity.table();
        let id = EntityId::new(table, self.image.len(table) as u32);
        self.push(entity);
        if let Err(e) = self.check_resolved(id) {
            self.pop(table);
            return Err(e);
        }
        self.graph.add_owner(self.image, id)?;
        debug!("inserted {}", id);
        Ok(id)
    }

    /// Replaces an entity in place. Sites pointing at it keep pointing at it.
    pub fn replace(&mut self, id: EntityId, entity: Entity) -> Result<(), DexError> {
        if entity.table() != id.table {
            return Err(DexError::EntityKindMismatch { expected: id.table, found: entity.table() });
        }
        self.exists(id)?;
        let old = self.swap(id.index, entity);
        if let Err(e) = self.check_resolved(id) {
            self.swap(id.index, old);
            return Err(e);
        }
        self.graph.remove_owner(id);
        self.graph.add_owner(self.image, id)
    }

    /// Deletes an entity nothing refers to. Later entries of its table move down by one.
    pub fn delete(&mut self, id: EntityId) -> Result<(), DexError> {
        self.exists(id)?;
        let referrers = self.graph.edges_into(id).len();
        if referrers > 0 {
            return Err(DexError::EntityInUse { entity: id, referrers });
        }
        self.delete_many(&EntitySet::from_iter([id]))
    }

    /// Deletes a set of entities at once. References between members of the set
    /// are allowed; a reference from outside the set is not.
    pub fn delete_many(&mut self, set: &EntitySet) -> Result<(), DexError> {
        if set.is_empty() {
            return Ok(());
        }
        for id in set.iter() {
            self.exists(*id)?;
        }
        for id in set.iter() {
            let outside = self
                .graph
                .edges_into(*id)
                .iter()
                .filter_map(|e| self.graph.edge(*e))
                .filter(|e| !set.contains(&e.site.owner))
                .count();
            if outside > 0 {
                return Err(DexError::EntityInUse { entity: *id, referrers: outside });
            }
        }

        let mut remapping = Remapping::default();
        for table in Table::ENTITIES {
            if set.count(table) == 0 {
                continue;
            }
            let mut next = 0;
            let mapping = (0..self.image.len(table) as u32)
                .map(|index| {
                    if set.contains(&EntityId::new(table, index)) {
                        NO_INDEX
                    } else {
                        next += 1;
                        next - 1
                    }
                })
                .collect();
            remapping.set(table, mapping);
        }
        self.graph.remap_all(self.image, &remapping)?;

        let image = &mut *self.image;
        image.strings = remapping.permute(Table::String, std::mem::take(&mut image.strings));
        image.types = remapping.permute(Table::Type, std::mem::take(&mut image.types));
        image.protos = remapping.permute(Table::Proto, std::mem::take(&mut image.protos));
        image.fields = remapping.permute(Table::Field, std::mem::take(&mut image.fields));
        image.methods = remapping.permute(Table::Method, std::mem::take(&mut image.methods));
        image.classes = remapping.permute(Table::Class, std::mem::take(&mut image.classes));
        image.codes = remapping.permute(Table::Code, std::mem::take(&mut image.codes));

        self.graph = Graph::build(self.image)?;
        debug!("deleted {} entities", set.len());
        Ok(())
    }

    /// Points one existing site at another entry of the same table.
    pub fn patch(&mut self, site: Site, index: u32) -> Result<(), DexError> {
        let Some(edge_id) = self.graph.edge_at(&site) else {
            return Err(DexError::UnresolvedReference { table: site.owner.table, index: site.owner.index });
        };
        let Some(edge) = self.graph.edge(edge_id) else {
            return Err(DexError::UnresolvedReference { table: site.owner.table, index: site.owner.index });
        };
        let table = edge.target.table;
        if !self.image.contains(table, index) {
            return Err(DexError::UnresolvedReference { table, index });
        }
        write_site(self.image, &site, index)?;
        self.graph.retarget(edge_id, index);
        Ok(())
    }

    /// Index of `s` in the string table, appending it if absent.
    pub fn intern_string(&mut self, s: &str) -> Result<u32, DexError> {
        if let Some(idx) = self.image.find_string(s) {
            return Ok(idx);
        }
        self.insert(Entity::String(DexString::from_string(s))).map(|id| id.index)
    }

    /// Gives a type a new descriptor and returns the string it used before, unless
    /// that string was rewritten in place.
    ///
    /// The descriptor string is rewritten in place when the type is its only
    /// referrer and no string with the new contents exists yet; otherwise the
    /// descriptor site is repointed.
    pub(crate) fn set_descriptor(&mut self, type_idx: u32, descriptor: &str) -> Result<Option<u32>, DexError> {
        let Some(t) = self.image.types.get(type_idx as usize) else {
            return Err(DexError::UnresolvedReference { table: Table::Type, index: type_idx });
        };
        let old = t.descriptor;
        let site = Site::new(EntityId::new(Table::Type, type_idx), Slot::Descriptor);
        let sole_referrer = self.graph.edges_into(EntityId::new(Table::String, old)).len() == 1;
        match self.image.find_string(descriptor) {
            None if sole_referrer => {
                self.replace(EntityId::new(Table::String, old), Entity::String(DexString::from_string(descriptor)))?;
                Ok(None)
            }
            Some(existing) if existing == old => Ok(None),
            _ => {
                let new = self.intern_string(descriptor)?;
                self.patch(site, new)?;
                Ok(Some(old))
            }
        }
    }

    /// Strings from `candidates` that nothing refers to any more.
    pub(crate) fn orphaned_strings(&self, candidates: impl IntoIterator<Item = u32>) -> EntitySet {
        candidates
            .into_iter()
            .map(|s| EntityId::new(Table::String, s))
            .filter(|id| self.image.contains(id.table, id.index) && self.graph.edges_into(*id).is_empty())
            .collect()
    }

    /// Renames a type and every array type built on it. Fails with `NameConflict`
    /// when one of the new descriptors is already a type of the image.
    pub fn rename_type(&mut self, from: &str, to: &str) -> Result<(), DexError> {
        if !is_valid_type_descriptor(to) {
            return Err(DexError::InvalidName(to.to_string()));
        }
        if self.image.find_type(from).is_none() {
            return Err(DexError::InvalidName(from.to_string()));
        }
        if from == to {
            return Ok(());
        }

        let mut renames = vec![];
        for (idx, t) in self.image.types.iter().enumerate() {
            let descriptor = self.image.string(t.descriptor);
            let element = descriptor.trim_start_matches('[');
            if element == from {
                let dims = descriptor.len() - element.len();
                renames.push((idx as u32, format!("{}{}", &descriptor[..dims], to)));
            }
        }
        for (_, descriptor) in &renames {
            if self.image.find_type(descriptor).is_some() {
                return Err(DexError::NameConflict(descriptor.clone()));
            }
        }

        // each rename interns at most one string
        let needed = self.image.strings.len() + renames.len();
        if needed > u32::MAX as usize {
            return Err(DexError::overflow(needed as u64, 32));
        }

        self.atomically(|editor| {
            let mut replaced = vec![];
            for (idx, descriptor) in &renames {
                replaced.extend(editor.set_descriptor(*idx, descriptor)?);
            }
            let orphans = editor.orphaned_strings(replaced);
            editor.delete_many(&orphans)
        })?;
        debug!("renamed {} to {} ({} types)", from, to, renames.len());
        Ok(())
    }

    /// Runs a multi-step change. If any step fails, the image and graph are put
    /// back as they were before the first step.
    pub(crate) fn atomically<T>(&mut self, change: impl FnOnce(&mut Self) -> Result<T, DexError>) -> Result<T, DexError> {
        let image = self.image.clone();
        let graph = self.graph.clone();
        let result = change(self);
        if result.is_err() {
            *self.image = image;
            self.graph = graph;
        }
        result
    }

    /// Replaces the string literal `from` with `to` in const-string operands, static
    /// field initial values and annotation element values. Type descriptors, member
    /// names and annotation element names are left alone. Returns the number of
    /// rewritten sites.
    pub fn replace_string_literal(&mut self, from: &str, to: &str) -> Result<usize, DexError> {
        let Some(from_idx) = self.image.find_string(from) else {
            return Ok(0);
        };
        if from == to {
            return Ok(0);
        }
        let from_id = EntityId::new(Table::String, from_idx);
        let operands: Vec<Site> =
            self.referrers(from_id).into_iter().filter(|s| matches!(s.slot, Slot::Operand { .. })).collect();

        let new_idx = self.image.find_string(to).unwrap_or(self.image.strings.len() as u32);
        if new_idx > u16::MAX as u32 && operands.iter().any(|s| matches!(s.slot, Slot::Operand { wide: false, .. })) {
            return Err(DexError::overflow(new_idx, 16));
        }

        let to_idx = self.intern_string(to)?;
        let mut count = 0;
        for site in operands {
            self.patch(site, to_idx)?;
            count += 1;
        }

        let mut touched = vec![];
        for (ci, class) in self.image.classes.iter_mut().enumerate() {
            let mut n = 0;
            let mut swap = |idx: &mut u32| {
                if *idx == from_idx {
                    *idx = to_idx;
                    n += 1;
                }
            };
            for v in class.static_values.iter_mut().flatten() {
                v.string_literals_mut(&mut swap);
            }
            for set in class.annotations.iter_mut().flat_map(|dir| dir.sets_mut()) {
                set.string_literals_mut(&mut swap);
            }
            if n > 0 {
                touched.push(EntityId::new(Table::Class, ci as u32));
                count += n;
            }
        }
        for owner in touched {
            self.graph.remove_owner(owner);
            self.graph.add_owner(self.image, owner)?;
        }

        if self.graph.edges_into(from_id).is_empty() {
            self.delete(from_id)?;
        }
        debug!("replaced {} literal site(s) of {:?}", count, from);
        Ok(count)
    }
}
