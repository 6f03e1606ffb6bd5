//! Reference graph over an [`Image`].
//!
//! Every stored index is an edge from a *site* (the entity holding the index and the
//! slot inside it) to a *target* (a table and an index into it). The graph answers
//! "who points at this entity" and "what does this entity point at" in constant time,
//! and is the single place that knows how to read and rewrite a site.

use std::collections::HashMap;
use std::fmt;

use log::debug;

use crate::dex::code::CodeItem;
use crate::dex::error::DexError;
use crate::dex::model::{ClassDef, Image};
use crate::dex::opcodes::operand_refs;
use crate::dex::NO_INDEX;

/// The tables of a dex image. `Header` and `Map` hold no entities and only appear in errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    String,
    Type,
    Proto,
    Field,
    Method,
    Class,
    Code,
    Header,
    Map,
}

impl Table {
    /// Tables that hold entities, in id-section order.
    pub const ENTITIES: [Table; 7] =
        [Table::String, Table::Type, Table::Proto, Table::Field, Table::Method, Table::Class, Table::Code];
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Table::String => "string",
            Table::Type => "type",
            Table::Proto => "proto",
            Table::Field => "field",
            Table::Method => "method",
            Table::Class => "class",
            Table::Code => "code",
            Table::Header => "header",
            Table::Map => "map",
        };
        f.write_str(name)
    }
}

/// An entity: one entry of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    pub table: Table,
    pub index: u32,
}

impl EntityId {
    pub fn new(table: Table, index: u32) -> EntityId {
        EntityId { table, index }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.table, self.index)
    }
}

/// Where inside its owner an index is stored.
///
/// List slots carry the position in the list. Slots inside nested structures
/// (static values, annotations, debug info) carry the ordinal of the index in a
/// preorder walk of that structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// type -> string
    Descriptor,
    /// proto -> string
    Shorty,
    /// proto -> type
    ReturnType,
    Parameter(u32),
    /// field or method -> defining type
    Class,
    /// field or method -> string
    Name,
    /// field -> type
    FieldType,
    /// method -> proto
    Proto,
    /// class -> type
    SelfType,
    Superclass,
    Interface(u32),
    SourceFile,
    StaticField(u32),
    InstanceField(u32),
    DirectMethod(u32),
    VirtualMethod(u32),
    /// class -> code body of the n-th direct or virtual method
    DirectCode(u32),
    VirtualCode(u32),
    StaticValue(u32),
    Annotation(u32),
    /// code -> index operand at a code unit offset; `wide` for 32-bit indices
    Operand { at: u32, wide: bool },
    CatchType { handler: u32, pos: u32 },
    Debug(u32),
}

impl Slot {
    fn is_nested(&self) -> bool {
        matches!(self, Slot::StaticValue(_) | Slot::Annotation(_) | Slot::Debug(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Site {
    pub owner: EntityId,
    pub slot: Slot,
}

impl Site {
    pub fn new(owner: EntityId, slot: Slot) -> Site {
        Site { owner, slot }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub site: Site,
    pub target: EntityId,
}

pub type EdgeId = usize;

/// Appends every outgoing edge of `owner` to `out`.
pub(crate) fn owner_edges(image: &Image, owner: EntityId, out: &mut Vec<Edge>) -> Result<(), DexError> {
    let mut push = |slot: Slot, table: Table, index: u32| {
        out.push(Edge { site: Site { owner, slot }, target: EntityId { table, index } })
    };
    let i = owner.index as usize;
    match owner.table {
        Table::String | Table::Header | Table::Map => {}
        Table::Type => {
            if let Some(t) = image.types.get(i) {
                push(Slot::Descriptor, Table::String, t.descriptor);
            }
        }
        Table::Proto => {
            if let Some(p) = image.protos.get(i) {
                push(Slot::Shorty, Table::String, p.shorty);
                push(Slot::ReturnType, Table::Type, p.return_type);
                for (n, t) in p.parameters.iter().enumerate() {
                    push(Slot::Parameter(n as u32), Table::Type, *t);
                }
            }
        }
        Table::Field => {
            if let Some(f) = image.fields.get(i) {
                push(Slot::Class, Table::Type, f.class);
                push(Slot::FieldType, Table::Type, f.type_);
                push(Slot::Name, Table::String, f.name);
            }
        }
        Table::Method => {
            if let Some(m) = image.methods.get(i) {
                push(Slot::Class, Table::Type, m.class);
                push(Slot::Proto, Table::Proto, m.proto);
                push(Slot::Name, Table::String, m.name);
            }
        }
        Table::Class => {
            if let Some(c) = image.classes.get(i) {
                class_edges(c, &mut push);
            }
        }
        Table::Code => {
            if let Some(code) = image.codes.get(i) {
                for r in operand_refs(&code.insns)? {
                    push(Slot::Operand { at: r.at, wide: r.wide }, r.table, r.index);
                }
                for (handler, pos, type_idx) in code.catch_types() {
                    push(Slot::CatchType { handler, pos }, Table::Type, type_idx);
                }
                if let Some(debug) = &code.debug_info {
                    let mut n = 0;
                    debug.refs(&mut |table, index| {
                        push(Slot::Debug(n), table, index);
                        n += 1;
                    });
                }
            }
        }
    }
    Ok(())
}

fn class_edges(c: &ClassDef, push: &mut impl FnMut(Slot, Table, u32)) {
    push(Slot::SelfType, Table::Type, c.class_type);
    if let Some(s) = c.superclass {
        push(Slot::Superclass, Table::Type, s);
    }
    for (n, t) in c.interfaces.iter().enumerate() {
        push(Slot::Interface(n as u32), Table::Type, *t);
    }
    if let Some(s) = c.source_file {
        push(Slot::SourceFile, Table::String, s);
    }
    if let Some(data) = &c.class_data {
        for (n, f) in data.static_fields.iter().enumerate() {
            push(Slot::StaticField(n as u32), Table::Field, f.field);
        }
        for (n, f) in data.instance_fields.iter().enumerate() {
            push(Slot::InstanceField(n as u32), Table::Field, f.field);
        }
        for (n, m) in data.direct_methods.iter().enumerate() {
            push(Slot::DirectMethod(n as u32), Table::Method, m.method);
            if let Some(code) = m.code {
                push(Slot::DirectCode(n as u32), Table::Code, code);
            }
        }
        for (n, m) in data.virtual_methods.iter().enumerate() {
            push(Slot::VirtualMethod(n as u32), Table::Method, m.method);
            if let Some(code) = m.code {
                push(Slot::VirtualCode(n as u32), Table::Code, code);
            }
        }
    }
    if let Some(values) = &c.static_values {
        let mut n = 0;
        for v in values {
            v.refs(&mut |table, index| {
                push(Slot::StaticValue(n), table, index);
                n += 1;
            });
        }
    }
    if let Some(dir) = &c.annotations {
        let mut n = 0;
        dir.refs(&mut |table, index| {
            push(Slot::Annotation(n), table, index);
            n += 1;
        });
    }
}

fn missing_site(site: &Site) -> DexError {
    DexError::UnresolvedReference { table: site.owner.table, index: site.owner.index }
}

/// Current value of a site, `None` if the site does not exist.
pub fn read_site(image: &Image, site: &Site) -> Option<u32> {
    let mut edges = vec![];
    owner_edges(image, site.owner, &mut edges).ok()?;
    edges.iter().find(|e| e.site == *site).map(|e| e.target.index)
}

/// Stores `value` at a site. The caller is responsible for the value naming an
/// entity of the right table.
pub(crate) fn write_site(image: &mut Image, site: &Site, value: u32) -> Result<(), DexError> {
    let i = site.owner.index as usize;
    let slot_ref: Option<&mut u32> = match (site.owner.table, site.slot) {
        (Table::Type, Slot::Descriptor) => image.types.get_mut(i).map(|t| &mut t.descriptor),
        (Table::Proto, Slot::Shorty) => image.protos.get_mut(i).map(|p| &mut p.shorty),
        (Table::Proto, Slot::ReturnType) => image.protos.get_mut(i).map(|p| &mut p.return_type),
        (Table::Proto, Slot::Parameter(n)) => image.protos.get_mut(i).and_then(|p| p.parameters.get_mut(n as usize)),
        (Table::Field, Slot::Class) => image.fields.get_mut(i).map(|f| &mut f.class),
        (Table::Field, Slot::FieldType) => image.fields.get_mut(i).map(|f| &mut f.type_),
        (Table::Field, Slot::Name) => image.fields.get_mut(i).map(|f| &mut f.name),
        (Table::Method, Slot::Class) => image.methods.get_mut(i).map(|m| &mut m.class),
        (Table::Method, Slot::Proto) => image.methods.get_mut(i).map(|m| &mut m.proto),
        (Table::Method, Slot::Name) => image.methods.get_mut(i).map(|m| &mut m.name),
        (Table::Class, slot) => match image.classes.get_mut(i) {
            Some(c) => return write_class_site(c, slot, value).ok_or_else(|| missing_site(site)),
            None => None,
        },
        (Table::Code, slot) => match image.codes.get_mut(i) {
            Some(code) => return write_code_site(code, slot, value)?.ok_or_else(|| missing_site(site)),
            None => None,
        },
        _ => None,
    };
    match slot_ref {
        Some(r) => {
            *r = value;
            Ok(())
        }
        None => Err(missing_site(site)),
    }
}

// Sets the n-th index met by a preorder walk.
fn set_nth(walk: impl FnOnce(&mut dyn FnMut(Table, &mut u32)), n: u32, value: u32) -> Option<()> {
    let mut seen = 0;
    let mut hit = None;
    walk(&mut |_, idx| {
        if seen == n {
            *idx = value;
            hit = Some(());
        }
        seen += 1;
    });
    hit
}

fn write_class_site(c: &mut ClassDef, slot: Slot, value: u32) -> Option<()> {
    let data = c.class_data.as_mut();
    let r: &mut u32 = match slot {
        Slot::SelfType => &mut c.class_type,
        Slot::Superclass => c.superclass.as_mut()?,
        Slot::Interface(n) => c.interfaces.get_mut(n as usize)?,
        Slot::SourceFile => c.source_file.as_mut()?,
        Slot::StaticField(n) => &mut data?.static_fields.get_mut(n as usize)?.field,
        Slot::InstanceField(n) => &mut data?.instance_fields.get_mut(n as usize)?.field,
        Slot::DirectMethod(n) => &mut data?.direct_methods.get_mut(n as usize)?.method,
        Slot::VirtualMethod(n) => &mut data?.virtual_methods.get_mut(n as usize)?.method,
        Slot::DirectCode(n) => data?.direct_methods.get_mut(n as usize)?.code.as_mut()?,
        Slot::VirtualCode(n) => data?.virtual_methods.get_mut(n as usize)?.code.as_mut()?,
        Slot::StaticValue(n) => {
            let values = c.static_values.as_mut()?;
            return set_nth(|f| values.iter_mut().for_each(|v| v.refs_mut(f)), n, value);
        }
        Slot::Annotation(n) => {
            let dir = c.annotations.as_mut()?;
            return set_nth(|f| dir.refs_mut(f), n, value);
        }
        _ => return None,
    };
    *r = value;
    Some(())
}

fn write_code_site(code: &mut CodeItem, slot: Slot, value: u32) -> Result<Option<()>, DexError> {
    match slot {
        Slot::Operand { at, wide } => {
            let at = at as usize;
            if wide {
                if at + 1 >= code.insns.len() {
                    return Ok(None);
                }
                code.insns[at] = value as u16;
                code.insns[at + 1] = (value >> 16) as u16;
            } else {
                let narrow = u16::try_from(value).map_err(|_| DexError::overflow(value, 16))?;
                let Some(unit) = code.insns.get_mut(at) else {
                    return Ok(None);
                };
                *unit = narrow;
            }
            Ok(Some(()))
        }
        Slot::CatchType { handler, pos } => {
            Ok(code.handlers.get_mut(handler as usize).and_then(|h| h.pairs.get_mut(pos as usize)).map(|p| {
                p.type_idx = value;
            }))
        }
        Slot::Debug(n) => Ok(code.debug_info.as_mut().and_then(|d| set_nth(|f| d.refs_mut(f), n, value))),
        _ => Ok(None),
    }
}

/// Old-to-new index tables, one per remapped table. `NO_INDEX` marks an entry that
/// is being dropped; sites owned by a dropped entity are left alone.
#[derive(Debug, Clone, Default)]
pub(crate) struct Remapping {
    maps: HashMap<Table, Vec<u32>>,
}

impl Remapping {
    pub(crate) fn set(&mut self, table: Table, mapping: Vec<u32>) {
        self.maps.insert(table, mapping);
    }

    pub(crate) fn get(&self, table: Table) -> Option<&[u32]> {
        self.maps.get(&table).map(|m| m.as_slice())
    }

    fn is_dropped(&self, owner: EntityId) -> bool {
        self.maps.get(&owner.table).is_some_and(|m| m.get(owner.index as usize) == Some(&NO_INDEX))
    }

    fn apply(&self, table: Table, old: u32) -> Result<Option<u32>, DexError> {
        match self.maps.get(&table) {
            None => Ok(None),
            Some(m) => match m.get(old as usize) {
                Some(&NO_INDEX) | None => Err(DexError::UnresolvedReference { table, index: old }),
                Some(&new) => Ok(Some(new)),
            },
        }
    }

    /// Moves the surviving entries of a table to their new positions.
    pub(crate) fn permute<T>(&self, table: Table, items: Vec<T>) -> Vec<T> {
        let Some(m) = self.maps.get(&table) else {
            return items;
        };
        let mut slots: Vec<Option<T>> = Vec::new();
        slots.resize_with(items.len(), || None);
        for (old, item) in items.into_iter().enumerate() {
            match m.get(old) {
                Some(&new) if new != NO_INDEX => slots[new as usize] = Some(item),
                _ => {}
            }
        }
        slots.into_iter().flatten().collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    edges: Vec<Option<Edge>>,
    into: HashMap<EntityId, Vec<EdgeId>>,
    from: HashMap<EntityId, Vec<EdgeId>>,
    lens: HashMap<Table, usize>,
}

impl Graph {
    /// Collects every reference in the image. Fails only on undecodable instruction streams.
    pub fn build(image: &Image) -> Result<Graph, DexError> {
        let mut graph = Graph::default();
        let mut out = vec![];
        for table in Table::ENTITIES {
            for index in 0..image.len(table) {
                owner_edges(image, EntityId::new(table, index as u32), &mut out)?;
            }
        }
        for edge in out {
            graph.push(edge);
        }
        graph.refresh_lens(image);
        debug!("reference graph: {} edges", graph.edges.len());
        Ok(graph)
    }

    fn refresh_lens(&mut self, image: &Image) {
        for table in Table::ENTITIES {
            self.lens.insert(table, image.len(table));
        }
    }

    fn push(&mut self, edge: Edge) -> EdgeId {
        let id = self.edges.len();
        self.into.entry(edge.target).or_default().push(id);
        self.from.entry(edge.site.owner).or_default().push(id);
        self.edges.push(Some(edge));
        id
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id).and_then(|e| e.as_ref())
    }

    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges.iter().enumerate().filter_map(|(i, e)| e.as_ref().map(|e| (i, e)))
    }

    pub fn edges_into(&self, target: EntityId) -> &[EdgeId] {
        self.into.get(&target).map(|v| v.as_slice()).unwrap_or_default()
    }

    pub fn edges_from(&self, owner: EntityId) -> &[EdgeId] {
        self.from.get(&owner).map(|v| v.as_slice()).unwrap_or_default()
    }

    /// The edge stored at a site, if any.
    pub fn edge_at(&self, site: &Site) -> Option<EdgeId> {
        self.edges_from(site.owner).iter().copied().find(|id| self.edge(*id).is_some_and(|e| e.site == *site))
    }

    /// Edges whose target lies beyond the end of its table.
    pub fn unresolved(&self) -> Vec<EdgeId> {
        self.edges()
            .filter(|(_, e)| e.target.index as usize >= self.lens.get(&e.target.table).copied().unwrap_or(0))
            .map(|(id, _)| id)
            .collect()
    }

    /// Points an existing edge at a new target. The image must already hold the new value.
    pub(crate) fn retarget(&mut self, id: EdgeId, index: u32) {
        let Some(Some(edge)) = self.edges.get_mut(id) else {
            return;
        };
        let old = edge.target;
        edge.target.index = index;
        let new = edge.target;
        if let Some(v) = self.into.get_mut(&old) {
            v.retain(|e| *e != id);
        }
        self.into.entry(new).or_default().push(id);
    }

    /// Adds the outgoing edges of an entity that was just inserted or replaced.
    pub(crate) fn add_owner(&mut self, image: &Image, owner: EntityId) -> Result<(), DexError> {
        let mut out = vec![];
        owner_edges(image, owner, &mut out)?;
        for edge in out {
            self.push(edge);
        }
        self.refresh_lens(image);
        Ok(())
    }

    /// Drops the outgoing edges of an entity about to be replaced.
    pub(crate) fn remove_owner(&mut self, owner: EntityId) {
        let Some(ids) = self.from.remove(&owner) else {
            return;
        };
        for id in ids {
            if let Some(edge) = self.edges[id].take() {
                if let Some(v) = self.into.get_mut(&edge.target) {
                    v.retain(|e| *e != id);
                }
            }
        }
    }

    /// Writes `mapping[old]` into every site that points into `table`.
    pub fn remap(&self, image: &mut Image, table: Table, mapping: &[u32]) -> Result<(), DexError> {
        let mut r = Remapping::default();
        r.set(table, mapping.to_vec());
        self.remap_all(image, &r)
    }

    /// Rewrites every site pointing into a remapped table, skipping sites owned by
    /// dropped entities. The graph is stale afterwards and must be rebuilt.
    pub(crate) fn remap_all(&self, image: &mut Image, remapping: &Remapping) -> Result<(), DexError> {
        for (_, edge) in self.edges() {
            if edge.site.slot.is_nested() || remapping.is_dropped(edge.site.owner) {
                continue;
            }
            if let Some(new) = remapping.apply(edge.target.table, edge.target.index)? {
                write_site(image, &edge.site, new)?;
            }
        }

        // nested structures are rewritten with one walk each
        let mut failure = None;
        let mut map = |table: Table, idx: &mut u32| match remapping.apply(table, *idx) {
            Ok(Some(new)) => *idx = new,
            Ok(None) => {}
            Err(e) => {
                failure.get_or_insert(e);
            }
        };
        for (ci, class) in image.classes.iter_mut().enumerate() {
            if remapping.is_dropped(EntityId::new(Table::Class, ci as u32)) {
                continue;
            }
            if let Some(values) = &mut class.static_values {
                values.iter_mut().for_each(|v| v.refs_mut(&mut map));
            }
            if let Some(dir) = &mut class.annotations {
                dir.refs_mut(&mut map);
            }
        }
        for (ci, code) in image.codes.iter_mut().enumerate() {
            if remapping.is_dropped(EntityId::new(Table::Code, ci as u32)) {
                continue;
            }
            if let Some(debug) = &mut code.debug_info {
                debug.refs_mut(&mut map);
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::model::{AccessFlags, ClassData, DexString, EncodedMethod, MethodItem, ProtoItem, TypeItem};

    // strings: 0 "LA;", 1 "V", 2 "run"; types: 0 LA;, 1 V
    fn tiny() -> Image {
        let mut image = Image::new(35);
        for s in ["LA;", "V", "run"] {
            image.strings.push(DexString::from_string(s));
        }
        image.types = vec![TypeItem { descriptor: 0 }, TypeItem { descriptor: 1 }];
        image.protos = vec![ProtoItem { shorty: 1, return_type: 1, parameters: vec![] }];
        image.methods = vec![MethodItem { class: 0, proto: 0, name: 2 }];
        image.codes = vec![CodeItem::new(1, 1, 1, vec![0x1070, 0x0000, 0x0000, 0x000e])];
        let mut class = ClassDef::new(0, AccessFlags::PUBLIC, None);
        class.class_data = Some(ClassData {
            virtual_methods: vec![EncodedMethod { method: 0, access_flags: AccessFlags::PUBLIC, code: Some(0) }],
            ..Default::default()
        });
        image.classes = vec![class];
        image
    }

    #[test]
    fn finds_both_directions() {
        let image = tiny();
        let g = Graph::build(&image).unwrap();
        assert!(g.unresolved().is_empty());

        let method = EntityId::new(Table::Method, 0);
        let referrers: Vec<_> = g.edges_into(method).iter().map(|id| g.edge(*id).unwrap().site).collect();
        assert!(referrers.contains(&Site::new(EntityId::new(Table::Code, 0), Slot::Operand { at: 1, wide: false })));
        assert!(referrers.contains(&Site::new(EntityId::new(Table::Class, 0), Slot::VirtualMethod(0))));
        assert_eq!(referrers.len(), 2);

        assert_eq!(g.edges_from(method).len(), 3);
        assert!(g.edges_into(EntityId::new(Table::String, 2)).len() == 1);
        assert!(g.edges_into(EntityId::new(Table::Class, 0)).is_empty());
    }

    #[test]
    fn unresolved_targets_are_reported() {
        let mut image = tiny();
        image.methods[0].name = 10;
        let g = Graph::build(&image).unwrap();
        let bad = g.unresolved();
        assert_eq!(bad.len(), 1);
        assert_eq!(g.edge(bad[0]).unwrap().target, EntityId::new(Table::String, 10));
    }

    #[test]
    fn write_site_rejects_wide_values_in_narrow_operands() {
        let mut image = tiny();
        let site = Site::new(EntityId::new(Table::Code, 0), Slot::Operand { at: 1, wide: false });
        assert_eq!(write_site(&mut image, &site, 0x1_0000), Err(DexError::EncodingOverflow { value: 0x1_0000, width: 16 }));
        write_site(&mut image, &site, 7).unwrap();
        assert_eq!(read_site(&image, &site), Some(7));
        assert_eq!(image.codes[0].insns[1], 7);
        assert_eq!(read_site(&image, &Site::new(EntityId::new(Table::Code, 0), Slot::Operand { at: 2, wide: false })), None);
    }

    #[test]
    fn remap_rewrites_every_site() {
        let mut image = tiny();
        let g = Graph::build(&image).unwrap();
        // swap the two types
        g.remap(&mut image, Table::Type, &[1, 0]).unwrap();
        assert_eq!(image.methods[0].class, 1);
        assert_eq!(image.protos[0].return_type, 0);
        assert_eq!(image.classes[0].class_type, 1);
    }

    #[test]
    fn remap_refuses_dangling_targets() {
        let mut image = tiny();
        let g = Graph::build(&image).unwrap();
        let r = g.remap(&mut image, Table::String, &[0, 1, NO_INDEX]);
        assert_eq!(r, Err(DexError::UnresolvedReference { table: Table::String, index: 2 }));
    }

    #[test]
    fn permute_drops_and_moves() {
        let mut r = Remapping::default();
        r.set(Table::String, vec![1, NO_INDEX, 0]);
        assert_eq!(r.permute(Table::String, vec!["a", "b", "c"]), vec!["c", "a"]);
    }

    #[test]
    fn retarget_and_remove_owner_keep_indexes_in_sync() {
        let image = tiny();
        let mut g = Graph::build(&image).unwrap();
        let site = Site::new(EntityId::new(Table::Method, 0), Slot::Name);
        let id = g.edge_at(&site).unwrap();
        g.retarget(id, 0);
        assert!(g.edges_into(EntityId::new(Table::String, 2)).is_empty());
        assert!(g.edges_into(EntityId::new(Table::String, 0)).contains(&id));

        g.remove_owner(EntityId::new(Table::Method, 0));
        assert!(g.edges_from(EntityId::new(Table::Method, 0)).is_empty());
        assert!(!g.edges_into(EntityId::new(Table::String, 0)).contains(&id));
    }
}
