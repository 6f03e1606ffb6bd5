//! Removes everything not reachable from a set of entry points.
//!
//! Reachability is computed per member. A class is live once any type, field or
//! method reference reaches it, but its fields and methods stay only if they are
//! referenced themselves, with two exceptions: `<clinit>` runs whenever the class
//! is live, and a virtual method stays if a live call may dispatch to it. Optional
//! stripping of debug info and foreign annotations runs first, so stripped
//! metadata does not keep anything alive.

use std::collections::{HashMap, HashSet};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::dex::error::DexError;
use crate::dex::model::{AccessFlags, ClassDef, Image};
use crate::editor::{Editor, EntitySet};
use crate::graph::{EntityId, Graph, Slot, Table};
use crate::hierarchy::{Hierarchy, OBJECT_METHODS};
use crate::names::Pattern;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShrinkConfig {
    /// Qualified names of the classes or members execution starts from.
    pub entry_points: Vec<String>,
    /// Additional names to keep, e.g. classes loaded by reflection.
    pub keep: Vec<String>,
    pub strip_debug_info: bool,
    pub strip_annotations: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShrinkReport {
    /// Descriptors of the removed classes, sorted.
    pub removed_classes: Vec<String>,
    pub removed_strings: usize,
    pub removed_types: usize,
    pub removed_protos: usize,
    pub removed_fields: usize,
    pub removed_methods: usize,
    pub removed_codes: usize,
}

fn members(class: &ClassDef) -> impl Iterator<Item = EntityId> + '_ {
    class.class_data.iter().flat_map(|data| {
        data.fields()
            .map(|f| EntityId::new(Table::Field, f.field))
            .chain(data.methods().map(|m| EntityId::new(Table::Method, m.method)))
    })
}

/// Seeds named by `name`. Class and package patterns give each matching class
/// with all of its members; member patterns give the matching members and the
/// classes declaring them.
fn resolve(image: &Image, name: &str) -> Result<Vec<EntityId>, DexError> {
    let pattern = Pattern::parse(name)?;
    let mut found = vec![];
    for (ci, class) in image.classes.iter().enumerate() {
        let descriptor = image.type_descriptor(class.class_type);
        let class_id = EntityId::new(Table::Class, ci as u32);
        match &pattern {
            Pattern::Member { .. } => {
                let Some(data) = &class.class_data else {
                    continue;
                };
                let fields = data.fields().filter(|f| {
                    let field = &image.fields[f.field as usize];
                    pattern.matches_field(&descriptor, &image.string(field.name), &image.type_descriptor(field.type_))
                });
                let methods = data.methods().filter(|m| {
                    let method = &image.methods[m.method as usize];
                    pattern.matches_method(&descriptor, &image.string(method.name), &image.proto_descriptor(method.proto))
                });
                let hits: Vec<EntityId> = fields
                    .map(|f| EntityId::new(Table::Field, f.field))
                    .chain(methods.map(|m| EntityId::new(Table::Method, m.method)))
                    .collect();
                if !hits.is_empty() {
                    found.push(class_id);
                    found.extend(hits);
                }
            }
            _ if pattern.matches_class(&descriptor) => {
                found.push(class_id);
                found.extend(members(class));
            }
            _ => {}
        }
    }
    if found.is_empty() {
        return Err(DexError::EntryPointMissing(name.to_string()));
    }
    Ok(found)
}

fn strip_debug_info(image: &mut Image) {
    for code in &mut image.codes {
        code.debug_info = None;
    }
    for class in &mut image.classes {
        class.source_file = None;
    }
}

/// Keeps only annotations whose type is an annotation class defined in the image.
fn strip_annotations(image: &mut Image) {
    let annotation_types: HashSet<u32> = image
        .classes
        .iter()
        .filter(|c| c.access_flags.contains(AccessFlags::ANNOTATION))
        .map(|c| c.class_type)
        .collect();
    for class in &mut image.classes {
        let is_annotation = class.access_flags.contains(AccessFlags::ANNOTATION);
        let Some(dir) = &mut class.annotations else {
            continue;
        };
        // @Retention and friends on an annotation class describe the class itself
        let own = if is_annotation { dir.class_annotations.take() } else { None };
        dir.retain(|item| annotation_types.contains(&item.annotation.type_idx));
        if own.is_some() {
            dir.class_annotations = own;
        }
        if dir.is_empty() {
            class.annotations = None;
        }
    }
}

pub fn shrink(image: &mut Image, config: &ShrinkConfig) -> Result<ShrinkReport, DexError> {
    if config.entry_points.is_empty() {
        return Err(DexError::EntryPointMissing("no entry points given".to_string()));
    }
    let mut seeds = vec![];
    for name in config.entry_points.iter().chain(&config.keep) {
        seeds.extend(resolve(image, name)?);
    }

    if config.strip_debug_info {
        strip_debug_info(image);
    }
    if config.strip_annotations {
        strip_annotations(image);
    }

    let marked = {
        let graph = Graph::build(image)?;
        Marker::new(image, &graph).run(seeds)
    };
    prune_members(image, &marked);

    let mut editor = Editor::new(image)?;
    let image = editor.image();
    let mut sweep = EntitySet::new();
    for table in Table::ENTITIES {
        for index in 0..image.len(table) as u32 {
            let id = EntityId::new(table, index);
            if !marked.contains(&id) {
                sweep.insert(id);
            }
        }
    }
    let mut removed_classes: Vec<String> = sweep
        .iter()
        .filter(|id| id.table == Table::Class)
        .map(|id| image.type_descriptor(image.classes[id.index as usize].class_type))
        .collect();
    removed_classes.sort();

    let report = ShrinkReport {
        removed_classes,
        removed_strings: sweep.count(Table::String),
        removed_types: sweep.count(Table::Type),
        removed_protos: sweep.count(Table::Proto),
        removed_fields: sweep.count(Table::Field),
        removed_methods: sweep.count(Table::Method),
        removed_codes: sweep.count(Table::Code),
    };
    editor.delete_many(&sweep)?;
    info!(
        "shrink removed {} classes, {} methods, {} fields, {} strings",
        report.removed_classes.len(),
        report.removed_methods,
        report.removed_fields,
        report.removed_strings
    );
    Ok(report)
}

/// Worklist reachability over the reference graph.
struct Marker<'a> {
    image: &'a Image,
    graph: &'a Graph,
    hierarchy: Hierarchy<'a>,
    /// code body of each method the image defines with one
    code_of: HashMap<u32, u32>,
    /// class and position of each static field with an initial value
    value_of: HashMap<u32, (usize, usize)>,
    marked: HashSet<EntityId>,
    worklist: Vec<EntityId>,
}

impl<'a> Marker<'a> {
    fn new(image: &'a Image, graph: &'a Graph) -> Marker<'a> {
        let code_of = image
            .classes
            .iter()
            .filter_map(|c| c.class_data.as_ref())
            .flat_map(|data| data.methods())
            .filter_map(|m| m.code.map(|code| (m.method, code)))
            .collect();
        let mut value_of = HashMap::new();
        for (ci, class) in image.classes.iter().enumerate() {
            let (Some(data), Some(values)) = (&class.class_data, &class.static_values) else {
                continue;
            };
            for (position, f) in data.static_fields.iter().take(values.len()).enumerate() {
                value_of.insert(f.field, (ci, position));
            }
        }
        Marker {
            image,
            graph,
            hierarchy: Hierarchy::new(image),
            code_of,
            value_of,
            marked: HashSet::new(),
            worklist: vec![],
        }
    }

    fn run(mut self, seeds: Vec<EntityId>) -> HashSet<EntityId> {
        self.worklist = seeds;
        loop {
            while let Some(id) = self.worklist.pop() {
                if self.marked.insert(id) {
                    self.visit(id);
                }
            }
            let overrides = self.dispatch_targets();
            if overrides.is_empty() {
                break;
            }
            self.worklist = overrides;
        }
        debug!("marked {} reachable entities", self.marked.len());
        self.marked
    }

    fn push(&mut self, id: EntityId) {
        if !self.marked.contains(&id) {
            self.worklist.push(id);
        }
    }

    fn visit(&mut self, id: EntityId) {
        let image = self.image;
        match id.table {
            Table::Class => self.visit_class(id.index as usize),
            Table::Type => {
                if let Some(ci) = self.hierarchy.class_index(id.index) {
                    self.push(EntityId::new(Table::Class, ci as u32));
                }
                let descriptor = image.type_descriptor(id.index);
                if let Some(t) = descriptor.strip_prefix('[').and_then(|element| image.find_type(element)) {
                    self.push(EntityId::new(Table::Type, t));
                }
            }
            Table::Method => {
                if let Some(&code) = self.code_of.get(&id.index) {
                    self.push(EntityId::new(Table::Code, code));
                }
                let method = &image.methods[id.index as usize];
                if let Some((def, _)) = self.hierarchy.resolve_method(method.class, (method.name, method.proto)) {
                    self.push(EntityId::new(Table::Method, def));
                }
                self.visit_member_annotations(id, method.class);
            }
            Table::Field => {
                let field = &image.fields[id.index as usize];
                let key = (field.name, field.type_);
                if let Some(def) = self.hierarchy.resolve_field(field.class, key, &mut HashSet::new()) {
                    self.push(EntityId::new(Table::Field, def));
                }
                if let Some(&(ci, position)) = self.value_of.get(&id.index) {
                    let mut found = vec![];
                    if let Some(value) = image.classes[ci].static_values.as_ref().and_then(|v| v.get(position)) {
                        value.refs(&mut |table, index| found.push(EntityId::new(table, index)));
                    }
                    self.worklist.extend(found);
                }
                self.visit_member_annotations(id, field.class);
            }
            _ => {}
        }
        if id.table != Table::Class {
            let graph = self.graph;
            for edge in graph.edges_from(id).iter().filter_map(|e| graph.edge(*e)) {
                self.push(edge.target);
            }
        }
    }

    /// Follows what the annotations on a member definition refer to.
    fn visit_member_annotations(&mut self, member: EntityId, class_type: u32) {
        let Some(ci) = self.hierarchy.class_index(class_type) else {
            return;
        };
        let Some(dir) = &self.image.classes[ci].annotations else {
            return;
        };
        let mut found = vec![];
        dir.member_refs(member.table, member.index, &mut |table, index| found.push(EntityId::new(table, index)));
        self.worklist.extend(found);
    }

    /// Follows a class's own references, but not its members or what only they use.
    fn visit_class(&mut self, ci: usize) {
        let image = self.image;
        let class = &image.classes[ci];
        let class_refs = class.annotations.as_ref().map_or(0, |dir| dir.class_ref_count());
        let id = EntityId::new(Table::Class, ci as u32);
        let graph = self.graph;
        for edge in graph.edges_from(id).iter().filter_map(|e| graph.edge(*e)) {
            let follow = match edge.site.slot {
                Slot::StaticField(_)
                | Slot::InstanceField(_)
                | Slot::DirectMethod(_)
                | Slot::VirtualMethod(_)
                | Slot::DirectCode(_)
                | Slot::VirtualCode(_)
                | Slot::StaticValue(_) => false,
                Slot::Annotation(n) => n < class_refs,
                _ => true,
            };
            if follow {
                self.push(edge.target);
            }
        }

        // annotation elements and enum constants are looked up by name at run time
        let reflective = class.access_flags.intersects(AccessFlags::ANNOTATION | AccessFlags::ENUM);
        if reflective {
            for member in members(class) {
                self.push(member);
            }
        } else if let Some(data) = &class.class_data {
            for m in &data.direct_methods {
                if image.string(image.methods[m.method as usize].name) == "<clinit>" {
                    self.push(EntityId::new(Table::Method, m.method));
                }
            }
        }
    }

    /// Unmarked virtual methods of live classes that a live call may still reach:
    /// those sharing name and prototype with a marked method, those overriding
    /// java.lang.Object, and any in a class with a library supertype.
    fn dispatch_targets(&self) -> Vec<EntityId> {
        let image = self.image;
        let called: HashSet<(u32, u32)> = self
            .marked
            .iter()
            .filter(|id| id.table == Table::Method)
            .map(|id| {
                let m = &image.methods[id.index as usize];
                (m.name, m.proto)
            })
            .collect();
        let mut memo = HashMap::new();
        let mut found = vec![];
        for (ci, class) in image.classes.iter().enumerate() {
            if !self.marked.contains(&EntityId::new(Table::Class, ci as u32)) {
                continue;
            }
            let Some(data) = &class.class_data else {
                continue;
            };
            let extends_library = self.hierarchy.extends_library(ci, &mut memo);
            for m in &data.virtual_methods {
                let id = EntityId::new(Table::Method, m.method);
                if self.marked.contains(&id) {
                    continue;
                }
                let method = &image.methods[m.method as usize];
                let reached = extends_library
                    || called.contains(&(method.name, method.proto))
                    || OBJECT_METHODS.contains(&image.string(method.name).as_str());
                if reached {
                    found.push(id);
                }
            }
        }
        found
    }
}

/// Drops the unmarked members of live classes, along with their initial values
/// and annotation entries.
fn prune_members(image: &mut Image, marked: &HashSet<EntityId>) {
    let live_field = |f: u32| marked.contains(&EntityId::new(Table::Field, f));
    let live_method = |m: u32| marked.contains(&EntityId::new(Table::Method, m));
    let mut pruned = 0;
    for (ci, class) in image.classes.iter_mut().enumerate() {
        if !marked.contains(&EntityId::new(Table::Class, ci as u32)) {
            continue;
        }
        if let Some(data) = &mut class.class_data {
            // initial values line up with the leading static fields
            if let Some(values) = &mut class.static_values {
                let mut position = 0;
                values.retain(|_| {
                    let keep = data.static_fields.get(position).is_some_and(|f| live_field(f.field));
                    position += 1;
                    keep
                });
                if values.is_empty() {
                    class.static_values = None;
                }
            }
            let before = data.fields().count() + data.methods().count();
            data.static_fields.retain(|f| live_field(f.field));
            data.instance_fields.retain(|f| live_field(f.field));
            data.direct_methods.retain(|m| live_method(m.method));
            data.virtual_methods.retain(|m| live_method(m.method));
            pruned += before - data.fields().count() - data.methods().count();
        }
        if let Some(dir) = &mut class.annotations {
            dir.retain_members(live_field, live_method);
            if dir.is_empty() {
                class.annotations = None;
            }
        }
    }
    debug!("pruned {} members of live classes", pruned);
}
