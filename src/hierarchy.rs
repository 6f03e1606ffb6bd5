//! Class hierarchy queries shared by the obfuscator and the shrinker.

use std::collections::{HashMap, HashSet};

use crate::dex::model::Image;

pub(crate) const OBJECT: &str = "Ljava/lang/Object;";

/// Methods of java.lang.Object that subclasses override by name.
pub(crate) const OBJECT_METHODS: [&str; 5] = ["equals", "hashCode", "toString", "finalize", "clone"];

/// Type-to-class lookups and member resolution over the classes of one image.
pub(crate) struct Hierarchy<'a> {
    image: &'a Image,
    class_of: HashMap<u32, usize>,
}

impl<'a> Hierarchy<'a> {
    pub(crate) fn new(image: &'a Image) -> Hierarchy<'a> {
        let class_of = image.classes.iter().enumerate().map(|(i, c)| (c.class_type, i)).collect();
        Hierarchy { image, class_of }
    }

    /// Position of the class defining `type_idx`, if the image defines it.
    pub(crate) fn class_index(&self, type_idx: u32) -> Option<usize> {
        self.class_of.get(&type_idx).copied()
    }

    /// The field definition a reference to `(name, type)` on `class_type` reaches:
    /// the class itself, then its interfaces, then its superclass.
    pub(crate) fn resolve_field(&self, class_type: u32, key: (u32, u32), visited: &mut HashSet<usize>) -> Option<u32> {
        let ci = *self.class_of.get(&class_type)?;
        if !visited.insert(ci) {
            return None;
        }
        let class = &self.image.classes[ci];
        if let Some(data) = &class.class_data {
            for f in data.fields() {
                let field = &self.image.fields[f.field as usize];
                if (field.name, field.type_) == key {
                    return Some(f.field);
                }
            }
        }
        for &iface in &class.interfaces {
            if let Some(found) = self.resolve_field(iface, key, visited) {
                return Some(found);
            }
        }
        class.superclass.and_then(|s| self.resolve_field(s, key, visited))
    }

    /// The method definition a reference to `(name, proto)` on `class_type`
    /// reaches along the superclass chain, then through interfaces. The flag is
    /// set for direct methods.
    pub(crate) fn resolve_method(&self, class_type: u32, key: (u32, u32)) -> Option<(u32, bool)> {
        let mut chain = vec![];
        let mut next = Some(class_type);
        while let Some(t) = next {
            let Some(&ci) = self.class_of.get(&t) else {
                break;
            };
            if chain.contains(&ci) {
                break;
            }
            chain.push(ci);
            if let Some(found) = self.find_method(ci, key) {
                return Some(found);
            }
            next = self.image.classes[ci].superclass;
        }
        let mut visited: HashSet<usize> = chain.iter().copied().collect();
        let mut pending: Vec<u32> =
            chain.iter().flat_map(|&ci| self.image.classes[ci].interfaces.iter().copied()).collect();
        while let Some(t) = pending.pop() {
            let Some(&ci) = self.class_of.get(&t) else {
                continue;
            };
            if !visited.insert(ci) {
                continue;
            }
            if let Some(found) = self.find_method(ci, key) {
                return Some(found);
            }
            pending.extend(self.image.classes[ci].interfaces.iter().copied());
        }
        None
    }

    pub(crate) fn find_method(&self, ci: usize, key: (u32, u32)) -> Option<(u32, bool)> {
        let data = self.image.classes[ci].class_data.as_ref()?;
        let is_key = |m: u32| {
            let method = &self.image.methods[m as usize];
            (method.name, method.proto) == key
        };
        if let Some(m) = data.direct_methods.iter().find(|m| is_key(m.method)) {
            return Some((m.method, true));
        }
        data.virtual_methods.iter().find(|m| is_key(m.method)).map(|m| (m.method, false))
    }

    /// Whether some supertype of the class, transitively, is neither defined in
    /// the image nor java.lang.Object.
    pub(crate) fn extends_library(&self, ci: usize, memo: &mut HashMap<usize, bool>) -> bool {
        if let Some(&known) = memo.get(&ci) {
            return known;
        }
        // a cycle is malformed anyway; treat it as closed
        memo.insert(ci, false);
        let class = &self.image.classes[ci];
        let result = class.superclass.iter().chain(&class.interfaces).any(|&t| match self.class_of.get(&t) {
            Some(&parent) => self.extends_library(parent, memo),
            None => self.image.type_descriptor(t) != OBJECT,
        });
        memo.insert(ci, result);
        result
    }
}
