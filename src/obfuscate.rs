//! Renames classes, fields and methods to meaningless names.
//!
//! Candidates are picked per category from a seeded shuffle, so a given image,
//! seed and config always produce the same output. Renames go through the
//! editor: member names are repointed at every reference that resolves to the
//! renamed definition, class descriptors are rewritten together with their
//! array types, and the old names are dropped once nothing refers to them.

use std::collections::{BTreeMap, HashMap, HashSet};

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::dex::error::DexError;
use crate::dex::model::{AccessFlags, Image};
use crate::editor::Editor;
use crate::graph::{EntityId, Site, Slot, Table};
use crate::hierarchy::{Hierarchy, OBJECT_METHODS};
use crate::names::{class_package, is_valid_simple_name, simple_name, Pattern};

/// Format characters that render as nothing but are legal in dex identifiers.
const INVISIBLE: [char; 23] = [
    '\u{061c}', '\u{17b4}', '\u{17b5}', '\u{180b}', '\u{180c}', '\u{180d}', '\u{180e}', '\u{fe00}', '\u{fe01}',
    '\u{fe02}', '\u{fe03}', '\u{fe04}', '\u{fe05}', '\u{fe06}', '\u{fe07}', '\u{fe08}', '\u{fe09}', '\u{fe0a}',
    '\u{fe0b}', '\u{fe0c}', '\u{fe0d}', '\u{fe0e}', '\u{fe0f}',
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameStyle {
    /// 16 to 24 zero-width characters
    #[default]
    Invisible,
    /// `a`, `b`, ..., `z`, `aa`, ...
    Compact,
}

/// Where renamed classes go.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Repackage {
    /// Every class stays in its own package.
    Keep,
    /// One freshly named package.
    #[default]
    Generated,
    /// A given package, in `com.x` or `com/x` form. Empty for the default package.
    Into(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObfuscationConfig {
    /// Percentage of the eligible entities of each category to rename.
    pub intensity: u32,
    pub seed: u64,
    /// Qualified names that keep their names.
    pub keep: Vec<String>,
    pub style: NameStyle,
    pub repackage: Repackage,
    /// Devices below API 25 reject packages starting with some format characters.
    pub min_sdk: u32,
    /// Open up access flags when classes change package.
    pub relax_access: bool,
    /// String literals to rewrite, `(from, to)`.
    pub string_replacements: Vec<(String, String)>,
}

impl Default for ObfuscationConfig {
    fn default() -> Self {
        ObfuscationConfig {
            intensity: 100,
            seed: 0,
            keep: vec![],
            style: NameStyle::default(),
            repackage: Repackage::default(),
            min_sdk: 21,
            relax_access: true,
            string_replacements: vec![],
        }
    }
}

/// Old names to new ones. Classes map descriptor to descriptor; members map the
/// old qualified member descriptor to the new simple name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObfuscationMapping {
    pub package: Option<String>,
    pub classes: BTreeMap<String, String>,
    pub fields: BTreeMap<String, String>,
    pub methods: BTreeMap<String, String>,
}

struct KeepList {
    patterns: Vec<Pattern>,
    names: Vec<String>,
    hits: Vec<bool>,
}

impl KeepList {
    fn parse(names: &[String]) -> Result<KeepList, DexError> {
        let patterns = names.iter().map(|n| Pattern::parse(n)).collect::<Result<Vec<_>, _>>()?;
        Ok(KeepList { hits: vec![false; patterns.len()], patterns, names: names.to_vec() })
    }

    fn hit(&mut self, test: impl Fn(&Pattern) -> bool) -> bool {
        let mut any = false;
        for (pattern, hit) in self.patterns.iter().zip(self.hits.iter_mut()) {
            if test(pattern) {
                *hit = true;
                any = true;
            }
        }
        any
    }

    fn class(&mut self, descriptor: &str) -> bool {
        self.hit(|p| p.matches_class(descriptor))
    }

    fn field(&mut self, class: &str, name: &str, type_: &str) -> bool {
        self.hit(|p| p.matches_field(class, name, type_))
    }

    fn method(&mut self, class: &str, name: &str, proto: &str) -> bool {
        self.hit(|p| p.matches_method(class, name, proto))
    }

    fn warn_unmatched(&self) {
        for (name, hit) in self.names.iter().zip(&self.hits) {
            if !hit {
                warn!("keep pattern {:?} matches nothing in the image", name);
            }
        }
    }
}

/// Produces names not yet used anywhere in the image.
struct NameGen {
    style: NameStyle,
    used: HashSet<String>,
    counter: u64,
}

impl NameGen {
    fn new(style: NameStyle, image: &Image) -> NameGen {
        let used = image.strings.iter().map(|s| s.to_string_lossy()).collect();
        NameGen { style, used, counter: 0 }
    }

    fn next(&mut self, rng: &mut StdRng) -> String {
        loop {
            let name = match self.style {
                NameStyle::Invisible => {
                    let len = rng.random_range(16..=24);
                    (0..len).map(|_| INVISIBLE[rng.random_range(0..INVISIBLE.len())]).collect()
                }
                NameStyle::Compact => {
                    self.counter += 1;
                    compact_name(self.counter)
                }
            };
            if self.used.insert(name.clone()) {
                return name;
            }
        }
    }

    /// A fresh class descriptor in `package`.
    fn class(&mut self, rng: &mut StdRng, package: &str) -> String {
        loop {
            let name = self.next(rng);
            let descriptor =
                if package.is_empty() { format!("L{};", name) } else { format!("L{}/{};", package, name) };
            if self.used.insert(descriptor.clone()) {
                return descriptor;
            }
        }
    }
}

/// Bijective base 26: 1 is `a`, 26 is `z`, 27 is `aa`.
fn compact_name(mut n: u64) -> String {
    let mut name = String::new();
    while n > 0 {
        n -= 1;
        name.insert(0, char::from(b'a' + (n % 26) as u8));
        n /= 26;
    }
    name
}

/// Package in `com/x` form, checked segment by segment.
fn internal_package(package: &str) -> Result<String, DexError> {
    let package = package.replace('.', "/");
    if !package.is_empty() && !package.split('/').all(is_valid_simple_name) {
        return Err(DexError::InvalidConfig(format!("invalid package {:?}", package)));
    }
    Ok(package)
}

/// What could be renamed, in deterministic order.
#[derive(Debug, Default)]
struct Candidates {
    classes: Vec<usize>,
    fields: Vec<u32>,
    direct_methods: Vec<u32>,
    /// `(name, proto)` keys of renamable virtual groups
    virtual_groups: Vec<(u32, u32)>,
}

fn collect(image: &Image, hierarchy: &Hierarchy<'_>, keep: &mut KeepList) -> Candidates {
    let mut candidates = Candidates::default();
    let mut memo = HashMap::new();
    // keys some reference may bind to a library method with
    let mut library_keys: HashSet<(u32, u32)> = HashSet::new();
    for m in &image.methods {
        let key = (m.name, m.proto);
        let library_bound = match hierarchy.class_index(m.class) {
            None => true,
            Some(ci) => hierarchy.resolve_method(m.class, key).is_none() && hierarchy.extends_library(ci, &mut memo),
        };
        if library_bound {
            library_keys.insert(key);
        }
    }

    // key -> every in-image definition is renamable
    let mut groups: BTreeMap<(String, String), ((u32, u32), bool)> = BTreeMap::new();
    let mut fields = vec![];
    let mut directs = vec![];
    let mut classes = vec![];

    for (ci, class) in image.classes.iter().enumerate() {
        let descriptor = image.type_descriptor(class.class_type);
        let class_kept = keep.class(&descriptor);
        let data = class.class_data.as_ref();
        let has_native = data.is_some_and(|d| d.methods().any(|m| m.access_flags.contains(AccessFlags::NATIVE)));
        if !class_kept && !has_native {
            classes.push((descriptor.clone(), ci));
        }
        let Some(data) = data else {
            continue;
        };

        for f in data.fields() {
            let field = &image.fields[f.field as usize];
            let kept = keep.field(&descriptor, &image.string(field.name), &image.type_descriptor(field.type_));
            if !kept && !class_kept {
                fields.push((image.field_descriptor(f.field), f.field));
            }
        }

        for m in &data.direct_methods {
            let method = &image.methods[m.method as usize];
            let name = image.string(method.name);
            let kept = keep.method(&descriptor, &name, &image.proto_descriptor(method.proto));
            let special = name == "<init>" || name == "<clinit>" || m.access_flags.contains(AccessFlags::NATIVE);
            if !kept && !class_kept && !special {
                directs.push((image.method_descriptor(m.method), m.method));
            }
        }

        let extends_library = hierarchy.extends_library(ci, &mut memo);
        for m in &data.virtual_methods {
            let method = &image.methods[m.method as usize];
            let name = image.string(method.name);
            let proto = image.proto_descriptor(method.proto);
            let key = (method.name, method.proto);
            let kept = keep.method(&descriptor, &name, &proto) || class_kept;
            let eligible = !kept
                && !extends_library
                && !library_keys.contains(&key)
                && !OBJECT_METHODS.contains(&name.as_str())
                && !m.access_flags.contains(AccessFlags::NATIVE);
            let entry = groups.entry((name, proto)).or_insert((key, true));
            entry.1 &= eligible;
        }
    }

    classes.sort();
    fields.sort();
    directs.sort();
    candidates.classes = classes.into_iter().map(|(_, ci)| ci).collect();
    candidates.fields = fields.into_iter().map(|(_, f)| f).collect();
    candidates.direct_methods = directs.into_iter().map(|(_, m)| m).collect();
    candidates.virtual_groups = groups.into_values().filter(|(_, ok)| *ok).map(|(key, _)| key).collect();
    candidates
}

/// Shuffles and keeps `round(len * intensity / 100)` items.
fn pick<T>(mut items: Vec<T>, intensity: u32, rng: &mut StdRng) -> Vec<T> {
    let count = (items.len() * intensity as usize + 50) / 100;
    items.shuffle(rng);
    items.truncate(count);
    items
}

/// A member rename: the new name and every field or method entry to repoint.
struct MemberRename {
    table: Table,
    entries: Vec<u32>,
    name: String,
}

pub fn obfuscate(image: &mut Image, config: &ObfuscationConfig) -> Result<ObfuscationMapping, DexError> {
    if config.intensity > 100 {
        return Err(DexError::InvalidConfig(format!("intensity {} is above 100", config.intensity)));
    }
    let target = match &config.repackage {
        Repackage::Into(package) => Some(internal_package(package)?),
        _ => None,
    };
    let mut keep = KeepList::parse(&config.keep)?;

    let mut editor = Editor::new(image)?;
    for (from, to) in &config.string_replacements {
        editor.replace_string_literal(from, to)?;
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut mapping = ObfuscationMapping::default();
    let mut renames: Vec<MemberRename> = vec![];
    let mut class_renames: Vec<(u32, String)> = vec![];
    let mut old_strings: Vec<u32> = vec![];

    {
        let image = editor.image();
        let hierarchy = Hierarchy::new(image);
        let candidates = collect(image, &hierarchy, &mut keep);
        keep.warn_unmatched();

        let classes = pick(candidates.classes, config.intensity, &mut rng);
        let fields = pick(candidates.fields, config.intensity, &mut rng);
        let directs = pick(candidates.direct_methods, config.intensity, &mut rng);
        let groups = pick(candidates.virtual_groups, config.intensity, &mut rng);

        // every reference, grouped by the definition it resolves to
        let mut field_refs: HashMap<u32, Vec<u32>> = HashMap::new();
        for (fi, field) in image.fields.iter().enumerate() {
            let key = (field.name, field.type_);
            if let Some(def) = hierarchy.resolve_field(field.class, key, &mut HashSet::new()) {
                field_refs.entry(def).or_default().push(fi as u32);
            }
        }
        let mut direct_refs: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut key_refs: HashMap<(u32, u32), Vec<u32>> = HashMap::new();
        for (mi, method) in image.methods.iter().enumerate() {
            let key = (method.name, method.proto);
            match hierarchy.resolve_method(method.class, key) {
                Some((def, true)) => direct_refs.entry(def).or_default().push(mi as u32),
                _ => key_refs.entry(key).or_default().push(mi as u32),
            }
        }

        let mut names = NameGen::new(config.style, image);

        for key in groups {
            let entries = key_refs.remove(&key).unwrap_or_default();
            let name = names.next(&mut rng);
            for &m in &entries {
                if hierarchy.resolve_method(image.methods[m as usize].class, key) == Some((m, false)) {
                    mapping.methods.insert(image.method_descriptor(m), name.clone());
                }
            }
            old_strings.push(key.0);
            renames.push(MemberRename { table: Table::Method, entries, name });
        }
        for m in directs {
            let entries = direct_refs.remove(&m).unwrap_or_default();
            let name = names.next(&mut rng);
            mapping.methods.insert(image.method_descriptor(m), name.clone());
            old_strings.push(image.methods[m as usize].name);
            renames.push(MemberRename { table: Table::Method, entries, name });
        }
        for f in fields {
            let entries = field_refs.remove(&f).unwrap_or_default();
            let name = names.next(&mut rng);
            mapping.fields.insert(image.field_descriptor(f), name.clone());
            old_strings.push(image.fields[f as usize].name);
            renames.push(MemberRename { table: Table::Field, entries, name });
        }

        let package = match (&config.repackage, classes.is_empty()) {
            (_, true) | (Repackage::Keep, _) => None,
            (Repackage::Into(_), _) => target,
            (Repackage::Generated, _) => {
                let name = names.next(&mut rng);
                Some(if config.min_sdk < 25 {
                    format!("{}{}", char::from(b'a' + rng.random_range(0..26u8)), name)
                } else {
                    name
                })
            }
        };
        for ci in classes {
            let class_type = image.classes[ci].class_type;
            let old = image.type_descriptor(class_type);
            let own_package = class_package(&old).unwrap_or_default();
            let new = names.class(&mut rng, package.as_deref().unwrap_or(own_package));
            // array types of the class follow it
            for (ti, t) in image.types.iter().enumerate() {
                let descriptor = image.string(t.descriptor);
                let element = descriptor.trim_start_matches('[');
                if element == old {
                    let dims = descriptor.len() - element.len();
                    class_renames.push((ti as u32, format!("{}{}", &descriptor[..dims], new)));
                }
            }
            debug!("class {} becomes {:?}", old, simple_name(&new).unwrap_or_default());
            mapping.classes.insert(old, new);
        }
        mapping.package = package;
    }

    for rename in &renames {
        let name = editor.intern_string(&rename.name)?;
        for &entry in &rename.entries {
            editor.patch(Site::new(EntityId::new(rename.table, entry), Slot::Name), name)?;
        }
    }
    for (type_idx, descriptor) in &class_renames {
        old_strings.extend(editor.set_descriptor(*type_idx, descriptor)?);
    }

    let moved = mapping.classes.iter().any(|(old, new)| class_package(old) != class_package(new));
    if moved && config.relax_access {
        relax_access(editor.image_mut());
    }

    let orphans = editor.orphaned_strings(old_strings);
    editor.delete_many(&orphans)?;
    info!(
        "obfuscated {} classes, {} fields, {} methods",
        mapping.classes.len(),
        mapping.fields.len(),
        mapping.methods.len()
    );
    Ok(mapping)
}

/// Makes classes public, and non-private members public instead of protected,
/// so that access keeps working across the new package boundaries.
fn relax_access(image: &mut Image) {
    let open = |flags: &mut AccessFlags| {
        if !flags.contains(AccessFlags::PRIVATE) {
            flags.remove(AccessFlags::PROTECTED);
            flags.insert(AccessFlags::PUBLIC);
        }
    };
    for class in &mut image.classes {
        class.access_flags.remove(AccessFlags::PRIVATE | AccessFlags::PROTECTED);
        class.access_flags.insert(AccessFlags::PUBLIC);
        if let Some(data) = &mut class.class_data {
            for f in data.fields_mut() {
                open(&mut f.access_flags);
            }
            for m in data.methods_mut() {
                open(&mut m.access_flags);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::model::{ClassData, ClassDef, DexString, EncodedField, EncodedMethod, FieldItem, MethodItem, ProtoItem, TypeItem};

    // package com/x: Base with virtual run()V and field count:I, Impl extends
    // Base overriding run()V, plus a private helper()V in Impl
    fn image() -> Image {
        let mut image = Image::new(35);
        for s in ["I", "Lcom/x/Base;", "Lcom/x/Impl;", "Ljava/lang/Object;", "V", "count", "helper", "run", "[Lcom/x/Impl;"] {
            image.strings.push(DexString::from_string(s));
        }
        // types: 0 I, 1 Base, 2 Impl, 3 Object, 4 V, 5 [Impl
        image.types = [0, 1, 2, 3, 4, 8].into_iter().map(|d| TypeItem { descriptor: d }).collect();
        image.protos = vec![ProtoItem { shorty: 4, return_type: 4, parameters: vec![] }];
        image.fields = vec![FieldItem { class: 1, type_: 0, name: 5 }, FieldItem { class: 2, type_: 0, name: 5 }];
        image.methods = vec![
            MethodItem { class: 1, proto: 0, name: 7 },
            MethodItem { class: 2, proto: 0, name: 6 },
            MethodItem { class: 2, proto: 0, name: 7 },
        ];
        let mut base = ClassDef::new(1, AccessFlags::PUBLIC | AccessFlags::ABSTRACT, Some(3));
        base.class_data = Some(ClassData {
            instance_fields: vec![EncodedField { field: 0, access_flags: AccessFlags::PROTECTED }],
            virtual_methods: vec![EncodedMethod {
                method: 0,
                access_flags: AccessFlags::PUBLIC | AccessFlags::ABSTRACT,
                code: None,
            }],
            ..Default::default()
        });
        let mut imp = ClassDef::new(2, AccessFlags::empty(), Some(1));
        imp.class_data = Some(ClassData {
            direct_methods: vec![EncodedMethod { method: 1, access_flags: AccessFlags::PRIVATE, code: None }],
            virtual_methods: vec![EncodedMethod { method: 2, access_flags: AccessFlags::PUBLIC, code: None }],
            ..Default::default()
        });
        image.classes = vec![base, imp];
        image
    }

    fn compact(seed: u64) -> ObfuscationConfig {
        ObfuscationConfig { seed, style: NameStyle::Compact, ..Default::default() }
    }

    #[test]
    fn test_compact_names() {
        assert_eq!(compact_name(1), "a");
        assert_eq!(compact_name(26), "z");
        assert_eq!(compact_name(27), "aa");
        assert_eq!(compact_name(703), "aaa");
    }

    #[test]
    fn test_intensity_zero_changes_nothing() {
        let mut image = image();
        let before = image.clone();
        let config = ObfuscationConfig { intensity: 0, ..Default::default() };
        let mapping = obfuscate(&mut image, &config).unwrap();
        assert_eq!(mapping, ObfuscationMapping::default());
        assert_eq!(image, before);
    }

    #[test]
    fn test_intensity_above_100_is_rejected() {
        let mut image = image();
        let config = ObfuscationConfig { intensity: 101, ..Default::default() };
        assert!(matches!(obfuscate(&mut image, &config), Err(DexError::InvalidConfig(_))));
    }

    #[test]
    fn test_full_rename() {
        let mut image = image();
        let mapping = obfuscate(&mut image, &compact(7)).unwrap();
        assert_eq!(mapping.classes.len(), 2);
        assert_eq!(mapping.fields.len(), 1);
        // run()V on both classes plus helper()V
        assert_eq!(mapping.methods.len(), 3);
        assert_eq!(mapping.methods["Lcom/x/Base;->run()V"], mapping.methods["Lcom/x/Impl;->run()V"]);

        for old in ["Lcom/x/Base;", "Lcom/x/Impl;", "[Lcom/x/Impl;", "run", "helper", "count"] {
            assert!(image.find_string(old).is_none(), "{} survived", old);
        }
        let impl_desc = &mapping.classes["Lcom/x/Impl;"];
        assert!(image.find_type(&format!("[{}", impl_desc)).is_some());
        assert_eq!(image.find_string("Ljava/lang/Object;"), Some(image.types[3].descriptor));

        // the reference on Impl resolves to Base's field and follows it
        assert_eq!(image.fields[0].name, image.fields[1].name);
        assert!(image.classes[1].access_flags.contains(AccessFlags::PUBLIC));
        let data = image.classes[0].class_data.as_ref().unwrap();
        assert_eq!(data.instance_fields[0].access_flags, AccessFlags::PUBLIC);
        let package = mapping.package.unwrap();
        assert!(package.starts_with(|c: char| c.is_ascii_lowercase()));
    }

    #[test]
    fn test_same_seed_same_names() {
        let (mut a, mut b) = (image(), image());
        let config = ObfuscationConfig { seed: 42, ..Default::default() };
        assert_eq!(obfuscate(&mut a, &config).unwrap(), obfuscate(&mut b, &config).unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn test_keep_list() {
        let mut image = image();
        let config = ObfuscationConfig {
            keep: vec!["com.x.Base".into(), "Lcom/x/Impl;->helper".into()],
            repackage: Repackage::Keep,
            ..compact(1)
        };
        let mapping = obfuscate(&mut image, &config).unwrap();
        assert!(!mapping.classes.contains_key("Lcom/x/Base;"));
        assert!(mapping.classes["Lcom/x/Impl;"].starts_with("Lcom/x/"));
        // run()V is defined by a kept class, so the whole group keeps its name
        assert!(mapping.methods.is_empty());
        assert!(mapping.fields.is_empty());
        assert!(image.find_string("run").is_some());
        assert!(image.find_string("helper").is_some());
    }

    #[test]
    fn test_library_overrides_keep_their_names() {
        let mut image = image();
        // Base now extends a class the image does not define
        image.strings.push(DexString::from_string("Landroid/app/Activity;"));
        image.types.push(TypeItem { descriptor: 9 });
        image.classes[0].superclass = Some(6);
        let config = ObfuscationConfig { repackage: Repackage::Into("p".into()), ..compact(3) };
        let mapping = obfuscate(&mut image, &config).unwrap();
        assert!(!mapping.methods.contains_key("Lcom/x/Impl;->run()V"));
        assert!(mapping.methods.contains_key("Lcom/x/Impl;->helper()V"));
        assert_eq!(mapping.package.as_deref(), Some("p"));
        assert!(mapping.classes.values().all(|c| c.starts_with("Lp/")));
    }

    #[test]
    fn test_invisible_names_are_valid_and_unique() {
        let image = image();
        let mut names = NameGen::new(NameStyle::Invisible, &image);
        let mut rng = StdRng::seed_from_u64(5);
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let name = names.next(&mut rng);
            assert!((16..=24).contains(&name.chars().count()));
            assert!(is_valid_simple_name(&name));
            assert!(seen.insert(name));
        }
    }

    #[test]
    fn test_invisible_alphabet_covers_all_variation_selectors() {
        let selectors: Vec<char> = ('\u{fe00}'..='\u{fe0f}').collect();
        assert!(selectors.iter().all(|c| INVISIBLE.contains(c)));
        let distinct: HashSet<char> = INVISIBLE.iter().copied().collect();
        assert_eq!(distinct.len(), 23);
        assert!(INVISIBLE.iter().all(|c| is_valid_simple_name(&c.to_string())));
    }

    #[test]
    fn test_calls_into_library_superclasses_keep_their_names() {
        let mut image = image();
        // Worker extends Thread, defines nothing and is called as Worker->run()V
        for s in ["Lcom/x/Worker;", "Ljava/lang/Thread;"] {
            image.strings.push(DexString::from_string(s));
        }
        image.types.push(TypeItem { descriptor: 9 });
        image.types.push(TypeItem { descriptor: 10 });
        image.methods.push(MethodItem { class: 6, proto: 0, name: 7 });
        image.classes.push(ClassDef::new(6, AccessFlags::PUBLIC, Some(7)));

        let mapping = obfuscate(&mut image, &compact(9)).unwrap();
        assert!(mapping.classes.contains_key("Lcom/x/Worker;"));
        assert!(!mapping.methods.contains_key("Lcom/x/Impl;->run()V"));
        assert!(mapping.methods.contains_key("Lcom/x/Impl;->helper()V"));
        assert_eq!(image.string(image.methods[3].name), "run");
        assert_eq!(image.string(image.methods[0].name), "run");
    }
}
