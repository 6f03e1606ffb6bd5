//! Qualified names for keep lists and entry points, and the validity rules for
//! dex identifiers.
//!
//! Accepted forms:
//!
//! ```text
//! Lcom/x/Foo;              com.x.Foo             a class
//! com.x.*                  com.x.**              a package, a package tree
//! Lcom/x/Foo;->name        com.x.Foo#name        any member called `name`
//! Lcom/x/Foo;->name(I)V    com.x.Foo#name(I)V    a method
//! Lcom/x/Foo;->name:I      com.x.Foo#name:I      a field
//! ```

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{char, one_of};
use nom::combinator::{all_consuming, map, recognize, success};
use nom::multi::{many0, many0_count, separated_list1};
use nom::sequence::{pair, preceded, separated_pair, tuple};
use nom::IResult;

use crate::dex::error::DexError;

/// What a member pattern says about the member's type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberSig {
    Any,
    /// prototype descriptor, e.g. `(I)V`
    Method(String),
    /// field type descriptor
    Field(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// a class by type descriptor
    Class(String),
    /// classes directly in a package, package in `com/x` form
    Package(String),
    /// classes in a package or any package below it
    PackageTree(String),
    Member { class: String, name: String, sig: MemberSig },
}

fn type_descriptor(i: &str) -> IResult<&str, &str> {
    recognize(pair(
        many0_count(char('[')),
        alt((
            recognize(one_of("ZBSCIJFDV")),
            recognize(tuple((char('L'), take_while1(|c: char| c != ';' && c != '[' && c != '('), char(';')))),
        )),
    ))(i)
}

fn proto_descriptor(i: &str) -> IResult<&str, &str> {
    recognize(tuple((char('('), many0(type_descriptor), char(')'), type_descriptor)))(i)
}

fn class_descriptor(i: &str) -> IResult<&str, String> {
    map(recognize(tuple((char('L'), take_while1(|c: char| c != ';' && c != '['), char(';')))), String::from)(i)
}

fn identifier(i: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '$' || c == '-')(i)
}

fn dotted(i: &str) -> IResult<&str, Vec<&str>> {
    separated_list1(char('.'), identifier)(i)
}

fn member(i: &str) -> IResult<&str, (String, MemberSig)> {
    pair(
        map(take_while1(|c: char| c != '(' && c != ':'), String::from),
        alt((
            map(proto_descriptor, |p| MemberSig::Method(p.to_string())),
            map(preceded(char(':'), type_descriptor), |t| MemberSig::Field(t.to_string())),
            success(MemberSig::Any),
        )),
    )(i)
}

fn pattern(i: &str) -> IResult<&str, Pattern> {
    let as_member = |(class, (name, sig)): (String, (String, MemberSig))| Pattern::Member { class, name, sig };
    alt((
        map(separated_pair(class_descriptor, tag("->"), member), as_member),
        map(class_descriptor, Pattern::Class),
        map(separated_pair(map(dotted, |parts| format!("L{};", parts.join("/"))), char('#'), member), as_member),
        map(pair(dotted, alt((tag(".**"), tag(".*")))), |(parts, wildcard)| {
            let package = parts.join("/");
            if wildcard == ".**" {
                Pattern::PackageTree(package)
            } else {
                Pattern::Package(package)
            }
        }),
        map(dotted, |parts| Pattern::Class(format!("L{};", parts.join("/")))),
    ))(i)
}

impl Pattern {
    pub fn parse(s: &str) -> Result<Pattern, DexError> {
        all_consuming(pattern)(s.trim()).map(|(_, p)| p).map_err(|_| DexError::InvalidName(s.to_string()))
    }

    /// The class a class or member pattern names.
    pub fn class(&self) -> Option<&str> {
        match self {
            Pattern::Class(c) | Pattern::Member { class: c, .. } => Some(c),
            _ => None,
        }
    }

    pub fn matches_class(&self, descriptor: &str) -> bool {
        match self {
            Pattern::Class(c) => c == descriptor,
            Pattern::Package(p) => class_package(descriptor) == Some(p.as_str()),
            Pattern::PackageTree(p) => class_package(descriptor)
                .is_some_and(|pkg| pkg == p || (pkg.starts_with(p.as_str()) && pkg[p.len()..].starts_with('/'))),
            Pattern::Member { .. } => false,
        }
    }

    pub fn matches_field(&self, class: &str, name: &str, type_: &str) -> bool {
        match self {
            Pattern::Member { class: c, name: n, sig } => {
                c == class && n == name && (*sig == MemberSig::Any || *sig == MemberSig::Field(type_.to_string()))
            }
            _ => false,
        }
    }

    pub fn matches_method(&self, class: &str, name: &str, proto: &str) -> bool {
        match self {
            Pattern::Member { class: c, name: n, sig } => {
                c == class && n == name && (*sig == MemberSig::Any || *sig == MemberSig::Method(proto.to_string()))
            }
            _ => false,
        }
    }
}

/// Package of a class descriptor in `com/x` form, `""` for the default package.
pub fn class_package(descriptor: &str) -> Option<&str> {
    let inner = descriptor.strip_prefix('L')?.strip_suffix(';')?;
    Some(inner.rsplit_once('/').map_or("", |(pkg, _)| pkg))
}

/// Unqualified class name of a class descriptor.
pub fn simple_name(descriptor: &str) -> Option<&str> {
    let inner = descriptor.strip_prefix('L')?.strip_suffix(';')?;
    Some(inner.rsplit_once('/').map_or(inner, |(_, name)| name))
}

fn is_simple_name_char(c: char) -> bool {
    matches!(c,
        'A'..='Z' | 'a'..='z' | '0'..='9' | '$' | '-' | '_'
        | '\u{a1}'..='\u{1fff}'
        | '\u{2010}'..='\u{2027}'
        | '\u{2030}'..='\u{d7ff}'
        | '\u{e000}'..='\u{ffef}'
        | '\u{10000}'..='\u{10ffff}')
}

/// A dex SimpleName: the identifier form of member names and class name segments.
pub fn is_valid_simple_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(is_simple_name_char)
}

/// A dex TypeDescriptor. Arrays are limited to 255 dimensions and `V` is only valid alone.
pub fn is_valid_type_descriptor(descriptor: &str) -> bool {
    if all_consuming(type_descriptor)(descriptor).is_err() {
        return false;
    }
    let element = descriptor.trim_start_matches('[');
    let dims = descriptor.len() - element.len();
    if dims > 255 || (dims > 0 && element == "V") {
        return false;
    }
    match element.strip_prefix('L').and_then(|e| e.strip_suffix(';')) {
        Some(path) => path.split('/').all(is_valid_simple_name),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_forms() {
        assert_eq!(Pattern::parse("Lcom/x/Foo;").unwrap(), Pattern::Class("Lcom/x/Foo;".into()));
        assert_eq!(Pattern::parse("com.x.Foo").unwrap(), Pattern::Class("Lcom/x/Foo;".into()));
        assert_eq!(Pattern::parse("Foo$Inner").unwrap(), Pattern::Class("LFoo$Inner;".into()));
        assert_eq!(Pattern::parse("com.x.*").unwrap(), Pattern::Package("com/x".into()));
        assert_eq!(Pattern::parse("com.x.**").unwrap(), Pattern::PackageTree("com/x".into()));
    }

    #[test]
    fn test_member_forms() {
        assert_eq!(
            Pattern::parse("Lcom/x/Foo;->run(ILjava/lang/String;)V").unwrap(),
            Pattern::Member {
                class: "Lcom/x/Foo;".into(),
                name: "run".into(),
                sig: MemberSig::Method("(ILjava/lang/String;)V".into())
            }
        );
        assert_eq!(
            Pattern::parse("Lcom/x/Foo;->count:I").unwrap(),
            Pattern::Member { class: "Lcom/x/Foo;".into(), name: "count".into(), sig: MemberSig::Field("I".into()) }
        );
        assert_eq!(
            Pattern::parse("com.x.Foo#main").unwrap(),
            Pattern::Member { class: "Lcom/x/Foo;".into(), name: "main".into(), sig: MemberSig::Any }
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Pattern::parse("").is_err());
        assert!(Pattern::parse("Lcom/x/Foo").is_err());
        assert!(Pattern::parse("com..Foo").is_err());
        assert!(Pattern::parse("Lcom/x/Foo;->run(I").is_err());
        assert_eq!(Pattern::parse("a b"), Err(DexError::InvalidName("a b".into())));
    }

    #[test]
    fn test_matching() {
        let tree = Pattern::parse("com.x.**").unwrap();
        assert!(tree.matches_class("Lcom/x/Foo;"));
        assert!(tree.matches_class("Lcom/x/y/Bar;"));
        assert!(!tree.matches_class("Lcom/xy/Bar;"));

        let pkg = Pattern::parse("com.x.*").unwrap();
        assert!(pkg.matches_class("Lcom/x/Foo;"));
        assert!(!pkg.matches_class("Lcom/x/y/Bar;"));

        let m = Pattern::parse("com.x.Foo#run").unwrap();
        assert!(m.matches_method("Lcom/x/Foo;", "run", "()V"));
        assert!(m.matches_field("Lcom/x/Foo;", "run", "I"));
        assert!(!m.matches_class("Lcom/x/Foo;"));

        let f = Pattern::parse("Lcom/x/Foo;->run:I").unwrap();
        assert!(f.matches_field("Lcom/x/Foo;", "run", "I"));
        assert!(!f.matches_field("Lcom/x/Foo;", "run", "J"));
        assert!(!f.matches_method("Lcom/x/Foo;", "run", "()V"));
    }

    #[test]
    fn test_descriptor_helpers() {
        assert_eq!(class_package("Lcom/x/Foo;"), Some("com/x"));
        assert_eq!(class_package("LFoo;"), Some(""));
        assert_eq!(simple_name("Lcom/x/Foo;"), Some("Foo"));
        assert_eq!(class_package("I"), None);
    }

    #[test]
    fn test_validity() {
        assert!(is_valid_simple_name("a$b-c_1"));
        assert!(is_valid_simple_name("\u{180b}\u{fe00}"));
        assert!(!is_valid_simple_name(""));
        assert!(!is_valid_simple_name("a.b"));
        assert!(!is_valid_simple_name("<init>"));

        assert!(is_valid_type_descriptor("I"));
        assert!(is_valid_type_descriptor("[[Lcom/x/Foo;"));
        assert!(is_valid_type_descriptor("V"));
        assert!(!is_valid_type_descriptor("[V"));
        assert!(!is_valid_type_descriptor("Lcom//Foo;"));
        assert!(!is_valid_type_descriptor("Lcom/x/Foo"));
        assert!(!is_valid_type_descriptor("Q"));
    }
}
