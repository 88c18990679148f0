//! # Object/Trait/Element Registry
//!
//! The registry is the server's namespace: a `path -> Object` map and a
//! `trait-name -> Trait` map, self-describing through meta-objects rooted
//! at `/dicey`. It owns its own scratch formatting buffer as a plain
//! struct field: no process-global scratch, so the returned metapath
//! strings are only valid until the next call that reuses the buffer —
//! callers that need to retain one clone it.
//!
//! Lookups and mutations here are synchronous and not `Send`-guarded on
//! their own; the registry lives entirely under the server's single actor
//! task once the server starts, so a `Mutex` would only ever be
//! uncontended ceremony.

pub mod introspection;

use crate::error::{DiceyError, DiceyResult};
use crate::wire::Signature;
use std::collections::{HashMap, HashSet};

/// What kind of member a [`Element`] is (spec §3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Operation,
    Property,
    Signal,
}

/// Per-element flags (spec §3.3's "flags (bitset incl. ReadOnly, Internal)").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElementFlags {
    pub read_only: bool,
    pub internal: bool,
}

impl ElementFlags {
    pub const NONE: ElementFlags = ElementFlags {
        read_only: false,
        internal: false,
    };

    pub fn read_only() -> Self {
        Self {
            read_only: true,
            internal: false,
        }
    }

    pub fn internal() -> Self {
        Self {
            read_only: false,
            internal: true,
        }
    }
}

/// A named member of a trait: a property, operation, or signal with a
/// parsed signature (spec §3.3).
#[derive(Debug, Clone)]
pub struct Element {
    pub name: String,
    pub kind: ElementKind,
    pub signature: Signature,
    pub flags: ElementFlags,
    /// Identifies which internal handler serves this element when it is
    /// flagged `internal`; `None` for application-defined elements.
    pub builtin: Option<introspection::Builtin>,
}

impl Element {
    pub fn new(name: impl Into<String>, kind: ElementKind, signature: &str) -> DiceyResult<Self> {
        Ok(Self {
            name: name.into(),
            kind,
            signature: Signature::parse(signature)?,
            flags: ElementFlags::NONE,
            builtin: None,
        })
    }

    pub fn with_flags(mut self, flags: ElementFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_builtin(mut self, builtin: introspection::Builtin) -> Self {
        self.flags.internal = true;
        self.builtin = Some(builtin);
        self
    }
}

/// A named contract declaring a set of elements (spec §3.3).
#[derive(Debug, Clone, Default)]
pub struct Trait {
    pub name: String,
    pub elements: HashMap<String, Element>,
}

impl Trait {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            elements: HashMap::new(),
        }
    }

    pub fn with_element(mut self, element: Element) -> Self {
        self.elements.insert(element.name.clone(), element);
        self
    }

    pub fn get(&self, element: &str) -> Option<&Element> {
        self.elements.get(element)
    }
}

/// An addressable entity bound to a set of traits (spec §3.3). Every
/// object implicitly implements `dicey.Introspection`, so `traits` never
/// needs to name it explicitly.
#[derive(Debug, Clone)]
pub struct Object {
    pub path: String,
    pub traits: HashSet<String>,
    /// Cached XML introspection blob (design note §9); cleared whenever
    /// this object's trait set changes.
    pub xml_cache: Option<String>,
}

impl Object {
    pub fn new(path: impl Into<String>, traits: HashSet<String>) -> Self {
        Self {
            path: path.into(),
            traits,
            xml_cache: None,
        }
    }

    pub fn implements(&self, trait_name: &str) -> bool {
        trait_name == introspection::INTROSPECTION_TRAIT || self.traits.contains(trait_name)
    }
}

/// Events a [`Registry::walk`] callback observes, in traversal order (spec
/// §4.4).
#[derive(Debug)]
pub enum WalkEvent<'a> {
    ObjectStart(&'a Object),
    TraitStart(&'a str),
    Element(&'a Element),
    TraitEnd(&'a str),
    ObjectEnd,
}

/// The server's object-and-trait directory (spec §3.3).
#[derive(Debug)]
pub struct Registry {
    objects: HashMap<String, Object>,
    traits: HashMap<String, Trait>,
    scratch: String,
}

impl Registry {
    /// Construct a registry with the always-present meta-objects already
    /// materialized (spec §3.3: "meta-objects are created at registry
    /// init").
    pub fn new() -> Self {
        let mut reg = Self {
            objects: HashMap::new(),
            traits: HashMap::new(),
            scratch: String::new(),
        };
        introspection::install_builtins(&mut reg);
        reg
    }

    pub fn add_trait(&mut self, t: Trait) -> DiceyResult<()> {
        if self.traits.contains_key(&t.name) {
            return Err(DiceyError::Exists(t.name));
        }
        let name = t.name.clone();
        self.traits.insert(name.clone(), t);

        // spec §3.3: adding a trait also creates its meta-object at
        // /dicey/registry/traits/<name>, carrying dicey.Trait.
        let meta_path = self.format_trait_meta_path(&name);
        let mut traits = HashSet::new();
        traits.insert(introspection::TRAIT_TRAIT.to_string());
        self.objects
            .insert(meta_path.clone(), Object::new(meta_path, traits));
        Ok(())
    }

    pub fn get_trait(&self, name: &str) -> Option<&Trait> {
        self.traits.get(name)
    }

    pub fn traits(&self) -> impl Iterator<Item = &Trait> {
        self.traits.values()
    }

    /// Format `/dicey/registry/traits/<name>` into the registry's reusable
    /// scratch buffer, returning an owned copy (design note §9: the
    /// scratch buffer itself must not be handed out as a borrow across
    /// calls).
    fn format_trait_meta_path(&mut self, name: &str) -> String {
        self.scratch.clear();
        self.scratch.push_str("/dicey/registry/traits/");
        self.scratch.push_str(name);
        self.scratch.clone()
    }

    pub fn add_object(&mut self, path: impl Into<String>, traits: HashSet<String>) -> DiceyResult<()> {
        let path = path.into();
        crate::wire::Value::validate_path(&path)?;
        if self.objects.contains_key(&path) {
            return Err(DiceyError::Exists(path));
        }
        for t in &traits {
            if !self.traits.contains_key(t) {
                return Err(DiceyError::TraitNotFound(t.clone()));
            }
        }
        self.objects.insert(path.clone(), Object::new(path, traits));
        Ok(())
    }

    pub fn delete_object(&mut self, path: &str) -> DiceyResult<()> {
        self.objects
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| DiceyError::PathNotFound(path.to_string()))
    }

    pub fn get_object(&self, path: &str) -> Option<&Object> {
        self.objects.get(path)
    }

    pub fn objects(&self) -> impl Iterator<Item = &Object> {
        self.objects.values()
    }

    /// Look up an element by path and selector, requiring that the
    /// object's trait set contains the selector's trait (spec §4.4: "
    /// Element access through an object requires that the object's trait
    /// set contains the element's trait").
    pub fn get_element(&self, path: &str, selector: &crate::wire::Selector) -> DiceyResult<&Element> {
        let object = self
            .objects
            .get(path)
            .ok_or_else(|| DiceyError::PathNotFound(path.to_string()))?;
        if !object.implements(&selector.trait_name) {
            return Err(DiceyError::TraitNotFound(selector.trait_name.clone()));
        }
        let t = self
            .traits
            .get(&selector.trait_name)
            .ok_or_else(|| DiceyError::TraitNotFound(selector.trait_name.clone()))?;
        t.get(&selector.element).ok_or_else(|| DiceyError::ElementNotFound {
            trait_name: selector.trait_name.clone(),
            element: selector.element.clone(),
        })
    }

    /// Validate that `op` is a legal operation kind for the looked-up
    /// element (spec §4.9.2's Get/Set/Exec gating table).
    pub fn validate_op(
        &self,
        path: &str,
        selector: &crate::wire::Selector,
        op: crate::wire::Op,
    ) -> DiceyResult<&Element> {
        use crate::wire::Op;
        let element = self.get_element(path, selector)?;
        match op {
            Op::Get => {
                if element.kind != ElementKind::Property {
                    return Err(DiceyError::Inval("Get requires a property".into()));
                }
            }
            Op::Set => {
                if element.kind != ElementKind::Property {
                    return Err(DiceyError::Inval("Set requires a property".into()));
                }
                if element.flags.read_only {
                    return Err(DiceyError::PropertyReadOnly(element.name.clone()));
                }
            }
            Op::Exec => {
                if element.kind != ElementKind::Operation {
                    return Err(DiceyError::Inval("Exec requires an operation".into()));
                }
            }
            Op::Event | Op::Response => {
                return Err(DiceyError::Inval("server-only op kind from client".into()));
            }
        }
        Ok(element)
    }

    /// Walk a single object's traits and elements in order, invoking
    /// `callback` for each event; `callback` may return `false` to
    /// short-circuit the walk (spec §4.4).
    pub fn walk(&self, path: &str, mut callback: impl FnMut(WalkEvent) -> bool) -> DiceyResult<()> {
        let object = self
            .objects
            .get(path)
            .ok_or_else(|| DiceyError::PathNotFound(path.to_string()))?;

        if !callback(WalkEvent::ObjectStart(object)) {
            return Ok(());
        }

        let mut trait_names: Vec<&String> = object.traits.iter().collect();
        trait_names.sort();
        for trait_name in trait_names {
            let Some(t) = self.traits.get(trait_name) else {
                continue;
            };
            if !callback(WalkEvent::TraitStart(trait_name)) {
                return Ok(());
            }
            let mut elements: Vec<&Element> = t.elements.values().collect();
            elements.sort_by(|a, b| a.name.cmp(&b.name));
            for element in elements {
                if !callback(WalkEvent::Element(element)) {
                    return Ok(());
                }
            }
            if !callback(WalkEvent::TraitEnd(trait_name)) {
                return Ok(());
            }
        }

        callback(WalkEvent::ObjectEnd);
        Ok(())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Selector;

    fn example_trait() -> Trait {
        Trait::new("Example").with_element(Element::new("P", ElementKind::Property, "s").unwrap())
    }

    #[test]
    fn add_trait_then_object_exposes_element() {
        let mut reg = Registry::new();
        reg.add_trait(example_trait()).unwrap();
        let mut traits = HashSet::new();
        traits.insert("Example".to_string());
        reg.add_object("/foo", traits).unwrap();

        let sel = Selector::new("Example", "P").unwrap();
        let element = reg.get_element("/foo", &sel).unwrap();
        assert_eq!(element.name, "P");
    }

    #[test]
    fn add_object_with_unknown_trait_fails_and_leaves_registry_unchanged() {
        let mut reg = Registry::new();
        let mut traits = HashSet::new();
        traits.insert("Missing".to_string());
        let result = reg.add_object("/foo", traits);
        assert!(matches!(result, Err(DiceyError::TraitNotFound(_))));
        assert!(reg.get_object("/foo").is_none());
    }

    #[test]
    fn delete_object_then_lookup_fails_path_not_found() {
        let mut reg = Registry::new();
        reg.add_trait(example_trait()).unwrap();
        let mut traits = HashSet::new();
        traits.insert("Example".to_string());
        reg.add_object("/foo", traits).unwrap();
        reg.delete_object("/foo").unwrap();

        let sel = Selector::new("Example", "P").unwrap();
        assert!(matches!(
            reg.get_element("/foo", &sel),
            Err(DiceyError::PathNotFound(_))
        ));
    }

    #[test]
    fn add_object_requires_unique_path() {
        let mut reg = Registry::new();
        reg.add_object("/foo", HashSet::new()).unwrap();
        assert!(matches!(
            reg.add_object("/foo", HashSet::new()),
            Err(DiceyError::Exists(_))
        ));
    }

    #[test]
    fn add_trait_installs_meta_object() {
        let mut reg = Registry::new();
        reg.add_trait(example_trait()).unwrap();
        assert!(reg.get_object("/dicey/registry/traits/Example").is_some());
    }

    #[test]
    fn validate_op_rejects_set_on_readonly_property() {
        let mut reg = Registry::new();
        let t = Trait::new("Example").with_element(
            Element::new("P", ElementKind::Property, "s")
                .unwrap()
                .with_flags(ElementFlags::read_only()),
        );
        reg.add_trait(t).unwrap();
        let mut traits = HashSet::new();
        traits.insert("Example".to_string());
        reg.add_object("/foo", traits).unwrap();

        let sel = Selector::new("Example", "P").unwrap();
        assert!(matches!(
            reg.validate_op("/foo", &sel, crate::wire::Op::Set),
            Err(DiceyError::PropertyReadOnly(_))
        ));
    }

    #[test]
    fn validate_op_rejects_set_on_operation_and_exec_on_property() {
        let mut reg = Registry::new();
        let t = Trait::new("Example")
            .with_element(Element::new("P", ElementKind::Property, "s").unwrap())
            .with_element(Element::new("Op", ElementKind::Operation, "$ -> $").unwrap());
        reg.add_trait(t).unwrap();
        let mut traits = HashSet::new();
        traits.insert("Example".to_string());
        reg.add_object("/foo", traits).unwrap();

        let sel_op = Selector::new("Example", "Op").unwrap();
        assert!(reg
            .validate_op("/foo", &sel_op, crate::wire::Op::Set)
            .is_err());

        let sel_prop = Selector::new("Example", "P").unwrap();
        assert!(reg
            .validate_op("/foo", &sel_prop, crate::wire::Op::Exec)
            .is_err());
        assert!(reg
            .validate_op("/foo", &sel_prop, crate::wire::Op::Get)
            .is_ok());
    }

    #[test]
    fn walk_visits_in_order_and_can_short_circuit() {
        let mut reg = Registry::new();
        reg.add_trait(example_trait()).unwrap();
        let mut traits = HashSet::new();
        traits.insert("Example".to_string());
        reg.add_object("/foo", traits).unwrap();

        let mut seen = Vec::new();
        reg.walk("/foo", |event| {
            match event {
                WalkEvent::ObjectStart(_) => seen.push("object-start"),
                WalkEvent::TraitStart(_) => seen.push("trait-start"),
                WalkEvent::Element(_) => seen.push("element"),
                WalkEvent::TraitEnd(_) => seen.push("trait-end"),
                WalkEvent::ObjectEnd => seen.push("object-end"),
            }
            true
        })
        .unwrap();

        assert_eq!(
            seen,
            vec!["object-start", "trait-start", "element", "trait-end", "object-end"]
        );

        let mut stopped_after = Vec::new();
        reg.walk("/foo", |event| {
            stopped_after.push(format!("{:?}", event));
            !matches!(event, WalkEvent::ObjectStart(_))
        })
        .unwrap();
        assert_eq!(stopped_after.len(), 1);
    }

    #[test]
    fn every_object_implicitly_implements_introspection() {
        let mut reg = Registry::new();
        reg.add_object("/foo", HashSet::new()).unwrap();
        let sel = Selector::new(introspection::INTROSPECTION_TRAIT, "Data").unwrap();
        assert!(reg.get_element("/foo", &sel).is_ok());
    }
}
