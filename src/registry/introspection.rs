//! # Built-In Introspection Namespace (spec §6.3)
//!
//! Every registry carries a fixed set of meta-objects and one implicit
//! trait every object answers to, regardless of what the application
//! registers:
//!
//! - `dicey.Introspection` — implicit on every object; `Data` (structured)
//!   and `XML` (text) properties describing the object's own traits.
//! - `/dicey/registry`, trait `dicey.Registry` — `Objects`/`Traits`
//!   properties and `PathExists`/`TraitExists`/`ElementExists` operations
//!   over the whole registry.
//! - `/dicey/registry/traits/<name>`, trait `dicey.Trait` — one meta-object
//!   per registered trait, created automatically by [`super::Registry::add_trait`].
//! - `/dicey/server`, trait `dicey.Server` — server-level properties filled
//!   in by the server core at startup.
//! - `dicey.Plugin` — trait used for the `/dicey/plugins/<name>` meta-object
//!   the plugin manager creates per spawned plugin (spec §4.10); its
//!   property values come from plugin-manager state the registry doesn't
//!   hold, so [`dispatch`] does not serve it.

use super::{Element, ElementFlags, ElementKind, Registry, Trait};
use crate::error::{DiceyError, DiceyResult};
use crate::wire::{Type, Value};

pub const INTROSPECTION_TRAIT: &str = "dicey.Introspection";
pub const REGISTRY_TRAIT: &str = "dicey.Registry";
pub const TRAIT_TRAIT: &str = "dicey.Trait";
pub const SERVER_TRAIT: &str = "dicey.Server";
pub const PLUGIN_TRAIT: &str = "dicey.Plugin";

pub const REGISTRY_PATH: &str = "/dicey/registry";
pub const SERVER_PATH: &str = "/dicey/server";

/// Identifies which internal handler serves a built-in [`Element`] (spec
/// §6.3's enumerated built-in operations/properties).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    IntrospectionData,
    IntrospectionXml,
    RegistryObjects,
    RegistryTraits,
    RegistryPathExists,
    RegistryTraitExists,
    RegistryElementExists,
    TraitProperties,
    TraitOperations,
    TraitSignals,
}

fn element(name: &str, kind: ElementKind, sig: &str, builtin: Builtin) -> Element {
    Element::new(name, kind, sig)
        .expect("built-in signature literal must parse")
        .with_flags(ElementFlags::read_only())
        .with_builtin(builtin)
}

fn op(name: &str, sig: &str, builtin: Builtin) -> Element {
    Element::new(name, ElementKind::Operation, sig)
        .expect("built-in signature literal must parse")
        .with_builtin(builtin)
}

/// Populate `registry` with the fixed built-in traits and meta-objects
/// (spec §6.3). Called once from [`super::Registry::new`].
pub fn install_builtins(registry: &mut Registry) {
    let introspection = Trait::new(INTROSPECTION_TRAIT)
        .with_element(element("Data", ElementKind::Property, "{@[{s[(scs)]}]}", Builtin::IntrospectionData))
        .with_element(element("XML", ElementKind::Property, "s", Builtin::IntrospectionXml));
    registry
        .add_trait(introspection)
        .expect("introspection trait registers exactly once");

    let registry_trait = Trait::new(REGISTRY_TRAIT)
        .with_element(element("Objects", ElementKind::Property, "[@]", Builtin::RegistryObjects))
        .with_element(element("Traits", ElementKind::Property, "[s]", Builtin::RegistryTraits))
        .with_element(op("PathExists", "@ -> b", Builtin::RegistryPathExists))
        .with_element(op("TraitExists", "s -> b", Builtin::RegistryTraitExists))
        .with_element(op("ElementExists", "{@%} -> b", Builtin::RegistryElementExists));
    registry
        .add_trait(registry_trait)
        .expect("registry trait registers exactly once");

    let trait_trait = Trait::new(TRAIT_TRAIT)
        .with_element(element("Properties", ElementKind::Property, "[(ssb)]", Builtin::TraitProperties))
        .with_element(element("Operations", ElementKind::Property, "[(ss)]", Builtin::TraitOperations))
        .with_element(element("Signals", ElementKind::Property, "[(ss)]", Builtin::TraitSignals));
    registry
        .add_trait(trait_trait)
        .expect("trait-descriptor trait registers exactly once");

    let server_trait = Trait::new(SERVER_TRAIT)
        .with_element(Element::new("Subscribe", ElementKind::Operation, "{@%} -> $").expect("valid signature"))
        .with_element(Element::new("Unsubscribe", ElementKind::Operation, "{@%} -> $").expect("valid signature"));
    registry
        .add_trait(server_trait)
        .expect("server trait registers exactly once");
    registry
        .add_trait(Trait::new(PLUGIN_TRAIT))
        .expect("plugin trait registers exactly once");

    let mut registry_traits = std::collections::HashSet::new();
    registry_traits.insert(REGISTRY_TRAIT.to_string());
    registry
        .add_object(REGISTRY_PATH, registry_traits)
        .expect("registry meta-object registers exactly once");

    let mut server_traits = std::collections::HashSet::new();
    server_traits.insert(SERVER_TRAIT.to_string());
    registry
        .add_object(SERVER_PATH, server_traits)
        .expect("server meta-object registers exactly once");
}

fn element_kind_char(kind: ElementKind) -> char {
    match kind {
        ElementKind::Operation => 'o',
        ElementKind::Property => 'p',
        ElementKind::Signal => 'g',
    }
}

/// Build the `Data` property's value: the object's own path paired with
/// its per-trait element listing (spec §6.3 `{@[{s[(scs)]}]}` — a Pair of
/// the object path and an array of (trait name, array of (element name,
/// kind char, signature) tuples)).
fn introspection_data(registry: &Registry, path: &str) -> DiceyResult<Value> {
    let mut per_trait = Vec::new();
    registry.walk(path, |event| {
        match event {
            super::WalkEvent::TraitStart(name) => {
                per_trait.push((name.to_string(), Vec::new()));
            }
            super::WalkEvent::Element(e) => {
                if let Some(last) = per_trait.last_mut() {
                    last.1.push(Value::Tuple(vec![
                        Value::Str(e.name.clone()),
                        Value::Byte(element_kind_char(e.kind) as u8),
                        Value::Str(e.signature.to_string()),
                    ]));
                }
            }
            _ => {}
        }
        true
    })?;

    let traits = Value::Array(
        Type::Pair,
        per_trait
            .into_iter()
            .map(|(name, elements)| {
                Value::Pair(
                    Box::new(Value::Str(name)),
                    Box::new(Value::Array(Type::Tuple, elements)),
                )
            })
            .collect(),
    );
    Ok(Value::Pair(Box::new(Value::Path(path.to_string())), Box::new(traits)))
}

fn introspection_xml(registry: &Registry, path: &str) -> DiceyResult<Value> {
    let mut xml = format!("<object path=\"{}\">", path);
    registry.walk(path, |event| {
        match event {
            super::WalkEvent::TraitStart(name) => {
                xml.push_str(&format!("<trait name=\"{}\">", name));
            }
            super::WalkEvent::Element(e) => {
                xml.push_str(&format!(
                    "<element name=\"{}\" kind=\"{}\" signature=\"{}\"/>",
                    e.name,
                    element_kind_char(e.kind),
                    e.signature
                ));
            }
            super::WalkEvent::TraitEnd(_) => xml.push_str("</trait>"),
            _ => {}
        }
        true
    })?;
    xml.push_str("</object>");
    Ok(Value::Str(xml))
}

fn trait_name_from_meta_path(path: &str) -> DiceyResult<&str> {
    path.strip_prefix("/dicey/registry/traits/")
        .ok_or_else(|| DiceyError::PathNotFound(path.to_string()))
}

/// List a trait's elements of `kind` as `(ss)` tuples of (name, signature),
/// or `(ssb)` tuples of (name, signature, read-only) for properties, so a
/// client can recover an element's signature and mutability without a
/// full `Data` walk.
fn trait_elements_of_kind(registry: &Registry, path: &str, kind: ElementKind) -> DiceyResult<Value> {
    let name = trait_name_from_meta_path(path)?;
    let t = registry
        .get_trait(name)
        .ok_or_else(|| DiceyError::TraitNotFound(name.to_string()))?;
    let mut elements: Vec<&Element> = t.elements.values().filter(|e| e.kind == kind).collect();
    elements.sort_by(|a, b| a.name.cmp(&b.name));

    let tuples = elements
        .into_iter()
        .map(|e| {
            let mut fields = vec![Value::Str(e.name.clone()), Value::Str(e.signature.to_string())];
            if kind == ElementKind::Property {
                fields.push(Value::Bool(e.flags.read_only));
            }
            Value::Tuple(fields)
        })
        .collect();
    Ok(Value::Array(Type::Tuple, tuples))
}

/// Serve a built-in element given the registry's current state. `input` is
/// the argument value for operations (`None` for property reads). Not
/// valid for [`PLUGIN_TRAIT`] elements, whose state lives in the plugin
/// manager rather than the registry.
pub fn dispatch(builtin: Builtin, registry: &Registry, path: &str, input: Option<&Value>) -> DiceyResult<Value> {
    match builtin {
        Builtin::IntrospectionData => introspection_data(registry, path),
        Builtin::IntrospectionXml => introspection_xml(registry, path),
        Builtin::RegistryObjects => {
            let mut paths: Vec<String> = registry.objects().map(|o| o.path.clone()).collect();
            paths.sort();
            Ok(Value::Array(Type::Path, paths.into_iter().map(Value::Path).collect()))
        }
        Builtin::RegistryTraits => {
            let mut names: Vec<String> = registry.traits().map(|t| t.name.clone()).collect();
            names.sort();
            Ok(Value::Array(Type::Str, names.into_iter().map(Value::Str).collect()))
        }
        Builtin::RegistryPathExists => {
            let target = match input {
                Some(Value::Path(p)) => p,
                _ => return Err(DiceyError::ValueTypeMismatch),
            };
            Ok(Value::Bool(registry.get_object(target).is_some()))
        }
        Builtin::RegistryTraitExists => {
            let target = match input {
                Some(Value::Str(s)) => s,
                _ => return Err(DiceyError::ValueTypeMismatch),
            };
            Ok(Value::Bool(registry.get_trait(target).is_some()))
        }
        Builtin::RegistryElementExists => {
            let (target_path, selector) = match input {
                Some(Value::Pair(a, b)) => match (a.as_ref(), b.as_ref()) {
                    (Value::Path(p), Value::Selector(s)) => (p, s),
                    _ => return Err(DiceyError::ValueTypeMismatch),
                },
                _ => return Err(DiceyError::ValueTypeMismatch),
            };
            Ok(Value::Bool(registry.get_element(target_path, selector).is_ok()))
        }
        Builtin::TraitProperties => trait_elements_of_kind(registry, path, ElementKind::Property),
        Builtin::TraitOperations => trait_elements_of_kind(registry, path, ElementKind::Operation),
        Builtin::TraitSignals => trait_elements_of_kind(registry, path, ElementKind::Signal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Selector;

    #[test]
    fn registry_meta_object_lists_itself() {
        let registry = Registry::new();
        let objects = dispatch(Builtin::RegistryObjects, &registry, REGISTRY_PATH, None).unwrap();
        match objects {
            Value::Array(Type::Path, items) => {
                assert!(items.contains(&Value::Path(REGISTRY_PATH.to_string())));
                assert!(items.contains(&Value::Path(SERVER_PATH.to_string())));
            }
            other => panic!("unexpected value: {:?}", other),
        }
    }

    #[test]
    fn registry_traits_lists_builtins() {
        let registry = Registry::new();
        let traits = dispatch(Builtin::RegistryTraits, &registry, REGISTRY_PATH, None).unwrap();
        match traits {
            Value::Array(Type::Str, items) => {
                assert!(items.contains(&Value::Str(INTROSPECTION_TRAIT.to_string())));
                assert!(items.contains(&Value::Str(REGISTRY_TRAIT.to_string())));
            }
            other => panic!("unexpected value: {:?}", other),
        }
    }

    #[test]
    fn path_exists_reflects_registry_state() {
        let mut registry = Registry::new();
        let exists_before = dispatch(
            Builtin::RegistryPathExists,
            &registry,
            REGISTRY_PATH,
            Some(&Value::Path("/foo".to_string())),
        )
        .unwrap();
        assert_eq!(exists_before, Value::Bool(false));

        registry.add_object("/foo", Default::default()).unwrap();
        let exists_after = dispatch(
            Builtin::RegistryPathExists,
            &registry,
            REGISTRY_PATH,
            Some(&Value::Path("/foo".to_string())),
        )
        .unwrap();
        assert_eq!(exists_after, Value::Bool(true));
    }

    #[test]
    fn element_exists_checks_trait_membership_too() {
        let mut registry = Registry::new();
        registry
            .add_trait(Trait::new("Example").with_element(
                Element::new("P", ElementKind::Property, "s").unwrap(),
            ))
            .unwrap();
        let mut traits = std::collections::HashSet::new();
        traits.insert("Example".to_string());
        registry.add_object("/foo", traits).unwrap();

        let sel = Value::Pair(
            Box::new(Value::Path("/foo".to_string())),
            Box::new(Value::Selector(Selector::new("Example", "P").unwrap())),
        );
        let result = dispatch(Builtin::RegistryElementExists, &registry, REGISTRY_PATH, Some(&sel)).unwrap();
        assert_eq!(result, Value::Bool(true));

        let missing = Value::Pair(
            Box::new(Value::Path("/foo".to_string())),
            Box::new(Value::Selector(Selector::new("Example", "Missing").unwrap())),
        );
        let result = dispatch(Builtin::RegistryElementExists, &registry, REGISTRY_PATH, Some(&missing)).unwrap();
        assert_eq!(result, Value::Bool(false));
    }

    #[test]
    fn trait_meta_object_lists_its_own_properties() {
        let mut registry = Registry::new();
        registry
            .add_trait(Trait::new("Example").with_element(
                Element::new("P", ElementKind::Property, "s").unwrap(),
            ))
            .unwrap();
        let meta_path = "/dicey/registry/traits/Example";
        let properties = dispatch(Builtin::TraitProperties, &registry, meta_path, None).unwrap();
        assert_eq!(
            properties,
            Value::Array(
                Type::Tuple,
                vec![Value::Tuple(vec![
                    Value::Str("P".to_string()),
                    Value::Str("s".to_string()),
                    Value::Bool(false),
                ])]
            )
        );
    }

    #[test]
    fn introspection_data_describes_object_traits() {
        let mut registry = Registry::new();
        registry
            .add_trait(Trait::new("Example").with_element(
                Element::new("P", ElementKind::Property, "s").unwrap(),
            ))
            .unwrap();
        let mut traits = std::collections::HashSet::new();
        traits.insert("Example".to_string());
        registry.add_object("/foo", traits).unwrap();

        let data = dispatch(Builtin::IntrospectionData, &registry, "/foo", None).unwrap();
        match data {
            Value::Pair(path, traits) => {
                assert_eq!(*path, Value::Path("/foo".to_string()));
                match *traits {
                    Value::Array(Type::Pair, items) => {
                        assert!(items.iter().any(|item| matches!(
                            item,
                            Value::Pair(a, _) if **a == Value::Str("Example".to_string())
                        )));
                    }
                    other => panic!("unexpected traits value: {:?}", other),
                }
            }
            other => panic!("unexpected value: {:?}", other),
        }
    }

    #[test]
    fn introspection_xml_contains_object_path() {
        let registry = Registry::new();
        let xml = dispatch(Builtin::IntrospectionXml, &registry, REGISTRY_PATH, None).unwrap();
        match xml {
            Value::Str(s) => assert!(s.contains(REGISTRY_PATH)),
            other => panic!("unexpected value: {:?}", other),
        }
    }
}
