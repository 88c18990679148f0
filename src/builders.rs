//! # Fluent Message and Value Construction (component C, spec §4.3)
//!
//! Three cooperating builders assemble an outbound [`crate::wire::Packet`]:
//! [`MessageBuilder`] drives path/selector/op plumbing and hands off to a
//! [`ValueBuilder`] for the payload, which in turn uses [`ArgList`] as its
//! growable child-slot storage. All three follow the same idle → pending →
//! done state discipline spec.md describes, and all free their accumulated
//! children if discarded partway — there is no leaked-builder state to
//! reason about because `Value`/`Vec` ownership already does that for us in
//! Rust (the C source this is ported from has to free explicitly; here
//! `Drop` does it, so "builders that fail partway MUST free all
//! accumulated children" falls out of normal ownership rather than being a
//! separate obligation).

use crate::error::{DiceyError, DiceyResult};
use crate::wire::{is_compatible, Op, Packet, Selector, Type, Value};

/// Growable backing storage for a builder's not-yet-finalized children.
/// Grows 1.5x on demand (spec §4.3), matching `ChunkBuffer`'s growth
/// policy for buffers that accumulate before being finalized.
#[derive(Debug, Default)]
pub struct ArgList {
    items: Vec<Value>,
}

impl ArgList {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn push(&mut self, v: Value) {
        if self.items.len() == self.items.capacity() {
            let new_cap = ((self.items.capacity().max(1) as f64) * 1.5).ceil() as usize;
            self.items.reserve(new_cap - self.items.capacity());
        }
        self.items.push(v);
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// What kind of compound value a `ValueBuilder` is currently assembling.
enum Compound {
    Array { inner: Type, items: ArgList },
    Tuple { items: ArgList },
    Pair { items: ArgList },
}

/// Fluent builder for a single [`Value`], including its recursive
/// containers (spec §4.3).
///
/// State machine: idle → pending (`set` for a leaf) or
/// {array|tuple|pair} (`array_start`/`tuple_start`/`pair_start`) →
/// children (`next`) → `end()`.
pub struct ValueBuilder {
    leaf: Option<Value>,
    compound: Option<Compound>,
}

impl ValueBuilder {
    pub fn new() -> Self {
        Self {
            leaf: None,
            compound: None,
        }
    }

    /// Write a leaf value directly. Fails `ValueTypeMismatch` if this
    /// builder already committed to a compound shape.
    pub fn set(&mut self, value: Value) -> DiceyResult<&mut Self> {
        if self.compound.is_some() {
            return Err(DiceyError::ValueTypeMismatch);
        }
        self.leaf = Some(value);
        Ok(self)
    }

    /// Declare this builder as an array of `inner`-typed elements.
    pub fn array_start(&mut self, inner: Type) -> DiceyResult<&mut Self> {
        if self.leaf.is_some() || self.compound.is_some() {
            return Err(DiceyError::ValueTypeMismatch);
        }
        self.compound = Some(Compound::Array {
            inner,
            items: ArgList::new(),
        });
        Ok(self)
    }

    pub fn tuple_start(&mut self) -> DiceyResult<&mut Self> {
        if self.leaf.is_some() || self.compound.is_some() {
            return Err(DiceyError::ValueTypeMismatch);
        }
        self.compound = Some(Compound::Tuple {
            items: ArgList::new(),
        });
        Ok(self)
    }

    /// Declare this builder as a pair; exactly two subsequent `next` calls
    /// are accepted before `end()`.
    pub fn pair_start(&mut self) -> DiceyResult<&mut Self> {
        if self.leaf.is_some() || self.compound.is_some() {
            return Err(DiceyError::ValueTypeMismatch);
        }
        self.compound = Some(Compound::Pair {
            items: ArgList::new(),
        });
        Ok(self)
    }

    /// Reserve (and immediately fill) the next child slot. For arrays, the
    /// child's tag must equal the declared inner tag unless the inner tag
    /// is `Variant`-permissive by construction (arrays never declare
    /// `Variant`, so this is a plain equality check here).
    pub fn next(&mut self, child: Value) -> DiceyResult<&mut Self> {
        match self.compound.as_mut() {
            Some(Compound::Array { inner, items }) => {
                if !is_compatible(child.ty(), &crate::wire::Sig::Atom(*inner)) {
                    return Err(DiceyError::ValueTypeMismatch);
                }
                items.push(child);
            }
            Some(Compound::Tuple { items }) => items.push(child),
            Some(Compound::Pair { items }) => {
                if items.len() >= 2 {
                    return Err(DiceyError::ValueTypeMismatch);
                }
                items.push(child);
            }
            None => return Err(DiceyError::ValueTypeMismatch),
        }
        Ok(self)
    }

    /// Finalize this builder into a [`Value`]. Fails if a pair was started
    /// but doesn't have exactly two children, or if nothing was set at
    /// all.
    pub fn end(self) -> DiceyResult<Value> {
        if let Some(leaf) = self.leaf {
            return Ok(leaf);
        }
        match self.compound {
            Some(Compound::Array { inner, items }) => Ok(Value::Array(inner, items.into_vec())),
            Some(Compound::Tuple { items }) => Ok(Value::Tuple(items.into_vec())),
            Some(Compound::Pair { items }) => {
                let mut v = items.into_vec();
                if v.len() != 2 {
                    return Err(DiceyError::ValueTypeMismatch);
                }
                let b = v.pop().unwrap();
                let a = v.pop().unwrap();
                Ok(Value::Pair(Box::new(a), Box::new(b)))
            }
            None => Err(DiceyError::ValueTypeMismatch),
        }
    }
}

impl Default for ValueBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent builder for an outbound [`Packet::Message`] (spec §4.3).
///
/// State machine: idle → pending (`begin`) → pending (`set_seq`,
/// `set_path`, `set_selector`) → value-borrowed (`value_start`) → pending
/// (`value_end`) → done (`build`), or `discard` at any point.
pub struct MessageBuilder {
    op: Option<Op>,
    seq: Option<u32>,
    path: Option<String>,
    selector: Option<Selector>,
    value: Option<Value>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self {
            op: None,
            seq: None,
            path: None,
            selector: None,
            value: None,
        }
    }

    pub fn begin(mut self, op: Op) -> Self {
        self.op = Some(op);
        self
    }

    pub fn set_seq(mut self, seq: u32) -> Self {
        self.seq = Some(seq);
        self
    }

    pub fn set_path(mut self, path: impl Into<String>) -> DiceyResult<Self> {
        let path = path.into();
        Value::validate_path(&path)?;
        self.path = Some(path);
        Ok(self)
    }

    pub fn set_selector(mut self, selector: Selector) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Attach a root value assembled by a [`ValueBuilder`]. Not valid for
    /// `Op::Get`, which carries no value payload (spec §3.2).
    pub fn value(mut self, value: Value) -> DiceyResult<Self> {
        if self.op == Some(Op::Get) {
            return Err(DiceyError::ValueTypeMismatch);
        }
        self.value = Some(value);
        Ok(self)
    }

    /// Completeness check (spec §4.3): path set, selector valid, op valid,
    /// and `(op == Get) <=> (root value unset)`.
    fn check_complete(&self) -> DiceyResult<()> {
        let op = self.op.ok_or(DiceyError::Inval("missing op".into()))?;
        if self.path.is_none() {
            return Err(DiceyError::Inval("missing path".into()));
        }
        if self.selector.is_none() {
            return Err(DiceyError::Inval("missing selector".into()));
        }
        let is_get = matches!(op, Op::Get);
        if is_get != self.value.is_none() {
            return Err(DiceyError::Inval(
                "Get must have no value; other ops require one".into(),
            ));
        }
        Ok(())
    }

    pub fn build(self) -> DiceyResult<Packet> {
        self.check_complete()?;
        Ok(Packet::Message {
            seq: self.seq.unwrap_or(0),
            op: self.op.unwrap(),
            path: self.path.unwrap(),
            selector: self.selector.unwrap(),
            value: self.value,
        })
    }

    /// Discard this builder, dropping any accumulated state. In Rust this
    /// is just `drop(builder)`, but named so callers can express intent.
    pub fn discard(self) {
        drop(self);
    }
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_builds_without_value() {
        let sel = Selector::new("Example", "P").unwrap();
        let packet = MessageBuilder::new()
            .begin(Op::Get)
            .set_seq(2)
            .set_path("/foo")
            .unwrap()
            .set_selector(sel)
            .build()
            .unwrap();
        assert!(matches!(
            packet,
            Packet::Message { value: None, op: Op::Get, .. }
        ));
    }

    #[test]
    fn get_with_value_is_rejected() {
        let sel = Selector::new("Example", "P").unwrap();
        let result = MessageBuilder::new()
            .begin(Op::Get)
            .set_seq(2)
            .set_path("/foo")
            .unwrap()
            .set_selector(sel)
            .value(Value::Bool(true));
        assert!(result.is_err());
    }

    #[test]
    fn set_requires_a_value() {
        let sel = Selector::new("Example", "P").unwrap();
        let result = MessageBuilder::new()
            .begin(Op::Set)
            .set_seq(2)
            .set_path("/foo")
            .unwrap()
            .set_selector(sel)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn missing_path_fails_completeness() {
        let sel = Selector::new("Example", "P").unwrap();
        let result = MessageBuilder::new()
            .begin(Op::Set)
            .set_seq(2)
            .set_selector(sel)
            .value(Value::Bool(true))
            .unwrap()
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn value_builder_composes_array() {
        let mut vb = ValueBuilder::new();
        vb.array_start(Type::Int32).unwrap();
        vb.next(Value::Int32(1)).unwrap();
        vb.next(Value::Int32(2)).unwrap();
        let v = vb.end().unwrap();
        assert_eq!(v, Value::Array(Type::Int32, vec![Value::Int32(1), Value::Int32(2)]));
    }

    #[test]
    fn value_builder_array_rejects_mismatched_element() {
        let mut vb = ValueBuilder::new();
        vb.array_start(Type::Int32).unwrap();
        assert!(vb.next(Value::Str("x".into())).is_err());
    }

    #[test]
    fn value_builder_pair_requires_exactly_two() {
        let mut vb = ValueBuilder::new();
        vb.pair_start().unwrap();
        vb.next(Value::Bool(true)).unwrap();
        assert!(vb.end().is_err());
    }

    #[test]
    fn value_builder_pair_rejects_third_child() {
        let mut vb = ValueBuilder::new();
        vb.pair_start().unwrap();
        vb.next(Value::Bool(true)).unwrap();
        vb.next(Value::Byte(1)).unwrap();
        assert!(vb.next(Value::Byte(2)).is_err());
    }

    #[test]
    fn value_builder_leaf_then_compound_is_rejected() {
        let mut vb = ValueBuilder::new();
        vb.set(Value::Bool(true)).unwrap();
        assert!(vb.array_start(Type::Bool).is_err());
    }
}
