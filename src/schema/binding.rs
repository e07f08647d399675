//! Binding descriptors
//!
//! A binding tells the engine how one layout parameter resolves: a literal
//! constant, a one-way reference to another node's value, or a two-way
//! computation owned by the bound node (its on-wire value is produced by the
//! node, e.g. a self-measured length, and consumed on read to drive parsing).

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Direction of data flow for a bound parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingMode {
    /// Value flows from the target field into this parameter (read-only)
    OneWay,
    /// This node produces the target field's on-wire value, and reads it
    /// back during deserialization
    TwoWay,
}

/// Where a bound value comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BindingSource {
    /// Literal constant, no graph dependency
    Const(Value),
    /// Dotted path resolved in the parent's scope
    Path(String),
}

/// One resolvable layout parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub source: BindingSource,
    pub mode: BindingMode,
}

impl Binding {
    /// Literal constant binding
    pub fn constant(value: impl Into<Value>) -> Self {
        Self {
            source: BindingSource::Const(value.into()),
            mode: BindingMode::OneWay,
        }
    }

    /// One-way reference to another field
    pub fn read(path: &str) -> Self {
        Self {
            source: BindingSource::Path(path.to_string()),
            mode: BindingMode::OneWay,
        }
    }

    /// Two-way binding: this node computes the target field's wire value
    pub fn two_way(path: &str) -> Self {
        Self {
            source: BindingSource::Path(path.to_string()),
            mode: BindingMode::TwoWay,
        }
    }

    /// The literal value, if this binding is a constant
    pub fn const_value(&self) -> Option<&Value> {
        match &self.source {
            BindingSource::Const(v) => Some(v),
            BindingSource::Path(_) => None,
        }
    }

    /// The declared path, if this binding references another field
    pub fn path(&self) -> Option<&str> {
        match &self.source {
            BindingSource::Path(p) => Some(p),
            BindingSource::Const(_) => None,
        }
    }

    pub fn is_two_way(&self) -> bool {
        self.mode == BindingMode::TwoWay
    }
}

/// Conditional presence predicate: the field participates only when the
/// target's value equals `expected`. Multiple predicates are OR-ed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhenBinding {
    pub path: String,
    pub expected: Value,
}

/// Checksum family for computed fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputedKind {
    Crc32,
    Crc16,
    /// Single-byte wrapping sum
    Sum8,
}

/// Computed-field descriptor: every byte this node encodes is mirrored into
/// an accumulator, and `target` names the field that receives the finalized
/// value. The target must serialize after this node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedField {
    pub kind: ComputedKind,
    pub target: String,
}

/// The full binding-resolution table for one schema node, keyed by
/// parameter kind. Absent entries mean the parameter is default/unused.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindingSet {
    /// Encoded byte length of this field
    pub field_length: Option<Binding>,
    /// Encoded byte length of each collection element
    pub item_length: Option<Binding>,
    /// Element count of a collection
    pub field_count: Option<Binding>,
    /// Absolute stream offset this field is written at
    pub field_offset: Option<Binding>,
    /// Byte boundary this field aligns to
    pub alignment: Option<Binding>,
    /// Dynamic endianness override
    pub endianness: Option<Binding>,
    /// Dynamic text-encoding override
    pub encoding: Option<Binding>,
    /// Discriminator field for a polymorphic node
    pub subtype: Option<Binding>,
    /// Sentinel for a read-until collection
    pub termination: Option<Binding>,
    /// Conditional presence predicates (OR-ed)
    pub when: Vec<WhenBinding>,
    /// Checksum accumulated over this node's encoded bytes
    pub computed: Option<ComputedField>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_constructors() {
        let c = Binding::constant(4u32);
        assert_eq!(c.const_value(), Some(&Value::UInt(4)));
        assert_eq!(c.path(), None);
        assert!(!c.is_two_way());

        let t = Binding::two_way("length");
        assert_eq!(t.path(), Some("length"));
        assert!(t.const_value().is_none());
        assert!(t.is_two_way());
    }

    #[test]
    fn test_default_binding_set_is_empty() {
        let set = BindingSet::default();
        assert!(set.field_length.is_none());
        assert!(set.when.is_empty());
        assert!(set.computed.is_none());
    }
}
