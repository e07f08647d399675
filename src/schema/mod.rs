//! Schema Module - Static Layout Descriptions
//!
//! A schema is an immutable tree of `SchemaNode`s describing a data shape:
//! field order, primitive widths, lengths, counts, offsets, alignment,
//! endianness, text encoding, conditional presence, polymorphic subtypes,
//! and computed fields. Schema nodes are constructed once, shared by
//! reference (`Arc`) across every value tree of that type, and never
//! mutated by the engine.

mod binding;

pub use binding::{
    Binding, BindingMode, BindingSet, BindingSource, ComputedField, ComputedKind, WhenBinding,
};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

// ============================================================================
// Primitives
// ============================================================================

/// Primitive types supported in schemas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl PrimitiveType {
    /// Size in bytes
    pub fn size(&self) -> usize {
        match self {
            PrimitiveType::Bool | PrimitiveType::U8 | PrimitiveType::I8 => 1,
            PrimitiveType::U16 | PrimitiveType::I16 => 2,
            PrimitiveType::U32 | PrimitiveType::I32 | PrimitiveType::F32 => 4,
            PrimitiveType::U64 | PrimitiveType::I64 | PrimitiveType::F64 => 8,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            PrimitiveType::I8 | PrimitiveType::I16 | PrimitiveType::I32 | PrimitiveType::I64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, PrimitiveType::F32 | PrimitiveType::F64)
    }
}

// ============================================================================
// Endianness & text encoding
// ============================================================================

/// Byte order for multi-byte values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Endianness {
    /// Big-endian (network byte order)
    Big,
    /// Little-endian
    #[default]
    Little,
}

impl Endianness {
    #[inline]
    pub fn is_little(self) -> bool {
        matches!(self, Endianness::Little)
    }

    /// Parse a dynamically bound endianness value. Bound overrides must be
    /// strings naming the byte order; anything else is the wrong kind.
    pub fn from_value(value: &Value) -> CodecResult<Self> {
        match value {
            Value::Str(s) => match s.to_ascii_lowercase().as_str() {
                "big" | "be" => Ok(Endianness::Big),
                "little" | "le" => Ok(Endianness::Little),
                other => Err(CodecError::InvalidData(format!(
                    "unknown endianness '{}'",
                    other
                ))),
            },
            other => Err(CodecError::WrongValueKind {
                parameter: "endianness",
                expected: "string",
                actual: other.kind_name(),
            }),
        }
    }
}

/// Character encoding for text fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Ascii,
    Utf16Le,
    Utf16Be,
}

impl TextEncoding {
    /// Size of one code unit in bytes
    pub fn unit_size(self) -> usize {
        match self {
            TextEncoding::Utf8 | TextEncoding::Ascii => 1,
            TextEncoding::Utf16Le | TextEncoding::Utf16Be => 2,
        }
    }

    /// Parse a dynamically bound encoding value
    pub fn from_value(value: &Value) -> CodecResult<Self> {
        match value {
            Value::Str(s) => match s.to_ascii_lowercase().as_str() {
                "utf8" | "utf-8" => Ok(TextEncoding::Utf8),
                "ascii" => Ok(TextEncoding::Ascii),
                "utf16le" | "utf-16le" => Ok(TextEncoding::Utf16Le),
                "utf16be" | "utf-16be" => Ok(TextEncoding::Utf16Be),
                other => Err(CodecError::InvalidData(format!(
                    "unknown text encoding '{}'",
                    other
                ))),
            },
            other => Err(CodecError::WrongValueKind {
                parameter: "encoding",
                expected: "string",
                actual: other.kind_name(),
            }),
        }
    }

    /// Encode a string into bytes
    pub fn encode(self, text: &str) -> CodecResult<Vec<u8>> {
        match self {
            TextEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
            TextEncoding::Ascii => {
                if !text.is_ascii() {
                    return Err(CodecError::InvalidData(format!(
                        "non-ASCII text in ASCII field: {:?}",
                        text
                    )));
                }
                Ok(text.as_bytes().to_vec())
            }
            TextEncoding::Utf16Le => Ok(text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()),
            TextEncoding::Utf16Be => Ok(text.encode_utf16().flat_map(|u| u.to_be_bytes()).collect()),
        }
    }

    /// Decode bytes into a string
    pub fn decode(self, bytes: &[u8]) -> CodecResult<String> {
        match self {
            TextEncoding::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|e| CodecError::InvalidData(format!("invalid UTF-8 string: {}", e))),
            TextEncoding::Ascii => {
                if !bytes.is_ascii() {
                    return Err(CodecError::InvalidData(
                        "non-ASCII byte in ASCII field".to_string(),
                    ));
                }
                Ok(bytes.iter().map(|&b| b as char).collect())
            }
            TextEncoding::Utf16Le | TextEncoding::Utf16Be => {
                if bytes.len() % 2 != 0 {
                    return Err(CodecError::InvalidData(
                        "odd byte count in UTF-16 field".to_string(),
                    ));
                }
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| {
                        let pair = [c[0], c[1]];
                        if self == TextEncoding::Utf16Le {
                            u16::from_le_bytes(pair)
                        } else {
                            u16::from_be_bytes(pair)
                        }
                    })
                    .collect();
                String::from_utf16(&units)
                    .map_err(|e| CodecError::InvalidData(format!("invalid UTF-16 string: {}", e)))
            }
        }
    }
}

// ============================================================================
// Schema nodes
// ============================================================================

/// A named field inside a record schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub schema: Arc<SchemaNode>,
}

impl FieldSchema {
    pub fn new(name: &str, schema: SchemaNode) -> Self {
        Self {
            name: name.to_string(),
            schema: Arc::new(schema),
        }
    }

    pub fn shared(name: &str, schema: Arc<SchemaNode>) -> Self {
        Self {
            name: name.to_string(),
            schema,
        }
    }
}

/// One concrete case of a polymorphic node.
///
/// `tag` is the on-wire discriminator for this case. A case may be
/// constructible but carry no tag; binding a value of that type then fails
/// subtype resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtypeCase {
    pub key: String,
    pub tag: Option<Value>,
    pub schema: Arc<SchemaNode>,
}

impl SubtypeCase {
    pub fn new(key: &str, tag: impl Into<Value>, schema: SchemaNode) -> Self {
        Self {
            key: key.to_string(),
            tag: Some(tag.into()),
            schema: Arc::new(schema),
        }
    }

    /// A case with no registered discriminator
    pub fn untagged(key: &str, schema: SchemaNode) -> Self {
        Self {
            key: key.to_string(),
            tag: None,
            schema: Arc::new(schema),
        }
    }
}

/// The closed set of node kinds the engine dispatches over
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SchemaKind {
    Primitive(PrimitiveType),
    /// Raw byte run, length-driven
    Bytes,
    /// Encoded string; `zero_terminated` reads/writes a NUL code unit
    Text { zero_terminated: bool },
    /// Ordered named fields
    Record(Vec<FieldSchema>),
    /// Count- or length-driven collection
    Sequence(Arc<SchemaNode>),
    /// Collection read until a sentinel element
    TerminatedSequence(Arc<SchemaNode>),
    /// Polymorphic node selecting a concrete case by discriminator
    Union(Vec<SubtypeCase>),
}

impl SchemaKind {
    /// Short label, used to name unnamed (root) nodes in errors
    pub fn label(&self) -> &'static str {
        match self {
            SchemaKind::Primitive(PrimitiveType::Bool) => "bool",
            SchemaKind::Primitive(PrimitiveType::U8) => "u8",
            SchemaKind::Primitive(PrimitiveType::U16) => "u16",
            SchemaKind::Primitive(PrimitiveType::U32) => "u32",
            SchemaKind::Primitive(PrimitiveType::U64) => "u64",
            SchemaKind::Primitive(PrimitiveType::I8) => "i8",
            SchemaKind::Primitive(PrimitiveType::I16) => "i16",
            SchemaKind::Primitive(PrimitiveType::I32) => "i32",
            SchemaKind::Primitive(PrimitiveType::I64) => "i64",
            SchemaKind::Primitive(PrimitiveType::F32) => "f32",
            SchemaKind::Primitive(PrimitiveType::F64) => "f64",
            SchemaKind::Bytes => "bytes",
            SchemaKind::Text { .. } => "text",
            SchemaKind::Record(_) => "record",
            SchemaKind::Sequence(_) => "sequence",
            SchemaKind::TerminatedSequence(_) => "terminated-sequence",
            SchemaKind::Union(_) => "union",
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            SchemaKind::Sequence(_) | SchemaKind::TerminatedSequence(_)
        )
    }

    pub fn is_union(&self) -> bool {
        matches!(self, SchemaKind::Union(_))
    }
}

/// Static, shared description of one field/type's layout rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaNode {
    pub kind: SchemaKind,
    pub bindings: BindingSet,
    /// Literal endianness override; `None` inherits from the parent
    pub endianness: Option<Endianness>,
    /// Literal encoding override; `None` inherits from the parent
    pub encoding: Option<TextEncoding>,
    /// Ignored fields produce and consume no bytes
    pub ignored: bool,
}

impl SchemaNode {
    fn with_kind(kind: SchemaKind) -> Self {
        Self {
            kind,
            bindings: BindingSet::default(),
            endianness: None,
            encoding: None,
            ignored: false,
        }
    }

    pub fn primitive(ptype: PrimitiveType) -> Self {
        Self::with_kind(SchemaKind::Primitive(ptype))
    }

    pub fn bytes() -> Self {
        Self::with_kind(SchemaKind::Bytes)
    }

    pub fn text() -> Self {
        Self::with_kind(SchemaKind::Text {
            zero_terminated: false,
        })
    }

    /// NUL-terminated text
    pub fn text_z() -> Self {
        Self::with_kind(SchemaKind::Text {
            zero_terminated: true,
        })
    }

    pub fn record(fields: Vec<FieldSchema>) -> Self {
        Self::with_kind(SchemaKind::Record(fields))
    }

    pub fn sequence(element: SchemaNode) -> Self {
        Self::with_kind(SchemaKind::Sequence(Arc::new(element)))
    }

    pub fn terminated_sequence(element: SchemaNode) -> Self {
        Self::with_kind(SchemaKind::TerminatedSequence(Arc::new(element)))
    }

    pub fn union(cases: Vec<SubtypeCase>) -> Self {
        Self::with_kind(SchemaKind::Union(cases))
    }

    // ------------------------------------------------------------------------
    // Builder-style binding attachment
    // ------------------------------------------------------------------------

    pub fn with_length(mut self, binding: Binding) -> Self {
        self.bindings.field_length = Some(binding);
        self
    }

    pub fn with_item_length(mut self, binding: Binding) -> Self {
        self.bindings.item_length = Some(binding);
        self
    }

    pub fn with_count(mut self, binding: Binding) -> Self {
        self.bindings.field_count = Some(binding);
        self
    }

    pub fn with_offset(mut self, binding: Binding) -> Self {
        self.bindings.field_offset = Some(binding);
        self
    }

    pub fn with_alignment(mut self, binding: Binding) -> Self {
        self.bindings.alignment = Some(binding);
        self
    }

    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = Some(endianness);
        self
    }

    pub fn with_bound_endianness(mut self, binding: Binding) -> Self {
        self.bindings.endianness = Some(binding);
        self
    }

    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn with_bound_encoding(mut self, binding: Binding) -> Self {
        self.bindings.encoding = Some(binding);
        self
    }

    pub fn with_subtype(mut self, binding: Binding) -> Self {
        self.bindings.subtype = Some(binding);
        self
    }

    pub fn with_termination(mut self, binding: Binding) -> Self {
        self.bindings.termination = Some(binding);
        self
    }

    /// Serialize/deserialize this field only when the target equals `expected`
    pub fn when(mut self, path: &str, expected: impl Into<Value>) -> Self {
        self.bindings.when.push(WhenBinding {
            path: path.to_string(),
            expected: expected.into(),
        });
        self
    }

    pub fn with_computed(mut self, kind: ComputedKind, target: &str) -> Self {
        self.bindings.computed = Some(ComputedField {
            kind,
            target: target.to_string(),
        });
        self
    }

    pub fn ignored(mut self) -> Self {
        self.ignored = true;
        self
    }

    /// Finish building and share
    pub fn shared(self) -> Arc<SchemaNode> {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_sizes() {
        assert_eq!(PrimitiveType::U8.size(), 1);
        assert_eq!(PrimitiveType::U32.size(), 4);
        assert_eq!(PrimitiveType::F64.size(), 8);
        assert!(PrimitiveType::I16.is_signed());
        assert!(PrimitiveType::F32.is_float());
    }

    #[test]
    fn test_endianness_from_value() {
        assert_eq!(
            Endianness::from_value(&Value::Str("big".into())).unwrap(),
            Endianness::Big
        );
        assert_eq!(
            Endianness::from_value(&Value::Str("LE".into())).unwrap(),
            Endianness::Little
        );
        assert!(matches!(
            Endianness::from_value(&Value::UInt(1)),
            Err(CodecError::WrongValueKind { .. })
        ));
    }

    #[test]
    fn test_text_encoding_roundtrip() {
        let enc = TextEncoding::Utf16Be;
        let bytes = enc.encode("hi").unwrap();
        assert_eq!(bytes, vec![0x00, b'h', 0x00, b'i']);
        assert_eq!(enc.decode(&bytes).unwrap(), "hi");
    }

    #[test]
    fn test_ascii_rejects_non_ascii() {
        assert!(TextEncoding::Ascii.encode("héllo").is_err());
        assert!(TextEncoding::Ascii.decode(&[0x80]).is_err());
    }

    #[test]
    fn test_builder_attaches_bindings() {
        let schema = SchemaNode::bytes()
            .with_length(Binding::two_way("length"))
            .when("flag", 1u8);
        assert!(schema.bindings.field_length.as_ref().unwrap().is_two_way());
        assert_eq!(schema.bindings.when.len(), 1);
        assert_eq!(schema.kind.label(), "bytes");
    }

    #[test]
    fn test_kind_labels_and_capabilities() {
        assert!(SchemaNode::sequence(SchemaNode::primitive(PrimitiveType::U8))
            .kind
            .is_collection());
        assert!(SchemaNode::union(vec![]).kind.is_union());
        assert!(!SchemaNode::text().kind.is_collection());
    }
}
