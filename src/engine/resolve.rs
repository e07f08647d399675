//! Binding resolution
//!
//! Resolves every layout parameter against a specific value node: literal
//! constants evaluate immediately, cross-field paths navigate the tree in
//! the parent's scope, and two-way bindings attach deferred producers to
//! their targets at bind time. Producers evaluate strictly on demand, which
//! makes the walk re-entrant: measuring a field's length runs a full
//! dry-run serialize on the call stack.

use tracing::debug;

use crate::error::{CodecError, CodecResult};
use crate::schema::{Binding, BindingSource, Endianness, SchemaKind, SchemaNode, TextEncoding};
use crate::stream::{MeasureSink, WireStream};
use crate::value::Value;

use super::context::ContextFrame;
use super::{NodeId, NullNotifier, ValueGraph};

/// Which walk a resolution happens in. Write-phase resolution sees bound
/// (producer-computed) values; read-phase resolution sees only stored
/// values already populated by the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Write,
    Read,
}

/// Parameter a two-way producer computes for its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerKind {
    FieldLength,
    ItemLength,
    Count,
    Subtype,
    Termination,
    Computed,
}

/// Deferred computation attached to a target node at bind time
#[derive(Debug, Clone, Copy)]
pub struct BoundProducer {
    pub kind: ProducerKind,
    pub source: NodeId,
}

// ============================================================================
// Numeric helpers
// ============================================================================

/// Convert a resolved binding value to a 64-bit integer
pub fn numeric_value(value: &Value) -> CodecResult<u64> {
    value.as_u64().ok_or_else(|| CodecError::WrongValueKind {
        parameter: "numeric",
        expected: "unsigned integer",
        actual: value.kind_name(),
    })
}

/// Numeric value of a binding only when it is a literal constant.
///
/// Never forces graph evaluation, so it is safe to call while deciding
/// whether to wrap a stream before a length binding has been computed.
pub fn const_numeric(binding: &Binding) -> CodecResult<Option<u64>> {
    match binding.const_value() {
        Some(value) => Ok(Some(numeric_value(value)?)),
        None => Ok(None),
    }
}

fn binding_err(path: &str, reason: &str) -> CodecError {
    CodecError::Binding {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

impl ValueGraph {
    // ------------------------------------------------------------------------
    // Path lookup
    // ------------------------------------------------------------------------

    /// Navigate a dot-separated path from `from`, requiring exactly one
    /// name match at every segment.
    pub fn get_child(&self, from: NodeId, path: &str) -> CodecResult<NodeId> {
        if path.is_empty() {
            return Err(binding_err(path, "empty path"));
        }
        let mut current = from;
        for segment in path.split('.') {
            if segment.is_empty() {
                return Err(binding_err(path, "empty path segment"));
            }
            let mut matches = self.nodes[current]
                .children
                .iter()
                .copied()
                .filter(|&child| self.nodes[child].name.as_deref() == Some(segment));
            let first = matches.next();
            let second = matches.next();
            current = match (first, second) {
                (Some(id), None) => id,
                (None, _) => {
                    return Err(binding_err(
                        path,
                        &format!("no child named '{}'", segment),
                    ))
                }
                (Some(_), Some(_)) => {
                    return Err(binding_err(
                        path,
                        &format!("multiple children named '{}'", segment),
                    ))
                }
            };
        }
        Ok(current)
    }

    /// Binding paths resolve among siblings: the scope is the parent node.
    fn binding_scope(&self, id: NodeId, path: &str) -> CodecResult<NodeId> {
        self.nodes[id]
            .parent
            .ok_or_else(|| binding_err(path, "binding on the root has no sibling scope"))
    }

    // ------------------------------------------------------------------------
    // Value resolution
    // ------------------------------------------------------------------------

    pub(crate) fn resolve_binding(
        &mut self,
        id: NodeId,
        binding: &Binding,
        phase: Phase,
    ) -> CodecResult<Value> {
        match &binding.source {
            BindingSource::Const(value) => Ok(value.clone()),
            BindingSource::Path(path) => {
                let scope = self.binding_scope(id, path)?;
                let target = self.get_child(scope, path)?;
                match phase {
                    Phase::Write => self.effective_value(target),
                    Phase::Read => Ok(self.read_context_value(target)),
                }
            }
        }
    }

    /// The value a node puts on the wire: its attached producers'
    /// computation when bound two-way, otherwise its stored value.
    pub(crate) fn effective_value(&mut self, id: NodeId) -> CodecResult<Value> {
        match self.nodes[id].producers.first().copied() {
            Some(producer) => self.evaluate_producer(&producer),
            None => Ok(self.nodes[id].value.clone()),
        }
    }

    /// Read-phase view of a node through its lazy context: the stored value
    /// as already populated by the walk, memoized per walk.
    pub(crate) fn read_context_value(&mut self, id: NodeId) -> Value {
        if let Some(frame) = self.nodes[id].ctx.frame() {
            return frame.value.clone();
        }
        let value = self.snapshot(id);
        let (parent_value, parent_label) = match self.nodes[id].parent {
            Some(parent) => (
                Some(self.snapshot(parent)),
                Some(self.nodes[parent].schema.kind.label()),
            ),
            None => (None, None),
        };
        let frame = ContextFrame {
            value,
            parent_value,
            parent_label,
        };
        self.nodes[id].ctx.frame_or_insert(|| frame).value.clone()
    }

    /// OR-ed conditional predicates; an empty set always matches.
    pub(crate) fn when_matches(
        &mut self,
        id: NodeId,
        schema: &SchemaNode,
        phase: Phase,
    ) -> CodecResult<bool> {
        if schema.bindings.when.is_empty() {
            return Ok(true);
        }
        for predicate in &schema.bindings.when {
            let scope = self.binding_scope(id, &predicate.path)?;
            let target = self.get_child(scope, &predicate.path)?;
            let actual = match phase {
                Phase::Write => self.effective_value(target)?,
                Phase::Read => self.read_context_value(target),
            };
            if actual.loose_eq(&predicate.expected) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ------------------------------------------------------------------------
    // Length resolution
    // ------------------------------------------------------------------------

    /// Write-side byte ceiling: only literal constants qualify, since a
    /// path-bound length is computed from the node being written. A
    /// collection element falls back to its parent's literal item length.
    pub(crate) fn const_max_length(
        &self,
        id: NodeId,
        schema: &SchemaNode,
    ) -> CodecResult<Option<u64>> {
        if let Some(binding) = &schema.bindings.field_length {
            if let Some(n) = const_numeric(binding)? {
                return Ok(Some(n));
            }
        }
        if let Some(parent) = self.nodes[id].parent {
            let parent_schema = &self.nodes[parent].schema;
            if parent_schema.kind.is_collection() {
                if let Some(binding) = &parent_schema.bindings.item_length {
                    if let Some(n) = const_numeric(binding)? {
                        return Ok(Some(n));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Read-side byte ceiling: the length binding's resolved value, else the
    /// parent's resolved item length when that value is a plain numeric
    /// primitive (non-numeric per-item results are skipped, not errors).
    pub(crate) fn read_length(
        &mut self,
        id: NodeId,
        schema: &SchemaNode,
    ) -> CodecResult<Option<u64>> {
        if let Some(binding) = &schema.bindings.field_length {
            let value = self.resolve_binding(id, binding, Phase::Read)?;
            return Ok(Some(numeric_value(&value)?));
        }
        if let Some(parent) = self.nodes[id].parent {
            let parent_schema = self.nodes[parent].schema.clone();
            if parent_schema.kind.is_collection() {
                if let Some(binding) = &parent_schema.bindings.item_length {
                    let value = self.resolve_binding(parent, binding, Phase::Read)?;
                    if matches!(value, Value::UInt(_) | Value::Int(_)) {
                        return Ok(Some(numeric_value(&value)?));
                    }
                }
            }
        }
        Ok(None)
    }

    pub(crate) fn alignment_boundary(
        &mut self,
        id: NodeId,
        schema: &SchemaNode,
        phase: Phase,
    ) -> CodecResult<Option<u64>> {
        match &schema.bindings.alignment {
            Some(binding) => Ok(Some(numeric_value(
                &self.resolve_binding(id, binding, phase)?,
            )?)),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------------
    // Endianness & encoding inheritance
    // ------------------------------------------------------------------------

    /// Literal on this node, else its bound value, else the parent's
    /// resolution, else the process default.
    pub(crate) fn resolved_endianness(
        &mut self,
        id: NodeId,
        phase: Phase,
    ) -> CodecResult<Endianness> {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let schema = self.nodes[node_id].schema.clone();
            if let Some(endianness) = schema.endianness {
                return Ok(endianness);
            }
            if let Some(binding) = &schema.bindings.endianness {
                let value = self.resolve_binding(node_id, binding, phase)?;
                return Endianness::from_value(&value);
            }
            current = self.nodes[node_id].parent;
        }
        Ok(self.default_endianness)
    }

    pub(crate) fn resolved_encoding(
        &mut self,
        id: NodeId,
        phase: Phase,
    ) -> CodecResult<TextEncoding> {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let schema = self.nodes[node_id].schema.clone();
            if let Some(encoding) = schema.encoding {
                return Ok(encoding);
            }
            if let Some(binding) = &schema.bindings.encoding {
                let value = self.resolve_binding(node_id, binding, phase)?;
                return TextEncoding::from_value(&value);
            }
            current = self.nodes[node_id].parent;
        }
        Ok(self.default_encoding)
    }

    // ------------------------------------------------------------------------
    // Producer attachment (bind)
    // ------------------------------------------------------------------------

    pub(crate) fn attach_producers(&mut self, id: NodeId, schema: &SchemaNode) -> CodecResult<()> {
        let kind_label = schema.kind.label();

        if let Some(binding) = &schema.bindings.field_length {
            if binding.is_two_way() {
                self.attach(id, binding, ProducerKind::FieldLength)?;
            }
        }
        if let Some(binding) = &schema.bindings.item_length {
            if binding.is_two_way() {
                if !schema.kind.is_collection() {
                    return Err(CodecError::Unsupported {
                        operation: "item-length binding",
                        kind: kind_label,
                    });
                }
                self.attach(id, binding, ProducerKind::ItemLength)?;
            }
        }
        if let Some(binding) = &schema.bindings.field_count {
            if binding.is_two_way() {
                if !schema.kind.is_collection() {
                    return Err(CodecError::Unsupported {
                        operation: "count binding",
                        kind: kind_label,
                    });
                }
                self.attach(id, binding, ProducerKind::Count)?;
            }
        }
        if let Some(binding) = &schema.bindings.subtype {
            if !schema.kind.is_union() {
                return Err(CodecError::Unsupported {
                    operation: "subtype binding",
                    kind: kind_label,
                });
            }
            if binding.is_two_way() {
                // A present value with no registered discriminator is a
                // schema defect; surface it now rather than mid-write. An
                // absent value defers to producer evaluation.
                if let Some(key) = self.nodes[id].type_key.clone() {
                    self.subtype_tag(&schema.kind, &key)?;
                }
                self.attach(id, binding, ProducerKind::Subtype)?;
            }
        }
        if let Some(binding) = &schema.bindings.termination {
            if !matches!(schema.kind, SchemaKind::TerminatedSequence(_)) {
                return Err(CodecError::Unsupported {
                    operation: "termination binding",
                    kind: kind_label,
                });
            }
            if binding.is_two_way() {
                self.attach(id, binding, ProducerKind::Termination)?;
            }
        }
        if let Some(computed) = &schema.bindings.computed {
            let scope = self.binding_scope(id, &computed.target)?;
            let target = self.get_child(scope, &computed.target)?;
            self.nodes[target].producers.push(BoundProducer {
                kind: ProducerKind::Computed,
                source: id,
            });
        }
        Ok(())
    }

    fn attach(&mut self, id: NodeId, binding: &Binding, kind: ProducerKind) -> CodecResult<()> {
        let path = binding.path().ok_or_else(|| {
            CodecError::InvalidData("two-way binding requires a path".to_string())
        })?;
        let scope = self.binding_scope(id, path)?;
        let target = self.get_child(scope, path)?;
        debug!(source = id, target, ?kind, path, "attached two-way producer");
        self.nodes[target].producers.push(BoundProducer { kind, source: id });
        Ok(())
    }

    /// Discriminator registered for a concrete-case key
    pub(crate) fn subtype_tag(&self, kind: &SchemaKind, key: &str) -> CodecResult<Value> {
        let cases = match kind {
            SchemaKind::Union(cases) => cases,
            other => {
                return Err(CodecError::Unsupported {
                    operation: "subtype lookup",
                    kind: other.label(),
                })
            }
        };
        let case = cases
            .iter()
            .find(|c| c.key == key)
            .ok_or_else(|| CodecError::UnknownSubtype {
                key: key.to_string(),
            })?;
        case.tag.clone().ok_or_else(|| CodecError::UnknownSubtype {
            key: key.to_string(),
        })
    }

    // ------------------------------------------------------------------------
    // Producer evaluation
    // ------------------------------------------------------------------------

    pub(crate) fn evaluate_producer(&mut self, producer: &BoundProducer) -> CodecResult<Value> {
        let source = producer.source;
        match producer.kind {
            ProducerKind::FieldLength => Ok(Value::UInt(self.measure(source)?)),
            ProducerKind::ItemLength => {
                let schema = self.nodes[source].schema.clone();
                if !schema.kind.is_collection() {
                    return Err(CodecError::Unsupported {
                        operation: "item-length measurement",
                        kind: schema.kind.label(),
                    });
                }
                let children = self.nodes[source].children.clone();
                let mut lengths = Vec::with_capacity(children.len());
                for child in children {
                    lengths.push(Value::UInt(self.measure(child)?));
                }
                Ok(Value::List(lengths))
            }
            ProducerKind::Count => {
                let schema = self.nodes[source].schema.clone();
                if !schema.kind.is_collection() {
                    return Err(CodecError::Unsupported {
                        operation: "element count",
                        kind: schema.kind.label(),
                    });
                }
                Ok(Value::UInt(self.nodes[source].children.len() as u64))
            }
            ProducerKind::Subtype => {
                let schema = self.nodes[source].schema.clone();
                let key = self.nodes[source]
                    .type_key
                    .clone()
                    .ok_or(CodecError::AbsentSubtypeValue)?;
                self.subtype_tag(&schema.kind, &key)
            }
            ProducerKind::Termination => {
                let last = self.nodes[source].children.last().copied().ok_or_else(|| {
                    CodecError::InvalidData(
                        "terminated collection has no last element".to_string(),
                    )
                })?;
                Ok(self.snapshot(last))
            }
            ProducerKind::Computed => self.nodes[source].ctx.finalize().ok_or_else(|| {
                CodecError::InvalidData(
                    "computed value requested before its source was encoded".to_string(),
                )
            }),
        }
    }

    /// Default self-measurement: a full unaligned serialize into a discard
    /// sink, returning the sink's final relative position.
    pub(crate) fn measure(&mut self, id: NodeId) -> CodecResult<u64> {
        let mut sink = MeasureSink::new();
        let mut notifier = NullNotifier;
        self.serialize_node(id, &mut sink, &mut notifier, false)?;
        Ok(sink.relative_position())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ValueGraph;
    use crate::schema::{FieldSchema, PrimitiveType, SchemaNode};

    fn two_level_graph() -> ValueGraph {
        let schema = SchemaNode::record(vec![FieldSchema::new(
            "a",
            SchemaNode::record(vec![FieldSchema::new(
                "b",
                SchemaNode::primitive(PrimitiveType::U8),
            )]),
        )])
        .shared();
        let value = Value::Record(vec![(
            "a".to_string(),
            Value::Record(vec![("b".to_string(), Value::UInt(42))]),
        )]);
        ValueGraph::from_value(schema, value).unwrap()
    }

    // -------------------------------------------------------------------------
    // Path lookup
    // -------------------------------------------------------------------------

    #[test]
    fn test_get_child_dotted_path() {
        let graph = two_level_graph();
        let b = graph.get_child(graph.root(), "a.b").unwrap();
        assert_eq!(graph.node(b).value(), &Value::UInt(42));
    }

    #[test]
    fn test_get_child_empty_path_fails() {
        let graph = two_level_graph();
        assert!(matches!(
            graph.get_child(graph.root(), ""),
            Err(CodecError::Binding { .. })
        ));
    }

    #[test]
    fn test_get_child_missing_segment_fails() {
        let graph = two_level_graph();
        assert!(matches!(
            graph.get_child(graph.root(), "a.zzz"),
            Err(CodecError::Binding { .. })
        ));
    }

    #[test]
    fn test_get_child_ambiguous_name_fails() {
        // Two fields named "b" under "a"
        let schema = SchemaNode::record(vec![FieldSchema::new(
            "a",
            SchemaNode::record(vec![
                FieldSchema::new("b", SchemaNode::primitive(PrimitiveType::U8)),
                FieldSchema::new("b", SchemaNode::primitive(PrimitiveType::U8)),
            ]),
        )])
        .shared();
        let graph = ValueGraph::shell(schema);
        let err = graph.get_child(graph.root(), "a.b").unwrap_err();
        assert!(matches!(err, CodecError::Binding { .. }));
    }

    // -------------------------------------------------------------------------
    // Numeric helpers
    // -------------------------------------------------------------------------

    #[test]
    fn test_numeric_value_conversions() {
        assert_eq!(numeric_value(&Value::UInt(9)).unwrap(), 9);
        assert_eq!(numeric_value(&Value::Int(9)).unwrap(), 9);
        assert!(matches!(
            numeric_value(&Value::Str("9".into())),
            Err(CodecError::WrongValueKind { .. })
        ));
    }

    #[test]
    fn test_const_numeric_ignores_paths() {
        assert_eq!(const_numeric(&Binding::constant(4u32)).unwrap(), Some(4));
        assert_eq!(const_numeric(&Binding::read("len")).unwrap(), None);
        assert!(const_numeric(&Binding::constant("x")).is_err());
    }

    // -------------------------------------------------------------------------
    // Bind-time validation
    // -------------------------------------------------------------------------

    #[test]
    fn test_count_binding_on_primitive_fails_bind() {
        let schema = SchemaNode::record(vec![
            FieldSchema::new("n", SchemaNode::primitive(PrimitiveType::U8)),
            FieldSchema::new(
                "x",
                SchemaNode::primitive(PrimitiveType::U8).with_count(Binding::two_way("n")),
            ),
        ])
        .shared();
        let mut graph = ValueGraph::shell(schema);
        let err = graph.bind().unwrap_err();
        assert!(matches!(
            err.root_cause(),
            CodecError::Unsupported { .. }
        ));
    }

    #[test]
    fn test_bind_is_idempotent() {
        let schema = SchemaNode::record(vec![
            FieldSchema::new("length", SchemaNode::primitive(PrimitiveType::U8)),
            FieldSchema::new(
                "payload",
                SchemaNode::bytes().with_length(Binding::two_way("length")),
            ),
        ])
        .shared();
        let mut graph = ValueGraph::shell(schema);
        graph.bind().unwrap();
        graph.bind().unwrap();
        let length = graph.get_child(graph.root(), "length").unwrap();
        assert_eq!(graph.node(length).producers.len(), 1);
    }

    // -------------------------------------------------------------------------
    // Measurement
    // -------------------------------------------------------------------------

    #[test]
    fn test_measure_nested_record() {
        let schema = SchemaNode::record(vec![
            FieldSchema::new("a", SchemaNode::primitive(PrimitiveType::U32)),
            FieldSchema::new("b", SchemaNode::primitive(PrimitiveType::U16)),
        ])
        .shared();
        let value = Value::Record(vec![
            ("a".to_string(), Value::UInt(1)),
            ("b".to_string(), Value::UInt(2)),
        ]);
        let mut graph = ValueGraph::from_value(schema, value).unwrap();
        graph.bind().unwrap();
        let measured = graph.measure(graph.root()).unwrap();
        assert_eq!(measured, 6);
    }

    #[test]
    fn test_item_length_producer_yields_per_element_lengths() {
        let schema = SchemaNode::record(vec![
            FieldSchema::new("ilen", SchemaNode::primitive(PrimitiveType::U8)),
            FieldSchema::new(
                "items",
                SchemaNode::sequence(SchemaNode::primitive(PrimitiveType::U16))
                    .with_item_length(Binding::two_way("ilen")),
            ),
        ])
        .shared();
        let value = Value::Record(vec![
            ("ilen".to_string(), Value::Null),
            (
                "items".to_string(),
                Value::List(vec![Value::UInt(1), Value::UInt(2)]),
            ),
        ]);
        let mut graph = ValueGraph::from_value(schema, value).unwrap();
        graph.bind().unwrap();

        let ilen = graph.get_child(graph.root(), "ilen").unwrap();
        let producer = graph.node(ilen).producers[0];
        assert_eq!(producer.kind, ProducerKind::ItemLength);
        let lengths = graph.evaluate_producer(&producer).unwrap();
        assert_eq!(
            lengths,
            Value::List(vec![Value::UInt(2), Value::UInt(2)])
        );
    }

    #[test]
    fn test_termination_producer_returns_last_element() {
        let schema = SchemaNode::record(vec![
            FieldSchema::new("last", SchemaNode::primitive(PrimitiveType::U8)),
            FieldSchema::new(
                "items",
                SchemaNode::terminated_sequence(SchemaNode::primitive(PrimitiveType::U8))
                    .with_termination(Binding::two_way("last")),
            ),
        ])
        .shared();
        let value = Value::Record(vec![
            ("last".to_string(), Value::Null),
            (
                "items".to_string(),
                Value::List(vec![Value::UInt(7), Value::UInt(0)]),
            ),
        ]);
        let mut graph = ValueGraph::from_value(schema, value).unwrap();
        graph.bind().unwrap();

        let last = graph.get_child(graph.root(), "last").unwrap();
        let producer = graph.node(last).producers[0];
        assert_eq!(
            graph.evaluate_producer(&producer).unwrap(),
            Value::UInt(0)
        );
    }

    // -------------------------------------------------------------------------
    // Inheritance
    // -------------------------------------------------------------------------

    #[test]
    fn test_wrong_kind_bound_endianness_fails() {
        let schema = SchemaNode::record(vec![
            FieldSchema::new("e", SchemaNode::primitive(PrimitiveType::U8)),
            FieldSchema::new(
                "word",
                SchemaNode::primitive(PrimitiveType::U16)
                    .with_bound_endianness(Binding::read("e")),
            ),
        ])
        .shared();
        let value = Value::Record(vec![
            ("e".to_string(), Value::UInt(1)),
            ("word".to_string(), Value::UInt(2)),
        ]);
        let mut graph = ValueGraph::from_value(schema, value).unwrap();
        graph.bind().unwrap();
        let mut stream = crate::stream::ByteStream::new();
        let err = graph
            .serialize(&mut stream, &mut NullNotifier)
            .unwrap_err();
        assert!(matches!(
            err.root_cause(),
            CodecError::WrongValueKind { .. }
        ));
    }
}
