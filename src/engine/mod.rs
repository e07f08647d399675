//! Value Node Engine
//!
//! The runtime heart of the codec: a tree of value nodes, one per
//! field/member instance, each linked to its shared schema node. The engine
//! resolves every layout parameter (length, count, offset, alignment,
//! endianness, encoding, subtype, termination, conditional presence) to a
//! constant, a cross-field reference, or a deferred computation, and drives
//! the recursive serialize/deserialize walk with stream scoping and
//! per-field error attribution.
//!
//! The tree is arena-owned: nodes live in a flat `Vec`, children are index
//! lists, and the parent back-reference is an index lookup, never an owning
//! pointer.

mod context;
mod resolve;
mod variant;

pub use context::{ContextFrame, LazyContext};
pub use resolve::{const_numeric, numeric_value, BoundProducer, ProducerKind};

use std::sync::Arc;

use tracing::trace;

use crate::error::{CodecError, CodecResult};
use crate::schema::{Endianness, SchemaKind, SchemaNode, TextEncoding};
use crate::stream::{align, with_saved_position, BoundedStream, ByteStream, TapStream, WireStream};
use crate::value::Value;

use resolve::Phase;

/// Index of a node in the graph arena
pub type NodeId = usize;

// ============================================================================
// Notifier boundary
// ============================================================================

/// Opaque progress sink handed through the walk. The engine forwards it
/// down the recursion and never inspects it.
pub trait Notifier {
    fn enter(&mut self, _name: &str, _position: u64) {}
    fn leave(&mut self, _name: &str, _position: u64) {}
}

/// Notifier that drops every event
pub struct NullNotifier;

impl Notifier for NullNotifier {}

// ============================================================================
// Value nodes
// ============================================================================

/// One runtime value node, linked to its schema node
pub struct ValueNode {
    pub(crate) name: Option<String>,
    pub(crate) schema: Arc<SchemaNode>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) value: Value,
    /// Concrete-case key for union nodes
    pub(crate) type_key: Option<String>,
    /// Deferred producers attached by two-way bindings at bind time
    pub(crate) producers: Vec<BoundProducer>,
    /// Set once a serialize or deserialize traversal has processed the node
    pub(crate) visited: bool,
    pub(crate) ctx: LazyContext,
}

impl ValueNode {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn schema(&self) -> &Arc<SchemaNode> {
        &self.schema
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn type_key(&self) -> Option<&str> {
        self.type_key.as_deref()
    }

    pub fn visited(&self) -> bool {
        self.visited
    }

    /// Field name, or the schema kind label for unnamed (root) nodes
    pub(crate) fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.schema.kind.label().to_string())
    }
}

// ============================================================================
// Value graph
// ============================================================================

/// Arena-owned tree of value nodes plus the walk entry points
pub struct ValueGraph {
    pub(crate) nodes: Vec<ValueNode>,
    root: NodeId,
    pub(crate) default_endianness: Endianness,
    pub(crate) default_encoding: TextEncoding,
}

impl ValueGraph {
    fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            root: 0,
            default_endianness: Endianness::default(),
            default_encoding: TextEncoding::default(),
        }
    }

    /// Build a value tree from a runtime value and its schema
    pub fn from_value(schema: Arc<SchemaNode>, value: Value) -> CodecResult<Self> {
        let mut graph = Self::empty();
        let root = graph.build_node(None, schema, None, value)?;
        graph.root = root;
        Ok(graph)
    }

    /// Build an empty shell tree ready for deserialization
    pub fn shell(schema: Arc<SchemaNode>) -> Self {
        let mut graph = Self::empty();
        let root = graph.build_shell(None, schema, None);
        graph.root = root;
        graph
    }

    /// Process-level endianness applied where no node resolves one
    pub fn with_default_endianness(mut self, endianness: Endianness) -> Self {
        self.default_endianness = endianness;
        self
    }

    /// Process-level text encoding applied where no node resolves one
    pub fn with_default_encoding(mut self, encoding: TextEncoding) -> Self {
        self.default_encoding = encoding;
        self
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &ValueNode {
        &self.nodes[id]
    }

    /// Finalized computed value accumulated over a node's encoded bytes,
    /// if that node carries a computed-field descriptor and has been walked
    pub fn computed_value(&self, id: NodeId) -> Option<Value> {
        self.nodes[id].ctx.finalize()
    }

    // ------------------------------------------------------------------------
    // Construction internals
    // ------------------------------------------------------------------------

    pub(crate) fn push_node(
        &mut self,
        name: Option<String>,
        schema: Arc<SchemaNode>,
        parent: Option<NodeId>,
    ) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(ValueNode {
            name,
            schema,
            parent,
            children: Vec::new(),
            value: Value::Null,
            type_key: None,
            producers: Vec::new(),
            visited: false,
            ctx: LazyContext::default(),
        });
        id
    }

    fn build_node(
        &mut self,
        name: Option<String>,
        schema: Arc<SchemaNode>,
        parent: Option<NodeId>,
        value: Value,
    ) -> CodecResult<NodeId> {
        let id = self.push_node(name, schema.clone(), parent);
        match (&schema.kind, value) {
            (SchemaKind::Record(fields), Value::Record(mut entries)) => {
                let mut used = vec![false; entries.len()];
                for field in fields {
                    let mut picked = Value::Null;
                    for (i, (entry_name, entry_value)) in entries.iter_mut().enumerate() {
                        if !used[i] && entry_name == &field.name {
                            used[i] = true;
                            picked = std::mem::replace(entry_value, Value::Null);
                            break;
                        }
                    }
                    let child = self.build_node(
                        Some(field.name.clone()),
                        field.schema.clone(),
                        Some(id),
                        picked,
                    )?;
                    self.nodes[id].children.push(child);
                }
            }
            (SchemaKind::Record(fields), Value::Null) => {
                for field in fields {
                    let child = self.build_node(
                        Some(field.name.clone()),
                        field.schema.clone(),
                        Some(id),
                        Value::Null,
                    )?;
                    self.nodes[id].children.push(child);
                }
            }
            (
                SchemaKind::Sequence(element) | SchemaKind::TerminatedSequence(element),
                Value::List(items),
            ) => {
                for item in items {
                    let child = self.build_node(None, element.clone(), Some(id), item)?;
                    self.nodes[id].children.push(child);
                }
            }
            (SchemaKind::Sequence(_) | SchemaKind::TerminatedSequence(_), Value::Null) => {}
            (SchemaKind::Union(cases), Value::Tagged(key, inner)) => {
                let case = cases.iter().find(|c| c.key == key).cloned().ok_or_else(|| {
                    CodecError::InvalidData(format!("no schema case for subtype key '{}'", key))
                })?;
                let child = self.build_node(None, case.schema, Some(id), *inner)?;
                self.nodes[id].children.push(child);
                self.nodes[id].type_key = Some(key);
            }
            (SchemaKind::Union(_), Value::Null) => {}
            (SchemaKind::Primitive(_) | SchemaKind::Bytes | SchemaKind::Text { .. }, v) => {
                self.nodes[id].value = v;
            }
            (kind, v) => {
                return Err(CodecError::InvalidData(format!(
                    "{} value does not fit {} schema",
                    v.kind_name(),
                    kind.label()
                )));
            }
        }
        Ok(id)
    }

    pub(crate) fn build_shell(
        &mut self,
        name: Option<String>,
        schema: Arc<SchemaNode>,
        parent: Option<NodeId>,
    ) -> NodeId {
        let id = self.push_node(name, schema.clone(), parent);
        if let SchemaKind::Record(fields) = &schema.kind {
            for field in fields {
                let child =
                    self.build_shell(Some(field.name.clone()), field.schema.clone(), Some(id));
                self.nodes[id].children.push(child);
            }
        }
        id
    }

    /// Drop stale children before a re-read grows them again. Orphaned
    /// nodes stay in the arena unreferenced.
    pub(crate) fn clear_children(&mut self, id: NodeId) {
        self.nodes[id].children.clear();
    }

    // ------------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------------

    /// Materialize the subtree rooted at `id` as a runtime value
    pub fn snapshot(&self, id: NodeId) -> Value {
        let node = &self.nodes[id];
        match &node.schema.kind {
            SchemaKind::Record(_) => Value::Record(
                node.children
                    .iter()
                    .map(|&child| {
                        (
                            self.nodes[child].name.clone().unwrap_or_default(),
                            self.snapshot(child),
                        )
                    })
                    .collect(),
            ),
            SchemaKind::Sequence(_) | SchemaKind::TerminatedSequence(_) => Value::List(
                node.children.iter().map(|&child| self.snapshot(child)).collect(),
            ),
            SchemaKind::Union(_) => match (node.type_key.as_ref(), node.children.first()) {
                (Some(key), Some(&child)) => {
                    Value::Tagged(key.clone(), Box::new(self.snapshot(child)))
                }
                _ => Value::Null,
            },
            _ => node.value.clone(),
        }
    }

    pub fn root_value(&self) -> Value {
        self.snapshot(self.root)
    }

    // ------------------------------------------------------------------------
    // Bind
    // ------------------------------------------------------------------------

    /// Attach deferred producers for every two-way binding in the tree.
    ///
    /// A node's own bindings attach before its children are visited, since
    /// child presence, encoding, and endianness may depend on them.
    /// Idempotent: previously attached producers are cleared first.
    pub fn bind(&mut self) -> CodecResult<()> {
        for node in &mut self.nodes {
            node.producers.clear();
        }
        self.bind_node(self.root)
    }

    fn bind_node(&mut self, id: NodeId) -> CodecResult<()> {
        let schema = self.nodes[id].schema.clone();
        self.attach_producers(id, &schema)
            .map_err(|e| self.attribute(id, e))?;
        let children = self.nodes[id].children.clone();
        for child in children {
            self.bind_node(child)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Serialize
    // ------------------------------------------------------------------------

    pub fn serialize(
        &mut self,
        stream: &mut dyn WireStream,
        notifier: &mut dyn Notifier,
    ) -> CodecResult<()> {
        self.reset_walk_state();
        self.serialize_node(self.root, stream, notifier, true)
    }

    fn reset_walk_state(&mut self) {
        for node in &mut self.nodes {
            node.visited = false;
            node.ctx.invalidate();
        }
    }

    pub(crate) fn serialize_node(
        &mut self,
        id: NodeId,
        stream: &mut dyn WireStream,
        notifier: &mut dyn Notifier,
        align_enabled: bool,
    ) -> CodecResult<()> {
        let schema = self.nodes[id].schema.clone();
        if schema.ignored {
            return Ok(());
        }
        match self.when_matches(id, &schema, Phase::Write) {
            Ok(true) => {}
            Ok(false) => {
                trace!(node = id, "field skipped by conditional predicate");
                return Ok(());
            }
            Err(e) => return Err(self.attribute(id, e)),
        }
        let label = self.nodes[id].label();
        notifier.enter(&label, stream.relative_position());
        let result = self.serialize_body(id, &schema, stream, notifier, align_enabled);
        self.nodes[id].visited = true;
        notifier.leave(&label, stream.relative_position());
        result.map_err(|e| self.attribute(id, e))
    }

    fn serialize_body(
        &mut self,
        id: NodeId,
        schema: &SchemaNode,
        stream: &mut dyn WireStream,
        notifier: &mut dyn Notifier,
        align_enabled: bool,
    ) -> CodecResult<()> {
        let boundary = self.alignment_boundary(id, schema, Phase::Write)?;
        if align_enabled {
            if let Some(n) = boundary {
                align(stream, n, true)?;
            }
        }
        let ceiling = self.const_max_length(id, schema)?;
        let offset = match &schema.bindings.field_offset {
            Some(binding) => Some(numeric_value(
                &self.resolve_binding(id, binding, Phase::Write)?,
            )?),
            None => None,
        };
        match offset {
            Some(target) => with_saved_position(stream, target, |scoped| {
                self.write_scoped(id, schema, scoped, notifier, ceiling)
            })?,
            None => self.write_scoped(id, schema, stream, notifier, ceiling)?,
        }
        if align_enabled {
            if let Some(n) = boundary {
                align(stream, n, true)?;
            }
        }
        Ok(())
    }

    fn write_scoped(
        &mut self,
        id: NodeId,
        schema: &SchemaNode,
        stream: &mut dyn WireStream,
        notifier: &mut dyn Notifier,
        ceiling: Option<u64>,
    ) -> CodecResult<()> {
        match ceiling {
            Some(limit) => {
                let mut bounded = BoundedStream::new(stream, limit);
                self.write_tapped(id, schema, &mut bounded, notifier, ceiling)
            }
            None => self.write_tapped(id, schema, stream, notifier, ceiling),
        }
    }

    fn write_tapped(
        &mut self,
        id: NodeId,
        schema: &SchemaNode,
        stream: &mut dyn WireStream,
        notifier: &mut dyn Notifier,
        ceiling: Option<u64>,
    ) -> CodecResult<()> {
        match &schema.bindings.computed {
            Some(computed) => {
                self.nodes[id].ctx.reset_accumulator(computed.kind);
                let mut side = Vec::new();
                let result = {
                    let mut tap = TapStream::new(stream, &mut side);
                    self.write_value(id, schema, &mut tap, notifier, ceiling)
                };
                self.nodes[id].ctx.absorb(&side);
                result
            }
            None => self.write_value(id, schema, stream, notifier, ceiling),
        }
    }

    // ------------------------------------------------------------------------
    // Deserialize
    // ------------------------------------------------------------------------

    pub fn deserialize(
        &mut self,
        stream: &mut dyn WireStream,
        notifier: &mut dyn Notifier,
    ) -> CodecResult<()> {
        self.reset_walk_state();
        self.deserialize_node(self.root, stream, notifier)
    }

    pub(crate) fn deserialize_node(
        &mut self,
        id: NodeId,
        stream: &mut dyn WireStream,
        notifier: &mut dyn Notifier,
    ) -> CodecResult<()> {
        let schema = self.nodes[id].schema.clone();
        if schema.ignored {
            return Ok(());
        }
        // Read-side predicates see whatever sibling fields have already
        // been populated, not a two-way-computed substitute.
        match self.when_matches(id, &schema, Phase::Read) {
            Ok(true) => {}
            Ok(false) => {
                trace!(node = id, "field skipped by conditional predicate");
                return Ok(());
            }
            Err(e) => return Err(self.attribute(id, e)),
        }
        let label = self.nodes[id].label();
        notifier.enter(&label, stream.relative_position());
        let result = self.deserialize_body(id, &schema, stream, notifier);
        self.nodes[id].visited = true;
        notifier.leave(&label, stream.relative_position());
        result.map_err(|e| self.attribute(id, e))
    }

    fn deserialize_body(
        &mut self,
        id: NodeId,
        schema: &SchemaNode,
        stream: &mut dyn WireStream,
        notifier: &mut dyn Notifier,
    ) -> CodecResult<()> {
        let boundary = self.alignment_boundary(id, schema, Phase::Read)?;
        if let Some(n) = boundary {
            align(stream, n, false)?;
        }
        let ceiling = self.read_length(id, schema)?;
        let offset = match &schema.bindings.field_offset {
            Some(binding) => Some(numeric_value(
                &self.resolve_binding(id, binding, Phase::Read)?,
            )?),
            None => None,
        };
        match offset {
            Some(target) => with_saved_position(stream, target, |scoped| {
                self.read_scoped(id, schema, scoped, notifier, ceiling)
            })?,
            None => self.read_scoped(id, schema, stream, notifier, ceiling)?,
        }
        if let Some(n) = boundary {
            align(stream, n, false)?;
        }
        Ok(())
    }

    fn read_scoped(
        &mut self,
        id: NodeId,
        schema: &SchemaNode,
        stream: &mut dyn WireStream,
        notifier: &mut dyn Notifier,
        ceiling: Option<u64>,
    ) -> CodecResult<()> {
        match ceiling {
            Some(limit) => {
                let mut bounded = BoundedStream::new(stream, limit);
                self.read_tapped(id, schema, &mut bounded, notifier, ceiling)
            }
            None => self.read_tapped(id, schema, stream, notifier, ceiling),
        }
    }

    fn read_tapped(
        &mut self,
        id: NodeId,
        schema: &SchemaNode,
        stream: &mut dyn WireStream,
        notifier: &mut dyn Notifier,
        ceiling: Option<u64>,
    ) -> CodecResult<()> {
        match &schema.bindings.computed {
            Some(computed) => {
                self.nodes[id].ctx.reset_accumulator(computed.kind);
                let mut side = Vec::new();
                let result = {
                    let mut tap = TapStream::new(stream, &mut side);
                    self.read_value(id, schema, &mut tap, notifier, ceiling)
                };
                self.nodes[id].ctx.absorb(&side);
                result
            }
            None => self.read_value(id, schema, stream, notifier, ceiling),
        }
    }

    // ------------------------------------------------------------------------
    // Error attribution
    // ------------------------------------------------------------------------

    /// Wrap non-I/O failures with the failing field's name (or its schema
    /// kind label when unnamed). Transport faults pass through unchanged.
    fn attribute(&self, id: NodeId, err: CodecError) -> CodecError {
        if err.is_io() {
            return err;
        }
        CodecError::Field {
            field: self.nodes[id].label(),
            source: Box::new(err),
        }
    }
}

// ============================================================================
// One-shot helpers
// ============================================================================

/// Build, bind, and serialize a value against a schema in one call
pub fn to_bytes(schema: &Arc<SchemaNode>, value: Value) -> CodecResult<Vec<u8>> {
    let mut graph = ValueGraph::from_value(schema.clone(), value)?;
    graph.bind()?;
    let mut stream = ByteStream::new();
    graph.serialize(&mut stream, &mut NullNotifier)?;
    Ok(stream.into_inner())
}

/// Build a shell, bind, and deserialize bytes against a schema in one call
pub fn from_bytes(schema: &Arc<SchemaNode>, bytes: &[u8]) -> CodecResult<Value> {
    let mut graph = ValueGraph::shell(schema.clone());
    graph.bind()?;
    let mut stream = ByteStream::from_vec(bytes.to_vec());
    graph.deserialize(&mut stream, &mut NullNotifier)?;
    Ok(graph.root_value())
}
