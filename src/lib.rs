//! wireform - Schema-Driven Binary Codec Engine
//!
//! Converts a runtime value tree to and from a byte stream, driven by a
//! static schema describing the layout: field order, lengths, counts,
//! offsets, alignment, endianness, text encoding, conditional presence,
//! polymorphic subtypes, and computed fields. Layout parameters resolve as
//! literal constants, cross-field references, or deferred computations
//! (e.g. a length prefix produced by measuring its own payload), giving
//! two-way data flow across the tree.
//!
//! Typical use:
//!
//! 1. Build a schema with [`SchemaNode`] builders (or deserialize a stored
//!    one; schemas are serde-serializable).
//! 2. Build a [`ValueGraph`] from a [`Value`] tree, or a shell for reading.
//! 3. Call [`ValueGraph::bind`] once, then serialize/deserialize against
//!    any [`WireStream`].
//!
//! The one-shot helpers [`to_bytes`] and [`from_bytes`] wrap those steps
//! for the common in-memory case.

pub mod engine;
pub mod error;
pub mod schema;
pub mod stream;
pub mod value;

// Re-export the working set
pub use engine::{
    from_bytes, to_bytes, BoundProducer, ContextFrame, NodeId, Notifier, NullNotifier,
    ProducerKind, ValueGraph, ValueNode,
};
pub use error::{CodecError, CodecResult, StreamError, StreamResult};
pub use schema::{
    Binding, BindingMode, BindingSet, BindingSource, ComputedField, ComputedKind, Endianness,
    FieldSchema, PrimitiveType, SchemaKind, SchemaNode, SubtypeCase, TextEncoding, WhenBinding,
};
pub use stream::{BoundedStream, ByteStream, MeasureSink, TapStream, WireStream};
pub use value::Value;
