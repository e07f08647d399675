//! Error taxonomy for the codec engine
//!
//! Failures fall into four groups: binding resolution (bad cross-field
//! paths, subtype lookup misses), invalid operations (a capability invoked
//! on a node kind that does not support it), data/stream shape problems,
//! and transport I/O. Transport I/O is surfaced unchanged; every other
//! failure is wrapped per tree level so it stays attributable to a field.

use thiserror::Error;

use crate::value::Value;

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Result type for raw stream operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors raised by the stream layer itself
#[derive(Error, Debug)]
pub enum StreamError {
    /// Transport-level fault from the underlying byte source/sink
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A write would cross the active byte ceiling
    #[error("write of {requested} bytes exceeds the {limit}-byte ceiling")]
    LimitExceeded { requested: u64, limit: u64 },

    /// Seek requested on a stream that cannot seek
    #[error("stream does not support seeking")]
    Unseekable,
}

/// Errors that can occur while binding, serializing, or deserializing
#[derive(Error, Debug)]
pub enum CodecError {
    /// Malformed or unresolvable cross-field path
    #[error("unresolvable binding path '{path}': {reason}")]
    Binding { path: String, reason: String },

    /// A concrete subtype has no discriminator registered for it
    #[error("no discriminator registered for subtype '{key}'")]
    UnknownSubtype { key: String },

    /// A discriminator read from the stream matches no registered subtype
    #[error("no subtype registered for discriminator {tag:?}")]
    UnknownDiscriminator { tag: Value },

    /// Subtype requested while the polymorphic value is absent
    #[error("subtype cannot be determined from an absent value")]
    AbsentSubtypeValue,

    /// A variant capability invoked on a node kind that lacks it
    #[error("{operation} is not supported by {kind} nodes")]
    Unsupported {
        operation: &'static str,
        kind: &'static str,
    },

    /// A bound layout parameter resolved to the wrong semantic kind
    #[error("bound {parameter} has the wrong kind: expected {expected}, got {actual}")]
    WrongValueKind {
        parameter: &'static str,
        expected: &'static str,
        actual: &'static str,
    },

    /// Data does not represent a valid value
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Stream ended before a required read completed
    #[error("unexpected end of stream while reading {0}")]
    UnexpectedEof(&'static str),

    /// A field's encoding crossed its byte ceiling
    #[error("write exceeds the {limit}-byte field ceiling")]
    LimitExceeded { limit: u64 },

    /// Offset handling requested on an unseekable stream
    #[error("stream does not support seeking")]
    Unseekable,

    /// Transport fault, passed through unchanged
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Wrapper attributing a failure to a specific field in the tree
    #[error("failed to process field '{field}'")]
    Field {
        field: String,
        #[source]
        source: Box<CodecError>,
    },
}

impl CodecError {
    /// True for transport faults, which must never be rewrapped.
    pub fn is_io(&self) -> bool {
        matches!(self, CodecError::Io(_))
    }

    /// Walk the field-attribution chain down to the originating failure.
    pub fn root_cause(&self) -> &CodecError {
        match self {
            CodecError::Field { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Names of the fields in the attribution chain, outermost first.
    pub fn field_path(&self) -> Vec<&str> {
        let mut path = Vec::new();
        let mut cur = self;
        while let CodecError::Field { field, source } = cur {
            path.push(field.as_str());
            cur = source;
        }
        path
    }
}

impl From<StreamError> for CodecError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Io(e) => CodecError::Io(e),
            StreamError::LimitExceeded { limit, .. } => CodecError::LimitExceeded { limit },
            StreamError::Unseekable => CodecError::Unseekable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_passes_through_unwrapped() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err = CodecError::from(StreamError::Io(io));
        assert!(err.is_io());
    }

    #[test]
    fn test_limit_exceeded_is_not_io() {
        let err = CodecError::from(StreamError::LimitExceeded {
            requested: 8,
            limit: 4,
        });
        assert!(!err.is_io());
        assert!(matches!(err, CodecError::LimitExceeded { limit: 4 }));
    }

    #[test]
    fn test_root_cause_walks_field_chain() {
        let inner = CodecError::Binding {
            path: "a.b".to_string(),
            reason: "no match".to_string(),
        };
        let wrapped = CodecError::Field {
            field: "outer".to_string(),
            source: Box::new(CodecError::Field {
                field: "inner".to_string(),
                source: Box::new(inner),
            }),
        };
        assert!(matches!(
            wrapped.root_cause(),
            CodecError::Binding { .. }
        ));
        assert_eq!(wrapped.field_path(), vec!["outer", "inner"]);
    }
}
