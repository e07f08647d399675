//! Variant read/write hooks
//!
//! The closed set of node kinds behind one capability surface: every kind
//! implements a write hook and a read hook against a (possibly
//! length-limited) stream; measurement, count, subtype, and last-item
//! capabilities live on the resolution side and reject kinds that lack
//! them. Primitives encode through the resolved endianness; text encodes
//! through the resolved encoding; composites recurse back into the engine.

use crate::error::{CodecError, CodecResult};
use crate::schema::{Endianness, PrimitiveType, SchemaKind, SchemaNode};
use crate::stream::{read_fill, read_to_limit, WireStream};
use crate::value::Value;

use super::resolve::{numeric_value, Phase};
use super::{NodeId, Notifier, ValueGraph};

impl ValueGraph {
    // ------------------------------------------------------------------------
    // Write hooks
    // ------------------------------------------------------------------------

    pub(crate) fn write_value(
        &mut self,
        id: NodeId,
        schema: &SchemaNode,
        stream: &mut dyn WireStream,
        notifier: &mut dyn Notifier,
        ceiling: Option<u64>,
    ) -> CodecResult<()> {
        match &schema.kind {
            SchemaKind::Primitive(ptype) => {
                let endianness = self.resolved_endianness(id, Phase::Write)?;
                let value = collapse_uniform_list(self.effective_value(id)?)?;
                let bytes = encode_primitive(*ptype, &value, endianness)?;
                stream.write(&bytes)?;
                Ok(())
            }
            SchemaKind::Bytes => {
                let bytes = match self.nodes[id].value.clone() {
                    Value::Bytes(bytes) => bytes,
                    Value::Null => Vec::new(),
                    other => {
                        return Err(CodecError::InvalidData(format!(
                            "bytes field holds {}",
                            other.kind_name()
                        )))
                    }
                };
                stream.write(&bytes)?;
                pad_to_ceiling(stream, bytes.len() as u64, ceiling)?;
                Ok(())
            }
            SchemaKind::Text { zero_terminated } => {
                let encoding = self.resolved_encoding(id, Phase::Write)?;
                let text = match self.nodes[id].value.clone() {
                    Value::Str(text) => text,
                    Value::Null => String::new(),
                    other => {
                        return Err(CodecError::InvalidData(format!(
                            "text field holds {}",
                            other.kind_name()
                        )))
                    }
                };
                let mut bytes = encoding.encode(&text)?;
                if *zero_terminated {
                    bytes.extend(std::iter::repeat(0u8).take(encoding.unit_size()));
                }
                stream.write(&bytes)?;
                pad_to_ceiling(stream, bytes.len() as u64, ceiling)?;
                Ok(())
            }
            SchemaKind::Record(_)
            | SchemaKind::Sequence(_)
            | SchemaKind::TerminatedSequence(_) => {
                let children = self.nodes[id].children.clone();
                for child in children {
                    self.serialize_node(child, stream, notifier, true)?;
                }
                Ok(())
            }
            SchemaKind::Union(_) => match self.nodes[id].children.first().copied() {
                Some(child) => self.serialize_node(child, stream, notifier, true),
                None => Err(CodecError::AbsentSubtypeValue),
            },
        }
    }

    // ------------------------------------------------------------------------
    // Read hooks
    // ------------------------------------------------------------------------

    pub(crate) fn read_value(
        &mut self,
        id: NodeId,
        schema: &SchemaNode,
        stream: &mut dyn WireStream,
        notifier: &mut dyn Notifier,
        ceiling: Option<u64>,
    ) -> CodecResult<()> {
        match &schema.kind {
            SchemaKind::Primitive(ptype) => {
                let endianness = self.resolved_endianness(id, Phase::Read)?;
                let size = ptype.size();
                let mut buf = [0u8; 8];
                let got = read_fill(stream, &mut buf[..size])?;
                if got < size {
                    return Err(CodecError::UnexpectedEof(schema.kind.label()));
                }
                self.nodes[id].value = decode_primitive(*ptype, &buf[..size], endianness)?;
                Ok(())
            }
            SchemaKind::Bytes => {
                self.nodes[id].value = Value::Bytes(read_to_limit(stream)?);
                Ok(())
            }
            SchemaKind::Text { zero_terminated } => {
                let encoding = self.resolved_encoding(id, Phase::Read)?;
                let raw = if *zero_terminated {
                    read_until_nul(stream, encoding.unit_size())?
                } else {
                    let raw = read_to_limit(stream)?;
                    if ceiling.is_some() {
                        // Fixed-length text is stored zero-padded
                        trim_trailing_nuls(raw, encoding.unit_size())
                    } else {
                        raw
                    }
                };
                self.nodes[id].value = Value::Str(encoding.decode(&raw)?);
                Ok(())
            }
            SchemaKind::Record(_) => {
                let children = self.nodes[id].children.clone();
                for child in children {
                    self.deserialize_node(child, stream, notifier)?;
                }
                Ok(())
            }
            SchemaKind::Sequence(element) => {
                let element = element.clone();
                self.clear_children(id);
                let count = match &schema.bindings.field_count {
                    Some(binding) => Some(numeric_value(
                        &self.resolve_binding(id, binding, Phase::Read)?,
                    )?),
                    None => None,
                };
                match count {
                    Some(n) => {
                        for _ in 0..n {
                            let child = self.build_shell(None, element.clone(), Some(id));
                            self.nodes[id].children.push(child);
                            self.deserialize_node(child, stream, notifier)?;
                        }
                    }
                    None => {
                        // Greedy: consume elements while data remains under
                        // the nearest ceiling
                        while stream.remaining().map_or(false, |left| left > 0) {
                            let child = self.build_shell(None, element.clone(), Some(id));
                            self.nodes[id].children.push(child);
                            self.deserialize_node(child, stream, notifier)?;
                        }
                    }
                }
                Ok(())
            }
            SchemaKind::TerminatedSequence(element) => {
                let element = element.clone();
                self.clear_children(id);
                let sentinel = match &schema.bindings.termination {
                    Some(binding) => self.resolve_binding(id, binding, Phase::Read)?,
                    None => {
                        return Err(CodecError::InvalidData(
                            "terminated sequence has no termination binding".to_string(),
                        ))
                    }
                };
                while stream.remaining().map_or(false, |left| left > 0) {
                    let child = self.build_shell(None, element.clone(), Some(id));
                    self.nodes[id].children.push(child);
                    self.deserialize_node(child, stream, notifier)?;
                    if self.snapshot(child).loose_eq(&sentinel) {
                        break;
                    }
                }
                Ok(())
            }
            SchemaKind::Union(cases) => {
                let binding = schema.bindings.subtype.as_ref().ok_or_else(|| {
                    CodecError::InvalidData("union has no subtype binding".to_string())
                })?;
                let tag = self.resolve_binding(id, binding, Phase::Read)?;
                let case = cases
                    .iter()
                    .find(|c| c.tag.as_ref().map_or(false, |t| t.loose_eq(&tag)))
                    .cloned()
                    .ok_or(CodecError::UnknownDiscriminator { tag })?;
                self.clear_children(id);
                let child = self.build_shell(None, case.schema.clone(), Some(id));
                self.nodes[id].children.push(child);
                self.nodes[id].type_key = Some(case.key.clone());
                self.deserialize_node(child, stream, notifier)
            }
        }
    }
}

// ============================================================================
// Primitive codecs
// ============================================================================

macro_rules! put_int {
    ($value:expr, $little:expr) => {{
        if $little {
            $value.to_le_bytes().to_vec()
        } else {
            $value.to_be_bytes().to_vec()
        }
    }};
}

fn mismatch(ptype: PrimitiveType, value: &Value) -> CodecError {
    CodecError::InvalidData(format!(
        "{} value does not fit {:?} field",
        value.kind_name(),
        ptype
    ))
}

fn unsigned(ptype: PrimitiveType, value: &Value, max: u64) -> CodecResult<u64> {
    let v = value.as_u64().ok_or_else(|| mismatch(ptype, value))?;
    if v > max {
        return Err(CodecError::InvalidData(format!(
            "value {} out of range for {:?}",
            v, ptype
        )));
    }
    Ok(v)
}

fn signed(ptype: PrimitiveType, value: &Value, min: i64, max: i64) -> CodecResult<i64> {
    let v = value.as_i64().ok_or_else(|| mismatch(ptype, value))?;
    if v < min || v > max {
        return Err(CodecError::InvalidData(format!(
            "value {} out of range for {:?}",
            v, ptype
        )));
    }
    Ok(v)
}

fn encode_primitive(
    ptype: PrimitiveType,
    value: &Value,
    endianness: Endianness,
) -> CodecResult<Vec<u8>> {
    let little = endianness.is_little();
    let bytes = match ptype {
        PrimitiveType::Bool => {
            vec![value.as_bool().ok_or_else(|| mismatch(ptype, value))? as u8]
        }
        PrimitiveType::U8 => vec![unsigned(ptype, value, u8::MAX as u64)? as u8],
        PrimitiveType::U16 => {
            let v = unsigned(ptype, value, u16::MAX as u64)? as u16;
            put_int!(v, little)
        }
        PrimitiveType::U32 => {
            let v = unsigned(ptype, value, u32::MAX as u64)? as u32;
            put_int!(v, little)
        }
        PrimitiveType::U64 => {
            let v = unsigned(ptype, value, u64::MAX)?;
            put_int!(v, little)
        }
        PrimitiveType::I8 => {
            vec![signed(ptype, value, i8::MIN as i64, i8::MAX as i64)? as i8 as u8]
        }
        PrimitiveType::I16 => {
            let v = signed(ptype, value, i16::MIN as i64, i16::MAX as i64)? as i16;
            put_int!(v, little)
        }
        PrimitiveType::I32 => {
            let v = signed(ptype, value, i32::MIN as i64, i32::MAX as i64)? as i32;
            put_int!(v, little)
        }
        PrimitiveType::I64 => {
            let v = signed(ptype, value, i64::MIN, i64::MAX)?;
            put_int!(v, little)
        }
        PrimitiveType::F32 => {
            let f = value.as_f64().ok_or_else(|| mismatch(ptype, value))? as f32;
            put_int!(f, little)
        }
        PrimitiveType::F64 => {
            let f = value.as_f64().ok_or_else(|| mismatch(ptype, value))?;
            put_int!(f, little)
        }
    };
    Ok(bytes)
}

fn decode_primitive(
    ptype: PrimitiveType,
    bytes: &[u8],
    endianness: Endianness,
) -> CodecResult<Value> {
    let little = endianness.is_little();
    macro_rules! get_int {
        ($ty:ty) => {{
            let arr: [u8; std::mem::size_of::<$ty>()] = bytes.try_into().map_err(|_| {
                CodecError::InvalidData(format!("short read for {:?}", ptype))
            })?;
            if little {
                <$ty>::from_le_bytes(arr)
            } else {
                <$ty>::from_be_bytes(arr)
            }
        }};
    }
    Ok(match ptype {
        PrimitiveType::Bool => match get_int!(u8) {
            0 => Value::Bool(false),
            1 => Value::Bool(true),
            other => {
                return Err(CodecError::InvalidData(format!(
                    "invalid boolean value: {}",
                    other
                )))
            }
        },
        PrimitiveType::U8 => Value::UInt(get_int!(u8) as u64),
        PrimitiveType::U16 => Value::UInt(get_int!(u16) as u64),
        PrimitiveType::U32 => Value::UInt(get_int!(u32) as u64),
        PrimitiveType::U64 => Value::UInt(get_int!(u64)),
        PrimitiveType::I8 => Value::Int(get_int!(u8) as i8 as i64),
        PrimitiveType::I16 => Value::Int(get_int!(i16) as i64),
        PrimitiveType::I32 => Value::Int(get_int!(i32) as i64),
        PrimitiveType::I64 => Value::Int(get_int!(i64)),
        PrimitiveType::F32 => Value::Float(get_int!(f32) as f64),
        PrimitiveType::F64 => Value::Float(get_int!(f64)),
    })
}

// ============================================================================
// Shared write/read helpers
// ============================================================================

/// A per-item length producer yields a list; a scalar target takes the
/// uniform value and rejects mixed lengths.
fn collapse_uniform_list(value: Value) -> CodecResult<Value> {
    match value {
        Value::List(items) => {
            let first = items.first().cloned().ok_or_else(|| {
                CodecError::InvalidData("empty per-item length list".to_string())
            })?;
            if items.iter().all(|item| item.loose_eq(&first)) {
                Ok(first)
            } else {
                Err(CodecError::InvalidData(
                    "per-item lengths are not uniform".to_string(),
                ))
            }
        }
        other => Ok(other),
    }
}

/// Zero-fill a fixed-length field out to its ceiling
fn pad_to_ceiling(
    stream: &mut dyn WireStream,
    written: u64,
    ceiling: Option<u64>,
) -> CodecResult<()> {
    let Some(limit) = ceiling else {
        return Ok(());
    };
    const ZEROS: [u8; 64] = [0u8; 64];
    let mut left = limit.saturating_sub(written);
    while left > 0 {
        let n = left.min(ZEROS.len() as u64) as usize;
        stream.write(&ZEROS[..n])?;
        left -= n as u64;
    }
    Ok(())
}

/// Read code units until an all-zero terminator unit or end of data.
/// The terminator is consumed and excluded.
fn read_until_nul(stream: &mut dyn WireStream, unit: usize) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 2];
    loop {
        let got = read_fill(stream, &mut chunk[..unit])?;
        if got < unit {
            break;
        }
        if chunk[..unit].iter().all(|&b| b == 0) {
            break;
        }
        out.extend_from_slice(&chunk[..unit]);
    }
    Ok(out)
}

fn trim_trailing_nuls(mut raw: Vec<u8>, unit: usize) -> Vec<u8> {
    while raw.len() >= unit && raw[raw.len() - unit..].iter().all(|&b| b == 0) {
        raw.truncate(raw.len() - unit);
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Primitive codecs
    // -------------------------------------------------------------------------

    #[test]
    fn test_encode_u16_both_orders() {
        let le = encode_primitive(PrimitiveType::U16, &Value::UInt(0x1234), Endianness::Little)
            .unwrap();
        assert_eq!(le, vec![0x34, 0x12]);
        let be =
            encode_primitive(PrimitiveType::U16, &Value::UInt(0x1234), Endianness::Big).unwrap();
        assert_eq!(be, vec![0x12, 0x34]);
    }

    #[test]
    fn test_primitive_roundtrip_all_widths() {
        let cases = [
            (PrimitiveType::Bool, Value::Bool(true)),
            (PrimitiveType::U8, Value::UInt(0xAB)),
            (PrimitiveType::U16, Value::UInt(0x1234)),
            (PrimitiveType::U32, Value::UInt(0xDEAD_BEEF)),
            (PrimitiveType::U64, Value::UInt(0x0123_4567_89AB_CDEF)),
            (PrimitiveType::I8, Value::Int(-42)),
            (PrimitiveType::I16, Value::Int(-1234)),
            (PrimitiveType::I32, Value::Int(-123_456_789)),
            (PrimitiveType::I64, Value::Int(-1_234_567_890_123)),
            (PrimitiveType::F64, Value::Float(3.141592653589793)),
        ];
        for (ptype, value) in cases {
            for endianness in [Endianness::Little, Endianness::Big] {
                let bytes = encode_primitive(ptype, &value, endianness).unwrap();
                assert_eq!(bytes.len(), ptype.size());
                let back = decode_primitive(ptype, &bytes, endianness).unwrap();
                assert_eq!(back, value, "{:?} {:?}", ptype, endianness);
            }
        }
    }

    #[test]
    fn test_encode_out_of_range_fails() {
        assert!(encode_primitive(PrimitiveType::U8, &Value::UInt(300), Endianness::Little)
            .is_err());
        assert!(
            encode_primitive(PrimitiveType::I8, &Value::Int(-200), Endianness::Little).is_err()
        );
    }

    #[test]
    fn test_decode_invalid_bool_fails() {
        assert!(matches!(
            decode_primitive(PrimitiveType::Bool, &[2], Endianness::Little),
            Err(CodecError::InvalidData(_))
        ));
    }

    #[test]
    fn test_encode_wrong_value_kind_fails() {
        assert!(encode_primitive(
            PrimitiveType::U32,
            &Value::Str("nope".into()),
            Endianness::Little
        )
        .is_err());
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    #[test]
    fn test_collapse_uniform_list() {
        let uniform = Value::List(vec![Value::UInt(2), Value::UInt(2)]);
        assert_eq!(collapse_uniform_list(uniform).unwrap(), Value::UInt(2));

        let mixed = Value::List(vec![Value::UInt(2), Value::UInt(3)]);
        assert!(collapse_uniform_list(mixed).is_err());

        assert_eq!(
            collapse_uniform_list(Value::UInt(7)).unwrap(),
            Value::UInt(7)
        );
    }

    #[test]
    fn test_trim_trailing_nuls_respects_unit_size() {
        assert_eq!(trim_trailing_nuls(vec![b'a', 0, 0], 1), vec![b'a']);
        // A UTF-16 unit of [61, 00] must survive single-byte trimming
        assert_eq!(
            trim_trailing_nuls(vec![0x61, 0x00, 0x00, 0x00], 2),
            vec![0x61, 0x00]
        );
    }

    #[test]
    fn test_read_until_nul_consumes_terminator() {
        let mut s = crate::stream::ByteStream::from_vec(vec![b'h', b'i', 0, b'x']);
        let raw = read_until_nul(&mut s, 1).unwrap();
        assert_eq!(raw, b"hi");
        assert_eq!(s.position(), 3);
    }

    #[test]
    fn test_read_until_nul_stops_at_eof() {
        let mut s = crate::stream::ByteStream::from_vec(vec![b'h', b'i']);
        let raw = read_until_nul(&mut s, 1).unwrap();
        assert_eq!(raw, b"hi");
    }
}
