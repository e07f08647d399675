//! Lazy per-node context and computed-field accumulators
//!
//! Each value node carries a `LazyContext`: a memoized snapshot of the
//! node's value and its parent's value/type, built only when a predicate
//! first asks for it, plus the accumulator state for computed fields.
//! Contexts are invalidated at the start of every walk so nothing is
//! memoized across distinct serialize/deserialize calls.

use crate::schema::ComputedKind;
use crate::value::Value;

/// Snapshot handed to consumers of a node's context
#[derive(Debug, Clone, PartialEq)]
pub struct ContextFrame {
    /// This node's current value
    pub value: Value,
    /// The parent node's current value, if any
    pub parent_value: Option<Value>,
    /// The parent's schema-kind label, if any
    pub parent_label: Option<&'static str>,
}

/// Deferred, memoized context plus computed-field state
#[derive(Debug, Default, Clone)]
pub struct LazyContext {
    frame: Option<ContextFrame>,
    accumulator: Option<Accumulator>,
}

impl LazyContext {
    /// Drop the memoized frame and any accumulated checksum state
    pub fn invalidate(&mut self) {
        self.frame = None;
        self.accumulator = None;
    }

    pub fn frame(&self) -> Option<&ContextFrame> {
        self.frame.as_ref()
    }

    /// Memoize the frame if absent and return it
    pub fn frame_or_insert(&mut self, build: impl FnOnce() -> ContextFrame) -> &ContextFrame {
        self.frame.get_or_insert_with(build)
    }

    /// Start (or restart) accumulation for a computed field
    pub fn reset_accumulator(&mut self, kind: ComputedKind) {
        self.accumulator = Some(Accumulator::new(kind));
    }

    /// Feed the side buffer captured by a byte tap into the accumulator
    pub fn absorb(&mut self, bytes: &[u8]) {
        if let Some(acc) = &mut self.accumulator {
            acc.absorb(bytes);
        }
    }

    /// Finalized computed value, if accumulation ever started
    pub fn finalize(&self) -> Option<Value> {
        self.accumulator.as_ref().map(Accumulator::finish)
    }
}

// ============================================================================
// Checksum accumulators
// ============================================================================

/// Running checksum over a node's encoded bytes
#[derive(Debug, Clone)]
struct Accumulator {
    kind: ComputedKind,
    state: u32,
}

impl Accumulator {
    fn new(kind: ComputedKind) -> Self {
        let state = match kind {
            ComputedKind::Crc32 => 0xFFFF_FFFF,
            ComputedKind::Crc16 => 0xFFFF,
            ComputedKind::Sum8 => 0,
        };
        Self { kind, state }
    }

    fn absorb(&mut self, bytes: &[u8]) {
        match self.kind {
            ComputedKind::Crc32 => {
                for &byte in bytes {
                    self.state ^= byte as u32;
                    for _ in 0..8 {
                        let mask = (self.state & 1).wrapping_neg();
                        self.state = (self.state >> 1) ^ (0xEDB8_8320 & mask);
                    }
                }
            }
            ComputedKind::Crc16 => {
                // CRC-16/CCITT-FALSE
                for &byte in bytes {
                    self.state ^= (byte as u32) << 8;
                    for _ in 0..8 {
                        if self.state & 0x8000 != 0 {
                            self.state = ((self.state << 1) ^ 0x1021) & 0xFFFF;
                        } else {
                            self.state = (self.state << 1) & 0xFFFF;
                        }
                    }
                }
            }
            ComputedKind::Sum8 => {
                for &byte in bytes {
                    self.state = (self.state + byte as u32) & 0xFF;
                }
            }
        }
    }

    fn finish(&self) -> Value {
        match self.kind {
            ComputedKind::Crc32 => Value::UInt((self.state ^ 0xFFFF_FFFF) as u64),
            ComputedKind::Crc16 | ComputedKind::Sum8 => Value::UInt(self.state as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_known_vector() {
        let mut ctx = LazyContext::default();
        ctx.reset_accumulator(ComputedKind::Crc32);
        ctx.absorb(b"123456789");
        // CRC-32/ISO-HDLC check value
        assert_eq!(ctx.finalize(), Some(Value::UInt(0xCBF4_3926)));
    }

    #[test]
    fn test_crc16_known_vector() {
        let mut ctx = LazyContext::default();
        ctx.reset_accumulator(ComputedKind::Crc16);
        ctx.absorb(b"123456789");
        // CRC-16/CCITT-FALSE check value
        assert_eq!(ctx.finalize(), Some(Value::UInt(0x29B1)));
    }

    #[test]
    fn test_sum8_wraps() {
        let mut ctx = LazyContext::default();
        ctx.reset_accumulator(ComputedKind::Sum8);
        ctx.absorb(&[0xFF, 0x02]);
        assert_eq!(ctx.finalize(), Some(Value::UInt(0x01)));
    }

    #[test]
    fn test_accumulator_split_feeds_match_single_feed() {
        let mut a = LazyContext::default();
        a.reset_accumulator(ComputedKind::Crc32);
        a.absorb(b"hello ");
        a.absorb(b"world");

        let mut b = LazyContext::default();
        b.reset_accumulator(ComputedKind::Crc32);
        b.absorb(b"hello world");

        assert_eq!(a.finalize(), b.finalize());
    }

    #[test]
    fn test_finalize_without_reset_is_none() {
        let ctx = LazyContext::default();
        assert_eq!(ctx.finalize(), None);
    }

    #[test]
    fn test_invalidate_clears_frame_and_accumulator() {
        let mut ctx = LazyContext::default();
        ctx.reset_accumulator(ComputedKind::Sum8);
        ctx.frame_or_insert(|| ContextFrame {
            value: Value::UInt(1),
            parent_value: None,
            parent_label: None,
        });
        ctx.invalidate();
        assert!(ctx.frame().is_none());
        assert_eq!(ctx.finalize(), None);
    }
}
