//! Stream contract and in-memory implementations
//!
//! The engine requires a seekable, length-limitable stream with a
//! relative-position counter. `ByteStream` is the growable in-memory
//! implementation used throughout; `MeasureSink` discards writes while
//! tracking position for dry-run length measurement. File- or
//! network-backed transports live outside this crate and only need to
//! implement `WireStream`.

mod scope;

pub use scope::{align, with_saved_position, BoundedStream, TapStream};

use crate::error::StreamResult;

/// Byte stream consumed by the engine.
///
/// `relative_position` resets to zero at each length-limiting wrap boundary;
/// `at_limit` distinguishes "ceiling reached" from "end of underlying data".
pub trait WireStream {
    /// Read up to `buf.len()` bytes; `Ok(0)` means no more data is available
    fn read(&mut self, buf: &mut [u8]) -> StreamResult<usize>;

    /// Write all of `buf`
    fn write(&mut self, buf: &[u8]) -> StreamResult<()>;

    fn can_seek(&self) -> bool;

    /// Absolute position in the underlying stream
    fn position(&self) -> u64;

    /// Seek to an absolute position
    fn seek(&mut self, pos: u64) -> StreamResult<()>;

    /// Total length, when known
    fn byte_len(&self) -> Option<u64>;

    /// Position relative to the innermost ceiling scope
    fn relative_position(&self) -> u64;

    /// Bytes left under the nearest ceiling, `None` when unknown/unbounded
    fn remaining(&self) -> Option<u64>;

    /// True when the ceiling (not the underlying data) has been reached
    fn at_limit(&self) -> bool;
}

// ============================================================================
// ByteStream
// ============================================================================

/// Growable in-memory stream. Writing past the end extends the buffer;
/// seeking past the end leaves a gap that is zero-filled on write.
#[derive(Debug, Default)]
pub struct ByteStream {
    buf: Vec<u8>,
    pos: usize,
}

impl ByteStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(buf: Vec<u8>) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl WireStream for ByteStream {
    fn read(&mut self, buf: &mut [u8]) -> StreamResult<usize> {
        let avail = self.buf.len().saturating_sub(self.pos);
        let n = avail.min(buf.len());
        buf[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> StreamResult<()> {
        let end = self.pos + buf.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(())
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn position(&self) -> u64 {
        self.pos as u64
    }

    fn seek(&mut self, pos: u64) -> StreamResult<()> {
        self.pos = pos as usize;
        Ok(())
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.buf.len() as u64)
    }

    fn relative_position(&self) -> u64 {
        self.pos as u64
    }

    fn remaining(&self) -> Option<u64> {
        Some(self.buf.len().saturating_sub(self.pos) as u64)
    }

    fn at_limit(&self) -> bool {
        false
    }
}

// ============================================================================
// MeasureSink
// ============================================================================

/// Discard sink that tracks position, used for dry-run measurement of a
/// node's encoded length. Seekable so offset fields measure correctly.
#[derive(Debug, Default)]
pub struct MeasureSink {
    pos: u64,
    high: u64,
}

impl MeasureSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WireStream for MeasureSink {
    fn read(&mut self, _buf: &mut [u8]) -> StreamResult<usize> {
        Ok(0)
    }

    fn write(&mut self, buf: &[u8]) -> StreamResult<()> {
        self.pos += buf.len() as u64;
        self.high = self.high.max(self.pos);
        Ok(())
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, pos: u64) -> StreamResult<()> {
        self.pos = pos;
        self.high = self.high.max(self.pos);
        Ok(())
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.high)
    }

    fn relative_position(&self) -> u64 {
        self.pos
    }

    fn remaining(&self) -> Option<u64> {
        None
    }

    fn at_limit(&self) -> bool {
        false
    }
}

/// Read until `buf` is full or the data runs out; returns bytes filled.
pub(crate) fn read_fill(stream: &mut dyn WireStream, buf: &mut [u8]) -> StreamResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Read everything available under the nearest ceiling (or to end of data).
pub(crate) fn read_to_limit(stream: &mut dyn WireStream) -> StreamResult<Vec<u8>> {
    let mut out = Vec::with_capacity(stream.remaining().unwrap_or(64) as usize);
    let mut chunk = [0u8; 256];
    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_stream_write_then_read() {
        let mut s = ByteStream::new();
        s.write(&[1, 2, 3, 4]).unwrap();
        assert_eq!(s.position(), 4);
        s.seek(1).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(s.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [2, 3]);
    }

    #[test]
    fn test_byte_stream_overwrite_mid_buffer() {
        let mut s = ByteStream::from_vec(vec![1, 2, 3, 4]);
        s.seek(1).unwrap();
        s.write(&[9, 9]).unwrap();
        assert_eq!(s.as_slice(), &[1, 9, 9, 4]);
    }

    #[test]
    fn test_byte_stream_seek_gap_zero_filled() {
        let mut s = ByteStream::new();
        s.write(&[1]).unwrap();
        s.seek(4).unwrap();
        s.write(&[5]).unwrap();
        assert_eq!(s.as_slice(), &[1, 0, 0, 0, 5]);
    }

    #[test]
    fn test_byte_stream_read_past_end() {
        let mut s = ByteStream::from_vec(vec![1, 2]);
        let mut buf = [0u8; 8];
        assert_eq!(s.read(&mut buf).unwrap(), 2);
        assert_eq!(s.read(&mut buf).unwrap(), 0);
        assert!(!s.at_limit());
    }

    #[test]
    fn test_measure_sink_counts_and_seeks() {
        let mut sink = MeasureSink::new();
        sink.write(&[0u8; 10]).unwrap();
        assert_eq!(sink.relative_position(), 10);
        sink.seek(3).unwrap();
        sink.write(&[0u8; 2]).unwrap();
        assert_eq!(sink.position(), 5);
        assert_eq!(sink.byte_len(), Some(10));
    }

    #[test]
    fn test_read_to_limit_drains_stream() {
        let mut s = ByteStream::from_vec((0u8..100).collect());
        let all = read_to_limit(&mut s).unwrap();
        assert_eq!(all.len(), 100);
        assert_eq!(all[99], 99);
    }
}
