//! Packed reader.

use crate::error::{CodecError, CodecResult};

/// Reads packed values from a borrowed buffer.
pub struct PackedReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PackedReader<'a> {
    /// Create a reader positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Check if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Reads an unsigned LEB128 varint.
    pub fn get_varuint(&mut self) -> CodecResult<u64> {
        let start = self.pos;
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof {
                offset: start,
                needed: 1,
            })?;
            self.pos += 1;
            if shift == 63 && byte > 1 {
                return Err(CodecError::VarintOverflow { offset: start });
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 63 {
                return Err(CodecError::VarintOverflow { offset: start });
            }
        }
    }

    /// Reads a zig-zag encoded signed varint.
    pub fn get_varint(&mut self) -> CodecResult<i64> {
        let raw = self.get_varuint()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    /// Reads a length-prefixed byte string.
    pub fn get_vbytes(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.get_varuint()?;
        let len = usize::try_from(len).map_err(|_| CodecError::UnexpectedEof {
            offset: self.pos,
            needed: usize::MAX,
        })?;
        self.take(len)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn get_vstring(&mut self) -> CodecResult<&'a str> {
        let offset = self.pos;
        let bytes = self.get_vbytes()?;
        std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8 { offset })
    }

    /// Reads a little-endian `u16`.
    pub fn get_u16(&mut self) -> CodecResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Reads a little-endian `u32`.
    pub fn get_u32(&mut self) -> CodecResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a little-endian `u64`.
    pub fn get_u64(&mut self) -> CodecResult<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(CodecError::UnexpectedEof {
                offset: self.pos,
                needed: len - self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::PackedWriter;
    use proptest::prelude::*;

    #[test]
    fn reads_known_varuint() {
        let mut r = PackedReader::new(&[0xac, 0x02]);
        assert_eq!(r.get_varuint().unwrap(), 300);
        assert!(r.is_empty());
    }

    #[test]
    fn truncated_varuint() {
        let mut r = PackedReader::new(&[0x80, 0x80]);
        assert!(matches!(
            r.get_varuint(),
            Err(CodecError::UnexpectedEof { offset: 0, .. })
        ));
    }

    #[test]
    fn overlong_varuint() {
        let bytes = [0xff; 11];
        let mut r = PackedReader::new(&bytes);
        assert_eq!(
            r.get_varuint(),
            Err(CodecError::VarintOverflow { offset: 0 })
        );
    }

    #[test]
    fn vstring_past_end() {
        let mut r = PackedReader::new(&[5, b'a', b'b']);
        assert!(matches!(
            r.get_vstring(),
            Err(CodecError::UnexpectedEof { needed: 3, .. })
        ));
    }

    #[test]
    fn invalid_utf8() {
        let mut r = PackedReader::new(&[2, 0xff, 0xfe]);
        assert_eq!(r.get_vstring(), Err(CodecError::InvalidUtf8 { offset: 0 }));
    }

    proptest! {
        #[test]
        fn mixed_sequence_reads_back(a in any::<u64>(), b in any::<i64>(), s in ".{0,40}") {
            let mut w = PackedWriter::new();
            w.put_varuint(a).put_varint(b).put_vstring(&s).put_u32(a as u32);
            let bytes = w.into_bytes();

            let mut r = PackedReader::new(&bytes);
            prop_assert_eq!(r.get_varuint().unwrap(), a);
            prop_assert_eq!(r.get_varint().unwrap(), b);
            prop_assert_eq!(r.get_vstring().unwrap(), s.as_str());
            prop_assert_eq!(r.get_u32().unwrap(), a as u32);
            prop_assert!(r.is_empty());
        }
    }
}
