//! Packed writer.

/// Appends packed values to a growable buffer.
///
/// Every `put_*` method returns `&mut Self` so calls can be chained.
#[derive(Debug, Default, Clone)]
pub struct PackedWriter {
    buffer: Vec<u8>,
}

impl PackedWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Writes an unsigned LEB128 varint.
    pub fn put_varuint(&mut self, mut value: u64) -> &mut Self {
        while value >= 0x80 {
            self.buffer.push((value as u8) | 0x80);
            value >>= 7;
        }
        self.buffer.push(value as u8);
        self
    }

    /// Writes a zig-zag encoded signed varint.
    pub fn put_varint(&mut self, value: i64) -> &mut Self {
        self.put_varuint(((value << 1) ^ (value >> 63)) as u64)
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn put_vstring(&mut self, value: &str) -> &mut Self {
        self.put_vbytes(value.as_bytes())
    }

    /// Writes a length-prefixed byte string.
    pub fn put_vbytes(&mut self, value: &[u8]) -> &mut Self {
        self.put_varuint(value.len() as u64);
        self.buffer.extend_from_slice(value);
        self
    }

    /// Writes a little-endian `u16`.
    pub fn put_u16(&mut self, value: u16) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Writes a little-endian `u32`.
    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Writes a little-endian `u64`.
    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Appends raw bytes without a length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(value);
        self
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume this writer and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}
