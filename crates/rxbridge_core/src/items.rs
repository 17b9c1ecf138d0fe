//! Item modification arguments.
//!
//! `modify_item` takes two buffers: the packed arguments built here, and the
//! item itself, which the bridge passes through untouched.

use rxbridge_codec::PackedWriter;

/// What to do with an item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum ItemMode {
    /// Replace an existing item.
    Update = 0,
    /// Add an item that must not exist yet.
    Insert = 1,
    /// Insert or replace.
    #[default]
    Upsert = 2,
    /// Remove the item with the same primary key.
    Delete = 3,
}

/// Encoding of the item buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum DataFormat {
    /// JSON text.
    Json = 0,
    /// The engine's binary JSON.
    #[default]
    CJson = 1,
}

/// Packed arguments of one item modification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemArgs {
    /// Target namespace. Not encoded inside a transaction.
    pub namespace: String,
    /// Item buffer encoding.
    pub format: DataFormat,
    /// Modification mode.
    pub mode: ItemMode,
    /// Schema state token the item was encoded against.
    pub state_token: u32,
    /// Server-side field generators, e.g. `id=serial()`.
    pub precepts: Vec<String>,
}

impl ItemArgs {
    /// Arguments for `mode` on `namespace`, CJSON format, no precepts.
    pub fn new(namespace: impl Into<String>, mode: ItemMode) -> Self {
        Self {
            namespace: namespace.into(),
            mode,
            ..Self::default()
        }
    }

    /// Sets the item format.
    #[must_use]
    pub fn format(mut self, format: DataFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets the state token.
    #[must_use]
    pub fn state_token(mut self, token: u32) -> Self {
        self.state_token = token;
        self
    }

    /// Adds a precept.
    #[must_use]
    pub fn precept(mut self, precept: impl Into<String>) -> Self {
        self.precepts.push(precept.into());
        self
    }

    /// Encodes the arguments of a plain modification.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PackedWriter::new();
        w.put_vstring(&self.namespace);
        self.encode_tail(&mut w);
        w.into_bytes()
    }

    /// Encodes the arguments of a modification inside a transaction.
    pub fn encode_tx(&self) -> Vec<u8> {
        let mut w = PackedWriter::new();
        self.encode_tail(&mut w);
        w.into_bytes()
    }

    fn encode_tail(&self, w: &mut PackedWriter) {
        w.put_varuint(self.format as u64)
            .put_varuint(self.mode as u64)
            .put_varuint(u64::from(self.state_token))
            .put_varuint(self.precepts.len() as u64);
        for precept in &self.precepts {
            w.put_vstring(precept);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxbridge_codec::PackedReader;

    #[test]
    fn plain_layout() {
        let args = ItemArgs::new("items", ItemMode::Insert)
            .state_token(7)
            .precept("id=serial()");
        let bytes = args.encode();

        let mut r = PackedReader::new(&bytes);
        assert_eq!(r.get_vstring().unwrap(), "items");
        assert_eq!(r.get_varuint().unwrap(), DataFormat::CJson as u64);
        assert_eq!(r.get_varuint().unwrap(), 1);
        assert_eq!(r.get_varuint().unwrap(), 7);
        assert_eq!(r.get_varuint().unwrap(), 1);
        assert_eq!(r.get_vstring().unwrap(), "id=serial()");
        assert!(r.is_empty());
    }

    #[test]
    fn tx_layout_skips_namespace() {
        let args = ItemArgs::new("items", ItemMode::Delete).format(DataFormat::Json);
        let bytes = args.encode_tx();
        assert_eq!(bytes, vec![0, 3, 0, 0]);
        assert_eq!(&args.encode()[..6], b"\x05items");
    }

    #[test]
    fn defaults() {
        let args = ItemArgs::default();
        assert_eq!(args.mode, ItemMode::Upsert);
        assert_eq!(args.format, DataFormat::CJson);
    }
}
