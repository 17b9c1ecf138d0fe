//! Payload decoders and item helpers.
//!
//! These read the payloads [`MemoryEngine`] produces and build the item and
//! query buffers it understands.

use crate::MemoryEngine;
use rxbridge_codec::{CodecResult, PackedReader};
use serde_json::Value;

/// Decodes a binary select payload into `(item_ptr, ns_id)` pairs.
pub fn decode_item_refs(payload: &[u8]) -> CodecResult<Vec<(usize, i32)>> {
    let mut r = PackedReader::new(payload);
    let count = r.get_varuint()?;
    let mut refs = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let ptr = r.get_varuint()? as usize;
        let ns_id = r.get_varuint()? as i32;
        refs.push((ptr, ns_id));
    }
    Ok(refs)
}

/// Decodes a JSON select payload into its items.
pub fn json_items(payload: &[u8]) -> serde_json::Result<Vec<Value>> {
    #[derive(serde::Deserialize)]
    struct Payload {
        items: Vec<Value>,
    }
    serde_json::from_slice::<Payload>(payload).map(|p| p.items)
}

/// `SELECT * FROM <ns>`.
pub fn select_all(ns: &str) -> Vec<u8> {
    format!("SELECT * FROM {ns}").into_bytes()
}

/// An item `{"id": id, "name": name}` as JSON bytes.
pub fn item(id: i64, name: &str) -> Vec<u8> {
    serde_json::json!({ "id": id, "name": name }).to_string().into_bytes()
}

/// Panics unless every handed-out native resource came back exactly once.
pub fn assert_no_leaks(engine: &MemoryEngine) {
    assert_eq!(engine.live_error_texts(), 0, "error texts leaked");
    assert_eq!(engine.live_cjson_buffers(), 0, "cjson buffers leaked");
    assert_eq!(engine.live_result_sets(), 0, "result sets leaked");
    assert_eq!(engine.live_transactions(), 0, "transactions leaked");
    assert_eq!(engine.misuse_count(), 0, "released handle used");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxbridge_codec::PackedWriter;

    #[test]
    fn decodes_refs() {
        let mut w = PackedWriter::new();
        w.put_varuint(2).put_varuint(10).put_varuint(1).put_varuint(11).put_varuint(2);
        assert_eq!(decode_item_refs(w.as_bytes()).unwrap(), vec![(10, 1), (11, 2)]);
        assert!(decode_item_refs(&[3]).is_err());
    }

    #[test]
    fn decodes_json() {
        let items = json_items(br#"{"items":[{"id":1}]}"#).unwrap();
        assert_eq!(items, vec![serde_json::json!({"id": 1})]);
    }
}
