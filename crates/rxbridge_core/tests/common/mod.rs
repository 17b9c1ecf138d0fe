//! Shared setup for the integration tests.

#![allow(dead_code)]

use rxbridge_core::{BridgeConfig, Dsn, FieldType, IndexDef, IndexType, Reindexer, StorageOptions};
use rxbridge_testkit::MemoryEngine;
use std::sync::Arc;

pub const DSN: &str = "builtin:///tmp/rxbridge/test";

pub fn engine() -> Arc<MemoryEngine> {
    Arc::new(MemoryEngine::new())
}

/// A connected instance with default settings.
pub fn open(engine: &Arc<MemoryEngine>) -> Reindexer {
    open_with(engine, BridgeConfig::default())
}

pub fn open_with(engine: &Arc<MemoryEngine>, config: BridgeConfig) -> Reindexer {
    let dsn = Dsn::parse(DSN).unwrap();
    Reindexer::open(engine.clone(), &dsn, config).unwrap()
}

/// A connected instance with namespace `items` keyed by `id`.
pub fn open_items(engine: &Arc<MemoryEngine>) -> Reindexer {
    let db = open(engine);
    db.open_namespace("items", StorageOptions::default()).unwrap();
    db.add_index("items", &IndexDef::new("id", IndexType::Hash, FieldType::Int).pk())
        .unwrap();
    db
}
