//! # rxbridge Core
//!
//! Safe bridge to an embedded, in-process Reindexer engine.
//!
//! Every database operation becomes one call across the engine's flat C
//! interface. This crate owns everything that has to be right on each of
//! those calls:
//!
//! - Borrowed views over caller strings and buffers ([`StrView`], [`BufView`])
//! - Execution contexts carrying a cancellation id and timeout ([`ExecContext`])
//! - Decoding of the three native return shapes into one [`Result`] ([`Envelope`])
//! - Ownership of result-set, transaction, connection and server handles
//!
//! ## Handle Ownership
//!
//! Native handles are wrapped in owning types. A [`ResultSet`] is released
//! exactly once, a [`Transaction`] is finished exactly once, and a
//! [`Reindexer`] instance is destroyed after everything obtained from it.
//! Each connection also keeps a [`HandleRegistry`] so a stale handle number
//! reissued by the engine is rejected instead of reaching native code.
//!
//! ## Example
//!
//! ```rust
//! use rxbridge_core::{
//!     BridgeConfig, Dsn, FieldType, IndexDef, IndexType, ItemArgs, ItemMode, Reindexer, StorageOptions,
//! };
//! use rxbridge_testkit::MemoryEngine;
//! use std::sync::Arc;
//!
//! let engine = Arc::new(MemoryEngine::new());
//! let dsn = Dsn::parse("builtin:///tmp/rx/items").unwrap();
//! let db = Reindexer::open(engine.clone(), &dsn, BridgeConfig::default()).unwrap();
//!
//! db.open_namespace("items", StorageOptions::default()).unwrap();
//! db.add_index("items", &IndexDef::new("id", IndexType::Hash, FieldType::Int).pk()).unwrap();
//! db.modify_item(&ItemArgs::new("items", ItemMode::Upsert), br#"{"id":1}"#).unwrap();
//!
//! let results = db.select(b"SELECT * FROM items", true, &[]).unwrap();
//! assert!(results.result_set().is_some());
//! drop(results);
//! drop(db);
//! assert_eq!(engine.live_result_sets(), 0);
//! ```

#![warn(missing_docs)]

mod config;
mod connection;
mod context;
pub mod dispatch;
mod envelope;
mod error;
mod items;
mod namespace;
mod registry;
mod results;
mod server;
mod transaction;
mod view;

pub use config::{BridgeConfig, Dsn, ServerConfig, DEFAULT_EXPECTED_VERSION};
pub use connection::Reindexer;
pub use context::{ContextIds, ExecContext};
pub use envelope::{Envelope, RawResults};
pub use error::{Error, ErrorCode, Result};
pub use items::{DataFormat, ItemArgs, ItemMode};
pub use namespace::{CollateMode, ConnectOptions, FieldType, IndexDef, IndexType, StorageOptions};
pub use registry::{HandleKind, HandleRegistry, HandleState, Ticket};
pub use results::{QueryResults, ResultSet};
pub use server::{EmbeddedServer, ReindexerServer};
pub use transaction::Transaction;
pub use view::{BufView, StrView, VersionsView};

pub use rxbridge_sys::NativeEngine;
#[cfg(feature = "linked")]
pub use rxbridge_sys::LinkedEngine;
