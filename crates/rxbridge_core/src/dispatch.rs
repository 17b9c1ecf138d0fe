//! One function per native entry point.
//!
//! Each function borrows its arguments as views right before the call,
//! encodes the context, makes exactly one native call, and decodes the
//! envelope. Nothing here keeps state; handle ownership lives in the types
//! that call these functions.
//!
//! # Safety
//!
//! Every function is `unsafe` because the handles it takes are trusted:
//! `rx`, `tx`, `results` and `svc` must have been produced by `engine` and not
//! yet released.

use crate::context::ExecContext;
use crate::envelope::{Envelope, RawResults};
use crate::error::{Error, Result};
use crate::namespace::{ConnectOptions, StorageOptions};
use crate::registry::HandleKind;
use crate::view::{BufView, StrView, VersionsView};
use rxbridge_sys::{reindexer_buffer, reindexer_resbuffer, NativeEngine, RawHandle};
use std::num::NonZeroUsize;

/// Connects an engine instance to its storage.
pub unsafe fn connect(
    engine: &dyn NativeEngine,
    rx: RawHandle,
    dsn: &str,
    opts: ConnectOptions,
    client_version: &str,
) -> Result<()> {
    let dsn = StrView::new(dsn, "dsn")?;
    let version = StrView::new(client_version, "client version")?;
    engine.connect(rx, dsn.raw(), opts.to_native(), version.raw()).decode(engine)
}

/// Opens a namespace.
pub unsafe fn open_namespace(
    engine: &dyn NativeEngine,
    rx: RawHandle,
    ctx: ExecContext,
    ns: &str,
    storage: StorageOptions,
) -> Result<()> {
    let ns = StrView::new(ns, "namespace")?;
    engine
        .open_namespace(rx, ns.raw(), storage.to_native(), ctx.encode())
        .decode(engine)
}

/// Closes a namespace.
pub unsafe fn close_namespace(engine: &dyn NativeEngine, rx: RawHandle, ctx: ExecContext, ns: &str) -> Result<()> {
    let ns = StrView::new(ns, "namespace")?;
    engine.close_namespace(rx, ns.raw(), ctx.encode()).decode(engine)
}

/// Drops a namespace and its storage.
pub unsafe fn drop_namespace(engine: &dyn NativeEngine, rx: RawHandle, ctx: ExecContext, ns: &str) -> Result<()> {
    let ns = StrView::new(ns, "namespace")?;
    engine.drop_namespace(rx, ns.raw(), ctx.encode()).decode(engine)
}

/// Adds an index given as JSON text.
pub unsafe fn add_index(
    engine: &dyn NativeEngine,
    rx: RawHandle,
    ctx: ExecContext,
    ns: &str,
    index_json: &str,
) -> Result<()> {
    let ns = StrView::new(ns, "namespace")?;
    let def = StrView::new(index_json, "index definition")?;
    engine.add_index(rx, ns.raw(), def.raw(), ctx.encode()).decode(engine)
}

/// Inserts, updates, upserts or deletes one item.
pub unsafe fn modify_item(
    engine: &dyn NativeEngine,
    rx: RawHandle,
    ctx: ExecContext,
    args: &[u8],
    data: &[u8],
) -> Result<RawResults> {
    let args = BufView::new(args, "item arguments")?;
    let data = BufView::new(data, "item data")?;
    engine
        .modify_item_packed(rx, args.raw(), data.raw(), ctx.encode())
        .decode(engine)
}

/// Starts a transaction on one namespace.
pub unsafe fn begin_tx(engine: &dyn NativeEngine, rx: RawHandle, ns: &str) -> Result<NonZeroUsize> {
    let ns = StrView::new(ns, "namespace")?;
    engine.start_transaction(rx, ns.raw()).decode(engine)
}

/// Queues an item modification inside a transaction.
pub unsafe fn modify_item_tx(
    engine: &dyn NativeEngine,
    rx: RawHandle,
    tx: RawHandle,
    args: &[u8],
    data: &[u8],
) -> Result<RawResults> {
    let args = BufView::new(args, "item arguments")?;
    let data = BufView::new(data, "item data")?;
    engine
        .modify_item_packed_tx(rx, tx, args.raw(), data.raw())
        .decode(engine)
}

/// Commits a transaction. The handle is gone afterwards, whatever the outcome.
pub unsafe fn commit_tx(engine: &dyn NativeEngine, rx: RawHandle, tx: RawHandle, ctx: ExecContext) -> Result<()> {
    engine.commit_transaction(rx, tx, ctx.encode()).decode(engine)
}

/// Rolls a transaction back. The handle is gone afterwards, whatever the outcome.
pub unsafe fn rollback_tx(engine: &dyn NativeEngine, rx: RawHandle, tx: RawHandle) -> Result<()> {
    engine.rollback_transaction(rx, tx).decode(engine)
}

/// Runs a select query.
pub unsafe fn select(
    engine: &dyn NativeEngine,
    rx: RawHandle,
    ctx: ExecContext,
    query: &[u8],
    as_json: bool,
    versions: &[i32],
) -> Result<RawResults> {
    let query = BufView::new(query, "query")?;
    let versions = VersionsView::new(versions)?;
    engine
        .select_query(
            rx,
            query.raw(),
            i32::from(as_json),
            versions.ptr(),
            versions.count(),
            ctx.encode(),
        )
        .decode(engine)
}

/// Deletes the items a query matches.
pub unsafe fn delete_query(engine: &dyn NativeEngine, rx: RawHandle, ctx: ExecContext, query: &[u8]) -> Result<RawResults> {
    let query = BufView::new(query, "query")?;
    engine.delete_query(rx, query.raw(), ctx.encode()).decode(engine)
}

/// Queues a delete-by-query inside a transaction.
pub unsafe fn delete_query_tx(engine: &dyn NativeEngine, rx: RawHandle, tx: RawHandle, query: &[u8]) -> Result<RawResults> {
    let query = BufView::new(query, "query")?;
    engine.delete_query_tx(rx, tx, query.raw()).decode(engine)
}

/// Updates the items a query matches.
pub unsafe fn update_query(engine: &dyn NativeEngine, rx: RawHandle, ctx: ExecContext, query: &[u8]) -> Result<RawResults> {
    let query = BufView::new(query, "query")?;
    engine.update_query(rx, query.raw(), ctx.encode()).decode(engine)
}

/// Queues an update-by-query inside a transaction.
pub unsafe fn update_query_tx(engine: &dyn NativeEngine, rx: RawHandle, tx: RawHandle, query: &[u8]) -> Result<RawResults> {
    let query = BufView::new(query, "query")?;
    engine.update_query_tx(rx, tx, query.raw()).decode(engine)
}

/// A buffer produced by `cptr2cjson`, released on drop.
struct CJsonGuard<'e> {
    engine: &'e dyn NativeEngine,
    raw: reindexer_buffer,
}

impl CJsonGuard<'_> {
    fn bytes(&self) -> &[u8] {
        if self.raw.data.is_null() || self.raw.len <= 0 {
            return &[];
        }
        // Safety: the engine keeps the buffer alive until free_cjson.
        unsafe { std::slice::from_raw_parts(self.raw.data, self.raw.len as usize) }
    }
}

impl Drop for CJsonGuard<'_> {
    fn drop(&mut self) {
        unsafe { self.engine.free_cjson(self.raw) };
    }
}

/// Copies out the encoded payload of one item of a result set.
pub unsafe fn item_bytes(engine: &dyn NativeEngine, results: RawHandle, item_ptr: usize, ns_id: i32) -> Vec<u8> {
    let guard = CJsonGuard {
        engine,
        raw: engine.cptr2cjson(results, item_ptr, ns_id),
    };
    guard.bytes().to_vec()
}

/// Releases a result set.
pub unsafe fn release_results(engine: &dyn NativeEngine, results: RawHandle) {
    engine.free_buffer(reindexer_resbuffer {
        results_ptr: results,
        data: 0,
        len: 0,
    });
}

/// Stores a metadata value.
pub unsafe fn put_meta(
    engine: &dyn NativeEngine,
    rx: RawHandle,
    ctx: ExecContext,
    ns: &str,
    key: &str,
    value: &str,
) -> Result<()> {
    let ns = StrView::new(ns, "namespace")?;
    let key = StrView::new(key, "meta key")?;
    let value = StrView::new(value, "meta value")?;
    engine
        .put_meta(rx, ns.raw(), key.raw(), value.raw(), ctx.encode())
        .decode(engine)
}

/// Reads a metadata value.
pub unsafe fn get_meta(engine: &dyn NativeEngine, rx: RawHandle, ctx: ExecContext, ns: &str, key: &str) -> Result<RawResults> {
    let ns = StrView::new(ns, "namespace")?;
    let key = StrView::new(key, "meta key")?;
    engine.get_meta(rx, ns.raw(), key.raw(), ctx.encode()).decode(engine)
}

/// Runs the embedded server. Blocks until it stops.
pub unsafe fn start_server(engine: &dyn NativeEngine, svc: RawHandle, yaml: &str) -> Result<()> {
    let yaml = StrView::new(yaml, "server config")?;
    engine.start_server(svc, yaml.raw()).decode(engine)
}

/// Asks the embedded server to stop.
pub unsafe fn stop_server(engine: &dyn NativeEngine, svc: RawHandle) -> Result<()> {
    engine.stop_server(svc).decode(engine)
}

/// Returns true once the embedded server accepts work.
pub unsafe fn is_server_ready(engine: &dyn NativeEngine, svc: RawHandle) -> bool {
    engine.check_server_ready(svc) != 0
}

/// Obtains the engine instance of one database of the embedded server.
pub unsafe fn get_instance(
    engine: &dyn NativeEngine,
    svc: RawHandle,
    database: &str,
    user: &str,
    password: &str,
) -> Result<NonZeroUsize> {
    let database = StrView::new(database, "database")?;
    let user = StrView::new(user, "user")?;
    let password = StrView::new(password, "password")?;
    let mut rx: RawHandle = 0;
    engine
        .get_instance(svc, database.raw(), user.raw(), password.raw(), &mut rx)
        .decode(engine)?;
    NonZeroUsize::new(rx).ok_or(Error::NullHandle(HandleKind::Connection))
}
