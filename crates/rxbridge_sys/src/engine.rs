//! The native engine seam.

use crate::ctypes::{
    reindexer_buffer, reindexer_ctx_info, reindexer_error, reindexer_resbuffer, reindexer_ret,
    reindexer_string, reindexer_tx_ret, ConnectOpts, StorageOpts,
};
use std::ffi::c_char;

/// An opaque native handle (`uintptr_t`). Zero means "absent".
pub type RawHandle = usize;

/// The C call surface of an embedded engine.
///
/// Every method mirrors one exported C function. Implementors must honour the
/// engine's ownership contract exactly:
///
/// - string and buffer arguments are borrowed for the duration of the call only
/// - a non-null `reindexer_error::what`, and `reindexer_ret::out.data` when
///   `err_code != 0`, are heap strings the caller releases with
///   [`free_error_text`](Self::free_error_text)
/// - a non-zero `results_ptr` is released exactly once with
///   [`free_buffer`](Self::free_buffer)
/// - a buffer returned by [`cptr2cjson`](Self::cptr2cjson) is released exactly
///   once with [`free_cjson`](Self::free_cjson), even when empty
///
/// # Thread Safety
///
/// The bridge adds no locking around handles. Whatever concurrency the engine
/// allows per handle is what callers get; implementations must therefore be
/// `Send + Sync` and internally synchronised.
///
/// # Implementors
///
/// - `LinkedEngine` (feature `linked`) - the real library
/// - `rxbridge_testkit::MemoryEngine` - for testing
///
/// # Safety
///
/// All methods take raw pointers embedded in `#[repr(C)]` records. Callers
/// must pass views that are valid for the duration of the call and handles
/// that were produced by the same engine and not yet released.
#[allow(clippy::missing_safety_doc)]
pub trait NativeEngine: Send + Sync {
    /// Creates an engine instance. Never returns zero on success.
    fn init(&self) -> RawHandle;
    /// Destroys an engine instance. Must be the last call on `rx`.
    unsafe fn destroy(&self, rx: RawHandle);
    /// Opens or validates the backing storage named by `dsn`.
    unsafe fn connect(
        &self,
        rx: RawHandle,
        dsn: reindexer_string,
        opts: ConnectOpts,
        client_version: reindexer_string,
    ) -> reindexer_error;

    /// Opens (optionally creating) a namespace.
    unsafe fn open_namespace(
        &self,
        rx: RawHandle,
        ns: reindexer_string,
        opts: StorageOpts,
        ctx: reindexer_ctx_info,
    ) -> reindexer_error;
    /// Closes a namespace.
    unsafe fn close_namespace(
        &self,
        rx: RawHandle,
        ns: reindexer_string,
        ctx: reindexer_ctx_info,
    ) -> reindexer_error;
    /// Drops a namespace and its storage.
    unsafe fn drop_namespace(
        &self,
        rx: RawHandle,
        ns: reindexer_string,
        ctx: reindexer_ctx_info,
    ) -> reindexer_error;
    /// Adds an index described by JSON text.
    unsafe fn add_index(
        &self,
        rx: RawHandle,
        ns: reindexer_string,
        index_def_json: reindexer_string,
        ctx: reindexer_ctx_info,
    ) -> reindexer_error;

    /// Inserts, updates, upserts or deletes one item.
    unsafe fn modify_item_packed(
        &self,
        rx: RawHandle,
        args: reindexer_buffer,
        data: reindexer_buffer,
        ctx: reindexer_ctx_info,
    ) -> reindexer_ret;

    /// Starts a transaction bound to one namespace.
    unsafe fn start_transaction(&self, rx: RawHandle, ns: reindexer_string) -> reindexer_tx_ret;
    /// Queues an item modification inside a transaction.
    unsafe fn modify_item_packed_tx(
        &self,
        rx: RawHandle,
        tx: RawHandle,
        args: reindexer_buffer,
        data: reindexer_buffer,
    ) -> reindexer_ret;
    /// Applies a transaction. Releases `tx` whatever the outcome.
    unsafe fn commit_transaction(
        &self,
        rx: RawHandle,
        tx: RawHandle,
        ctx: reindexer_ctx_info,
    ) -> reindexer_error;
    /// Discards a transaction. Releases `tx` whatever the outcome.
    unsafe fn rollback_transaction(&self, rx: RawHandle, tx: RawHandle) -> reindexer_error;

    /// Executes a query.
    unsafe fn select_query(
        &self,
        rx: RawHandle,
        query: reindexer_buffer,
        as_json: i32,
        pt_versions: *mut i32,
        pt_versions_count: i32,
        ctx: reindexer_ctx_info,
    ) -> reindexer_ret;
    /// Deletes the items matched by a query.
    unsafe fn delete_query(
        &self,
        rx: RawHandle,
        query: reindexer_buffer,
        ctx: reindexer_ctx_info,
    ) -> reindexer_ret;
    /// Queues a delete-by-query inside a transaction.
    unsafe fn delete_query_tx(
        &self,
        rx: RawHandle,
        tx: RawHandle,
        query: reindexer_buffer,
    ) -> reindexer_ret;
    /// Updates the items matched by a query.
    unsafe fn update_query(
        &self,
        rx: RawHandle,
        query: reindexer_buffer,
        ctx: reindexer_ctx_info,
    ) -> reindexer_ret;
    /// Queues an update-by-query inside a transaction.
    unsafe fn update_query_tx(
        &self,
        rx: RawHandle,
        tx: RawHandle,
        query: reindexer_buffer,
    ) -> reindexer_ret;

    /// Materialises one item of a result set as an engine-owned buffer.
    unsafe fn cptr2cjson(&self, results: RawHandle, cptr: usize, ns_id: i32) -> reindexer_buffer;
    /// Releases a buffer returned by [`cptr2cjson`](Self::cptr2cjson).
    unsafe fn free_cjson(&self, buffer: reindexer_buffer);
    /// Releases a result set.
    unsafe fn free_buffer(&self, results: reindexer_resbuffer);

    /// Stores a metadata value.
    unsafe fn put_meta(
        &self,
        rx: RawHandle,
        ns: reindexer_string,
        key: reindexer_string,
        data: reindexer_string,
        ctx: reindexer_ctx_info,
    ) -> reindexer_error;
    /// Reads a metadata value as payload bytes.
    unsafe fn get_meta(
        &self,
        rx: RawHandle,
        ns: reindexer_string,
        key: reindexer_string,
        ctx: reindexer_ctx_info,
    ) -> reindexer_ret;

    /// Creates an embedded server instance.
    fn init_server(&self) -> RawHandle;
    /// Destroys an embedded server instance.
    unsafe fn destroy_server(&self, svc: RawHandle);
    /// Runs the server. Blocks until the server is stopped.
    unsafe fn start_server(&self, svc: RawHandle, yaml_config: reindexer_string) -> reindexer_error;
    /// Asks a running server to stop.
    unsafe fn stop_server(&self, svc: RawHandle) -> reindexer_error;
    /// Returns non-zero once the server accepts requests.
    unsafe fn check_server_ready(&self, svc: RawHandle) -> i32;
    /// Resolves a database instance of a running server.
    unsafe fn get_instance(
        &self,
        svc: RawHandle,
        db_name: reindexer_string,
        user: reindexer_string,
        password: reindexer_string,
        out_rx: *mut RawHandle,
    ) -> reindexer_error;

    /// Releases an error message returned by any call.
    unsafe fn free_error_text(&self, what: *const c_char);
}
