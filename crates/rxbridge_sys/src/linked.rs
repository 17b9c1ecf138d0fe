//! `NativeEngine` backed by the linked C library.

use crate::ctypes::{
    reindexer_buffer, reindexer_ctx_info, reindexer_error, reindexer_resbuffer, reindexer_ret,
    reindexer_string, reindexer_tx_ret, ConnectOpts, StorageOpts,
};
use crate::engine::{NativeEngine, RawHandle};
use std::ffi::{c_char, c_int, c_void};

extern "C" {
    fn init_reindexer() -> usize;
    fn destroy_reindexer(rx: usize);
    fn reindexer_connect(
        rx: usize,
        dsn: reindexer_string,
        opts: ConnectOpts,
        client_vers: reindexer_string,
    ) -> reindexer_error;

    fn reindexer_open_namespace(
        rx: usize,
        ns: reindexer_string,
        opts: StorageOpts,
        ctx: reindexer_ctx_info,
    ) -> reindexer_error;
    fn reindexer_close_namespace(rx: usize, ns: reindexer_string, ctx: reindexer_ctx_info) -> reindexer_error;
    fn reindexer_drop_namespace(rx: usize, ns: reindexer_string, ctx: reindexer_ctx_info) -> reindexer_error;
    fn reindexer_add_index(
        rx: usize,
        ns: reindexer_string,
        index_def_json: reindexer_string,
        ctx: reindexer_ctx_info,
    ) -> reindexer_error;

    fn reindexer_modify_item_packed(
        rx: usize,
        args: reindexer_buffer,
        data: reindexer_buffer,
        ctx: reindexer_ctx_info,
    ) -> reindexer_ret;

    fn reindexer_start_transaction(rx: usize, ns: reindexer_string) -> reindexer_tx_ret;
    fn reindexer_modify_item_packed_tx(
        rx: usize,
        tr: usize,
        args: reindexer_buffer,
        data: reindexer_buffer,
    ) -> reindexer_ret;
    fn reindexer_commit_transaction(rx: usize, tr: usize, ctx: reindexer_ctx_info) -> reindexer_error;
    fn reindexer_rollback_transaction(rx: usize, tr: usize) -> reindexer_error;

    fn reindexer_select_query(
        rx: usize,
        query: reindexer_buffer,
        as_json: c_int,
        pt_versions: *mut i32,
        pt_versions_count: c_int,
        ctx: reindexer_ctx_info,
    ) -> reindexer_ret;
    fn reindexer_delete_query(rx: usize, query: reindexer_buffer, ctx: reindexer_ctx_info) -> reindexer_ret;
    fn reindexer_delete_query_tx(rx: usize, tr: usize, query: reindexer_buffer) -> reindexer_ret;
    fn reindexer_update_query(rx: usize, query: reindexer_buffer, ctx: reindexer_ctx_info) -> reindexer_ret;
    fn reindexer_update_query_tx(rx: usize, tr: usize, query: reindexer_buffer) -> reindexer_ret;

    fn reindexer_cptr2cjson(results_ptr: usize, cptr: usize, ns_id: c_int) -> reindexer_buffer;
    fn reindexer_free_cjson(b: reindexer_buffer);
    fn reindexer_free_buffer(out: reindexer_resbuffer);

    fn reindexer_put_meta(
        rx: usize,
        ns: reindexer_string,
        key: reindexer_string,
        data: reindexer_string,
        ctx: reindexer_ctx_info,
    ) -> reindexer_error;
    fn reindexer_get_meta(
        rx: usize,
        ns: reindexer_string,
        key: reindexer_string,
        ctx: reindexer_ctx_info,
    ) -> reindexer_ret;

    fn init_reindexer_server() -> usize;
    fn destroy_reindexer_server(psvc: usize);
    fn start_reindexer_server(psvc: usize, config: reindexer_string) -> reindexer_error;
    fn stop_reindexer_server(psvc: usize) -> reindexer_error;
    fn check_server_ready(psvc: usize) -> c_int;
    fn get_reindexer_instance(
        psvc: usize,
        db_name: reindexer_string,
        user: reindexer_string,
        pass: reindexer_string,
        rx: *mut usize,
    ) -> reindexer_error;
}

/// The engine provided by the linked `reindexer` library.
///
/// Zero-sized; every method forwards to the C symbol of the same name.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkedEngine;

impl LinkedEngine {
    /// Creates the engine.
    pub const fn new() -> Self {
        Self
    }
}

impl NativeEngine for LinkedEngine {
    fn init(&self) -> RawHandle {
        unsafe { init_reindexer() }
    }

    unsafe fn destroy(&self, rx: RawHandle) {
        destroy_reindexer(rx);
    }

    unsafe fn connect(
        &self,
        rx: RawHandle,
        dsn: reindexer_string,
        opts: ConnectOpts,
        client_version: reindexer_string,
    ) -> reindexer_error {
        reindexer_connect(rx, dsn, opts, client_version)
    }

    unsafe fn open_namespace(
        &self,
        rx: RawHandle,
        ns: reindexer_string,
        opts: StorageOpts,
        ctx: reindexer_ctx_info,
    ) -> reindexer_error {
        reindexer_open_namespace(rx, ns, opts, ctx)
    }

    unsafe fn close_namespace(
        &self,
        rx: RawHandle,
        ns: reindexer_string,
        ctx: reindexer_ctx_info,
    ) -> reindexer_error {
        reindexer_close_namespace(rx, ns, ctx)
    }

    unsafe fn drop_namespace(
        &self,
        rx: RawHandle,
        ns: reindexer_string,
        ctx: reindexer_ctx_info,
    ) -> reindexer_error {
        reindexer_drop_namespace(rx, ns, ctx)
    }

    unsafe fn add_index(
        &self,
        rx: RawHandle,
        ns: reindexer_string,
        index_def_json: reindexer_string,
        ctx: reindexer_ctx_info,
    ) -> reindexer_error {
        reindexer_add_index(rx, ns, index_def_json, ctx)
    }

    unsafe fn modify_item_packed(
        &self,
        rx: RawHandle,
        args: reindexer_buffer,
        data: reindexer_buffer,
        ctx: reindexer_ctx_info,
    ) -> reindexer_ret {
        reindexer_modify_item_packed(rx, args, data, ctx)
    }

    unsafe fn start_transaction(&self, rx: RawHandle, ns: reindexer_string) -> reindexer_tx_ret {
        reindexer_start_transaction(rx, ns)
    }

    unsafe fn modify_item_packed_tx(
        &self,
        rx: RawHandle,
        tx: RawHandle,
        args: reindexer_buffer,
        data: reindexer_buffer,
    ) -> reindexer_ret {
        reindexer_modify_item_packed_tx(rx, tx, args, data)
    }

    unsafe fn commit_transaction(
        &self,
        rx: RawHandle,
        tx: RawHandle,
        ctx: reindexer_ctx_info,
    ) -> reindexer_error {
        reindexer_commit_transaction(rx, tx, ctx)
    }

    unsafe fn rollback_transaction(&self, rx: RawHandle, tx: RawHandle) -> reindexer_error {
        reindexer_rollback_transaction(rx, tx)
    }

    unsafe fn select_query(
        &self,
        rx: RawHandle,
        query: reindexer_buffer,
        as_json: i32,
        pt_versions: *mut i32,
        pt_versions_count: i32,
        ctx: reindexer_ctx_info,
    ) -> reindexer_ret {
        reindexer_select_query(rx, query, as_json, pt_versions, pt_versions_count, ctx)
    }

    unsafe fn delete_query(
        &self,
        rx: RawHandle,
        query: reindexer_buffer,
        ctx: reindexer_ctx_info,
    ) -> reindexer_ret {
        reindexer_delete_query(rx, query, ctx)
    }

    unsafe fn delete_query_tx(
        &self,
        rx: RawHandle,
        tx: RawHandle,
        query: reindexer_buffer,
    ) -> reindexer_ret {
        reindexer_delete_query_tx(rx, tx, query)
    }

    unsafe fn update_query(
        &self,
        rx: RawHandle,
        query: reindexer_buffer,
        ctx: reindexer_ctx_info,
    ) -> reindexer_ret {
        reindexer_update_query(rx, query, ctx)
    }

    unsafe fn update_query_tx(
        &self,
        rx: RawHandle,
        tx: RawHandle,
        query: reindexer_buffer,
    ) -> reindexer_ret {
        reindexer_update_query_tx(rx, tx, query)
    }

    unsafe fn cptr2cjson(&self, results: RawHandle, cptr: usize, ns_id: i32) -> reindexer_buffer {
        reindexer_cptr2cjson(results, cptr, ns_id)
    }

    unsafe fn free_cjson(&self, buffer: reindexer_buffer) {
        reindexer_free_cjson(buffer);
    }

    unsafe fn free_buffer(&self, results: reindexer_resbuffer) {
        reindexer_free_buffer(results);
    }

    unsafe fn put_meta(
        &self,
        rx: RawHandle,
        ns: reindexer_string,
        key: reindexer_string,
        data: reindexer_string,
        ctx: reindexer_ctx_info,
    ) -> reindexer_error {
        reindexer_put_meta(rx, ns, key, data, ctx)
    }

    unsafe fn get_meta(
        &self,
        rx: RawHandle,
        ns: reindexer_string,
        key: reindexer_string,
        ctx: reindexer_ctx_info,
    ) -> reindexer_ret {
        reindexer_get_meta(rx, ns, key, ctx)
    }

    fn init_server(&self) -> RawHandle {
        unsafe { init_reindexer_server() }
    }

    unsafe fn destroy_server(&self, svc: RawHandle) {
        destroy_reindexer_server(svc);
    }

    unsafe fn start_server(&self, svc: RawHandle, yaml_config: reindexer_string) -> reindexer_error {
        start_reindexer_server(svc, yaml_config)
    }

    unsafe fn stop_server(&self, svc: RawHandle) -> reindexer_error {
        stop_reindexer_server(svc)
    }

    unsafe fn check_server_ready(&self, svc: RawHandle) -> i32 {
        check_server_ready(svc)
    }

    unsafe fn get_instance(
        &self,
        svc: RawHandle,
        db_name: reindexer_string,
        user: reindexer_string,
        password: reindexer_string,
        out_rx: *mut RawHandle,
    ) -> reindexer_error {
        get_reindexer_instance(svc, db_name, user, password, out_rx)
    }

    unsafe fn free_error_text(&self, what: *const c_char) {
        // Error strings are strdup'ed by the engine.
        libc::free(what as *mut c_void);
    }
}
