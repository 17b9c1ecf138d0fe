//! C records shared with the native engine.
//!
//! Layouts follow `reindexer_ctypes.h`. Names keep the C spelling so the
//! declarations can be checked against the header line by line.

#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_void};

/// Borrowed string view (not NUL-terminated).
///
/// `p` points to `n` bytes of UTF-8 owned by the caller for the duration of
/// one call.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct reindexer_string {
    /// Pointer to the first byte.
    pub p: *mut c_void,
    /// Length in bytes.
    pub n: i32,
    /// Reserved, always zero.
    pub reserved: [i8; 4],
}

impl reindexer_string {
    /// An empty view with a null pointer.
    pub const fn empty() -> Self {
        Self {
            p: std::ptr::null_mut(),
            n: 0,
            reserved: [0; 4],
        }
    }
}

/// Byte buffer view.
///
/// As an argument it borrows caller memory for one call. As the return value
/// of `reindexer_cptr2cjson` it is owned by the engine until passed to
/// `reindexer_free_cjson`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct reindexer_buffer {
    /// Pointer to data.
    pub data: *mut u8,
    /// Length in bytes.
    pub len: i32,
}

impl reindexer_buffer {
    /// An empty buffer with a null pointer.
    pub const fn empty() -> Self {
        Self {
            data: std::ptr::null_mut(),
            len: 0,
        }
    }
}

/// Output of a data-result call.
///
/// On success `data`/`len` describe the encoded results, owned by the result
/// set named by `results_ptr`. On failure `data` is reused as a pointer to a
/// NUL-terminated error message owned by the caller.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct reindexer_resbuffer {
    /// Opaque result-set handle, zero when none was produced.
    pub results_ptr: usize,
    /// Payload pointer, or error text pointer on failure.
    pub data: usize,
    /// Payload length in bytes.
    pub len: i32,
}

/// Status-only return shape.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct reindexer_error {
    /// NUL-terminated message owned by the caller, null on success.
    pub what: *const c_char,
    /// Zero on success.
    pub code: i32,
}

impl reindexer_error {
    /// The success value.
    pub const fn ok() -> Self {
        Self {
            what: std::ptr::null(),
            code: 0,
        }
    }
}

/// Status + payload + result-set return shape.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct reindexer_ret {
    /// Payload or error text, see [`reindexer_resbuffer`].
    pub out: reindexer_resbuffer,
    /// Zero on success.
    pub err_code: i32,
}

/// Status + transaction handle return shape.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct reindexer_tx_ret {
    /// Opaque transaction handle, valid only when `err.code` is zero.
    pub tx_id: usize,
    /// Call status.
    pub err: reindexer_error,
}

/// Execution context consumed by every cancellable call.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct reindexer_ctx_info {
    /// Caller-chosen id used to cancel the call from elsewhere.
    pub ctx_id: u64,
    /// Timeout in milliseconds, zero for none.
    pub exec_timeout: i64,
}

/// Namespace storage options bit field.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageOpts {
    /// `STORAGE_OPT_*` bits.
    pub options: u16,
}

/// Storage is enabled for the namespace.
pub const STORAGE_OPT_ENABLED: u16 = 1;
/// Drop the namespace storage when its format cannot be read.
pub const STORAGE_OPT_DROP_ON_FILE_FORMAT_ERROR: u16 = 1 << 1;
/// Create the namespace storage when it does not exist.
pub const STORAGE_OPT_CREATE_IF_MISSING: u16 = 1 << 2;

/// Options for `reindexer_connect`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectOpts {
    /// `CONNECT_OPT_*` bits.
    pub options: u16,
    /// Expected cluster id, zero when unused.
    pub expected_cluster_id: i32,
}

/// Open every namespace found in storage on connect.
pub const CONNECT_OPT_OPEN_NAMESPACES: u16 = 1;
/// Keep connecting when some namespace fails to load.
pub const CONNECT_OPT_ALLOW_NAMESPACE_ERRORS: u16 = 1 << 1;
/// Try to repair damaged storage on connect.
pub const CONNECT_OPT_AUTOREPAIR: u16 = 1 << 2;
/// Only warn when the engine version differs from the expected one.
pub const CONNECT_OPT_WARN_VERSION: u16 = 1 << 4;
