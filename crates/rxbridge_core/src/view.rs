//! Borrowed views over caller memory.
//!
//! A view wraps a `&str` or `&[u8]` as the pointer+length record the engine
//! expects. The borrow checker ties the view to the source, so a view can never
//! outlive the memory it points into, and nothing needs releasing after the
//! call: the borrow simply ends. Each view is built right before the call that
//! consumes it; if building a later argument fails, views already built are
//! dropped on the early return.

use crate::error::{Error, Result};
use rxbridge_sys::{reindexer_buffer, reindexer_string};
use std::ffi::c_void;
use std::marker::PhantomData;

fn native_len(len: usize, what: &'static str) -> Result<i32> {
    i32::try_from(len).map_err(|_| Error::Marshal {
        what,
        reason: format!("length {len} exceeds the native limit of {} bytes", i32::MAX),
    })
}

/// A string argument borrowed for one native call.
#[derive(Debug, Clone, Copy)]
pub struct StrView<'a> {
    raw: reindexer_string,
    _src: PhantomData<&'a str>,
}

impl<'a> StrView<'a> {
    /// Borrows `value`. `what` names the argument in marshal errors.
    pub fn new(value: &'a str, what: &'static str) -> Result<Self> {
        let n = native_len(value.len(), what)?;
        Ok(Self {
            raw: reindexer_string {
                p: value.as_ptr() as *mut c_void,
                n,
                reserved: [0; 4],
            },
            _src: PhantomData,
        })
    }

    /// The C record. Valid while `self` is alive.
    pub fn raw(&self) -> reindexer_string {
        self.raw
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.raw.n as usize
    }

    /// Returns true for an empty string.
    pub fn is_empty(&self) -> bool {
        self.raw.n == 0
    }
}

/// A byte-buffer argument borrowed for one native call.
#[derive(Debug, Clone, Copy)]
pub struct BufView<'a> {
    raw: reindexer_buffer,
    _src: PhantomData<&'a [u8]>,
}

impl<'a> BufView<'a> {
    /// Borrows `value`. `what` names the argument in marshal errors.
    pub fn new(value: &'a [u8], what: &'static str) -> Result<Self> {
        let len = native_len(value.len(), what)?;
        Ok(Self {
            raw: reindexer_buffer {
                data: value.as_ptr() as *mut u8,
                len,
            },
            _src: PhantomData,
        })
    }

    /// The C record. Valid while `self` is alive.
    pub fn raw(&self) -> reindexer_buffer {
        self.raw
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.raw.len as usize
    }

    /// Returns true for an empty buffer.
    pub fn is_empty(&self) -> bool {
        self.raw.len == 0
    }
}

/// The payload-format versions array of a select call.
#[derive(Debug, Clone, Copy)]
pub struct VersionsView<'a> {
    ptr: *mut i32,
    count: i32,
    _src: PhantomData<&'a [i32]>,
}

impl<'a> VersionsView<'a> {
    /// Borrows `versions`.
    pub fn new(versions: &'a [i32]) -> Result<Self> {
        let count = native_len(versions.len(), "payload versions")?;
        Ok(Self {
            ptr: versions.as_ptr() as *mut i32,
            count,
            _src: PhantomData,
        })
    }

    /// Pointer to the first version.
    pub fn ptr(&self) -> *mut i32 {
        self.ptr
    }

    /// Number of versions.
    pub fn count(&self) -> i32 {
        self.count
    }
}
