//! Decoding of native return values.
//!
//! The engine answers in three shapes: a bare status, a status with a payload
//! and result-set handle, and a status with a transaction handle. Each shape
//! implements [`Envelope`], which inspects the error code first and only then
//! decides how the remaining fields are read. Every call site ends up with the
//! same `Result<T>`, so nothing downstream looks at raw codes again.

use crate::error::{Error, Result};
use crate::registry::HandleKind;
use bytes::Bytes;
use rxbridge_sys::{reindexer_error, reindexer_ret, reindexer_tx_ret, NativeEngine};
use std::ffi::{c_char, CStr};
use std::num::NonZeroUsize;

/// A native return value that can be turned into a bridge result.
pub trait Envelope {
    /// What a successful call yields.
    type Output;

    /// Decodes the envelope, releasing any error text it carries.
    ///
    /// # Safety
    ///
    /// `self` must be the unmodified return value of a call on `engine`, and
    /// must be decoded at most once.
    unsafe fn decode(self, engine: &dyn NativeEngine) -> Result<Self::Output>;
}

/// Successful output of a data-result call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResults {
    /// Payload copied out of native memory.
    pub payload: Bytes,
    /// Result-set handle, if the engine produced one.
    pub results: Option<NonZeroUsize>,
}

/// Error text owned by the caller, released on drop.
struct NativeText<'e> {
    engine: &'e dyn NativeEngine,
    ptr: *const c_char,
}

impl<'e> NativeText<'e> {
    /// Takes ownership of `ptr`, which may be null.
    unsafe fn take(engine: &'e dyn NativeEngine, ptr: *const c_char) -> Self {
        Self { engine, ptr }
    }

    /// Copies the text into a managed string.
    fn to_managed(&self) -> Option<String> {
        if self.ptr.is_null() {
            return None;
        }
        // Safety: the engine hands out NUL-terminated strings.
        let text = unsafe { CStr::from_ptr(self.ptr) };
        Some(text.to_string_lossy().into_owned())
    }
}

impl Drop for NativeText<'_> {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { self.engine.free_error_text(self.ptr) };
        }
    }
}

/// Turns a failing code plus its (possibly null) text into an [`Error`].
unsafe fn failure(engine: &dyn NativeEngine, code: i32, what: *const c_char) -> Error {
    let text = NativeText::take(engine, what);
    Error::native(code, text.to_managed())
}

impl Envelope for reindexer_error {
    type Output = ();

    unsafe fn decode(self, engine: &dyn NativeEngine) -> Result<()> {
        if self.code == 0 {
            // Release stray text so success never leaks.
            drop(NativeText::take(engine, self.what));
            return Ok(());
        }
        Err(failure(engine, self.code, self.what))
    }
}

impl Envelope for reindexer_ret {
    type Output = RawResults;

    unsafe fn decode(self, engine: &dyn NativeEngine) -> Result<RawResults> {
        if self.err_code != 0 {
            // On this path `data` carries the error text, not results.
            return Err(failure(engine, self.err_code, self.out.data as *const c_char));
        }
        let payload = if self.out.data == 0 || self.out.len <= 0 {
            Bytes::new()
        } else {
            let src = std::slice::from_raw_parts(self.out.data as *const u8, self.out.len as usize);
            Bytes::copy_from_slice(src)
        };
        Ok(RawResults {
            payload,
            results: NonZeroUsize::new(self.out.results_ptr),
        })
    }
}

impl Envelope for reindexer_tx_ret {
    type Output = NonZeroUsize;

    unsafe fn decode(self, engine: &dyn NativeEngine) -> Result<NonZeroUsize> {
        self.err.decode(engine)?;
        NonZeroUsize::new(self.tx_id).ok_or(Error::NullHandle(HandleKind::Transaction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rxbridge_sys::*;
    use std::ffi::CString;

    /// Only implements error-text release; every other entry point is unused here.
    #[derive(Default)]
    struct TextSink {
        freed: Mutex<Vec<String>>,
    }

    impl TextSink {
        fn text(msg: &str) -> *const c_char {
            CString::new(msg).unwrap().into_raw()
        }
    }

    macro_rules! unused {
        () => {
            unreachable!("not used by envelope tests")
        };
    }

    impl NativeEngine for TextSink {
        fn init(&self) -> RawHandle { unused!() }
        unsafe fn destroy(&self, _: RawHandle) { unused!() }
        unsafe fn connect(&self, _: RawHandle, _: reindexer_string, _: ConnectOpts, _: reindexer_string) -> reindexer_error { unused!() }
        unsafe fn open_namespace(&self, _: RawHandle, _: reindexer_string, _: StorageOpts, _: reindexer_ctx_info) -> reindexer_error { unused!() }
        unsafe fn close_namespace(&self, _: RawHandle, _: reindexer_string, _: reindexer_ctx_info) -> reindexer_error { unused!() }
        unsafe fn drop_namespace(&self, _: RawHandle, _: reindexer_string, _: reindexer_ctx_info) -> reindexer_error { unused!() }
        unsafe fn add_index(&self, _: RawHandle, _: reindexer_string, _: reindexer_string, _: reindexer_ctx_info) -> reindexer_error { unused!() }
        unsafe fn modify_item_packed(&self, _: RawHandle, _: reindexer_buffer, _: reindexer_buffer, _: reindexer_ctx_info) -> reindexer_ret { unused!() }
        unsafe fn start_transaction(&self, _: RawHandle, _: reindexer_string) -> reindexer_tx_ret { unused!() }
        unsafe fn modify_item_packed_tx(&self, _: RawHandle, _: RawHandle, _: reindexer_buffer, _: reindexer_buffer) -> reindexer_ret { unused!() }
        unsafe fn commit_transaction(&self, _: RawHandle, _: RawHandle, _: reindexer_ctx_info) -> reindexer_error { unused!() }
        unsafe fn rollback_transaction(&self, _: RawHandle, _: RawHandle) -> reindexer_error { unused!() }
        unsafe fn select_query(&self, _: RawHandle, _: reindexer_buffer, _: i32, _: *mut i32, _: i32, _: reindexer_ctx_info) -> reindexer_ret { unused!() }
        unsafe fn delete_query(&self, _: RawHandle, _: reindexer_buffer, _: reindexer_ctx_info) -> reindexer_ret { unused!() }
        unsafe fn delete_query_tx(&self, _: RawHandle, _: RawHandle, _: reindexer_buffer) -> reindexer_ret { unused!() }
        unsafe fn update_query(&self, _: RawHandle, _: reindexer_buffer, _: reindexer_ctx_info) -> reindexer_ret { unused!() }
        unsafe fn update_query_tx(&self, _: RawHandle, _: RawHandle, _: reindexer_buffer) -> reindexer_ret { unused!() }
        unsafe fn cptr2cjson(&self, _: RawHandle, _: usize, _: i32) -> reindexer_buffer { unused!() }
        unsafe fn free_cjson(&self, _: reindexer_buffer) { unused!() }
        unsafe fn free_buffer(&self, _: reindexer_resbuffer) { unused!() }
        unsafe fn put_meta(&self, _: RawHandle, _: reindexer_string, _: reindexer_string, _: reindexer_string, _: reindexer_ctx_info) -> reindexer_error { unused!() }
        unsafe fn get_meta(&self, _: RawHandle, _: reindexer_string, _: reindexer_string, _: reindexer_ctx_info) -> reindexer_ret { unused!() }
        fn init_server(&self) -> RawHandle { unused!() }
        unsafe fn destroy_server(&self, _: RawHandle) { unused!() }
        unsafe fn start_server(&self, _: RawHandle, _: reindexer_string) -> reindexer_error { unused!() }
        unsafe fn stop_server(&self, _: RawHandle) -> reindexer_error { unused!() }
        unsafe fn check_server_ready(&self, _: RawHandle) -> i32 { unused!() }
        unsafe fn get_instance(&self, _: RawHandle, _: reindexer_string, _: reindexer_string, _: reindexer_string, _: *mut RawHandle) -> reindexer_error { unused!() }

        unsafe fn free_error_text(&self, what: *const c_char) {
            let text = CString::from_raw(what as *mut c_char);
            self.freed.lock().push(text.into_string().unwrap());
        }
    }

    #[test]
    fn status_ok() {
        let sink = TextSink::default();
        let res = unsafe { reindexer_error::ok().decode(&sink) };
        assert!(res.is_ok());
        assert!(sink.freed.lock().is_empty());
    }

    #[test]
    fn status_failure_copies_then_frees() {
        let sink = TextSink::default();
        let raw = reindexer_error {
            what: TextSink::text("Namespace 'x' does not exist"),
            code: 13,
        };
        let err = unsafe { raw.decode(&sink) }.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("Namespace 'x' does not exist"));
        assert_eq!(*sink.freed.lock(), vec!["Namespace 'x' does not exist".to_string()]);
    }

    #[test]
    fn status_failure_without_text() {
        let sink = TextSink::default();
        let raw = reindexer_error {
            what: std::ptr::null(),
            code: 4,
        };
        let err = unsafe { raw.decode(&sink) }.unwrap_err();
        assert!(err.to_string().contains("code 4"));
    }

    #[test]
    fn data_failure_reads_payload_as_text() {
        let sink = TextSink::default();
        let raw = reindexer_ret {
            out: reindexer_resbuffer {
                results_ptr: 0,
                data: TextSink::text("bad query") as usize,
                len: 0,
            },
            err_code: 1,
        };
        let err = unsafe { raw.decode(&sink) }.unwrap_err();
        match err {
            Error::Native { message, .. } => assert_eq!(message, "bad query"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(sink.freed.lock().len(), 1);
    }

    #[test]
    fn data_success_copies_payload() {
        let sink = TextSink::default();
        let payload = vec![9u8, 8, 7];
        let raw = reindexer_ret {
            out: reindexer_resbuffer {
                results_ptr: 0x40,
                data: payload.as_ptr() as usize,
                len: 3,
            },
            err_code: 0,
        };
        let out = unsafe { raw.decode(&sink) }.unwrap();
        drop(payload);
        assert_eq!(&out.payload[..], &[9, 8, 7]);
        assert_eq!(out.results.map(NonZeroUsize::get), Some(0x40));
    }

    #[test]
    fn data_success_without_results() {
        let sink = TextSink::default();
        let raw = reindexer_ret {
            out: reindexer_resbuffer {
                results_ptr: 0,
                data: 0,
                len: 0,
            },
            err_code: 0,
        };
        let out = unsafe { raw.decode(&sink) }.unwrap();
        assert!(out.payload.is_empty());
        assert!(out.results.is_none());
    }

    #[test]
    fn tx_results() {
        let sink = TextSink::default();
        let ok = reindexer_tx_ret {
            tx_id: 17,
            err: reindexer_error::ok(),
        };
        assert_eq!(unsafe { ok.decode(&sink) }.unwrap().get(), 17);

        let null = reindexer_tx_ret {
            tx_id: 0,
            err: reindexer_error::ok(),
        };
        assert!(matches!(
            unsafe { null.decode(&sink) },
            Err(Error::NullHandle(HandleKind::Transaction))
        ));

        let failed = reindexer_tx_ret {
            tx_id: 0,
            err: reindexer_error {
                what: TextSink::text("no such namespace"),
                code: 13,
            },
        };
        assert!(unsafe { failed.decode(&sink) }.unwrap_err().is_not_found());
        assert_eq!(sink.freed.lock().len(), 1);
    }
}
