//! Query results and result-set handles.

use crate::connection::ConnectionInner;
use crate::dispatch;
use crate::envelope::RawResults;
use crate::error::{Error, Result};
use crate::registry::{HandleKind, Ticket};
use bytes::Bytes;
use rxbridge_sys::RawHandle;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A native result set.
///
/// Owns its handle: the handle is released exactly once, by [`close`] or on
/// drop, and item payloads can only be fetched while the value exists. A
/// result set keeps its connection alive.
///
/// A result set can move to another thread but is not `Sync`: the engine
/// assumes one user per result set, so it cannot be read through shared
/// references on several threads at once.
///
/// ```compile_fail
/// fn read_from_two_threads(rs: &rxbridge_core::ResultSet) {
///     std::thread::scope(|s| {
///         s.spawn(|| rs.item_bytes(1, 1));
///         s.spawn(|| rs.item_bytes(2, 1));
///     });
/// }
/// ```
///
/// A closed result set is gone:
///
/// ```compile_fail
/// fn read_after_close(rs: rxbridge_core::ResultSet) {
///     rs.close().unwrap();
///     rs.item_bytes(1, 1).unwrap();
/// }
/// ```
///
/// [`close`]: ResultSet::close
pub struct ResultSet {
    conn: Arc<ConnectionInner>,
    ticket: Option<Ticket>,
    _not_sync: PhantomData<Cell<()>>,
}

impl ResultSet {
    pub(crate) fn new(conn: Arc<ConnectionInner>, ticket: Ticket) -> Self {
        tracing::debug!(handle = ticket.raw(), generation = ticket.generation(), "result set opened");
        Self {
            conn,
            ticket: Some(ticket),
            _not_sync: PhantomData,
        }
    }

    /// Raw handle value, for diagnostics.
    pub fn raw(&self) -> RawHandle {
        self.ticket.as_ref().map_or(0, Ticket::raw)
    }

    /// Copies out the encoded payload of one item.
    ///
    /// `item_ptr` and `ns_id` come from the result payload; `ns_id` picks the
    /// namespace when the results span several (joins). The intermediate native
    /// buffer is released before this returns.
    pub fn item_bytes(&self, item_ptr: usize, ns_id: i32) -> Result<Vec<u8>> {
        let ticket = self.ticket()?;
        self.conn.registry.check(ticket)?;
        Ok(unsafe { dispatch::item_bytes(self.conn.engine(), ticket.raw(), item_ptr, ns_id) })
    }

    /// Releases the result set.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn ticket(&self) -> Result<&Ticket> {
        // Only `release` takes the ticket, and it runs from `close` or `Drop`.
        self.ticket.as_ref().ok_or(Error::HandleMisuse {
            kind: HandleKind::ResultSet,
            handle: 0,
        })
    }

    fn release(&mut self) -> Result<()> {
        let Some(ticket) = self.ticket.take() else {
            return Ok(());
        };
        self.conn.registry.close(&ticket)?;
        unsafe { dispatch::release_results(self.conn.engine(), ticket.raw()) };
        tracing::debug!(handle = ticket.raw(), "result set released");
        Ok(())
    }
}

impl Drop for ResultSet {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(error = %e, "failed to release result set");
        }
    }
}

impl fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSet")
            .field("handle", &self.raw())
            .finish_non_exhaustive()
    }
}

/// Successful output of a data-result call.
///
/// The payload is an owned copy; its layout is defined by the engine and
/// passed through untouched. The result set, when the engine produced one, is
/// released when this value (or the set taken out of it) is dropped.
#[derive(Debug)]
pub struct QueryResults {
    payload: Bytes,
    results: Option<ResultSet>,
}

impl QueryResults {
    pub(crate) fn adopt(conn: &Arc<ConnectionInner>, raw: RawResults) -> Self {
        let results = raw.results.map(|handle| {
            let ticket = conn.registry.register(HandleKind::ResultSet, handle);
            ResultSet::new(Arc::clone(conn), ticket)
        });
        Self {
            payload: raw.payload,
            results,
        }
    }

    /// Encoded result payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The result set, if the engine produced one.
    pub fn result_set(&self) -> Option<&ResultSet> {
        self.results.as_ref()
    }

    /// Splits into payload and result set.
    pub fn into_parts(self) -> (Bytes, Option<ResultSet>) {
        (self.payload, self.results)
    }

    /// Releases the result set now, reporting a failure instead of logging it.
    pub fn close(self) -> Result<Bytes> {
        if let Some(results) = self.results {
            results.close()?;
        }
        Ok(self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}

    #[test]
    fn result_sets_can_move_between_threads() {
        assert_send::<ResultSet>();
        assert_send::<QueryResults>();
    }
}
