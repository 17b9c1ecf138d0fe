//! Transactions.
//!
//! A [`Transaction`] is open from `begin_tx` until [`commit`] or [`rollback`]
//! consumes it. Both terminal calls release the native handle whether or not
//! they succeed, so a failed commit cannot be retried on the same value; start
//! a new transaction instead. Dropping an open transaction rolls it back.
//!
//! Operations inside a transaction carry no execution context: the
//! transaction itself is what gets cancelled. Only the commit has one.
//!
//! [`commit`]: Transaction::commit
//! [`rollback`]: Transaction::rollback

use crate::connection::ConnectionInner;
use crate::dispatch;
use crate::error::{Error, Result};
use crate::items::ItemArgs;
use crate::registry::{HandleKind, Ticket};
use crate::results::QueryResults;
use rxbridge_sys::RawHandle;
use std::fmt;
use std::sync::Arc;

/// An open transaction on one namespace.
///
/// Operations are applied in the order they are queued. Not meant to be
/// shared between threads.
pub struct Transaction {
    conn: Arc<ConnectionInner>,
    ticket: Option<Ticket>,
    namespace: String,
}

/// How a transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Commit,
    Rollback,
}

impl Transaction {
    pub(crate) fn new(conn: Arc<ConnectionInner>, ticket: Ticket, namespace: &str) -> Self {
        tracing::debug!(handle = ticket.raw(), namespace, "transaction started");
        Self {
            conn,
            ticket: Some(ticket),
            namespace: namespace.to_string(),
        }
    }

    /// Namespace the transaction is bound to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Raw handle value, zero once finished.
    pub fn raw(&self) -> RawHandle {
        self.ticket.as_ref().map_or(0, Ticket::raw)
    }

    /// Queues an item modification. The namespace in `args` is ignored.
    pub fn modify_item(&mut self, args: &ItemArgs, data: &[u8]) -> Result<QueryResults> {
        self.modify_item_raw(&args.encode_tx(), data)
    }

    /// Queues an item modification with pre-encoded arguments.
    pub fn modify_item_raw(&mut self, args: &[u8], data: &[u8]) -> Result<QueryResults> {
        let tx = self.open_handle()?;
        let conn = &self.conn;
        let raw = unsafe { dispatch::modify_item_tx(conn.engine(), conn.rx(), tx, args, data)? };
        Ok(QueryResults::adopt(conn, raw))
    }

    /// Queues a delete-by-query.
    pub fn delete_query(&mut self, query: &[u8]) -> Result<QueryResults> {
        let tx = self.open_handle()?;
        let conn = &self.conn;
        let raw = unsafe { dispatch::delete_query_tx(conn.engine(), conn.rx(), tx, query)? };
        Ok(QueryResults::adopt(conn, raw))
    }

    /// Queues an update-by-query.
    pub fn update_query(&mut self, query: &[u8]) -> Result<QueryResults> {
        let tx = self.open_handle()?;
        let conn = &self.conn;
        let raw = unsafe { dispatch::update_query_tx(conn.engine(), conn.rx(), tx, query)? };
        Ok(QueryResults::adopt(conn, raw))
    }

    /// Applies every queued operation.
    ///
    /// Consumes the transaction, so nothing can be queued afterwards:
    ///
    /// ```compile_fail
    /// use rxbridge_core::{ItemArgs, ItemMode, Transaction};
    ///
    /// fn modify_after_commit(mut tx: Transaction) {
    ///     tx.commit().unwrap();
    ///     tx.modify_item(&ItemArgs::new("items", ItemMode::Upsert), b"{}").unwrap();
    /// }
    /// ```
    pub fn commit(mut self) -> Result<()> {
        self.finish(Outcome::Commit)
    }

    /// Discards every queued operation.
    pub fn rollback(mut self) -> Result<()> {
        self.finish(Outcome::Rollback)
    }

    fn open_handle(&self) -> Result<RawHandle> {
        let ticket = self.ticket.as_ref().ok_or(Error::HandleMisuse {
            kind: HandleKind::Transaction,
            handle: 0,
        })?;
        self.conn.registry.check(ticket)?;
        Ok(ticket.raw())
    }

    fn finish(&mut self, outcome: Outcome) -> Result<()> {
        let Some(ticket) = self.ticket.take() else {
            return Ok(());
        };
        // Closed before the call: the engine frees the transaction either way.
        self.conn.registry.close(&ticket)?;
        let conn = &self.conn;
        let tx = ticket.raw();
        let res = match outcome {
            Outcome::Commit => unsafe { dispatch::commit_tx(conn.engine(), conn.rx(), tx, conn.context()) },
            Outcome::Rollback => unsafe { dispatch::rollback_tx(conn.engine(), conn.rx(), tx) },
        };
        match &res {
            Ok(()) => tracing::debug!(handle = tx, ?outcome, "transaction finished"),
            Err(e) => tracing::warn!(handle = tx, ?outcome, error = %e, "transaction finished with error"),
        }
        res
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.ticket.is_some() {
            if let Err(e) = self.finish(Outcome::Rollback) {
                tracing::debug!(error = %e, namespace = %self.namespace, "implicit rollback on drop failed");
            }
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("handle", &self.raw())
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
