//! Registry of live native handles.
//!
//! The engine names result sets and transactions with bare integers and may
//! hand out the same number again once a handle is released. Each registration
//! therefore gets a generation; a [`Ticket`] is only honoured while its
//! generation is the current one. Released handles are removed.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use rxbridge_sys::RawHandle;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Kind of native handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// Engine instance.
    Connection,
    /// Materialised query results.
    ResultSet,
    /// Open transaction.
    Transaction,
    /// Embedded server instance.
    Server,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandleKind::Connection => "connection",
            HandleKind::ResultSet => "result set",
            HandleKind::Transaction => "transaction",
            HandleKind::Server => "server",
        })
    }
}

/// State of a registered handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Usable.
    Open,
    /// Released; any further use is rejected.
    Closed,
}

/// Proof of one registration.
///
/// Not `Clone`: the owner of a ticket is the only one who can close it.
#[derive(Debug, PartialEq, Eq)]
pub struct Ticket {
    kind: HandleKind,
    raw: NonZeroUsize,
    generation: u64,
}

impl Ticket {
    /// Kind of handle.
    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Raw native handle.
    pub fn raw(&self) -> RawHandle {
        self.raw.get()
    }

    /// Registration generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Tracks the open result-set and transaction handles of one connection.
///
/// Only open handles are kept. Generations come from one counter shared by
/// every handle, so a ticket whose entry was removed and later re-registered
/// can never match again.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    entries: Mutex<HashMap<(HandleKind, RawHandle), u64>>,
    next_generation: AtomicU64,
}

impl HandleRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a freshly produced handle as open.
    ///
    /// A number seen before gets a new generation, which invalidates every
    /// ticket issued for the earlier one.
    pub fn register(&self, kind: HandleKind, raw: NonZeroUsize) -> Ticket {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        if self.entries.lock().insert((kind, raw.get()), generation).is_some() {
            tracing::warn!(%kind, handle = raw.get(), "native engine reissued a handle that is still open");
        }
        Ticket { kind, raw, generation }
    }

    /// Fails unless `ticket` names the current, open registration.
    pub fn check(&self, ticket: &Ticket) -> Result<()> {
        match self.entries.lock().get(&(ticket.kind, ticket.raw())) {
            Some(g) if *g == ticket.generation => Ok(()),
            _ => Err(misuse(ticket)),
        }
    }

    /// Forgets the registration.
    ///
    /// Fails without touching the registry if the ticket is stale or already
    /// closed, so the caller never releases the native handle twice.
    pub fn close(&self, ticket: &Ticket) -> Result<()> {
        let mut entries = self.entries.lock();
        let key = (ticket.kind, ticket.raw());
        match entries.get(&key) {
            Some(g) if *g == ticket.generation => {
                entries.remove(&key);
                Ok(())
            }
            _ => Err(misuse(ticket)),
        }
    }

    /// State of the registration named by `ticket`.
    pub fn state(&self, ticket: &Ticket) -> HandleState {
        match self.check(ticket) {
            Ok(()) => HandleState::Open,
            Err(_) => HandleState::Closed,
        }
    }

    /// Number of open handles of one kind.
    pub fn open_count(&self, kind: HandleKind) -> usize {
        self.entries.lock().keys().filter(|(k, _)| *k == kind).count()
    }
}

fn misuse(ticket: &Ticket) -> Error {
    Error::HandleMisuse {
        kind: ticket.kind,
        handle: ticket.raw(),
    }
}
