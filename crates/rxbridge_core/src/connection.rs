//! Engine instances.

use crate::config::{BridgeConfig, Dsn};
use crate::context::{ContextIds, ExecContext};
use crate::dispatch;
use crate::error::{Error, Result};
use crate::items::ItemArgs;
use crate::namespace::{ConnectOptions, IndexDef, StorageOptions};
use crate::registry::{HandleKind, HandleRegistry};
use crate::results::QueryResults;
use crate::server::ServerInner;
use crate::transaction::Transaction;
use bytes::Bytes;
use rxbridge_sys::{NativeEngine, RawHandle};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Who releases the native instance.
enum Owner {
    /// Created by `init`; destroyed with the connection.
    Engine,
    /// Handed out by an embedded server, which outlives it.
    Server(#[allow(dead_code)] Arc<ServerInner>),
}

pub(crate) struct ConnectionInner {
    engine: Arc<dyn NativeEngine>,
    rx: NonZeroUsize,
    pub(crate) registry: HandleRegistry,
    ctx_ids: ContextIds,
    config: BridgeConfig,
    owner: Owner,
}

impl ConnectionInner {
    pub(crate) fn engine(&self) -> &dyn NativeEngine {
        &*self.engine
    }

    pub(crate) fn rx(&self) -> RawHandle {
        self.rx.get()
    }

    /// A fresh context carrying the configured timeout.
    pub(crate) fn context(&self) -> ExecContext {
        self.ctx_ids.next_context(self.config.request_timeout)
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        match self.owner {
            Owner::Engine => {
                unsafe { self.engine.destroy(self.rx.get()) };
                tracing::debug!(handle = self.rx.get(), "engine instance destroyed");
            }
            Owner::Server(_) => {
                tracing::debug!(handle = self.rx.get(), "server database instance released");
            }
        }
    }
}

/// A connection to one engine instance.
///
/// Cloning is cheap and shares the instance. The native instance is destroyed
/// once the last clone, and every result set and transaction obtained from
/// it, is gone.
///
/// # Thread Safety
///
/// `Reindexer` is `Send + Sync`; concurrent calls go straight to the engine,
/// which decides what may run in parallel.
#[derive(Clone)]
pub struct Reindexer {
    inner: Arc<ConnectionInner>,
}

impl Reindexer {
    /// Creates an engine instance without connecting it.
    pub fn init(engine: Arc<dyn NativeEngine>, config: BridgeConfig) -> Result<Self> {
        let rx = NonZeroUsize::new(engine.init()).ok_or(Error::NullHandle(HandleKind::Connection))?;
        tracing::debug!(handle = rx.get(), "engine instance created");
        Ok(Self::wrap(engine, rx, config, Owner::Engine))
    }

    pub(crate) fn from_server(server: Arc<ServerInner>, rx: NonZeroUsize, config: BridgeConfig) -> Self {
        tracing::debug!(handle = rx.get(), "server database instance obtained");
        let engine = Arc::clone(server.engine_arc());
        Self::wrap(engine, rx, config, Owner::Server(server))
    }

    fn wrap(engine: Arc<dyn NativeEngine>, rx: NonZeroUsize, config: BridgeConfig, owner: Owner) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                engine,
                rx,
                registry: HandleRegistry::new(),
                ctx_ids: ContextIds::new(),
                config,
                owner,
            }),
        }
    }

    /// Creates an instance and connects it to the storage named by a
    /// `builtin://` DSN.
    ///
    /// The instance is destroyed again if connecting fails.
    pub fn open(engine: Arc<dyn NativeEngine>, dsn: &Dsn, config: BridgeConfig) -> Result<Self> {
        let path = match dsn {
            Dsn::Builtin { path } => path,
            Dsn::BuiltinServer { .. } => {
                return Err(Error::config("builtinserver DSNs are opened through EmbeddedServer"));
            }
        };
        let db = Self::init(engine, config)?;
        if let Err(e) = db.connect(path, ConnectOptions::default()) {
            tracing::error!(error = %e, "connect failed");
            return Err(e);
        }
        Ok(db)
    }

    /// Connects the instance to its storage, sending the configured expected
    /// engine version.
    pub fn connect(&self, path: &str, opts: ConnectOptions) -> Result<()> {
        let inner = &self.inner;
        unsafe { dispatch::connect(inner.engine(), inner.rx(), path, opts, &inner.config.expected_version) }
    }

    /// Raw instance handle.
    pub fn raw(&self) -> RawHandle {
        self.inner.rx()
    }

    /// Connection settings.
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Opens a namespace.
    pub fn open_namespace(&self, ns: &str, storage: StorageOptions) -> Result<()> {
        let inner = &self.inner;
        unsafe { dispatch::open_namespace(inner.engine(), inner.rx(), inner.context(), ns, storage) }
    }

    /// Closes a namespace, keeping its storage.
    pub fn close_namespace(&self, ns: &str) -> Result<()> {
        let inner = &self.inner;
        unsafe { dispatch::close_namespace(inner.engine(), inner.rx(), inner.context(), ns) }
    }

    /// Drops a namespace together with its storage.
    pub fn drop_namespace(&self, ns: &str) -> Result<()> {
        let inner = &self.inner;
        unsafe { dispatch::drop_namespace(inner.engine(), inner.rx(), inner.context(), ns) }
    }

    /// Adds an index.
    pub fn add_index(&self, ns: &str, index: &IndexDef) -> Result<()> {
        let json = index.to_json()?;
        self.add_index_json(ns, &json)
    }

    /// Adds an index given as raw JSON.
    pub fn add_index_json(&self, ns: &str, index_json: &str) -> Result<()> {
        let inner = &self.inner;
        unsafe { dispatch::add_index(inner.engine(), inner.rx(), inner.context(), ns, index_json) }
    }

    /// Modifies one item. `data` is the item in the format named by `args`.
    pub fn modify_item(&self, args: &ItemArgs, data: &[u8]) -> Result<QueryResults> {
        self.modify_item_raw(&args.encode(), data)
    }

    /// Modifies one item with pre-encoded arguments.
    pub fn modify_item_raw(&self, args: &[u8], data: &[u8]) -> Result<QueryResults> {
        let inner = &self.inner;
        let raw = unsafe { dispatch::modify_item(inner.engine(), inner.rx(), inner.context(), args, data)? };
        Ok(QueryResults::adopt(inner, raw))
    }

    /// Starts a transaction on `ns`.
    pub fn begin_tx(&self, ns: &str) -> Result<Transaction> {
        let inner = &self.inner;
        let tx = unsafe { dispatch::begin_tx(inner.engine(), inner.rx(), ns)? };
        let ticket = inner.registry.register(HandleKind::Transaction, tx);
        Ok(Transaction::new(Arc::clone(inner), ticket, ns))
    }

    /// Runs a select query.
    ///
    /// `as_json` picks JSON instead of binary payload encoding; `versions`
    /// lists the payload-format versions already cached per namespace.
    pub fn select(&self, query: &[u8], as_json: bool, versions: &[i32]) -> Result<QueryResults> {
        let inner = &self.inner;
        let raw = unsafe { dispatch::select(inner.engine(), inner.rx(), inner.context(), query, as_json, versions)? };
        Ok(QueryResults::adopt(inner, raw))
    }

    /// Deletes the items matched by a query.
    pub fn delete_query(&self, query: &[u8]) -> Result<QueryResults> {
        let inner = &self.inner;
        let raw = unsafe { dispatch::delete_query(inner.engine(), inner.rx(), inner.context(), query)? };
        Ok(QueryResults::adopt(inner, raw))
    }

    /// Updates the items matched by a query.
    pub fn update_query(&self, query: &[u8]) -> Result<QueryResults> {
        let inner = &self.inner;
        let raw = unsafe { dispatch::update_query(inner.engine(), inner.rx(), inner.context(), query)? };
        Ok(QueryResults::adopt(inner, raw))
    }

    /// Stores a metadata value.
    ///
    /// Fire-and-forget: a failure is logged, not returned.
    pub fn put_meta(&self, ns: &str, key: &str, value: &str) {
        let inner = &self.inner;
        let res = unsafe { dispatch::put_meta(inner.engine(), inner.rx(), inner.context(), ns, key, value) };
        if let Err(e) = res {
            tracing::warn!(namespace = ns, key, error = %e, "put_meta failed");
        }
    }

    /// Reads a metadata value. A key that was never set is an engine error.
    pub fn get_meta(&self, ns: &str, key: &str) -> Result<Bytes> {
        let inner = &self.inner;
        let raw = unsafe { dispatch::get_meta(inner.engine(), inner.rx(), inner.context(), ns, key)? };
        QueryResults::adopt(inner, raw).close()
    }

    /// Reads a metadata value as text, replacing invalid UTF-8.
    pub fn get_meta_string(&self, ns: &str, key: &str) -> Result<String> {
        let value = self.get_meta(ns, key)?;
        Ok(String::from_utf8_lossy(&value).into_owned())
    }

    /// Number of result sets not yet released.
    pub fn open_result_sets(&self) -> usize {
        self.inner.registry.open_count(HandleKind::ResultSet)
    }

    /// Number of transactions neither committed nor rolled back.
    pub fn open_transactions(&self) -> usize {
        self.inner.registry.open_count(HandleKind::Transaction)
    }
}

impl fmt::Debug for Reindexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reindexer")
            .field("handle", &self.raw())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
