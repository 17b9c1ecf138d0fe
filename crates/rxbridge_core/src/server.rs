//! Embedded server lifecycle.
//!
//! [`ReindexerServer`] is the thin handle over the native server calls.
//! [`EmbeddedServer`] drives it the way an application needs it: start on a
//! background thread, wait until ready, hand out database connections, and
//! shut down in order.

use crate::config::{BridgeConfig, Dsn, ServerConfig};
use crate::connection::Reindexer;
use crate::dispatch;
use crate::error::{Error, Result};
use crate::registry::HandleKind;
use rxbridge_sys::{NativeEngine, RawHandle};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

pub(crate) struct ServerInner {
    engine: Arc<dyn NativeEngine>,
    svc: NonZeroUsize,
}

impl ServerInner {
    pub(crate) fn engine_arc(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    fn engine(&self) -> &dyn NativeEngine {
        &*self.engine
    }
}

impl Drop for ServerInner {
    fn drop(&mut self) {
        unsafe { self.engine.destroy_server(self.svc.get()) };
        tracing::debug!(handle = self.svc.get(), "server destroyed");
    }
}

/// A native embedded-server instance.
///
/// Cloning shares the instance. It is destroyed once the last clone and every
/// database connection obtained from it are gone.
#[derive(Clone)]
pub struct ReindexerServer {
    inner: Arc<ServerInner>,
}

impl ReindexerServer {
    /// Creates a server instance.
    pub fn init(engine: Arc<dyn NativeEngine>) -> Result<Self> {
        let svc = NonZeroUsize::new(engine.init_server()).ok_or(Error::NullHandle(HandleKind::Server))?;
        tracing::debug!(handle = svc.get(), "server created");
        Ok(Self {
            inner: Arc::new(ServerInner { engine, svc }),
        })
    }

    /// Raw server handle.
    pub fn raw(&self) -> RawHandle {
        self.inner.svc.get()
    }

    /// Runs the server with the given YAML configuration.
    ///
    /// Blocks the calling thread until the server stops.
    pub fn start(&self, yaml: &str) -> Result<()> {
        unsafe { dispatch::start_server(self.inner.engine(), self.raw(), yaml) }
    }

    /// Asks a running server to stop.
    pub fn stop(&self) -> Result<()> {
        unsafe { dispatch::stop_server(self.inner.engine(), self.raw()) }
    }

    /// Returns true once the server accepts work.
    pub fn is_ready(&self) -> bool {
        unsafe { dispatch::is_server_ready(self.inner.engine(), self.raw()) }
    }

    /// Connects to one database of the server.
    pub fn instance(&self, database: &str, user: &str, password: &str, config: BridgeConfig) -> Result<Reindexer> {
        let rx = unsafe { dispatch::get_instance(self.inner.engine(), self.raw(), database, user, password)? };
        Ok(Reindexer::from_server(Arc::clone(&self.inner), rx, config))
    }
}

impl fmt::Debug for ReindexerServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReindexerServer").field("handle", &self.raw()).finish()
    }
}

/// A server running on its own thread.
#[derive(Debug)]
pub struct EmbeddedServer {
    server: ReindexerServer,
    thread: Option<JoinHandle<()>>,
}

impl EmbeddedServer {
    /// Starts a server and waits until it is ready.
    ///
    /// Fails with [`Error::ServerStartup`] if the server does not report ready
    /// within `config.startup_timeout`, or if it exits first. The server is
    /// stopped and destroyed again on failure.
    pub fn launch(engine: Arc<dyn NativeEngine>, config: &ServerConfig) -> Result<Self> {
        let server = ReindexerServer::init(engine)?;
        let thread = {
            let server = server.clone();
            let yaml = config.yaml.clone();
            thread::Builder::new()
                .name("rxbridge-server".into())
                .spawn(move || {
                    if let Err(e) = server.start(&yaml) {
                        tracing::error!(error = %e, "server start failed");
                    }
                    tracing::debug!("server thread finished");
                })?
        };
        let mut this = Self {
            server,
            thread: Some(thread),
        };
        if let Err(e) = this.wait_ready(config) {
            if let Err(stop) = this.stop_and_join() {
                tracing::warn!(error = %stop, "failed to stop server after failed startup");
            }
            return Err(e);
        }
        Ok(this)
    }

    fn wait_ready(&self, config: &ServerConfig) -> Result<()> {
        let deadline = Instant::now() + config.startup_timeout;
        loop {
            if self.server.is_ready() {
                tracing::debug!(handle = self.server.raw(), "server ready");
                return Ok(());
            }
            if self.thread.as_ref().is_some_and(JoinHandle::is_finished) {
                return Err(Error::ServerStartup {
                    message: "server exited before becoming ready".into(),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::ServerStartup {
                    message: format!("not ready after {:?}", config.startup_timeout),
                });
            }
            thread::sleep(config.poll_interval.min(deadline - now));
        }
    }

    /// The underlying server.
    pub fn server(&self) -> &ReindexerServer {
        &self.server
    }

    /// Connects to the database named by a `builtinserver://` DSN.
    pub fn connect(&self, dsn: &Dsn, config: BridgeConfig) -> Result<Reindexer> {
        match dsn {
            Dsn::BuiltinServer {
                database,
                user,
                password,
            } => self.server.instance(database, user, password, config),
            Dsn::Builtin { .. } => Err(Error::config("builtin DSNs are opened through Reindexer::open")),
        }
    }

    /// Stops the server and waits for its thread.
    ///
    /// If the stop request fails the error is returned and the thread is left
    /// running.
    ///
    /// The native server is destroyed once every connection obtained from it
    /// is gone.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        if let Err(e) = self.server.stop() {
            // Joining would block on a server that is still running.
            tracing::warn!(error = %e, "server did not stop; leaving its thread detached");
            return Err(e);
        }
        if thread.join().is_err() {
            tracing::error!("server thread panicked");
        }
        Ok(())
    }
}

impl Drop for EmbeddedServer {
    fn drop(&mut self) {
        if let Err(e) = self.stop_and_join() {
            tracing::warn!(error = %e, "failed to stop server");
        }
    }
}
