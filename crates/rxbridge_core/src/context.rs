//! Execution contexts.

use rxbridge_sys::reindexer_ctx_info;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// The (id, timeout) pair carried by every cancellable native call.
///
/// The bridge never runs the timeout clock itself; the engine does. A caller
/// cancels an in-flight call by issuing the engine's cancel request with the
/// same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecContext {
    id: u64,
    timeout: Duration,
}

impl ExecContext {
    /// Creates a context. A zero timeout means "no timeout".
    pub const fn new(id: u64, timeout: Duration) -> Self {
        Self { id, timeout }
    }

    /// Creates a context without a timeout.
    pub const fn without_timeout(id: u64) -> Self {
        Self::new(id, Duration::ZERO)
    }

    /// The context id.
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// The timeout, zero for none.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Packs the context into the native record.
    ///
    /// The timeout is sent in whole milliseconds. A non-zero timeout shorter
    /// than one millisecond rounds up to one so it cannot turn into "none";
    /// timeouts beyond `i64::MAX` milliseconds saturate.
    pub fn encode(&self) -> reindexer_ctx_info {
        let millis = self.timeout.as_millis();
        let millis = if millis == 0 && !self.timeout.is_zero() {
            1
        } else {
            i64::try_from(millis).unwrap_or(i64::MAX)
        };
        reindexer_ctx_info {
            ctx_id: self.id,
            exec_timeout: millis,
        }
    }
}

/// Hands out context ids for one connection.
#[derive(Debug, Default)]
pub struct ContextIds {
    next: AtomicU64,
}

impl ContextIds {
    /// Creates a generator starting at zero.
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Returns the next id.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns a fresh context with the given timeout.
    pub fn next_context(&self, timeout: Duration) -> ExecContext {
        ExecContext::new(self.next_id(), timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_timeout_means_none() {
        let ctx = ExecContext::without_timeout(9).encode();
        assert_eq!(ctx.ctx_id, 9);
        assert_eq!(ctx.exec_timeout, 0);
    }

    #[test]
    fn sub_millisecond_rounds_up() {
        let ctx = ExecContext::new(1, Duration::from_micros(10)).encode();
        assert_eq!(ctx.exec_timeout, 1);
    }

    #[test]
    fn huge_timeout_saturates() {
        let ctx = ExecContext::new(1, Duration::MAX).encode();
        assert_eq!(ctx.exec_timeout, i64::MAX);
    }

    #[test]
    fn ids_are_sequential() {
        let ids = ContextIds::new();
        assert_eq!(ids.next_id(), 0);
        assert_eq!(ids.next_id(), 1);
        let ctx = ids.next_context(Duration::from_secs(2));
        assert_eq!(ctx.id(), 2);
        assert_eq!(ctx.timeout(), Duration::from_secs(2));
    }

    proptest! {
        #[test]
        fn encodes_whole_milliseconds(id in any::<u64>(), ms in 1u64..10_000_000) {
            let ctx = ExecContext::new(id, Duration::from_millis(ms)).encode();
            prop_assert_eq!(ctx.ctx_id, id);
            prop_assert_eq!(ctx.exec_timeout, ms as i64);
        }
    }
}
