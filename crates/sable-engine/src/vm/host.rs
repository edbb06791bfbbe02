//! Process-wide binding for the injected instrumentation runtime API.
//!
//! The rewriter emits calls to `__push_frame` / `__pop_frame` /
//! `__checkpoint`; the interpreter routes them here. A single host object
//! receives all calls for the whole process. When no host is installed the
//! calls are no-ops, so instrumented modules load and run fine outside a
//! debugger.

use crate::rewriter::CheckpointId;
use crate::vm::{RuntimeResult, Value};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::Arc;

/// Ordered `(name, value)` pairs describing a frame's locals.
pub type LocalsPairs = Vec<(String, Value)>;

/// Deferred locals computation. Invoked at most once, on the calling script
/// thread, before any engine lock is taken.
pub type LocalsProvider<'a> = &'a mut dyn FnMut() -> RuntimeResult<LocalsPairs>;

/// Receiver of the instrumentation callbacks emitted into rewritten code.
pub trait DebugHost: Send + Sync {
    /// A frame was entered.
    fn push_frame(&self, method: &str, provider: Option<LocalsProvider<'_>>);

    /// The current frame is exiting (on every path, including unwinding).
    fn pop_frame(&self);

    /// A statement boundary was reached. May block the calling thread.
    fn checkpoint(&self, id: CheckpointId, method: &str, provider: Option<LocalsProvider<'_>>);
}

static HOST: Lazy<RwLock<Option<Arc<dyn DebugHost>>>> = Lazy::new(|| RwLock::new(None));

/// Install the process-wide host, replacing any previous one.
pub fn install_host(host: Arc<dyn DebugHost>) {
    *HOST.write() = Some(host);
}

/// Remove the process-wide host; subsequent callbacks become no-ops.
pub fn clear_host() {
    *HOST.write() = None;
}

/// The currently installed host, if any.
pub fn current_host() -> Option<Arc<dyn DebugHost>> {
    HOST.read().clone()
}

/// Serializes tests that install a process-wide host.
#[cfg(test)]
pub(crate) static TEST_HOST_LOCK: Lazy<parking_lot::Mutex<()>> =
    Lazy::new(|| parking_lot::Mutex::new(()));

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHost {
        checkpoints: AtomicUsize,
    }

    impl DebugHost for CountingHost {
        fn push_frame(&self, _method: &str, _provider: Option<LocalsProvider<'_>>) {}
        fn pop_frame(&self) {}
        fn checkpoint(
            &self,
            _id: CheckpointId,
            _method: &str,
            _provider: Option<LocalsProvider<'_>>,
        ) {
            self.checkpoints.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_install_and_clear() {
        let _guard = TEST_HOST_LOCK.lock();
        let host = Arc::new(CountingHost {
            checkpoints: AtomicUsize::new(0),
        });
        install_host(host.clone());
        current_host().unwrap().checkpoint(1, "m", None);
        assert_eq!(host.checkpoints.load(Ordering::Relaxed), 1);
        clear_host();
        assert!(current_host().is_none());
    }
}
