//! Tracking of background validation workers
//!
//! Every worker registers before doing anything and holds a
//! [`WorkerRegistration`] until its result has been handled on the completion
//! context. Shutdown flips a one-way stopping flag, closes the shutdown signal
//! channel so blocked workers wake up, then waits (bounded) for the active
//! count to reach zero. Shutdown hooks run throughout that wait so owners of
//! undelivered completions can release the registrations they carry.

use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Longest single wait between two runs of the shutdown hooks
const HOOK_INTERVAL: Duration = Duration::from_millis(10);

type ShutdownHook = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Default)]
struct WorkerCount {
    active: usize,
}

/// Tracks active workers and the stopping flag
pub struct ThreadLifecycleManager {
    count: Mutex<WorkerCount>,
    idle: Condvar,
    stopping: AtomicBool,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    hooks: Mutex<Vec<ShutdownHook>>,
}

impl std::fmt::Debug for ThreadLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadLifecycleManager")
            .field("active", &self.active_workers())
            .field("stopping", &self.is_stopping())
            .finish()
    }
}

impl Default for ThreadLifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadLifecycleManager {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(0);
        Self {
            count: Mutex::new(WorkerCount::default()),
            idle: Condvar::new(),
            stopping: AtomicBool::new(false),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            hooks: Mutex::new(Vec::new()),
        }
    }

    fn lock_count(&self) -> MutexGuard<'_, WorkerCount> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a worker. Returns `None` once shutdown has been signaled.
    pub fn try_register(self: &Arc<Self>) -> Option<WorkerRegistration> {
        let mut count = self.lock_count();
        if self.is_stopping() {
            return None;
        }
        count.active += 1;
        Some(WorkerRegistration {
            manager: Arc::clone(self),
        })
    }

    /// Decrement the active-worker count.
    ///
    /// Called by [`WorkerRegistration`] on drop; exactly once per registration.
    pub fn signal_ended(&self) {
        let mut count = self.lock_count();
        count.active = count.active.saturating_sub(1);
        if count.active == 0 {
            self.idle.notify_all();
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub fn active_workers(&self) -> usize {
        self.lock_count().active
    }

    /// Receiver that disconnects when shutdown begins.
    ///
    /// Use it in a `select!` next to a blocking wait to wake up on shutdown.
    pub fn shutdown_signal(&self) -> Receiver<()> {
        self.shutdown_rx.clone()
    }

    /// Register a hook run repeatedly while [`request_shutdown`](Self::request_shutdown)
    /// waits, and once more before it returns.
    ///
    /// Hooks must not block and must not register further hooks.
    pub fn on_shutdown(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(hook));
    }

    fn run_shutdown_hooks(&self) {
        let hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        for hook in hooks.iter() {
            hook();
        }
    }

    /// Set the stopping flag and wake blocked workers. Never resets.
    pub fn begin_shutdown(&self) {
        {
            let _count = self.lock_count();
            if self.stopping.swap(true, Ordering::SeqCst) {
                return;
            }
        }
        info!(active = self.active_workers(), "validation shutdown requested");
        self.shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Wait up to `timeout` for the active count to reach zero
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        let count = self.lock_count();
        let (count, _) = self
            .idle
            .wait_timeout_while(count, timeout, |count| count.active > 0)
            .unwrap_or_else(PoisonError::into_inner);
        count.active == 0
    }

    /// Signal shutdown and wait up to `timeout` for workers to end.
    ///
    /// Workers still running at the deadline are not interrupted; they see the
    /// stopping flag at their next check point. Returns whether all ended.
    pub fn request_shutdown(&self, timeout: Duration) -> bool {
        self.begin_shutdown();

        let deadline = Instant::now() + timeout;
        let idle = loop {
            self.run_shutdown_hooks();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if self.wait_for_idle(remaining.min(HOOK_INTERVAL)) {
                break true;
            }
            if remaining.is_zero() {
                break false;
            }
        };
        self.run_shutdown_hooks();

        if !idle {
            warn!(
                active = self.active_workers(),
                ?timeout,
                "validation workers still running after shutdown timeout"
            );
        }
        idle
    }
}

/// Proof of registration; ends the registration when dropped
#[derive(Debug)]
pub struct WorkerRegistration {
    manager: Arc<ThreadLifecycleManager>,
}

impl WorkerRegistration {
    pub fn is_stopping(&self) -> bool {
        self.manager.is_stopping()
    }
}

impl Drop for WorkerRegistration {
    fn drop(&mut self) {
        self.manager.signal_ended();
    }
}
