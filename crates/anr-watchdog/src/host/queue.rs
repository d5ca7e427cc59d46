//! Cooperative task-queue host.
//!
//! [`QueueContext`] models a main loop that only makes progress when it
//! drains its own queue, e.g. a UI thread pumping messages between frames.
//! The owning thread calls [`run_pending`](QueueContext::run_pending) (or
//! [`run_for`](QueueContext::run_for)); the watchdog posts tokens from its
//! clock thread.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use super::{ContextHandle, ContextTask, HostBinding};
use crate::error::{WatchdogError, WatchdogResult};
use crate::probe::HeartbeatToken;
use crate::report::{AnrReport, ThreadSnapshot};

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

const HEARTBEAT_LABEL: &str = "heartbeat";
const TASK_LABEL: &str = "task";

/// How often an unbounded [`QueueContext::run_for`] checks for closure.
const CLOSE_POLL: Duration = Duration::from_millis(50);

struct QueuedTask {
    label: &'static str,
    run: ContextTask,
}

struct QueueInner {
    id: u64,
    name: Arc<str>,
    tx: Sender<QueuedTask>,
    rx: Receiver<QueuedTask>,
    open: AtomicBool,
    foreground: AtomicBool,
    processed: AtomicU64,
    current_task: Mutex<Option<&'static str>>,
    owner_thread: Mutex<Option<String>>,
    build_version: String,
    device: String,
}

/// A monitored context backed by a multi-producer task queue.
#[derive(Clone)]
pub struct QueueContext {
    inner: Arc<QueueInner>,
}

impl QueueContext {
    /// Create an open, foreground queue.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self::with_build_info(name, env!("CARGO_PKG_VERSION"), std::env::consts::OS)
    }

    /// Create a queue whose reports carry the given build version and device.
    #[must_use]
    pub fn with_build_info(
        name: impl Into<Arc<str>>,
        build_version: impl Into<String>,
        device: impl Into<String>,
    ) -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            inner: Arc::new(QueueInner {
                id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                tx,
                rx,
                open: AtomicBool::new(true),
                foreground: AtomicBool::new(true),
                processed: AtomicU64::new(0),
                current_task: Mutex::new(None),
                owner_thread: Mutex::new(None),
                build_version: build_version.into(),
                device: device.into(),
            }),
        }
    }

    /// Context name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Run every task queued so far on the calling thread.
    ///
    /// Returns the number of tasks executed.
    pub fn run_pending(&self) -> usize {
        self.claim_owner();
        let mut executed = 0;
        while let Ok(task) = self.inner.rx.try_recv() {
            self.execute(task);
            executed += 1;
        }
        executed
    }

    /// Pump the queue on the calling thread for `duration`.
    ///
    /// A duration too large to form a deadline (e.g. `Duration::MAX`) pumps
    /// until the queue is [closed](Self::close) and drained.
    ///
    /// Returns the number of tasks executed.
    pub fn run_for(&self, duration: Duration) -> usize {
        self.claim_owner();
        let deadline = Instant::now().checked_add(duration);
        let mut executed = 0;
        loop {
            let wait = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    remaining
                }
                None => CLOSE_POLL,
            };
            match self.inner.rx.recv_timeout(wait) {
                Ok(task) => {
                    self.execute(task);
                    executed += 1;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if deadline.is_none() && !self.is_open() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        executed
    }

    fn claim_owner(&self) {
        let current = thread::current();
        let name = current.name().unwrap_or("unnamed").to_string();
        *self.inner.owner_thread.lock() = Some(name);
    }

    fn execute(&self, task: QueuedTask) {
        // The lock is only held to swap the label, never while the task runs.
        *self.inner.current_task.lock() = Some(task.label);
        (task.run)();
        *self.inner.current_task.lock() = None;
        self.inner.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Tasks waiting in the queue.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.rx.len()
    }

    /// Tasks executed so far.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.inner.processed.load(Ordering::Relaxed)
    }

    /// Set the foreground state reported to the watchdog.
    pub fn set_foreground(&self, foreground: bool) {
        self.inner.foreground.store(foreground, Ordering::Release);
    }

    /// Refuse new bindings and posts, as if the host context had gone away.
    pub fn close(&self) {
        self.inner.open.store(false, Ordering::Release);
    }

    /// Accept bindings and posts again.
    pub fn reopen(&self) {
        self.inner.open.store(true, Ordering::Release);
    }

    /// Whether the queue accepts bindings and posts.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    fn handle(&self) -> ContextHandle {
        ContextHandle::new(self.inner.id, Arc::clone(&self.inner.name))
    }

    fn enqueue(&self, context: &ContextHandle, label: &'static str, run: ContextTask) -> WatchdogResult<()> {
        if context.id() != self.inner.id {
            return Err(WatchdogError::probe_unavailable(format!(
                "{context} is not bound to queue {}",
                self.inner.name
            )));
        }
        if !self.is_open() {
            return Err(WatchdogError::probe_unavailable(format!(
                "queue {} is closed",
                self.inner.name
            )));
        }
        self.inner
            .tx
            .send(QueuedTask { label, run })
            .map_err(|e| WatchdogError::probe_unavailable(e.to_string()))
    }
}

impl HostBinding for QueueContext {
    fn bind_monitored_context(&self) -> WatchdogResult<ContextHandle> {
        if !self.is_open() {
            return Err(WatchdogError::probe_unavailable(format!(
                "queue {} is closed",
                self.inner.name
            )));
        }
        Ok(self.handle())
    }

    fn post_token(&self, context: &ContextHandle, token: HeartbeatToken) -> WatchdogResult<()> {
        self.enqueue(context, HEARTBEAT_LABEL, Box::new(move || token.acknowledge()))
    }

    fn capture_diagnostic_report(&self, context: &ContextHandle) -> WatchdogResult<String> {
        if context.id() != self.inner.id {
            return Err(WatchdogError::diagnostic_capture_failed(format!(
                "{context} is not bound to queue {}",
                self.inner.name
            )));
        }

        let owner = self
            .inner
            .owner_thread
            .lock()
            .clone()
            .unwrap_or_else(|| String::from("unknown"));
        let current = *self.inner.current_task.lock();

        let supervised = match current {
            Some(label) => ThreadSnapshot::new(owner, "RUNNING")
                .supervised()
                .with_frame(label, self.inner.name.to_string(), 0),
            None => ThreadSnapshot::new(owner, "NOT_PUMPING").supervised(),
        };

        let mut report = AnrReport::new(
            self.inner.build_version.clone(),
            self.inner.device.clone(),
            self.inner.name.to_string(),
        );
        report.push_thread(supervised);
        report.push_thread(ThreadSnapshot::new(
            format!("{} queue", self.inner.name),
            format!("{} pending", self.pending()),
        ));
        report.to_json()
    }

    fn is_foreground(&self) -> bool {
        self.inner.foreground.load(Ordering::Acquire)
    }

    fn post_task(&self, context: &ContextHandle, task: ContextTask) -> WatchdogResult<()> {
        self.enqueue(context, TASK_LABEL, task)
    }
}

impl fmt::Debug for QueueContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueContext")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("open", &self.is_open())
            .field("pending", &self.pending())
            .field("processed", &self.processed())
            .finish()
    }
}
