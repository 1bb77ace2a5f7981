//! Serialized executors for calls into a single-threaded scripting runtime.
//!
//! Every call into the runtime is posted as a [`ScriptTask`]. Executors run
//! tasks strictly in posting order and never run two tasks at once.
//!
//! - [`ScriptThread`] owns a dedicated thread fed by a bounded FIFO queue. Use
//!   it when the runtime lives on its own thread and producers are foreign.
//! - [`InlineExecutor`] runs tasks on the posting thread through a trampoline.
//!   Use it when producers already run on the runtime's thread (for example in
//!   a browser, where JS delivers frames itself). Posts made while a task is
//!   running are queued behind it instead of nesting.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use crate::config::{Backpressure, ExecutorConfig};
use crate::error::ExecutorError;

pub type ScriptTask = Box<dyn FnOnce() + Send + 'static>;

pub trait ScriptExecutor: Send + Sync {
    /// Queue `task` behind every task posted before it.
    fn post(&self, task: ScriptTask) -> Result<(), ExecutorError>;

    /// Lets executors without a thread of their own run queued tasks.
    /// Callers invoke it after posting, with no locks held.
    fn run_pending(&self) {}

    fn is_running(&self) -> bool;

    /// True on the thread that runs this executor's tasks, if it owns one.
    fn is_worker_thread(&self) -> bool {
        false
    }

    /// Wait until every task posted before this call has run.
    fn flush(&self) -> Result<(), ExecutorError> {
        let (tx, rx) = mpsc::channel();
        self.post(Box::new(move || {
            let _ = tx.send(());
        }))?;
        self.run_pending();
        rx.recv().map_err(|_| ExecutorError::Closed)
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn run_contained(task: ScriptTask) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        log::error!("script task panicked: {}", panic_message(payload.as_ref()));
    }
}

/// A dedicated thread that runs script tasks in FIFO order.
///
/// The queue holds at most `queue_capacity` tasks. When it is full,
/// [`Backpressure::Block`] makes the posting thread wait and
/// [`Backpressure::DropNewest`] fails the post with
/// [`ExecutorError::Saturated`]. Posts made from the script thread itself never
/// block, since the thread would be waiting on itself.
///
/// Dropping the last handle (or calling [`shutdown`](Self::shutdown)) lets the
/// queued tasks finish, then joins the thread.
pub struct ScriptThread {
    sender: Mutex<Option<SyncSender<ScriptTask>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    name: String,
    capacity: usize,
    backpressure: Backpressure,
}

impl ScriptThread {
    pub fn spawn(config: &ExecutorConfig) -> Result<Arc<Self>, ExecutorError> {
        config
            .validate()
            .map_err(|e| ExecutorError::Spawn(e.to_string()))?;

        let (tx, rx) = mpsc::sync_channel::<ScriptTask>(config.queue_capacity);
        let name = config.thread_name.clone();
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                log::debug!("script thread `{thread_name}` started");
                for task in rx {
                    run_contained(task);
                }
                log::debug!("script thread `{thread_name}` stopped");
            })
            .map_err(|e| ExecutorError::Spawn(e.to_string()))?;

        Ok(Arc::new(Self {
            sender: Mutex::new(Some(tx)),
            worker_id: handle.thread().id(),
            worker: Mutex::new(Some(handle)),
            name,
            capacity: config.queue_capacity,
            backpressure: config.backpressure,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    fn sender(&self) -> Option<SyncSender<ScriptTask>> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn enqueue(&self, task: ScriptTask, block: bool) -> Result<(), ExecutorError> {
        let sender = self.sender().ok_or(ExecutorError::Closed)?;
        if block && !self.is_current() {
            return sender.send(task).map_err(|_| ExecutorError::Closed);
        }
        sender.try_send(task).map_err(|e| match e {
            TrySendError::Full(_) => ExecutorError::Saturated {
                capacity: self.capacity,
            },
            TrySendError::Disconnected(_) => ExecutorError::Closed,
        })
    }

    /// Stop accepting tasks, let queued ones run, and join the thread.
    ///
    /// Called from the script thread itself, the thread is detached instead of
    /// joined.
    pub fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = worker {
            if self.is_current() {
                return;
            }
            if handle.join().is_err() {
                log::error!("script thread `{}` terminated abnormally", self.name);
            }
        }
    }
}

impl ScriptExecutor for ScriptThread {
    fn post(&self, task: ScriptTask) -> Result<(), ExecutorError> {
        self.enqueue(task, self.backpressure == Backpressure::Block)
    }

    fn is_running(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn is_worker_thread(&self) -> bool {
        self.is_current()
    }

    /// Returns immediately when called from the script thread.
    fn flush(&self) -> Result<(), ExecutorError> {
        if self.is_current() {
            return Ok(());
        }
        let (tx, rx) = mpsc::channel();
        self.enqueue(
            Box::new(move || {
                let _ = tx.send(());
            }),
            true,
        )?;
        rx.recv().map_err(|_| ExecutorError::Closed)
    }
}

impl Drop for ScriptThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs tasks on whichever thread posts them, one at a time, in FIFO order.
///
/// The queue is unbounded; producers never block on it.
#[derive(Default)]
pub struct InlineExecutor {
    queue: Mutex<VecDeque<ScriptTask>>,
    draining: AtomicBool,
    closed: AtomicBool,
}

impl InlineExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.lock_queue().len()
    }

    /// Reject further posts and drop queued tasks without running them.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let dropped: Vec<ScriptTask> = self.lock_queue().drain(..).collect();
        if !dropped.is_empty() {
            log::debug!("inline executor dropped {} queued tasks", dropped.len());
        }
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<ScriptTask>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pop(&self) -> Option<ScriptTask> {
        self.lock_queue().pop_front()
    }
}

impl ScriptExecutor for InlineExecutor {
    fn post(&self, task: ScriptTask) -> Result<(), ExecutorError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ExecutorError::Closed);
        }
        self.lock_queue().push_back(task);
        Ok(())
    }

    fn run_pending(&self) {
        loop {
            if self.draining.swap(true, Ordering::SeqCst) {
                // Whoever is draining picks our tasks up.
                return;
            }
            while let Some(task) = self.pop() {
                run_contained(task);
            }
            self.draining.store(false, Ordering::SeqCst);
            if self.lock_queue().is_empty() {
                return;
            }
        }
    }

    fn is_running(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Runs queued tasks unless another caller is already draining them.
    fn flush(&self) -> Result<(), ExecutorError> {
        if !self.is_running() {
            return Err(ExecutorError::Closed);
        }
        self.run_pending();
        Ok(())
    }
}
