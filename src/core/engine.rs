//! Single-threaded event loop abstraction
//!
//! Everything the dispatchers do happens on one thread: posted callbacks,
//! timer expiry and connection I/O are strictly serialized. [`TokioEngine`]
//! provides this on top of a tokio `LocalSet`; every method must be called
//! from inside that set.

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Zero-argument callback run by the engine
pub type Callback = Box<dyn FnOnce() + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

/// Services the dispatchers consume from the event loop
pub trait Engine {
    /// Run `callback` on a later loop iteration, never inline
    fn post_callback(&self, callback: Callback);

    /// Run `callback` once after `duration` unless disarmed first
    fn arm_timer(&self, duration: Duration, callback: Callback) -> TimerId;

    fn disarm_timer(&self, id: TimerId);

    /// Attach an I/O task (a connection's reader and writer) to the loop
    fn spawn_task(&self, task: LocalBoxFuture<'static, ()>) -> TaskId;

    /// Detach an I/O task; it is dropped without running further
    fn abort_task(&self, id: TaskId);
}

#[derive(Default)]
struct EngineState {
    next_id: u64,
    timers: HashMap<u64, JoinHandle<()>>,
    tasks: HashMap<u64, JoinHandle<()>>,
}

impl EngineState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Engine backed by `tokio::task::spawn_local`
pub struct TokioEngine {
    state: Rc<RefCell<EngineState>>,
}

impl TokioEngine {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(EngineState::default())),
        }
    }

    /// Number of armed timers and attached tasks
    pub fn active_counts(&self) -> (usize, usize) {
        let state = self.state.borrow();
        (state.timers.len(), state.tasks.len())
    }
}

impl Default for TokioEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// A panic inside an engine-driven callback is an invariant violation.
fn run_guarded(callback: Callback) {
    if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
        error!("panic in event loop callback, aborting");
        std::process::abort();
    }
}

async fn run_guarded_task(task: LocalBoxFuture<'static, ()>) {
    if AssertUnwindSafe(task).catch_unwind().await.is_err() {
        error!("panic in event loop task, aborting");
        std::process::abort();
    }
}

fn forget_timer(state: &Weak<RefCell<EngineState>>, id: u64) {
    if let Some(state) = state.upgrade() {
        state.borrow_mut().timers.remove(&id);
    }
}

fn forget_task(state: &Weak<RefCell<EngineState>>, id: u64) {
    if let Some(state) = state.upgrade() {
        state.borrow_mut().tasks.remove(&id);
    }
}

impl Engine for TokioEngine {
    fn post_callback(&self, callback: Callback) {
        tokio::task::spawn_local(async move { run_guarded(callback) });
    }

    fn arm_timer(&self, duration: Duration, callback: Callback) -> TimerId {
        let mut state = self.state.borrow_mut();
        let id = state.allocate_id();
        let weak = Rc::downgrade(&self.state);
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(duration).await;
            forget_timer(&weak, id);
            run_guarded(callback);
        });
        state.timers.insert(id, handle);
        TimerId(id)
    }

    fn disarm_timer(&self, id: TimerId) {
        if let Some(handle) = self.state.borrow_mut().timers.remove(&id.0) {
            handle.abort();
        }
    }

    fn spawn_task(&self, task: LocalBoxFuture<'static, ()>) -> TaskId {
        let mut state = self.state.borrow_mut();
        let id = state.allocate_id();
        let weak = Rc::downgrade(&self.state);
        let handle = tokio::task::spawn_local(async move {
            run_guarded_task(task).await;
            forget_task(&weak, id);
        });
        state.tasks.insert(id, handle);
        TaskId(id)
    }

    fn abort_task(&self, id: TaskId) {
        if let Some(handle) = self.state.borrow_mut().tasks.remove(&id.0) {
            debug!("Detaching task {}", id.0);
            handle.abort();
        }
    }
}

impl Drop for TokioEngine {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_borrow_mut() {
            for (_, handle) in state.timers.drain() {
                handle.abort();
            }
            for (_, handle) in state.tasks.drain() {
                handle.abort();
            }
        }
    }
}
