//! Worker pools that run detached generation tasks
//!
//! Callers only ever submit work; there is no cancellation and no progress
//! reporting. A task's outcome is observable solely through the filesystem.
//! A panicking task is logged and does not take its worker down.

use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait TaskPool: Send + Sync {
    /// Queue `task` to run at some point, possibly on another thread.
    fn submit(&self, task: Task);
}

/// Runs tasks on rayon, either the global pool or a dedicated one.
#[derive(Clone, Default)]
pub struct RayonPool {
    pool: Option<Arc<ThreadPool>>,
}

impl RayonPool {
    /// Share rayon's global pool.
    pub fn global() -> Self {
        Self { pool: None }
    }

    /// A dedicated pool with `threads` workers.
    pub fn with_threads(threads: usize) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("image-cache-{}", i))
            .panic_handler(|payload| {
                log::error!("Worker task panicked: {}", panic_message(payload.as_ref()))
            })
            .build()?;
        Ok(Self {
            pool: Some(Arc::new(pool)),
        })
    }
}

impl TaskPool for RayonPool {
    fn submit(&self, task: Task) {
        let task = move || run_logged(task);
        match &self.pool {
            Some(pool) => pool.spawn(task),
            None => rayon::spawn(task),
        }
    }
}

/// Run `task`, containing a panic to this task. Any guards it owns are
/// dropped while unwinding.
fn run_logged(task: Task) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
        log::error!("Worker task panicked: {}", panic_message(payload.as_ref()));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}

impl fmt::Debug for RayonPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RayonPool")
            .field("dedicated", &self.pool.is_some())
            .finish()
    }
}

/// Runs every task immediately on the submitting thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlinePool;

impl TaskPool for InlinePool {
    fn submit(&self, task: Task) {
        task();
    }
}
