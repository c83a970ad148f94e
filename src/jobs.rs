//! Background job execution.
//!
//! Services persist their record first and then hand the job to a
//! [`JobQueue`] explicitly. Retry policy is left to the queue implementation.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::debug;

use crate::error::{Error, Result};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait JobQueue: Send + Sync {
    /// Schedule `job`. `name` is used for logging only.
    fn enqueue(&self, name: &str, job: Job);
}

/// Runs the job on the caller's thread before returning.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineQueue;

impl JobQueue for InlineQueue {
    fn enqueue(&self, name: &str, job: Job) {
        debug!(job = name, "running job inline");
        job();
    }
}

/// Runs each job as a task on the global rayon pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct RayonQueue;

impl JobQueue for RayonQueue {
    fn enqueue(&self, name: &str, job: Job) {
        debug!(job = name, "spawning job");
        rayon::spawn(job);
    }
}

/// Run a job body, turning a panic into [`Error::JobPanicked`] so the caller
/// can still record the failure.
pub(crate) fn catch_panic<T>(body: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|payload| Err(Error::JobPanicked(panic_message(&*payload))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
