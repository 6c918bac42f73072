//! Background job execution: the inline/background decision, the job state
//! machine driver, and the worker pool that consumes queued jobs.

mod executor;
mod worker;

pub use executor::{JobExecutor, QueuedJob};
pub use worker::WorkerPool;
