//! # Task Queues
//!
//! Two concurrent queues sit between the network layer and the execution pool:
//!
//! - [`TaskDispatchQueue`]: bounded FIFO holding tasks accepted from the master but not
//!   yet admitted. `offer` fails when full so the caller can nack the dispatch.
//! - [`DelayQueue`]: time-ordered queue releasing an entry only once its deadline passes.
//!   Used for delayed tasks, pool-rejected retries and async completion checks.
//!
//! Both support removing a specific task instance concurrently with `take()`.
//! [`InFlightTasks`] covers the gaps between them: a context that has left one queue
//! and not yet reached the next stays visible to a kill request.

pub mod delay_queue;
pub mod dispatch_queue;
pub mod in_flight;

pub use delay_queue::DelayQueue;
pub use dispatch_queue::TaskDispatchQueue;
pub use in_flight::{InFlightTasks, Interception};

use crate::models::TaskExecutionContext;

/// Queue entries are addressable by task instance id for cancel-before-run removal
pub trait QueueItem: Send {
    fn task_instance_id(&self) -> i32;
}

impl QueueItem for TaskExecutionContext {
    fn task_instance_id(&self) -> i32 {
        self.task_instance_id
    }
}
