//! # Task Execution
//!
//! ```text
//! TaskExecutorFactory ──create──→ TaskExecutor (+ ExecuteStrategy)
//!                                      │
//! TaskExecutorThreadPool ──submit──────┤──→ TaskExecutorHolder (one per task instance)
//!                                      │
//!                                      ├── DefaultTaskExecution: wait inline
//!                                      └── AsyncTaskExecution ──→ AsyncTaskPoller
//! ```

pub mod async_poller;
pub mod executor;
pub mod factory;
pub mod holder;
pub mod strategy;
pub mod thread_pool;

pub use async_poller::{AsyncTaskCallback, AsyncTaskExecutionContext, AsyncTaskPoller};
pub use executor::{ExecutorServices, TaskExecutor};
pub use factory::TaskExecutorFactory;
pub use holder::TaskExecutorHolder;
pub use strategy::{AsyncTaskExecution, DefaultTaskExecution, ExecuteStrategy};
pub use thread_pool::TaskExecutorThreadPool;
