//! # Worker
//!
//! Top-level runtime: the queue-drain loop and the facade the network layer calls.

pub mod dispatcher;
pub mod runtime;

pub use dispatcher::TaskDispatcher;
pub use runtime::{DispatchResponse, KillResponse, WorkerRuntime, WorkerRuntimeBuilder};
