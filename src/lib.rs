#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Taskweave Worker
//!
//! Worker-side task execution runtime for a distributed workflow orchestration engine.
//!
//! ## Overview
//!
//! The master dispatches task instances to workers. This crate is what runs on the
//! worker: it accepts dispatched tasks, holds delayed ones until they are due, admits
//! them into a bounded executor pool, drives each attempt through its lifecycle and
//! reports every status change back to the master until it is acknowledged.
//!
//! ## Architecture
//!
//! ```text
//! WorkerRuntime::dispatch ──→ TaskDispatchQueue ──┐
//!                                                 ├──→ TaskDispatcher ──→ TaskExecutorThreadPool
//!                             DelayQueue ─────────┘                              │
//!                                                                                ▼
//!                           TaskMessageSender ◀── status events ──── TaskExecutor (+ strategy)
//!                                  │                                             │
//!                                  ▼                                   AsyncTaskPoller (async types)
//!                             MasterClient
//! ```
//!
//! ## Module Organization
//!
//! - [`worker`] - Runtime facade and queue-drain loop
//! - [`execution`] - Executor state machine, strategies, pool, holder, async poller
//! - [`queue`] - Dispatch and delay queues
//! - [`messaging`] - Master client seam and retrying status sender
//! - [`registry`] - Task channel registry and the built-in shell channel
//! - [`models`] - Task execution context and status events
//! - [`state_machine`] - Execution status ordering
//! - [`config`] - Configuration loading
//! - [`services`] - Resource staging and alerting
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskweave_worker::config::WorkerConfig;
//! use taskweave_worker::messaging::InMemoryMasterClient;
//! use taskweave_worker::models::TaskExecutionContext;
//! use taskweave_worker::worker::WorkerRuntime;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = WorkerRuntime::builder(WorkerConfig::default())
//!     .master_client(Arc::new(InMemoryMasterClient::new()))
//!     .build()?;
//! runtime.start();
//!
//! let context = TaskExecutionContext::new(1, 1, "SHELL")
//!     .with_params(serde_json::json!({ "raw_script": "echo hello" }));
//! let response = runtime.dispatch(context).await;
//! assert!(response.is_accepted());
//! # Ok(())
//! # }
//! ```

pub mod cleanup;
pub mod config;
pub mod constants;
pub mod error;
pub mod execution;
pub mod logging;
pub mod messaging;
pub mod metrics;
pub mod models;
pub mod process;
pub mod queue;
pub mod registry;
pub mod services;
pub mod state_machine;
pub mod worker;

pub use config::{ConfigManager, TaskExecutorFullPolicy, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use models::{TaskEventType, TaskExecutionContext, TaskStatusEvent};
pub use state_machine::TaskExecutionStatus;
pub use worker::{DispatchResponse, KillResponse, WorkerRuntime};
