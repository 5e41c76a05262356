//! Collaborators the executor calls at fixed points: resource staging and alerting.

pub mod alert;
pub mod storage;

pub use alert::{AlertSender, LoggingAlertSender};
pub use storage::{LocalStorageOperator, StorageOperator};
