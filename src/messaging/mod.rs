//! # Messaging
//!
//! Status-event delivery from the worker to the master: the transport seam
//! ([`MasterClient`]), an in-memory transport, and the retrying sender.

pub mod client;
pub mod errors;
pub mod in_memory;
pub mod message_sender;

pub use client::MasterClient;
pub use errors::{MessagingError, MessagingResult};
pub use in_memory::InMemoryMasterClient;
pub use message_sender::TaskMessageSender;
