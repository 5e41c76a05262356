//! Outbound transport to the scheduling master.
//!
//! The wire protocol is not part of this crate: anything that can deliver a
//! [`TaskStatusEvent`] and report acknowledgment implements [`MasterClient`].

use async_trait::async_trait;

use super::errors::MessagingResult;
use crate::models::TaskStatusEvent;

#[async_trait]
pub trait MasterClient: Send + Sync + 'static {
    /// Deliver one status event
    ///
    /// `Ok(())` means the master acknowledged the event; any error leaves the
    /// event in the retry cache.
    async fn send_event(&self, event: &TaskStatusEvent) -> MessagingResult<()>;

    /// Name of this transport for logging purposes
    fn name(&self) -> &str;
}
