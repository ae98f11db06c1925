//! Mailbox abstraction for message I/O.

pub mod email;
pub mod email_types;
pub mod threading;

use async_trait::async_trait;

use crate::error::ChannelError;

pub use email::{EmailConfig, EmailMailbox};
pub use email_types::InboundEmail;

/// A source of inbound mail that can also send replies.
///
/// Fetching never marks messages as read; the worker disposes of each
/// message explicitly once it has been handled.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Address replies are sent from. Mail from it is never processed.
    fn own_address(&self) -> &str;

    fn allows_sender(&self, sender: &str) -> bool;

    /// Unread messages, oldest first.
    async fn fetch_unseen(&self) -> Result<Vec<InboundEmail>, ChannelError>;

    async fn send_reply(&self, original: &InboundEmail, body: &str) -> Result<(), ChannelError>;

    /// Delete the message or mark it read.
    async fn dispose(&self, email: &InboundEmail) -> Result<(), ChannelError>;
}
