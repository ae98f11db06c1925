//! Inbound mail processing.
//!
//! Mail flows from a `Mailbox` through a single worker:
//! 1. `Mailbox::fetch_unseen()`, filtered by allowlist and self-loop checks
//! 2. `Coordinator::run_session()` on the message context
//! 3. Disposition: reply and dispose, dispose, or leave for the next poll

pub mod mail_worker;

pub use mail_worker::{Disposition, process_email, spawn_mail_pipeline};
