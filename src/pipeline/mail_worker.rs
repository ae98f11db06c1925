//! Mail pipeline: one poller feeding one worker.
//!
//! The poller fetches unread mail on a timer, drops anything from ourselves
//! or from senders outside the allowlist, and queues the rest. A single
//! worker runs one coordinator session at a time and decides what happens
//! to each message:
//!
//! - reply: send, then dispose
//! - no response: dispose
//! - fatal error or failed send: leave unread so the next poll retries it
//! - reply sent but disposal failed: kept in flight so it is not answered twice

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::agent::{Coordinator, Outcome};
use crate::channels::{InboundEmail, Mailbox};

/// Messages queued for the worker before the poller waits.
const QUEUE_DEPTH: usize = 32;

/// What happened to a message after its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Reply sent and message disposed.
    Replied,
    /// No reply needed; message disposed.
    Dismissed,
    /// Left unread for a later poll.
    Retained,
    /// Reply sent, but the message could not be disposed. It stays in the
    /// in-flight set so it is not answered again.
    Undisposed,
}

impl Disposition {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Replied => "replied",
            Self::Dismissed => "dismissed",
            Self::Retained => "retained",
            Self::Undisposed => "undisposed",
        }
    }
}

/// UIDs queued or being processed. The poller skips these.
type InFlight = Arc<Mutex<HashSet<String>>>;

/// Spawn the poller and the worker.
///
/// Returns a handle that completes once both have stopped, and a shutdown
/// flag. After the flag is set the worker finishes its current message and
/// leaves anything still queued for the next run.
pub fn spawn_mail_pipeline(
    mailbox: Arc<dyn Mailbox>,
    coordinator: Arc<Coordinator>,
    poll_interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let in_flight: InFlight = Arc::new(Mutex::new(HashSet::new()));
    let (tx, rx) = mpsc::channel(QUEUE_DEPTH);

    let poller = {
        let mailbox = Arc::clone(&mailbox);
        let in_flight = Arc::clone(&in_flight);
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            info!(
                mailbox = mailbox.name(),
                interval_secs = poll_interval.as_secs(),
                "Mail poller started"
            );
            let mut tick = tokio::time::interval(poll_interval);
            loop {
                tick.tick().await;
                if shutdown.load(Ordering::Relaxed) {
                    info!("Mail poller shutting down");
                    return;
                }
                if !poll_once(mailbox.as_ref(), &in_flight, &tx).await {
                    return;
                }
            }
        })
    };

    let worker = {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(run_worker(mailbox, coordinator, in_flight, rx, shutdown))
    };

    let handle = tokio::spawn(async move {
        if let Err(e) = poller.await {
            error!("Mail poller task failed: {e}");
        }
        if let Err(e) = worker.await {
            error!("Mail worker task failed: {e}");
        }
    });

    (handle, shutdown)
}

/// One poll cycle. Returns `false` once the worker has gone away.
async fn poll_once(mailbox: &dyn Mailbox, in_flight: &InFlight, tx: &mpsc::Sender<InboundEmail>) -> bool {
    let emails = match mailbox.fetch_unseen().await {
        Ok(emails) => emails,
        Err(e) => {
            error!("Mail poll failed: {e}");
            return true;
        }
    };

    for email in admit(mailbox, in_flight, emails).await {
        let uid = email.uid.clone();
        if tx.send(email).await.is_err() {
            in_flight.lock().await.remove(&uid);
            return false;
        }
    }
    true
}

/// Filter a batch of fetched mail down to what the worker should see.
///
/// Self-sent and disallowed mail is disposed here and never reaches a
/// session. Admitted UIDs are added to the in-flight set.
async fn admit(mailbox: &dyn Mailbox, in_flight: &InFlight, emails: Vec<InboundEmail>) -> Vec<InboundEmail> {
    let mut admitted = Vec::new();
    for email in emails {
        if in_flight.lock().await.contains(&email.uid) {
            continue;
        }

        let rejection = if email.sender.eq_ignore_ascii_case(mailbox.own_address()) {
            Some("self-sent")
        } else if !mailbox.allows_sender(&email.sender) {
            Some("sender not allowed")
        } else {
            None
        };

        if let Some(reason) = rejection {
            warn!(uid = %email.uid, sender = %email.sender, reason, "Skipping email");
            if let Err(e) = mailbox.dispose(&email).await {
                warn!(uid = %email.uid, error = %e, "Failed to dispose of skipped email");
            }
            continue;
        }

        in_flight.lock().await.insert(email.uid.clone());
        admitted.push(email);
    }
    admitted
}

async fn run_worker(
    mailbox: Arc<dyn Mailbox>,
    coordinator: Arc<Coordinator>,
    in_flight: InFlight,
    mut rx: mpsc::Receiver<InboundEmail>,
    shutdown: Arc<AtomicBool>,
) {
    while let Some(email) = rx.recv().await {
        if shutdown.load(Ordering::Relaxed) {
            info!("Mail worker shutting down");
            return;
        }
        let disposition = process_email(mailbox.as_ref(), &coordinator, &email).await;
        settle(&in_flight, &email.uid, disposition).await;
    }
    debug!("Mail queue closed");
}

/// Release a UID for re-admission unless its reply already went out.
async fn settle(in_flight: &InFlight, uid: &str, disposition: Disposition) {
    if disposition != Disposition::Undisposed {
        in_flight.lock().await.remove(uid);
    }
}

/// Run one session for `email` and act on its outcome.
pub async fn process_email(mailbox: &dyn Mailbox, coordinator: &Coordinator, email: &InboundEmail) -> Disposition {
    info!(
        uid = %email.uid,
        message_id = %email.message_id,
        sender = %email.sender,
        preview = %email.preview(),
        "Processing email"
    );

    let report = coordinator.run_session(&email.context()).await;

    let disposition = match &report.outcome {
        Outcome::Reply(body) => match mailbox.send_reply(email, body).await {
            Ok(()) => match mailbox.dispose(email).await {
                Ok(()) => Disposition::Replied,
                Err(e) => {
                    error!(
                        uid = %email.uid,
                        error = %e,
                        "Reply sent but message could not be disposed; it will not be answered again"
                    );
                    Disposition::Undisposed
                }
            },
            Err(e) => {
                error!(uid = %email.uid, error = %e, "Failed to send reply");
                Disposition::Retained
            }
        },
        Outcome::NoResponse => {
            dispose(mailbox, email).await;
            Disposition::Dismissed
        }
        Outcome::Fatal(reason) => {
            warn!(uid = %email.uid, reason = reason.code(), "Leaving email unread");
            Disposition::Retained
        }
    };

    info!(
        uid = %email.uid,
        session_id = %report.session_id,
        disposition = disposition.label(),
        "Email handled"
    );
    disposition
}

async fn dispose(mailbox: &dyn Mailbox, email: &InboundEmail) {
    if let Err(e) = mailbox.dispose(email).await {
        warn!(uid = %email.uid, error = %e, "Failed to dispose of email");
    }
}
