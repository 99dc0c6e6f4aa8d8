//! Latest-value outbound mailbox for one client.
//!
//! Holds at most one undelivered frame per topic.  Offering a frame for a
//! topic that still has one pending overwrites it in place, so a slow client
//! skips stale state and always receives the newest frame of every topic.
//! Topics are delivered in the order they first became pending.
//!
//! Dropping either half closes the mailbox: the receiver drains what is left
//! and then sees `None`; the sender's next offer fails with [`OutboxClosed`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// What happened to an offered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// The topic had nothing pending; the frame was queued.
    Queued,
    /// An undelivered frame for the same topic was overwritten.
    Replaced,
}

/// The receiving half is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxClosed;

#[derive(Default)]
struct Pending {
    order: VecDeque<String>,
    frames: HashMap<String, String>,
    closed: bool,
}

#[derive(Default)]
struct Mailbox {
    pending: Mutex<Pending>,
    notify: Notify,
}

impl Mailbox {
    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }
}

/// Create a connected sender/receiver pair.
pub fn outbox() -> (OutboxSender, OutboxReceiver) {
    let mailbox = Arc::new(Mailbox::default());
    (
        OutboxSender {
            mailbox: Arc::clone(&mailbox),
        },
        OutboxReceiver { mailbox },
    )
}

pub struct OutboxSender {
    mailbox: Arc<Mailbox>,
}

impl OutboxSender {
    /// Make `frame` the pending frame for `topic`.  Never blocks.
    pub fn offer(&self, topic: &str, frame: String) -> Result<Offer, OutboxClosed> {
        let offer = {
            let mut pending = self.mailbox.lock();
            if pending.closed {
                return Err(OutboxClosed);
            }
            match pending.frames.get_mut(topic) {
                Some(slot) => {
                    *slot = frame;
                    Offer::Replaced
                }
                None => {
                    pending.order.push_back(topic.to_string());
                    pending.frames.insert(topic.to_string(), frame);
                    Offer::Queued
                }
            }
        };
        self.mailbox.notify.notify_one();
        Ok(offer)
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.lock().closed
    }
}

impl Drop for OutboxSender {
    fn drop(&mut self) {
        self.mailbox.close();
    }
}

impl std::fmt::Debug for OutboxSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxSender")
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub struct OutboxReceiver {
    mailbox: Arc<Mailbox>,
}

impl OutboxReceiver {
    /// Take the oldest pending frame without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        let mut pending = self.mailbox.lock();
        let topic = pending.order.pop_front()?;
        pending.frames.remove(&topic)
    }

    /// Wait for the next pending frame.  Returns `None` once the sender is
    /// gone and everything pending has been taken.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            {
                let mut pending = self.mailbox.lock();
                if let Some(topic) = pending.order.pop_front() {
                    return pending.frames.remove(&topic);
                }
                if pending.closed {
                    return None;
                }
            }
            // `notify_one` leaves a permit when nobody is waiting, so an offer
            // made after the check above still wakes this call.
            self.mailbox.notify.notified().await;
        }
    }

    /// Number of topics with a frame waiting.
    pub fn len(&self) -> usize {
        self.mailbox.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for OutboxReceiver {
    fn drop(&mut self) {
        self.mailbox.close();
    }
}

impl std::fmt::Debug for OutboxReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxReceiver")
            .field("pending", &self.len())
            .finish()
    }
}
