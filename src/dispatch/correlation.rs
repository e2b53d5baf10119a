//! Matching inbound acknowledgements to outstanding replies.
//!
//! A reply registers a waiter under the (conversation id, activity id) it
//! answers. An inbound activity whose `conversation.id` and `replyToId` equal
//! that key completes the oldest live waiter. Waiters remove themselves when
//! dropped, so a cancelled call leaves nothing behind.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::error::{ConnectorError, Result};
use crate::schema::{Activity, ConversationReference};

type Waiters = VecDeque<(u64, oneshot::Sender<Activity>)>;

/// Outstanding acknowledgement waiters.
#[derive(Debug, Default)]
pub struct PendingAcks {
    table: DashMap<ConversationReference, Waiters>,
    next_id: AtomicU64,
}

impl PendingAcks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register interest in the acknowledgement for `key`.
    ///
    /// Must happen before the outbound frame is sent so a fast answer is not
    /// missed.
    pub fn register(self: &Arc<Self>, key: ConversationReference) -> AckWaiter {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.table.entry(key.clone()).or_default().push_back((id, tx));

        AckWaiter {
            key,
            id,
            rx,
            table: Arc::clone(self),
        }
    }

    /// Hand `activity` to a matching waiter.
    ///
    /// Returns the activity back when nobody is waiting for it.
    pub fn complete(&self, activity: Activity) -> Option<Activity> {
        let key = match (activity.conversation_id(), activity.reply_to_id.as_deref()) {
            (Some(conversation), Some(reply_to)) => {
                ConversationReference::with_activity(conversation, reply_to)
            }
            _ => return Some(activity),
        };

        let leftover = match self.table.get_mut(&key) {
            Some(mut waiters) => deliver(&mut waiters, activity),
            None => Some(activity),
        };
        self.table.remove_if(&key, |_, waiters| waiters.is_empty());
        leftover
    }

    /// Drop every waiter. They observe `ConnectionClosed`.
    pub fn fail_all(&self) {
        self.table.clear();
    }

    /// Number of live waiters.
    pub fn len(&self) -> usize {
        self.table.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn detach(&self, key: &ConversationReference, id: u64) {
        if let Some(mut waiters) = self.table.get_mut(key) {
            waiters.retain(|(waiter, _)| *waiter != id);
        }
        self.table.remove_if(key, |_, waiters| waiters.is_empty());
    }
}

fn deliver(waiters: &mut Waiters, mut activity: Activity) -> Option<Activity> {
    while let Some((_, tx)) = waiters.pop_front() {
        match tx.send(activity) {
            Ok(()) => return None,
            // Receiver is mid-drop; try the next one.
            Err(returned) => activity = returned,
        }
    }
    Some(activity)
}

/// One registered waiter. Detaches on drop.
#[derive(Debug)]
pub struct AckWaiter {
    key: ConversationReference,
    id: u64,
    rx: oneshot::Receiver<Activity>,
    table: Arc<PendingAcks>,
}

impl AckWaiter {
    #[inline]
    pub fn key(&self) -> &ConversationReference {
        &self.key
    }

    /// Wait for the acknowledging activity.
    ///
    /// # Errors
    ///
    /// - `Timeout` when nothing matched within `timeout`
    /// - `ConnectionClosed` when the waiter was failed
    pub async fn wait(mut self, timeout: Duration) -> Result<Activity> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(activity)) => Ok(activity),
            Ok(Err(_)) => Err(ConnectorError::ConnectionClosed),
            Err(_) => Err(ConnectorError::Timeout(timeout)),
        }
    }
}

impl Drop for AckWaiter {
    fn drop(&mut self) {
        self.table.detach(&self.key, self.id);
    }
}
