//! Session state and user-change notification.
//!
//! One container holds one active session. The session cell is the only
//! process-wide mutable state in the library; the auth container is its
//! sole writer, and the transport reads the token per request.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::trace;

use crate::record::Record;

/// An access token for authenticated requests.
///
/// # Security
///
/// Never logged or displayed in Debug output. Treat as opaque.
#[derive(Clone)]
pub struct AccessToken(pub(crate) String);

impl AccessToken {
    /// Create a new access token.
    pub(crate) fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token value for use in authorization headers.
    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

// Hide token value in Debug output
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AccessToken").field(&"[REDACTED]").finish()
    }
}

/// The current session: the authenticated user and their access token,
/// both absent when logged out.
#[derive(Debug, Default)]
pub struct SessionState {
    pub(crate) current_user: Option<Record>,
    pub(crate) access_token: Option<AccessToken>,
}

/// The shared session cell.
pub(crate) type SharedSession = Arc<RwLock<SessionState>>;

/// A session-change notification delivered to subscribers.
///
/// `user` is the newly authenticated user's record, or `None` for a
/// logout.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub user: Option<Record>,
}

/// The set of user-change subscribers attached to one container.
///
/// Each subscriber gets its own channel; notification is a non-blocking
/// send per subscriber, so a listener can never re-enter the notifier.
#[derive(Default)]
pub(crate) struct SessionSubscribers {
    next_id: AtomicU64,
    senders: Mutex<Vec<(u64, mpsc::UnboundedSender<SessionEvent>)>>,
}

impl SessionSubscribers {
    /// Register a new subscriber.
    pub(crate) async fn subscribe(self: &Arc<Self>) -> UserChanges {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().await.push((id, tx));
        UserChanges {
            id,
            rx,
            subscribers: Arc::downgrade(self),
        }
    }

    /// Deliver an event to every live subscriber, dropping closed ones.
    pub(crate) async fn notify(&self, event: SessionEvent) {
        let mut senders = self.senders.lock().await;
        senders.retain(|(id, tx)| {
            let delivered = tx.send(event.clone()).is_ok();
            if !delivered {
                trace!(subscriber = id, "dropping closed session subscriber");
            }
            delivered
        });
    }

    async fn remove(&self, id: u64) {
        self.senders.lock().await.retain(|(sid, _)| *sid != id);
    }
}

/// A subscription to session changes, returned by
/// [`AuthContainer::subscribe_user_changes`](crate::AuthContainer::subscribe_user_changes).
///
/// Dropping the subscription detaches it; [`UserChanges::cancel`] does
/// so eagerly.
pub struct UserChanges {
    id: u64,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    subscribers: std::sync::Weak<SessionSubscribers>,
}

impl UserChanges {
    /// Receive the next session change. Returns `None` once cancelled
    /// with pending events drained.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Receive without waiting, if an event is already queued.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }

    /// Detach this subscription from the container.
    pub async fn cancel(self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.remove(self.id).await;
        }
    }
}

impl fmt::Debug for UserChanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserChanges").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_hides_value_in_debug() {
        let token = AccessToken::new("tok-aaaa.bbbb.cccc");
        let debug = format!("{:?}", token);
        assert!(!debug.contains("tok-"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn subscribers_each_receive_events() {
        let subscribers = Arc::new(SessionSubscribers::default());
        let mut a = subscribers.subscribe().await;
        let mut b = subscribers.subscribe().await;

        subscribers.notify(SessionEvent { user: None }).await;

        assert!(a.try_recv().is_some());
        assert!(b.try_recv().is_some());
    }

    #[tokio::test]
    async fn cancelled_subscriber_is_removed() {
        let subscribers = Arc::new(SessionSubscribers::default());
        let a = subscribers.subscribe().await;
        a.cancel().await;

        subscribers.notify(SessionEvent { user: None }).await;
        assert!(subscribers.senders.lock().await.is_empty());
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned_on_notify() {
        let subscribers = Arc::new(SessionSubscribers::default());
        let a = subscribers.subscribe().await;
        drop(a);

        subscribers.notify(SessionEvent { user: None }).await;
        assert!(subscribers.senders.lock().await.is_empty());
    }
}
