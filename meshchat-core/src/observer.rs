//! Observer side: subscriptions and the dispatch queue.
//!
//! Notifications are queued in the order the session state changed and delivered from one
//! dedicated thread, so an observer never sees two calls at once.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;

use tokio::sync::{mpsc, oneshot};

use crate::core::Notification;
use crate::transcript::Transcript;

/// UI-facing callbacks. Correlate snapshots by [`Transcript::id`], not by content.
pub trait SessionObserver: Send + Sync {
    /// A brand-new message or inbound resource transfer.
    fn received_transcript(&self, transcript: &Transcript);
    /// A newer snapshot of a resource transcript announced earlier (or returned from a send).
    fn update_transcript(&self, transcript: &Transcript);
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    observers: Vec<(u64, Arc<dyn SessionObserver>)>,
}

/// Shared list of subscribed observers.
#[derive(Clone, Default)]
pub(crate) struct ObserverSet {
    inner: Arc<Mutex<Registry>>,
}

impl ObserverSet {
    pub(crate) fn subscribe(&self, observer: Arc<dyn SessionObserver>) -> Subscription {
        let mut reg = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = reg.next_id;
        reg.next_id += 1;
        reg.observers.push((id, observer));
        tracing::debug!("observer {} subscribed", id);
        Subscription {
            id,
            set: Arc::downgrade(&self.inner),
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn SessionObserver>> {
        let reg = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        reg.observers.iter().map(|(_, o)| o.clone()).collect()
    }

    fn len(&self) -> usize {
        let reg = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        reg.observers.len()
    }
}

/// Handle for one subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the observer"]
pub struct Subscription {
    id: u64,
    set: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.set.upgrade() {
            let mut reg = inner.lock().unwrap_or_else(PoisonError::into_inner);
            reg.observers.retain(|(id, _)| *id != self.id);
            tracing::debug!("observer {} unsubscribed", self.id);
        }
    }
}

enum Dispatch {
    Notify(Notification),
    /// Completes once everything queued before it has been delivered.
    Barrier(oneshot::Sender<()>),
}

/// Sending half of the dispatch queue. The thread exits once this is dropped.
pub(crate) struct Dispatcher {
    tx: mpsc::UnboundedSender<Dispatch>,
}

impl Dispatcher {
    pub(crate) fn spawn(observers: ObserverSet) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        thread::Builder::new()
            .name("meshchat-dispatch".into())
            .spawn(move || run_dispatch(rx, observers))?;
        Ok(Self { tx })
    }

    /// Queue a notification. Never blocks.
    pub(crate) fn notify(&self, notification: Notification) {
        if self.tx.send(Dispatch::Notify(notification)).is_err() {
            tracing::warn!("dispatch thread gone; notification dropped");
        }
    }

    /// Wait until every notification queued so far has been delivered.
    pub(crate) async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Dispatch::Barrier(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

fn run_dispatch(mut rx: mpsc::UnboundedReceiver<Dispatch>, observers: ObserverSet) {
    while let Some(item) = rx.blocking_recv() {
        match item {
            Dispatch::Notify(notification) => {
                for observer in observers.snapshot() {
                    // A panicking observer must not take the others down with the thread.
                    let delivered = panic::catch_unwind(AssertUnwindSafe(|| match &notification {
                        Notification::Received(t) => observer.received_transcript(t),
                        Notification::Updated(t) => observer.update_transcript(t),
                    }));
                    if delivered.is_err() {
                        tracing::warn!(
                            "observer panicked on transcript {}",
                            notification.transcript().id()
                        );
                    }
                }
            }
            Dispatch::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("dispatch queue closed ({} observers)", observers.len());
}
