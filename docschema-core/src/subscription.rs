use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;
use tokio::task::AbortHandle;

type Callback<T> = Box<dyn FnMut(T) + Send>;

struct ListenerState<T> {
    cancelled: bool,
    callback: Option<Callback<T>>,
}

/// A cancellable callback slot shared between a subscription handle and
/// the task delivering updates.
///
/// The callback runs without the lock held, so it may cancel its own
/// subscription. Once `cancel` returns, the callback is never invoked
/// again, even for an update that was already being delivered.
pub(crate) struct Listener<T> {
    state: Mutex<ListenerState<T>>,
}

impl<T> Listener<T> {
    pub(crate) fn new(callback: impl FnMut(T) + Send + 'static) -> Arc<Self> {
        Arc::new(Listener {
            state: Mutex::new(ListenerState {
                cancelled: false,
                callback: Some(Box::new(callback)),
            }),
        })
    }

    /// Invokes the callback unless cancelled. Returns `false` once the
    /// listener is cancelled, telling the delivering task to stop.
    pub(crate) fn deliver(&self, update: T) -> bool {
        let mut callback = {
            let mut state = self.lock();
            if state.cancelled {
                return false;
            }
            match state.callback.take() {
                Some(callback) => callback,
                // Delivery re-entered from inside the callback.
                None => return true,
            }
        };

        callback(update);

        let mut state = self.lock();
        if state.cancelled {
            drop(state);
            drop(callback);
            false
        } else {
            state.callback = Some(callback);
            true
        }
    }

    fn lock(&self) -> MutexGuard<'_, ListenerState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) trait Cancel: Send + Sync {
    fn cancel(&self);
    fn is_cancelled(&self) -> bool;
}

impl<T: 'static> Cancel for Listener<T> {
    fn cancel(&self) {
        let callback = {
            let mut state = self.lock();
            state.cancelled = true;
            state.callback.take()
        };
        drop(callback);
    }

    fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }
}

/// Handle to a live subscription.
///
/// Cancelling is synchronous and idempotent: once [`Subscription::cancel`]
/// returns, no further update is delivered. Dropping the handle cancels.
#[must_use = "dropping a subscription cancels it"]
pub struct Subscription {
    listener: Option<Arc<dyn Cancel>>,
    task: Option<AbortHandle>,
    label: String,
}

impl Subscription {
    pub(crate) fn new(listener: Arc<dyn Cancel>, task: AbortHandle, label: String) -> Self {
        Subscription {
            listener: Some(listener),
            task: Some(task),
            label,
        }
    }

    /// A subscription that was never established.
    pub fn noop() -> Self {
        Subscription {
            listener: None,
            task: None,
            label: String::new(),
        }
    }

    pub fn cancel(&self) {
        if let Some(listener) = &self.listener {
            if !listener.is_cancelled() {
                debug!("cancelled subscription to {}", self.label);
            }
            listener.cancel();
        }
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.listener.as_ref().is_none_or(|listener| listener.is_cancelled())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn cancel_stops_delivery() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let listener = Listener::new(move |_: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(listener.deliver(1));
        listener.cancel();
        listener.cancel();
        assert!(!listener.deliver(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_may_cancel_itself() {
        let slot: Arc<Mutex<Option<Arc<Listener<u32>>>>> = Arc::new(Mutex::new(None));
        let inner = slot.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let listener = Listener::new(move |_: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(me) = inner.lock().unwrap().as_ref() {
                me.cancel();
            }
        });
        *slot.lock().unwrap() = Some(listener.clone());

        assert!(!listener.deliver(1));
        assert!(!listener.deliver(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(listener.is_cancelled());
    }

    #[test]
    fn cancel_releases_the_callback() {
        let captured = Arc::new(());
        let held = captured.clone();
        let listener = Listener::new(move |_: u32| {
            assert!(Arc::strong_count(&held) > 0);
        });
        assert_eq!(Arc::strong_count(&captured), 2);
        listener.cancel();
        assert_eq!(Arc::strong_count(&captured), 1);
    }

    #[test]
    fn noop_subscription_is_cancelled() {
        let subscription = Subscription::noop();
        assert!(subscription.is_cancelled());
        subscription.cancel();
    }
}
