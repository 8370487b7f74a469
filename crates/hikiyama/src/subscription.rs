//! Cancellable handles for store listeners and sensor watches.
//!
//! Every continuous callback source in hikiyama (a document listener, a
//! location watch) hands back a [`Subscription`]. Cancelling it releases the
//! underlying resource exactly once, no matter how many clones call `cancel`.

use std::sync::{Arc, Mutex, PoisonError};

type CancelFn = Box<dyn FnOnce() + Send>;

/// A handle to a running subscription.
///
/// This is a lightweight, cloneable handle: all clones share the same
/// cancellation state. Dropping a handle does not cancel it; use a
/// [`SubscriptionSet`] for scoped teardown.
#[derive(Clone)]
pub struct Subscription {
    label: Arc<str>,
    cancel: Arc<Mutex<Option<CancelFn>>>,
}

impl Subscription {
    /// Create a subscription that runs `cancel` when cancelled.
    pub fn new(label: impl Into<Arc<str>>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            cancel: Arc::new(Mutex::new(Some(Box::new(cancel)))),
        }
    }

    /// What this subscription listens to.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Cancel the subscription.
    ///
    /// Returns `true` if this call performed the cancellation, `false` if it
    /// had already been cancelled.
    pub fn cancel(&self) -> bool {
        let cancel = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match cancel {
            Some(f) => {
                f();
                true
            }
            None => false,
        }
    }

    /// Check if the subscription has not been cancelled yet.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("active", &self.is_active())
            .finish()
    }
}

/// A collection of subscriptions that are torn down together.
///
/// All members are cancelled by [`SubscriptionSet::cancel_all`] and when the
/// set is dropped.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription to manage.
    pub fn add(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    /// Cancel every subscription and empty the set.
    ///
    /// Returns how many subscriptions were still active.
    pub fn cancel_all(&mut self) -> usize {
        self.subscriptions
            .drain(..)
            .filter(Subscription::cancel)
            .count()
    }

    /// Get the number of managed subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Check if the set holds no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Check if any managed subscription is still active.
    #[must_use]
    pub fn any_active(&self) -> bool {
        self.subscriptions.iter().any(Subscription::is_active)
    }
}

impl Drop for SubscriptionSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
