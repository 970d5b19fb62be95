//! Shared, reference-counted observation for many subscribers.
//!
//! The `ObserverRegistry` owns one [`RectObserver`] and lets any number of
//! independent consumers subscribe to the same element. The underlying
//! observation is created when an element gets its first subscriber and torn
//! down when its last subscriber leaves.
//!
//! # Subscriptions
//!
//! Every call to [`observe`](ObserverRegistry::observe) creates an
//! independent subscription identified by the returned [`SubscriptionId`].
//! Registering the same callback twice for one element yields two
//! subscriptions: it is invoked twice per entry and must be released twice.
//!
//! # Element lifetime
//!
//! Subscriptions are keyed by [`ElementId`], so the registry never keeps an
//! element alive. Elements removed from the document without being
//! unobserved are released by [`purge_detached`](ObserverRegistry::purge_detached).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::config::ObserverConfig;
use crate::observer::{RectObserver, VisualEntry};
use crate::platform::{
    ElementId, FrameToken, IntersectionEntry, IntersectionToken, NotificationSink, Platform,
    SizeEntry,
};

/// Callback invoked with each entry for a subscribed element.
pub type EntryCallback = Arc<dyn Fn(&VisualEntry) + Send + Sync>;

/// Identifies one subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    callback: EntryCallback,
}

/// Subscribers for one element in subscription order.
/// Inline storage covers the common case of a handful of connectors per element.
type SubscriberList = SmallVec<[Subscriber; 4]>;

#[derive(Default)]
struct Subscriptions {
    by_element: HashMap<ElementId, SubscriberList>,
    next_id: u64,
}

impl Subscriptions {
    /// Snapshot of the subscriptions for `target`.
    fn snapshot(&self, target: ElementId) -> SmallVec<[(SubscriptionId, EntryCallback); 4]> {
        self.by_element
            .get(&target)
            .map(|list| list.iter().map(|sub| (sub.id, Arc::clone(&sub.callback))).collect())
            .unwrap_or_default()
    }

    fn contains(&self, target: ElementId, id: SubscriptionId) -> bool {
        self.by_element.get(&target).is_some_and(|list| list.iter().any(|sub| sub.id == id))
    }
}

/// Fans each flushed entry out to the element's subscribers.
///
/// Callbacks are cloned out first so none runs under the lock and any of them
/// may subscribe or unsubscribe re-entrantly. A subscription released by an
/// earlier callback is skipped.
fn dispatch(subscriptions: &Mutex<Subscriptions>, entries: &[VisualEntry]) {
    for entry in entries {
        let snapshot = subscriptions.lock().snapshot(entry.target);
        for (id, callback) in &snapshot {
            if !subscriptions.lock().contains(entry.target, *id) {
                tracing::trace!(element = %entry.target, subscription = id.0, "skipping released subscription");
                continue;
            }
            callback(entry);
        }
    }
}

/// Registry multiplexing many subscribers onto one shared [`RectObserver`].
pub struct ObserverRegistry<P: Platform> {
    observer: RectObserver<P>,
    subscriptions: Arc<Mutex<Subscriptions>>,
}

impl<P: Platform> ObserverRegistry<P> {
    /// Creates a registry with the default configuration.
    pub fn new(platform: P) -> Self { Self::with_config(platform, ObserverConfig::default()) }

    /// Creates a registry with an explicit configuration.
    pub fn with_config(platform: P, config: ObserverConfig) -> Self {
        let subscriptions = Arc::new(Mutex::new(Subscriptions::default()));

        let dispatch_to = Arc::clone(&subscriptions);
        let observer = RectObserver::with_config(platform, config, move |entries| {
            dispatch(&dispatch_to, entries);
        });

        Self { observer, subscriptions }
    }

    /// The platform the shared observer runs on.
    pub const fn platform(&self) -> &P { self.observer.platform() }

    /// Subscribes `callback` to geometry changes of `target`.
    ///
    /// The first subscriber starts the shared observation. Later subscribers
    /// are immediately called with the element's current rectangle, so they
    /// don't wait for the next geometry change.
    pub fn observe(&self, target: ElementId, callback: EntryCallback) -> SubscriptionId {
        let (id, is_first) = {
            let mut subscriptions = self.subscriptions.lock();
            let id = SubscriptionId(subscriptions.next_id);
            subscriptions.next_id += 1;

            let list = subscriptions.by_element.entry(target).or_default();
            let is_first = list.is_empty();
            list.push(Subscriber { id, callback: Arc::clone(&callback) });
            (id, is_first)
        };

        if is_first {
            self.observer.observe(target);
        } else if self.observer.config().replay_late_subscribers {
            let entry = VisualEntry {
                target,
                content_rect: self.observer.measure(target),
                is_appearing: true,
            };
            tracing::trace!(element = %target, rect = %entry.content_rect, "replaying rectangle to late subscriber");
            callback(&entry);
        }

        tracing::debug!(element = %target, subscription = id.0, "subscribed");
        id
    }

    /// Releases one subscription. Returns `false` if it wasn't registered.
    ///
    /// Releasing the element's last subscription stops the shared observation.
    pub fn unobserve(&self, target: ElementId, id: SubscriptionId) -> bool {
        self.remove_where(target, |sub| sub.id == id)
    }

    /// Releases the most recent subscription of `callback` (pointer identity).
    /// Returns `false` if `callback` isn't subscribed to `target`.
    pub fn unobserve_callback(&self, target: ElementId, callback: &EntryCallback) -> bool {
        self.remove_where(target, |sub| Arc::ptr_eq(&sub.callback, callback))
    }

    fn remove_where(&self, target: ElementId, matches: impl Fn(&Subscriber) -> bool) -> bool {
        let now_empty = {
            let mut subscriptions = self.subscriptions.lock();

            let Some(list) = subscriptions.by_element.get_mut(&target) else {
                tracing::trace!(element = %target, "unobserve for element without subscribers");
                return false;
            };

            let Some(index) = list.iter().rposition(|sub| matches(sub)) else {
                return false;
            };
            list.remove(index);

            let now_empty = list.is_empty();
            if now_empty {
                subscriptions.by_element.remove(&target);
            }
            now_empty
        };

        if now_empty {
            self.observer.unobserve(target);
        }

        tracing::debug!(element = %target, released = now_empty, "unsubscribed");
        true
    }

    /// Releases every element the platform reports as detached.
    ///
    /// Returns the number of elements released.
    pub fn purge_detached(&self) -> usize {
        let detached: Vec<ElementId> = {
            let mut subscriptions = self.subscriptions.lock();
            let detached: Vec<ElementId> = subscriptions
                .by_element
                .keys()
                .copied()
                .filter(|target| !self.observer.platform().is_attached(*target))
                .collect();

            for target in &detached {
                subscriptions.by_element.remove(target);
            }
            detached
        };

        for target in &detached {
            self.observer.unobserve(*target);
        }

        if !detached.is_empty() {
            tracing::debug!(released = detached.len(), "purged detached elements");
        }
        detached.len()
    }

    /// Delivers queued entries synchronously instead of waiting for the frame.
    ///
    /// Returns the number of entries dispatched.
    pub fn take_records(&self) -> usize {
        let entries = self.observer.take_records();
        dispatch(&self.subscriptions, &entries);
        entries.len()
    }

    /// Drops every subscription and tears down the shared observer.
    pub fn disconnect(&self) {
        self.subscriptions.lock().by_element.clear();
        self.observer.disconnect();
    }

    /// Number of subscriptions for `target`.
    #[must_use]
    pub fn subscriber_count(&self, target: ElementId) -> usize {
        self.subscriptions.lock().by_element.get(&target).map_or(0, SmallVec::len)
    }

    /// Number of elements with at least one subscriber.
    #[must_use]
    pub fn observed_count(&self) -> usize { self.subscriptions.lock().by_element.len() }

    /// Whether the shared observer is watching `target`.
    #[must_use]
    pub fn is_observing(&self, target: ElementId) -> bool { self.observer.is_observing(target) }
}

impl<P: Platform> NotificationSink for ObserverRegistry<P> {
    fn on_resize(&self, entries: &[SizeEntry]) { self.observer.handle_resize(entries); }

    fn on_intersection(&self, token: IntersectionToken, entries: &[IntersectionEntry]) {
        self.observer.handle_intersection(token, entries);
    }

    fn on_frame(&self, token: FrameToken) { self.observer.handle_frame(token); }
}
