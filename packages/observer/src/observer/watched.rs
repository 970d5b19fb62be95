//! Per-element observation record.

use crate::platform::IntersectionToken;

/// State kept for every watched element.
///
/// The intersection notifier is owned exclusively by this record: it is
/// created on refresh and must be disposed before the next one is created.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WatchedElement {
    /// Live intersection notifier, `None` until the element has a size.
    notifier: Option<IntersectionToken>,

    /// Ratio the live notifier fires at.
    pub(crate) threshold: f64,

    /// Whether the live notifier hasn't reported yet.
    is_first_update: bool,
}

impl WatchedElement {
    pub(crate) const fn new(threshold: f64) -> Self {
        Self { notifier: None, threshold, is_first_update: true }
    }

    /// Detaches the live notifier so the caller can dispose it.
    pub(crate) const fn take_notifier(&mut self) -> Option<IntersectionToken> {
        self.notifier.take()
    }

    /// Installs a freshly created notifier configured at `threshold`.
    pub(crate) fn arm(&mut self, token: IntersectionToken, threshold: f64) {
        self.notifier = Some(token);
        self.threshold = threshold;
        self.is_first_update = true;
    }

    /// Whether `token` is this record's live notifier.
    pub(crate) fn owns(&self, token: IntersectionToken) -> bool { self.notifier == Some(token) }

    /// Whether a notifier is live.
    pub(crate) const fn has_notifier(&self) -> bool { self.notifier.is_some() }

    /// Marks the live notifier as having reported, returning the previous flag.
    pub(crate) const fn take_first_update(&mut self) -> bool {
        std::mem::replace(&mut self.is_first_update, false)
    }
}
