//! Batched rectangle observation for a set of elements sharing one root.
//!
//! The `RectObserver` fuses two host notifiers into one stream:
//!
//! - the **size notifier** reports content-box size changes (and the root's,
//!   which invalidates every element's position)
//! - one **intersection notifier** per element, whose root region is shrunk
//!   to exactly the element's last known rectangle, so it fires as soon as the
//!   element moves relative to the root
//!
//! Every refresh produces a [`VisualEntry`] that is queued until the next
//! rendering frame, then handed to the flush callback in one call.
//!
//! # Threshold learning
//!
//! An element that can never be fully visible (clipped by a scrolling
//! ancestor, sitting on fractional pixels) would keep a notifier configured
//! at 1.0 firing forever. The first report of every fresh notifier is used to
//! learn the ratio the element actually reaches; the notifier is recreated at
//! that ratio and only deviations from it count as geometry changes.

mod watched;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use self::watched::WatchedElement;
use crate::config::ObserverConfig;
use crate::geometry::{Insets, Rect, corrected_threshold, ratio_changed};
use crate::platform::{
    ElementId, FrameToken, IntersectionEntry, IntersectionToken, NotificationSink, Platform,
    SizeEntry,
};

/// Callback receiving every flushed batch.
pub type FlushCallback = Box<dyn Fn(&[VisualEntry]) + Send + Sync>;

/// A geometry change for one element.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualEntry {
    /// The element whose geometry changed.
    pub target: ElementId,

    /// The element's rectangle in the root's coordinate space.
    pub content_rect: Rect,

    /// `false` only when the element has no layout box (zero width and height).
    pub is_appearing: bool,
}

/// Mutable observer state, guarded by one lock.
struct ObserverState {
    root: ElementId,

    /// Last known root rectangle, refreshed when the root resizes.
    root_rect: Rect,

    /// Watched elements in observation order.
    elements: IndexMap<ElementId, WatchedElement>,

    /// Entries waiting for the next frame.
    pending: Vec<VisualEntry>,

    /// Requested frame, present iff `pending` is non-empty.
    frame: Option<FrameToken>,
}

/// Observer emitting batched rectangle changes for many elements.
///
/// # Locking
///
/// State sits behind a `parking_lot::Mutex`. Platform calls happen while the
/// lock is held, so a platform must never call back into the observer
/// synchronously; notifications arrive later through [`NotificationSink`].
/// The flush callback runs with the lock released.
pub struct RectObserver<P: Platform> {
    platform: P,
    config: ObserverConfig,
    state: Mutex<ObserverState>,
    callback: FlushCallback,
}

impl<P: Platform> RectObserver<P> {
    /// Creates an observer with the default configuration.
    pub fn new(platform: P, callback: impl Fn(&[VisualEntry]) + Send + Sync + 'static) -> Self {
        Self::with_config(platform, ObserverConfig::default(), callback)
    }

    /// Creates an observer with an explicit configuration.
    pub fn with_config(
        platform: P,
        config: ObserverConfig,
        callback: impl Fn(&[VisualEntry]) + Send + Sync + 'static,
    ) -> Self {
        let root = platform.root();
        let root_rect = platform.bounding_rect(root);

        Self {
            platform,
            config,
            state: Mutex::new(ObserverState {
                root,
                root_rect,
                elements: IndexMap::new(),
                pending: Vec::new(),
                frame: None,
            }),
            callback: Box::new(callback),
        }
    }

    /// The platform this observer runs on.
    pub const fn platform(&self) -> &P { &self.platform }

    /// The active configuration.
    pub const fn config(&self) -> &ObserverConfig { &self.config }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Starts watching `target`. No-op if it is already watched.
    ///
    /// The size notifier reports on registration, so the element's first
    /// entry arrives without an explicit refresh.
    pub fn observe(&self, target: ElementId) {
        let mut state = self.state.lock();

        if state.elements.contains_key(&target) {
            tracing::trace!(element = %target, "already observing element");
            return;
        }

        // The root is watched while at least one element is, so root resizes
        // can trigger a global refresh.
        if state.elements.is_empty() {
            self.platform.observe_size(state.root);
        }

        state.elements.insert(target, WatchedElement::new(self.config.initial_threshold));
        self.platform.observe_size(target);

        tracing::debug!(element = %target, watched = state.elements.len(), "observing element");
    }

    /// Stops watching `target` and releases its notifiers. No-op if not watched.
    pub fn unobserve(&self, target: ElementId) {
        let mut state = self.state.lock();

        let Some(mut watched) = state.elements.shift_remove(&target) else {
            tracing::trace!(element = %target, "unobserve for element that isn't watched");
            return;
        };

        self.platform.unobserve_size(target);

        if let Some(token) = watched.take_notifier() {
            self.platform.disconnect_intersection(token);
        }

        if state.elements.is_empty() {
            self.platform.disconnect_size();
        }

        tracing::debug!(element = %target, watched = state.elements.len(), "unobserved element");
    }

    /// Drains entries queued for the next frame and cancels that frame.
    ///
    /// Returns an empty vector when nothing is pending.
    pub fn take_records(&self) -> Vec<VisualEntry> {
        let mut state = self.state.lock();

        let Some(frame) = state.frame.take() else {
            return Vec::new();
        };

        self.platform.cancel_frame(frame);
        std::mem::take(&mut state.pending)
    }

    /// Tears down every observation. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let mut state = self.state.lock();

        for (_, mut watched) in state.elements.drain(..) {
            if let Some(token) = watched.take_notifier() {
                self.platform.disconnect_intersection(token);
            }
        }

        self.platform.disconnect_size();

        if let Some(frame) = state.frame.take() {
            self.platform.cancel_frame(frame);
        }
        state.pending.clear();

        tracing::debug!("observer disconnected");
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Whether `target` is currently watched.
    #[must_use]
    pub fn is_observing(&self, target: ElementId) -> bool {
        self.state.lock().elements.contains_key(&target)
    }

    /// Number of watched elements.
    #[must_use]
    pub fn observed_count(&self) -> usize { self.state.lock().elements.len() }

    /// Threshold the element's live notifier fires at.
    #[must_use]
    pub fn threshold_of(&self, target: ElementId) -> Option<f64> {
        self.state.lock().elements.get(&target).map(|watched| watched.threshold)
    }

    /// Whether the element currently owns an intersection notifier.
    #[must_use]
    pub fn has_intersection_notifier(&self, target: ElementId) -> bool {
        self.state.lock().elements.get(&target).is_some_and(WatchedElement::has_notifier)
    }

    /// Number of entries waiting for the next frame.
    #[must_use]
    pub fn pending_count(&self) -> usize { self.state.lock().pending.len() }

    /// Last known root rectangle.
    #[must_use]
    pub fn root_rect(&self) -> Rect { self.state.lock().root_rect }

    /// Current rectangle of `target` in the root's coordinate space.
    #[must_use]
    pub fn measure(&self, target: ElementId) -> Rect { self.platform.bounding_rect(target) }

    // ========================================================================
    // Notification handling
    // ========================================================================

    /// Handles a size notifier batch.
    pub fn handle_resize(&self, entries: &[SizeEntry]) {
        let mut state = self.state.lock();
        let root = state.root;

        // A root resize can shift every element without resizing any of them,
        // so every watched element is re-measured and the rest of the batch
        // is covered by that.
        if let Some(root_entry) = entries.iter().find(|entry| entry.target == root) {
            state.root_rect = root_entry.content_rect;

            let targets: SmallVec<[ElementId; 16]> = state.elements.keys().copied().collect();
            tracing::debug!(
                root_rect = %state.root_rect,
                refreshed = targets.len(),
                "root resized, refreshing every watched element"
            );

            for target in targets {
                self.refresh_and_queue(&mut state, target, None, self.config.initial_threshold);
            }
            return;
        }

        for entry in entries {
            if !state.elements.contains_key(&entry.target) {
                tracing::trace!(element = %entry.target, "size change for element that isn't watched");
                continue;
            }

            self.refresh_and_queue(&mut state, entry.target, None, self.config.initial_threshold);
        }
    }

    /// Handles a report from the intersection notifier `token`.
    pub fn handle_intersection(&self, token: IntersectionToken, entries: &[IntersectionEntry]) {
        let mut state = self.state.lock();

        // Each notifier watches exactly one element, so this is usually one entry.
        for entry in entries {
            let target = entry.target;

            let threshold = {
                let Some(watched) = state.elements.get_mut(&target) else {
                    tracing::trace!(element = %target, "intersection for element that isn't watched");
                    continue;
                };

                if !watched.owns(token) {
                    tracing::trace!(element = %target, ?token, "ignoring stale intersection notifier");
                    continue;
                }

                let was_first = watched.take_first_update();

                // A zero ratio compares as the floor it is tracked at. Any ratio
                // below the threshold leaves the notifier unable to fire again,
                // so it counts as a change however small the gap.
                let observed =
                    corrected_threshold(entry.intersection_ratio, self.config.min_threshold);
                if observed >= watched.threshold
                    && !ratio_changed(observed, watched.threshold, self.config.ratio_tolerance)
                {
                    continue;
                }

                if was_first {
                    // The element can't reach the configured visibility; track
                    // what it does reach instead.
                    observed
                } else {
                    self.config.initial_threshold
                }
            };

            tracing::trace!(
                element = %target,
                ratio = entry.intersection_ratio,
                threshold,
                "intersection ratio changed"
            );

            self.refresh_and_queue(&mut state, target, Some(entry.bounding_rect), threshold);
        }
    }

    /// Handles a frame callback, flushing the queue if `token` is the pending frame.
    pub fn handle_frame(&self, token: FrameToken) {
        let entries = {
            let mut state = self.state.lock();

            if state.frame != Some(token) {
                tracing::trace!(?token, "ignoring stale frame");
                return;
            }

            state.frame = None;
            std::mem::take(&mut state.pending)
        };

        if entries.is_empty() {
            return;
        }

        tracing::trace!(count = entries.len(), "flushing visual entries");
        (self.callback)(&entries);
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Re-measures `target`, replaces its intersection notifier and queues the entry.
    fn refresh_and_queue(
        &self,
        state: &mut ObserverState,
        target: ElementId,
        measured: Option<Rect>,
        threshold: f64,
    ) {
        if let Some(entry) = self.refresh_element(state, target, measured, threshold) {
            self.append_entry(state, entry);
        }
    }

    fn refresh_element(
        &self,
        state: &mut ObserverState,
        target: ElementId,
        measured: Option<Rect>,
        threshold: f64,
    ) -> Option<VisualEntry> {
        let root_rect = state.root_rect;
        let watched = state.elements.get_mut(&target)?;

        if let Some(token) = watched.take_notifier() {
            self.platform.disconnect_intersection(token);
        }

        let rect = measured.unwrap_or_else(|| self.platform.bounding_rect(target));

        // Nothing to watch until the element is laid out.
        if rect.is_unsized() {
            tracing::trace!(element = %target, "element has no size, deferring intersection notifier");
            return Some(VisualEntry { target, content_rect: rect, is_appearing: false });
        }

        let margin = Insets::shrink_to(&root_rect, &rect);
        let token = self.platform.create_intersection(target, margin, threshold);
        watched.arm(token, threshold);

        tracing::trace!(element = %target, rect = %rect, margin = %margin, threshold, "refreshed element");

        Some(VisualEntry { target, content_rect: rect, is_appearing: true })
    }

    fn append_entry(&self, state: &mut ObserverState, entry: VisualEntry) {
        state.pending.push(entry);

        if state.frame.is_none() {
            state.frame = Some(self.platform.request_frame());
        }
    }
}

impl<P: Platform> NotificationSink for RectObserver<P> {
    fn on_resize(&self, entries: &[SizeEntry]) { self.handle_resize(entries); }

    fn on_intersection(&self, token: IntersectionToken, entries: &[IntersectionEntry]) {
        self.handle_intersection(token, entries);
    }

    fn on_frame(&self, token: FrameToken) { self.handle_frame(token); }
}

impl<P: Platform> Drop for RectObserver<P> {
    fn drop(&mut self) { self.disconnect(); }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::platform::GeometrySource;
    use crate::platform::headless::HeadlessDocument;

    type Batches = Arc<Mutex<Vec<Vec<VisualEntry>>>>;

    fn recording_observer(doc: &HeadlessDocument) -> (RectObserver<HeadlessDocument>, Batches) {
        let batches: Batches = Arc::default();
        let sink = Arc::clone(&batches);
        let observer = RectObserver::new(doc.clone(), move |entries: &[VisualEntry]| {
            sink.lock().push(entries.to_vec());
        });
        (observer, batches)
    }

    #[test]
    fn test_first_entry_arrives_on_first_frame() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let el = doc.insert(Rect::new(10.0, 20.0, 100.0, 40.0));
        let (observer, batches) = recording_observer(&doc);

        observer.observe(el);
        assert_eq!(doc.tick(&observer), 1);

        let batches = batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec![VisualEntry {
            target: el,
            content_rect: Rect::new(10.0, 20.0, 100.0, 40.0),
            is_appearing: true,
        }]);
    }

    #[test]
    fn test_observe_twice_is_noop() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let el = doc.insert(Rect::new(0.0, 0.0, 10.0, 10.0));
        let (observer, _) = recording_observer(&doc);

        observer.observe(el);
        observer.observe(el);

        assert_eq!(observer.observed_count(), 1);
        assert!(observer.is_observing(el));
    }

    #[test]
    fn test_moves_coalesce_into_one_batch() {
        let doc = HeadlessDocument::new(1000.0, 1000.0);
        let ids: Vec<ElementId> = (0..3)
            .map(|i| doc.insert(Rect::new(100.0, f64::from(i) * 200.0 + 100.0, 100.0, 100.0)))
            .collect();
        let (observer, batches) = recording_observer(&doc);

        for id in &ids {
            observer.observe(*id);
        }
        doc.tick(&observer);
        batches.lock().clear();

        for id in &ids {
            let layout = doc.layout_of(*id).unwrap();
            doc.move_to(*id, layout.x + 30.0, layout.y).unwrap();
        }
        assert_eq!(doc.tick(&observer), 1);

        let batches = batches.lock();
        assert_eq!(batches.len(), 1);
        let targets: Vec<ElementId> = batches[0].iter().map(|entry| entry.target).collect();
        assert_eq!(targets, ids);
        assert!(batches[0].iter().all(|entry| (entry.content_rect.x - 130.0).abs() < f64::EPSILON));
        assert_eq!(doc.pending_frames(), 0);
    }

    #[test]
    fn test_clipped_element_settles_on_reachable_ratio() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let el = doc.insert_clipped(
            Rect::new(0.0, 0.0, 100.0, 100.0),
            Rect::new(0.0, 0.0, 40.0, 100.0),
        );
        let (observer, batches) = recording_observer(&doc);

        observer.observe(el);
        doc.tick(&observer);

        let threshold = observer.threshold_of(el).unwrap();
        assert!((threshold - 0.4).abs() < 1e-9);
        assert_eq!(doc.intersection_thresholds(el).len(), 1);
        batches.lock().clear();

        // Re-reports of the learned ratio are not geometry changes.
        for _ in 0..5 {
            doc.refire_intersections(&observer);
        }
        assert_eq!(observer.pending_count(), 0);
        assert_eq!(doc.pending_frames(), 0);
        assert_eq!(doc.tick(&observer), 0);
        assert!(batches.lock().is_empty());
    }

    #[test]
    fn test_fractional_position_learns_ratio_and_reports_moves() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let x = 580.167_282_732_068_1;
        let el = doc.insert(Rect::new(x, 0.0, 95.868_701_164_361_98, 5.0));
        let (observer, batches) = recording_observer(&doc);

        observer.observe(el);
        doc.tick(&observer);

        // Float rounding keeps the ratio just short of 1.0.
        let threshold = observer.threshold_of(el).unwrap();
        assert!(threshold <= 1.0);
        assert_eq!(doc.intersection_thresholds(el), vec![threshold]);
        doc.refire_intersections(&observer);
        assert_eq!(observer.pending_count(), 0);
        batches.lock().clear();

        doc.move_to(el, x + 2.0, 0.0).unwrap();
        doc.tick(&observer);

        let batches = batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].last().map(|entry| entry.content_rect), Some(doc.bounding_rect(el)));
    }

    #[test]
    fn test_fully_clipped_element_settles_on_floor() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let el = doc.insert_clipped(
            Rect::new(0.0, 0.0, 100.0, 100.0),
            Rect::new(300.0, 300.0, 50.0, 50.0),
        );
        let (observer, _) = recording_observer(&doc);

        observer.observe(el);
        doc.tick(&observer);

        let threshold = observer.threshold_of(el).unwrap();
        assert!((threshold - crate::geometry::MIN_THRESHOLD).abs() < f64::EPSILON);

        doc.refire_intersections(&observer);
        assert_eq!(observer.pending_count(), 0);
    }

    #[test]
    fn test_root_resize_refreshes_every_element() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let a = doc.insert(Rect::new(0.0, 0.0, 50.0, 50.0));
        let b = doc.insert(Rect::new(100.0, 100.0, 50.0, 50.0));
        let (observer, batches) = recording_observer(&doc);

        observer.observe(a);
        observer.observe(b);
        doc.tick(&observer);
        batches.lock().clear();

        doc.resize_viewport(1024.0, 768.0);
        doc.tick(&observer);

        assert_eq!(observer.root_rect(), Rect::new(0.0, 0.0, 1024.0, 768.0));
        let batches = batches.lock();
        assert_eq!(batches.len(), 1);
        let targets: Vec<ElementId> = batches[0].iter().map(|entry| entry.target).collect();
        assert_eq!(targets, vec![a, b]);
    }

    #[test]
    fn test_unsized_element_waits_for_layout() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let el = doc.insert(Rect::zero());
        let (observer, batches) = recording_observer(&doc);

        observer.observe(el);
        doc.tick(&observer);

        assert!(!observer.has_intersection_notifier(el));
        assert_eq!(doc.live_intersections(), 0);
        assert_eq!(batches.lock()[0], vec![VisualEntry {
            target: el,
            content_rect: Rect::zero(),
            is_appearing: false,
        }]);

        doc.resize(el, 50.0, 50.0).unwrap();
        doc.tick(&observer);

        assert!(observer.has_intersection_notifier(el));
        let batches = batches.lock();
        assert_eq!(batches.len(), 2);
        assert!(batches[1][0].is_appearing);
        assert_eq!(batches[1][0].content_rect, Rect::new(0.0, 0.0, 50.0, 50.0));
    }

    #[test]
    fn test_detached_element_reports_disappearing() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let el = doc.insert(Rect::new(10.0, 10.0, 50.0, 50.0));
        let (observer, batches) = recording_observer(&doc);

        observer.observe(el);
        doc.tick(&observer);
        doc.detach(el).unwrap();
        doc.tick(&observer);

        let batches = batches.lock();
        let last = batches.last().unwrap();
        assert!(last.iter().any(|entry| !entry.is_appearing));
        assert!(!observer.has_intersection_notifier(el));
    }

    #[test]
    fn test_stale_intersection_token_is_ignored() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let el = doc.insert(Rect::new(0.0, 0.0, 10.0, 10.0));
        let (observer, _) = recording_observer(&doc);

        observer.observe(el);
        doc.tick(&observer);

        observer.handle_intersection(IntersectionToken(9_999), &[IntersectionEntry {
            target: el,
            intersection_ratio: 0.0,
            bounding_rect: Rect::new(500.0, 500.0, 10.0, 10.0),
        }]);

        assert_eq!(observer.pending_count(), 0);
        assert_eq!(doc.pending_frames(), 0);
    }

    #[test]
    fn test_stale_frame_is_ignored() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let el = doc.insert(Rect::new(0.0, 0.0, 10.0, 10.0));
        let (observer, batches) = recording_observer(&doc);

        observer.observe(el);
        doc.pump(&observer);
        observer.handle_frame(FrameToken(9_999));

        assert!(batches.lock().is_empty());
        assert_eq!(observer.pending_count(), 1);
    }

    #[test]
    fn test_unobserve_releases_notifiers() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let a = doc.insert(Rect::new(0.0, 0.0, 10.0, 10.0));
        let b = doc.insert(Rect::new(20.0, 0.0, 10.0, 10.0));
        let (observer, _) = recording_observer(&doc);

        observer.observe(a);
        observer.observe(b);
        doc.tick(&observer);
        assert_eq!(doc.live_intersections(), 2);

        observer.unobserve(a);
        assert_eq!(doc.live_intersections(), 1);
        assert!(!doc.is_size_observed(a));
        assert!(doc.is_size_observed(doc.root()));

        observer.unobserve(b);
        assert_eq!(doc.live_intersections(), 0);
        assert!(!doc.is_size_observed(doc.root()));

        // Unknown elements are ignored
        observer.unobserve(a);
        assert_eq!(observer.observed_count(), 0);
    }

    #[test]
    fn test_take_records_drains_and_cancels_frame() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let el = doc.insert(Rect::new(0.0, 0.0, 10.0, 10.0));
        let (observer, batches) = recording_observer(&doc);

        observer.observe(el);
        doc.pump(&observer);
        assert_eq!(doc.pending_frames(), 1);

        let records = observer.take_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target, el);
        assert_eq!(doc.pending_frames(), 0);

        assert!(observer.take_records().is_empty());
        assert_eq!(doc.run_frame(&observer), 0);
        assert!(batches.lock().is_empty());
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let el = doc.insert(Rect::new(0.0, 0.0, 10.0, 10.0));
        let (observer, batches) = recording_observer(&doc);

        observer.observe(el);
        doc.pump(&observer);

        observer.disconnect();
        observer.disconnect();

        assert_eq!(observer.observed_count(), 0);
        assert_eq!(observer.pending_count(), 0);
        assert_eq!(doc.live_intersections(), 0);
        assert_eq!(doc.pending_frames(), 0);
        assert!(!doc.is_size_observed(el));
        assert_eq!(doc.tick(&observer), 0);
        assert!(batches.lock().is_empty());
    }

    #[test]
    fn test_drop_tears_down_observation() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let el = doc.insert(Rect::new(0.0, 0.0, 10.0, 10.0));

        {
            let (observer, _) = recording_observer(&doc);
            observer.observe(el);
            doc.pump(&observer);
        }

        assert_eq!(doc.live_intersections(), 0);
        assert_eq!(doc.pending_frames(), 0);
    }
}
