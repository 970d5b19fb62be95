//! In-memory document implementing [`Platform`](super::Platform).
//!
//! `HeadlessDocument` models just enough of a rendered document to drive the
//! engine without a browser: a scrollable root with a viewport, elements with
//! layout rectangles, optional clipping ancestors, and detach/attach.
//!
//! Notifier semantics mirror the web platform:
//!
//! - the size notifier reports on registration and whenever an element's
//!   content size differs from the last reported one
//! - an intersection notifier reports on creation and whenever
//!   `ratio >= threshold` flips, where the ratio is measured against the
//!   viewport adjusted by the notifier's margin
//! - frames fire only when the host runs one
//!
//! Nothing is delivered on its own; call [`HeadlessDocument::deliver`],
//! [`pump`](HeadlessDocument::pump), [`run_frame`](HeadlessDocument::run_frame)
//! or [`tick`](HeadlessDocument::tick) with the sink that owns this document.
//! No lock is held while the sink runs.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::{
    ElementId, FrameScheduler, FrameToken, GeometrySource, IntersectionEntry,
    IntersectionNotifier, IntersectionToken, NotificationSink, SizeEntry, SizeNotifier,
};
use crate::error::VizError;
use crate::geometry::{Insets, Rect};

/// Default bound on delivery rounds per [`HeadlessDocument::pump`].
const DEFAULT_MAX_ROUNDS: u32 = 64;

/// The root always has this id.
const ROOT_ID: ElementId = ElementId(0);

#[derive(Debug, Clone)]
struct Node {
    /// Layout rectangle in document coordinates (unaffected by scrolling).
    layout: Rect,

    /// Visible area of a clipping ancestor, in document coordinates.
    clip: Option<Rect>,

    attached: bool,
}

#[derive(Debug, Clone)]
struct LiveIntersection {
    target: ElementId,
    margin: Insets,
    threshold: f64,

    /// Last reported side of the threshold, `None` until the initial report.
    crossed: Option<bool>,
}

#[derive(Debug)]
struct DocumentState {
    viewport: Rect,
    scroll: (f64, f64),
    nodes: IndexMap<ElementId, Node>,
    next_element: u64,

    /// Size-observed targets and the last size reported for each.
    size_targets: IndexMap<ElementId, Option<(f64, f64)>>,

    intersections: IndexMap<IntersectionToken, LiveIntersection>,
    next_intersection: u64,

    frames: Vec<FrameToken>,
    next_frame: u64,
}

impl DocumentState {
    fn node(&self, id: ElementId) -> Result<&Node, VizError> {
        self.nodes.get(&id).ok_or(VizError::UnknownElement(id))
    }

    fn node_mut(&mut self, id: ElementId) -> Result<&mut Node, VizError> {
        self.nodes.get_mut(&id).ok_or(VizError::UnknownElement(id))
    }

    fn bounding_rect(&self, id: ElementId) -> Rect {
        if id == ROOT_ID {
            return self.viewport;
        }

        match self.nodes.get(&id) {
            Some(node) if node.attached => node.layout.translate(-self.scroll.0, -self.scroll.1),
            _ => Rect::zero(),
        }
    }

    fn content_size(&self, id: ElementId) -> (f64, f64) {
        let rect = self.bounding_rect(id);
        (rect.width, rect.height)
    }

    /// Visible fraction of `live.target` inside the notifier's region.
    fn intersection_ratio(&self, live: &LiveIntersection) -> (f64, Rect) {
        let rect = self.bounding_rect(live.target);
        let region = live.margin.apply(&self.viewport);
        let clip = self
            .nodes
            .get(&live.target)
            .and_then(|node| node.clip)
            .map(|clip| clip.translate(-self.scroll.0, -self.scroll.1));

        let area = rect.area();

        // Zero-area targets count as fully visible while they sit inside the region.
        if area <= 0.0 {
            let inside = region.contains(&rect) && clip.is_none_or(|clip| clip.contains(&rect));
            return (if inside { 1.0 } else { 0.0 }, rect);
        }

        let mut visible = rect.intersection(&region);
        if let Some(clip) = clip {
            visible = visible.and_then(|v| v.intersection(&clip));
        }

        (visible.map_or(0.0, |v| v.area() / area), rect)
    }
}

/// A headless, in-memory document.
///
/// Cloning is cheap and yields another handle to the same document, so a test
/// or scenario can keep mutating the document the engine owns.
#[derive(Debug, Clone)]
pub struct HeadlessDocument {
    inner: Arc<Mutex<DocumentState>>,
    max_rounds: u32,
}

impl HeadlessDocument {
    /// Creates an empty document with a `width`×`height` viewport.
    #[must_use]
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DocumentState {
                viewport: Rect::new(0.0, 0.0, width, height),
                scroll: (0.0, 0.0),
                nodes: IndexMap::new(),
                next_element: ROOT_ID.0 + 1,
                size_targets: IndexMap::new(),
                intersections: IndexMap::new(),
                next_intersection: 0,
                frames: Vec::new(),
                next_frame: 0,
            })),
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// Sets the bound on delivery rounds per [`pump`](Self::pump).
    #[must_use]
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    // ========================================================================
    // Document mutations
    // ========================================================================

    /// Adds an element laid out at `layout` (document coordinates).
    pub fn insert(&self, layout: Rect) -> ElementId { self.insert_node(layout, None) }

    /// Adds an element whose visible area is limited to `clip`.
    pub fn insert_clipped(&self, layout: Rect, clip: Rect) -> ElementId {
        self.insert_node(layout, Some(clip))
    }

    fn insert_node(&self, layout: Rect, clip: Option<Rect>) -> ElementId {
        let mut state = self.inner.lock();
        let id = ElementId(state.next_element);
        state.next_element += 1;
        state.nodes.insert(id, Node { layout, clip, attached: true });
        id
    }

    /// Moves an element without resizing it.
    ///
    /// # Errors
    ///
    /// Returns `VizError::UnknownElement` if `id` was never inserted.
    pub fn move_to(&self, id: ElementId, x: f64, y: f64) -> Result<(), VizError> {
        let mut state = self.inner.lock();
        let node = state.node_mut(id)?;
        node.layout.x = x;
        node.layout.y = y;
        Ok(())
    }

    /// Resizes an element without moving it.
    ///
    /// # Errors
    ///
    /// Returns `VizError::UnknownElement` if `id` was never inserted.
    pub fn resize(&self, id: ElementId, width: f64, height: f64) -> Result<(), VizError> {
        let mut state = self.inner.lock();
        let node = state.node_mut(id)?;
        node.layout.width = width;
        node.layout.height = height;
        Ok(())
    }

    /// Sets or clears the clipping region of an element.
    ///
    /// # Errors
    ///
    /// Returns `VizError::UnknownElement` if `id` was never inserted.
    pub fn set_clip(&self, id: ElementId, clip: Option<Rect>) -> Result<(), VizError> {
        self.inner.lock().node_mut(id)?.clip = clip;
        Ok(())
    }

    /// Removes an element from the rendered tree. Its geometry becomes empty.
    ///
    /// # Errors
    ///
    /// Returns `VizError::UnknownElement` if `id` was never inserted.
    pub fn detach(&self, id: ElementId) -> Result<(), VizError> {
        self.inner.lock().node_mut(id)?.attached = false;
        Ok(())
    }

    /// Puts a detached element back into the rendered tree.
    ///
    /// # Errors
    ///
    /// Returns `VizError::UnknownElement` if `id` was never inserted.
    pub fn attach(&self, id: ElementId) -> Result<(), VizError> {
        self.inner.lock().node_mut(id)?.attached = true;
        Ok(())
    }

    /// Resizes the viewport, which is the root's box.
    pub fn resize_viewport(&self, width: f64, height: f64) {
        let mut state = self.inner.lock();
        state.viewport.width = width;
        state.viewport.height = height;
    }

    /// Scrolls the root to an absolute offset.
    pub fn scroll_to(&self, x: f64, y: f64) { self.inner.lock().scroll = (x, y); }

    /// Scrolls the root by a relative offset.
    pub fn scroll_by(&self, dx: f64, dy: f64) {
        let mut state = self.inner.lock();
        state.scroll.0 += dx;
        state.scroll.1 += dy;
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Layout rectangle of an element in document coordinates.
    ///
    /// # Errors
    ///
    /// Returns `VizError::UnknownElement` if `id` was never inserted.
    pub fn layout_of(&self, id: ElementId) -> Result<Rect, VizError> {
        Ok(self.inner.lock().node(id)?.layout)
    }

    /// Whether `id` is registered with the size notifier.
    #[must_use]
    pub fn is_size_observed(&self, id: ElementId) -> bool {
        self.inner.lock().size_targets.contains_key(&id)
    }

    /// Number of live intersection notifiers.
    #[must_use]
    pub fn live_intersections(&self) -> usize { self.inner.lock().intersections.len() }

    /// Thresholds of the live intersection notifiers watching `id`.
    #[must_use]
    pub fn intersection_thresholds(&self, id: ElementId) -> Vec<f64> {
        self.inner
            .lock()
            .intersections
            .values()
            .filter(|live| live.target == id)
            .map(|live| live.threshold)
            .collect()
    }

    /// Number of frames requested and not yet run or cancelled.
    #[must_use]
    pub fn pending_frames(&self) -> usize { self.inner.lock().frames.len() }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Runs one delivery round: the size batch, then intersection reports.
    ///
    /// Returns the number of records delivered.
    pub fn deliver<S: NotificationSink + ?Sized>(&self, sink: &S) -> usize {
        let mut delivered = 0;

        let resized = self.collect_size_changes();
        if !resized.is_empty() {
            delivered += resized.len();
            sink.on_resize(&resized);
        }

        for (token, entry) in self.collect_intersection_changes() {
            // An earlier report in this round may have replaced the notifier.
            if !self.inner.lock().intersections.contains_key(&token) {
                continue;
            }

            delivered += 1;
            sink.on_intersection(token, &[entry]);
        }

        delivered
    }

    /// Delivers rounds until nothing changes, bounded by the round limit.
    ///
    /// Returns the number of records delivered.
    pub fn pump<S: NotificationSink + ?Sized>(&self, sink: &S) -> usize {
        let mut total = 0;

        for _ in 0..self.max_rounds {
            let delivered = self.deliver(sink);
            if delivered == 0 {
                return total;
            }
            total += delivered;
        }

        tracing::warn!(rounds = self.max_rounds, "notifications did not settle");
        total
    }

    /// Runs every requested frame. Returns the number of frames run.
    pub fn run_frame<S: NotificationSink + ?Sized>(&self, sink: &S) -> usize {
        let frames = std::mem::take(&mut self.inner.lock().frames);

        for token in &frames {
            sink.on_frame(*token);
        }

        frames.len()
    }

    /// One rendering cycle: settle notifications, then run the frame.
    pub fn tick<S: NotificationSink + ?Sized>(&self, sink: &S) -> usize {
        self.pump(sink);
        self.run_frame(sink)
    }

    /// Forces every live intersection notifier to report its current ratio.
    ///
    /// Real notifiers may re-report an unchanged ratio (for example after a
    /// style recalculation); this exercises that path.
    pub fn refire_intersections<S: NotificationSink + ?Sized>(&self, sink: &S) -> usize {
        let reports: Vec<(IntersectionToken, IntersectionEntry)> = {
            let state = self.inner.lock();
            state
                .intersections
                .iter()
                .map(|(token, live)| {
                    let (ratio, rect) = state.intersection_ratio(live);
                    (*token, IntersectionEntry {
                        target: live.target,
                        intersection_ratio: ratio,
                        bounding_rect: rect,
                    })
                })
                .collect()
        };

        for (token, entry) in &reports {
            sink.on_intersection(*token, std::slice::from_ref(entry));
        }

        reports.len()
    }

    fn collect_size_changes(&self) -> Vec<SizeEntry> {
        let mut state = self.inner.lock();

        let changed: Vec<(ElementId, (f64, f64))> = state
            .size_targets
            .iter()
            .filter_map(|(id, reported)| {
                let size = state.content_size(*id);
                (*reported != Some(size)).then_some((*id, size))
            })
            .collect();

        changed
            .into_iter()
            .map(|(id, size)| {
                state.size_targets.insert(id, Some(size));
                SizeEntry { target: id, content_rect: Rect::new(0.0, 0.0, size.0, size.1) }
            })
            .collect()
    }

    fn collect_intersection_changes(&self) -> Vec<(IntersectionToken, IntersectionEntry)> {
        let mut state = self.inner.lock();

        let changed: Vec<(IntersectionToken, bool, IntersectionEntry)> = state
            .intersections
            .iter()
            .filter_map(|(token, live)| {
                let (ratio, rect) = state.intersection_ratio(live);
                let crossed = ratio >= live.threshold;
                (live.crossed != Some(crossed)).then_some((*token, crossed, IntersectionEntry {
                    target: live.target,
                    intersection_ratio: ratio,
                    bounding_rect: rect,
                }))
            })
            .collect();

        changed
            .into_iter()
            .map(|(token, crossed, entry)| {
                if let Some(live) = state.intersections.get_mut(&token) {
                    live.crossed = Some(crossed);
                }
                (token, entry)
            })
            .collect()
    }
}

impl SizeNotifier for HeadlessDocument {
    fn observe_size(&self, target: ElementId) {
        // Registration always produces a report, even if re-registered.
        self.inner.lock().size_targets.insert(target, None);
    }

    fn unobserve_size(&self, target: ElementId) {
        self.inner.lock().size_targets.shift_remove(&target);
    }

    fn disconnect_size(&self) { self.inner.lock().size_targets.clear(); }
}

impl IntersectionNotifier for HeadlessDocument {
    fn create_intersection(
        &self,
        target: ElementId,
        margin: Insets,
        threshold: f64,
    ) -> IntersectionToken {
        let mut state = self.inner.lock();
        let token = IntersectionToken(state.next_intersection);
        state.next_intersection += 1;
        state
            .intersections
            .insert(token, LiveIntersection { target, margin, threshold, crossed: None });
        token
    }

    fn disconnect_intersection(&self, token: IntersectionToken) {
        self.inner.lock().intersections.shift_remove(&token);
    }
}

impl FrameScheduler for HeadlessDocument {
    fn request_frame(&self) -> FrameToken {
        let mut state = self.inner.lock();
        let token = FrameToken(state.next_frame);
        state.next_frame += 1;
        state.frames.push(token);
        token
    }

    fn cancel_frame(&self, token: FrameToken) { self.inner.lock().frames.retain(|t| *t != token); }
}

impl GeometrySource for HeadlessDocument {
    fn root(&self) -> ElementId { ROOT_ID }

    fn bounding_rect(&self, target: ElementId) -> Rect { self.inner.lock().bounding_rect(target) }

    fn is_attached(&self, target: ElementId) -> bool {
        target == ROOT_ID || self.inner.lock().nodes.get(&target).is_some_and(|node| node.attached)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    /// Sink recording everything it receives.
    #[derive(Default)]
    struct RecordingSink {
        resizes: Mutex<Vec<Vec<SizeEntry>>>,
        intersections: Mutex<Vec<(IntersectionToken, IntersectionEntry)>>,
        frames: Mutex<Vec<FrameToken>>,
    }

    impl NotificationSink for RecordingSink {
        fn on_resize(&self, entries: &[SizeEntry]) { self.resizes.lock().push(entries.to_vec()); }

        fn on_intersection(&self, token: IntersectionToken, entries: &[IntersectionEntry]) {
            self.intersections.lock().extend(entries.iter().map(|entry| (token, *entry)));
        }

        fn on_frame(&self, token: FrameToken) { self.frames.lock().push(token); }
    }

    #[test]
    fn test_size_notifier_reports_on_registration() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let el = doc.insert(Rect::new(10.0, 10.0, 100.0, 40.0));
        let sink = RecordingSink::default();

        doc.observe_size(el);
        assert_eq!(doc.deliver(&sink), 1);

        let resizes = sink.resizes.lock();
        assert_eq!(resizes.len(), 1);
        assert_eq!(resizes[0][0].target, el);
        assert_eq!(resizes[0][0].content_rect, Rect::new(0.0, 0.0, 100.0, 40.0));
    }

    #[test]
    fn test_size_notifier_ignores_moves() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let el = doc.insert(Rect::new(10.0, 10.0, 100.0, 40.0));
        let sink = RecordingSink::default();

        doc.observe_size(el);
        doc.deliver(&sink);

        doc.move_to(el, 50.0, 50.0).unwrap();
        assert_eq!(doc.deliver(&sink), 0);

        doc.resize(el, 120.0, 40.0).unwrap();
        assert_eq!(doc.deliver(&sink), 1);
    }

    #[test]
    fn test_root_reports_viewport_size() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let sink = RecordingSink::default();

        doc.observe_size(doc.root());
        doc.deliver(&sink);
        doc.resize_viewport(1024.0, 768.0);
        doc.deliver(&sink);

        let resizes = sink.resizes.lock();
        assert_eq!(resizes.len(), 2);
        assert_eq!(resizes[1][0].content_rect, Rect::new(0.0, 0.0, 1024.0, 768.0));
    }

    #[test]
    fn test_detached_element_reports_zero_size() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let el = doc.insert(Rect::new(10.0, 10.0, 100.0, 40.0));
        let sink = RecordingSink::default();

        doc.observe_size(el);
        doc.deliver(&sink);
        doc.detach(el).unwrap();
        doc.deliver(&sink);

        assert!(!doc.is_attached(el));
        assert_eq!(doc.bounding_rect(el), Rect::zero());
        assert_eq!(sink.resizes.lock()[1][0].content_rect, Rect::zero());
    }

    #[test]
    fn test_scroll_moves_bounding_rect() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let el = doc.insert(Rect::new(0.0, 300.0, 200.0, 50.0));

        doc.scroll_by(0.0, 100.0);
        assert_eq!(doc.bounding_rect(el), Rect::new(0.0, 200.0, 200.0, 50.0));
        assert_eq!(doc.layout_of(el).unwrap(), Rect::new(0.0, 300.0, 200.0, 50.0));
    }

    #[test]
    fn test_intersection_reports_initial_ratio_then_crossings() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let rect = Rect::new(100.0, 100.0, 100.0, 100.0);
        let el = doc.insert(rect);
        let sink = RecordingSink::default();

        let margin = Insets::shrink_to(&doc.bounding_rect(doc.root()), &rect);
        let token = doc.create_intersection(el, margin, 1.0);

        assert_eq!(doc.deliver(&sink), 1);
        assert!((sink.intersections.lock()[0].1.intersection_ratio - 1.0).abs() < f64::EPSILON);

        // Nothing moved, nothing to report
        assert_eq!(doc.deliver(&sink), 0);

        doc.move_to(el, 150.0, 100.0).unwrap();
        assert_eq!(doc.deliver(&sink), 1);

        let (reported, entry) = sink.intersections.lock()[1];
        assert_eq!(reported, token);
        assert!((entry.intersection_ratio - 0.5).abs() < 1e-9);
        assert_eq!(entry.bounding_rect, Rect::new(150.0, 100.0, 100.0, 100.0));
    }

    #[test]
    fn test_clip_limits_intersection_ratio() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let rect = Rect::new(0.0, 0.0, 100.0, 100.0);
        let el = doc.insert_clipped(rect, Rect::new(0.0, 0.0, 40.0, 100.0));
        let sink = RecordingSink::default();

        let margin = Insets::shrink_to(&doc.bounding_rect(doc.root()), &rect);
        doc.create_intersection(el, margin, 1.0);
        doc.deliver(&sink);

        assert!((sink.intersections.lock()[0].1.intersection_ratio - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_disconnected_intersection_never_reports() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let el = doc.insert(Rect::new(0.0, 0.0, 10.0, 10.0));
        let sink = RecordingSink::default();

        let token = doc.create_intersection(el, Insets::default(), 1.0);
        doc.disconnect_intersection(token);

        assert_eq!(doc.deliver(&sink), 0);
        assert_eq!(doc.live_intersections(), 0);
    }

    #[test]
    fn test_cancelled_frame_never_runs() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let sink = RecordingSink::default();

        let first = doc.request_frame();
        let second = doc.request_frame();
        doc.cancel_frame(first);

        assert_eq!(doc.run_frame(&sink), 1);
        assert_eq!(*sink.frames.lock(), vec![second]);
        assert_eq!(doc.pending_frames(), 0);
    }

    #[test]
    fn test_unknown_element_errors() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let err = doc.move_to(ElementId(99), 0.0, 0.0).unwrap_err();
        assert!(matches!(err, VizError::UnknownElement(ElementId(99))));
    }

    #[test]
    fn test_clones_share_state() {
        let doc = HeadlessDocument::new(800.0, 600.0);
        let other = doc.clone();
        let el = other.insert(Rect::new(0.0, 0.0, 10.0, 10.0));

        assert!(doc.is_attached(el));
        assert!(Arc::ptr_eq(&doc.inner, &other.inner));
    }
}
