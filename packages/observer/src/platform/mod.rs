//! Platform boundary for the observation engine.
//!
//! The engine never talks to a real document directly. It consumes four
//! host capabilities through the traits below and receives the host's
//! asynchronous notifications through [`NotificationSink`]:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Host document                            │
//! │  size notifier · intersection notifiers · frame scheduler    │
//! └───────────────┬──────────────────────────────▲───────────────┘
//!                 │ NotificationSink             │ Platform traits
//!                 ▼                              │
//! ┌──────────────────────────────────────────────┴───────────────┐
//! │            RectObserver / ObserverRegistry                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Notifications must be delivered one at a time from the same execution
//! context that drives the engine, and never from inside a `Platform` call.

pub mod headless;

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::geometry::{Insets, Rect};

// ============================================================================
// Identities
// ============================================================================

/// Stable identity of an element, handed out by the host.
///
/// The engine only ever stores these ids, so it cannot keep an element alive.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "#{}", self.0) }
}

/// Handle to one live intersection notifier instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntersectionToken(pub u64);

/// Handle to one requested rendering-frame callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameToken(pub u64);

// ============================================================================
// Notification payloads
// ============================================================================

/// One size-notifier record: an element whose content box changed size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SizeEntry {
    pub target: ElementId,
    pub content_rect: Rect,
}

/// One intersection-notifier record.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntersectionEntry {
    pub target: ElementId,
    /// Fraction of the element's area inside the notifier's root region.
    pub intersection_ratio: f64,
    /// The element's bounding rectangle at the time the notifier fired.
    pub bounding_rect: Rect,
}

// ============================================================================
// Capabilities
// ============================================================================

/// Reports content-box size changes, once on registration and once per change.
pub trait SizeNotifier {
    /// Starts reporting size changes for `target`.
    fn observe_size(&self, target: ElementId);

    /// Stops reporting size changes for `target`.
    fn unobserve_size(&self, target: ElementId);

    /// Stops reporting for every target.
    fn disconnect_size(&self);
}

/// Creates single-element intersection notifiers.
///
/// A notifier cannot be reconfigured; changing its margin or threshold means
/// disconnecting it and creating a new one.
pub trait IntersectionNotifier {
    /// Creates a notifier watching `target` against the root region adjusted by
    /// `margin`, firing when the visible ratio crosses `threshold`.
    fn create_intersection(
        &self,
        target: ElementId,
        margin: Insets,
        threshold: f64,
    ) -> IntersectionToken;

    /// Disposes a notifier. Unknown tokens are ignored.
    fn disconnect_intersection(&self, token: IntersectionToken);
}

/// Schedules callbacks right before the next paint.
pub trait FrameScheduler {
    /// Requests one frame callback.
    fn request_frame(&self) -> FrameToken;

    /// Cancels a requested frame that hasn't fired yet.
    fn cancel_frame(&self, token: FrameToken);
}

/// Synchronous geometry queries.
pub trait GeometrySource {
    /// The document root shared by every observation.
    fn root(&self) -> ElementId;

    /// Current bounding rectangle of `target` in the root's visible coordinate space.
    fn bounding_rect(&self, target: ElementId) -> Rect;

    /// Whether `target` is still part of the document.
    fn is_attached(&self, target: ElementId) -> bool;
}

/// Everything the engine needs from its host.
pub trait Platform: SizeNotifier + IntersectionNotifier + FrameScheduler + GeometrySource {}

impl<T> Platform for T where T: SizeNotifier + IntersectionNotifier + FrameScheduler + GeometrySource {}

// ============================================================================
// Sink
// ============================================================================

/// Receiver of host notifications.
///
/// Implemented by both [`RectObserver`](crate::RectObserver) and
/// [`ObserverRegistry`](crate::ObserverRegistry); the host calls whichever
/// one owns the platform.
pub trait NotificationSink {
    /// The size notifier fired for one or more elements.
    fn on_resize(&self, entries: &[SizeEntry]);

    /// The intersection notifier identified by `token` fired.
    fn on_intersection(&self, token: IntersectionToken, entries: &[IntersectionEntry]);

    /// A requested frame callback fired.
    fn on_frame(&self, token: FrameToken);
}
