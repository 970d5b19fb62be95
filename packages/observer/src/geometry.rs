//! Geometry primitives shared by the observer, the platform boundary and the
//! headless document.
//!
//! All rectangles use `f64` coordinates in the root's visible coordinate
//! space. Root margins are whole pixels, matching what intersection roots
//! accept.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Smallest threshold an intersection notifier is configured with.
///
/// A ratio of exactly zero would make the notifier fire on any contact only,
/// so a fully hidden element is tracked at this value instead.
pub const MIN_THRESHOLD: f64 = 0.000_000_1;

// ============================================================================
// Rect
// ============================================================================

/// A rectangle with position and size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    /// Create a new rectangle.
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Create a zero-sized rectangle at origin.
    #[must_use]
    pub const fn zero() -> Self { Self::new(0.0, 0.0, 0.0, 0.0) }

    /// Right edge.
    #[must_use]
    pub fn right(&self) -> f64 { self.x + self.width }

    /// Bottom edge.
    #[must_use]
    pub fn bottom(&self) -> f64 { self.y + self.height }

    /// Calculate the area of this rectangle.
    #[must_use]
    pub fn area(&self) -> f64 { self.width.max(0.0) * self.height.max(0.0) }

    /// Whether the element has no layout box at all (zero width and zero height).
    ///
    /// A rectangle with only one zero dimension (a rule, a collapsed row) still
    /// counts as laid out.
    #[must_use]
    pub fn is_unsized(&self) -> bool { self.width == 0.0 && self.height == 0.0 }

    /// Returns this rectangle shifted by `(dx, dy)`.
    #[must_use]
    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Returns the overlapping region, or `None` when the rectangles don't overlap.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());

        if right <= left || bottom <= top {
            return None;
        }

        Some(Self::new(left, top, right - left, bottom - top))
    }

    /// Whether `other` lies inside this rectangle, edges included.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Check if two rectangles are approximately equal (within epsilon).
    #[must_use]
    pub fn approx_eq(&self, other: &Self, epsilon: f64) -> bool {
        (self.x - other.x).abs() < epsilon
            && (self.y - other.y).abs() < epsilon
            && (self.width - other.width).abs() < epsilon
            && (self.height - other.height).abs() < epsilon
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} @ ({}, {})", self.width, self.height, self.x, self.y)
    }
}

// ============================================================================
// Insets
// ============================================================================

/// Signed pixel margins around an intersection root.
///
/// Follows CSS `rootMargin` conventions: positive values grow the root's
/// region outward, negative values shrink it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Insets {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl Insets {
    /// Create new insets.
    #[must_use]
    pub const fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self { top, right, bottom, left }
    }

    /// Margins that shrink `root` down to exactly `target`.
    ///
    /// Each edge distance is floored to a whole pixel before negation, so the
    /// resulting region never ends up smaller than the target by more than a
    /// pixel on any side.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn shrink_to(root: &Rect, target: &Rect) -> Self {
        let x = target.x - root.x;
        let y = target.y - root.y;

        Self {
            top: -(y.floor() as i32),
            right: -((root.width - (x + target.width)).floor() as i32),
            bottom: -((root.height - (y + target.height)).floor() as i32),
            left: -(x.floor() as i32),
        }
    }

    /// The region these margins describe around `root`.
    #[must_use]
    pub fn apply(&self, root: &Rect) -> Rect {
        let left = root.x - f64::from(self.left);
        let top = root.y - f64::from(self.top);
        let right = root.right() + f64::from(self.right);
        let bottom = root.bottom() + f64::from(self.bottom);

        Rect::new(left, top, (right - left).max(0.0), (bottom - top).max(0.0))
    }
}

impl fmt::Display for Insets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}px {}px {}px {}px", self.top, self.right, self.bottom, self.left)
    }
}

// ============================================================================
// Thresholds
// ============================================================================

/// Threshold to track after observing `ratio` on a fresh notifier.
///
/// Zero is replaced by `floor` so the notifier stays usable.
#[must_use]
pub fn corrected_threshold(ratio: f64, floor: f64) -> f64 {
    if ratio <= 0.0 { floor } else { ratio.min(1.0) }
}

/// Whether an observed ratio differs from the configured threshold.
#[must_use]
pub fn ratio_changed(ratio: f64, threshold: f64, tolerance: f64) -> bool {
    (ratio - threshold).abs() > tolerance
}
