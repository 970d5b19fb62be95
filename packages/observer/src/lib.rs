//! viz-observer - batched geometry-change observation for document elements.
//!
//! The crate tracks where elements sit on screen and tells consumers when
//! that changes (resizes, scrolling, layout shifts, elements entering or
//! leaving the rendered tree) without polling. Connector widgets such as
//! arrows and hulls use it to redraw whenever an endpoint moves.
//!
//! - [`RectObserver`] fuses a size notifier and per-element intersection
//!   notifiers into one stream, flushed once per rendering frame.
//! - [`ObserverRegistry`] lets many subscribers share one observation per
//!   element.
//! - [`platform`] defines the host boundary; [`HeadlessDocument`] is an
//!   in-memory host for tests, scenarios and tooling.

pub mod config;
pub mod error;
pub mod geometry;
pub mod observer;
pub mod platform;
pub mod registry;
pub mod scenario;
pub mod schema;

pub use config::{ConfigError, ObserverConfig};
pub use error::VizError;
pub use geometry::{Insets, Rect};
pub use observer::{FlushCallback, RectObserver, VisualEntry};
pub use platform::headless::HeadlessDocument;
pub use platform::{ElementId, NotificationSink, Platform};
pub use registry::{EntryCallback, ObserverRegistry, SubscriptionId};
pub use scenario::{Delivery, Scenario, ScenarioReport, run_scenario};
