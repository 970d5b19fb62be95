//! Scripted runs of the engine against a [`HeadlessDocument`].
//!
//! A scenario declares a viewport, named elements and an ordered list of
//! steps. Running it records every entry each named subscriber receives,
//! tagged with the step that caused the delivery.
//!
//! Scenarios are JSONC files:
//!
//! ```jsonc
//! {
//!   "viewport": { "width": 1024, "height": 768 },
//!   "elements": [
//!     { "name": "a", "rect": { "x": 0, "y": 0, "width": 200, "height": 50 } }
//!   ],
//!   "steps": [
//!     { "action": "observe", "element": "a", "subscriber": "arrow" },
//!     { "action": "tick" },
//!     { "action": "scroll_by", "dy": 100 },
//!     { "action": "tick" }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::ObserverConfig;
use crate::error::VizError;
use crate::geometry::Rect;
use crate::observer::VisualEntry;
use crate::platform::ElementId;
use crate::platform::headless::HeadlessDocument;
use crate::registry::{EntryCallback, ObserverRegistry, SubscriptionId};

// ============================================================================
// Scenario model
// ============================================================================

/// A scripted document and the steps to run against it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Scenario {
    /// Free-form description shown in reports.
    #[serde(default)]
    pub description: String,

    /// Size of the root's viewport.
    pub viewport: Viewport,

    /// Elements present when the scenario starts.
    #[serde(default)]
    pub elements: Vec<ScenarioElement>,

    /// Steps, run in order.
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Viewport dimensions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

/// A named element.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ScenarioElement {
    /// Name used by steps and reports.
    pub name: String,

    /// Layout rectangle in document coordinates.
    pub rect: Rect,

    /// Visible area of a clipping ancestor, in document coordinates.
    #[serde(default)]
    pub clip: Option<Rect>,
}

/// One scripted action.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Subscribe `subscriber` to `element`.
    Observe { element: String, subscriber: String },

    /// Release the most recent subscription of `subscriber` to `element`.
    Unobserve { element: String, subscriber: String },

    /// Move an element to `(x, y)` without resizing it.
    Move { element: String, x: f64, y: f64 },

    /// Resize an element without moving it.
    Resize { element: String, width: f64, height: f64 },

    /// Scroll the root by a relative offset.
    ScrollBy {
        #[serde(default)]
        dx: f64,
        #[serde(default)]
        dy: f64,
    },

    /// Scroll the root to an absolute offset.
    ScrollTo {
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
    },

    /// Resize the viewport.
    ResizeViewport { width: f64, height: f64 },

    /// Set (or clear, with `null`) an element's clipping region.
    Clip {
        element: String,
        #[serde(default)]
        rect: Option<Rect>,
    },

    /// Remove an element from the rendered tree.
    Detach { element: String },

    /// Put a detached element back.
    Attach { element: String },

    /// Settle notifications and run one rendering frame.
    Tick,

    /// Deliver queued entries synchronously.
    TakeRecords,

    /// Release subscriptions of detached elements.
    Purge,
}

impl Scenario {
    /// Parses a scenario from any JSONC reader.
    ///
    /// # Errors
    ///
    /// Returns `VizError::Json` if the input isn't a valid scenario.
    pub fn from_reader(reader: impl Read) -> Result<Self, VizError> {
        let reader = json_comments::StripComments::new(reader);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Parses a scenario from a JSONC string.
    ///
    /// # Errors
    ///
    /// Returns `VizError::Json` if the input isn't a valid scenario.
    pub fn from_jsonc(source: &str) -> Result<Self, VizError> { Self::from_reader(source.as_bytes()) }

    /// Loads a scenario file.
    ///
    /// # Errors
    ///
    /// Returns `VizError::Io` if the file can't be read and `VizError::Json`
    /// if it isn't a valid scenario.
    pub fn from_path(path: &Path) -> Result<Self, VizError> {
        let file = fs::File::open(path)?;
        Self::from_reader(file)
    }
}

// ============================================================================
// Reports
// ============================================================================

/// One entry received by one subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    /// Index of the step during which the entry was delivered.
    pub step: usize,
    pub subscriber: String,
    pub element: String,
    pub rect: Rect,
    pub is_appearing: bool,
}

/// Outcome of a scenario run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReport {
    pub description: String,

    /// Every delivery, in order.
    pub deliveries: Vec<Delivery>,

    /// Number of rendering frames that ran.
    pub frames: usize,

    /// Elements still observed when the scenario ended.
    pub observed_at_end: usize,
}

impl ScenarioReport {
    /// Deliveries made during step `step`.
    pub fn deliveries_at(&self, step: usize) -> impl Iterator<Item = &Delivery> {
        self.deliveries.iter().filter(move |delivery| delivery.step == step)
    }
}

// ============================================================================
// Runner
// ============================================================================

#[derive(Default)]
struct RunLog {
    step: usize,
    deliveries: Vec<Delivery>,
}

struct Runner<'a> {
    doc: HeadlessDocument,
    registry: ObserverRegistry<HeadlessDocument>,
    log: Arc<Mutex<RunLog>>,
    elements: IndexMap<&'a str, ElementId>,
    subscriptions: HashMap<(&'a str, ElementId), Vec<SubscriptionId>>,
    frames: usize,
}

impl<'a> Runner<'a> {
    fn new(scenario: &'a Scenario, config: &ObserverConfig) -> Result<Self, VizError> {
        let doc = HeadlessDocument::new(scenario.viewport.width, scenario.viewport.height)
            .with_max_rounds(config.max_pump_rounds);

        let mut elements = IndexMap::new();
        for element in &scenario.elements {
            let id = match element.clip {
                Some(clip) => doc.insert_clipped(element.rect, clip),
                None => doc.insert(element.rect),
            };

            if elements.insert(element.name.as_str(), id).is_some() {
                return Err(VizError::Scenario(format!("duplicate element name '{}'", element.name)));
            }
        }

        Ok(Self {
            registry: ObserverRegistry::with_config(doc.clone(), config.clone()),
            doc,
            log: Arc::new(Mutex::new(RunLog::default())),
            elements,
            subscriptions: HashMap::new(),
            frames: 0,
        })
    }

    fn element(&self, name: &str) -> Result<ElementId, VizError> {
        self.elements
            .get(name)
            .copied()
            .ok_or_else(|| VizError::Scenario(format!("no element named '{name}'")))
    }

    fn callback_for(&self, subscriber: &str, element: &str) -> EntryCallback {
        let log = Arc::clone(&self.log);
        let subscriber = subscriber.to_string();
        let element = element.to_string();

        Arc::new(move |entry: &VisualEntry| {
            let mut log = log.lock();
            let step = log.step;
            log.deliveries.push(Delivery {
                step,
                subscriber: subscriber.clone(),
                element: element.clone(),
                rect: entry.content_rect,
                is_appearing: entry.is_appearing,
            });
        })
    }

    fn run_step(&mut self, step: &'a Step) -> Result<(), VizError> {
        match step {
            Step::Observe { element, subscriber } => {
                let id = self.element(element)?;
                let callback = self.callback_for(subscriber, element);
                let subscription = self.registry.observe(id, callback);
                self.subscriptions.entry((subscriber.as_str(), id)).or_default().push(subscription);
            }
            Step::Unobserve { element, subscriber } => {
                let id = self.element(element)?;
                let subscription = self
                    .subscriptions
                    .get_mut(&(subscriber.as_str(), id))
                    .and_then(Vec::pop)
                    .ok_or_else(|| {
                        VizError::Scenario(format!(
                            "subscriber '{subscriber}' is not observing '{element}'"
                        ))
                    })?;
                self.registry.unobserve(id, subscription);
            }
            Step::Move { element, x, y } => self.doc.move_to(self.element(element)?, *x, *y)?,
            Step::Resize { element, width, height } => {
                self.doc.resize(self.element(element)?, *width, *height)?;
            }
            Step::ScrollBy { dx, dy } => self.doc.scroll_by(*dx, *dy),
            Step::ScrollTo { x, y } => self.doc.scroll_to(*x, *y),
            Step::ResizeViewport { width, height } => self.doc.resize_viewport(*width, *height),
            Step::Clip { element, rect } => self.doc.set_clip(self.element(element)?, *rect)?,
            Step::Detach { element } => self.doc.detach(self.element(element)?)?,
            Step::Attach { element } => self.doc.attach(self.element(element)?)?,
            Step::Tick => self.frames += self.doc.tick(&self.registry),
            Step::TakeRecords => {
                self.registry.take_records();
            }
            Step::Purge => {
                self.registry.purge_detached();
            }
        }

        Ok(())
    }
}

/// Runs `scenario` with `config` and reports every delivery.
///
/// # Errors
///
/// Returns `VizError::Scenario` if a step names an unknown element, releases
/// a subscription that doesn't exist, or element names collide.
pub fn run_scenario(scenario: &Scenario, config: &ObserverConfig) -> Result<ScenarioReport, VizError> {
    let mut runner = Runner::new(scenario, config)?;

    for (index, step) in scenario.steps.iter().enumerate() {
        runner.log.lock().step = index;
        tracing::trace!(step = index, ?step, "running scenario step");
        runner.run_step(step)?;
    }

    let deliveries = std::mem::take(&mut runner.log.lock().deliveries);
    tracing::debug!(
        steps = scenario.steps.len(),
        deliveries = deliveries.len(),
        frames = runner.frames,
        "scenario finished"
    );

    Ok(ScenarioReport {
        description: scenario.description.clone(),
        deliveries,
        frames: runner.frames,
        observed_at_end: runner.registry.observed_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCROLL_SCENARIO: &str = r#"{
        // two boxes, page scrolled by 100px
        "viewport": { "width": 1024, "height": 768 },
        "elements": [
            { "name": "a", "rect": { "x": 0, "y": 0, "width": 200, "height": 50 } },
            { "name": "b", "rect": { "x": 0, "y": 300, "width": 200, "height": 50 } }
        ],
        "steps": [
            { "action": "observe", "element": "a", "subscriber": "arrow" },
            { "action": "observe", "element": "b", "subscriber": "arrow" },
            { "action": "tick" },
            { "action": "scroll_by", "dy": 100 },
            { "action": "tick" }
        ]
    }"#;

    #[test]
    fn test_parse_scenario_with_comments() {
        let scenario = Scenario::from_jsonc(SCROLL_SCENARIO).unwrap();
        assert_eq!(scenario.elements.len(), 2);
        assert_eq!(scenario.steps.len(), 5);
        assert!(matches!(scenario.steps[3], Step::ScrollBy { dy, .. } if (dy - 100.0).abs() < f64::EPSILON));
    }

    #[test]
    fn test_scroll_scenario_reports_shifted_rects() {
        let scenario = Scenario::from_jsonc(SCROLL_SCENARIO).unwrap();
        let report = run_scenario(&scenario, &ObserverConfig::default()).unwrap();

        let initial: Vec<_> = report.deliveries_at(2).collect();
        assert_eq!(initial.len(), 2);

        let scrolled: Vec<_> = report.deliveries_at(4).collect();
        assert_eq!(scrolled.len(), 2);
        assert_eq!(scrolled[0].element, "a");
        assert_eq!(scrolled[0].rect, Rect::new(0.0, -100.0, 200.0, 50.0));
        assert_eq!(scrolled[1].element, "b");
        assert_eq!(scrolled[1].rect, Rect::new(0.0, 200.0, 200.0, 50.0));
        assert!(scrolled.iter().all(|delivery| delivery.is_appearing));

        assert_eq!(report.frames, 2);
        assert_eq!(report.observed_at_end, 2);
    }

    #[test]
    fn test_unknown_element_is_an_error() {
        let scenario = Scenario::from_jsonc(
            r#"{
                "viewport": { "width": 100, "height": 100 },
                "steps": [{ "action": "detach", "element": "ghost" }]
            }"#,
        )
        .unwrap();

        let err = run_scenario(&scenario, &ObserverConfig::default()).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_unobserve_without_subscription_is_an_error() {
        let scenario = Scenario::from_jsonc(
            r#"{
                "viewport": { "width": 100, "height": 100 },
                "elements": [{ "name": "a", "rect": { "x": 0, "y": 0, "width": 10, "height": 10 } }],
                "steps": [{ "action": "unobserve", "element": "a", "subscriber": "x" }]
            }"#,
        )
        .unwrap();

        let err = run_scenario(&scenario, &ObserverConfig::default()).unwrap_err();
        assert!(matches!(err, VizError::Scenario(_)));
    }

    #[test]
    fn test_duplicate_element_names_are_rejected() {
        let scenario = Scenario::from_jsonc(
            r#"{
                "viewport": { "width": 100, "height": 100 },
                "elements": [
                    { "name": "a", "rect": { "x": 0, "y": 0, "width": 10, "height": 10 } },
                    { "name": "a", "rect": { "x": 5, "y": 5, "width": 10, "height": 10 } }
                ]
            }"#,
        )
        .unwrap();

        assert!(run_scenario(&scenario, &ObserverConfig::default()).is_err());
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let result = Scenario::from_jsonc(r#"{ "viewport": { "width": 1, "height": 1 }, "extra": 1 }"#);
        assert!(matches!(result, Err(VizError::Json(_))));
    }
}
