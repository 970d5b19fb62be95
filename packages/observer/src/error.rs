//! Error types for viz-observer.
//!
//! The observation engine itself never fails: redundant calls and stale
//! notifications are absorbed as no-ops. These errors cover the edges that
//! can: the headless document, configuration loading and scenarios.

use thiserror::Error;

use crate::config::ConfigError;
use crate::platform::ElementId;

/// Errors that can occur outside the observation engine proper.
#[derive(Debug, Error)]
pub enum VizError {
    /// The element id is not known to the document.
    #[error("Unknown element: {0}")]
    UnknownElement(ElementId),
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A scenario references something it never declared, or is malformed.
    #[error("Scenario error: {0}")]
    Scenario(String),
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
