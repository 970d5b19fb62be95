//! CLI error types.

use thiserror::Error;
use viz_observer::VizError;

/// Errors that can occur during CLI execution.
#[derive(Debug, Error)]
pub enum CliError {
    /// The scenario file could not be loaded or run.
    #[error("Scenario '{path}' failed: {source}")]
    Scenario {
        path: String,
        #[source]
        source: VizError,
    },

    /// The configuration passed with `--config` is unusable.
    #[error(transparent)]
    Config(#[from] viz_observer::ConfigError),

    /// Output could not be serialized.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_error_display_names_file() {
        let err = CliError::Scenario {
            path: "scroll.jsonc".to_string(),
            source: VizError::Scenario("no element named 'ghost'".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("scroll.jsonc"));
        assert!(msg.contains("ghost"));
    }

    #[test]
    fn test_config_error_is_transparent() {
        let err: CliError = viz_observer::ConfigError::Invalid("bad".to_string()).into();
        assert_eq!(err.to_string(), "Invalid configuration: bad");
    }

    #[test]
    fn test_json_error_from_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: CliError = json_err.into();
        assert!(matches!(err, CliError::Json(_)));
    }
}
