//! CLI command definitions using Clap.

use std::io;
use std::path::{Path, PathBuf};

use clap::{ArgAction, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Generator, Shell, generate};
use viz_observer::config::{load_config_from_path, load_or_default};
use viz_observer::schema::{config_schema, scenario_schema, schema_json};
use viz_observer::{ObserverConfig, Scenario, run_scenario};

use crate::error::CliError;
use crate::output;

/// Application version from Cargo.toml.
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// vizobs - run geometry observation scenarios against a headless document.
#[derive(Parser, Debug)]
#[command(name = "vizobs")]
#[command(author, version = APP_VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Observer configuration file (JSONC). Defaults to the user config directory.
    #[arg(long, short, global = true, env = "VIZOBS_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(long, short, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
#[command(next_display_order = None)]
pub enum Commands {
    /// Run a scenario file and print every delivery.
    #[command(after_long_help = r#"Examples:
  vizobs run scroll.jsonc          # Deliveries as a table
  vizobs run scroll.jsonc --json   # Full report as JSON"#)]
    Run {
        /// Scenario file (JSONC).
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Print the report as JSON.
        #[arg(long, short = 'j')]
        json: bool,
    },

    /// Output a JSON Schema.
    ///
    /// Can be redirected to a file for use with editors that support
    /// JSON Schema validation.
    Schema {
        /// Which document to describe.
        #[arg(value_enum, default_value_t = SchemaKind::Config)]
        kind: SchemaKind,
    },

    /// Generate shell completions.
    ///
    /// Usage:
    ///   eval "$(vizobs completions --shell zsh)"
    ///   vizobs completions --shell fish > ~/.config/fish/completions/vizobs.fish
    #[command(verbatim_doc_comment)]
    Completions {
        /// The shell to generate completions for.
        #[arg(long, short, value_enum)]
        shell: Shell,
    },
}

/// Documents a schema can be generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SchemaKind {
    /// The observer configuration file.
    Config,
    /// Scenario files.
    Scenario,
}

impl Cli {
    /// Log filter implied by `-v` flags.
    #[must_use]
    pub const fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Runs the selected command.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration or scenario can't be loaded, the
    /// scenario fails, or the report can't be serialized.
    pub fn execute(&self) -> Result<(), CliError> {
        match &self.command {
            Commands::Run { file, json } => {
                let config = self.resolve_config()?;
                Self::execute_run(file, *json, &config)?;
            }
            Commands::Schema { kind } => {
                let schema = match kind {
                    SchemaKind::Config => config_schema(),
                    SchemaKind::Scenario => scenario_schema(),
                };
                println!("{}", schema_json(&schema));
            }
            Commands::Completions { shell } => Self::print_completions(*shell),
        }

        Ok(())
    }

    /// An explicit `--config` must load; otherwise the default search applies.
    fn resolve_config(&self) -> Result<ObserverConfig, CliError> {
        match &self.config {
            Some(path) => Ok(load_config_from_path(path)?),
            None => Ok(load_or_default(None)),
        }
    }

    fn execute_run(file: &Path, json: bool, config: &ObserverConfig) -> Result<(), CliError> {
        let scenario_error =
            |source| CliError::Scenario { path: file.display().to_string(), source };

        let scenario = Scenario::from_path(file).map_err(scenario_error)?;
        let report = run_scenario(&scenario, config).map_err(scenario_error)?;

        tracing::debug!(
            file = %file.display(),
            deliveries = report.deliveries.len(),
            "scenario complete"
        );

        if json {
            output::print_highlighted_json(&serde_json::to_value(&report)?);
        } else {
            output::print_report(&report);
        }

        Ok(())
    }

    fn print_completions<G: Generator>(generator: G) {
        let mut cmd = Self::command();
        generate(generator, &mut cmd, "vizobs", &mut io::stdout());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() { Cli::command().debug_assert(); }

    #[test]
    fn test_parse_run_with_json() {
        let cli = Cli::try_parse_from(["vizobs", "run", "scroll.jsonc", "--json"]).unwrap();
        match cli.command {
            Commands::Run { file, json } => {
                assert_eq!(file, PathBuf::from("scroll.jsonc"));
                assert!(json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_schema_defaults_to_config() {
        let cli = Cli::try_parse_from(["vizobs", "schema"]).unwrap();
        assert!(matches!(cli.command, Commands::Schema { kind: SchemaKind::Config }));

        let cli = Cli::try_parse_from(["vizobs", "schema", "scenario"]).unwrap();
        assert!(matches!(cli.command, Commands::Schema { kind: SchemaKind::Scenario }));
    }

    #[test]
    fn test_verbosity_maps_to_log_level() {
        let quiet = Cli::try_parse_from(["vizobs", "schema"]).unwrap();
        assert_eq!(quiet.log_level(), "warn");

        let debug = Cli::try_parse_from(["vizobs", "-v", "schema"]).unwrap();
        assert_eq!(debug.log_level(), "debug");

        let trace = Cli::try_parse_from(["vizobs", "schema", "-vv"]).unwrap();
        assert_eq!(trace.log_level(), "trace");
    }

    #[test]
    fn test_global_config_flag() {
        let cli =
            Cli::try_parse_from(["vizobs", "run", "a.jsonc", "--config", "obs.jsonc"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("obs.jsonc")));
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let cli = Cli::try_parse_from([
            "vizobs",
            "run",
            "a.jsonc",
            "--config",
            "/nonexistent/viz-observer/config.jsonc",
        ])
        .unwrap();

        assert!(matches!(cli.resolve_config(), Err(CliError::Config(_))));
    }

    #[test]
    fn test_run_reports_missing_scenario_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.jsonc");

        let err = Cli::execute_run(&missing, false, &ObserverConfig::default()).unwrap_err();
        assert!(matches!(err, CliError::Scenario { .. }));
        assert!(err.to_string().contains("missing.jsonc"));
    }

    #[test]
    fn test_run_executes_scenario_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.jsonc");
        std::fs::write(
            &path,
            r#"{
                // single element
                "viewport": { "width": 100, "height": 100 },
                "elements": [{ "name": "a", "rect": { "x": 0, "y": 0, "width": 10, "height": 10 } }],
                "steps": [
                    { "action": "observe", "element": "a", "subscriber": "x" },
                    { "action": "tick" }
                ]
            }"#,
        )
        .unwrap();

        assert!(Cli::execute_run(&path, true, &ObserverConfig::default()).is_ok());
    }
}
