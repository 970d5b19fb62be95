use crate::config::ObserverConfig;
use crate::scenario::Scenario;

const SCHEMA_BASE_URL: &str =
    "https://raw.githubusercontent.com/viz-observer/viz-observer/main/schemas";

fn with_id(mut schema: schemars::Schema, file_name: &str) -> schemars::Schema {
    if let Some(obj) = schema.as_object_mut() {
        obj.insert("$id".to_string(), serde_json::json!(format!("{SCHEMA_BASE_URL}/{file_name}")));
    }

    schema
}

/// Generates a JSON Schema for the observer configuration file.
#[must_use]
pub fn config_schema() -> schemars::Schema {
    with_id(schemars::schema_for!(ObserverConfig), "config.schema.json")
}

/// Generates a JSON Schema for scenario files.
#[must_use]
pub fn scenario_schema() -> schemars::Schema {
    with_id(schemars::schema_for!(Scenario), "scenario.schema.json")
}

/// Pretty-printed JSON for a generated schema.
#[must_use]
pub fn schema_json(schema: &schemars::Schema) -> String {
    serde_json::to_string_pretty(schema).unwrap_or_default()
}
