//! Output formatting for scenario reports.
//!
//! - Tables for deliveries
//! - JSON syntax highlighting

use colored::Colorize;
use tabled::settings::object::Columns;
use tabled::settings::{Alignment, Modify, Style};
use tabled::{Table, Tabled};
use viz_observer::{Delivery, ScenarioReport};

/// Prints JSON with syntax highlighting.
///
/// Colors:
/// - Keys: Cyan
/// - Strings: Green
/// - Numbers: Yellow
/// - Booleans/Null: Magenta
pub fn print_highlighted_json(value: &serde_json::Value) {
    let json_str = serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string());
    println!("{}", highlight_json(&json_str));
}

/// Colors a pretty-printed JSON document.
#[must_use]
pub fn highlight_json(json: &str) -> String {
    let mut out = String::with_capacity(json.len() * 2);
    let mut in_string = false;
    let mut is_key = false;
    let mut escape_next = false;
    let mut after_colon = false;
    let mut token = String::new();

    for ch in json.chars() {
        if escape_next {
            token.push(ch);
            escape_next = false;
            continue;
        }

        if ch == '\\' && in_string {
            token.push(ch);
            escape_next = true;
            continue;
        }

        match ch {
            '"' if in_string => {
                token.push(ch);
                let colored =
                    if is_key { token.as_str().cyan() } else { token.as_str().green() };
                out.push_str(&colored.to_string());
                token.clear();
                in_string = false;
                is_key = false;
            }
            '"' => {
                flush_token(&mut out, &mut token, after_colon);
                token.push(ch);
                in_string = true;
                is_key = !after_colon;
                after_colon = false;
            }
            ':' if !in_string => {
                flush_token(&mut out, &mut token, false);
                out.push(':');
                after_colon = true;
            }
            ',' if !in_string => {
                flush_token(&mut out, &mut token, after_colon);
                out.push(',');
                after_colon = false;
            }
            '{' | '}' | '[' | ']' if !in_string => {
                flush_token(&mut out, &mut token, after_colon);
                out.push_str(&ch.to_string().bold().to_string());
                after_colon = false;
            }
            _ => token.push(ch),
        }
    }

    flush_token(&mut out, &mut token, after_colon);
    out
}

/// Appends a pending scalar token, coloring it when it is a value.
fn flush_token(out: &mut String, token: &mut String, is_value: bool) {
    if token.is_empty() {
        return;
    }

    if !is_value || token.trim().is_empty() {
        out.push_str(token);
        token.clear();
        return;
    }

    let start = token.find(|c: char| !c.is_whitespace()).unwrap_or(0);
    let end = token.rfind(|c: char| !c.is_whitespace()).map_or(token.len(), |i| i + 1);
    let (prefix, value, suffix) = (&token[..start], &token[start..end], &token[end..]);

    if matches!(value, "true" | "false" | "null") {
        out.push_str(&format!("{prefix}{}{suffix}", value.magenta()));
    } else if value.parse::<f64>().is_ok() {
        out.push_str(&format!("{prefix}{}{suffix}", value.yellow()));
    } else {
        out.push_str(token);
    }

    token.clear();
}

/// Formats a boolean as a colored mark.
#[must_use]
pub fn format_bool(value: bool) -> String {
    if value { "✓".green().to_string() } else { "✗".red().to_string() }
}

#[derive(Tabled)]
struct DeliveryRow {
    #[tabled(rename = "Step")]
    step: usize,
    #[tabled(rename = "Subscriber")]
    subscriber: String,
    #[tabled(rename = "Element")]
    element: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Position")]
    position: String,
    #[tabled(rename = "Appearing")]
    appearing: String,
}

impl From<&Delivery> for DeliveryRow {
    fn from(delivery: &Delivery) -> Self {
        Self {
            step: delivery.step,
            subscriber: delivery.subscriber.clone(),
            element: delivery.element.clone(),
            size: format!("{}x{}", delivery.rect.width, delivery.rect.height),
            position: format!("{}, {}", delivery.rect.x, delivery.rect.y),
            appearing: format_bool(delivery.is_appearing),
        }
    }
}

/// Renders deliveries as a table.
#[must_use]
pub fn deliveries_table(deliveries: &[Delivery]) -> String {
    Table::new(deliveries.iter().map(DeliveryRow::from))
        .with(Style::rounded())
        .with(Modify::new(Columns::first()).with(Alignment::right()))
        .with(Modify::new(Columns::new(3..5)).with(Alignment::right()))
        .with(Modify::new(Columns::last()).with(Alignment::center()))
        .to_string()
}

/// Prints a scenario report as a titled table.
pub fn print_report(report: &ScenarioReport) {
    if !report.description.is_empty() {
        println!("{}", report.description.bold());
    }

    let summary = format!(
        "Deliveries ({}) · frames {} · observed at end {}",
        report.deliveries.len(),
        report.frames,
        report.observed_at_end
    );
    println!("{}", summary.bold());

    if !report.deliveries.is_empty() {
        println!("{}", deliveries_table(&report.deliveries));
    }
}
