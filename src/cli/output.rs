//! CLI output formatting

use clap::ValueEnum;
use serde::Serialize;

/// Output format of command results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON for scripting
    Json,
}

/// Print a result, as `text` or as pretty JSON of `value`
pub fn emit<V: Serialize>(format: OutputFormat, text: &str, value: &V) -> serde_json::Result<()> {
    println!("{}", render(format, text, value)?);
    Ok(())
}

/// Render a result without printing it
pub fn render<V: Serialize>(format: OutputFormat, text: &str, value: &V) -> serde_json::Result<String> {
    match format {
        OutputFormat::Text => Ok(text.to_string()),
        OutputFormat::Json => serde_json::to_string_pretty(value),
    }
}
