//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table from a list of items
pub fn print_table<T: Tabled + Serialize>(items: &[T], format: OutputFormat, empty: &str) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", empty.yellow());
                return;
            }
            let table = Table::new(items).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => print_json(&items),
    }
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => print_error(&format!("Failed to serialize output: {e}")),
    }
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a mAP50 value, `-` when it was never measured
pub fn format_metric(value: f64) -> String {
    if value.is_finite() {
        format!("{:.4}", value)
    } else {
        "-".to_string()
    }
}

/// Format a signed metric delta
pub fn format_delta(delta: Option<f64>) -> String {
    match delta {
        Some(d) => format!("{:+.4}", d),
        None => "-".to_string(),
    }
}

/// Color a metric against the absolute threshold
pub fn color_metric(value: f64, threshold: f64) -> String {
    let formatted = format_metric(value);
    if !value.is_finite() {
        formatted
    } else if value >= threshold {
        formatted.green().to_string()
    } else {
        formatted.red().to_string()
    }
}

/// Color a delta against the drop threshold
pub fn color_delta(delta: Option<f64>, drop_threshold: f64) -> String {
    let formatted = format_delta(delta);
    match delta {
        Some(d) if d < drop_threshold => formatted.red().to_string(),
        Some(d) if d < 0.0 => formatted.yellow().to_string(),
        Some(_) => formatted.green().to_string(),
        None => formatted,
    }
}

/// Color a yes/no recommendation
pub fn color_recommendation(recommended: bool) -> String {
    if recommended {
        "retrain".yellow().bold().to_string()
    } else {
        "keep".green().to_string()
    }
}
