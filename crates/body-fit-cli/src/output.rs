//! Output helpers shared by every command.
//!
//! JSON goes to stdout as one pretty document; text status lines go to
//! stderr so they never mix with machine-readable output.

use colored::Colorize;
use serde::Serialize;

use crate::OutputFormat;

/// Print a serializable result. Only used for JSON output.
pub fn print<T: Serialize>(value: &T, format: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    if let OutputFormat::Json = format {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("{}: failed to serialize output: {e}", "Error".red().bold()),
        }
    }
}

/// Progress note, text mode only.
pub fn info(message: &str, format: OutputFormat, quiet: bool) {
    if !quiet && matches!(format, OutputFormat::Text) {
        eprintln!("{} {}", "→".blue(), message);
    }
}

pub fn success(message: &str, format: OutputFormat, quiet: bool) {
    if !quiet && matches!(format, OutputFormat::Text) {
        println!("{} {}", "✓".green().bold(), message);
    }
}

pub fn warning(message: &str, format: OutputFormat, quiet: bool) {
    if !quiet && matches!(format, OutputFormat::Text) {
        eprintln!("{} {}", "!".yellow().bold(), message);
    }
}
