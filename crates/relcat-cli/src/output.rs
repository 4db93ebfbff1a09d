//! Output formatting utilities

use crate::error::CliResult;
use colored::*;
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format for command results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress lines and tables
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

impl OutputFormat {
    /// Whether progress lines go to stdout. Structured formats keep stdout
    /// for the result document alone.
    pub fn is_human(self) -> bool {
        self == Self::Table
    }
}

/// Print rows in the requested format
pub fn print_output<T: Serialize + Tabled>(data: Vec<T>, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Table => {
            if data.is_empty() {
                println!("{}", "No results".dimmed());
            } else {
                println!("{}", Table::new(data));
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&data)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&data)?),
    }
    Ok(())
}

/// Print a single result document. Table output has no document form and
/// prints nothing.
pub fn print_single<T: Serialize>(data: &T, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Table => {}
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(data)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(data)?),
    }
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue(), message);
}

/// Progress reporting that stays quiet under structured output
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    format: OutputFormat,
}

impl Progress {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn info(&self, message: &str) {
        if self.format.is_human() {
            print_info(message);
        }
    }

    pub fn success(&self, message: &str) {
        if self.format.is_human() {
            print_success(message);
        }
    }

    /// Plain line, used for deployment logs and attribute listings
    pub fn line(&self, message: &str) {
        if self.format.is_human() {
            println!("{message}");
        }
    }
}
