//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::{EmptyFetchPolicy, SpendDirection};
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;

/// ReportWatch - alerts on report metrics that grew since the last run
///
/// Pulls the latest report captures, compares them with today's stored
/// snapshot and sends one message listing new spend, leads and sales.
/// Meant to be run on a schedule with no overlapping runs.
///
/// Examples:
///   reportwatch --input captures.json
///   reportwatch --source-url https://tracker.example/report.json --state-dir ./state
///   reportwatch --input captures.json --dry-run --verbose
///   reportwatch --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .reportwatch.toml in the current directory
    #[arg(short, long, value_name = "FILE", env = "REPORTWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Read report captures from this JSON file
    #[arg(short, long, value_name = "FILE", conflicts_with = "source_url")]
    pub input: Option<PathBuf>,

    /// Fetch the report from this URL
    #[arg(long, value_name = "URL", env = "REPORTWATCH_SOURCE_URL")]
    pub source_url: Option<String>,

    /// Keep the snapshot in this directory
    #[arg(long, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// UTC offset of the reference timezone (e.g. +02:00)
    #[arg(long, value_name = "OFFSET", allow_hyphen_values = true)]
    pub tz_offset: Option<String>,

    /// Override today's date (YYYY-MM-DD)
    ///
    /// Useful for replaying a capture against a stored snapshot.
    #[arg(long, value_name = "DATE", value_parser = parse_date)]
    pub today: Option<NaiveDate>,

    /// Which spend movements alert
    #[arg(long, value_name = "DIRECTION")]
    pub direction: Option<SpendDirection>,

    /// When to notify about a fetch with no rows
    #[arg(long, value_name = "POLICY")]
    pub on_empty: Option<EmptyFetchPolicy>,

    /// Compute and print alerts without saving state or notifying
    #[arg(long)]
    pub dry_run: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .reportwatch.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref url) = self.source_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Source URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(ref offset) = self.tz_offset {
            if let Err(e) = crate::config::parse_utc_offset(offset) {
                return Err(e.to_string());
            }
        }

        if let Some(ref input) = self.input {
            if !input.is_file() {
                return Err(format!("Input file does not exist: {}", input.display()));
            }
        }

        Ok(())
    }

    /// The `--today` override in the canonical snapshot date format.
    pub fn run_date(&self) -> Option<String> {
        self.today.map(|day| day.format("%Y-%m-%d").to_string())
    }

    /// Returns the log level based on verbosity settings.
    ///
    /// `config_verbose` is the `general.verbose` file setting; `--quiet` wins over it.
    pub fn log_level(&self, config_verbose: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || config_verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

/// Parse a `YYYY-MM-DD` date for `--today`.
fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| format!("invalid date (expected YYYY-MM-DD): {}", raw))
}
