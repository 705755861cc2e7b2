//! Command-line interface definitions for the ESG crawler.
//!
//! Everything except the config path comes from subcommand flags. The
//! config path can also be set with `ESG_CONFIG`.

use chrono::NaiveTime;
use clap::{Parser, Subcommand};
use serde_json::Value;

/// Command-line arguments for the ESG crawler.
///
/// # Examples
///
/// ```sh
/// # One crawl of ROC year 111
/// esg_crawler run --site greenhousegas --year 111
///
/// # Every day at midnight, four years in a row
/// esg_crawler schedule --site greenhousegas --years 109,110,111,112 --at 00:00
///
/// # Drop duplicate disclosures from a collection
/// esg_crawler dedupe --collection esg --fields co_id,year
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to config.yaml
    #[arg(short, long, global = true, env = "ESG_CONFIG", default_value = "config.yaml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl one period of one site
    Run {
        #[arg(long)]
        site: String,
        /// ROC calendar year, e.g. 111
        #[arg(long)]
        year: String,
    },
    /// Crawl the given years every day at a fixed time
    Schedule {
        #[arg(long)]
        site: String,
        #[arg(long, value_delimiter = ',', required = true)]
        years: Vec<String>,
        /// Local time of day, HH:MM
        #[arg(long, default_value = "00:00", value_parser = parse_time_of_day)]
        at: NaiveTime,
    },
    /// Delete points whose payload lacks a field
    Repair {
        #[arg(long)]
        collection: String,
        #[arg(long, default_value = "source_name")]
        field: String,
    },
    /// Delete points repeating an earlier point's values for some fields
    Dedupe {
        #[arg(long)]
        collection: String,
        #[arg(long, value_delimiter = ',', required = true)]
        fields: Vec<String>,
    },
    /// Nearest records to a free-text query
    Search {
        #[arg(long)]
        collection: String,
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Set one payload key on one point and print the stored point
    UpdatePayload {
        #[arg(long)]
        collection: String,
        #[arg(long)]
        id: u64,
        #[arg(long)]
        key: String,
        /// JSON value; anything that is not valid JSON is stored as a string
        #[arg(long, value_parser = parse_payload_value)]
        value: Value,
    },
    /// Print the vector store's Prometheus metrics
    Metrics,
    /// Fetch one page with the crawler's retries and print its text
    Page {
        #[arg(long)]
        url: String,
        /// Fixed user-agent instead of a random browser one
        #[arg(long)]
        user_agent: Option<String>,
    },
}

fn parse_payload_value(s: &str) -> Result<Value, String> {
    Ok(serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_string())))
}

fn parse_time_of_day(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| format!("expected HH:MM, got {s:?} ({e})"))
}
