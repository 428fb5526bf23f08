//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Scripted web retrieval: fetch pages, download files, inspect sessions.
///
/// Every request goes through one session with retries and exponential
/// backoff. Session defaults come from the config file, then flags.
#[derive(Parser, Debug)]
#[command(name = "spider")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/spider-utils/config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Per-attempt timeout in seconds
    #[arg(long, value_name = "SECS", global = true, value_parser = parse_timeout)]
    pub timeout: Option<f64>,

    /// Retries after the first attempt (0-20)
    #[arg(short = 'r', long, value_name = "N", global = true, value_parser = clap::value_parser!(u32).range(0..=20))]
    pub retries: Option<u32>,

    /// Backoff factor in seconds; waits are factor * 2^n
    #[arg(long, value_name = "SECS", global = true, value_parser = parse_backoff)]
    pub backoff: Option<f64>,

    /// Proxy URL (http://, https:// or socks5://)
    #[arg(long, value_name = "URL", global = true)]
    pub proxy: Option<String>,

    /// Accept invalid TLS certificates
    #[arg(long, global = true)]
    pub insecure: bool,

    /// Extra header as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header", value_name = "NAME:VALUE", global = true, value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Raw cookie string, e.g. "a=1; b=2"
    #[arg(long, value_name = "COOKIES", global = true)]
    pub cookie: Option<String>,

    /// Send a random desktop browser User-Agent
    #[arg(long, global = true, conflicts_with = "mobile_ua")]
    pub random_ua: bool,

    /// Send a random mobile browser User-Agent
    #[arg(long, global = true)]
    pub mobile_ua: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// GET a URL and print the body to stdout.
    Get {
        /// HTTP/HTTPS URL.
        url: String,

        /// Request option as key=value (timeout, proxy, headers.NAME, params.NAME)
        #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,
    },

    /// Download a file, resuming a partial one.
    Download {
        /// HTTP/HTTPS URL.
        url: String,

        /// Destination file.
        dest: PathBuf,

        /// Start over instead of resuming.
        #[arg(long)]
        no_resume: bool,

        /// Hide the progress bar.
        #[arg(long)]
        no_progress: bool,
    },

    /// Save pages as text files, pausing politely between them.
    Save {
        /// One or more HTTP/HTTPS URLs.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Output file name (only with a single URL).
        #[arg(long)]
        name: Option<String>,

        /// Output directory.
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        /// Minimum pause between pages in seconds.
        #[arg(long, default_value_t = 1)]
        pause_min: u64,

        /// Maximum pause between pages in seconds.
        #[arg(long, default_value_t = 3)]
        pause_max: u64,
    },

    /// Print the resolved session state.
    Session,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected NAME:VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in '{raw}'"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn parse_timeout(raw: &str) -> Result<f64, String> {
    let secs: f64 = raw.parse().map_err(|_| format!("'{raw}' is not a number"))?;
    if secs > 0.0 && secs <= 3600.0 {
        Ok(secs)
    } else {
        Err(format!("{secs} out of range (0, 3600]"))
    }
}

fn parse_backoff(raw: &str) -> Result<f64, String> {
    let factor: f64 = raw.parse().map_err(|_| format!("'{raw}' is not a number"))?;
    if (0.0..=60.0).contains(&factor) {
        Ok(factor)
    } else {
        Err(format!("{factor} out of range 0..=60"))
    }
}
