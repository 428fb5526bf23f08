//! CLI entry point for the spider tool.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use spider_core::config::{load_default_file_config, load_file_config};
use spider_core::utils::{parse_cookie_header, polite_pause};
use spider_core::{FileConfig, ProgressSink, RequestOptions, Session, fetch_and_save, user_agent};
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Logs go to stderr; stdout carries page bodies and session dumps.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let session = build_session(&args)?;

    match args.command {
        Command::Get { url, options } => run_get(&session, &url, &options).await,
        Command::Download {
            url,
            dest,
            no_resume,
            no_progress,
        } => run_download(&session, &url, &dest, !no_resume, !no_progress && !args.quiet).await,
        Command::Save {
            urls,
            name,
            dir,
            pause_min,
            pause_max,
        } => run_save(&session, &urls, name.as_deref(), &dir, pause_min, pause_max).await,
        Command::Session => {
            println!("{session}");
            Ok(())
        }
    }
}

/// Config file first, then CLI flags on top.
fn resolve_file_config(args: &Args) -> Result<FileConfig> {
    let mut config = match &args.config {
        Some(path) => load_file_config(path)
            .with_context(|| format!("Failed to load config file '{}'", path.display()))?,
        None => load_default_file_config()
            .context("Failed to load default config file")?
            .config
            .unwrap_or_default(),
    };

    if let Some(timeout) = args.timeout {
        config.timeout_secs = Some(timeout);
    }
    if let Some(retries) = args.retries {
        config.max_retries = Some(retries);
    }
    if let Some(backoff) = args.backoff {
        config.backoff_factor = Some(backoff);
    }
    if let Some(proxy) = &args.proxy {
        config.proxy = Some(proxy.clone());
    }
    if args.insecure {
        config.danger_accept_invalid_certs = Some(true);
    }
    if args.random_ua || args.mobile_ua {
        config.user_agent = Some(user_agent::random_user_agent(args.mobile_ua).to_string());
    }
    config.validate().context("Invalid session settings")?;
    Ok(config)
}

fn build_session(args: &Args) -> Result<Session> {
    let config = resolve_file_config(args)?;
    let mut session = Session::from_config(&config).context("Failed to create session")?;

    if !args.headers.is_empty() {
        let headers: BTreeMap<String, String> = args.headers.iter().cloned().collect();
        session.set_headers(Some(&headers));
    }
    if let Some(raw) = &args.cookie {
        session.set_cookies(Some(&parse_cookie_header(raw)));
    }
    Ok(session)
}

async fn run_get(session: &Session, url: &str, options: &[String]) -> Result<()> {
    let options = RequestOptions::from_pairs(options).context("Invalid request option")?;
    let response = session
        .get(url, options)
        .await
        .with_context(|| format!("GET {url} failed"))?;
    let status = response.status;
    let body = response.text().await.context("Failed to read response body")?;

    let mut stdout = io::stdout().lock();
    stdout.write_all(body.as_bytes())?;
    if !body.ends_with('\n') {
        writeln!(stdout)?;
    }

    if !status.is_success() {
        bail!("GET {url} returned HTTP {status}");
    }
    Ok(())
}

async fn run_download(
    session: &Session,
    url: &str,
    dest: &Path,
    resume: bool,
    show_progress: bool,
) -> Result<()> {
    let bar = if show_progress {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{bytes}/{total_bytes} [{bar:40}] {bytes_per_sec} {eta}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Some(bar)
    } else {
        None
    };

    let result = session
        .download(url, dest, resume, bar.as_ref().map(|b| b as &dyn ProgressSink))
        .await;
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    let report = result.with_context(|| format!("Download of {url} failed"))?;
    info!(
        path = %report.path.display(),
        bytes = report.bytes_on_disk,
        state = %report.state,
        "Download finished"
    );
    Ok(())
}

async fn run_save(
    session: &Session,
    urls: &[String],
    name: Option<&str>,
    dir: &Path,
    pause_min: u64,
    pause_max: u64,
) -> Result<()> {
    if name.is_some() && urls.len() > 1 {
        bail!("--name can only be used with a single URL");
    }

    let mut saved = 0usize;
    for (index, url) in urls.iter().enumerate() {
        if index > 0 {
            polite_pause(pause_min, pause_max).await;
        }
        info!("[{:05}] Starting {url}", index + 1);
        match fetch_and_save(session, url, name, dir).await? {
            Some(path) => {
                println!("{}", path.display());
                saved += 1;
            }
            None => warn!(url = %url, "page not saved"),
        }
    }

    info!(saved, total = urls.len(), "Save finished");
    if saved == 0 {
        bail!("no pages were saved");
    }
    Ok(())
}
