//! Small helpers for scripted crawls: raw cookie and query string parsing,
//! plus a randomized pause between page loads.

use std::collections::BTreeMap;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

/// Parses a raw `Cookie` header (as copied from browser dev tools) into a map.
///
/// A leading `Cookie:` is optional. Names and values are trimmed; pieces
/// without `=` are skipped.
///
/// ```
/// use spider_core::utils::parse_cookie_header;
///
/// let cookies = parse_cookie_header("Cookie: sid=abc; theme=dark");
/// assert_eq!(cookies["sid"], "abc");
/// assert_eq!(cookies["theme"], "dark");
/// ```
#[must_use]
pub fn parse_cookie_header(raw: &str) -> BTreeMap<String, String> {
    let raw = raw.trim();
    let raw = raw.strip_prefix("Cookie:").unwrap_or(raw);
    raw.split(';')
        .filter_map(|piece| {
            let piece = piece.trim();
            if piece.is_empty() {
                return None;
            }
            let Some((name, value)) = piece.split_once('=') else {
                debug!(piece, "skipping cookie piece without '='");
                return None;
            };
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Parses a query string (or a whole URL) into a percent-decoded map.
///
/// Later duplicates win.
///
/// ```
/// use spider_core::utils::parse_query;
///
/// let params = parse_query("https://example.com/s?q=rust%20lang&page=2");
/// assert_eq!(params["q"], "rust lang");
/// assert_eq!(params["page"], "2");
/// ```
#[must_use]
pub fn parse_query(input: &str) -> BTreeMap<String, String> {
    let query = input.split_once('?').map_or(input, |(_, q)| q);
    let query = query.split_once('#').map_or(query, |(q, _)| q);
    url::form_urlencoded::parse(query.as_bytes())
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect()
}

/// Random whole-second duration in `[min_secs, max_secs]`.
///
/// Bounds given in the wrong order are swapped.
#[must_use]
pub fn jitter_between(min_secs: u64, max_secs: u64) -> Duration {
    let (low, high) = if min_secs <= max_secs {
        (min_secs, max_secs)
    } else {
        (max_secs, min_secs)
    };
    Duration::from_secs(rand::thread_rng().gen_range(low..=high))
}

/// Sleeps for a random whole number of seconds in `[min_secs, max_secs]`
/// and returns how long it slept.
///
/// Used between page loads so a crawl does not hammer one host.
pub async fn polite_pause(min_secs: u64, max_secs: u64) -> Duration {
    let pause = jitter_between(min_secs, max_secs);
    info!(secs = pause.as_secs(), "polite pause");
    tokio::time::sleep(pause).await;
    pause
}
