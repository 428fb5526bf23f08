//! Output file names for saved pages.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Name used when neither the URL nor the response suggests one.
pub const FALLBACK_FILE_NAME: &str = "index.html";

/// Characters that cannot appear in a file name on common platforms.
#[allow(clippy::expect_used)]
static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[/\\:*?"<>|]"#).expect("file name regex is valid") // Static pattern, safe to panic
});

/// Replaces `/ \ : * ? " < > |` with `-`.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    UNSAFE_CHARS.replace_all(name, "-").into_owned()
}

/// Last non-empty path segment of `url`, without query or fragment.
pub(crate) fn name_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    if segment.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(segment)
        .map_or_else(|_| segment.to_string(), std::borrow::Cow::into_owned);
    Some(decoded)
}

/// Filename from a `Content-Disposition` header value.
///
/// Prefers the RFC 5987 `filename*=` form over plain `filename=`.
pub(crate) fn parse_content_disposition(header: &str) -> Option<String> {
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        // charset'language'encoded_value
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            if let Ok(decoded) = urlencoding::decode(encoded[..end].trim()) {
                return Some(decoded.into_owned());
            }
        }
    }

    let pos = header.find("filename=")?;
    let value = header[pos + 9..].trim();
    if let Some(stripped) = value.strip_prefix('"') {
        let end = stripped.find('"')?;
        let name = &stripped[..end];
        return (!name.is_empty()).then(|| name.to_string());
    }
    let end = value.find(';').unwrap_or(value.len());
    let name = value[..end].trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Picks the output name: explicit, then URL, then `Content-Disposition`,
/// then [`FALLBACK_FILE_NAME`]. The result is always sanitized.
pub(crate) fn resolve_file_name(
    explicit: Option<&str>,
    url: &str,
    content_disposition: Option<&str>,
) -> String {
    let chosen = explicit
        .filter(|name| !name.trim().is_empty())
        .map(str::to_string)
        .or_else(|| name_from_url(url))
        .or_else(|| content_disposition.and_then(parse_content_disposition))
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());
    let sanitized = sanitize_file_name(&chosen);
    if sanitized == "." || sanitized == ".." {
        return FALLBACK_FILE_NAME.to_string();
    }
    sanitized
}
